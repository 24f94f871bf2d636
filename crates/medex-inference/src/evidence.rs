//! PHI-safe evidence sanitizing.
//!
//! Snippets returned by the extractor are quotes from the transcript. Before
//! they leave the pipeline, whitespace is collapsed, high-confidence PII
//! patterns are masked, and the result is capped at
//! [`EVIDENCE_MAX_CHARS`](medex_core::defaults::EVIDENCE_MAX_CHARS).
//!
//! Neither the input nor the output of these functions may be logged.

use medex_core::defaults::EVIDENCE_MAX_CHARS;
use medex_core::EvidenceSnippet;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::error;

/// (pattern, replacement) pairs, applied in order.
const PII_PATTERNS: &[(&str, &str)] = &[
    // CURP
    (r"(?i)\b[A-Z]{4}\d{6}[HM][A-Z]{5}[A-Z\d]\d\b", "[CURP]"),
    // RFC
    (r"(?i)\b[A-ZÑ&]{3,4}\d{6}[A-Z\d]{3}\b", "[RFC]"),
    // Phone numbers, 10 digits in 2-4-4 or 3-3-4 groups
    (r"\b\d{2}[\s\-]?\d{4}[\s\-]?\d{4}\b", "[TEL]"),
    (r"\b\d{3}[\s\-]?\d{3}[\s\-]?\d{4}\b", "[TEL]"),
    (r"\b[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,4}\b", "[EMAIL]"),
    // dd/mm/yyyy and yyyy-mm-dd
    (r"\b\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4}\b", "[FECHA]"),
    (r"\b\d{4}[/\-]\d{1,2}[/\-]\d{1,2}\b", "[FECHA]"),
    // Record numbers, only after an explicit keyword
    (r"(?i)(?:expediente|folio|registro)\s*(?:no\.?|num\.?|#|:)\s*\d{4,}", "[ID]"),
    // NSS: exactly 11 digits
    (r"\b\d{11}\b", "[NSS]"),
    // Names, only after an explicit honorific; the name itself must be capitalized
    (
        r"(?i:paciente|sr\.?|sra\.?|don|doña)\s+[A-ZÁÉÍÓÚÑ][a-záéíóúñ]+(?:\s+[A-ZÁÉÍÓÚÑ][a-záéíóúñ]+){1,3}",
        "[NOMBRE]",
    ),
];

static COMPILED_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    PII_PATTERNS
        .iter()
        .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
            Ok(re) => Some((re, *replacement)),
            Err(e) => {
                error!(subsystem = "evidence", error = %e, "Invalid PII pattern skipped");
                None
            }
        })
        .collect()
});

/// Sanitize a single evidence snippet.
pub fn sanitize_evidence(text: &str) -> String {
    let mut result = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if result.is_empty() {
        return result;
    }

    for (pattern, replacement) in COMPILED_PATTERNS.iter() {
        result = pattern.replace_all(&result, *replacement).into_owned();
    }

    if result.chars().count() > EVIDENCE_MAX_CHARS {
        let truncated: String = result.chars().take(EVIDENCE_MAX_CHARS - 3).collect();
        result = format!("{}...", truncated.trim_end());
    }

    result.trim().to_string()
}

/// Sanitize a batch of snippets, dropping any that end up empty and keeping
/// at most `max_snippets`.
pub fn sanitize_snippets(snippets: &[EvidenceSnippet], max_snippets: usize) -> Vec<EvidenceSnippet> {
    snippets
        .iter()
        .filter_map(|s| {
            let text = sanitize_evidence(&s.text);
            (!text.is_empty()).then(|| EvidenceSnippet {
                text,
                field_path: s.field_path.clone(),
            })
        })
        .take(max_snippets)
        .collect()
}

/// Whether any PII pattern matches `text`.
pub fn is_potentially_phi(text: &str) -> bool {
    COMPILED_PATTERNS.iter().any(|(re, _)| re.is_match(text))
}
