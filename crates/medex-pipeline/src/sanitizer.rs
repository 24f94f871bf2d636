//! Final cleanup of merged structured fields.
//!
//! Values are trimmed and inner whitespace collapsed. Placeholder answers
//! ("n/a", "no sé", "-", ...) become `None`, compared case-insensitively.
//! A diagnosis whose text is dropped is dropped entirely. Field values are
//! never logged here.

use medex_core::{Diagnosis, History, PhysicalExam, StructuredFields};

/// Placeholder values treated as absent.
pub const GARBAGE_VALUES: &[&str] = &[
    "no sé",
    "no se",
    "nose",
    "n/a",
    "na",
    "-",
    "--",
    "---",
    "sin datos",
    "ninguno",
    "ninguna",
    "no refiere",
    "no ref",
    "s/d",
    "sd",
    "sin información",
    "sin informacion",
    "no especificado",
    "no especifica",
    "no aplica",
    "no hay",
    "nada",
    "null",
    "none",
    "undefined",
    ".",
    "..",
    "...",
    "x",
    "xx",
    "xxx",
];

fn is_garbage(cleaned: &str) -> bool {
    let folded = cleaned.to_lowercase();
    GARBAGE_VALUES.iter().any(|g| *g == folded)
}

/// Sanitize one value. Blank and placeholder values become `None`.
pub fn sanitize_value(value: Option<&str>) -> Option<String> {
    let cleaned = value?.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() || is_garbage(&cleaned) {
        return None;
    }
    Some(cleaned)
}

fn clean(value: &Option<String>) -> Option<String> {
    sanitize_value(value.as_deref())
}

fn sanitize_history(history: &History) -> History {
    History {
        family: clean(&history.family),
        non_pathological: clean(&history.non_pathological),
        pathological: clean(&history.pathological),
    }
}

fn sanitize_physical_exam(exam: &PhysicalExam) -> PhysicalExam {
    PhysicalExam {
        vital_signs: clean(&exam.vital_signs),
        rhinoscopy: clean(&exam.rhinoscopy),
        oropharynx: clean(&exam.oropharynx),
        neck: clean(&exam.neck),
        laryngoscopy: clean(&exam.laryngoscopy),
        otoscopy: clean(&exam.otoscopy),
        otomicroscopy: clean(&exam.otomicroscopy),
        nasal_endoscopy: clean(&exam.nasal_endoscopy),
    }
}

/// The text is required; without it the whole diagnosis is dropped.
fn sanitize_diagnosis(diagnosis: Option<&Diagnosis>) -> Option<Diagnosis> {
    let diagnosis = diagnosis?;
    Some(Diagnosis {
        text: Some(clean(&diagnosis.text)?),
        certainty: diagnosis.certainty,
        icd10: clean(&diagnosis.icd10),
    })
}

/// Sanitize every field, recursing into nested sections. Empty sections
/// stay as empty objects.
pub fn sanitize_fields(fields: &StructuredFields) -> StructuredFields {
    StructuredFields {
        chief_complaint: clean(&fields.chief_complaint),
        present_illness: clean(&fields.present_illness),
        history: sanitize_history(&fields.history),
        physical_exam: sanitize_physical_exam(&fields.physical_exam),
        diagnosis: sanitize_diagnosis(fields.diagnosis.as_ref()),
        treatment_plan: clean(&fields.treatment_plan),
        prognosis: clean(&fields.prognosis),
        ordered_studies: clean(&fields.ordered_studies),
        additional_notes: clean(&fields.additional_notes),
    }
}
