//! Deterministic merge of per-chunk partial results.
//!
//! Each text field has a statically assigned [`MergeStrategy`]. The reducer
//! is a pure, order-sensitive fold: the same ordered input always produces
//! identical output. Disagreements are recorded as [`ConflictMarker`]s for a
//! later refinement stage and never block merging.
//!
//! Conflict markers carry field values and must never be logged; only their
//! count and paths may be.

use std::collections::HashSet;

use medex_core::defaults::REDUCE_SEPARATOR;
use medex_core::{Diagnosis, DiagnosisCertainty, StructuredFields};
use serde::Serialize;

use crate::sanitizer::sanitize_fields;

/// How the values of one field are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Keep every distinct value in first-seen order, joined by `" | "`.
    ConcatDedupe,
    /// First non-empty value wins.
    PreferFirst,
    /// Last non-empty value wins.
    PreferLast,
    /// Highest rank on a fixed vocabulary wins; ties keep the first.
    HighestCertainty,
}

/// Strategy per text field path. Paths match the camelCase wire names.
pub const FIELD_STRATEGIES: &[(&str, MergeStrategy)] = &[
    ("chiefComplaint", MergeStrategy::PreferFirst),
    ("presentIllness", MergeStrategy::ConcatDedupe),
    ("history.family", MergeStrategy::ConcatDedupe),
    ("history.nonPathological", MergeStrategy::ConcatDedupe),
    ("history.pathological", MergeStrategy::ConcatDedupe),
    ("physicalExam.vitalSigns", MergeStrategy::ConcatDedupe),
    ("physicalExam.rhinoscopy", MergeStrategy::ConcatDedupe),
    ("physicalExam.oropharynx", MergeStrategy::ConcatDedupe),
    ("physicalExam.neck", MergeStrategy::ConcatDedupe),
    ("physicalExam.laryngoscopy", MergeStrategy::ConcatDedupe),
    ("physicalExam.otoscopy", MergeStrategy::ConcatDedupe),
    ("physicalExam.otomicroscopy", MergeStrategy::ConcatDedupe),
    ("physicalExam.nasalEndoscopy", MergeStrategy::ConcatDedupe),
    ("diagnosis.text", MergeStrategy::ConcatDedupe),
    ("diagnosis.certainty", MergeStrategy::HighestCertainty),
    ("diagnosis.icd10", MergeStrategy::PreferLast),
    ("treatmentPlan", MergeStrategy::PreferLast),
    ("prognosis", MergeStrategy::PreferLast),
    ("orderedStudies", MergeStrategy::ConcatDedupe),
    ("additionalNotes", MergeStrategy::ConcatDedupe),
];

/// Strategy for a field path, `None` for unknown paths.
pub fn strategy_for(path: &str) -> Option<MergeStrategy> {
    FIELD_STRATEGIES
        .iter()
        .find(|(p, _)| *p == path)
        .map(|(_, s)| *s)
}

/// Record of chunks disagreeing on one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictMarker {
    pub field_path: String,
    pub values: Vec<String>,
    pub resolved_value: String,
}

/// Merged fields plus conflict metadata. Internal to the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntermediateResult {
    pub fields: StructuredFields,
    pub conflicts: Vec<ConflictMarker>,
    pub chunk_count: usize,
}

impl IntermediateResult {
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    pub fn conflict_paths(&self) -> Vec<&str> {
        self.conflicts.iter().map(|c| c.field_path.as_str()).collect()
    }

    /// Drop conflict data and return the sanitized merged fields.
    pub fn into_fields(self) -> StructuredFields {
        sanitize_fields(&self.fields)
    }
}

/// Reduce ordered per-chunk results into one.
pub fn reduce(results: &[StructuredFields]) -> IntermediateResult {
    match results {
        [] => IntermediateResult::default(),
        [single] => IntermediateResult {
            fields: single.clone(),
            conflicts: Vec::new(),
            chunk_count: 1,
        },
        _ => {
            let mut merged = StructuredFields::default();
            let mut conflicts = Vec::new();

            for (path, strategy) in FIELD_STRATEGIES {
                if *strategy == MergeStrategy::HighestCertainty {
                    continue;
                }
                let values: Vec<&str> = results
                    .iter()
                    .filter_map(|r| field_value(r, path))
                    .collect();
                let resolved = merge_strings(&values, *strategy);

                if let Some(marker) = detect_conflict(path, &values, resolved.as_deref()) {
                    conflicts.push(marker);
                }
                set_field(&mut merged, path, resolved);
            }

            merged.diagnosis = merge_diagnosis(results, merged.diagnosis.take());

            IntermediateResult {
                fields: merged,
                conflicts,
                chunk_count: results.len(),
            }
        }
    }
}

/// Trim + case-fold for comparison.
fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn non_empty<'a>(values: &[&'a str]) -> Vec<&'a str> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Merge text values with one strategy.
pub fn merge_strings(values: &[&str], strategy: MergeStrategy) -> Option<String> {
    let valid = non_empty(values);
    match strategy {
        MergeStrategy::PreferFirst => valid.first().map(|v| v.to_string()),
        MergeStrategy::PreferLast => valid.last().map(|v| v.to_string()),
        MergeStrategy::ConcatDedupe | MergeStrategy::HighestCertainty => concat_dedupe(&valid),
    }
}

/// Already-merged values are split on the separator first, so reducing a
/// merged value together with new inputs equals a single-pass reduction.
fn concat_dedupe(values: &[&str]) -> Option<String> {
    let mut seen = HashSet::new();
    let mut unique: Vec<&str> = Vec::new();

    for part in values
        .iter()
        .flat_map(|v| v.split(REDUCE_SEPARATOR))
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        if seen.insert(normalize(part)) {
            unique.push(part);
        }
    }

    (!unique.is_empty()).then(|| unique.join(REDUCE_SEPARATOR))
}

fn detect_conflict(path: &str, values: &[&str], resolved: Option<&str>) -> Option<ConflictMarker> {
    let valid = non_empty(values);
    if valid.len() < 2 {
        return None;
    }
    let distinct: HashSet<String> = valid.iter().map(|v| normalize(v)).collect();
    (distinct.len() > 1).then(|| ConflictMarker {
        field_path: path.to_string(),
        values: valid.iter().map(|v| v.to_string()).collect(),
        resolved_value: resolved.unwrap_or_default().to_string(),
    })
}

/// Diagnosis is kept only when its merged text is non-empty.
fn merge_diagnosis(results: &[StructuredFields], merged: Option<Diagnosis>) -> Option<Diagnosis> {
    let mut diagnosis = merged?;
    if diagnosis.text.as_deref().map_or(true, |t| t.trim().is_empty()) {
        return None;
    }
    diagnosis.certainty = highest_certainty(
        results
            .iter()
            .filter_map(|r| r.diagnosis.as_ref().and_then(|d| d.certainty)),
    );
    Some(diagnosis)
}

/// Highest-ranked label; ties keep the first seen.
pub fn highest_certainty(
    labels: impl IntoIterator<Item = DiagnosisCertainty>,
) -> Option<DiagnosisCertainty> {
    labels.into_iter().fold(None, |best, label| match best {
        Some(b) if b.rank() >= label.rank() => Some(b),
        _ => Some(label),
    })
}

fn field_value<'a>(fields: &'a StructuredFields, path: &str) -> Option<&'a str> {
    let slot = match path {
        "chiefComplaint" => &fields.chief_complaint,
        "presentIllness" => &fields.present_illness,
        "history.family" => &fields.history.family,
        "history.nonPathological" => &fields.history.non_pathological,
        "history.pathological" => &fields.history.pathological,
        "physicalExam.vitalSigns" => &fields.physical_exam.vital_signs,
        "physicalExam.rhinoscopy" => &fields.physical_exam.rhinoscopy,
        "physicalExam.oropharynx" => &fields.physical_exam.oropharynx,
        "physicalExam.neck" => &fields.physical_exam.neck,
        "physicalExam.laryngoscopy" => &fields.physical_exam.laryngoscopy,
        "physicalExam.otoscopy" => &fields.physical_exam.otoscopy,
        "physicalExam.otomicroscopy" => &fields.physical_exam.otomicroscopy,
        "physicalExam.nasalEndoscopy" => &fields.physical_exam.nasal_endoscopy,
        "diagnosis.text" => return fields.diagnosis.as_ref().and_then(|d| d.text.as_deref()),
        "diagnosis.icd10" => return fields.diagnosis.as_ref().and_then(|d| d.icd10.as_deref()),
        "treatmentPlan" => &fields.treatment_plan,
        "prognosis" => &fields.prognosis,
        "orderedStudies" => &fields.ordered_studies,
        "additionalNotes" => &fields.additional_notes,
        _ => return None,
    };
    slot.as_deref()
}

fn set_field(fields: &mut StructuredFields, path: &str, value: Option<String>) {
    let slot = match path {
        "chiefComplaint" => &mut fields.chief_complaint,
        "presentIllness" => &mut fields.present_illness,
        "history.family" => &mut fields.history.family,
        "history.nonPathological" => &mut fields.history.non_pathological,
        "history.pathological" => &mut fields.history.pathological,
        "physicalExam.vitalSigns" => &mut fields.physical_exam.vital_signs,
        "physicalExam.rhinoscopy" => &mut fields.physical_exam.rhinoscopy,
        "physicalExam.oropharynx" => &mut fields.physical_exam.oropharynx,
        "physicalExam.neck" => &mut fields.physical_exam.neck,
        "physicalExam.laryngoscopy" => &mut fields.physical_exam.laryngoscopy,
        "physicalExam.otoscopy" => &mut fields.physical_exam.otoscopy,
        "physicalExam.otomicroscopy" => &mut fields.physical_exam.otomicroscopy,
        "physicalExam.nasalEndoscopy" => &mut fields.physical_exam.nasal_endoscopy,
        "diagnosis.text" => &mut fields.diagnosis.get_or_insert_with(Diagnosis::default).text,
        "diagnosis.icd10" => &mut fields.diagnosis.get_or_insert_with(Diagnosis::default).icd10,
        "treatmentPlan" => &mut fields.treatment_plan,
        "prognosis" => &mut fields.prognosis,
        "orderedStudies" => &mut fields.ordered_studies,
        "additionalNotes" => &mut fields.additional_notes,
        _ => return,
    };
    *slot = value;
}
