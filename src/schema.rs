//! Column vocabulary, header canonicalization and schema validation.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;

use crate::error::{Error, Result};
use crate::identity::fold_accents;
use crate::models::{CleanedAssessmentTable, StudentScores, Subject};
use crate::table::Frame;

pub const STUDENT: &str = "ESTUDIANTE";
pub const GRADE: &str = "GRADO";
pub const SIMPLE_AVERAGE: &str = "PROMEDIO SIMPLE";
pub const WEIGHTED_AVERAGE: &str = "PROMEDIO PONDERADO";
pub const STANDARD_DEVIATION: &str = "DESVIACIÓN ESTÁNDAR";
pub const WEIGHTED_PER_SUBJECT: &str = "PP POR MATERIA";

/// Header spellings seen in exports, mapped to the canonical column.
/// Keys are compared after `fold_key`, so accent and case variants of an
/// entry need not be listed.
const SYNONYMS: &[(&str, &str)] = &[
    ("estudiante", STUDENT),
    ("nombre", STUDENT),
    ("nombre estudiante", STUDENT),
    ("grado", GRADE),
    ("curso", GRADE),
    ("lectura critica", "LECTURA CRÍTICA"),
    ("lectura", "LECTURA CRÍTICA"),
    ("matematicas", "MATEMÁTICAS"),
    ("matematica", "MATEMÁTICAS"),
    ("sociales y ciudadanas", "SOCIALES Y CIUDADANAS"),
    ("sociales", "SOCIALES Y CIUDADANAS"),
    ("ciencias naturales", "CIENCIAS NATURALES"),
    ("ciencias", "CIENCIAS NATURALES"),
    ("ingles", "INGLÉS"),
    ("promedio simple", SIMPLE_AVERAGE),
    ("promedio ponderado", WEIGHTED_AVERAGE),
    ("desv. estandar", STANDARD_DEVIATION),
    ("desv estandar", STANDARD_DEVIATION),
    ("desviacion estandar", STANDARD_DEVIATION),
    ("pp por materia", WEIGHTED_PER_SUBJECT),
];

/// Numeric columns that are coerced when present but never required.
pub const OPTIONAL_NUMERIC: [&str; 3] = [SIMPLE_AVERAGE, STANDARD_DEVIATION, WEIGHTED_PER_SUBJECT];

static SYNONYM_MAP: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    SYNONYMS
        .iter()
        .map(|(synonym, canonical)| (fold_key(synonym), *canonical))
        .collect()
});

/// Columns a file must carry, in the order they are reported.
pub fn required_columns() -> Vec<&'static str> {
    let mut columns = vec![STUDENT, WEIGHTED_AVERAGE];
    columns.extend(Subject::ALL.iter().map(|s| s.column()));
    columns
}

fn fold_key(header: &str) -> String {
    fold_accents(header.trim_start_matches('\u{feff}'))
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical name for a raw header. Unknown headers come back trimmed.
pub fn canonical_name(header: &str) -> String {
    match SYNONYM_MAP.get(&fold_key(header)) {
        Some(canonical) => (*canonical).to_string(),
        None => header.trim_start_matches('\u{feff}').trim().to_string(),
    }
}

pub fn canonicalize_columns(mut frame: Frame) -> Frame {
    frame.columns = frame.columns.iter().map(|c| canonical_name(c)).collect();
    frame
}

/// Fails when two synonyms fold to the same key but name different columns.
pub fn check_synonyms() -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for (synonym, canonical) in SYNONYMS {
        let key = fold_key(synonym);
        if let Some(previous) = seen.insert(key.clone(), canonical) {
            if previous != *canonical {
                return Err(Error::Config(format!(
                    "column synonym '{key}' maps to both '{previous}' and '{canonical}'"
                )));
            }
        }
    }
    Ok(())
}

/// Parses a cell the way a lenient spreadsheet reader would: blank, text and
/// non-finite values are missing.
pub fn coerce_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Checks a cleaned frame and, when it is acceptable, returns the typed
/// table. All problems are collected before returning.
pub fn validate(frame: &Frame) -> Result<CleanedAssessmentTable> {
    let mut errors = Vec::new();

    for column in required_columns() {
        if frame.column_index(column).is_none() {
            errors.push(format!("missing required column '{column}'"));
        }
    }

    let numeric: Vec<&str> = required_columns()
        .into_iter()
        .filter(|c| *c != STUDENT)
        .chain(OPTIONAL_NUMERIC)
        .collect();

    let mut coerced: HashMap<&str, Vec<Option<f64>>> = HashMap::new();
    for column in numeric {
        let Some(idx) = frame.column_index(column) else {
            continue;
        };
        let values: Vec<Option<f64>> = (0..frame.rows.len())
            .map(|row| coerce_number(frame.cell(row, idx)))
            .collect();
        if values.iter().all(Option::is_none) {
            errors.push(format!("column '{column}' contains no valid numeric values"));
        }
        coerced.insert(column, values);
    }

    if !errors.is_empty() {
        return Err(Error::Schema(errors));
    }

    let Some(student_idx) = frame.column_index(STUDENT) else {
        return Err(Error::Schema(vec![format!("missing required column '{STUDENT}'")]));
    };
    let grade_idx = frame.column_index(GRADE);
    let value = |column: &str, row: usize| -> Option<f64> {
        coerced.get(column).and_then(|values| values[row])
    };

    let rows = (0..frame.rows.len())
        .map(|row| {
            let subject_scores: BTreeMap<Subject, f64> = Subject::ALL
                .iter()
                .filter_map(|s| value(s.column(), row).map(|v| (*s, v)))
                .collect();
            StudentScores {
                identity: frame.cell(row, student_idx).to_string(),
                grade: grade_idx
                    .map(|idx| frame.cell(row, idx).trim().to_string())
                    .filter(|g| !g.is_empty()),
                subject_scores,
                weighted_average: value(WEIGHTED_AVERAGE, row),
                simple_average: value(SIMPLE_AVERAGE, row),
                standard_deviation: value(STANDARD_DEVIATION, row),
                weighted_per_subject: value(WEIGHTED_PER_SUBJECT, row),
            }
        })
        .collect();

    Ok(CleanedAssessmentTable { rows })
}

/// Error list form of `validate`, for callers that only need the verdict.
pub fn schema_errors(frame: &Frame) -> Vec<String> {
    match validate(frame) {
        Ok(_) => Vec::new(),
        Err(Error::Schema(errors)) => errors,
        Err(other) => vec![other.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(columns: &[&str], rows: &[&[&str]]) -> Frame {
        Frame {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    const FULL: [&str; 8] = [
        "ESTUDIANTE",
        "GRADO",
        "LECTURA CRÍTICA",
        "MATEMÁTICAS",
        "SOCIALES Y CIUDADANAS",
        "CIENCIAS NATURALES",
        "INGLÉS",
        "PROMEDIO PONDERADO",
    ];

    #[test]
    fn synonyms_are_unambiguous() {
        assert!(check_synonyms().is_ok());
    }

    #[test]
    fn headers_fold_accents_and_case() {
        assert_eq!(canonical_name("Matematicas"), "MATEMÁTICAS");
        assert_eq!(canonical_name("  INGLES "), "INGLÉS");
        assert_eq!(canonical_name("Lectura  Crítica"), "LECTURA CRÍTICA");
        assert_eq!(canonical_name("Desv. Estandar"), "DESVIACIÓN ESTÁNDAR");
        assert_eq!(canonical_name("\u{feff}estudiante"), "ESTUDIANTE");
    }

    #[test]
    fn unknown_headers_pass_through_trimmed() {
        assert_eq!(canonical_name("  Observaciones "), "Observaciones");
        let f = canonicalize_columns(frame(&["estudiante", " Puesto "], &[]));
        assert_eq!(f.columns, vec!["ESTUDIANTE", "Puesto"]);
    }

    #[test]
    fn missing_column_is_named() {
        let mut columns: Vec<&str> = FULL[..6].to_vec();
        columns.push("PROMEDIO PONDERADO");
        let f = frame(&columns, &[&["ANA", "11", "60", "61", "62", "63", "310"]]);
        let errors = schema_errors(&f);
        assert_eq!(errors, vec!["missing required column 'INGLÉS'".to_string()]);
        assert_eq!(schema_errors(&frame(&FULL[..7], &[])).len(), 1 + 5);
    }

    #[test]
    fn all_problems_reported_together() {
        let f = frame(
            &["ESTUDIANTE", "MATEMÁTICAS", "PROMEDIO PONDERADO"],
            &[&["ANA", "x", "300"], &["LUIS", "", "280"]],
        );
        let errors = schema_errors(&f);
        assert!(errors.contains(&"missing required column 'LECTURA CRÍTICA'".to_string()));
        assert!(errors.contains(&"missing required column 'INGLÉS'".to_string()));
        assert!(errors
            .contains(&"column 'MATEMÁTICAS' contains no valid numeric values".to_string()));
        assert_eq!(errors.len(), 5);
    }

    #[test]
    fn bad_cells_become_missing() {
        let f = frame(
            &FULL,
            &[
                &["ANA", "11", "60", "61", "62", "63", "64", "310.5"],
                &["LUIS", "", "abc", "70", "71", "72", "73", "n/a"],
            ],
        );
        let table = validate(&f).expect("valid table");
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].weighted_average, Some(310.5));
        assert_eq!(table.rows[0].grade.as_deref(), Some("11"));
        assert_eq!(table.rows[1].weighted_average, None);
        assert_eq!(table.rows[1].grade, None);
        assert!(!table.rows[1].subject_scores.contains_key(&Subject::LecturaCritica));
        assert_eq!(table.rows[1].subject_scores[&Subject::Ingles], 73.0);
    }

    #[test]
    fn coerce_rejects_non_finite() {
        assert_eq!(coerce_number(" 42 "), Some(42.0));
        assert_eq!(coerce_number("NaN"), None);
        assert_eq!(coerce_number("inf"), None);
        assert_eq!(coerce_number(""), None);
    }
}
