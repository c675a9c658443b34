use std::path::Path;

use crate::error::{Error, Result};
use crate::models::{CleanedAssessmentTable, StudentScores, Subject};
use crate::schema::{
    GRADE, SIMPLE_AVERAGE, STANDARD_DEVIATION, STUDENT, WEIGHTED_AVERAGE, WEIGHTED_PER_SUBJECT,
};

type Extra = (&'static str, fn(&StudentScores) -> Option<f64>);

fn simple_average(r: &StudentScores) -> Option<f64> {
    r.simple_average
}

fn weighted_average(r: &StudentScores) -> Option<f64> {
    r.weighted_average
}

fn standard_deviation(r: &StudentScores) -> Option<f64> {
    r.standard_deviation
}

fn weighted_per_subject(r: &StudentScores) -> Option<f64> {
    r.weighted_per_subject
}

const EXTRAS: [Extra; 4] = [
    (SIMPLE_AVERAGE, simple_average),
    (WEIGHTED_AVERAGE, weighted_average),
    (STANDARD_DEVIATION, standard_deviation),
    (WEIGHTED_PER_SUBJECT, weighted_per_subject),
];

fn number(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Serializes a cleaned table as comma-separated text with the canonical
/// header on the first line. Optional columns nobody filled in are left out
/// so the file validates again when loaded.
pub fn to_csv_bytes(table: &CleanedAssessmentTable) -> Result<Vec<u8>> {
    let extras: Vec<&Extra> = EXTRAS
        .iter()
        .filter(|(column, get)| {
            *column == WEIGHTED_AVERAGE || table.rows.iter().any(|r| get(r).is_some())
        })
        .collect();

    let mut header = vec![STUDENT, GRADE];
    header.extend(Subject::ALL.iter().map(|s| s.column()));
    header.extend(extras.iter().map(|(column, _)| *column));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&header)?;
    for row in &table.rows {
        let mut record = vec![row.identity.clone(), row.grade.clone().unwrap_or_default()];
        record.extend(
            Subject::ALL
                .iter()
                .map(|s| number(row.subject_scores.get(s).copied())),
        );
        record.extend(extras.iter().map(|(_, get)| number(get(row))));
        writer.write_record(&record)?;
    }
    writer.into_inner().map_err(|e| Error::Io(e.into_error()))
}

pub fn write_table(path: &Path, table: &CleanedAssessmentTable) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, to_csv_bytes(table)?)?;
    Ok(())
}
