//! Multi-assessment outer join keyed by canonical identity.

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::models::{
    AssessmentResult, CleanedAssessmentTable, Subject, UnifiedStudentRecord, UnifiedTable,
};
use crate::schema::{GRADE, STUDENT, WEIGHTED_AVERAGE};
use crate::summary::mean;

/// Column name for a per-assessment figure in flat exports.
pub fn qualified(assessment_id: &str, column: &str) -> String {
    format!("{column} [{assessment_id}]")
}

/// Folds the tables, in order, into one record per student. A student only
/// gets results for the assessments they appear in; aggregates skip the rest.
pub fn consolidate<'a, I>(tables: I) -> UnifiedTable
where
    I: IntoIterator<Item = (&'a str, &'a CleanedAssessmentTable)>,
{
    let mut unified = UnifiedTable::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (assessment_id, table) in tables {
        unified.assessment_ids.push(assessment_id.to_string());
        for row in &table.rows {
            let slot = *index.entry(row.identity.clone()).or_insert_with(|| {
                unified.records.push(UnifiedStudentRecord {
                    identity: row.identity.clone(),
                    grade: None,
                    results: BTreeMap::new(),
                    overall_weighted_average: None,
                    overall_subject_average: BTreeMap::new(),
                    assessments_taken: 0,
                    best_assessment: None,
                });
                unified.records.len() - 1
            });
            let record = &mut unified.records[slot];
            if record.grade.is_none() {
                record.grade = row.grade.clone();
            }
            record.results.insert(
                assessment_id.to_string(),
                AssessmentResult {
                    weighted_average: row.weighted_average,
                    subject_scores: row.subject_scores.clone(),
                },
            );
        }
    }

    for record in &mut unified.records {
        finalize(record, &unified.assessment_ids);
    }
    unified
}

fn finalize(record: &mut UnifiedStudentRecord, order: &[String]) {
    let present: Vec<(&String, &AssessmentResult)> = order
        .iter()
        .filter_map(|id| record.results.get(id).map(|r| (id, r)))
        .collect();

    let averages: Vec<f64> = present.iter().filter_map(|(_, r)| r.weighted_average).collect();
    record.overall_weighted_average = mean(&averages);
    record.assessments_taken = averages.len();

    record.overall_subject_average = Subject::ALL
        .iter()
        .filter_map(|subject| {
            let scores: Vec<f64> = present
                .iter()
                .filter_map(|(_, r)| r.subject_scores.get(subject).copied())
                .collect();
            mean(&scores).map(|m| (*subject, m))
        })
        .collect();

    let mut best: Option<(&String, f64)> = None;
    for (id, result) in &present {
        if let Some(avg) = result.weighted_average {
            if best.map_or(true, |(_, current)| avg > current) {
                best = Some((*id, avg));
            }
        }
    }
    record.best_assessment = best.map(|(id, _)| id.clone());
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Flat CSV dump of the unified table, one namespaced column per assessment
/// figure. Includes students with no weighted average anywhere.
pub fn to_csv_bytes(unified: &UnifiedTable) -> Result<Vec<u8>> {
    let mut header = vec![
        STUDENT.to_string(),
        GRADE.to_string(),
        "PROMEDIO PONDERADO GENERAL".to_string(),
        "SIMULACROS PRESENTADOS".to_string(),
        "MEJOR SIMULACRO".to_string(),
    ];
    for id in &unified.assessment_ids {
        header.push(qualified(id, WEIGHTED_AVERAGE));
        header.extend(Subject::ALL.iter().map(|s| qualified(id, s.column())));
    }
    header.extend(Subject::ALL.iter().map(|s| format!("{} GENERAL", s.column())));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&header)?;
    for record in &unified.records {
        let mut row = vec![
            record.identity.clone(),
            record.grade.clone().unwrap_or_default(),
            cell(record.overall_weighted_average),
            record.assessments_taken.to_string(),
            record.best_assessment.clone().unwrap_or_default(),
        ];
        for id in &unified.assessment_ids {
            let result = record.results.get(id);
            row.push(cell(result.and_then(|r| r.weighted_average)));
            row.extend(
                Subject::ALL
                    .iter()
                    .map(|s| cell(result.and_then(|r| r.subject_scores.get(s).copied()))),
            );
        }
        row.extend(
            Subject::ALL
                .iter()
                .map(|s| cell(record.overall_subject_average.get(s).copied())),
        );
        writer.write_record(&row)?;
    }
    writer.into_inner().map_err(|e| Error::Io(e.into_error()))
}
