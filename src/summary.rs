use std::collections::BTreeMap;

use crate::models::{AssessmentSummary, CleanedAssessmentTable, Subject, SubjectStats};

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Sample standard deviation; zero when fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    let Some(avg) = mean(values) else {
        return 0.0;
    };
    if values.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - avg).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Per-assessment aggregates handed to the insights generator. `None` when no
/// student has a weighted average.
pub fn summarize(table: &CleanedAssessmentTable) -> Option<AssessmentSummary> {
    let averages: Vec<f64> = table.rows.iter().filter_map(|r| r.weighted_average).collect();
    let mean_weighted_average = mean(&averages)?;

    let mut subjects = BTreeMap::new();
    for subject in Subject::ALL {
        let values: Vec<f64> = table
            .rows
            .iter()
            .filter_map(|r| r.subject_scores.get(&subject).copied())
            .collect();
        if let Some(m) = mean(&values) {
            subjects.insert(
                subject,
                SubjectStats {
                    mean: m,
                    std_dev: std_dev(&values),
                },
            );
        }
    }

    // Strict comparisons keep the first subject in report order on ties.
    let pick = |better: fn(f64, f64) -> bool, key: fn(&SubjectStats) -> f64| {
        let mut best: Option<(Subject, f64)> = None;
        for (subject, stats) in &subjects {
            let value = key(stats);
            if best.map_or(true, |(_, current)| better(value, current)) {
                best = Some((*subject, value));
            }
        }
        best.map(|(subject, _)| subject)
    };

    Some(AssessmentSummary {
        students: table.len(),
        mean_weighted_average,
        min_weighted_average: averages.iter().copied().fold(f64::INFINITY, f64::min),
        max_weighted_average: averages.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        best_subject: pick(|a, b| a > b, |s| s.mean),
        worst_subject: pick(|a, b| a < b, |s| s.mean),
        most_dispersed_subject: pick(|a, b| a > b, |s| s.std_dev),
        subjects,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StudentScores;

    fn student(name: &str, avg: Option<f64>, scores: [f64; 5]) -> StudentScores {
        StudentScores {
            identity: name.to_string(),
            grade: None,
            subject_scores: Subject::ALL.into_iter().zip(scores).collect(),
            weighted_average: avg,
            simple_average: None,
            standard_deviation: None,
            weighted_per_subject: None,
        }
    }

    #[test]
    fn aggregates_over_present_values() {
        let table = CleanedAssessmentTable {
            rows: vec![
                student("A", Some(300.0), [60.0, 50.0, 70.0, 65.0, 80.0]),
                student("B", Some(250.0), [50.0, 40.0, 70.0, 55.0, 60.0]),
                student("C", None, [55.0, 45.0, 70.0, 60.0, 75.0]),
            ],
        };
        let summary = summarize(&table).unwrap();
        assert_eq!(summary.students, 3);
        assert!((summary.mean_weighted_average - 275.0).abs() < 1e-9);
        assert_eq!(summary.min_weighted_average, 250.0);
        assert_eq!(summary.max_weighted_average, 300.0);
        assert_eq!(summary.best_subject, Some(Subject::Ingles));
        assert_eq!(summary.worst_subject, Some(Subject::Matematicas));
        assert_eq!(summary.most_dispersed_subject, Some(Subject::Ingles));
        let sociales = &summary.subjects[&Subject::SocialesCiudadanas];
        assert_eq!(sociales.mean, 70.0);
        assert_eq!(sociales.std_dev, 0.0);
        assert!((summary.subjects[&Subject::Matematicas].std_dev - 5.0).abs() < 1e-9);
    }

    #[test]
    fn nothing_to_summarize() {
        let table = CleanedAssessmentTable {
            rows: vec![student("A", None, [1.0; 5])],
        };
        assert!(summarize(&table).is_none());
    }

    #[test]
    fn std_dev_edges() {
        assert_eq!(std_dev(&[]), 0.0);
        assert_eq!(std_dev(&[42.0]), 0.0);
        assert!((std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]) - 2.138089935).abs() < 1e-6);
    }
}
