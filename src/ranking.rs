use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::identity;
use crate::models::{ProjectedAssessment, RankingEntry, Subject, UnifiedStudentRecord, UnifiedTable};
use crate::schema;

/// Figure a ranking is sorted by.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    OverallWeightedAverage,
    OverallSubject(Subject),
    AssessmentAverage(String),
    AssessmentSubject(String, Subject),
}

impl Metric {
    /// Reads `overall`, a subject name, an assessment id, or `<id>:<subject>`.
    pub fn parse(value: &str) -> Metric {
        let value = value.trim();
        if value.eq_ignore_ascii_case("overall") {
            return Metric::OverallWeightedAverage;
        }
        if let Some(subject) = Subject::from_column(&schema::canonical_name(value)) {
            return Metric::OverallSubject(subject);
        }
        if let Some((id, column)) = value.split_once(':') {
            if let Some(subject) = Subject::from_column(&schema::canonical_name(column)) {
                return Metric::AssessmentSubject(id.trim().to_string(), subject);
            }
        }
        Metric::AssessmentAverage(value.to_string())
    }

    /// Assessment the metric reads from, if it is tied to one.
    pub fn assessment_id(&self) -> Option<&str> {
        match self {
            Metric::AssessmentAverage(id) | Metric::AssessmentSubject(id, _) => Some(id.as_str()),
            Metric::OverallWeightedAverage | Metric::OverallSubject(_) => None,
        }
    }

    /// Fails when the metric names an assessment the table does not hold,
    /// which is also what a mistyped subject parses to.
    pub fn check(&self, unified: &UnifiedTable) -> Result<()> {
        match self.assessment_id() {
            Some(id) if !unified.assessment_ids.iter().any(|known| known == id) => {
                Err(Error::UnknownAssessmentId(id.to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn value(&self, record: &UnifiedStudentRecord) -> Option<f64> {
        match self {
            Metric::OverallWeightedAverage => record.overall_weighted_average,
            Metric::OverallSubject(subject) => record.overall_subject_average.get(subject).copied(),
            Metric::AssessmentAverage(id) => {
                record.results.get(id).and_then(|r| r.weighted_average)
            }
            Metric::AssessmentSubject(id, subject) => record
                .results
                .get(id)
                .and_then(|r| r.subject_scores.get(subject).copied()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RankingQuery {
    pub metric: Metric,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    /// Grades to keep, compared as strings. Empty keeps every grade.
    pub grades: BTreeSet<String>,
    pub name_contains: Option<String>,
    /// Assessment ids whose columns are projected into each entry.
    pub include_assessments: Vec<String>,
}

impl Default for RankingQuery {
    fn default() -> Self {
        Self {
            metric: Metric::OverallWeightedAverage,
            min_value: None,
            max_value: None,
            grades: BTreeSet::new(),
            name_contains: None,
            include_assessments: Vec::new(),
        }
    }
}

impl RankingQuery {
    fn keeps(&self, record: &UnifiedStudentRecord, value: f64, needle: Option<&str>) -> bool {
        if self.min_value.is_some_and(|min| value < min) {
            return false;
        }
        if self.max_value.is_some_and(|max| value > max) {
            return false;
        }
        if !self.grades.is_empty() {
            match &record.grade {
                Some(grade) if self.grades.contains(grade) => {}
                _ => return false,
            }
        }
        match needle {
            Some(needle) => record.identity.contains(needle),
            None => true,
        }
    }
}

/// Sorts students descending by the query metric after filtering. Equal
/// values are ordered by identity so the result does not depend on the order
/// assessments were registered. Ranks run 1..=K with no shared places.
/// Students who took no assessment never rank.
pub fn rank(unified: &UnifiedTable, query: &RankingQuery) -> Vec<RankingEntry> {
    let needle = query
        .name_contains
        .as_deref()
        .map(identity::normalize)
        .filter(|n| !n.is_empty());

    let mut candidates: Vec<(&UnifiedStudentRecord, f64)> = unified
        .records
        .iter()
        .filter(|r| r.assessments_taken > 0)
        .filter_map(|r| query.metric.value(r).map(|v| (r, v)))
        .filter(|(r, v)| query.keeps(r, *v, needle.as_deref()))
        .collect();

    candidates.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.identity.cmp(&b.0.identity))
    });

    candidates
        .into_iter()
        .enumerate()
        .map(|(idx, (record, value))| RankingEntry {
            rank: idx + 1,
            identity: record.identity.clone(),
            grade: record.grade.clone(),
            metric_value: value,
            overall_weighted_average: record.overall_weighted_average,
            overall_subject_average: record.overall_subject_average.clone(),
            assessments: query
                .include_assessments
                .iter()
                .filter(|id| unified.assessment_ids.contains(*id))
                .map(|id| {
                    let result = record.results.get(id);
                    ProjectedAssessment {
                        assessment_id: id.clone(),
                        weighted_average: result.and_then(|r| r.weighted_average),
                        subject_scores: result
                            .map(|r| r.subject_scores.clone())
                            .unwrap_or_default(),
                    }
                })
                .collect(),
        })
        .collect()
}

/// First `k` entries of a ranking.
pub fn top(entries: &[RankingEntry], k: usize) -> &[RankingEntry] {
    &entries[..k.min(entries.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::consolidate;
    use crate::models::{CleanedAssessmentTable, StudentScores};
    use std::collections::BTreeMap;

    fn student(identity: &str, grade: &str, avg: Option<f64>) -> StudentScores {
        StudentScores {
            identity: identity.to_string(),
            grade: Some(grade.to_string()),
            subject_scores: BTreeMap::from([(Subject::Ingles, avg.unwrap_or(0.0) / 5.0)]),
            weighted_average: avg,
            simple_average: None,
            standard_deviation: None,
            weighted_per_subject: None,
        }
    }

    fn unified() -> UnifiedTable {
        let a = CleanedAssessmentTable {
            rows: vec![
                student("ANA RUIZ", "11", Some(250.0)),
                student("LUIS GOMEZ", "10", Some(310.0)),
                student("MARIA PEREZ", "11", Some(450.0)),
                student("SIN PUNTAJE", "11", None),
            ],
        };
        consolidate([("a", &a)])
    }

    fn identities(entries: &[RankingEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.identity.as_str()).collect()
    }

    #[test]
    fn range_filter_is_inclusive() {
        let query = RankingQuery {
            min_value: Some(300.0),
            max_value: Some(500.0),
            ..RankingQuery::default()
        };
        let entries = rank(&unified(), &query);
        assert_eq!(identities(&entries), vec!["MARIA PEREZ", "LUIS GOMEZ"]);
        assert_eq!(entries[0].rank, 1);
        assert_eq!(entries[1].rank, 2);

        let exact = RankingQuery {
            min_value: Some(310.0),
            max_value: Some(310.0),
            ..RankingQuery::default()
        };
        assert_eq!(identities(&rank(&unified(), &exact)), vec!["LUIS GOMEZ"]);
    }

    #[test]
    fn students_without_results_never_rank() {
        let entries = rank(&unified(), &RankingQuery::default());
        assert_eq!(entries.len(), 3);
        for pair in entries.windows(2) {
            assert!(pair[0].metric_value >= pair[1].metric_value);
        }
        let ranks: Vec<usize> = entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn ties_get_consecutive_ranks_by_identity() {
        let a = CleanedAssessmentTable {
            rows: vec![
                student("ZOE", "11", Some(300.0)),
                student("ADA", "11", Some(300.0)),
            ],
        };
        let entries = rank(&consolidate([("a", &a)]), &RankingQuery::default());
        assert_eq!(identities(&entries), vec!["ADA", "ZOE"]);
        assert_eq!(entries[1].rank, 2);
    }

    #[test]
    fn grade_and_name_filters() {
        let query = RankingQuery {
            grades: BTreeSet::from(["11".to_string()]),
            ..RankingQuery::default()
        };
        assert_eq!(identities(&rank(&unified(), &query)), vec!["MARIA PEREZ", "ANA RUIZ"]);

        let query = RankingQuery {
            name_contains: Some("pérez".to_string()),
            ..RankingQuery::default()
        };
        assert_eq!(identities(&rank(&unified(), &query)), vec!["MARIA PEREZ"]);
    }

    #[test]
    fn subject_metric_and_projection() {
        let query = RankingQuery {
            metric: Metric::parse("ingles"),
            include_assessments: vec!["a".to_string(), "unknown".to_string()],
            ..RankingQuery::default()
        };
        let entries = rank(&unified(), &query);
        assert_eq!(entries[0].metric_value, 90.0);
        assert_eq!(entries[0].assessments.len(), 1);
        assert_eq!(entries[0].assessments[0].weighted_average, Some(450.0));
    }

    #[test]
    fn metric_parsing() {
        assert_eq!(Metric::parse("overall"), Metric::OverallWeightedAverage);
        assert_eq!(
            Metric::parse("Matemáticas"),
            Metric::OverallSubject(Subject::Matematicas)
        );
        assert_eq!(
            Metric::parse("avancemos"),
            Metric::AssessmentAverage("avancemos".to_string())
        );
        assert_eq!(
            Metric::parse("avancemos:INGLES"),
            Metric::AssessmentSubject("avancemos".to_string(), Subject::Ingles)
        );
    }

    #[test]
    fn metric_on_unknown_assessment_is_reported() {
        let unified = unified();
        assert!(Metric::parse("overall").check(&unified).is_ok());
        assert!(Metric::parse("a:matematicas").check(&unified).is_ok());
        assert!(matches!(
            Metric::parse("matematicaz").check(&unified),
            Err(Error::UnknownAssessmentId(id)) if id == "matematicaz"
        ));
        assert!(matches!(
            Metric::parse("a:foo").check(&unified),
            Err(Error::UnknownAssessmentId(id)) if id == "a:foo"
        ));
        assert!(matches!(
            Metric::parse("b:ingles").check(&unified),
            Err(Error::UnknownAssessmentId(id)) if id == "b"
        ));
    }

    #[test]
    fn top_is_a_prefix() {
        let entries = rank(&unified(), &RankingQuery::default());
        assert_eq!(top(&entries, 2).len(), 2);
        assert_eq!(top(&entries, 30).len(), 3);
        assert_eq!(top(&entries, 1)[0].identity, "MARIA PEREZ");
    }
}
