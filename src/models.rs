use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five scored areas every assessment reports, in report column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Subject {
    #[serde(rename = "LECTURA CRÍTICA")]
    LecturaCritica,
    #[serde(rename = "MATEMÁTICAS")]
    Matematicas,
    #[serde(rename = "SOCIALES Y CIUDADANAS")]
    SocialesCiudadanas,
    #[serde(rename = "CIENCIAS NATURALES")]
    CienciasNaturales,
    #[serde(rename = "INGLÉS")]
    Ingles,
}

impl Subject {
    pub const ALL: [Subject; 5] = [
        Subject::LecturaCritica,
        Subject::Matematicas,
        Subject::SocialesCiudadanas,
        Subject::CienciasNaturales,
        Subject::Ingles,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Subject::LecturaCritica => "LECTURA CRÍTICA",
            Subject::Matematicas => "MATEMÁTICAS",
            Subject::SocialesCiudadanas => "SOCIALES Y CIUDADANAS",
            Subject::CienciasNaturales => "CIENCIAS NATURALES",
            Subject::Ingles => "INGLÉS",
        }
    }

    pub fn from_column(column: &str) -> Option<Subject> {
        Subject::ALL.into_iter().find(|s| s.column() == column)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// One student's row in one assessment after cleaning and numeric coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentScores {
    pub identity: String,
    pub grade: Option<String>,
    pub subject_scores: BTreeMap<Subject, f64>,
    pub weighted_average: Option<f64>,
    pub simple_average: Option<f64>,
    pub standard_deviation: Option<f64>,
    pub weighted_per_subject: Option<f64>,
}

/// Validated table for a single assessment. Identities are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanedAssessmentTable {
    pub rows: Vec<StudentScores>,
}

impl CleanedAssessmentTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    #[serde(rename = "semilla", alias = "seed")]
    Seed,
    #[default]
    #[serde(rename = "upload")]
    Upload,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentState {
    Processing,
    #[default]
    Ready,
    Failed,
    Missing,
}

impl fmt::Display for AssessmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AssessmentState::Processing => "processing",
            AssessmentState::Ready => "ready",
            AssessmentState::Failed => "failed",
            AssessmentState::Missing => "missing",
        };
        f.write_str(label)
    }
}

fn empty_insights() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Registry entry for one assessment round. Field names follow the persisted
/// document. Only `id`, `nombre` and `path` are mandatory; entries written by
/// older installs may lack the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: String,
    #[serde(rename = "nombre")]
    pub name: String,
    pub path: String,
    #[serde(rename = "origen", default)]
    pub origin: Origin,
    #[serde(rename = "estado", default)]
    pub state: AssessmentState,
    #[serde(rename = "creado_por", default)]
    pub created_by: String,
    #[serde(rename = "creado_en", default)]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "errores", default)]
    pub errors: Vec<String>,
    #[serde(default = "empty_insights")]
    pub insights: serde_json::Value,
}

/// What one student scored in one assessment of the unified view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssessmentResult {
    pub weighted_average: Option<f64>,
    pub subject_scores: BTreeMap<Subject, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnifiedStudentRecord {
    pub identity: String,
    pub grade: Option<String>,
    /// Keyed by assessment id; absent when the student missed that round.
    pub results: BTreeMap<String, AssessmentResult>,
    pub overall_weighted_average: Option<f64>,
    pub overall_subject_average: BTreeMap<Subject, f64>,
    pub assessments_taken: usize,
    pub best_assessment: Option<String>,
}

/// Every student across the ready assessments, rows in first-seen join order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnifiedTable {
    /// Assessment ids in join order.
    pub assessment_ids: Vec<String>,
    pub records: Vec<UnifiedStudentRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedAssessment {
    pub assessment_id: String,
    pub weighted_average: Option<f64>,
    pub subject_scores: BTreeMap<Subject, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingEntry {
    pub rank: usize,
    pub identity: String,
    pub grade: Option<String>,
    pub metric_value: f64,
    pub overall_weighted_average: Option<f64>,
    pub overall_subject_average: BTreeMap<Subject, f64>,
    pub assessments: Vec<ProjectedAssessment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Aggregate numbers an insights generator works from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentSummary {
    pub students: usize,
    pub mean_weighted_average: f64,
    pub min_weighted_average: f64,
    pub max_weighted_average: f64,
    pub subjects: BTreeMap<Subject, SubjectStats>,
    pub best_subject: Option<Subject>,
    pub worst_subject: Option<Subject>,
    pub most_dispersed_subject: Option<Subject>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEntry {
    pub identity: String,
    pub from: f64,
    pub to: f64,
    pub delta: f64,
}
