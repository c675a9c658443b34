//! Ingestion of uploaded rounds and fault-tolerant loading of the catalog.

use std::path::Path;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::cache::Memo;
use crate::cleaner;
use crate::config::{Settings, UPLOADS_DIR};
use crate::consolidate::consolidate;
use crate::error::{Error, Result};
use crate::models::{
    Assessment, AssessmentState, AssessmentSummary, CleanedAssessmentTable, UnifiedTable,
};
use crate::registry::{AssessmentUpdate, JsonFileStore, Registry, RegistryStore};
use crate::schema;
use crate::storage;
use crate::summary::summarize;
use crate::table;

/// Storage path recorded while an upload is between registration and write.
const PENDING_PATH: &str = "pendiente";
const CONSOLIDATE: &str = "consolidate";
const SUMMARY_KEY: &str = "resumen";

/// Result of an upload as shown to the person who made it.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub success: bool,
    pub message: String,
    pub assessment: Option<Assessment>,
}

#[derive(Debug, Clone)]
pub struct LoadedAssessment {
    pub assessment: Assessment,
    pub table: CleanedAssessmentTable,
}

/// Everything the catalog produced on one load: the registry entries after
/// state updates, the tables that loaded, and a line per broken source.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub assessments: Vec<Assessment>,
    pub loaded: Vec<LoadedAssessment>,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub report: LoadReport,
    pub unified: UnifiedTable,
}

/// Reads spreadsheet bytes all the way to a validated table.
pub fn prepare_table(bytes: &[u8]) -> Result<CleanedAssessmentTable> {
    let frame = cleaner::clean(table::parse_frame(bytes)?);
    schema::validate(&frame)
}

pub struct Pipeline<S: RegistryStore> {
    settings: Settings,
    registry: Registry<S>,
    memo: Memo<Rc<Snapshot>>,
}

impl Pipeline<JsonFileStore> {
    /// Pipeline over the JSON registry under the configured data root.
    pub fn open(settings: Settings) -> Self {
        let store = JsonFileStore::new(settings.registry_path());
        Self::new(settings, store)
    }
}

impl<S: RegistryStore> Pipeline<S> {
    pub fn new(settings: Settings, store: S) -> Self {
        let registry = Registry::new(store, settings.seeds.clone());
        Self {
            settings,
            registry,
            memo: Memo::new(),
        }
    }

    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn check_size(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.settings.max_upload_bytes() {
            return Err(Error::FileTooLarge {
                size_bytes: bytes.len(),
                limit_mb: self.settings.max_upload_mb,
            });
        }
        Ok(())
    }

    /// Writes the table under the assessment id and flips the entry to ready.
    fn store_table(&self, id: &str, table: &CleanedAssessmentTable) -> Result<Assessment> {
        let file_name = format!("{id}.csv");
        storage::write_table(&self.settings.uploads_dir().join(&file_name), table)?;
        let relative = format!("{UPLOADS_DIR}/{file_name}");

        let insights = match summarize(table) {
            Some(summary) => {
                let mut blob = serde_json::Map::new();
                blob.insert(SUMMARY_KEY.to_string(), serde_json::to_value(&summary)?);
                Some(serde_json::Value::Object(blob))
            }
            None => None,
        };
        self.registry.update(
            id,
            AssessmentUpdate {
                path: Some(relative),
                insights,
                ..AssessmentUpdate::default()
            },
        )?;
        self.registry.mark_state(id, AssessmentState::Ready, Vec::new())
    }

    fn invalidate(&mut self) {
        self.memo.invalidate();
        debug!(generation = self.memo.generation(), "aggregate cache invalidated");
    }

    /// Validates and stores a new round. Errors never escape: they come back
    /// as an unsuccessful outcome carrying every problem found.
    pub fn ingest(&mut self, name: &str, bytes: &[u8], uploaded_by: &str) -> IngestOutcome {
        let name = name.trim();
        if name.is_empty() {
            return IngestOutcome::rejected(&Error::BlankName, None);
        }
        if let Err(e) = self.check_size(bytes) {
            return IngestOutcome::rejected(&e, None);
        }
        let table = match prepare_table(bytes) {
            Ok(table) => table,
            Err(e) => {
                warn!(name, error = %e, "upload rejected");
                return IngestOutcome::rejected(&e, None);
            }
        };

        let registered = match self.registry.register(name, PENDING_PATH, uploaded_by) {
            Ok(assessment) => assessment,
            Err(e) => return IngestOutcome::rejected(&e, None),
        };

        match self.store_table(&registered.id, &table) {
            Ok(ready) => {
                self.invalidate();
                info!(id = %ready.id, students = table.len(), uploaded_by, "assessment ingested");
                IngestOutcome::accepted(ready)
            }
            Err(e) => {
                warn!(id = %registered.id, error = %e, "could not store assessment");
                let failed = self
                    .registry
                    .mark_state(&registered.id, AssessmentState::Failed, vec![e.to_string()])
                    .unwrap_or(registered);
                IngestOutcome::rejected(&e, Some(failed))
            }
        }
    }

    /// Replaces the stored table of an existing round. Its creation fields are
    /// kept; a file that does not validate marks the round failed.
    pub fn reingest(&mut self, id: &str, bytes: &[u8], uploaded_by: &str) -> IngestOutcome {
        let existing = match self.registry.get(id) {
            Ok(assessment) => assessment,
            Err(e) => return IngestOutcome::rejected(&e, None),
        };
        if let Err(e) = self.check_size(bytes) {
            return IngestOutcome::rejected(&e, Some(existing));
        }

        let result = prepare_table(bytes).and_then(|table| {
            let ready = self.store_table(id, &table)?;
            info!(id, students = table.len(), uploaded_by, "assessment re-ingested");
            Ok(ready)
        });
        match result {
            Ok(ready) => {
                self.invalidate();
                IngestOutcome::accepted(ready)
            }
            Err(e) => {
                let errors = match &e {
                    Error::Schema(errors) => errors.clone(),
                    other => vec![other.to_string()],
                };
                warn!(id, error = %e, "re-ingestion failed");
                let failed = self
                    .registry
                    .mark_state(id, AssessmentState::Failed, errors)
                    .unwrap_or(existing);
                self.invalidate();
                IngestOutcome::rejected(&e, Some(failed))
            }
        }
    }

    fn read_source(&self, path: &Path) -> Result<CleanedAssessmentTable> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SourceMissing(path.to_path_buf()))
            }
            Err(e) => return Err(Error::SourceFailed(e.to_string())),
        };
        prepare_table(&bytes)
    }

    fn set_state(&self, assessment: &mut Assessment, state: AssessmentState, errors: Vec<String>) {
        if assessment.state == state && assessment.errors == errors {
            return;
        }
        match self.registry.mark_state(&assessment.id, state, errors) {
            Ok(updated) => *assessment = updated,
            Err(e) => warn!(id = %assessment.id, error = %e, "could not record assessment state"),
        }
    }

    /// Loads every registered round. A round whose file is missing or broken
    /// is marked and skipped; the rest still load.
    pub fn load_all(&self) -> Result<LoadReport> {
        let mut report = LoadReport::default();

        for mut assessment in self.registry.list_all()? {
            let path = self.settings.resolve_path(&assessment.path);
            match self.read_source(&path) {
                Ok(table) => {
                    self.set_state(&mut assessment, AssessmentState::Ready, Vec::new());
                    debug!(id = %assessment.id, students = table.len(), "assessment loaded");
                    report.loaded.push(LoadedAssessment {
                        assessment: assessment.clone(),
                        table,
                    });
                }
                Err(Error::SourceMissing(missing)) => {
                    let message = format!("source file not found: {}", missing.display());
                    report
                        .diagnostics
                        .push(format!("{}: {message}", assessment.name));
                    self.set_state(&mut assessment, AssessmentState::Missing, vec![message]);
                }
                Err(Error::Schema(errors)) => {
                    report.diagnostics.extend(
                        errors
                            .iter()
                            .map(|e| format!("{}: {e}", assessment.name)),
                    );
                    self.set_state(&mut assessment, AssessmentState::Failed, errors);
                }
                Err(e) => {
                    report
                        .diagnostics
                        .push(format!("{}: error loading -> {e}", assessment.name));
                    self.set_state(&mut assessment, AssessmentState::Failed, vec![e.to_string()]);
                }
            }
            report.assessments.push(assessment);
        }

        if !report.diagnostics.is_empty() {
            warn!(broken = report.diagnostics.len(), "some assessments did not load");
        }
        Ok(report)
    }

    /// Loaded catalog plus its consolidation, memoized until the next
    /// successful ingestion.
    pub fn snapshot(&mut self) -> Result<Rc<Snapshot>> {
        if let Some(hit) = self.memo.get(CONSOLIDATE) {
            return Ok(hit);
        }
        let report = self.load_all()?;
        let unified = consolidate(
            report
                .loaded
                .iter()
                .map(|l| (l.assessment.id.as_str(), &l.table)),
        );
        info!(
            assessments = unified.assessment_ids.len(),
            students = unified.records.len(),
            "catalog consolidated"
        );
        let snapshot = Rc::new(Snapshot { report, unified });
        self.memo.insert(CONSOLIDATE, Rc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Aggregate summary of one round, served from the insights cache when
    /// present and stored there otherwise.
    pub fn summary(&mut self, id: &str) -> Result<AssessmentSummary> {
        let assessment = self.registry.get(id)?;
        if let Some(cached) = assessment.insights.get(SUMMARY_KEY) {
            if let Ok(summary) = serde_json::from_value::<AssessmentSummary>(cached.clone()) {
                return Ok(summary);
            }
        }

        let snapshot = self.snapshot()?;
        let loaded = snapshot
            .report
            .loaded
            .iter()
            .find(|l| l.assessment.id == id)
            .ok_or_else(|| Error::SourceFailed(format!("assessment '{id}' is not ready")))?;
        let summary = summarize(&loaded.table).ok_or_else(|| {
            Error::SourceFailed(format!("assessment '{id}' has no weighted averages"))
        })?;

        let mut blob = match assessment.insights {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        blob.insert(SUMMARY_KEY.to_string(), serde_json::to_value(&summary)?);
        self.registry
            .upsert_insights(id, serde_json::Value::Object(blob))?;
        Ok(summary)
    }
}

impl IngestOutcome {
    fn accepted(assessment: Assessment) -> Self {
        Self {
            success: true,
            message: format!("assessment '{}' loaded successfully", assessment.name),
            assessment: Some(assessment),
        }
    }

    fn rejected(error: &Error, assessment: Option<Assessment>) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            assessment,
        }
    }
}
