//! Persistent catalog of assessment rounds.
//!
//! The whole catalog is one JSON document, read and rewritten on every
//! change. Writes carry the revision they were based on and fail with
//! `RegistryConflict` if the document moved underneath them.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SeedAssessment;
use crate::error::{Error, Result};
use crate::identity::fold_accents;
use crate::models::{Assessment, AssessmentState, Origin};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub simulacros: Vec<Assessment>,
}

pub trait RegistryStore {
    fn exists(&self) -> bool;
    fn read(&self) -> Result<RegistryDocument>;
    /// Persists `doc` as revision `doc.revision + 1`, provided the stored
    /// revision is still `doc.revision`.
    fn write(&self, doc: &RegistryDocument) -> Result<()>;
}

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// What is on disk at the registry path.
enum OnDisk {
    Absent,
    Parsed(RegistryDocument),
    Unreadable(String),
}

impl JsonFileStore {
    fn load(&self) -> Result<OnDisk> {
        if !self.path.exists() {
            return Ok(OnDisk::Absent);
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(match serde_json::from_str::<RegistryDocument>(&content) {
            Ok(doc) => OnDisk::Parsed(doc),
            Err(e) => OnDisk::Unreadable(e.to_string()),
        })
    }
}

impl RegistryStore for JsonFileStore {
    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn read(&self) -> Result<RegistryDocument> {
        match self.load()? {
            OnDisk::Absent => Ok(RegistryDocument::default()),
            OnDisk::Parsed(doc) => Ok(doc),
            OnDisk::Unreadable(reason) => {
                warn!(path = %self.path.display(), error = %reason, "registry unreadable, treating as empty");
                Ok(RegistryDocument::default())
            }
        }
    }

    /// Refuses to replace a file that does not parse, so ids it holds are
    /// never lost to a write based on the empty fallback.
    fn write(&self, doc: &RegistryDocument) -> Result<()> {
        let found = match self.load()? {
            OnDisk::Absent => 0,
            OnDisk::Parsed(stored) => stored.revision,
            OnDisk::Unreadable(reason) => {
                return Err(Error::RegistryUnreadable {
                    path: self.path.clone(),
                    reason,
                })
            }
        };
        if found != doc.revision {
            return Err(Error::RegistryConflict {
                expected: doc.revision,
                found,
            });
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let next = RegistryDocument {
            revision: doc.revision + 1,
            simulacros: doc.simulacros.clone(),
        };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&next)?)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(revision = next.revision, "registry written");
        Ok(())
    }
}

/// Registry kept in memory.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    doc: std::cell::RefCell<Option<RegistryDocument>>,
}

#[cfg(test)]
impl RegistryStore for MemoryStore {
    fn exists(&self) -> bool {
        self.doc.borrow().is_some()
    }

    fn read(&self) -> Result<RegistryDocument> {
        Ok(self.doc.borrow().clone().unwrap_or_default())
    }

    fn write(&self, doc: &RegistryDocument) -> Result<()> {
        let found = self.doc.borrow().as_ref().map_or(0, |d| d.revision);
        if found != doc.revision {
            return Err(Error::RegistryConflict {
                expected: doc.revision,
                found,
            });
        }
        *self.doc.borrow_mut() = Some(RegistryDocument {
            revision: doc.revision + 1,
            simulacros: doc.simulacros.clone(),
        });
        Ok(())
    }
}

/// Fields to overwrite on an existing entry. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct AssessmentUpdate {
    pub name: Option<String>,
    pub path: Option<String>,
    pub state: Option<AssessmentState>,
    pub errors: Option<Vec<String>>,
    pub insights: Option<serde_json::Value>,
}

pub fn slugify(value: &str) -> String {
    let folded = fold_accents(value).to_lowercase();
    let mut slug = String::with_capacity(folded.len());
    for c in folded.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "simulacro".to_string()
    } else {
        slug.to_string()
    }
}

fn next_unique_id(base: &str, existing: &[Assessment]) -> String {
    let taken = |candidate: &str| existing.iter().any(|a| a.id == candidate);
    let mut candidate = base.to_string();
    let mut counter = 2;
    while taken(&candidate) {
        candidate = format!("{base}-{counter}");
        counter += 1;
    }
    candidate
}

pub struct Registry<S: RegistryStore> {
    store: S,
    seeds: Vec<SeedAssessment>,
}

impl<S: RegistryStore> Registry<S> {
    pub fn new(store: S, seeds: Vec<SeedAssessment>) -> Self {
        Self { store, seeds }
    }

    fn seed_document(&self) -> RegistryDocument {
        let now = Utc::now();
        RegistryDocument {
            revision: 0,
            simulacros: self
                .seeds
                .iter()
                .map(|seed| Assessment {
                    id: seed.id.clone(),
                    name: seed.name.clone(),
                    path: seed.path.clone(),
                    origin: Origin::Seed,
                    state: AssessmentState::Ready,
                    created_by: "sistema".to_string(),
                    created_at: now,
                    errors: Vec::new(),
                    insights: serde_json::json!({}),
                })
                .collect(),
        }
    }

    /// Writes the seed catalog when no registry exists yet. An existing
    /// registry is returned untouched.
    pub fn bootstrap(&self) -> Result<Vec<Assessment>> {
        if self.store.exists() {
            return self.list_all();
        }
        let doc = self.seed_document();
        self.store.write(&doc)?;
        info!(seeds = doc.simulacros.len(), "registry bootstrapped");
        Ok(doc.simulacros)
    }

    fn load(&self) -> Result<RegistryDocument> {
        if !self.store.exists() {
            self.bootstrap()?;
        }
        self.store.read()
    }

    fn modify<T>(&self, f: impl FnOnce(&mut RegistryDocument) -> Result<T>) -> Result<T> {
        let mut doc = self.load()?;
        let out = f(&mut doc)?;
        self.store.write(&doc)?;
        Ok(out)
    }

    pub fn list_all(&self) -> Result<Vec<Assessment>> {
        Ok(self.load()?.simulacros)
    }

    pub fn get(&self, id: &str) -> Result<Assessment> {
        self.load()?
            .simulacros
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| Error::UnknownAssessmentId(id.to_string()))
    }

    pub fn register(&self, name: &str, path: &str, created_by: &str) -> Result<Assessment> {
        self.modify(|doc| {
            let id = next_unique_id(&slugify(name), &doc.simulacros);
            let assessment = Assessment {
                id,
                name: name.trim().to_string(),
                path: path.to_string(),
                origin: Origin::Upload,
                state: AssessmentState::Processing,
                created_by: created_by.to_string(),
                created_at: Utc::now(),
                errors: Vec::new(),
                insights: serde_json::json!({}),
            };
            doc.simulacros.push(assessment.clone());
            info!(id = %assessment.id, "assessment registered");
            Ok(assessment)
        })
    }

    pub fn update(&self, id: &str, update: AssessmentUpdate) -> Result<Assessment> {
        self.modify(|doc| {
            let entry = doc
                .simulacros
                .iter_mut()
                .find(|a| a.id == id)
                .ok_or_else(|| Error::UnknownAssessmentId(id.to_string()))?;
            if let Some(name) = update.name {
                entry.name = name;
            }
            if let Some(path) = update.path {
                entry.path = path;
            }
            if let Some(state) = update.state {
                entry.state = state;
            }
            if let Some(errors) = update.errors {
                entry.errors = errors;
            }
            if let Some(insights) = update.insights {
                entry.insights = insights;
            }
            Ok(entry.clone())
        })
    }

    pub fn mark_state(
        &self,
        id: &str,
        state: AssessmentState,
        errors: Vec<String>,
    ) -> Result<Assessment> {
        debug!(id, %state, "marking assessment state");
        self.update(
            id,
            AssessmentUpdate {
                state: Some(state),
                errors: Some(errors),
                ..AssessmentUpdate::default()
            },
        )
    }

    pub fn upsert_insights(&self, id: &str, insights: serde_json::Value) -> Result<Assessment> {
        self.update(
            id,
            AssessmentUpdate {
                insights: Some(insights),
                ..AssessmentUpdate::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_seeds;

    fn memory_registry() -> Registry<MemoryStore> {
        Registry::new(MemoryStore::default(), default_seeds())
    }

    #[test]
    fn slug_folds_accents_and_punctuation() {
        assert_eq!(slugify("Matemáticas 1"), "matematicas-1");
        assert_eq!(slugify("  Helmer Pardo #2 "), "helmer-pardo-2");
        assert_eq!(slugify("¡¡!!"), "simulacro");
    }

    #[test]
    fn bootstrap_seeds_once() {
        let registry = memory_registry();
        let seeded = registry.bootstrap().unwrap();
        assert_eq!(seeded.len(), 3);
        assert!(seeded.iter().all(|a| a.state == AssessmentState::Ready));
        assert!(seeded.iter().all(|a| a.origin == Origin::Seed));

        registry.register("Nuevo", "pendiente", "ana").unwrap();
        let again = registry.bootstrap().unwrap();
        assert_eq!(again.len(), 4);
    }

    #[test]
    fn colliding_names_get_numeric_suffix() {
        let registry = memory_registry();
        let a = registry.register("Simulacro Mayo", "p", "ana").unwrap();
        let b = registry.register("Simulacro  mayo!", "p", "ana").unwrap();
        let c = registry.register("simulacro-mayo", "p", "ana").unwrap();
        assert_eq!(a.id, "simulacro-mayo");
        assert_eq!(b.id, "simulacro-mayo-2");
        assert_eq!(c.id, "simulacro-mayo-3");
        assert_eq!(a.state, AssessmentState::Processing);
        assert_eq!(a.origin, Origin::Upload);
    }

    #[test]
    fn seed_ids_count_as_taken() {
        let registry = memory_registry();
        let a = registry.register("Avancemos", "p", "ana").unwrap();
        assert_eq!(a.id, "avancemos-2");
    }

    #[test]
    fn mark_state_records_errors() {
        let registry = memory_registry();
        let a = registry.register("Junio", "p", "ana").unwrap();
        let failed = registry
            .mark_state(&a.id, AssessmentState::Failed, vec!["bad".into()])
            .unwrap();
        assert_eq!(failed.state, AssessmentState::Failed);
        assert_eq!(failed.errors, vec!["bad".to_string()]);
        assert_eq!(failed.created_at, a.created_at);
        assert_eq!(registry.get(&a.id).unwrap(), failed);
    }

    #[test]
    fn unknown_id_is_reported() {
        let registry = memory_registry();
        assert!(matches!(
            registry.mark_state("nope", AssessmentState::Ready, vec![]),
            Err(Error::UnknownAssessmentId(id)) if id == "nope"
        ));
        assert!(matches!(registry.get("nope"), Err(Error::UnknownAssessmentId(_))));
    }

    #[test]
    fn stale_revision_is_rejected() {
        let store = MemoryStore::default();
        store.write(&RegistryDocument::default()).unwrap();
        let stale = RegistryDocument::default();
        assert!(matches!(
            store.write(&stale),
            Err(Error::RegistryConflict { expected: 0, found: 1 })
        ));
    }

    #[test]
    fn json_file_round_trip_uses_spanish_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simulacros.json");
        let registry = Registry::new(JsonFileStore::new(&path), default_seeds());
        registry.bootstrap().unwrap();
        let a = registry.register("Prueba Ñandú", "uploads/x.csv", "profe").unwrap();
        registry
            .upsert_insights(&a.id, serde_json::json!({"resumen": {"students": 3}}))
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entries = value["simulacros"].as_array().unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0]["origen"], "semilla");
        assert_eq!(entries[3]["nombre"], "Prueba Ñandú");
        assert_eq!(entries[3]["estado"], "processing");
        assert_eq!(entries[3]["creado_por"], "profe");
        assert_eq!(entries[3]["insights"]["resumen"]["students"], 3);
        assert_eq!(value["revision"], 3);

        let reopened = Registry::new(JsonFileStore::new(&path), Vec::new());
        assert_eq!(reopened.list_all().unwrap().len(), 4);
    }

    #[test]
    fn corrupt_file_reads_as_empty_but_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simulacros.json");
        std::fs::write(&path, "{ not json").unwrap();
        let registry = Registry::new(JsonFileStore::new(&path), default_seeds());
        assert!(registry.list_all().unwrap().is_empty());
        assert!(registry.bootstrap().unwrap().is_empty());

        assert!(matches!(
            registry.register("Junio", "p", "ana"),
            Err(Error::RegistryUnreadable { .. })
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn entries_with_missing_fields_survive_a_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simulacros.json");
        let legacy = serde_json::json!({
            "simulacros": [
                {
                    "id": "helmer-pardo-1",
                    "nombre": "Helmer Pardo 1",
                    "path": "HELMER_PARDO1.csv",
                    "origen": "semilla",
                    "estado": "ready",
                    "creado_por": "sistema",
                    "creado_en": "2024-05-01T10:00:00Z"
                },
                {
                    "id": "mayo",
                    "nombre": "Mayo",
                    "path": "uploads/mayo.csv"
                }
            ]
        });
        std::fs::write(&path, legacy.to_string()).unwrap();

        let registry = Registry::new(JsonFileStore::new(&path), default_seeds());
        let mayo = registry.get("mayo").unwrap();
        assert_eq!(mayo.created_by, "");
        assert_eq!(mayo.origin, Origin::Upload);
        assert_eq!(mayo.state, AssessmentState::Ready);

        registry.register("Junio", "p", "ana").unwrap();

        let reopened = Registry::new(JsonFileStore::new(&path), Vec::new());
        let ids: Vec<String> = reopened.list_all().unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["helmer-pardo-1", "mayo", "junio"]);
    }

    #[test]
    fn stale_revision_is_rejected_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simulacros.json");
        let store = JsonFileStore::new(&path);
        store.write(&RegistryDocument::default()).unwrap();
        store.write(&store.read().unwrap()).unwrap();

        let stale = RegistryDocument {
            revision: 1,
            simulacros: Vec::new(),
        };
        assert!(matches!(
            store.write(&stale),
            Err(Error::RegistryConflict { expected: 1, found: 2 })
        ));
        assert_eq!(store.read().unwrap().revision, 2);
    }
}
