//! Runtime settings.
//!
//! Each value is resolved in priority order:
//! 1. Command-line flag
//! 2. Environment variable (read by clap)
//! 3. TOML config file
//! 4. Compiled default

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_DATA_ROOT: &str = "data";
pub const DEFAULT_MAX_UPLOAD_MB: u64 = 10;
pub const REGISTRY_FILE: &str = "simulacros.json";
pub const UPLOADS_DIR: &str = "uploads";

/// A historical round shipped with the installation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SeedAssessment {
    pub id: String,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    data_root: Option<PathBuf>,
    max_upload_mb: Option<u64>,
    #[serde(default)]
    seed: Vec<SeedAssessment>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_root: PathBuf,
    pub max_upload_mb: u64,
    pub seeds: Vec<SeedAssessment>,
}

pub fn default_seeds() -> Vec<SeedAssessment> {
    [
        ("helmer-pardo-1", "Helmer Pardo 1", "HELMER_PARDO1.csv"),
        ("helmer-pardo-2", "Helmer Pardo 2", "HELMER_PARDO2.csv"),
        ("avancemos", "AVANCEMOS", "PREPARATE.csv"),
    ]
    .into_iter()
    .map(|(id, name, path)| SeedAssessment {
        id: id.to_string(),
        name: name.to_string(),
        path: path.to_string(),
    })
    .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from(DEFAULT_DATA_ROOT),
            max_upload_mb: DEFAULT_MAX_UPLOAD_MB,
            seeds: default_seeds(),
        }
    }
}

impl Settings {
    /// Settings rooted at `data_root` with every other value defaulted.
    pub fn with_root(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            ..Self::default()
        }
    }

    /// Merges CLI/environment overrides over an optional TOML file.
    pub fn resolve(
        config_file: Option<&Path>,
        data_root: Option<PathBuf>,
        max_upload_mb: Option<u64>,
    ) -> Result<Self> {
        let file = match config_file {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                toml::from_str::<FileConfig>(&content)
                    .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
            }
            None => FileConfig::default(),
        };

        let mut settings = Settings::default();
        if let Some(root) = data_root.or(file.data_root) {
            settings.data_root = root;
        }
        if let Some(limit) = max_upload_mb.or(file.max_upload_mb) {
            settings.max_upload_mb = limit;
        }
        if !file.seed.is_empty() {
            settings.seeds = file.seed;
        }
        if settings.max_upload_mb == 0 {
            return Err(Error::Config("max_upload_mb must be positive".to_string()));
        }
        Ok(settings)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_root.join(REGISTRY_FILE)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_root.join(UPLOADS_DIR)
    }

    /// Upload limit in bytes, clamped for limits no address space can hold.
    pub fn max_upload_bytes(&self) -> usize {
        let bytes = self.max_upload_mb.saturating_mul(1024 * 1024);
        usize::try_from(bytes).unwrap_or(usize::MAX)
    }

    /// Registry paths are stored relative to the data root when possible.
    pub fn resolve_path(&self, stored: &str) -> PathBuf {
        let path = Path::new(stored);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let settings = Settings::resolve(None, None, None).unwrap();
        assert_eq!(settings.data_root, PathBuf::from("data"));
        assert_eq!(settings.max_upload_mb, 10);
        assert_eq!(settings.seeds.len(), 3);
        assert_eq!(settings.registry_path(), PathBuf::from("data/simulacros.json"));
    }

    #[test]
    fn file_values_lose_to_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "data_root = \"/srv/sim\"\nmax_upload_mb = 4\n\n[[seed]]\nid = \"s1\"\nname = \"S1\"\npath = \"s1.csv\""
        )
        .unwrap();

        let from_file = Settings::resolve(Some(file.path()), None, None).unwrap();
        assert_eq!(from_file.data_root, PathBuf::from("/srv/sim"));
        assert_eq!(from_file.max_upload_mb, 4);
        assert_eq!(from_file.seeds.len(), 1);

        let overridden =
            Settings::resolve(Some(file.path()), Some(PathBuf::from("/tmp/x")), Some(8)).unwrap();
        assert_eq!(overridden.data_root, PathBuf::from("/tmp/x"));
        assert_eq!(overridden.max_upload_mb, 8);
    }

    #[test]
    fn bad_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_upload_mb = \"lots\"").unwrap();
        assert!(matches!(
            Settings::resolve(Some(file.path()), None, None),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Settings::resolve(None, None, Some(0)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn huge_upload_limit_saturates() {
        let settings = Settings::resolve(None, None, Some(u64::MAX)).unwrap();
        assert_eq!(settings.max_upload_bytes(), usize::MAX);
        assert_eq!(Settings::default().max_upload_bytes(), 10 * 1024 * 1024);
    }

    #[test]
    fn relative_paths_resolve_under_root() {
        let settings = Settings::with_root("/srv/sim");
        assert_eq!(
            settings.resolve_path("uploads/a.csv"),
            PathBuf::from("/srv/sim/uploads/a.csv")
        );
        assert_eq!(settings.resolve_path("/abs/b.csv"), PathBuf::from("/abs/b.csv"));
    }
}
