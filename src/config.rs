use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// All fields have defaults; the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Directory for pipeline artifacts (overrides XDG default).
    pub artifacts_dir: Option<PathBuf>,
    /// Number of parallel workers for the similarity scan. 0 = auto-detect.
    pub workers: usize,
    /// Similarity graph settings.
    pub graph: GraphConfig,
    /// Embedding model training settings.
    pub training: TrainingConfig,
    /// Dataset import settings.
    pub import: ImportConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Minimum cosine similarity for an edge.
    pub threshold: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            threshold: crate::graph::DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub learning_rate: f32,
    /// Weight init seed. Unset = fresh entropy every run.
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: crate::model::DEFAULT_EPOCHS,
            learning_rate: crate::model::DEFAULT_LEARNING_RATE,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Maximum number of tracks kept after import. 0 = keep everything.
    pub limit: usize,
    /// Seed for the down-sampling step.
    pub seed: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            limit: crate::dataset::DEFAULT_LIMIT,
            seed: crate::dataset::DEFAULT_SEED,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/tunegraph/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Parse a TOML document into a config, defaulting every missing field.
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("tunegraph.db")
    } else {
        // Fallback: current directory
        PathBuf::from("tunegraph.db")
    }
}

/// Resolve the default artifacts directory under the XDG data directory.
pub fn default_artifacts_dir() -> PathBuf {
    ProjectDirs::from("", "", crate::APP_NAME)
        .map(|dirs| dirs.data_dir().join("artifacts"))
        .unwrap_or_else(|| PathBuf::from("artifacts"))
}
