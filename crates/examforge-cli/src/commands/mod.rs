//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use examforge_core::{AssessmentEngine, MemoryStore};
use examforge_providers::{build_registry, load_config_from, ExamforgeConfig};

pub mod ask;
pub mod init;
pub mod list_models;
pub mod parse;
pub mod predict;
pub mod session;
pub mod stats;
pub mod validate_config;

/// Options shared by every subcommand.
pub struct GlobalOpts {
    pub config: Option<PathBuf>,
    pub store: Option<PathBuf>,
    pub user: String,
}

impl GlobalOpts {
    pub fn load_config(&self) -> Result<ExamforgeConfig> {
        load_config_from(self.config.as_deref())
    }
}

/// A loaded config, its JSON store and the engine over both.
pub struct Workspace {
    pub config: ExamforgeConfig,
    pub engine: AssessmentEngine,
    store: Arc<MemoryStore>,
    store_path: PathBuf,
}

impl Workspace {
    pub fn open(opts: &GlobalOpts) -> Result<Self> {
        let config = opts.load_config()?;
        let registry = build_registry(&config)?;
        let store_path = opts
            .store
            .clone()
            .unwrap_or_else(|| config.store_path.clone());
        let store = Arc::new(MemoryStore::load_json(&store_path)?);

        let engine = AssessmentEngine::new(
            store.clone(),
            registry,
            config.assessment.clone(),
            config.engine_config(),
        );

        tracing::debug!(store = %store_path.display(), "workspace opened");
        Ok(Self {
            config,
            engine,
            store,
            store_path,
        })
    }

    /// Model to use when the caller did not name one.
    pub fn model_or_default(&self, model: Option<String>) -> String {
        model.unwrap_or_else(|| self.config.default_model.clone())
    }

    /// Write the store back to disk.
    pub fn save(&self) -> Result<()> {
        self.store
            .save_json(&self.store_path)
            .with_context(|| format!("failed to save store: {}", self.store_path.display()))
    }
}

/// Pretty-print a serializable value to stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
