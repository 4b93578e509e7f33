//! Configuration system for stagerun.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. The user file
//! lives in the platform config directory (`~/.config/stagerun/config.toml`
//! on Linux) and the workspace file at `.stagerun/config.toml`.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::{CheckpointStore, ReplayEngine};
use crate::error::{ConfigError, EngineError};
use crate::workflow::mode::{DEFAULT_TEST_MODE_ITERATIONS, ExperimentOptions, RunOptions};
use crate::workflow::parser::{default_pipeline, load_pipeline};
use crate::workflow::pipeline::Pipeline;

/// Top-level configuration for an experiment run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub run: RunOptions,
    pub pipeline: PipelineSource,
    pub engine: EngineConfig,
    pub limits: LimitsConfig,
    pub output: OutputConfig,
}

/// Where the pipeline definition comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSource {
    /// YAML definition file. The built-in pipeline is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Settings for the bundled replay engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// JSON-lines record file. Synthetic records are generated when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<PathBuf>,
    /// Number of synthetic records when no record file is configured.
    pub synthetic_records: usize,
    /// Directory holding checkpoint snapshots and their manifest.
    pub checkpoint_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            records: None,
            synthetic_records: 2000,
            checkpoint_dir: PathBuf::from(".stagerun").join("checkpoints"),
        }
    }
}

/// Safety limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Per-step iteration cap applied in test mode.
    pub test_mode_iterations: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            test_mode_iterations: DEFAULT_TEST_MODE_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write the experiment results here as JSON once the run finishes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_path: Option<PathBuf>,
}

impl ExperimentConfig {
    /// Validate the run options and turn them into orchestrator options.
    pub fn experiment_options(&self) -> Result<ExperimentOptions, ConfigError> {
        ExperimentOptions::from_run_options(&self.run, self.limits.test_mode_iterations)
    }

    /// Make every relative path in the configuration relative to `workspace`.
    pub fn resolve_paths(&mut self, workspace: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = workspace.join(&*p);
            }
        };
        if let Some(file) = self.pipeline.file.as_mut() {
            resolve(file);
        }
        if let Some(records) = self.engine.records.as_mut() {
            resolve(records);
        }
        resolve(&mut self.engine.checkpoint_dir);
        if let Some(results) = self.output.results_path.as_mut() {
            resolve(results);
        }
    }
}

impl PipelineSource {
    /// Load and validate the configured pipeline.
    pub fn load(&self) -> Result<Pipeline, ConfigError> {
        let def = match &self.file {
            Some(path) => load_pipeline(path)?,
            None => default_pipeline()?,
        };
        Ok(def.into_pipeline())
    }
}

impl EngineConfig {
    pub fn checkpoint_store(&self) -> CheckpointStore {
        CheckpointStore::new(&self.checkpoint_dir)
    }

    /// Open the replay engine over the configured records.
    pub fn open_engine(&self) -> Result<ReplayEngine, EngineError> {
        let engine = match &self.records {
            Some(path) => ReplayEngine::from_json_lines(path)?,
            None => ReplayEngine::synthetic(self.synthetic_records),
        };
        Ok(engine.with_store(self.checkpoint_store()))
    }
}

/// Load configuration from all layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ExperimentConfig>,
) -> Result<ExperimentConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(ExperimentConfig::default()));

    // User-level config
    if let Some(dirs) = directories::ProjectDirs::from("dev", "stagerun", "stagerun") {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(".stagerun").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (STAGERUN_RUN__TEST_MODE, STAGERUN_ENGINE__RECORDS, etc.)
    figment = figment.merge(Env::prefixed("STAGERUN_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any stagerun configuration file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    let user = directories::ProjectDirs::from("dev", "stagerun", "stagerun")
        .is_some_and(|d| d.config_dir().join("config.toml").exists());
    user || workspace.is_some_and(|ws| ws.join(".stagerun").join("config.toml").exists())
}
