use std::fs::{OpenOptions, create_dir_all};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mintforge_core::ImageComposite;
use mintforge_generate::{GenerateOptions, GenerationReport, RunDescriptor};

use super::{RegistryError, RegistryResult};
use crate::workspace::write_json_atomic;

/// JSON config written to each run directory; enough to resume the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub catalog_path: PathBuf,
    pub project_id: String,
    pub collection_id: String,
    pub composite_group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trait_set_id: Option<String>,
    pub start_index: u64,
    pub end_index: u64,
    pub batch_size: u64,
    pub options: GenerateOptions,
}

impl RunConfig {
    pub fn descriptor(&self) -> RunDescriptor {
        RunDescriptor {
            project_id: self.project_id.clone(),
            collection_id: self.collection_id.clone(),
            composite_group_id: self.composite_group_id.clone(),
            trait_set_id: self.trait_set_id.clone(),
        }
    }
}

/// Paths for run artifacts.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub logs_path: PathBuf,
    pub composites_path: PathBuf,
    pub report_path: PathBuf,
}

impl RunPaths {
    fn new(root: PathBuf) -> Self {
        Self {
            config_path: root.join("config.json"),
            logs_path: root.join("logs.ndjson"),
            composites_path: root.join("composites.json"),
            report_path: root.join("generation_report.json"),
            root,
        }
    }
}

/// Persisted state of a run: every composite so far and the merged report.
#[derive(Debug, Clone)]
pub struct RunProgress {
    pub composites: Vec<ImageComposite>,
    pub report: Option<GenerationReport>,
}

impl RunProgress {
    /// First index no batch has covered yet.
    pub fn next_index(&self, config: &RunConfig) -> u64 {
        self.report
            .as_ref()
            .map(|report| report.end_index.clamp(config.start_index, config.end_index))
            .unwrap_or(config.start_index)
    }

    pub fn load(paths: &RunPaths) -> RegistryResult<Self> {
        let composites = read_json_if_exists(&paths.composites_path)?.unwrap_or_default();
        let report = read_json_if_exists(&paths.report_path)?;
        Ok(Self { composites, report })
    }

    pub fn save(&self, paths: &RunPaths) -> RegistryResult<()> {
        write_json_atomic(&paths.composites_path, &self.composites)?;
        if let Some(report) = &self.report {
            write_json_atomic(&paths.report_path, report)?;
        }
        Ok(())
    }
}

/// Create `{timestamp}__run_{id}` under `run_dir` and write its config.
pub fn start_run(run_dir: &Path, config: &RunConfig) -> RegistryResult<RunPaths> {
    let timestamp = config.started_at.format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let run_root = run_dir.join(format!("{timestamp}__run_{}", config.run_id));
    create_dir_all(&run_root)?;

    let paths = RunPaths::new(run_root);
    write_json_atomic(&paths.config_path, config)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.logs_path)?;

    Ok(paths)
}

/// Reopen an existing run directory.
pub fn open_run(run_root: &Path) -> RegistryResult<(RunPaths, RunConfig)> {
    let paths = RunPaths::new(run_root.to_path_buf());
    let config = read_json_if_exists(&paths.config_path)?.ok_or_else(|| {
        RegistryError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a run directory", run_root.display()),
        ))
    })?;
    Ok((paths, config))
}

fn read_json_if_exists<T: serde::de::DeserializeOwned>(path: &Path) -> RegistryResult<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
