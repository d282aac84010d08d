//! Output directory management for nstat runs
//!
//! An output directory holds:
//! - the result document (JSON array of samples)
//! - a copy of the test configuration
//! - run metadata (JSON)
//!
//! Default directory format: nstat-{YYYYMMDD}-{HHMM}-{test_type}/

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::runner::RunSummary;

/// Metadata about one test run
#[derive(Debug, Serialize, Deserialize)]
pub struct RunMetadata {
    pub version: String,
    pub test_type: String,
    pub config_path: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_secs: Option<f64>,
    pub command_line: Vec<String>,
    pub hostname: String,
    pub points: Option<usize>,
    pub failed_points: Option<usize>,
    pub samples: Option<usize>,
    pub setup_ok: Option<bool>,
}

impl RunMetadata {
    pub fn new(test_type: String, config_path: String) -> Self {
        let version = env!("CARGO_PKG_VERSION").to_string();
        let start_time = Local::now().to_rfc3339();
        let hostname = hostname::get()
            .unwrap_or_else(|_| "unknown".into())
            .to_string_lossy()
            .to_string();
        let command_line = std::env::args().collect();

        Self {
            version,
            test_type,
            config_path,
            start_time,
            end_time: None,
            duration_secs: None,
            command_line,
            hostname,
            points: None,
            failed_points: None,
            samples: None,
            setup_ok: None,
        }
    }

    pub fn finalize(&mut self, duration_secs: f64, summary: &RunSummary) {
        self.end_time = Some(Local::now().to_rfc3339());
        self.duration_secs = Some(duration_secs);
        self.points = Some(summary.points);
        self.failed_points = Some(summary.failed_points);
        self.samples = Some(summary.samples);
        self.setup_ok = Some(summary.setup_ok);
    }
}

/// Output directory manager
pub struct ResultsDir {
    path: PathBuf,
    metadata: RunMetadata,
}

impl ResultsDir {
    /// Create the output directory and copy the config into it.
    ///
    /// `dir` is used as-is when given, otherwise a timestamped directory is
    /// created under the current directory.
    pub fn create(config_path: &Path, test_type: &str, dir: Option<&Path>) -> Result<Self> {
        let dir_path = match dir {
            Some(d) => d.to_path_buf(),
            None => PathBuf::from(format!(
                "nstat-{}-{}",
                Local::now().format("%Y%m%d-%H%M"),
                test_type
            )),
        };

        fs::create_dir_all(&dir_path)
            .with_context(|| format!("Failed to create output directory: {}", dir_path.display()))?;

        let config_name = config_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "config.json".into());
        fs::copy(config_path, dir_path.join(config_name))
            .with_context(|| format!("Failed to copy {} to output directory", config_path.display()))?;

        let metadata = RunMetadata::new(test_type.to_string(), config_path.to_string_lossy().to_string());
        tracing::info!("Created output directory: {}", dir_path.display());

        Ok(Self {
            path: dir_path,
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default location of the result document
    pub fn results_path(&self) -> PathBuf {
        self.path.join(DEFAULT_RESULTS_FILE)
    }

    pub fn write_metadata(&self) -> Result<()> {
        let metadata_path = self.path.join(RUN_METADATA_FILE);
        let json = serde_json::to_string_pretty(&self.metadata)
            .with_context(|| "Failed to serialize run metadata")?;
        fs::write(&metadata_path, json)
            .with_context(|| format!("Failed to write {}", metadata_path.display()))?;
        Ok(())
    }

    /// Record the outcome and write the final metadata.
    pub fn finalize(&mut self, duration_secs: f64, summary: &RunSummary) -> Result<()> {
        self.metadata.finalize(duration_secs, summary);
        self.write_metadata()?;
        tracing::info!("Results saved to: {}", self.path.display());
        Ok(())
    }
}
