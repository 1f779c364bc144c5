//! Refresh-and-load orchestration.
//!
//! Files are handled one at a time in file-name order: refresh, parse, derive
//! the schema, replace the table. A staging failure aborts the run. Any other
//! failure is recorded against its file and stage, and the run moves on to
//! the next report unless fail-fast is requested.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    dataset::load_dataset,
    io_utils,
    refresh::Refresher,
    replace::{Connector, TableReplacer},
    sanitize::{table_name, validate_identifier},
    schema::derive_schema,
    stage::{select_reports, stage_files},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Stage,
    Refresh,
    Parse,
    Schema,
    Load,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Stage => "stage",
            PipelineStage::Refresh => "refresh",
            PipelineStage::Parse => "parse",
            PipelineStage::Schema => "schema",
            PipelineStage::Load => "load",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("{stage} stage failed for {file} (table {table}): {error:#}")]
pub struct FileError {
    pub file: String,
    pub table: String,
    pub stage: PipelineStage,
    pub error: anyhow::Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileOutcome {
    Loaded {
        file: String,
        table: String,
        rows: u64,
        columns: usize,
        sha256: String,
        elapsed_ms: u128,
    },
    Failed {
        file: String,
        table: String,
        stage: PipelineStage,
        error: String,
    },
}

impl FileOutcome {
    pub fn file(&self) -> &str {
        match self {
            FileOutcome::Loaded { file, .. } | FileOutcome::Failed { file, .. } => file,
        }
    }

    pub fn table(&self) -> &str {
        match self {
            FileOutcome::Loaded { table, .. } | FileOutcome::Failed { table, .. } => table,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FileOutcome::Failed { .. })
    }
}

impl From<&FileError> for FileOutcome {
    fn from(err: &FileError) -> Self {
        FileOutcome::Failed {
            file: err.file.clone(),
            table: err.table.clone(),
            stage: err.stage,
            error: format!("{:#}", err.error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub staged_files: usize,
    pub outcomes: Vec<FileOutcome>,
}

impl RunReport {
    pub fn loaded(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_failure()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub source_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub extension: String,
    pub fail_fast: bool,
}

pub struct Pipeline<R, C> {
    refresher: R,
    replacer: TableReplacer<C>,
    options: PipelineOptions,
}

impl<R: Refresher, C: Connector> Pipeline<R, C> {
    pub fn new(refresher: R, replacer: TableReplacer<C>, options: PipelineOptions) -> Self {
        Self {
            refresher,
            replacer,
            options,
        }
    }

    /// Stages the source directory and loads every selected report.
    ///
    /// Returns `Err` only when staging fails, or on the first file failure
    /// when fail-fast is set.
    pub fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            "Run {run_id}: staging {:?} -> {:?}",
            self.options.source_dir, self.options.staging_dir
        );
        let staged = stage_files(&self.options.source_dir, &self.options.staging_dir)
            .map_err(|err| err.context(format!("{} stage failed", PipelineStage::Stage)))?;
        let reports = select_reports(&self.options.staging_dir, &self.options.extension)
            .map_err(|err| err.context(format!("{} stage failed", PipelineStage::Stage)))?;
        info!(
            "Run {run_id}: {} report(s) selected with extension '{}'",
            reports.len(),
            self.options.extension
        );

        let mut outcomes = Vec::with_capacity(reports.len());
        for path in &reports {
            match self.process_file(path) {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    error!("{err}");
                    outcomes.push(FileOutcome::from(&err));
                    if self.options.fail_fast {
                        return Err(anyhow!(err));
                    }
                }
            }
        }

        let report = RunReport {
            run_id,
            started_at,
            staged_files: staged.len(),
            outcomes,
        };
        info!(
            "Run {run_id}: {} loaded, {} failed",
            report.loaded(),
            report.failed()
        );
        Ok(report)
    }

    /// Refreshes and loads a single staged report.
    pub fn process_file(&self, path: &Path) -> Result<FileOutcome, FileError> {
        let started = Instant::now();
        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let table = table_name(&file);
        let fail = |stage: PipelineStage, error: anyhow::Error| FileError {
            file: file.clone(),
            table: table.clone(),
            stage,
            error,
        };

        info!("Refreshing {file}");
        self.refresher
            .refresh(path)
            .map_err(|err| fail(PipelineStage::Refresh, err.into()))?;

        let sha256 = io_utils::file_digest(path).map_err(|err| fail(PipelineStage::Parse, err))?;
        let loaded = load_dataset(path).map_err(|err| fail(PipelineStage::Parse, err))?;
        let dataset = loaded.dataset;
        info!(
            "Parsed {file}: {} row(s), {} column(s), encoding {}",
            dataset.row_count(),
            dataset.columns().len(),
            loaded.encoding.name()
        );

        validate_identifier(&table).map_err(|err| fail(PipelineStage::Schema, err.into()))?;
        let schema = derive_schema(&dataset).map_err(|err| fail(PipelineStage::Schema, err.into()))?;

        let summary = self
            .replacer
            .replace(&table, &schema, &dataset)
            .map_err(|err| fail(PipelineStage::Load, err))?;

        Ok(FileOutcome::Loaded {
            file,
            table,
            rows: summary.rows_loaded,
            columns: schema.len(),
            sha256,
            elapsed_ms: started.elapsed().as_millis(),
        })
    }
}
