//! Live-connection refresh of staged reports.
//!
//! The spreadsheet engine is an external collaborator. The pipeline only sees
//! the [`Refresher`] capability: a blocking call that returns once the file
//! has been recalculated, saved in place, and closed. [`CommandRefresher`]
//! delegates to an external program (for example `scripts/refresh_workbook.ps1`
//! driving the desktop spreadsheet application); [`SkipRefresh`] treats staged
//! files as already current.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use log::{debug, info};
use thiserror::Error;

/// Token in a refresh command line that is replaced by the staged file path.
pub const PATH_PLACEHOLDER: &str = "{path}";

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh command is empty")]
    EmptyCommand,
    #[error("failed to launch refresh command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("refresh of {path:?} exited with {status}: {stderr}")]
    Failed {
        path: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("refresh of {path:?} failed: {message}")]
    Engine { path: PathBuf, message: String },
}

pub trait Refresher {
    /// Recalculates every live connection in `path` and saves it in place.
    ///
    /// Must not return until asynchronous queries have settled.
    fn refresh(&self, path: &Path) -> Result<(), RefreshError>;
}

impl<R: Refresher + ?Sized> Refresher for &R {
    fn refresh(&self, path: &Path) -> Result<(), RefreshError> {
        (**self).refresh(path)
    }
}

impl<R: Refresher + ?Sized> Refresher for Box<R> {
    fn refresh(&self, path: &Path) -> Result<(), RefreshError> {
        (**self).refresh(path)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SkipRefresh;

impl Refresher for SkipRefresh {
    fn refresh(&self, path: &Path) -> Result<(), RefreshError> {
        debug!("Refresh disabled; using {path:?} as staged");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CommandRefresher {
    argv: Vec<String>,
}

impl CommandRefresher {
    pub fn new(argv: Vec<String>) -> Result<Self, RefreshError> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(RefreshError::EmptyCommand);
        }
        Ok(Self { argv })
    }

    /// Program and arguments for `path`. When no argument carries the
    /// placeholder the path is appended as the final argument.
    pub fn command_line(&self, path: &Path) -> Vec<String> {
        let rendered = path.display().to_string();
        let mut argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| arg.replace(PATH_PLACEHOLDER, &rendered))
            .collect();
        if !self.argv.iter().any(|arg| arg.contains(PATH_PLACEHOLDER)) {
            argv.push(rendered);
        }
        argv
    }
}

impl Refresher for CommandRefresher {
    fn refresh(&self, path: &Path) -> Result<(), RefreshError> {
        let argv = self.command_line(path);
        let (program, args) = argv.split_first().ok_or(RefreshError::EmptyCommand)?;
        info!("Refreshing {path:?} via '{program}'");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| RefreshError::Spawn {
                program: program.clone(),
                source,
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RefreshError::Failed {
                path: path.to_path_buf(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
