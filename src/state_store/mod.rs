//! Local state file for the `flotilla` command.
//!
//! The file records the last refreshed [`ContainerGroupState`], including
//! the write-only values the service never returns, so it must be protected
//! like any other secret store.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spec::ContainerGroupState;

/// Default state file name, relative to the working directory.
pub const DEFAULT_STATE_FILE: &str = "flotilla.state.json";

const FORMAT_VERSION: u32 = 1;

/// Errors raised while reading or writing the state file.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the file is not a valid state document.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the file was written by an incompatible version.
    #[error("{path} uses state format {found}; this build reads format {FORMAT_VERSION}")]
    UnsupportedFormat {
        /// Path of the state file.
        path: Utf8PathBuf,
        /// Format version found in the file.
        found: u32,
    },
}

#[derive(Debug, Deserialize, Serialize)]
struct StateDocument {
    format_version: u32,
    #[serde(default)]
    container_group: Option<ContainerGroupState>,
}

/// Reads and writes the state file at a fixed path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateStore {
    path: Utf8PathBuf,
}

impl StateStore {
    /// Creates a store backed by `path`. Nothing is touched until the first
    /// load or save.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Loads the recorded state. A missing file means nothing is managed.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the file cannot be read or parsed.
    pub fn load(&self) -> Result<Option<ContainerGroupState>, StateStoreError> {
        let Some(contents) = self.read()? else {
            return Ok(None);
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }
        let document: StateDocument =
            serde_json::from_str(&contents).map_err(|err| StateStoreError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        if document.format_version != FORMAT_VERSION {
            return Err(StateStoreError::UnsupportedFormat {
                path: self.path.clone(),
                found: document.format_version,
            });
        }
        Ok(document.container_group)
    }

    /// Records `state`, or an empty document when the group is gone.
    ///
    /// The file is written beside its final name and renamed into place.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Io`] when the file cannot be written.
    pub fn save(&self, state: Option<&ContainerGroupState>) -> Result<(), StateStoreError> {
        let document = StateDocument {
            format_version: FORMAT_VERSION,
            container_group: state.cloned(),
        };
        let rendered =
            serde_json::to_string_pretty(&document).map_err(|err| StateStoreError::Parse {
                path: self.path.clone(),
                message: err.to_string(),
            })?;

        let (parent, file_name) = self.split()?;
        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| io_error(parent, &err))?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| io_error(parent, &err))?;

        let staging = format!("{file_name}.tmp");
        dir.write(&staging, rendered)
            .map_err(|err| io_error(&self.path, &err))?;
        dir.rename(&staging, &dir, file_name)
            .map_err(|err| io_error(&self.path, &err))
    }

    fn read(&self) -> Result<Option<String>, StateStoreError> {
        let (parent, file_name) = self.split()?;
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(parent, &err)),
        };
        match dir.read_to_string(file_name) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(&self.path, &err)),
        }
    }

    fn split(&self) -> Result<(&Utf8Path, &str), StateStoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_str().is_empty() => parent,
            _ => Utf8Path::new("."),
        };
        let file_name = self.path.file_name().ok_or_else(|| StateStoreError::Io {
            path: self.path.clone(),
            message: String::from("state file path is missing a filename"),
        })?;
        Ok((parent, file_name))
    }
}

fn io_error(path: &Utf8Path, err: &io::Error) -> StateStoreError {
    StateStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
