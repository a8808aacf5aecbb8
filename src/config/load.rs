use super::{compile, Config, Mapping, ValidationError};
use crate::context::Context;
use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Failure to load a mapping file. Every variant carries the offending path.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{}: file not found", path.display())]
    NotFound { path: PathBuf },
    #[error("{}: invalid JSON file: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("{}: {error}", path.display())]
    Validation {
        path: PathBuf,
        #[source]
        error: ValidationError,
    },
    #[error("{}: {error}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: io::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::NotFound { path }
            | ConfigError::Malformed { path, .. }
            | ConfigError::Validation { path, .. }
            | ConfigError::Io { path, .. } => path,
        }
    }

    /// A missing file is expected for most devices and need not be reported
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::NotFound { .. })
    }
}

/// The default mapping file of a device: its name with every non-word
/// character replaced by a dot, inside the config directory
pub fn default_path(ctx: &Context, device_name: &str) -> PathBuf {
    let file_name: String = device_name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                '.'
            }
        })
        .collect();

    ctx.config_dir.join(format!("{file_name}.json"))
}

/// Resolve an explicitly requested file name, or the device default if there
/// is none. Only the final component of `file` is used, so a request can never
/// point outside the config directory.
pub fn config_path(ctx: &Context, device_name: &str, file: Option<&str>) -> PathBuf {
    match file
        .filter(|file| !file.is_empty())
        .and_then(|file| Path::new(file).file_name())
    {
        Some(file_name) => ctx.config_dir.join(file_name),
        None => default_path(ctx, device_name),
    }
}

/// Parse mapping file contents. JSON syntax errors are `Malformed`; valid JSON
/// which does not fit the schema is a validation error.
pub fn parse(contents: &str, path: &Path) -> Result<Mapping, ConfigError> {
    let value: serde_json::Value =
        serde_json::from_str(contents).map_err(|e| ConfigError::Malformed {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;

    serde_json::from_value(value).map_err(|e| ConfigError::Validation {
        path: path.to_owned(),
        error: ValidationError::Schema(e.to_string()),
    })
}

pub fn read(path: &Path) -> Result<Mapping, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|error| {
        if error.kind() == ErrorKind::NotFound {
            ConfigError::NotFound {
                path: path.to_owned(),
            }
        } else {
            ConfigError::Io {
                path: path.to_owned(),
                error,
            }
        }
    })?;

    parse(&contents, path)
}

/// Read and compile the mapping file at `path`
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let mapping = read(path)?;

    compile(&mapping).map_err(|error| ConfigError::Validation {
        path: path.to_owned(),
        error,
    })
}

/// Write a mapping as pretty printed JSON, creating the directory if needed
pub fn save(path: &Path, mapping: &Mapping) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let mut contents = serde_json::to_string_pretty(mapping)?;
    contents.push('\n');

    fs::write(path, contents)
}
