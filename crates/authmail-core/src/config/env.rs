//! `KEY=VALUE` environment files.

use crate::error::ConfigError;
use std::collections::HashMap;
use std::io;
use std::path::Path;

/// Reads an environment file into a map without touching the process
/// environment.
///
/// Returns `Ok(None)` when the file does not exist.
///
/// # Errors
///
/// Returns an error if the file cannot be read or a line is malformed.
pub fn read_env_file(path: &Path) -> Result<Option<HashMap<String, String>>, ConfigError> {
    let to_error = |source| ConfigError::EnvFile {
        path: path.to_path_buf(),
        source,
    };

    let iter = match dotenv::from_path_iter(path) {
        Ok(iter) => iter,
        Err(dotenv::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(to_error(e)),
    };

    iter.collect::<Result<HashMap<_, _>, _>>()
        .map(Some)
        .map_err(to_error)
}

/// Configuration lookup: an environment file first, then the process
/// environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    file: HashMap<String, String>,
    process_fallback: bool,
}

impl EnvSource {
    /// Loads `path`, falling back to the process environment for keys the
    /// file does not set. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = read_env_file(path)?.unwrap_or_else(|| {
            tracing::info!(path = %path.display(), "No environment file, using process environment");
            HashMap::new()
        });

        Ok(Self {
            file,
            process_fallback: true,
        })
    }

    /// Uses only the given map, ignoring the process environment.
    #[must_use]
    pub const fn from_map(file: HashMap<String, String>) -> Self {
        Self {
            file,
            process_fallback: false,
        }
    }

    /// Looks up a key. Empty values count as unset.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.file
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .or_else(|| {
                self.process_fallback
                    .then(|| std::env::var(key).ok())
                    .flatten()
                    .filter(|v| !v.is_empty())
            })
    }
}
