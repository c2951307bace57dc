//! Tool-level settings, read from the environment.
//!
//! These are separate from the per-project descriptor: they describe how
//! this installation of Kiln finds its compatibility matrix and its
//! container engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Environment variable naming the compatibility matrix source.
pub const MATRIX_ENV: &str = "KILN_MATRIX";

/// Environment variable enabling offline mode.
pub const OFFLINE_ENV: &str = "KILN_OFFLINE";

/// Environment variable overriding the docker binary path.
pub const DOCKER_ENV: &str = "KILN_DOCKER";

/// Matrix source value selecting the compiled-in snapshot.
pub const BUILTIN_MATRIX: &str = "builtin";

/// Root settings for a Kiln invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KilnSettings {
    /// Where to load the compatibility matrix from (`builtin`, a path, or a URL).
    pub matrix_source: String,
    /// Whether offline mode is enabled (blocks remote matrix fetches).
    pub offline: bool,
    /// Explicit docker binary; located on `PATH` when unset.
    pub docker_binary: Option<PathBuf>,
}

impl Default for KilnSettings {
    fn default() -> Self {
        Self {
            matrix_source: BUILTIN_MATRIX.to_string(),
            offline: false,
            docker_binary: None,
        }
    }
}

impl KilnSettings {
    /// Reads settings from the process environment, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            matrix_source: lookup(MATRIX_ENV)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.matrix_source),
            offline: lookup(OFFLINE_ENV).is_some_and(|v| is_truthy(&v)),
            docker_binary: lookup(DOCKER_ENV)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
