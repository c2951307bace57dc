//! Compatibility matrix sources.
//!
//! Supports the compiled-in snapshot, local files (plain paths or
//! `file://`), and remote `https://` documents. Remote fetches are refused
//! in offline mode.

use std::path::PathBuf;
use std::sync::Arc;

use kiln_common::config::{BUILTIN_MATRIX, KilnSettings};
use kiln_common::error::{KilnError, Result};

use crate::matrix::CompatibilityMatrix;

/// Where a compatibility matrix is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixSource {
    /// The snapshot compiled into the binary.
    Builtin,
    /// A local JSON document.
    File(PathBuf),
    /// A remote JSON document fetched over HTTPS.
    Remote(String),
}

/// Resolves a matrix source string into a [`MatrixSource`].
///
/// # Errors
///
/// Returns an error if the URI scheme is unsupported, a remote URI is not
/// `https://`, or a local file does not exist.
pub fn resolve_source(uri: &str) -> Result<MatrixSource> {
    let uri = uri.trim();
    if uri.is_empty() || uri == BUILTIN_MATRIX {
        return Ok(MatrixSource::Builtin);
    }
    if uri.starts_with("http://") {
        return Err(KilnError::config(
            "matrix",
            format!("remote matrix sources must use https: {uri}"),
        ));
    }
    if uri.starts_with("https://") {
        tracing::debug!(url = uri, "resolved remote matrix source");
        return Ok(MatrixSource::Remote(uri.to_string()));
    }
    if uri.contains("://") && !uri.starts_with("file://") {
        return Err(KilnError::config(
            "matrix",
            format!("unsupported matrix source URI scheme: {uri}"),
        ));
    }

    let path = PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri));
    if !path.is_file() {
        return Err(KilnError::config(
            "matrix",
            format!("matrix file not found: {}", path.display()),
        ));
    }
    tracing::debug!(path = %path.display(), "resolved file matrix source");
    Ok(MatrixSource::File(path))
}

/// Loads the matrix named by `settings`.
///
/// # Errors
///
/// Returns an error if the source cannot be resolved, read or parsed, or
/// if a remote source is requested in offline mode.
pub fn load_matrix(settings: &KilnSettings) -> Result<Arc<CompatibilityMatrix>> {
    let matrix = match resolve_source(&settings.matrix_source)? {
        MatrixSource::Builtin => CompatibilityMatrix::builtin()?,
        MatrixSource::File(path) => {
            let content = std::fs::read_to_string(&path).map_err(|e| KilnError::Io {
                path: path.clone(),
                source: e,
            })?;
            CompatibilityMatrix::from_json(&content)?
        }
        MatrixSource::Remote(url) => {
            if settings.offline {
                return Err(KilnError::config(
                    "matrix",
                    format!("offline mode is enabled; refusing to fetch {url}"),
                ));
            }
            CompatibilityMatrix::from_json(&fetch(&url)?)?
        }
    };
    tracing::info!(version = %matrix.version, "using compatibility matrix");
    Ok(Arc::new(matrix))
}

fn fetch(url: &str) -> Result<String> {
    tracing::info!(url, "fetching compatibility matrix");
    let response = reqwest::blocking::get(url)
        .map_err(|e| KilnError::config("matrix", format!("failed to download {url}: {e}")))?;

    if !response.status().is_success() {
        return Err(KilnError::config(
            "matrix",
            format!("HTTP {} downloading {url}", response.status()),
        ));
    }

    response.text().map_err(|e| {
        KilnError::config(
            "matrix",
            format!("failed to read response body from {url}: {e}"),
        )
    })
}
