//! The version-compatibility matrix of maintained base images.
//!
//! Each entry pairs a Python runtime (and, for GPU images, a CUDA/cuDNN
//! toolkit) with the image that provides it. A matrix is an immutable
//! snapshot: it is loaded once per invocation and shared read-only.

use std::collections::HashSet;

use kiln_common::error::{KilnError, Result};
use kiln_common::types::{LayerDigest, Toolkit, Version};
use serde::{Deserialize, Serialize};

/// Snapshot compiled into the binary.
const BUILTIN_MATRIX_JSON: &str = include_str!("../data/matrix.json");

/// A maintained base image and the versions it provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixEntry {
    /// Python runtime installed in the image.
    pub python: Version,
    /// CUDA toolkit version; absent for CPU images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuda: Option<Version>,
    /// cuDNN version; absent for CPU images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cudnn: Option<Version>,
    /// Deep-learning framework (`torch`) version preinstalled in the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub torch: Option<Version>,
    /// Image reference.
    pub image: String,
    /// Digest of the image's final layer, when known ahead of time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_layer: Option<LayerDigest>,
}

impl MatrixEntry {
    /// The accelerator toolkit this image provides, if any.
    #[must_use]
    pub fn toolkit(&self) -> Option<Toolkit> {
        match (&self.cuda, &self.cudnn) {
            (Some(cuda), Some(cudnn)) => Some(Toolkit {
                cuda: cuda.clone(),
                cudnn: cudnn.clone(),
            }),
            _ => None,
        }
    }

    /// Returns `true` for images that ship a GPU toolkit.
    #[must_use]
    pub const fn is_gpu(&self) -> bool {
        self.cuda.is_some()
    }

    /// Returns `true` if the image can serve a project pinning `torch` to
    /// `pin`. Images without a preinstalled framework accept any pin; an
    /// unparseable pin matches no image that ships one.
    #[must_use]
    pub fn accepts_torch(&self, pin: Option<&str>) -> bool {
        match (&self.torch, pin) {
            (None, _) | (_, None) => true,
            (Some(shipped), Some(pin)) => {
                Version::parse(pin).is_some_and(|pin| shipped.starts_with(&pin))
            }
        }
    }

    /// Returns `true` if this entry provides the given Python `major.minor`.
    #[must_use]
    pub fn provides_python(&self, requested: &Version) -> bool {
        self.python.major_minor() == requested.major_minor()
    }
}

/// Default toolkit pair for one Python runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolkitDefault {
    /// Python runtime the default applies to.
    pub python: Version,
    /// Default CUDA version.
    pub cuda: Version,
    /// Default cuDNN version.
    pub cudnn: Version,
}

/// A versioned set of maintained images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityMatrix {
    /// Snapshot identifier.
    pub version: String,
    /// Maintained images.
    pub entries: Vec<MatrixEntry>,
    /// Declared toolkit defaults per Python runtime.
    #[serde(default)]
    pub defaults: Vec<ToolkitDefault>,
}

impl CompatibilityMatrix {
    /// Loads the snapshot compiled into the binary.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedded snapshot is malformed.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_MATRIX_JSON)
    }

    /// Parses and checks a matrix document.
    ///
    /// # Errors
    ///
    /// Returns `KilnError::Serialization` for malformed JSON and
    /// `KilnError::Config` for inconsistent entries.
    pub fn from_json(input: &str) -> Result<Self> {
        let matrix: Self = serde_json::from_str(input)?;
        matrix.check()?;
        tracing::debug!(
            version = %matrix.version,
            entries = matrix.entries.len(),
            "compatibility matrix loaded"
        );
        Ok(matrix)
    }

    fn check(&self) -> Result<()> {
        let mut images = HashSet::new();
        for (index, entry) in self.entries.iter().enumerate() {
            let field = || format!("matrix.entries[{index}]");
            if entry.image.trim().is_empty() {
                return Err(KilnError::config(field(), "image is empty"));
            }
            if entry.cuda.is_some() != entry.cudnn.is_some() {
                return Err(KilnError::config(
                    field(),
                    "cuda and cudnn must be set together",
                ));
            }
            if !images.insert(entry.image.as_str()) {
                return Err(KilnError::config(
                    field(),
                    format!("duplicate image {}", entry.image),
                ));
            }
        }
        Ok(())
    }

    /// Entries providing the requested Python `major.minor`.
    pub fn entries_for<'a, 'b>(
        &'a self,
        python: &'b Version,
    ) -> impl Iterator<Item = &'a MatrixEntry> + use<'a, 'b> {
        self.entries.iter().filter(move |e| e.provides_python(python))
    }

    /// The declared default toolkit for a Python runtime.
    #[must_use]
    pub fn default_toolkit(&self, python: &Version) -> Option<Toolkit> {
        self.defaults
            .iter()
            .find(|d| d.python.major_minor() == python.major_minor())
            .map(|d| Toolkit {
                cuda: d.cuda.clone(),
                cudnn: d.cudnn.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).expect("valid version")
    }

    #[test]
    fn builtin_snapshot_parses() {
        let matrix = CompatibilityMatrix::builtin().expect("builtin matrix");
        assert!(!matrix.version.is_empty());
        assert!(matrix.entries_for(&v("3.11")).any(MatrixEntry::is_gpu));
        assert!(matrix.entries_for(&v("3.11")).any(|e| !e.is_gpu()));
    }

    #[test]
    fn builtin_snapshot_declares_defaults() {
        let matrix = CompatibilityMatrix::builtin().expect("builtin matrix");
        let toolkit = matrix.default_toolkit(&v("3.10")).expect("default");
        assert_eq!(toolkit.cuda, v("11.8"));
        assert_eq!(toolkit.cudnn, v("8"));
    }

    #[test]
    fn entries_match_on_major_minor() {
        let matrix = CompatibilityMatrix::builtin().expect("builtin matrix");
        assert!(matrix.entries_for(&v("3.9.18")).count() > 0);
        assert_eq!(matrix.entries_for(&v("3.7")).count(), 0);
    }

    #[test]
    fn entry_with_layer_digest_parses() {
        let json = format!(
            r#"{{"version":"t","entries":[{{"python":"3.8","cuda":"11.8","cudnn":"8","image":"base:gpu","last_layer":"sha256:{}"}}]}}"#,
            "ab".repeat(32)
        );
        let matrix = CompatibilityMatrix::from_json(&json).expect("parse");
        let entry = &matrix.entries[0];
        assert_eq!(
            entry.last_layer.as_ref().map(LayerDigest::as_hex),
            Some("ab".repeat(32).as_str())
        );
        assert_eq!(
            entry.toolkit(),
            Some(Toolkit {
                cuda: v("11.8"),
                cudnn: v("8"),
            })
        );
    }

    #[test]
    fn torch_pin_must_match_shipped_framework() {
        let json = r#"{"version":"t","entries":[{"python":"3.11","cuda":"12.1","cudnn":"8","torch":"2.1.2","image":"base:gpu"}]}"#;
        let matrix = CompatibilityMatrix::from_json(json).expect("parse");
        let entry = &matrix.entries[0];
        assert_eq!(entry.torch, Some(v("2.1.2")));
        assert!(entry.accepts_torch(None));
        assert!(entry.accepts_torch(Some("2.1.2")));
        assert!(entry.accepts_torch(Some("2.1")));
        assert!(!entry.accepts_torch(Some("1.13.0")));
        assert!(!entry.accepts_torch(Some("2.1.0rc1")));
    }

    #[test]
    fn entry_without_framework_accepts_any_pin() {
        let matrix = CompatibilityMatrix::builtin().expect("builtin matrix");
        assert!(matrix.entries.iter().all(|e| e.accepts_torch(Some("1.13.0"))));
    }

    #[test]
    fn half_toolkit_entry_is_rejected() {
        let json = r#"{"version":"t","entries":[{"python":"3.8","cuda":"11.8","image":"x"}]}"#;
        let err = CompatibilityMatrix::from_json(json).unwrap_err();
        assert!(err.to_string().contains("matrix.entries[0]"));
    }

    #[test]
    fn duplicate_image_is_rejected() {
        let json = r#"{"version":"t","entries":[{"python":"3.8","image":"x"},{"python":"3.9","image":"x"}]}"#;
        assert!(CompatibilityMatrix::from_json(json).is_err());
    }

    #[test]
    fn invalid_version_is_rejected() {
        let json = r#"{"version":"t","entries":[{"python":"three","image":"x"}]}"#;
        assert!(CompatibilityMatrix::from_json(json).is_err());
    }
}
