//! Image metadata labels.
//!
//! Labels are computed before the build, passed to the engine, and checked
//! against the built image afterwards.

use std::collections::BTreeMap;

use kiln_common::constants::{
    LABEL_BASE_IMAGE, LABEL_BASE_IMAGE_LAST_LAYER, LABEL_CONFIG, LABEL_OCI_REVISION,
    LABEL_OCI_VERSION, LABEL_OPENAPI_SCHEMA, LABEL_TOOL_VERSION, TOOL_VERSION,
};
use kiln_common::error::{KilnError, Result};
use kiln_common::types::LayerDigest;
use kiln_config::ProjectConfig;
use kiln_image::hash::verify_layer_present;
use kiln_schema::SchemaDocument;

use crate::engine::ImageInspection;

/// Label mapping attached to an image, ordered by key.
pub type Labels = BTreeMap<String, String>;

/// Hex digits of the source digest used as a fallback version.
const SHORT_DIGEST_LEN: usize = 12;

/// Where the built source came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    version: String,
    revision: String,
}

impl Provenance {
    /// Creates provenance data; both fields must be non-empty.
    ///
    /// # Errors
    ///
    /// Returns `KilnError::Config` naming the empty field.
    pub fn new(version: impl Into<String>, revision: impl Into<String>) -> Result<Self> {
        let version = version.into().trim().to_string();
        let revision = revision.into().trim().to_string();
        if version.is_empty() {
            return Err(KilnError::config("provenance.version", "must not be empty"));
        }
        if revision.is_empty() {
            return Err(KilnError::config("provenance.revision", "must not be empty"));
        }
        Ok(Self { version, revision })
    }

    /// Provenance for sources with no version control data, keyed by the
    /// digest of the project sources. The version is the short digest, the
    /// same way `git describe --always` falls back to an abbreviated commit.
    #[must_use]
    pub fn from_sources(digest: &LayerDigest) -> Self {
        let hex = digest.as_hex();
        Self {
            version: hex[..SHORT_DIGEST_LEN].to_string(),
            revision: digest.to_string(),
        }
    }

    /// Source version, e.g. a tag.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Source revision, e.g. a commit id.
    #[must_use]
    pub fn revision(&self) -> &str {
        &self.revision
    }
}

/// The maintained base image an artifact was built on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImageLayer {
    /// Image reference.
    pub image: String,
    /// Digest of the image's final layer.
    pub last_layer: LayerDigest,
}

/// Inputs to label computation.
#[derive(Debug, Clone, Copy)]
pub struct LabelInputs<'a> {
    /// Descriptor with every default expanded.
    pub config: &'a ProjectConfig,
    /// Generated schema document.
    pub schema: &'a SchemaDocument,
    /// Maintained base image, when one was used.
    pub base: Option<&'a BaseImageLayer>,
    /// Source provenance.
    pub provenance: &'a Provenance,
}

/// Computes the label mapping for a build.
///
/// The result depends only on the inputs, so identical inputs always
/// produce identical label values.
///
/// # Errors
///
/// Returns an error if the configuration or schema cannot be serialized or
/// a required value is empty.
pub fn metadata_labels(inputs: &LabelInputs<'_>) -> Result<Labels> {
    let mut labels = Labels::new();
    let _ = labels.insert(LABEL_CONFIG.into(), serde_json::to_string(inputs.config)?);
    let _ = labels.insert(LABEL_OPENAPI_SCHEMA.into(), inputs.schema.to_json()?);
    let _ = labels.insert(LABEL_TOOL_VERSION.into(), TOOL_VERSION.into());

    let _ = labels.insert(LABEL_OCI_VERSION.into(), inputs.provenance.version().into());
    let _ = labels.insert(LABEL_OCI_REVISION.into(), inputs.provenance.revision().into());
    if let Some(base) = inputs.base {
        let _ = labels.insert(LABEL_BASE_IMAGE.into(), base.image.clone());
        let _ = labels.insert(
            LABEL_BASE_IMAGE_LAST_LAYER.into(),
            base.last_layer.to_string(),
        );
    }

    if let Some((key, _)) = labels.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(KilnError::config(key.clone(), "label value is empty"));
    }
    tracing::debug!(count = labels.len(), "metadata labels computed");
    Ok(labels)
}

/// Checks that a built image carries `expected` verbatim and, when a
/// maintained base was used, that its final layer is part of the image.
///
/// # Errors
///
/// Returns `KilnError::BuildExecution` describing the first mismatch.
pub fn verify_image(
    expected: &Labels,
    inspection: &ImageInspection,
    base_layer: Option<&LayerDigest>,
) -> Result<()> {
    for (key, value) in expected {
        match inspection.labels.get(key) {
            Some(actual) if actual == value => {}
            Some(_) => {
                return Err(KilnError::BuildExecution {
                    message: format!("label {key} on the built image does not match"),
                });
            }
            None => {
                return Err(KilnError::BuildExecution {
                    message: format!("label {key} is missing from the built image"),
                });
            }
        }
    }
    if let Some(layer) = base_layer {
        verify_layer_present(&inspection.layers, layer)?;
    }
    Ok(())
}
