//! Typed model of the `kiln.yaml` project descriptor.

use std::fmt;
use std::path::Path;

use kiln_common::error::{KilnError, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// Root of a project descriptor.
///
/// Field values are kept as the user wrote them; [`crate::validate`] turns
/// them into typed versions and fills in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Default output tag for `kiln build`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Build environment.
    #[serde(default)]
    pub build: BuildConfig,
    /// Entry-point reference, `<module-path>:<TypeName>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predict: Option<String>,
}

/// The `build:` section of the descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Requested Python runtime version.
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub python_version: Option<String>,
    /// Whether the image needs a GPU toolkit.
    #[serde(default, skip_serializing_if = "is_false")]
    pub gpu: bool,
    /// Requested CUDA version.
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub cuda: Option<String>,
    /// Requested cuDNN version.
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub cudnn: Option<String>,
    /// System packages installed with apt.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_packages: Vec<String>,
    /// Python packages installed with pip.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub python_packages: Vec<String>,
    /// Path to a pip requirements file, relative to the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python_requirements: Option<String>,
    /// Extra shell commands run after package installation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run: Vec<String>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(value: &bool) -> bool {
    !*value
}

/// Accepts `3.8`, `"3.8"` or `8` for version-like fields.
///
/// The scalar is read as text so `3.10` stays `3.10` instead of passing
/// through a float and coming back as `3.1`.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<VersionText>::deserialize(deserializer)?.map(|v| v.0))
}

/// Source text of a version scalar.
struct VersionText(String);

impl<'de> Deserialize<'de> for VersionText {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(VersionTextVisitor)
    }
}

struct VersionTextVisitor;

impl Visitor<'_> for VersionTextVisitor {
    type Value = VersionText;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a version such as \"3.10\"")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Self::Value, E> {
        Ok(VersionText(value.trim().to_string()))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<Self::Value, E> {
        Ok(VersionText(value.to_string()))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<Self::Value, E> {
        Ok(VersionText(value.to_string()))
    }

    // Only reached from formats that do not keep scalar text; the float may
    // already have lost a trailing zero.
    fn visit_f64<E: de::Error>(self, value: f64) -> std::result::Result<Self::Value, E> {
        Err(E::custom(format!(
            "version {value} was read as a number and may have lost digits; quote it, e.g. \"3.10\""
        )))
    }
}

/// A parsed `<module-path>:<TypeName>` entry-point reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryPointRef {
    /// Module path relative to the project root (e.g. `predict.py`).
    pub module: String,
    /// Exported type implementing the prediction interface.
    pub type_name: String,
}

impl EntryPointRef {
    /// Parses an entry-point reference string.
    ///
    /// # Errors
    ///
    /// Returns `KilnError::Config` if either half is missing.
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = || {
            KilnError::config(
                "predict",
                format!("expected <module-path>:<TypeName>, got \"{reference}\""),
            )
        };
        let (module, type_name) = reference.trim().rsplit_once(':').ok_or_else(invalid)?;
        let (module, type_name) = (module.trim(), type_name.trim());
        if module.is_empty() || type_name.is_empty() {
            return Err(invalid());
        }
        if !type_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(invalid());
        }
        Ok(Self {
            module: module.to_string(),
            type_name: type_name.to_string(),
        })
    }
}

impl fmt::Display for EntryPointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.type_name)
    }
}

/// Parses a descriptor from YAML text.
///
/// An empty document yields the default descriptor.
///
/// # Errors
///
/// Returns `KilnError::Yaml` if the text is not a valid descriptor.
pub fn parse_descriptor(input: &str) -> Result<ProjectConfig> {
    if input.trim().is_empty() {
        return Ok(ProjectConfig::default());
    }
    Ok(serde_yaml::from_str(input)?)
}

/// Reads and parses a descriptor file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_descriptor(path: &Path) -> Result<ProjectConfig> {
    tracing::debug!(path = %path.display(), "loading project descriptor");
    let content = std::fs::read_to_string(path).map_err(|e| KilnError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_descriptor(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_descriptor() {
        let config = parse_descriptor("predict: predict.py:Predictor\n").expect("parse");
        assert_eq!(config.predict.as_deref(), Some("predict.py:Predictor"));
        assert!(config.build.python_version.is_none());
        assert!(!config.build.gpu);
    }

    #[test]
    fn parse_numeric_python_version() {
        let config = parse_descriptor("build:\n  python_version: 3.8\n").expect("parse");
        assert_eq!(config.build.python_version.as_deref(), Some("3.8"));
    }

    #[test]
    fn parse_numeric_python_version_keeps_trailing_zero() {
        let config = parse_descriptor("build:\n  python_version: 3.10\n").expect("parse");
        assert_eq!(config.build.python_version.as_deref(), Some("3.10"));
        let config = parse_descriptor("build:\n  python_version: 3.12\n").expect("parse");
        assert_eq!(config.build.python_version.as_deref(), Some("3.12"));
    }

    #[test]
    fn parse_quoted_python_version() {
        let config = parse_descriptor("build:\n  python_version: \"3.10\"\n").expect("parse");
        assert_eq!(config.build.python_version.as_deref(), Some("3.10"));
    }

    #[test]
    fn numeric_python_310_passes_validation() {
        let config = parse_descriptor("build:\n  python_version: 3.10\npredict: predict.py:Predictor\n")
            .expect("parse");
        let validated = crate::validate(&config).expect("3.10 is supported");
        assert_eq!(validated.python_version().to_string(), "3.10");
    }

    #[test]
    fn parse_numeric_cuda_version_keeps_text() {
        let config = parse_descriptor("build:\n  gpu: true\n  cuda: 12.10\n").expect("parse");
        assert_eq!(config.build.cuda.as_deref(), Some("12.10"));
    }

    #[test]
    fn float_version_from_json_is_rejected() {
        let err = serde_json::from_str::<BuildConfig>(r#"{"python_version": 3.1}"#).unwrap_err();
        assert!(err.to_string().contains("expected a version"), "got: {err}");
    }

    #[test]
    fn parse_numeric_cudnn_version() {
        let config = parse_descriptor("build:\n  gpu: true\n  cudnn: 8\n").expect("parse");
        assert_eq!(config.build.cudnn.as_deref(), Some("8"));
    }

    #[test]
    fn parse_full_descriptor() {
        let input = r#"
image: registry.example.com/acme/model
build:
  python_version: "3.11"
  gpu: true
  cuda: "12.1"
  system_packages:
    - ffmpeg
    - libsndfile1
  python_packages:
    - torch==2.1.0
  run:
    - echo hello
predict: predict.py:Predictor
"#;
        let config = parse_descriptor(input).expect("parse");
        assert_eq!(
            config.image.as_deref(),
            Some("registry.example.com/acme/model")
        );
        assert_eq!(config.build.python_version.as_deref(), Some("3.11"));
        assert_eq!(config.build.cuda.as_deref(), Some("12.1"));
        assert_eq!(config.build.system_packages, vec!["ffmpeg", "libsndfile1"]);
        assert_eq!(config.build.python_packages, vec!["torch==2.1.0"]);
        assert_eq!(config.build.run, vec!["echo hello"]);
    }

    #[test]
    fn parse_empty_document_yields_default() {
        let config = parse_descriptor("  \n").expect("parse");
        assert_eq!(config, ProjectConfig::default());
    }

    #[test]
    fn parse_rejects_unknown_keys() {
        let err = parse_descriptor("build:\n  pyhton_version: 3.8\n").unwrap_err();
        assert!(err.to_string().contains("pyhton_version"), "got: {err}");
    }

    #[test]
    fn serialization_omits_unset_fields() {
        let config = parse_descriptor("build:\n  python_version: 3.8\npredict: p.py:P\n")
            .expect("parse");
        let json = serde_json::to_string(&config).expect("serialize");
        assert_eq!(
            json,
            r#"{"build":{"python_version":"3.8"},"predict":"p.py:P"}"#
        );
    }

    #[test]
    fn entry_point_ref_parses_module_and_type() {
        let entry = EntryPointRef::parse("models/predict.py:Predictor").expect("parse");
        assert_eq!(entry.module, "models/predict.py");
        assert_eq!(entry.type_name, "Predictor");
        assert_eq!(entry.to_string(), "models/predict.py:Predictor");
    }

    #[test]
    fn entry_point_ref_rejects_missing_halves() {
        assert!(EntryPointRef::parse("predict.py").is_err());
        assert!(EntryPointRef::parse(":Predictor").is_err());
        assert!(EntryPointRef::parse("predict.py:").is_err());
        assert!(EntryPointRef::parse("predict.py:Bad Name").is_err());
    }

    #[test]
    fn load_descriptor_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kiln.yaml");
        std::fs::write(&path, "predict: predict.py:Predictor\n").expect("write");
        let config = load_descriptor(&path).expect("load");
        assert_eq!(config.predict.as_deref(), Some("predict.py:Predictor"));
    }

    #[test]
    fn load_descriptor_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load_descriptor(&dir.path().join("kiln.yaml")).unwrap_err();
        assert!(matches!(err, KilnError::Io { .. }));
    }
}
