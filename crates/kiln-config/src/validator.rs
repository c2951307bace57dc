//! Supported-version policy and structural checks for project descriptors.
//!
//! Validation is a pure function of the descriptor: nothing here touches
//! the filesystem or the compatibility matrix.

use kiln_common::constants::{DEFAULT_PYTHON_VERSION, MIN_PYTHON_VERSION};
use kiln_common::error::{KilnError, Result};
use kiln_common::types::{Toolkit, Version};

use crate::descriptor::{EntryPointRef, ProjectConfig};

/// A descriptor that passed validation, with its typed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    config: ProjectConfig,
    python: Version,
    entry_point: EntryPointRef,
    cuda: Option<Version>,
    cudnn: Option<Version>,
}

impl ValidatedConfig {
    /// The normalized descriptor (Python version filled in, toolkit fields
    /// dropped for CPU builds).
    #[must_use]
    pub const fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Requested Python runtime version.
    #[must_use]
    pub const fn python_version(&self) -> &Version {
        &self.python
    }

    /// Whether the build needs an accelerator toolkit.
    #[must_use]
    pub const fn gpu(&self) -> bool {
        self.config.build.gpu
    }

    /// Explicitly requested CUDA version, if any.
    #[must_use]
    pub const fn requested_cuda(&self) -> Option<&Version> {
        self.cuda.as_ref()
    }

    /// Explicitly requested cuDNN version, if any.
    #[must_use]
    pub const fn requested_cudnn(&self) -> Option<&Version> {
        self.cudnn.as_ref()
    }

    /// Parsed entry-point reference.
    #[must_use]
    pub const fn entry_point(&self) -> &EntryPointRef {
        &self.entry_point
    }

    /// Returns the descriptor with every default expanded.
    ///
    /// For GPU builds, toolkit fields the user left unset are taken from
    /// `toolkit`; explicit values are kept verbatim.
    #[must_use]
    pub fn resolved(&self, toolkit: Option<&Toolkit>) -> ProjectConfig {
        let mut config = self.config.clone();
        if let (true, Some(toolkit)) = (config.build.gpu, toolkit) {
            if config.build.cuda.is_none() {
                config.build.cuda = Some(toolkit.cuda.to_string());
            }
            if config.build.cudnn.is_none() {
                config.build.cudnn = Some(toolkit.cudnn.to_string());
            }
        }
        config
    }
}

/// Validates a raw descriptor against the supported-version policy.
///
/// # Checks performed
///
/// 1. An entry point is declared and has the form `<module-path>:<TypeName>`.
/// 2. The Python version parses and is at least the supported minimum.
/// 3. Toolkit versions parse; they are dropped when `gpu` is off.
/// 4. `python_packages` and `python_requirements` are not both set.
/// 5. No package name or run command is empty.
///
/// # Errors
///
/// Returns `KilnError::Config` naming the offending field.
pub fn validate(raw: &ProjectConfig) -> Result<ValidatedConfig> {
    tracing::debug!("validating project descriptor");
    let entry_point = check_entry_point(raw)?;
    let python = check_python_version(raw)?;
    let mut config = raw.clone();
    config.build.python_version = Some(python.to_string());

    let (cuda, cudnn) = if config.build.gpu {
        (
            parse_toolkit_version("build.cuda", config.build.cuda.as_deref())?,
            parse_toolkit_version("build.cudnn", config.build.cudnn.as_deref())?,
        )
    } else {
        if config.build.cuda.is_some() || config.build.cudnn.is_some() {
            tracing::info!("cuda/cudnn are only used when gpu is enabled; ignoring them");
        }
        config.build.cuda = None;
        config.build.cudnn = None;
        (None, None)
    };

    check_packages(&config)?;
    check_image(&config)?;

    Ok(ValidatedConfig {
        config,
        python,
        entry_point,
        cuda,
        cudnn,
    })
}

fn check_entry_point(raw: &ProjectConfig) -> Result<EntryPointRef> {
    match raw.predict.as_deref().map(str::trim) {
        None | Some("") => Err(KilnError::config(
            "predict",
            "Can't run predictions: 'predict' option not found",
        )),
        Some(reference) => EntryPointRef::parse(reference),
    }
}

fn check_python_version(raw: &ProjectConfig) -> Result<Version> {
    let requested = raw
        .build
        .python_version
        .as_deref()
        .unwrap_or(DEFAULT_PYTHON_VERSION);
    let version = Version::parse(requested).ok_or_else(|| {
        KilnError::config(
            "build.python_version",
            format!("invalid Python version: \"{requested}\""),
        )
    })?;
    let minimum = Version::parse(MIN_PYTHON_VERSION).ok_or_else(|| {
        KilnError::config("build.python_version", "invalid minimum Python version")
    })?;
    if version.major_minor() < minimum {
        return Err(KilnError::config(
            "build.python_version",
            format!("minimum supported Python version is {minimum}. requested {requested}"),
        ));
    }
    Ok(version)
}

fn parse_toolkit_version(field: &str, value: Option<&str>) -> Result<Option<Version>> {
    value
        .map(|v| {
            Version::parse(v)
                .ok_or_else(|| KilnError::config(field, format!("invalid version: \"{v}\"")))
        })
        .transpose()
}

fn check_packages(config: &ProjectConfig) -> Result<()> {
    let build = &config.build;
    if !build.python_packages.is_empty() && build.python_requirements.is_some() {
        return Err(KilnError::config(
            "build.python_packages",
            "only one of python_packages or python_requirements can be set",
        ));
    }
    if build
        .python_requirements
        .as_deref()
        .is_some_and(|p| p.trim().is_empty())
    {
        return Err(KilnError::config(
            "build.python_requirements",
            "requirements path is empty",
        ));
    }
    for (field, items) in [
        ("build.system_packages", &build.system_packages),
        ("build.python_packages", &build.python_packages),
        ("build.run", &build.run),
    ] {
        if let Some(index) = items.iter().position(|p| p.trim().is_empty()) {
            return Err(KilnError::config(
                format!("{field}[{index}]"),
                "entry is empty",
            ));
        }
    }
    Ok(())
}

fn check_image(config: &ProjectConfig) -> Result<()> {
    match config.image.as_deref() {
        Some(image) if image.trim().is_empty() || image.contains(char::is_whitespace) => Err(
            KilnError::config("image", format!("invalid image name: \"{image}\"")),
        ),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::parse_descriptor;

    fn config(yaml: &str) -> ProjectConfig {
        parse_descriptor(yaml).expect("descriptor should parse")
    }

    #[test]
    fn validate_minimal_config_fills_default_python() {
        let validated = validate(&config("predict: predict.py:Predictor\n")).expect("valid");
        assert_eq!(validated.python_version().to_string(), DEFAULT_PYTHON_VERSION);
        assert_eq!(
            validated.config().build.python_version.as_deref(),
            Some(DEFAULT_PYTHON_VERSION)
        );
        assert_eq!(validated.entry_point().type_name, "Predictor");
    }

    #[test]
    fn validate_rejects_python_below_minimum() {
        let err = validate(&config(
            "build:\n  python_version: 3.7\npredict: predict.py:Predictor\n",
        ))
        .unwrap_err();
        assert!(matches!(err, KilnError::Config { ref field, .. } if field == "build.python_version"));
        let msg = err.to_string();
        assert!(
            msg.contains("minimum supported Python version is 3.8. requested 3.7"),
            "got: {msg}"
        );
    }

    #[test]
    fn validate_rejects_every_version_below_minimum() {
        for requested in ["2.7", "3.0", "3.5", "3.6", "3.7", "3.7.17"] {
            let raw = config(&format!(
                "build:\n  python_version: \"{requested}\"\npredict: p.py:P\n"
            ));
            let msg = validate(&raw).unwrap_err().to_string();
            assert!(msg.contains("3.8"), "got: {msg}");
            assert!(msg.contains(requested), "got: {msg}");
        }
    }

    #[test]
    fn validate_accepts_patch_versions_at_minimum() {
        let raw = config("build:\n  python_version: \"3.8.10\"\npredict: p.py:P\n");
        assert!(validate(&raw).is_ok());
    }

    #[test]
    fn validate_rejects_missing_entry_point() {
        let err = validate(&config("build:\n  python_version: 3.8\n")).unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains("Can't run predictions: 'predict' option not found"),
            "got: {msg}"
        );
    }

    #[test]
    fn validate_rejects_blank_entry_point() {
        let err = validate(&config("predict: \"  \"\n")).unwrap_err();
        assert!(err.to_string().contains("'predict' option not found"));
    }

    #[test]
    fn validate_rejects_malformed_python_version() {
        let err = validate(&config(
            "build:\n  python_version: latest\npredict: p.py:P\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("invalid Python version"));
    }

    #[test]
    fn validate_drops_toolkit_for_cpu_builds() {
        let validated = validate(&config(
            "build:\n  cuda: \"11.8\"\npredict: p.py:P\n",
        ))
        .expect("valid");
        assert!(validated.config().build.cuda.is_none());
        assert!(validated.requested_cuda().is_none());
    }

    #[test]
    fn validate_keeps_explicit_toolkit_for_gpu_builds() {
        let validated = validate(&config(
            "build:\n  gpu: true\n  cuda: \"12.1\"\npredict: p.py:P\n",
        ))
        .expect("valid");
        assert_eq!(validated.requested_cuda().map(ToString::to_string).as_deref(), Some("12.1"));
        assert!(validated.requested_cudnn().is_none());
    }

    #[test]
    fn validate_rejects_bad_cuda_version() {
        let err = validate(&config(
            "build:\n  gpu: true\n  cuda: eleven\npredict: p.py:P\n",
        ))
        .unwrap_err();
        assert!(matches!(err, KilnError::Config { ref field, .. } if field == "build.cuda"));
    }

    #[test]
    fn validate_rejects_packages_and_requirements_together() {
        let err = validate(&config(
            "build:\n  python_packages: [torch]\n  python_requirements: requirements.txt\npredict: p.py:P\n",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("only one of python_packages"));
    }

    #[test]
    fn validate_rejects_empty_package_entry() {
        let err = validate(&config(
            "build:\n  system_packages: [ffmpeg, \"\"]\npredict: p.py:P\n",
        ))
        .unwrap_err();
        assert!(matches!(err, KilnError::Config { ref field, .. } if field == "build.system_packages[1]"));
    }

    #[test]
    fn resolved_expands_gpu_defaults() {
        let validated = validate(&config(
            "build:\n  python_version: 3.8\n  gpu: true\npredict: predict.py:Predictor\n",
        ))
        .expect("valid");
        let toolkit = Toolkit {
            cuda: Version::parse("11.8").expect("cuda"),
            cudnn: Version::parse("8").expect("cudnn"),
        };
        let resolved = validated.resolved(Some(&toolkit));
        let json = serde_json::to_value(&resolved).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "build": {
                    "python_version": "3.8",
                    "gpu": true,
                    "cuda": "11.8",
                    "cudnn": "8",
                },
                "predict": "predict.py:Predictor",
            })
        );
    }

    #[test]
    fn resolved_keeps_explicit_toolkit_values() {
        let validated = validate(&config(
            "build:\n  gpu: true\n  cuda: \"11.7\"\npredict: p.py:P\n",
        ))
        .expect("valid");
        let toolkit = Toolkit {
            cuda: Version::parse("11.6").expect("cuda"),
            cudnn: Version::parse("8").expect("cudnn"),
        };
        let resolved = validated.resolved(Some(&toolkit));
        assert_eq!(resolved.build.cuda.as_deref(), Some("11.7"));
        assert_eq!(resolved.build.cudnn.as_deref(), Some("8"));
    }

    #[test]
    fn resolved_ignores_toolkit_for_cpu_builds() {
        let validated = validate(&config("predict: p.py:P\n")).expect("valid");
        let toolkit = Toolkit {
            cuda: Version::parse("11.8").expect("cuda"),
            cudnn: Version::parse("8").expect("cudnn"),
        };
        assert!(validated.resolved(Some(&toolkit)).build.cuda.is_none());
    }
}
