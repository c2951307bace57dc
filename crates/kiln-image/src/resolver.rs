//! Base-image selection against the compatibility matrix.
//!
//! A maintained image is picked by exact Python `major.minor` match, then
//! by the highest toolkit pair that does not exceed the requested one (or
//! the matrix default when nothing was requested). Images that preinstall
//! a framework must agree with the project's `torch` pin. The resolution
//! mode decides what happens when nothing matches.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use kiln_common::constants::{BASE_OS_IMAGE, DEFAULT_CUDA_VERSION, DEFAULT_CUDNN_VERSION};
use kiln_common::error::{KilnError, Result};
use kiln_common::types::{LayerDigest, Toolkit, Version};
use kiln_config::ValidatedConfig;

use crate::matrix::{CompatibilityMatrix, MatrixEntry};

/// How strictly a maintained base image is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionMode {
    /// Prefer a maintained image, falling back to a from-scratch build.
    #[default]
    Auto,
    /// Fail when no maintained image matches.
    Required,
    /// Always build from scratch.
    Disabled,
}

impl ResolutionMode {
    /// Maps the tri-state `--use-base-image` flag: absent, `true`, `false`.
    #[must_use]
    pub const fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            None => Self::Auto,
            Some(true) => Self::Required,
            Some(false) => Self::Disabled,
        }
    }
}

impl fmt::Display for ResolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Required => "required",
            Self::Disabled => "disabled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ResolutionMode {
    type Err = KilnError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "required" | "true" => Ok(Self::Required),
            "disabled" | "false" => Ok(Self::Disabled),
            other => Err(KilnError::config(
                "use_base_image",
                format!("unknown resolution mode: {other}"),
            )),
        }
    }
}

/// The base a build starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseImageCandidate {
    /// A maintained image that already ships the runtime and toolkit.
    Maintained {
        /// Image reference.
        image: String,
        /// Python runtime provided by the image.
        python: Version,
        /// Toolkit provided by the image (GPU images only).
        toolkit: Option<Toolkit>,
        /// Final-layer digest, when the matrix records it.
        last_layer: Option<LayerDigest>,
    },
    /// A plain OS or CUDA image; runtime and toolkit are installed by the build.
    FromScratch {
        /// Image reference.
        base: String,
        /// Python runtime to install.
        python: Version,
        /// Toolkit the base provides (GPU builds only).
        toolkit: Option<Toolkit>,
    },
}

impl BaseImageCandidate {
    /// Image reference the build starts `FROM`.
    #[must_use]
    pub fn image(&self) -> &str {
        match self {
            Self::Maintained { image, .. } => image,
            Self::FromScratch { base, .. } => base,
        }
    }

    /// Python runtime of the final image.
    #[must_use]
    pub const fn python(&self) -> &Version {
        match self {
            Self::Maintained { python, .. } | Self::FromScratch { python, .. } => python,
        }
    }

    /// Accelerator toolkit of the final image.
    #[must_use]
    pub const fn toolkit(&self) -> Option<&Toolkit> {
        match self {
            Self::Maintained { toolkit, .. } | Self::FromScratch { toolkit, .. } => {
                toolkit.as_ref()
            }
        }
    }

    /// Returns `true` for maintained images.
    #[must_use]
    pub const fn is_maintained(&self) -> bool {
        matches!(self, Self::Maintained { .. })
    }

    /// Recorded final-layer digest of a maintained image.
    #[must_use]
    pub const fn last_layer(&self) -> Option<&LayerDigest> {
        match self {
            Self::Maintained { last_layer, .. } => last_layer.as_ref(),
            Self::FromScratch { .. } => None,
        }
    }
}

/// Selects base images from a shared matrix snapshot.
#[derive(Debug, Clone)]
pub struct BaseImageResolver {
    matrix: Arc<CompatibilityMatrix>,
}

impl BaseImageResolver {
    /// Creates a resolver over `matrix`.
    #[must_use]
    pub const fn new(matrix: Arc<CompatibilityMatrix>) -> Self {
        Self { matrix }
    }

    /// The matrix this resolver reads.
    #[must_use]
    pub fn matrix(&self) -> &CompatibilityMatrix {
        &self.matrix
    }

    /// Picks the base image for a validated configuration whose project
    /// pins `torch` to `torch_pin`, if at all.
    ///
    /// # Errors
    ///
    /// Returns `KilnError::BaseImageResolution` in `Required` mode when no
    /// maintained image matches.
    pub fn resolve(
        &self,
        config: &ValidatedConfig,
        torch_pin: Option<&str>,
        mode: ResolutionMode,
    ) -> Result<BaseImageCandidate> {
        let python = config.python_version();
        let target = self.target_toolkit(config);

        if mode == ResolutionMode::Disabled {
            tracing::info!("maintained base images disabled; building from scratch");
            return Ok(from_scratch(python, target));
        }

        if let Some(entry) = self.select(config, target.as_ref(), torch_pin) {
            tracing::info!(
                image = %entry.image,
                python = %entry.python,
                toolkit = ?entry.toolkit().map(|t| t.to_string()),
                "selected maintained base image"
            );
            return Ok(BaseImageCandidate::Maintained {
                image: entry.image.clone(),
                python: entry.python.clone(),
                toolkit: entry.toolkit(),
                last_layer: entry.last_layer.clone(),
            });
        }

        let wanted = describe(python, target.as_ref(), torch_pin);
        match mode {
            ResolutionMode::Required => Err(KilnError::BaseImageResolution {
                message: format!(
                    "no maintained base image for {wanted} in matrix {}",
                    self.matrix.version
                ),
            }),
            _ => {
                tracing::info!(wanted = %wanted, "no maintained base image matches; building from scratch");
                Ok(from_scratch(python, target))
            }
        }
    }

    /// The toolkit the build should end up with before matching: explicit
    /// versions first, then the matrix default, then the built-in default.
    fn target_toolkit(&self, config: &ValidatedConfig) -> Option<Toolkit> {
        if !config.gpu() {
            return None;
        }
        let declared = self.matrix.default_toolkit(config.python_version());
        let cuda = config
            .requested_cuda()
            .cloned()
            .or_else(|| declared.as_ref().map(|d| d.cuda.clone()))
            .or_else(|| Version::parse(DEFAULT_CUDA_VERSION))?;
        let cudnn = config
            .requested_cudnn()
            .cloned()
            .or_else(|| declared.map(|d| d.cudnn))
            .or_else(|| Version::parse(DEFAULT_CUDNN_VERSION))?;
        Some(Toolkit { cuda, cudnn })
    }

    fn select(
        &self,
        config: &ValidatedConfig,
        target: Option<&Toolkit>,
        torch_pin: Option<&str>,
    ) -> Option<&MatrixEntry> {
        let python = config.python_version();
        let candidates = self
            .matrix
            .entries_for(python)
            .filter(|e| e.is_gpu() == config.gpu())
            .filter(|e| e.accepts_torch(torch_pin));

        match target {
            None => candidates.max_by(|a, b| a.python.cmp(&b.python)),
            Some(target) => candidates
                .filter(|e| {
                    e.cuda.as_ref().is_some_and(|c| c.within(&target.cuda))
                        && e.cudnn.as_ref().is_some_and(|c| c.within(&target.cudnn))
                })
                .max_by(|a, b| (&a.cuda, &a.cudnn).cmp(&(&b.cuda, &b.cudnn))),
        }
    }
}

/// The from-scratch recipe for a runtime and optional toolkit.
#[must_use]
pub fn from_scratch(python: &Version, toolkit: Option<Toolkit>) -> BaseImageCandidate {
    let base = toolkit.as_ref().map_or_else(|| BASE_OS_IMAGE.to_string(), cuda_base_image);
    BaseImageCandidate::FromScratch {
        base,
        python: python.clone(),
        toolkit,
    }
}

/// Official CUDA development image for a toolkit pair.
fn cuda_base_image(toolkit: &Toolkit) -> String {
    let mut parts = toolkit.cuda.parts().to_vec();
    parts.resize(3, 0);
    let cuda = Version::from_parts(&parts);
    format!(
        "nvidia/cuda:{cuda}-cudnn{}-devel-ubuntu22.04",
        toolkit.cudnn.major()
    )
}

fn describe(python: &Version, toolkit: Option<&Toolkit>, torch_pin: Option<&str>) -> String {
    let base = toolkit.map_or_else(
        || format!("Python {python} (CPU)"),
        |t| format!("Python {python} with {t}"),
    );
    match torch_pin {
        Some(pin) => format!("{base} and torch {pin}"),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use kiln_config::{ProjectConfig, parse_descriptor, validate};

    use super::*;

    const MATRIX: &str = r#"{
        "version": "test",
        "entries": [
            {"python": "3.11", "image": "base:py3.11"},
            {"python": "3.11", "cuda": "11.7", "cudnn": "8", "image": "base:cu11.7"},
            {"python": "3.11", "cuda": "11.8", "cudnn": "8", "image": "base:cu11.8"},
            {"python": "3.11", "cuda": "12.1", "cudnn": "8", "image": "base:cu12.1"},
            {"python": "3.8", "cuda": "11.8", "cudnn": "8", "image": "base:py3.8-cu11.8"},
            {"python": "3.10", "cuda": "11.8", "cudnn": "8", "torch": "2.0.1", "image": "base:py3.10-torch2.0"},
            {"python": "3.10", "cuda": "12.1", "cudnn": "8", "torch": "2.1.2", "image": "base:py3.10-torch2.1"}
        ],
        "defaults": [
            {"python": "3.11", "cuda": "11.8", "cudnn": "8"}
        ]
    }"#;

    fn resolver() -> BaseImageResolver {
        BaseImageResolver::new(Arc::new(
            CompatibilityMatrix::from_json(MATRIX).expect("matrix"),
        ))
    }

    fn config(yaml: &str) -> ValidatedConfig {
        let raw: ProjectConfig = parse_descriptor(yaml).expect("descriptor");
        validate(&raw).expect("valid config")
    }

    fn v(s: &str) -> Version {
        Version::parse(s).expect("valid version")
    }

    #[test]
    fn mode_from_flag() {
        assert_eq!(ResolutionMode::from_flag(None), ResolutionMode::Auto);
        assert_eq!(ResolutionMode::from_flag(Some(true)), ResolutionMode::Required);
        assert_eq!(ResolutionMode::from_flag(Some(false)), ResolutionMode::Disabled);
    }

    #[test]
    fn mode_from_str() {
        assert_eq!("required".parse::<ResolutionMode>().expect("parse"), ResolutionMode::Required);
        assert!("sometimes".parse::<ResolutionMode>().is_err());
    }

    #[test]
    fn gpu_without_request_uses_matrix_default() {
        let cfg = config("build:\n  python_version: \"3.11\"\n  gpu: true\npredict: p.py:P\n");
        let candidate = resolver().resolve(&cfg, None, ResolutionMode::Auto).expect("resolve");
        assert_eq!(candidate.image(), "base:cu11.8");
        assert!(candidate.is_maintained());
    }

    #[test]
    fn gpu_request_picks_nearest_not_exceeding() {
        let cfg = config(
            "build:\n  python_version: \"3.11\"\n  gpu: true\n  cuda: \"12.0\"\npredict: p.py:P\n",
        );
        let candidate = resolver().resolve(&cfg, None, ResolutionMode::Required).expect("resolve");
        assert_eq!(candidate.image(), "base:cu11.8");
        assert_eq!(candidate.toolkit().map(|t| t.cuda.clone()), Some(v("11.8")));
    }

    #[test]
    fn gpu_major_only_request_matches_minor_releases() {
        let cfg = config(
            "build:\n  python_version: \"3.11\"\n  gpu: true\n  cuda: \"12\"\npredict: p.py:P\n",
        );
        let candidate = resolver().resolve(&cfg, None, ResolutionMode::Required).expect("resolve");
        assert_eq!(candidate.image(), "base:cu12.1");
    }

    #[test]
    fn cpu_build_picks_cpu_image() {
        let cfg = config("build:\n  python_version: \"3.11\"\npredict: p.py:P\n");
        let candidate = resolver().resolve(&cfg, None, ResolutionMode::Required).expect("resolve");
        assert_eq!(candidate.image(), "base:py3.11");
        assert!(candidate.toolkit().is_none());
    }

    #[test]
    fn required_mode_fails_without_match() {
        let cfg = config(
            "build:\n  python_version: \"3.8\"\n  gpu: true\n  cuda: \"11.2\"\npredict: p.py:P\n",
        );
        let err = resolver().resolve(&cfg, None, ResolutionMode::Required).unwrap_err();
        assert_eq!(err.kind(), "BaseImageResolutionError");
        assert!(err.to_string().contains("Python 3.8"), "got: {err}");
    }

    #[test]
    fn auto_mode_falls_back_to_scratch() {
        let cfg = config(
            "build:\n  python_version: \"3.8\"\n  gpu: true\n  cuda: \"11.2\"\npredict: p.py:P\n",
        );
        let candidate = resolver().resolve(&cfg, None, ResolutionMode::Auto).expect("resolve");
        assert!(!candidate.is_maintained());
        assert_eq!(candidate.image(), "nvidia/cuda:11.2.0-cudnn8-devel-ubuntu22.04");
    }

    #[test]
    fn disabled_mode_always_builds_from_scratch() {
        let cfg = config("build:\n  python_version: \"3.11\"\npredict: p.py:P\n");
        let candidate = resolver().resolve(&cfg, None, ResolutionMode::Disabled).expect("resolve");
        assert_eq!(
            candidate,
            BaseImageCandidate::FromScratch {
                base: BASE_OS_IMAGE.to_string(),
                python: v("3.11"),
                toolkit: None,
            }
        );
    }

    const TORCH_GPU: &str =
        "build:\n  python_version: \"3.10\"\n  gpu: true\n  cuda: \"12.1\"\npredict: p.py:P\n";

    #[test]
    fn torch_pin_selects_image_shipping_it() {
        let cfg = config(TORCH_GPU);
        let candidate = resolver()
            .resolve(&cfg, Some("2.0.1"), ResolutionMode::Required)
            .expect("resolve");
        assert_eq!(candidate.image(), "base:py3.10-torch2.0");
        let candidate = resolver()
            .resolve(&cfg, Some("2.1.2"), ResolutionMode::Required)
            .expect("resolve");
        assert_eq!(candidate.image(), "base:py3.10-torch2.1");
    }

    #[test]
    fn torch_mismatch_fails_in_required_mode() {
        let cfg = config(TORCH_GPU);
        let err = resolver()
            .resolve(&cfg, Some("1.13.0"), ResolutionMode::Required)
            .unwrap_err();
        assert_eq!(err.kind(), "BaseImageResolutionError");
        assert!(err.to_string().contains("torch 1.13.0"), "got: {err}");
    }

    #[test]
    fn torch_mismatch_builds_from_scratch_in_auto_mode() {
        let cfg = config(TORCH_GPU);
        let candidate = resolver()
            .resolve(&cfg, Some("1.13.0"), ResolutionMode::Auto)
            .expect("resolve");
        assert!(!candidate.is_maintained());
        assert_eq!(candidate.image(), "nvidia/cuda:12.1.0-cudnn8-devel-ubuntu22.04");
    }

    #[test]
    fn torch_pin_is_ignored_by_images_without_framework() {
        let cfg = config("build:\n  python_version: \"3.11\"\n  gpu: true\npredict: p.py:P\n");
        let candidate = resolver()
            .resolve(&cfg, Some("1.13.0"), ResolutionMode::Required)
            .expect("resolve");
        assert_eq!(candidate.image(), "base:cu11.8");
    }

    #[test]
    fn scratch_gpu_toolkit_falls_back_to_builtin_default() {
        let cfg = config("build:\n  python_version: \"3.9\"\n  gpu: true\npredict: p.py:P\n");
        let candidate = resolver().resolve(&cfg, None, ResolutionMode::Auto).expect("resolve");
        assert_eq!(
            candidate.toolkit().map(ToString::to_string),
            Some("CUDA 11.8 / cuDNN 8".to_string())
        );
    }
}
