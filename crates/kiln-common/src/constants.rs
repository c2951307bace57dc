//! System-wide constants, label keys, and version defaults.

/// Application name used in CLI output and default image tags.
pub const APP_NAME: &str = "kiln";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "kiln";

/// Version of this tool, embedded into every built image.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// File name of the project descriptor.
pub const DESCRIPTOR_FILE: &str = "kiln.yaml";

/// Project-local directory ignored when packaging the build context.
pub const PROJECT_STATE_DIR: &str = ".kiln";

/// Lowest supported Python runtime version.
pub const MIN_PYTHON_VERSION: &str = "3.8";

/// Python runtime version used when the descriptor does not set one.
pub const DEFAULT_PYTHON_VERSION: &str = "3.11";

/// CUDA version used when a GPU build names no toolkit and the matrix has no default.
pub const DEFAULT_CUDA_VERSION: &str = "11.8";

/// cuDNN version used when a GPU build names no toolkit and the matrix has no default.
pub const DEFAULT_CUDNN_VERSION: &str = "8";

/// Base OS image for from-scratch CPU builds.
pub const BASE_OS_IMAGE: &str = "ubuntu:22.04";

/// Directory inside the image that holds the project source.
pub const SOURCE_DIR: &str = "/src";

/// Python package providing the prediction server inside the image.
pub const RUNTIME_PACKAGE: &str = "kiln";

/// Environment variable carrying the entry-point reference inside the image.
pub const PREDICT_ENV: &str = "KILN_PREDICT";

/// Label: JSON-encoded resolved project configuration.
pub const LABEL_CONFIG: &str = "run.kiln.config";

/// Label: JSON-encoded schema document.
pub const LABEL_OPENAPI_SCHEMA: &str = "run.kiln.openapi_schema";

/// Label: version of the tool that built the image.
pub const LABEL_TOOL_VERSION: &str = "run.kiln.version";

/// Label: maintained base image reference.
pub const LABEL_BASE_IMAGE: &str = "run.kiln.base-image";

/// Label: final-layer digest of the maintained base image.
pub const LABEL_BASE_IMAGE_LAST_LAYER: &str = "run.kiln.base-image-last-layer-sha";

/// Label: provenance version (OCI annotation).
pub const LABEL_OCI_VERSION: &str = "org.opencontainers.image.version";

/// Label: provenance revision (OCI annotation).
pub const LABEL_OCI_REVISION: &str = "org.opencontainers.image.revision";

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// OpenAPI version declared by generated schema documents.
pub const OPENAPI_VERSION: &str = "3.0.2";
