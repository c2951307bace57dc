//! # kiln-image
//!
//! Base-image selection for Kiln builds.
//!
//! Handles:
//! - **Matrix**: the versioned compatibility snapshot of maintained images.
//! - **Sources**: built-in, local file, and remote matrix documents.
//! - **Resolver**: maintained-image selection under `auto`, `required` and
//!   `disabled` modes, with the from-scratch fallback recipe.
//! - **Hashing**: SHA-256 digests and layer membership checks.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod hash;
pub mod matrix;
pub mod resolver;
pub mod source;

pub use matrix::{CompatibilityMatrix, MatrixEntry, ToolkitDefault};
pub use resolver::{BaseImageCandidate, BaseImageResolver, ResolutionMode};
pub use source::{MatrixSource, load_matrix};
