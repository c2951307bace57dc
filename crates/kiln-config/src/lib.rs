//! # kiln-config
//!
//! The project descriptor (`kiln.yaml`) and its validation.
//!
//! Handles:
//! - **Descriptor**: the typed [`ProjectConfig`] model and YAML loading.
//! - **Validator**: supported-version policy, entry-point reference checks,
//!   and completion of defaults into a [`ValidatedConfig`].
//! - **Requirements**: exact package pins from `python_packages` or the
//!   requirements file.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod descriptor;
pub mod requirements;
pub mod validator;

pub use descriptor::{BuildConfig, EntryPointRef, ProjectConfig, load_descriptor, parse_descriptor};
pub use requirements::{pinned_version, project_pin};
pub use validator::{ValidatedConfig, validate};
