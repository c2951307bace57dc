//! # kiln-schema
//!
//! Turns an entry point's declared inputs and output into a
//! machine-readable schema document.
//!
//! Handles:
//! - **Fields**: the normalized [`FieldSpec`] / [`OutputType`] description
//!   produced by an entry-point loader.
//! - **Document**: the serialized [`SchemaDocument`] shape.
//! - **Generator**: validation of defaults and bounds, stable ordering, and
//!   recursive output schemas.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod document;
pub mod field;
pub mod generator;

pub use document::{JsonType, SchemaDocument, TypeSchema};
pub use field::{FieldSpec, FieldType, OutputType};
pub use generator::generate;
