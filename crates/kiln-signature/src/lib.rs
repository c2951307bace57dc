//! # kiln-signature
//!
//! Static entry-point loading. Reads a predictor source file without
//! executing it and produces the normalized field description consumed by
//! the schema generator.
//!
//! Handles:
//! - **Lexer**: `nom`-based tokenization of predictor source.
//! - **Parser**: class headers, model attributes and `predict` signatures.
//! - **Loader**: the [`EntryPointLoader`] seam and its source-backed
//!   implementation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod ast;
pub mod lexer;
pub mod loader;
pub mod parser;

pub use loader::{
    EntryPointLoader, EntryPointSignature, SourceLoader, StaticLoader, signature_from_source,
};
