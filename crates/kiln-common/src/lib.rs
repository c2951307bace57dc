//! # kiln-common
//!
//! Shared types, error definitions, tool settings, and constants
//! used across the entire Kiln workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the primitives (versions, layer digests,
//! label keys) that the config, schema, image and build crates share.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
