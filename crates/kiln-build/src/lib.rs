//! # kiln-build
//!
//! Turns a validated project into a labeled container image.
//!
//! Handles:
//! - **Plan**: the ordered build steps and their Dockerfile rendering.
//! - **Context**: deterministic gzip tarballs of the project.
//! - **Engine**: the [`BuildEngine`] seam, the docker CLI implementation,
//!   and an in-memory recording fake.
//! - **Labels**: metadata computation and post-build verification.
//! - **Orchestrator**: the sequential, cancellable build pipeline.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cancel;
pub mod context;
pub mod dockerfile;
pub mod engine;
pub mod fake;
pub mod labels;
pub mod orchestrator;
pub mod plan;

pub use cancel::CancelToken;
pub use engine::{BuildEngine, DockerCli, ImageBuild, ImageInspection};
pub use labels::{Labels, Provenance};
pub use orchestrator::{BuildArtifact, BuildRequest, Builder, Planner, PreparedBuild};
pub use plan::{BuildPlan, BuildStep};
