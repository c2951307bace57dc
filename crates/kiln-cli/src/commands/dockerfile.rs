//! `kiln dockerfile`: Print the Dockerfile a build would use.

use std::sync::Arc;

use clap::Args;
use kiln_build::Planner;
use kiln_image::load_matrix;
use kiln_signature::SourceLoader;

use super::{BaseImageArgs, Globals, Project};
use crate::output;

/// Arguments for the `dockerfile` command.
#[derive(Args, Debug)]
pub struct DockerfileArgs {
    /// Base-image selection.
    #[command(flatten)]
    pub base: BaseImageArgs,
}

/// Executes the `dockerfile` command.
///
/// # Errors
///
/// Returns an error if the project is invalid or no base image can be
/// chosen in the requested mode.
pub fn execute(args: &DockerfileArgs, globals: &Globals) -> anyhow::Result<()> {
    let project = Project::load(&globals.file)?;
    let matrix = load_matrix(&globals.settings())?;
    let planner = Planner::new(Arc::new(SourceLoader::new()), matrix);
    let prepared = planner.prepare(
        &project.dir,
        &project.config,
        args.base.mode(),
        args.base.precompile,
    )?;
    output::print_document(prepared.dockerfile.trim_end());
    Ok(())
}
