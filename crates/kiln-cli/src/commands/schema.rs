//! `kiln schema`: Print or write the generated schema without building.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use kiln_config::validate;
use kiln_schema::generate;
use kiln_signature::{EntryPointLoader, SourceLoader};

use super::{Globals, Project};
use crate::output;

/// Arguments for the `schema` command.
#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Write the schema to this path instead of standard output.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

/// Executes the `schema` command.
///
/// # Errors
///
/// Returns an error if the descriptor is invalid or the entry point cannot
/// be turned into a schema.
pub fn execute(args: &SchemaArgs, globals: &Globals) -> anyhow::Result<()> {
    let project = Project::load(&globals.file)?;
    let validated = validate(&project.config)?;
    let signature = SourceLoader::new().load(&project.dir, validated.entry_point())?;
    let document = generate(&signature.inputs, &signature.output)?;
    let json = document.to_json_pretty()?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("cannot write schema to {}", path.display()))?;
            output::print_step(&format!("Schema written to {}", path.display()));
        }
        None => output::print_document(&json),
    }
    Ok(())
}
