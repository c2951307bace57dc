//! `kiln build`: Build, label and verify the project image.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Args;
use kiln_build::{BuildRequest, Builder, CancelToken, DockerCli, Provenance};
use kiln_image::load_matrix;
use kiln_signature::SourceLoader;

use super::{BaseImageArgs, Globals, Project};
use crate::output;

/// Arguments for the `build` command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Tag for the built image. Defaults to `image` from the descriptor,
    /// then `kiln-<project directory>`.
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Also write the generated schema to this path.
    #[arg(long, value_name = "PATH")]
    pub openapi_schema: Option<PathBuf>,

    /// Base-image selection.
    #[command(flatten)]
    pub base: BaseImageArgs,

    /// Source revision recorded on the image. Read from git when omitted.
    #[arg(long, value_name = "REV")]
    pub revision: Option<String>,

    /// Source version recorded on the image. Read from git when omitted.
    #[arg(long, value_name = "VER")]
    pub source_version: Option<String>,
}

/// Executes the `build` command.
///
/// # Errors
///
/// Returns an error if the project is invalid, no engine is available, or
/// the build fails or is interrupted.
pub fn execute(args: &BuildArgs, globals: &Globals) -> anyhow::Result<()> {
    let started = Instant::now();
    let project = Project::load(&globals.file)?;
    let settings = globals.settings();

    let matrix = load_matrix(&settings)?;
    let engine = DockerCli::locate(&settings)?;
    let builder = Builder::new(Arc::new(engine), Arc::new(SourceLoader::new()), matrix);

    let tag = args
        .tag
        .clone()
        .or_else(|| project.config.image.clone())
        .unwrap_or_else(|| default_tag(&project.dir));
    let provenance = provenance(
        &project.dir,
        args.source_version.as_deref(),
        args.revision.as_deref(),
    )?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || on_interrupt.cancel())
        .context("failed to install Ctrl+C handler")?;

    output::print_step(&format!("Building {tag}"));
    let request = BuildRequest {
        project_dir: project.dir,
        config: project.config,
        tag,
        mode: args.base.mode(),
        precompile: args.base.precompile,
        provenance,
    };
    let verbose = globals.verbose;
    let artifact = builder.build(&request, &cancel, &mut |line| {
        if !verbose {
            output::print_log_line(line);
        }
    })?;

    if let Some(path) = &args.openapi_schema {
        std::fs::write(path, artifact.schema.to_json_pretty()?)
            .with_context(|| format!("cannot write schema to {}", path.display()))?;
        output::print_step(&format!("Schema written to {}", path.display()));
    }

    output::print_built(&artifact.tag, artifact.context_bytes, started.elapsed());
    Ok(())
}

/// `kiln-<dirname>`, reduced to characters valid in an image name.
fn default_tag(project_dir: &Path) -> String {
    let name = project_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| matches!(c, '.' | '_' | '-'));
    if cleaned.is_empty() {
        "kiln-project".to_string()
    } else {
        format!("kiln-{cleaned}")
    }
}

/// Provenance from the flags, filling gaps from git.
///
/// When neither source yields both values the builder derives provenance
/// from the build context digest. An explicit flag that cannot be paired is
/// an error.
fn provenance(
    project_dir: &Path,
    version: Option<&str>,
    revision: Option<&str>,
) -> anyhow::Result<Option<Provenance>> {
    let explicit = version.is_some() || revision.is_some();
    let version = version
        .map(str::to_string)
        .or_else(|| git(project_dir, &["describe", "--tags", "--always"]));
    let revision = revision
        .map(str::to_string)
        .or_else(|| git(project_dir, &["rev-parse", "HEAD"]));

    match (version, revision) {
        (Some(version), Some(revision)) => Ok(Some(Provenance::new(version, revision)?)),
        _ if explicit => anyhow::bail!(
            "--source-version and --revision must both be given outside a git repository"
        ),
        _ => {
            tracing::info!("no version control data; provenance will follow the build context");
            Ok(None)
        }
    }
}

fn git(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}
