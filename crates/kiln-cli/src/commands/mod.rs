//! CLI command definitions and dispatch.

pub mod build;
pub mod dockerfile;
pub mod schema;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kiln_common::config::KilnSettings;
use kiln_common::constants::DESCRIPTOR_FILE;
use kiln_config::{ProjectConfig, load_descriptor};
use kiln_image::ResolutionMode;

/// Kiln: build container images for machine-learning models.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to the project descriptor.
    #[arg(short = 'f', long, global = true, default_value = DESCRIPTOR_FILE)]
    pub file: PathBuf,

    /// Enable offline mode (never fetch the compatibility matrix).
    #[arg(long, global = true)]
    pub offline: bool,

    /// Log at debug level and show every engine line through the logger.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a labeled image from the project.
    Build(build::BuildArgs),
    /// Print or write the generated input/output schema.
    Schema(schema::SchemaArgs),
    /// Print the Dockerfile a build would use.
    Dockerfile(dockerfile::DockerfileArgs),
}

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Globals {
    /// Path to the project descriptor.
    pub file: PathBuf,
    /// Offline mode requested on the command line.
    pub offline: bool,
    /// Verbose logging requested.
    pub verbose: bool,
}

impl Globals {
    /// Tool settings from the environment, with command-line overrides applied.
    pub fn settings(&self) -> KilnSettings {
        let mut settings = KilnSettings::from_env();
        settings.offline |= self.offline;
        settings
    }
}

/// Base-image flags shared by `build` and `dockerfile`.
#[derive(Args, Debug, Clone, Copy)]
pub struct BaseImageArgs {
    /// Use a maintained base image: bare or `=true` requires one, `=false`
    /// always builds from scratch. Omitted, one is used when available.
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub use_base_image: Option<bool>,

    /// Precompile Python sources into bytecode inside the image.
    #[arg(long)]
    pub precompile: bool,
}

impl BaseImageArgs {
    /// Resolution mode selected by `--use-base-image`.
    pub const fn mode(&self) -> ResolutionMode {
        ResolutionMode::from_flag(self.use_base_image)
    }
}

/// A loaded project: its root directory and parsed descriptor.
#[derive(Debug, Clone)]
pub struct Project {
    /// Directory containing the descriptor.
    pub dir: PathBuf,
    /// Parsed descriptor.
    pub config: ProjectConfig,
}

impl Project {
    /// Loads the descriptor at `file`; the project root is its directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is missing or malformed.
    pub fn load(file: &Path) -> anyhow::Result<Self> {
        if !file.is_file() {
            anyhow::bail!(
                "descriptor not found: {}\n\
                 Create a {DESCRIPTOR_FILE} or pass one with: kiln -f <path>",
                file.display()
            );
        }
        let config = load_descriptor(file)?;
        let parent = file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let dir = parent
            .canonicalize()
            .with_context(|| format!("cannot resolve project directory {}", parent.display()))?;
        tracing::debug!(dir = %dir.display(), "project loaded");
        Ok(Self { dir, config })
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let globals = Globals {
        file: cli.file,
        offline: cli.offline,
        verbose: cli.verbose,
    };
    match cli.command {
        Command::Build(args) => build::execute(&args, &globals),
        Command::Schema(args) => schema::execute(&args, &globals),
        Command::Dockerfile(args) => dockerfile::execute(&args, &globals),
    }
}
