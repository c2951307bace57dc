//! The build pipeline.
//!
//! validate → load entry point → generate schema → resolve base image →
//! plan → measure context → label → build → verify labels. Every failure
//! before the build step happens without touching the engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_common::error::{KilnError, Result};
use kiln_common::types::LayerDigest;
use kiln_config::{ProjectConfig, ValidatedConfig, project_pin, validate};
use kiln_image::{BaseImageCandidate, BaseImageResolver, CompatibilityMatrix, ResolutionMode};
use kiln_schema::{SchemaDocument, generate};
use kiln_signature::EntryPointLoader;

use crate::cancel::CancelToken;
use crate::context::{self, ContextSource};
use crate::dockerfile::{self, DOCKERFILE_PATH};
use crate::engine::{BuildEngine, ImageBuild};
use crate::labels::{BaseImageLayer, LabelInputs, Labels, Provenance, metadata_labels, verify_image};
use crate::plan::BuildPlan;

/// A request to build one project.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Project root containing the descriptor and sources.
    pub project_dir: PathBuf,
    /// Parsed project descriptor.
    pub config: ProjectConfig,
    /// Tag for the resulting image.
    pub tag: String,
    /// Base-image resolution mode.
    pub mode: ResolutionMode,
    /// Whether to add the precompile step.
    pub precompile: bool,
    /// Source provenance. When `None` it is derived from the digest of the
    /// project sources, so provenance labels are always present.
    pub provenance: Option<Provenance>,
}

/// Package whose pin must agree with a maintained image's preinstalled framework.
const FRAMEWORK_PACKAGE: &str = "torch";

/// Everything decided before the engine is involved.
#[derive(Debug, Clone)]
pub struct PreparedBuild {
    /// Validated descriptor.
    pub validated: ValidatedConfig,
    /// Descriptor with every default expanded.
    pub resolved_config: ProjectConfig,
    /// Generated schema document.
    pub schema: SchemaDocument,
    /// Selected base image.
    pub base: BaseImageCandidate,
    /// Build plan.
    pub plan: BuildPlan,
    /// Rendered Dockerfile.
    pub dockerfile: String,
}

/// A built, labeled and verified image.
#[derive(Debug, Clone)]
pub struct BuildArtifact {
    /// Image tag.
    pub tag: String,
    /// Labels attached to the image.
    pub labels: Labels,
    /// Base image the artifact was built on.
    pub base: BaseImageCandidate,
    /// Final-layer digest of the maintained base image, if one was used.
    pub base_layer: Option<LayerDigest>,
    /// Layer digests of the built image.
    pub layers: Vec<LayerDigest>,
    /// Generated schema document.
    pub schema: SchemaDocument,
    /// Digest of the build context.
    pub context_digest: LayerDigest,
    /// Size of the compressed build context in bytes.
    pub context_bytes: u64,
}

/// Decides everything about a build that does not need the engine.
#[derive(Clone)]
pub struct Planner {
    loader: Arc<dyn EntryPointLoader>,
    resolver: BaseImageResolver,
}

impl Planner {
    /// Creates a planner.
    #[must_use]
    pub fn new(loader: Arc<dyn EntryPointLoader>, matrix: Arc<CompatibilityMatrix>) -> Self {
        Self {
            loader,
            resolver: BaseImageResolver::new(matrix),
        }
    }

    /// Validates, generates the schema, resolves the base image and plans
    /// the build.
    ///
    /// # Errors
    ///
    /// Returns `Config`, `SchemaValidation` or `BaseImageResolution` errors.
    pub fn prepare(
        &self,
        project_dir: &Path,
        config: &ProjectConfig,
        mode: ResolutionMode,
        precompile: bool,
    ) -> Result<PreparedBuild> {
        let validated = validate(config)?;
        let schema = self.schema(project_dir, &validated)?;
        check_requirements(project_dir, &validated)?;

        let torch = if mode == ResolutionMode::Disabled {
            None
        } else {
            project_pin(project_dir, &validated, FRAMEWORK_PACKAGE)?
        };
        let base = self.resolver.resolve(&validated, torch.as_deref(), mode)?;
        let resolved_config = validated.resolved(base.toolkit());
        let plan = BuildPlan::assemble(&validated, &base, precompile);
        let dockerfile = dockerfile::render(&plan);

        tracing::info!(
            base = %base.image(),
            maintained = base.is_maintained(),
            mode = %mode,
            "build prepared"
        );
        Ok(PreparedBuild {
            validated,
            resolved_config,
            schema,
            base,
            plan,
            dockerfile,
        })
    }

    /// Generates the schema document for a validated descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry point cannot be loaded or its
    /// declarations are inconsistent.
    pub fn schema(&self, project_dir: &Path, validated: &ValidatedConfig) -> Result<SchemaDocument> {
        let signature = self.loader.load(project_dir, validated.entry_point())?;
        generate(&signature.inputs, &signature.output)
    }
}

/// Runs builds against an engine.
pub struct Builder {
    engine: Arc<dyn BuildEngine>,
    planner: Planner,
}

impl Builder {
    /// Creates a builder.
    #[must_use]
    pub fn new(
        engine: Arc<dyn BuildEngine>,
        loader: Arc<dyn EntryPointLoader>,
        matrix: Arc<CompatibilityMatrix>,
    ) -> Self {
        Self {
            engine,
            planner: Planner::new(loader, matrix),
        }
    }

    /// The planner used before each build.
    #[must_use]
    pub const fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Runs the full pipeline and returns the verified artifact.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error. `KilnError::Cancelled` is returned when
    /// `cancel` fires; no tagged image is left behind in that case.
    pub fn build(
        &self,
        request: &BuildRequest,
        cancel: &CancelToken,
        on_log: &mut dyn FnMut(&str),
    ) -> Result<BuildArtifact> {
        tracing::info!(tag = %request.tag, project = %request.project_dir.display(), "build started");
        let mut prepared = self.planner.prepare(
            &request.project_dir,
            &request.config,
            request.mode,
            request.precompile,
        )?;
        cancel.check()?;

        let base_layer = match self.base_layer(&prepared.base) {
            Ok(layer) => layer,
            Err(e) if request.mode == ResolutionMode::Auto => {
                tracing::info!(
                    image = %prepared.base.image(),
                    error = %e,
                    "maintained base image unavailable; building from scratch"
                );
                prepared = self.planner.prepare(
                    &request.project_dir,
                    &request.config,
                    ResolutionMode::Disabled,
                    request.precompile,
                )?;
                None
            }
            Err(e) => return Err(e),
        };
        let base = base_layer.as_ref().map(|layer| BaseImageLayer {
            image: prepared.base.image().to_string(),
            last_layer: layer.clone(),
        });

        let source = ContextSource::new(&request.project_dir, prepared.dockerfile.as_str());
        let measured = context::measure(&source)?;
        cancel.check()?;

        let provenance = match &request.provenance {
            Some(provenance) => provenance.clone(),
            None => Provenance::from_sources(&context::source_digest(&request.project_dir)?),
        };
        let labels = metadata_labels(&LabelInputs {
            config: &prepared.resolved_config,
            schema: &prepared.schema,
            base: base.as_ref(),
            provenance: &provenance,
        })?;

        let image = ImageBuild {
            tag: request.tag.clone(),
            base_image: prepared.base.image().to_string(),
            dockerfile: DOCKERFILE_PATH.to_string(),
            context: source,
            labels: labels.clone(),
        };
        match self.engine.build(&image, cancel, on_log) {
            Ok(()) => {}
            Err(KilnError::Cancelled) => return Err(self.discard(&request.tag, KilnError::Cancelled)),
            Err(e) => return Err(e),
        }
        if cancel.is_cancelled() {
            return Err(self.discard(&request.tag, KilnError::Cancelled));
        }

        let inspection = self.engine.inspect(&request.tag)?;
        if let Err(e) = verify_image(&labels, &inspection, base_layer.as_ref()) {
            return Err(self.discard(&request.tag, e));
        }

        tracing::info!(tag = %request.tag, layers = inspection.layers.len(), "build verified");
        Ok(BuildArtifact {
            tag: request.tag.clone(),
            labels,
            base: prepared.base,
            base_layer,
            layers: inspection.layers,
            schema: prepared.schema,
            context_digest: measured.digest,
            context_bytes: measured.bytes,
        })
    }

    /// Final-layer digest of a maintained base, pulling and inspecting the
    /// image when the matrix does not record it.
    fn base_layer(&self, base: &BaseImageCandidate) -> Result<Option<LayerDigest>> {
        if !base.is_maintained() {
            return Ok(None);
        }
        if let Some(layer) = base.last_layer() {
            return Ok(Some(layer.clone()));
        }
        self.engine.pull(base.image())?;
        let inspection = self.engine.inspect(base.image())?;
        let layer = inspection.last_layer().cloned().ok_or_else(|| KilnError::BuildExecution {
            message: format!("base image {} reports no layers", base.image()),
        })?;
        tracing::debug!(image = %base.image(), digest = %layer, "base layer read from engine");
        Ok(Some(layer))
    }

    /// Removes a tagged image after a failed or cancelled build.
    fn discard(&self, tag: &str, cause: KilnError) -> KilnError {
        tracing::warn!(tag, error = %cause, "discarding built image");
        if let Err(e) = self.engine.remove(tag) {
            tracing::warn!(tag, error = %e, "failed to remove image");
        }
        cause
    }
}

/// The requirements file must exist before any build step runs.
fn check_requirements(project_dir: &Path, validated: &ValidatedConfig) -> Result<()> {
    let Some(path) = &validated.config().build.python_requirements else {
        return Ok(());
    };
    if project_dir.join(path).is_file() {
        Ok(())
    } else {
        Err(KilnError::config(
            "build.python_requirements",
            format!("requirements file not found: {path}"),
        ))
    }
}
