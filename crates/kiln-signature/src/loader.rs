//! Entry-point loaders: turn an entry-point reference into a normalized
//! signature the schema generator can consume.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use kiln_common::error::{KilnError, Result};
use kiln_config::EntryPointRef;
use kiln_schema::{FieldSpec, FieldType, OutputType};
use serde_json::Value;

use crate::ast::{ClassDecl, DefaultExpr, ParamDecl, SourceFile, TypeExpr};
use crate::parser;

/// Declared inputs and output of an entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPointSignature {
    /// Input fields in declaration order.
    pub inputs: Vec<FieldSpec>,
    /// Shape of the prediction result.
    pub output: OutputType,
}

/// Reads the signature of an entry point.
pub trait EntryPointLoader: Send + Sync {
    /// Loads the signature of `entry` within `project_dir`.
    ///
    /// # Errors
    ///
    /// Returns `KilnError::Config` when the module or type cannot be found
    /// and `KilnError::SchemaValidation` for unsupported declarations.
    fn load(&self, project_dir: &Path, entry: &EntryPointRef) -> Result<EntryPointSignature>;
}

/// Loader that statically parses the predictor source file.
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceLoader;

impl SourceLoader {
    /// Creates a new source loader.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl EntryPointLoader for SourceLoader {
    fn load(&self, project_dir: &Path, entry: &EntryPointRef) -> Result<EntryPointSignature> {
        let path = module_path(project_dir, &entry.module)?;
        tracing::debug!(module = %path.display(), type_name = %entry.type_name, "loading entry point");

        let source = std::fs::read_to_string(&path).map_err(|e| {
            KilnError::config(
                "predict",
                format!("cannot read module {}: {e}", path.display()),
            )
        })?;
        signature_from_source(&source, &entry.type_name)
    }
}

/// Loader returning a fixed signature; useful when the signature is known
/// ahead of time.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticLoader {
    signature: EntryPointSignature,
}

impl StaticLoader {
    /// Creates a loader that always returns `signature`.
    #[must_use]
    pub const fn new(signature: EntryPointSignature) -> Self {
        Self { signature }
    }
}

impl EntryPointLoader for StaticLoader {
    fn load(&self, _project_dir: &Path, _entry: &EntryPointRef) -> Result<EntryPointSignature> {
        Ok(self.signature.clone())
    }
}

/// Resolves the module path, refusing anything outside the project.
fn module_path(project_dir: &Path, module: &str) -> Result<PathBuf> {
    let relative = Path::new(module);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(KilnError::config(
            "predict",
            format!("module path must stay inside the project: {module}"),
        ));
    }
    Ok(project_dir.join(relative))
}

/// Extracts the signature of `type_name` from predictor source text.
///
/// # Errors
///
/// Returns an error if the source does not parse, the type or its
/// `predict` method is missing, or an annotation is unsupported.
pub fn signature_from_source(source: &str, type_name: &str) -> Result<EntryPointSignature> {
    let file = parser::parse_source(source)?;
    let class = file.class(type_name).ok_or_else(|| match file.skipped(type_name) {
        Some(skipped) => KilnError::config(
            "predict",
            format!("cannot read type {type_name}: {}", skipped.reason),
        ),
        None => KilnError::config("predict", format!("type {type_name} not found in module")),
    })?;
    let predict = class.predict.as_ref().ok_or_else(|| {
        KilnError::config("predict", format!("type {type_name} has no predict method"))
    })?;

    let resolver = TypeResolver { file: &file };
    let inputs = predict
        .params
        .iter()
        .enumerate()
        .map(|(position, param)| resolver.field(param, position, &mut HashSet::new()))
        .collect::<Result<Vec<_>>>()?;

    let returns = predict
        .returns
        .as_ref()
        .ok_or_else(|| KilnError::schema("Output", "missing return annotation on predict"))?;
    let output = resolver.output(returns)?;

    tracing::debug!(type_name, inputs = inputs.len(), "entry point signature read");
    Ok(EntryPointSignature { inputs, output })
}

/// Maps annotations to field types against the classes of one file.
struct TypeResolver<'a> {
    file: &'a SourceFile,
}

impl TypeResolver<'_> {
    fn output(&self, returns: &TypeExpr) -> Result<OutputType> {
        if matches!(
            returns.name.as_str(),
            "Iterator" | "AsyncIterator" | "Generator" | "ConcatenateIterator"
        ) {
            let item = returns.args.first().ok_or_else(|| {
                KilnError::schema("Output", format!("{} needs an item type", returns.name))
            })?;
            return Ok(OutputType::Iterator(self.field_type(
                item,
                "Output",
                &mut HashSet::new(),
            )?));
        }
        Ok(OutputType::Value(self.field_type(
            returns,
            "Output",
            &mut HashSet::new(),
        )?))
    }

    fn field(
        &self,
        param: &ParamDecl,
        position: usize,
        visiting: &mut HashSet<String>,
    ) -> Result<FieldSpec> {
        let annotation = param.annotation.as_ref().ok_or_else(|| {
            KilnError::schema(&param.name, "missing type annotation")
        })?;
        let optional = annotation.name == "Optional";
        let field_type = self.field_type(annotation, &param.name, visiting)?;
        let mut spec = FieldSpec::new(&param.name, field_type, position);

        match &param.default {
            Some(DefaultExpr::Literal(value)) => spec.default = Some(value.clone()),
            Some(DefaultExpr::Input(call)) => {
                spec.default.clone_from(&call.default);
                spec.minimum.clone_from(&call.ge);
                spec.maximum.clone_from(&call.le);
                spec.description.clone_from(&call.description);
                spec.choices.clone_from(&call.choices);
            }
            None => {}
        }
        if optional && spec.default.is_none() {
            spec.default = Some(Value::Null);
        }
        Ok(spec)
    }

    fn field_type(
        &self,
        expr: &TypeExpr,
        field: &str,
        visiting: &mut HashSet<String>,
    ) -> Result<FieldType> {
        let single_arg = || {
            expr.args.first().filter(|_| expr.args.len() == 1).ok_or_else(|| {
                KilnError::schema(field, format!("{} needs exactly one type argument", expr.name))
            })
        };

        match expr.name.as_str() {
            "str" => Ok(FieldType::String),
            "int" => Ok(FieldType::Integer),
            "float" => Ok(FieldType::Number),
            "bool" => Ok(FieldType::Boolean),
            "Path" | "File" => Ok(FieldType::Path),
            "URL" | "Url" | "URI" => Ok(FieldType::Uri),
            "list" | "List" => Ok(FieldType::List(Box::new(self.field_type(
                single_arg()?,
                field,
                visiting,
            )?))),
            "Optional" => self.field_type(single_arg()?, field, visiting),
            name => match self.file.class(name).filter(|c| c.is_model()) {
                Some(class) => self.object(class, field, visiting),
                None => Err(KilnError::schema(
                    field,
                    format!("unsupported type annotation: {name}"),
                )),
            },
        }
    }

    fn object(
        &self,
        class: &ClassDecl,
        field: &str,
        visiting: &mut HashSet<String>,
    ) -> Result<FieldType> {
        if !visiting.insert(class.name.clone()) {
            return Err(KilnError::schema(
                field,
                format!("recursive structured type: {}", class.name),
            ));
        }
        let fields = class
            .fields
            .iter()
            .enumerate()
            .map(|(position, param)| self.field(param, position, visiting))
            .collect::<Result<Vec<_>>>()?;
        let _ = visiting.remove(&class.name);
        Ok(FieldType::Object(fields))
    }
}
