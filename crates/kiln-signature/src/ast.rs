//! Syntax tree for the parts of a predictor source file the loader reads.

use serde_json::{Number, Value};

/// Root node: every class declared in the file, in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceFile {
    /// Class declarations.
    pub classes: Vec<ClassDecl>,
    /// Classes whose declarations could not be read, in source order.
    pub skipped: Vec<SkippedClass>,
}

impl SourceFile {
    /// Finds a class by name.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<&ClassDecl> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Finds an unreadable class by name.
    #[must_use]
    pub fn skipped(&self, name: &str) -> Option<&SkippedClass> {
        self.skipped.iter().find(|c| c.name.as_deref() == Some(name))
    }
}

/// A class declaration the reader gave up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedClass {
    /// Class name, if the header got that far.
    pub name: Option<String>,
    /// Why the declaration could not be read.
    pub reason: String,
}

/// A `class` declaration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassDecl {
    /// Class name.
    pub name: String,
    /// Base class names (last dotted segment).
    pub bases: Vec<String>,
    /// Leading annotated attributes (`name: type [= default]`).
    pub fields: Vec<ParamDecl>,
    /// The `predict` method, when the class declares one.
    pub predict: Option<PredictDecl>,
}

impl ClassDecl {
    /// Returns `true` for structured types (`BaseModel` subclasses).
    #[must_use]
    pub fn is_model(&self) -> bool {
        self.bases.iter().any(|b| b == "BaseModel")
    }
}

/// A `def predict(...) -> ...:` declaration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictDecl {
    /// Parameters after `self`, in declaration order.
    pub params: Vec<ParamDecl>,
    /// Return annotation.
    pub returns: Option<TypeExpr>,
}

/// A parameter or annotated attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDecl {
    /// Declared name.
    pub name: String,
    /// Type annotation.
    pub annotation: Option<TypeExpr>,
    /// Default value expression.
    pub default: Option<DefaultExpr>,
}

/// A type annotation such as `str` or `list[Path]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeExpr {
    /// Type name (last dotted segment).
    pub name: String,
    /// Subscript arguments.
    pub args: Vec<TypeExpr>,
}

impl TypeExpr {
    /// Creates an unparameterized type.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }
}

/// Right-hand side of `name: type = ...`.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultExpr {
    /// A plain literal.
    Literal(Value),
    /// An `Input(...)` / `Field(...)` declaration.
    Input(InputCall),
}

/// Keyword arguments of an `Input(...)` declaration that affect the schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputCall {
    /// `default=`
    pub default: Option<Value>,
    /// `description=`
    pub description: Option<String>,
    /// `ge=`
    pub ge: Option<Number>,
    /// `le=`
    pub le: Option<Number>,
    /// `choices=`
    pub choices: Vec<Value>,
}
