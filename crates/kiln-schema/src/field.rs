//! Normalized description of an entry point's inputs and output.

use serde_json::{Number, Value};

/// Declared type of an input or output field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// Text.
    String,
    /// Whole number.
    Integer,
    /// Floating-point number.
    Number,
    /// `true` / `false`.
    Boolean,
    /// A file handed over as a path; serialized as a URI.
    Path,
    /// A remote resource identified by URI.
    Uri,
    /// Homogeneous list of values.
    List(Box<FieldType>),
    /// Structured type with its own named fields.
    Object(Vec<FieldSpec>),
}

impl FieldType {
    /// Returns `true` for `Integer` and `Number`.
    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Number)
    }

    /// Short human-readable name used in error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Path => "path",
            Self::Uri => "uri",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }
}

/// Shape of the value returned by the prediction operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputType {
    /// A single value (scalar, list, or structured object).
    Value(FieldType),
    /// A stream of values produced incrementally.
    Iterator(FieldType),
}

/// One declared input field, or one field of a structured type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    /// Field name as declared.
    pub name: String,
    /// Declared type.
    pub field_type: FieldType,
    /// Default value; a field without one is required. `Value::Null`
    /// marks an optional field without a concrete default.
    pub default: Option<Value>,
    /// Inclusive lower bound for numeric fields.
    pub minimum: Option<Number>,
    /// Inclusive upper bound for numeric fields.
    pub maximum: Option<Number>,
    /// Free-form description.
    pub description: Option<String>,
    /// Allowed values, when restricted.
    pub choices: Vec<Value>,
    /// Declaration position, used for stable ordering.
    pub position: usize,
}

impl FieldSpec {
    /// Creates a required field with no constraints.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType, position: usize) -> Self {
        Self {
            name: name.into(),
            field_type,
            default: None,
            minimum: None,
            maximum: None,
            description: None,
            choices: Vec::new(),
            position,
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Sets the inclusive lower bound.
    #[must_use]
    pub fn with_minimum(mut self, minimum: impl Into<Number>) -> Self {
        self.minimum = Some(minimum.into());
        self
    }

    /// Sets the inclusive upper bound.
    #[must_use]
    pub fn with_maximum(mut self, maximum: impl Into<Number>) -> Self {
        self.maximum = Some(maximum.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Restricts the field to the given values.
    #[must_use]
    pub fn with_choices(mut self, choices: Vec<Value>) -> Self {
        self.choices = choices;
        self
    }

    /// Returns `true` if the field has no default and must be supplied.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.default.is_none()
    }
}
