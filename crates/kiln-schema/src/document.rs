//! Serialized schema document shape.
//!
//! Every map in the document is a `BTreeMap` and every struct serializes
//! its fields in declaration order, so equal documents encode to equal bytes.

use std::collections::BTreeMap;

use kiln_common::constants::{OPENAPI_VERSION, TOOL_VERSION};
use kiln_common::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// JSON type keyword of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    /// `"string"`
    String,
    /// `"integer"`
    Integer,
    /// `"number"`
    Number,
    /// `"boolean"`
    Boolean,
    /// `"array"`
    Array,
    /// `"object"`
    Object,
}

/// One node of a type schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSchema {
    /// Display title derived from the field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// JSON type keyword.
    #[serde(rename = "type")]
    pub kind: JsonType,
    /// Format hint, e.g. `uri`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Field description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Inclusive lower bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Number>,
    /// Inclusive upper bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Number>,
    /// Allowed values.
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Value>,
    /// Element schema for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<TypeSchema>>,
    /// Required property names for objects, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Property schemas for objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, TypeSchema>>,
    /// Declaration position of a property within its parent object.
    #[serde(rename = "x-order", default, skip_serializing_if = "Option::is_none")]
    pub order: Option<usize>,
    /// Marks arrays that are streamed rather than returned at once.
    #[serde(
        rename = "x-kiln-array-type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub array_type: Option<String>,
}

impl TypeSchema {
    /// Creates a bare node of the given type.
    #[must_use]
    pub const fn of(kind: JsonType) -> Self {
        Self {
            title: None,
            kind,
            format: None,
            description: None,
            default: None,
            minimum: None,
            maximum: None,
            choices: Vec::new(),
            items: None,
            required: Vec::new(),
            properties: None,
            order: None,
            array_type: None,
        }
    }
}

/// Title and version of the described service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    /// Service title.
    pub title: String,
    /// Version of the tool that generated the document.
    pub version: String,
}

/// Named schema components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Components {
    /// Schemas by name (`Input`, `Output`).
    pub schemas: BTreeMap<String, TypeSchema>,
}

/// Machine-readable description of an entry point's input and output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    /// OpenAPI version string.
    pub openapi: String,
    /// Document metadata.
    pub info: Info,
    /// Schema components.
    pub components: Components,
}

impl SchemaDocument {
    /// Name of the input schema component.
    pub const INPUT: &'static str = "Input";
    /// Name of the output schema component.
    pub const OUTPUT: &'static str = "Output";

    /// Assembles a document from its input and output schemas.
    #[must_use]
    pub fn new(input: TypeSchema, output: TypeSchema) -> Self {
        let mut schemas = BTreeMap::new();
        let _ = schemas.insert(Self::INPUT.to_string(), input);
        let _ = schemas.insert(Self::OUTPUT.to_string(), output);
        Self {
            openapi: OPENAPI_VERSION.to_string(),
            info: Info {
                title: "Kiln".to_string(),
                version: TOOL_VERSION.to_string(),
            },
            components: Components { schemas },
        }
    }

    /// The input object schema.
    #[must_use]
    pub fn input(&self) -> Option<&TypeSchema> {
        self.components.schemas.get(Self::INPUT)
    }

    /// The output schema.
    #[must_use]
    pub fn output(&self) -> Option<&TypeSchema> {
        self.components.schemas.get(Self::OUTPUT)
    }

    /// Encodes the document as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Encodes the document as indented JSON, for files meant to be read.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
