//! Schema generation from declared entry-point fields.
//!
//! Fields are ordered by their declared position before anything else
//! happens, so the produced document never depends on the iteration order
//! of the caller's collection.

use std::collections::{BTreeMap, HashSet};

use kiln_common::error::{KilnError, Result};
use serde_json::{Number, Value};

use crate::document::{JsonType, SchemaDocument, TypeSchema};
use crate::field::{FieldSpec, FieldType, OutputType};

/// Generates the schema document for an entry point.
///
/// # Errors
///
/// Returns `KilnError::SchemaValidation` if a field's default, bounds or
/// choices are inconsistent with its declared type.
pub fn generate(inputs: &[FieldSpec], output: &OutputType) -> Result<SchemaDocument> {
    tracing::debug!(inputs = inputs.len(), "generating schema document");
    let mut input = object_schema(inputs, SchemaDocument::INPUT)?;
    input.title = Some(SchemaDocument::INPUT.to_string());

    let mut output = output_schema(output)?;
    output.title = Some(SchemaDocument::OUTPUT.to_string());

    Ok(SchemaDocument::new(input, output))
}

fn output_schema(output: &OutputType) -> Result<TypeSchema> {
    match output {
        OutputType::Value(field_type) => type_schema(field_type, SchemaDocument::OUTPUT),
        OutputType::Iterator(field_type) => {
            let mut schema = TypeSchema::of(JsonType::Array);
            schema.items = Some(Box::new(type_schema(field_type, SchemaDocument::OUTPUT)?));
            schema.array_type = Some("iterator".to_string());
            Ok(schema)
        }
    }
}

fn type_schema(field_type: &FieldType, path: &str) -> Result<TypeSchema> {
    let schema = match field_type {
        FieldType::String => TypeSchema::of(JsonType::String),
        FieldType::Integer => TypeSchema::of(JsonType::Integer),
        FieldType::Number => TypeSchema::of(JsonType::Number),
        FieldType::Boolean => TypeSchema::of(JsonType::Boolean),
        FieldType::Path | FieldType::Uri => {
            let mut s = TypeSchema::of(JsonType::String);
            s.format = Some("uri".to_string());
            s
        }
        FieldType::List(inner) => {
            let mut s = TypeSchema::of(JsonType::Array);
            s.items = Some(Box::new(type_schema(inner, path)?));
            s
        }
        FieldType::Object(fields) => object_schema(fields, path)?,
    };
    Ok(schema)
}

/// Builds an object schema; `required` and `x-order` follow declaration order.
fn object_schema(fields: &[FieldSpec], path: &str) -> Result<TypeSchema> {
    let mut ordered: Vec<&FieldSpec> = fields.iter().collect();
    ordered.sort_by_key(|f| f.position);
    check_identity(&ordered, path)?;

    let mut required = Vec::new();
    let mut properties = BTreeMap::new();
    for (order, spec) in ordered.iter().enumerate() {
        let field_path = if path == SchemaDocument::INPUT {
            spec.name.clone()
        } else {
            format!("{path}.{}", spec.name)
        };
        let schema = property_schema(spec, order, &field_path)?;
        if spec.is_required() {
            required.push(spec.name.clone());
        }
        let _ = properties.insert(spec.name.clone(), schema);
    }

    let mut schema = TypeSchema::of(JsonType::Object);
    schema.required = required;
    schema.properties = Some(properties);
    Ok(schema)
}

fn check_identity(ordered: &[&FieldSpec], path: &str) -> Result<()> {
    let mut names = HashSet::new();
    let mut positions = HashSet::new();
    for spec in ordered {
        if spec.name.trim().is_empty() {
            return Err(KilnError::schema(path, "field name is empty"));
        }
        if !names.insert(spec.name.as_str()) {
            return Err(KilnError::schema(&spec.name, "duplicate field name"));
        }
        if !positions.insert(spec.position) {
            return Err(KilnError::schema(
                &spec.name,
                format!("duplicate declaration position {}", spec.position),
            ));
        }
    }
    Ok(())
}

fn property_schema(spec: &FieldSpec, order: usize, path: &str) -> Result<TypeSchema> {
    check_constraints(spec, path)?;

    let mut schema = type_schema(&spec.field_type, path)?;
    schema.title = Some(title_case(&spec.name));
    schema.order = Some(order);
    schema.description.clone_from(&spec.description);
    schema.minimum.clone_from(&spec.minimum);
    schema.maximum.clone_from(&spec.maximum);
    schema.choices.clone_from(&spec.choices);
    schema.default = spec.default.clone().filter(|d| !d.is_null());
    Ok(schema)
}

fn check_constraints(spec: &FieldSpec, path: &str) -> Result<()> {
    let has_bounds = spec.minimum.is_some() || spec.maximum.is_some();
    if has_bounds && !spec.field_type.is_numeric() {
        return Err(KilnError::schema(
            path,
            format!(
                "minimum/maximum are only valid on numeric fields, not {}",
                spec.field_type.name()
            ),
        ));
    }
    if let (Some(min), Some(max)) = (&spec.minimum, &spec.maximum) {
        if as_f64(min) > as_f64(max) {
            return Err(KilnError::schema(
                path,
                format!("minimum {min} is greater than maximum {max}"),
            ));
        }
    }

    if !spec.choices.is_empty() {
        if !matches!(
            spec.field_type,
            FieldType::String | FieldType::Integer | FieldType::Number
        ) {
            return Err(KilnError::schema(
                path,
                format!("choices are not supported on {} fields", spec.field_type.name()),
            ));
        }
        for choice in &spec.choices {
            if !matches_type(choice, &spec.field_type) {
                return Err(KilnError::schema(
                    path,
                    format!("invalid choice {choice}: expected {}", spec.field_type.name()),
                ));
            }
        }
    }

    match &spec.default {
        None | Some(Value::Null) => Ok(()),
        Some(default) => check_default(spec, default, path),
    }
}

fn check_default(spec: &FieldSpec, default: &Value, path: &str) -> Result<()> {
    if !matches_type(default, &spec.field_type) {
        return Err(KilnError::schema(
            path,
            format!("invalid default: expected {}", spec.field_type.name()),
        ));
    }
    if let Some(value) = default.as_f64() {
        if let Some(min) = &spec.minimum {
            if value < as_f64(min) {
                return Err(KilnError::schema(
                    path,
                    format!("invalid default: number must be at least {min}"),
                ));
            }
        }
        if let Some(max) = &spec.maximum {
            if value > as_f64(max) {
                return Err(KilnError::schema(
                    path,
                    format!("invalid default: number must be at most {max}"),
                ));
            }
        }
    }
    if !spec.choices.is_empty() && !spec.choices.contains(default) {
        return Err(KilnError::schema(
            path,
            format!("invalid default: {default} is not one of the choices"),
        ));
    }
    Ok(())
}

fn matches_type(value: &Value, field_type: &FieldType) -> bool {
    match field_type {
        FieldType::String | FieldType::Path | FieldType::Uri => value.is_string(),
        FieldType::Integer => value.is_i64() || value.is_u64(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::List(inner) => value
            .as_array()
            .is_some_and(|items| items.iter().all(|v| matches_type(v, inner))),
        FieldType::Object(_) => value.is_object(),
    }
}

fn as_f64(number: &Number) -> f64 {
    number.as_f64().unwrap_or(f64::NAN)
}

/// Derives a display title: `max_new_tokens` becomes `Max New Tokens`.
fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}
