//! Schema compiler
//!
//! Projects language type expressions into the [`JsonSchema`] value model
//! consumed by LLM providers, and into a cosmetic host type string used by
//! the code generator. Missing named types degrade to an open object
//! schema here; the type checker reports the real error.

use crate::parser::ast::{FieldAnnotations, TypeDecl, TypeExpr};
use std::collections::HashMap;
use thinklang_core::{JsonSchema, SchemaMeta};

/// Type name → declaration, the compiler's view of all declared types.
pub type TypeTable = HashMap<String, TypeDecl>;

/// Project a type expression into a JSON Schema.
pub fn schema_of(ty: &TypeExpr, types: &TypeTable) -> JsonSchema {
    schema_of_guarded(ty, types, &mut Vec::new())
}

fn schema_of_guarded(ty: &TypeExpr, types: &TypeTable, visiting: &mut Vec<String>) -> JsonSchema {
    match ty {
        TypeExpr::String => JsonSchema::string(),
        TypeExpr::Int => JsonSchema::integer(),
        TypeExpr::Float => JsonSchema::number(),
        TypeExpr::Bool => JsonSchema::Boolean,
        TypeExpr::Null => JsonSchema::Null,
        TypeExpr::Array(inner) => JsonSchema::array(schema_of_guarded(inner, types, visiting)),
        TypeExpr::Optional(inner) => {
            JsonSchema::optional(schema_of_guarded(inner, types, visiting))
        }
        TypeExpr::Union(variants) => JsonSchema::AnyOf(
            variants
                .iter()
                .map(|v| schema_of_guarded(v, types, visiting))
                .collect(),
        ),
        TypeExpr::Confident(inner) => {
            JsonSchema::confident(schema_of_guarded(inner, types, visiting))
        }
        TypeExpr::Named(name) => {
            // Recursive type references also degrade to an open object.
            if visiting.iter().any(|n| n == name) {
                return JsonSchema::unknown_object();
            }
            match types.get(name) {
                Some(decl) => {
                    visiting.push(name.clone());
                    let schema = object_schema(decl, types, visiting);
                    visiting.pop();
                    schema
                }
                None => JsonSchema::unknown_object(),
            }
        }
    }
}

fn object_schema(decl: &TypeDecl, types: &TypeTable, visiting: &mut Vec<String>) -> JsonSchema {
    let mut properties = Vec::new();
    let mut required = Vec::new();

    for field in &decl.fields {
        let mut schema = schema_of_guarded(&field.ty, types, visiting);
        apply_annotations(&mut schema, &field.annotations);
        properties.push((field.name.clone(), schema));
        if !field.optional && !matches!(field.ty, TypeExpr::Optional(_)) {
            required.push(field.name.clone());
        }
    }

    JsonSchema::Object {
        properties,
        required,
        description: None,
    }
}

/// Merge field annotations onto the field's schema node. For `anyOf`
/// wrappers (optionals and unions), annotations land on the first variant.
fn apply_annotations(schema: &mut JsonSchema, annotations: &FieldAnnotations) {
    if annotations.is_empty() {
        return;
    }

    fn meta_of(schema: &mut JsonSchema) -> Option<&mut SchemaMeta> {
        match schema {
            JsonSchema::String(meta)
            | JsonSchema::Integer(meta)
            | JsonSchema::Number(meta)
            | JsonSchema::Array { meta, .. } => Some(meta),
            _ => None,
        }
    }

    let target = match schema {
        JsonSchema::AnyOf(variants) => variants.first_mut(),
        other => Some(other),
    };

    if let Some(target) = target {
        if let JsonSchema::Object { description, .. } = target {
            if description.is_none() {
                *description = annotations.description.clone();
            }
            return;
        }
        if let Some(meta) = meta_of(target) {
            meta.description = annotations.description.clone().or(meta.description.take());
            if let Some((lo, hi)) = annotations.range {
                meta.minimum = Some(lo);
                meta.maximum = Some(hi);
            }
            meta.min_length = annotations.min_length.or(meta.min_length);
            meta.max_length = annotations.max_length.or(meta.max_length);
            meta.min_items = annotations.min_items.or(meta.min_items);
            meta.max_items = annotations.max_items.or(meta.max_items);
            meta.pattern = annotations.pattern.clone().or(meta.pattern.take());
        }
    }
}

/// The second projection: a host type string for generated-code metadata.
/// Purely cosmetic, never semantically load-bearing.
pub fn host_type_string(ty: &TypeExpr) -> String {
    match ty {
        TypeExpr::String => "String".to_string(),
        TypeExpr::Int => "i64".to_string(),
        TypeExpr::Float => "f64".to_string(),
        TypeExpr::Bool => "bool".to_string(),
        TypeExpr::Null => "()".to_string(),
        TypeExpr::Named(name) => name.clone(),
        TypeExpr::Array(inner) => format!("Vec<{}>", host_type_string(inner)),
        TypeExpr::Optional(inner) => format!("Option<{}>", host_type_string(inner)),
        TypeExpr::Union(variants) => variants
            .iter()
            .map(host_type_string)
            .collect::<Vec<_>>()
            .join(" | "),
        TypeExpr::Confident(inner) => format!("Confident<{}>", host_type_string(inner)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use serde_json::json;

    fn types_of(source: &str) -> TypeTable {
        let program = parse(source).unwrap();
        program
            .statements
            .into_iter()
            .filter_map(|s| match s {
                crate::parser::ast::Stmt::TypeDecl(d) => Some((d.name.clone(), d)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn primitives_project() {
        let types = TypeTable::new();
        assert_eq!(
            schema_of(&TypeExpr::String, &types).to_value(),
            json!({"type": "string"})
        );
        assert_eq!(
            schema_of(&TypeExpr::Int, &types).to_value(),
            json!({"type": "integer"})
        );
        assert_eq!(
            schema_of(&TypeExpr::Float, &types).to_value(),
            json!({"type": "number"})
        );
    }

    #[test]
    fn optional_projects_to_any_of_null() {
        let types = TypeTable::new();
        let schema = schema_of(&TypeExpr::Optional(Box::new(TypeExpr::String)), &types);
        assert_eq!(
            schema.to_value(),
            json!({"anyOf": [{"type": "string"}, {"type": "null"}]})
        );
    }

    #[test]
    fn named_type_dereferences_to_closed_object() {
        let types = types_of(
            r#"
            type Sentiment {
                label: string description("positive or negative")
                score: float range(0..1)
                tags?: string[]
            }
            "#,
        );
        let schema = schema_of(&TypeExpr::Named("Sentiment".to_string()), &types);
        let rendered = schema.to_value();

        assert_eq!(rendered["type"], json!("object"));
        assert_eq!(rendered["additionalProperties"], json!(false));
        assert_eq!(rendered["required"], json!(["label", "score"]));
        assert_eq!(
            rendered["properties"]["label"]["description"],
            json!("positive or negative")
        );
        assert_eq!(rendered["properties"]["score"]["minimum"], json!(0.0));
        assert_eq!(rendered["properties"]["score"]["maximum"], json!(1.0));
    }

    #[test]
    fn missing_named_type_degrades_to_object() {
        let types = TypeTable::new();
        let schema = schema_of(&TypeExpr::Named("Nope".to_string()), &types);
        assert_eq!(schema.to_value(), json!({"type": "object"}));
    }

    #[test]
    fn confident_type_expands() {
        let types = TypeTable::new();
        let schema = schema_of(&TypeExpr::Confident(Box::new(TypeExpr::String)), &types);
        assert!(schema.is_confident_shape());
        let rendered = schema.to_value();
        assert_eq!(rendered["properties"]["value"], json!({"type": "string"}));
    }

    #[test]
    fn host_type_strings() {
        assert_eq!(
            host_type_string(&TypeExpr::Array(Box::new(TypeExpr::Named(
                "Review".to_string()
            )))),
            "Vec<Review>"
        );
        assert_eq!(
            host_type_string(&TypeExpr::Confident(Box::new(TypeExpr::Float))),
            "Confident<f64>"
        );
    }
}
