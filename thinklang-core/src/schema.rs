//! JSON Schema value model
//!
//! Schemas are data here, not static types: the compiler projects language
//! type expressions into this tagged variant, the runtime hands the raw
//! JSON rendering to providers, and validates their output against it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Field-level annotations that merge onto a schema node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SchemaMeta {
    pub description: Option<String>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub min_items: Option<u64>,
    pub max_items: Option<u64>,
    pub pattern: Option<String>,
}

impl SchemaMeta {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    fn apply(&self, obj: &mut Map<String, Value>) {
        if let Some(d) = &self.description {
            obj.insert("description".into(), json!(d));
        }
        if let Some(n) = self.minimum {
            obj.insert("minimum".into(), json!(n));
        }
        if let Some(n) = self.maximum {
            obj.insert("maximum".into(), json!(n));
        }
        if let Some(n) = self.min_length {
            obj.insert("minLength".into(), json!(n));
        }
        if let Some(n) = self.max_length {
            obj.insert("maxLength".into(), json!(n));
        }
        if let Some(n) = self.min_items {
            obj.insert("minItems".into(), json!(n));
        }
        if let Some(n) = self.max_items {
            obj.insert("maxItems".into(), json!(n));
        }
        if let Some(p) = &self.pattern {
            obj.insert("pattern".into(), json!(p));
        }
    }
}

/// A JSON Schema document as a closed variant set.
///
/// Raw JSON is emitted only at the wire boundary via [`JsonSchema::to_value`].
/// Every object level renders with `additionalProperties: false` and a
/// `required` list of all non-optional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JsonSchema {
    String(SchemaMeta),
    Integer(SchemaMeta),
    Number(SchemaMeta),
    Boolean,
    Null,
    Array {
        items: Box<JsonSchema>,
        meta: SchemaMeta,
    },
    Object {
        /// Declaration-ordered (name, schema) pairs.
        properties: Vec<(String, JsonSchema)>,
        required: Vec<String>,
        description: Option<String>,
    },
    AnyOf(Vec<JsonSchema>),
}

impl JsonSchema {
    pub fn string() -> Self {
        Self::String(SchemaMeta::default())
    }

    pub fn integer() -> Self {
        Self::Integer(SchemaMeta::default())
    }

    pub fn number() -> Self {
        Self::Number(SchemaMeta::default())
    }

    pub fn array(items: JsonSchema) -> Self {
        Self::Array {
            items: Box::new(items),
            meta: SchemaMeta::default(),
        }
    }

    /// `T?` projects to `anyOf: [T, null]`.
    pub fn optional(inner: JsonSchema) -> Self {
        Self::AnyOf(vec![inner, Self::Null])
    }

    /// An open `{type: object}` used when a named type cannot be resolved;
    /// the type checker reports the real error.
    pub fn unknown_object() -> Self {
        Self::Object {
            properties: Vec::new(),
            required: Vec::new(),
            description: None,
        }
    }

    /// The Confident projection of an inner schema.
    pub fn confident(inner: JsonSchema) -> Self {
        let mut confidence_meta = SchemaMeta::default();
        confidence_meta.minimum = Some(0.0);
        confidence_meta.maximum = Some(1.0);

        Self::Object {
            properties: vec![
                ("value".to_string(), inner),
                ("confidence".to_string(), Self::Number(confidence_meta)),
                ("reasoning".to_string(), Self::string()),
            ],
            required: vec![
                "value".to_string(),
                "confidence".to_string(),
                "reasoning".to_string(),
            ],
            description: None,
        }
    }

    /// Structural Confident detection: an object whose properties contain
    /// both `value` and `confidence`. Wrapping stays agnostic to whether
    /// the shape came from the source type or from `uncertain`.
    pub fn is_confident_shape(&self) -> bool {
        match self {
            Self::Object { properties, .. } => {
                let has = |name: &str| properties.iter().any(|(n, _)| n == name);
                has("value") && has("confidence")
            }
            _ => false,
        }
    }

    /// Render the raw JSON Schema document handed to providers.
    pub fn to_value(&self) -> Value {
        match self {
            Self::String(meta) => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!("string"));
                meta.apply(&mut obj);
                Value::Object(obj)
            }
            Self::Integer(meta) => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!("integer"));
                meta.apply(&mut obj);
                Value::Object(obj)
            }
            Self::Number(meta) => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!("number"));
                meta.apply(&mut obj);
                Value::Object(obj)
            }
            Self::Boolean => json!({"type": "boolean"}),
            Self::Null => json!({"type": "null"}),
            Self::Array { items, meta } => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!("array"));
                obj.insert("items".into(), items.to_value());
                meta.apply(&mut obj);
                Value::Object(obj)
            }
            Self::Object {
                properties,
                required,
                description,
            } => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!("object"));
                if let Some(d) = description {
                    obj.insert("description".into(), json!(d));
                }
                if !properties.is_empty() {
                    let mut props = Map::new();
                    for (name, schema) in properties {
                        props.insert(name.clone(), schema.to_value());
                    }
                    obj.insert("properties".into(), Value::Object(props));
                    obj.insert("required".into(), json!(required));
                    obj.insert("additionalProperties".into(), json!(false));
                }
                Value::Object(obj)
            }
            Self::AnyOf(variants) => {
                let rendered: Vec<Value> = variants.iter().map(|v| v.to_value()).collect();
                json!({ "anyOf": rendered })
            }
        }
    }

    /// Validate a payload against this schema. Returns a human-readable
    /// reason on the first mismatch.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match self {
            Self::String(meta) => {
                let s = value
                    .as_str()
                    .ok_or_else(|| format!("expected string, got {}", type_name(value)))?;
                let len = s.chars().count() as u64;
                if let Some(min) = meta.min_length {
                    if len < min {
                        return Err(format!("string length {} below minLength {}", len, min));
                    }
                }
                if let Some(max) = meta.max_length {
                    if len > max {
                        return Err(format!("string length {} above maxLength {}", len, max));
                    }
                }
                if let Some(pattern) = &meta.pattern {
                    let re = regex::Regex::new(pattern)
                        .map_err(|e| format!("invalid pattern '{}': {}", pattern, e))?;
                    if !re.is_match(s) {
                        return Err(format!("string does not match pattern '{}'", pattern));
                    }
                }
                Ok(())
            }
            Self::Integer(meta) => {
                if value.as_i64().is_none() && value.as_u64().is_none() {
                    return Err(format!("expected integer, got {}", type_name(value)));
                }
                check_range(value.as_f64(), meta)
            }
            Self::Number(meta) => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| format!("expected number, got {}", type_name(value)))?;
                check_range(Some(n), meta)
            }
            Self::Boolean => value
                .as_bool()
                .map(|_| ())
                .ok_or_else(|| format!("expected boolean, got {}", type_name(value))),
            Self::Null => {
                if value.is_null() {
                    Ok(())
                } else {
                    Err(format!("expected null, got {}", type_name(value)))
                }
            }
            Self::Array { items, meta } => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| format!("expected array, got {}", type_name(value)))?;
                if let Some(min) = meta.min_items {
                    if (arr.len() as u64) < min {
                        return Err(format!("array length {} below minItems {}", arr.len(), min));
                    }
                }
                if let Some(max) = meta.max_items {
                    if (arr.len() as u64) > max {
                        return Err(format!("array length {} above maxItems {}", arr.len(), max));
                    }
                }
                for (i, item) in arr.iter().enumerate() {
                    items
                        .validate(item)
                        .map_err(|e| format!("item {}: {}", i, e))?;
                }
                Ok(())
            }
            Self::Object {
                properties,
                required,
                ..
            } => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| format!("expected object, got {}", type_name(value)))?;
                // An empty property list is the degraded open-object form.
                if properties.is_empty() {
                    return Ok(());
                }
                for name in required {
                    if !obj.contains_key(name) {
                        return Err(format!("missing required field '{}'", name));
                    }
                }
                for (key, v) in obj {
                    match properties.iter().find(|(n, _)| n == key) {
                        Some((_, schema)) => schema
                            .validate(v)
                            .map_err(|e| format!("field '{}': {}", key, e))?,
                        None => return Err(format!("unexpected field '{}'", key)),
                    }
                }
                Ok(())
            }
            Self::AnyOf(variants) => {
                for variant in variants {
                    if variant.validate(value).is_ok() {
                        return Ok(());
                    }
                }
                Err(format!(
                    "value matched none of {} anyOf variants",
                    variants.len()
                ))
            }
        }
    }
}

fn check_range(n: Option<f64>, meta: &SchemaMeta) -> Result<(), String> {
    let n = match n {
        Some(n) => n,
        None => return Ok(()),
    };
    if let Some(min) = meta.minimum {
        if n < min {
            return Err(format!("{} below minimum {}", n, min));
        }
    }
    if let Some(max) = meta.maximum {
        if n > max {
            return Err(format!("{} above maximum {}", n, max));
        }
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Serialize a JSON value with object keys sorted at every level, so
/// structurally equal documents hash identically.
pub fn canonical_json(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String((*key).clone()).to_string());
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_schema_is_closed() {
        let schema = JsonSchema::Object {
            properties: vec![
                ("label".to_string(), JsonSchema::string()),
                (
                    "score".to_string(),
                    JsonSchema::optional(JsonSchema::number()),
                ),
            ],
            required: vec!["label".to_string(), "score".to_string()],
            description: None,
        };
        let rendered = schema.to_value();
        assert_eq!(rendered["additionalProperties"], json!(false));
        assert_eq!(rendered["required"], json!(["label", "score"]));
    }

    #[test]
    fn confident_projection_shape() {
        let schema = JsonSchema::confident(JsonSchema::string());
        assert!(schema.is_confident_shape());

        let rendered = schema.to_value();
        assert_eq!(rendered["properties"]["confidence"]["minimum"], json!(0.0));
        assert_eq!(rendered["properties"]["confidence"]["maximum"], json!(1.0));
        assert_eq!(
            rendered["required"],
            json!(["value", "confidence", "reasoning"])
        );
    }

    #[test]
    fn plain_object_is_not_confident_shape() {
        let schema = JsonSchema::Object {
            properties: vec![("value".to_string(), JsonSchema::string())],
            required: vec!["value".to_string()],
            description: None,
        };
        assert!(!schema.is_confident_shape());
    }

    #[test]
    fn validate_catches_extra_fields() {
        let schema = JsonSchema::Object {
            properties: vec![("a".to_string(), JsonSchema::string())],
            required: vec!["a".to_string()],
            description: None,
        };
        assert!(schema.validate(&json!({"a": "x"})).is_ok());
        assert!(schema.validate(&json!({"a": "x", "b": 1})).is_err());
        assert!(schema.validate(&json!({})).is_err());
    }

    #[test]
    fn validate_annotations() {
        let mut meta = SchemaMeta::default();
        meta.min_length = Some(2);
        meta.pattern = Some("^[a-z]+$".to_string());
        let schema = JsonSchema::String(meta);

        assert!(schema.validate(&json!("abc")).is_ok());
        assert!(schema.validate(&json!("a")).is_err());
        assert!(schema.validate(&json!("ABC")).is_err());
    }

    #[test]
    fn validate_any_of() {
        let schema = JsonSchema::optional(JsonSchema::integer());
        assert!(schema.validate(&json!(3)).is_ok());
        assert!(schema.validate(&json!(null)).is_ok());
        assert!(schema.validate(&json!("x")).is_err());
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"d": 2, "c": 3}});
        let b = json!({"a": {"c": 3, "d": 2}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }
}
