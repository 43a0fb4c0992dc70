//! Strict JSON schemas for structured outputs, derived from Rust types.
//!
//! `schemars` produces draft-07 schemas with a `definitions` table and `$ref`
//! pointers. Strict structured output wants something narrower: every object
//! closed with `additionalProperties: false`, every property listed in
//! `required` (optional fields stay nullable through their type), and no
//! references. [`StructuredOutput::strict_schema`] performs that rewrite.

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

const DEFINITIONS_PREFIX: &str = "#/definitions/";

/// Types that can be requested as strict structured output.
///
/// Blanket-implemented for everything that is `JsonSchema + DeserializeOwned`.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// Strict-mode schema for this type.
    fn strict_schema() -> Value {
        let mut root = serde_json::to_value(schema_for!(Self)).unwrap_or_default();
        let definitions = match &mut root {
            Value::Object(map) => {
                map.remove("$schema");
                map.remove("definitions")
            }
            _ => None,
        }
        .unwrap_or(Value::Null);

        rewrite_strict(&mut root, &definitions, 0);
        root
    }

    /// Schema name, used as the `json_schema.name` of the request.
    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

// Recursive types would expand forever; statement schemas are shallow.
const MAX_DEPTH: usize = 32;

fn rewrite_strict(value: &mut Value, definitions: &Value, depth: usize) {
    if depth > MAX_DEPTH {
        return;
    }

    match value {
        Value::Object(map) => {
            flatten_single_all_of(map);
            if let Some(target) = referenced_definition(map, definitions) {
                *value = target;
                rewrite_strict(value, definitions, depth + 1);
                return;
            }

            close_object(map);
            for child in map.values_mut() {
                rewrite_strict(child, definitions, depth + 1);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_strict(item, definitions, depth + 1);
            }
        }
        _ => {}
    }
}

/// schemars wraps documented `$ref` fields as `{"description", "allOf": [{"$ref"}]}`.
fn flatten_single_all_of(map: &mut Map<String, Value>) {
    let Some(Value::Array(mut parts)) = map.remove("allOf") else {
        return;
    };
    if parts.len() != 1 {
        map.insert("allOf".to_string(), Value::Array(parts));
        return;
    }
    if let Value::Object(inner) = parts.remove(0) {
        for (key, value) in inner {
            map.entry(key).or_insert(value);
        }
    }
}

fn referenced_definition(map: &Map<String, Value>, definitions: &Value) -> Option<Value> {
    let pointer = map.get("$ref")?.as_str()?;
    let name = pointer.strip_prefix(DEFINITIONS_PREFIX)?;
    definitions.get(name).cloned()
}

fn close_object(map: &mut Map<String, Value>) {
    if map.get("type").and_then(Value::as_str) != Some("object") {
        return;
    }

    map.insert("additionalProperties".to_string(), Value::Bool(false));
    let required: Vec<Value> = map
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().map(Value::String).collect())
        .unwrap_or_default();
    map.insert("required".to_string(), Value::Array(required));
}
