//! Structured output parsing for planner/ranker LLM replies
//!
//! One policy for every call site: decode the raw text as JSON directly; if
//! that fails, dig a JSON value out of the text (code fences, surrounding
//! prose), coerce it towards the schema and validate it; otherwise fail.

use crate::error::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("valid fence regex"));

/// JSON schema sent to the model as `response_format` and used to validate its reply
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredSchema {
    pub name: String,
    pub schema: Value,
}

impl StructuredSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self { name: name.into(), schema }
    }

    /// `{ "<key>": [string, ...] }` with item-count bounds
    pub fn string_list(name: &str, key: &str, min_items: usize, max_items: Option<usize>) -> Self {
        let mut array = json!({
            "type": "array",
            "items": { "type": "string" },
            "minItems": min_items
        });
        if let Some(max) = max_items {
            array["maxItems"] = json!(max);
        }
        Self::new(
            name,
            json!({
                "type": "object",
                "properties": { key: array },
                "required": [key]
            }),
        )
    }

    /// The single required array property, if the schema is an object wrapper around one list
    fn wrapped_array_key(&self) -> Option<&str> {
        if self.schema.get("type").and_then(Value::as_str) != Some("object") {
            return None;
        }
        let required = self.schema.get("required")?.as_array()?;
        if required.len() != 1 {
            return None;
        }
        let key = required[0].as_str()?;
        let prop_type = self.schema.get("properties")?.get(key)?.get("type")?.as_str()?;
        (prop_type == "array").then_some(key)
    }
}

/// Parse raw LLM text into `T` following the direct-JSON-then-schema policy
pub fn parse_structured_output<T: DeserializeOwned>(
    raw: &str,
    schema: &StructuredSchema,
) -> Result<T, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    // Direct decode
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if validate(&value, &schema.schema, "$").is_ok() {
            if let Ok(parsed) = serde_json::from_value::<T>(value) {
                return Ok(parsed);
            }
        }
    }

    // Schema-guided fallback
    let candidates = extract_json_candidates(trimmed);
    if candidates.is_empty() {
        return Err(ParseError::NoJson);
    }

    let mut last_error = ParseError::NoJson;
    for candidate in candidates {
        let value = coerce_to_schema(candidate, schema);
        if let Err(reason) = validate(&value, &schema.schema, "$") {
            last_error = ParseError::SchemaMismatch {
                schema: schema.name.clone(),
                reason,
            };
            continue;
        }
        match serde_json::from_value::<T>(value) {
            Ok(parsed) => return Ok(parsed),
            Err(e) => last_error = ParseError::Deserialize(e.to_string()),
        }
    }

    Err(last_error)
}

/// Pull every plausible JSON value out of free-form text, most specific first
fn extract_json_candidates(text: &str) -> Vec<Value> {
    let mut slices: Vec<&str> = CODE_FENCE
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim()))
        .collect();

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                slices.push(&text[start..=end]);
            }
        }
    }
    slices.push(text);

    slices
        .into_iter()
        .filter_map(|s| serde_json::from_str::<Value>(s).ok())
        .collect()
}

/// Wrap a bare array into `{key: [...]}` when the schema expects that wrapper
fn coerce_to_schema(value: Value, schema: &StructuredSchema) -> Value {
    match schema.wrapped_array_key() {
        Some(key) if value.is_array() => json!({ key: value }),
        _ => value,
    }
}

/// Minimal JSON-schema check: type, required, properties, items, minItems, maxItems
fn validate(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        let matches = match expected {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "null" => value.is_null(),
            _ => true,
        };
        if !matches {
            return Err(format!("{} should be of type {}", path, expected));
        }
    }

    if let Some(object) = value.as_object() {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    return Err(format!("{} is missing required field '{}'", path, key));
                }
            }
        }
        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, prop_schema) in properties {
                if let Some(child) = object.get(key) {
                    validate(child, prop_schema, &format!("{}.{}", path, key))?;
                }
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                return Err(format!("{} needs at least {} items, got {}", path, min, items.len()));
            }
        }
        if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
            if (items.len() as u64) > max {
                return Err(format!("{} allows at most {} items, got {}", path, max, items.len()));
            }
        }
        if let Some(item_schema) = schema.get("items") {
            for (i, item) in items.iter().enumerate() {
                validate(item, item_schema, &format!("{}[{}]", path, i))?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Ranking {
        agents: Vec<String>,
    }

    fn ranking_schema() -> StructuredSchema {
        StructuredSchema::string_list("agent_ranking", "agents", 1, Some(3))
    }

    #[test]
    fn test_direct_json() {
        let parsed: Ranking = parse_structured_output(r#"{"agents": ["crypto_data"]}"#, &ranking_schema()).unwrap();
        assert_eq!(parsed.agents, vec!["crypto_data"]);
    }

    #[test]
    fn test_fenced_json_with_prose() {
        let raw = "Sure! Here is the ranking:\n```json\n{\"agents\": [\"news_agent\", \"default\"]}\n```\nHope that helps.";
        let parsed: Ranking = parse_structured_output(raw, &ranking_schema()).unwrap();
        assert_eq!(parsed.agents, vec!["news_agent", "default"]);
    }

    #[test]
    fn test_bare_array_is_wrapped() {
        let parsed: Ranking = parse_structured_output(r#"["a", "b"]"#, &ranking_schema()).unwrap();
        assert_eq!(parsed.agents, vec!["a", "b"]);
    }

    #[test]
    fn test_empty_input() {
        let result: Result<Ranking, _> = parse_structured_output("   ", &ranking_schema());
        assert_eq!(result, Err(ParseError::Empty));
    }

    #[test]
    fn test_no_json_at_all() {
        let result: Result<Ranking, _> = parse_structured_output("I think crypto_data fits best", &ranking_schema());
        assert_eq!(result, Err(ParseError::NoJson));
    }

    #[test]
    fn test_schema_mismatch_too_many_items() {
        let result: Result<Ranking, _> =
            parse_structured_output(r#"{"agents": ["a", "b", "c", "d"]}"#, &ranking_schema());
        assert!(matches!(result, Err(ParseError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_schema_mismatch_wrong_item_type() {
        let result: Result<Ranking, _> = parse_structured_output(r#"{"agents": [1, 2]}"#, &ranking_schema());
        match result {
            Err(ParseError::SchemaMismatch { reason, .. }) => assert!(reason.contains("$.agents[0]")),
            other => panic!("expected schema mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_object_schema() {
        #[derive(Debug, Deserialize)]
        struct Assignment {
            subtask: String,
            agents: Vec<String>,
        }
        #[derive(Debug, Deserialize)]
        struct Plan {
            assignments: Vec<Assignment>,
        }

        let schema = StructuredSchema::new(
            "assignments",
            json!({
                "type": "object",
                "properties": {
                    "assignments": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "subtask": {"type": "string"},
                                "agents": {"type": "array", "items": {"type": "string"}}
                            },
                            "required": ["subtask", "agents"]
                        }
                    }
                },
                "required": ["assignments"]
            }),
        );

        let raw = r#"Plan: {"assignments": [{"subtask": "Get BTC price", "agents": ["crypto_data"]}]}"#;
        let plan: Plan = parse_structured_output(raw, &schema).unwrap();
        assert_eq!(plan.assignments[0].subtask, "Get BTC price");
        assert_eq!(plan.assignments[0].agents, vec!["crypto_data"]);

        let missing = r#"{"assignments": [{"subtask": "x"}]}"#;
        let result: Result<Plan, _> = parse_structured_output(missing, &schema);
        assert!(matches!(result, Err(ParseError::SchemaMismatch { .. })));
    }
}
