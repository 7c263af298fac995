// ABOUTME: Validation of generation replies into file sets
// ABOUTME: Rejects anything that is not exactly one JSON object of path to string content

use crate::client::GenerationError;
use serde::de::{self, Deserialize, Deserializer, IgnoredAny, MapAccess, Visitor};
use serde_json::Value;
use shipyard_core::{FileSetLimits, GeneratedFileSet};
use std::collections::HashSet;
use std::fmt;
use tracing::warn;

/// Succeeds only for a JSON object in which no key repeats
struct DistinctKeys;

impl<'de> Deserialize<'de> for DistinctKeys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeysVisitor;

        impl<'de> Visitor<'de> for KeysVisitor {
            type Value = DistinctKeys;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<DistinctKeys, A::Error> {
                let mut seen = HashSet::new();
                while let Some(key) = map.next_key::<String>()? {
                    if seen.contains(&key) {
                        return Err(de::Error::custom(format!(
                            "file '{}' appears more than once",
                            key
                        )));
                    }
                    map.next_value::<IgnoredAny>()?;
                    seen.insert(key);
                }
                Ok(DistinctKeys)
            }
        }

        deserializer.deserialize_map(KeysVisitor)
    }
}

/// Strip one surrounding markdown code fence (```json ... ```) if present
pub fn strip_code_fence(text: &str) -> &str {
    let cleaned = text.trim();
    if !cleaned.starts_with("```") {
        return cleaned;
    }

    // Content starts after the first newline of the opening fence
    let start = match cleaned.find('\n') {
        Some(i) => i + 1,
        None => return cleaned,
    };

    // Search for the closing fence after the opening one
    let end = cleaned[start..]
        .rfind("```")
        .map(|i| i + start)
        .unwrap_or(cleaned.len());

    cleaned[start..end].trim()
}

/// Parse the model's reply text into a validated file set.
///
/// The text (after fence stripping) must be a single JSON object whose
/// values are all strings and whose keys are distinct. Paths are validated
/// and the file-count and byte limits are enforced. Nothing partially parsed
/// is ever returned.
pub fn parse_file_set(
    text: &str,
    limits: &FileSetLimits,
) -> Result<GeneratedFileSet, GenerationError> {
    let json_text = strip_code_fence(text);

    let value: Value = serde_json::from_str(json_text).map_err(|e| {
        warn!(
            "Generation reply is not valid JSON: {}. Snippet: {}",
            e,
            snippet(json_text)
        );
        GenerationError::MalformedResponse(format!("reply is not valid JSON: {}", e))
    })?;

    let Value::Object(map) = value else {
        return Err(GenerationError::MalformedResponse(
            "reply must be a JSON object mapping file paths to contents".to_string(),
        ));
    };

    // `Value` keeps only the last of repeated keys, so check the raw text
    serde_json::from_str::<DistinctKeys>(json_text)
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

    let mut entries = Vec::with_capacity(map.len());
    for (path, contents) in map {
        match contents {
            Value::String(text) => entries.push((path, text)),
            other => {
                return Err(GenerationError::MalformedResponse(format!(
                    "content for '{}' must be a string, got {}",
                    path,
                    json_type_name(&other)
                )))
            }
        }
    }

    GeneratedFileSet::from_entries(entries, limits)
        .map_err(|e| GenerationError::MalformedResponse(e.to_string()))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub(crate) fn snippet(text: &str) -> &str {
    let mut end = text.len().min(200);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
