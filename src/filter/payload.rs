//! JSON typing and dotted-path access for SET and IS directives.

use std::fmt;

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// The six JSON value kinds, as named in directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonType {
    Null,
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl JsonType {
    pub const ALL: [JsonType; 6] = [
        JsonType::Null,
        JsonType::String,
        JsonType::Number,
        JsonType::Boolean,
        JsonType::Object,
        JsonType::Array,
    ];

    /// Parses a type keyword (case-insensitive).
    pub fn parse(word: &str) -> Option<Self> {
        JsonType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(word))
    }

    /// Classifies a value. An absent value is `Null`.
    pub fn of(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => JsonType::Null,
            Some(Value::String(_)) => JsonType::String,
            Some(Value::Number(_)) => JsonType::Number,
            Some(Value::Bool(_)) => JsonType::Boolean,
            Some(Value::Object(_)) => JsonType::Object,
            Some(Value::Array(_)) => JsonType::Array,
        }
    }

    /// Infers the type a SET without an explicit type gives its text.
    pub fn infer(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed {
            "true" | "false" => JsonType::Boolean,
            "null" => JsonType::Null,
            _ if trimmed.starts_with('{') && trimmed.ends_with('}') => JsonType::Object,
            _ if trimmed.starts_with('[') && trimmed.ends_with(']') => JsonType::Array,
            _ if is_numeric(trimmed) => JsonType::Number,
            _ => JsonType::String,
        }
    }

    /// Converts `text` into a value of this type.
    pub fn convert(self, text: &str) -> Result<Value, ConversionError> {
        let mismatch = || ConversionError {
            text: text.to_string(),
            target: self,
        };
        match self {
            JsonType::String => Ok(Value::String(text.to_string())),
            JsonType::Null => Ok(Value::Null),
            JsonType::Boolean => match text.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            JsonType::Number => {
                let trimmed = text.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    return Ok(Value::Number(i.into()));
                }
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(mismatch)
            }
            JsonType::Object => match serde_json::from_str(text) {
                Ok(value @ Value::Object(_)) => Ok(value),
                _ => Err(mismatch()),
            },
            JsonType::Array => match serde_json::from_str(text) {
                Ok(value @ Value::Array(_)) => Ok(value),
                _ => Err(mismatch()),
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Boolean => "boolean",
            JsonType::Object => "object",
            JsonType::Array => "array",
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `-?\d+(\.\d+)?`
fn is_numeric(text: &str) -> bool {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let (int, frac) = match digits.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (digits, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    all_digits(int) && frac.is_none_or(all_digits)
}

/// Text that cannot be converted to the requested type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot convert {text:?} to {target}")]
pub struct ConversionError {
    pub text: String,
    pub target: JsonType,
}

/// A write through a path whose intermediate segment is not an object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{segment} in {path} is not an object")]
pub struct PathError {
    pub path: String,
    pub segment: String,
}

/// Looks up a dotted path in an object. Intermediate segments must be objects.
pub fn get_path<'v>(root: &'v Map<String, Value>, path: &str) -> Option<&'v Value> {
    let mut segments = path.split('.');
    let mut current = root.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Looks up a dotted path below a value.
pub fn get_below<'v>(value: &'v Value, rest: &str) -> Option<&'v Value> {
    rest.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// Stores `value` at a dotted path, creating missing intermediate objects.
pub fn set_path(root: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), PathError> {
    let (parents, key) = match path.rsplit_once('.') {
        Some((parents, key)) => (Some(parents), key),
        None => (None, path),
    };
    let mut current = root;
    for segment in parents.into_iter().flat_map(|p| p.split('.')) {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = slot.as_object_mut().ok_or_else(|| PathError {
            path: path.to_string(),
            segment: segment.to_string(),
        })?;
    }
    current.insert(key.to_string(), value);
    Ok(())
}
