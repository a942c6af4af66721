use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a stage expects the oracle to answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputShape {
    Text,
    Integer,
    List,
    Object,
}

impl fmt::Display for OutputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputShape::Text => write!(f, "text"),
            OutputShape::Integer => write!(f, "integer"),
            OutputShape::List => write!(f, "list"),
            OutputShape::Object => write!(f, "object"),
        }
    }
}

/// One oracle answer, typed once at the vote boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum OracleOutput {
    /// `None`, `null` or nothing at all.
    Empty,
    /// A string or number.
    Scalar(Value),
    /// A JSON array or object.
    Structured(Value),
    /// Text that did not conform to the expected shape.
    Invalid(String),
}

impl OracleOutput {
    /// Parse raw oracle text against the expected shape.
    ///
    /// Backticks are removed and a leading `json` fence tag dropped before
    /// anything else. Never fails: non-conforming text becomes `Invalid`.
    pub fn parse(raw: &str, shape: OutputShape) -> Self {
        let text = clean(raw);
        if text.is_empty() || text == "None" || text == "null" {
            return OracleOutput::Empty;
        }

        match shape {
            OutputShape::Text => OracleOutput::Scalar(Value::String(text.to_string())),
            OutputShape::Integer => match parse_integer(text) {
                Some(n) => OracleOutput::Scalar(Value::from(n)),
                None => OracleOutput::Invalid(text.to_string()),
            },
            OutputShape::List => match parse_literal(text) {
                Some(v @ Value::Array(_)) => OracleOutput::Structured(v),
                _ => OracleOutput::Invalid(text.to_string()),
            },
            OutputShape::Object => match parse_literal(text) {
                Some(v @ Value::Object(_)) => OracleOutput::Structured(v),
                _ => OracleOutput::Invalid(text.to_string()),
            },
        }
    }

    /// Form used for vote equality.
    ///
    /// Structured values and any text that parses as a JSON container are
    /// compacted, so a list and its string rendering count as one vote.
    pub fn canonical(&self) -> String {
        match self {
            OracleOutput::Empty => "None".to_string(),
            OracleOutput::Scalar(Value::String(s)) | OracleOutput::Invalid(s) => {
                match serde_json::from_str::<Value>(s) {
                    Ok(v @ (Value::Array(_) | Value::Object(_))) => v.to_string(),
                    _ => s.clone(),
                }
            }
            OracleOutput::Scalar(v) | OracleOutput::Structured(v) => v.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, OracleOutput::Empty)
    }

    pub fn conforms_to(&self, shape: OutputShape) -> bool {
        match (self, shape) {
            (OracleOutput::Scalar(Value::String(_)), OutputShape::Text) => true,
            (OracleOutput::Scalar(v), OutputShape::Integer) => v.as_i64().is_some(),
            (OracleOutput::Structured(Value::Array(_)), OutputShape::List) => true,
            (OracleOutput::Structured(Value::Object(_)), OutputShape::Object) => true,
            _ => false,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            OracleOutput::Scalar(v) => v.as_i64(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&serde_json::Map<String, Value>> {
        match self {
            OracleOutput::Structured(v) => v.as_object(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            OracleOutput::Structured(v) => v.as_array(),
            _ => None,
        }
    }
}

impl fmt::Display for OracleOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

fn clean(raw: &str) -> &str {
    let trimmed = raw.trim().trim_matches('`').trim();
    match trimmed.strip_prefix("json") {
        Some(rest) => rest.trim(),
        None => trimmed,
    }
}

fn parse_integer(text: &str) -> Option<i64> {
    let value = parse_literal(text).unwrap_or_else(|| Value::String(text.to_string()));
    let number = match value {
        Value::Number(n) => n,
        Value::String(s) => {
            let s = s.trim().replace(',', "");
            if let Ok(n) = s.parse::<i64>() {
                return Some(n);
            }
            let f = s.parse::<f64>().ok()?;
            return finite_trunc(f);
        }
        _ => return None,
    };
    number.as_i64().or_else(|| number.as_f64().and_then(finite_trunc))
}

fn finite_trunc(f: f64) -> Option<i64> {
    (f.is_finite() && f.abs() < i64::MAX as f64).then(|| f.trunc() as i64)
}

/// JSON first, then a single-quoted literal such as `['a', 'b']`.
fn parse_literal(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Some(v);
    }
    if text.contains('\'') {
        let swapped = swap_quotes(text);
        if let Ok(v) = serde_json::from_str::<Value>(&swapped) {
            return Some(v);
        }
    }
    None
}

/// Turn single-quoted strings into double-quoted ones, escaping any double
/// quotes they contain.
fn swap_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for c in text.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                out.push(c);
                escaped = true;
            }
            '\'' if !in_double => {
                in_single = !in_single;
                out.push('"');
            }
            '"' if in_single => out.push_str("\\\""),
            '"' => {
                in_double = !in_double;
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_markers() {
        for raw in ["", "  ", "None", "null", "``` ```", "```json\nnull\n```"] {
            assert_eq!(OracleOutput::parse(raw, OutputShape::Integer), OracleOutput::Empty);
        }
    }

    #[test]
    fn integers_from_strings_and_floats() {
        assert_eq!(OracleOutput::parse("1000", OutputShape::Integer).as_i64(), Some(1000));
        assert_eq!(OracleOutput::parse("`1000`", OutputShape::Integer).as_i64(), Some(1000));
        assert_eq!(OracleOutput::parse("1000.0", OutputShape::Integer).as_i64(), Some(1000));
        assert_eq!(OracleOutput::parse("\"3\"", OutputShape::Integer).as_i64(), Some(3));
        assert_eq!(OracleOutput::parse("1,000,000", OutputShape::Integer).as_i64(), Some(1_000_000));
        assert_eq!(
            OracleOutput::parse("thousands", OutputShape::Integer),
            OracleOutput::Invalid("thousands".into())
        );
    }

    #[test]
    fn objects_with_fence_and_single_quotes() {
        let raw = "```json\n{\"assets\": {\"cash\": \"12\"}}\n```";
        let out = OracleOutput::parse(raw, OutputShape::Object);
        assert_eq!(out, OracleOutput::Structured(json!({"assets": {"cash": "12"}})));

        let out = OracleOutput::parse("{'a': ['b', \"it's\"]}", OutputShape::Object);
        assert_eq!(out, OracleOutput::Structured(json!({"a": ["b", "it's"]})));

        let out = OracleOutput::parse("['x', 'say \"hi\"']", OutputShape::List);
        assert_eq!(out, OracleOutput::Structured(json!(["x", "say \"hi\""])));
    }

    #[test]
    fn wrong_container_is_invalid() {
        let out = OracleOutput::parse("[1, 2]", OutputShape::Object);
        assert_eq!(out, OracleOutput::Invalid("[1, 2]".into()));
        assert!(!out.conforms_to(OutputShape::Object));
    }

    #[test]
    fn canonical_form_unifies_list_and_its_text() {
        let list = OracleOutput::Structured(json!(["a", "b"]));
        let text = OracleOutput::Scalar(Value::String("[\"a\", \"b\"]".into()));
        let invalid = OracleOutput::Invalid("[\"a\",   \"b\"]".into());
        assert_eq!(list.canonical(), text.canonical());
        assert_eq!(list.canonical(), invalid.canonical());
        assert_eq!(OracleOutput::Empty.canonical(), "None");
        assert_eq!(OracleOutput::Scalar(json!(7)).canonical(), "7");
    }

    #[test]
    fn conformance() {
        assert!(OracleOutput::Scalar(json!(3)).conforms_to(OutputShape::Integer));
        assert!(!OracleOutput::Scalar(json!("3")).conforms_to(OutputShape::Integer));
        assert!(OracleOutput::Scalar(json!("x")).conforms_to(OutputShape::Text));
        assert!(!OracleOutput::Empty.conforms_to(OutputShape::Text));
        assert!(OracleOutput::Structured(json!([])).conforms_to(OutputShape::List));
    }
}
