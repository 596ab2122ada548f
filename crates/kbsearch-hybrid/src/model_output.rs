//! Helpers for pulling JSON out of free-form model replies.

use serde_json::Value;

use kbsearch_core::{Error, Result};

/// Returns the body of the first Markdown code fence, or the trimmed text when there is none.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[start + 3..];
    // skip the info string (e.g. `json`) on the opening fence line
    let body = match after.find('\n') {
        Some(nl) => &after[nl + 1..],
        None => after,
    };
    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Parses a model reply as JSON, tolerating code fences and prose around the value.
pub fn parse_json_value(text: &str) -> Result<Value> {
    let body = strip_code_fence(text);
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        return Ok(v);
    }
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(s), Some(e)) = (body.find(open), body.rfind(close)) {
            if s < e {
                if let Ok(v) = serde_json::from_str::<Value>(&body[s..=e]) {
                    return Ok(v);
                }
            }
        }
    }
    let preview: String = body.chars().take(120).collect();
    Err(Error::Parse(format!("no JSON value in model reply: {preview}")))
}

/// Reads a number that a model may have written as a JSON number or a numeric string.
pub fn lenient_f32(v: &Value) -> Option<f32> {
    match v {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|f: &f32| f.is_finite())
}

/// Reads an identifier written as a string or a number.
pub fn lenient_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let reply = "Here you go:\n```json\n{\"type\": \"rule\"}\n```\nthanks";
        assert_eq!(strip_code_fence(reply), "{\"type\": \"rule\"}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn finds_json_inside_prose() {
        let v = parse_json_value("The scores are [{\"id\": \"c1\", \"score\": 0.9}] as requested.").unwrap();
        assert!(v.is_array());
        assert!(parse_json_value("no json here").is_err());
    }

    #[test]
    fn lenient_readers() {
        assert_eq!(lenient_f32(&serde_json::json!("0.75")), Some(0.75));
        assert_eq!(lenient_f32(&serde_json::json!(1)), Some(1.0));
        assert_eq!(lenient_f32(&serde_json::json!(null)), None);
        assert_eq!(lenient_id(&serde_json::json!(3)), Some("3".to_string()));
    }
}
