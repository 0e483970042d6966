//! Template interpolation for node data
//!
//! Every string inside a node's `data` may contain `${ ... }` holes. Holes
//! are evaluated against the current state and replaced by the string form
//! of the result (objects and arrays stringify as JSON). `$${literal}`
//! escapes a hole: it renders as `${literal}` and is never evaluated.
//!
//! Interpolation runs once per node entry, before dispatch, and is skipped
//! for `context_variable` / `context_constant` nodes, whose literal value
//! is the intended payload.

use crate::error::{EngineError, Result};
use crate::expr::{evaluate_str, value_to_string, NameResolver};
use crate::payload::NodeData;
use serde_json::Value;

/// Interpolate every template hole in a string.
pub fn interpolate_string(input: &str, scope: &dyn NameResolver) -> Result<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        // Escape: `$${...}` renders the hole literally.
        if chars[i] == '$'
            && chars.get(i + 1) == Some(&'$')
            && chars.get(i + 2) == Some(&'{')
        {
            let end = find_hole_end(&chars, i + 3)?;
            out.push_str("${");
            out.extend(&chars[i + 3..end]);
            out.push('}');
            i = end + 1;
            continue;
        }
        if chars[i] == '$' && chars.get(i + 1) == Some(&'{') {
            let end = find_hole_end(&chars, i + 2)?;
            let expr: String = chars[i + 2..end].iter().collect();
            let value = evaluate_str(expr.trim(), scope)?;
            out.push_str(&value_to_string(&value));
            i = end + 1;
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }

    Ok(out)
}

/// Find the index of the `}` closing a hole opened before `start`.
///
/// Tracks brace depth and quoted strings so `${at(xs, 0)}` and
/// `${"a}b"}` both terminate where the author intended.
fn find_hole_end(chars: &[char], start: usize) -> Result<usize> {
    let mut depth = 1usize;
    let mut in_string: Option<char> = None;
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        match in_string {
            Some(quote) => {
                if c == '\\' {
                    i += 1;
                } else if c == quote {
                    in_string = None;
                }
            }
            None => match c {
                '"' | '\'' => in_string = Some(c),
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    Err(EngineError::ExprParse(
        "unterminated ${...} template hole".to_string(),
    ))
}

/// Interpolate every string nested anywhere inside a JSON value.
pub fn interpolate_value(value: &Value, scope: &dyn NameResolver) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(interpolate_string(s, scope)?)),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(interpolate_value(item, scope)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, item) in map {
                out.insert(key.clone(), interpolate_value(item, scope)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Interpolate all string-bearing fields of a node's data.
///
/// Round-trips through `serde_json::Value` so that strings nested inside
/// `body`, `fallback_value`, `cases`, and header maps are all covered by
/// one traversal.
pub fn interpolate_data(data: &NodeData, scope: &dyn NameResolver) -> Result<NodeData> {
    let raw = serde_json::to_value(data).map_err(|e| {
        EngineError::ExprRuntime(format!("node data failed to serialize: {}", e))
    })?;
    let interpolated = interpolate_value(&raw, scope)?;
    serde_json::from_value(interpolated).map_err(|e| {
        EngineError::ExprRuntime(format!("interpolated data failed to deserialize: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Bindings;
    use serde_json::json;

    #[test]
    fn test_simple_hole() {
        let scope = Bindings::new().bind("name", json!("ada"));
        assert_eq!(
            interpolate_string("hello ${name}!", &scope).unwrap(),
            "hello ada!"
        );
    }

    #[test]
    fn test_expression_hole() {
        let scope = Bindings::new().bind("n", json!(4));
        assert_eq!(
            interpolate_string("${n * 2 + 1}", &scope).unwrap(),
            "9"
        );
    }

    #[test]
    fn test_object_stringifies_as_json() {
        let scope = Bindings::new().bind("obj", json!({"a": 1}));
        assert_eq!(
            interpolate_string("payload=${obj}", &scope).unwrap(),
            r#"payload={"a":1}"#
        );
    }

    #[test]
    fn test_escape_renders_literally() {
        let scope = Bindings::new();
        assert_eq!(
            interpolate_string("cost is $${price}", &scope).unwrap(),
            "cost is ${price}"
        );
        // The escaped hole must not be evaluated even when the name exists.
        let scope = Bindings::new().bind("price", json!(5));
        assert_eq!(
            interpolate_string("$${price} vs ${price}", &scope).unwrap(),
            "${price} vs 5"
        );
    }

    #[test]
    fn test_nested_braces_and_strings() {
        let scope = Bindings::new().bind("xs", json!(["a", "b"]));
        assert_eq!(
            interpolate_string("${at(xs, 1)}", &scope).unwrap(),
            "b"
        );
        assert_eq!(
            interpolate_string("${'}' + 'x'}", &scope).unwrap(),
            "}x"
        );
    }

    #[test]
    fn test_unterminated_hole_rejected() {
        let scope = Bindings::new();
        assert!(interpolate_string("${oops", &scope).is_err());
    }

    #[test]
    fn test_interpolate_data_reaches_nested_strings() {
        let scope = Bindings::new().bind("host", json!("example.com"));
        let data: NodeData = serde_json::from_value(json!({
            "url": "https://${host}/api",
            "body": {"target": "${host}", "n": 3}
        }))
        .unwrap();
        let out = interpolate_data(&data, &scope).unwrap();
        assert_eq!(out.url.as_deref(), Some("https://example.com/api"));
        assert_eq!(out.body.unwrap()["target"], json!("example.com"));
    }

    #[test]
    fn test_no_holes_is_identity() {
        let scope = Bindings::new();
        assert_eq!(
            interpolate_string("plain text", &scope).unwrap(),
            "plain text"
        );
    }
}
