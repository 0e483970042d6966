//! Tree evaluator for parsed expressions
//!
//! The evaluator is pure: it reads names through a [`NameResolver`] and
//! never mutates anything. State writes happen only through the dedicated
//! node types (`variable`, `counter`, `accumulator`).
//!
//! # Semantics
//!
//! - Truthiness: `null`, `false`, `0`, and `""` are falsy; everything else
//!   (including empty arrays and objects) is truthy.
//! - `&&` / `||` short-circuit and yield the deciding operand, so
//!   `missing ?? "default"` and `flag || fallback` compose naturally.
//! - `==` / `!=` are deep JSON equality with numbers compared as f64.
//! - Arithmetic is IEEE-754 double; integral results render as integers.
//! - Division or modulo by zero and out-of-range indexing are
//!   `ExprRuntime` errors; unknown identifiers and functions are
//!   `ExprUnknownName`.

use super::parser::{number_value, parse, BinaryOp, Expr, UnaryOp};
use crate::error::{EngineError, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Resolves bare identifiers during evaluation.
///
/// The engine implements this over the scoped state (branch → workflow →
/// global); executors layer extra bindings (`item`, `accum`, `value`, ...)
/// on top with [`Bindings`].
pub trait NameResolver {
    fn resolve(&self, name: &str) -> Option<Value>;
}

/// Empty resolver for contexts with no ambient state.
pub struct NoBindings;

impl NameResolver for NoBindings {
    fn resolve(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// A map of local bindings layered over an optional parent resolver.
pub struct Bindings<'a> {
    map: HashMap<String, Value>,
    parent: Option<&'a dyn NameResolver>,
}

impl<'a> Bindings<'a> {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            parent: None,
        }
    }

    pub fn over(parent: &'a dyn NameResolver) -> Self {
        Self {
            map: HashMap::new(),
            parent: Some(parent),
        }
    }

    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.map.insert(name.into(), value);
        self
    }
}

impl Default for Bindings<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl NameResolver for Bindings<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.map
            .get(name)
            .cloned()
            .or_else(|| self.parent.and_then(|p| p.resolve(name)))
    }
}

/// Parse and evaluate an expression string in one step.
pub fn evaluate_str(input: &str, scope: &dyn NameResolver) -> Result<Value> {
    evaluate(&parse(input)?, scope)
}

/// Spec truthiness: null, false, 0, and "" are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// The string form of a value, as used by template interpolation and
/// `toString`: strings are unquoted, integral numbers drop the fraction,
/// objects and arrays render as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else {
                n.to_string()
            }
        }
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "null".to_string()),
    }
}

/// Evaluate a parsed expression tree.
pub fn evaluate(expr: &Expr, scope: &dyn NameResolver) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => scope
            .resolve(name)
            .ok_or_else(|| EngineError::ExprUnknownName(name.clone())),
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => match value.as_f64() {
                    Some(n) => Ok(number_value(-n)),
                    None => Err(EngineError::ExprTypeMismatch(format!(
                        "cannot negate {}",
                        type_name(&value)
                    ))),
                },
            }
        }
        Expr::Binary { op, lhs, rhs } => evaluate_binary(op, lhs, rhs, scope),
        Expr::Call { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, scope)?);
            }
            call_builtin(name, &values)
        }
        Expr::Member { object, field } => {
            let value = evaluate(object, scope)?;
            match &value {
                Value::Object(map) => map.get(field).cloned().ok_or_else(|| {
                    EngineError::ExprRuntime(format!("object has no field '{}'", field))
                }),
                other => Err(EngineError::ExprTypeMismatch(format!(
                    "cannot access field '{}' on {}",
                    field,
                    type_name(other)
                ))),
            }
        }
        Expr::Index { object, index } => {
            let value = evaluate(object, scope)?;
            let idx = evaluate(index, scope)?;
            index_value(&value, &idx)
        }
    }
}

fn evaluate_binary(op: &BinaryOp, lhs: &Expr, rhs: &Expr, scope: &dyn NameResolver) -> Result<Value> {
    // Short-circuit forms first; the right operand must not be evaluated
    // when the left side decides.
    match op {
        BinaryOp::And => {
            let left = evaluate(lhs, scope)?;
            return if truthy(&left) {
                evaluate(rhs, scope)
            } else {
                Ok(left)
            };
        }
        BinaryOp::Or => {
            let left = evaluate(lhs, scope)?;
            return if truthy(&left) {
                Ok(left)
            } else {
                evaluate(rhs, scope)
            };
        }
        BinaryOp::Nullish => {
            let left = evaluate(lhs, scope)?;
            return if left.is_null() {
                evaluate(rhs, scope)
            } else {
                Ok(left)
            };
        }
        _ => {}
    }

    let left = evaluate(lhs, scope)?;
    let right = evaluate(rhs, scope)?;
    match op {
        BinaryOp::Add => match (&left, &right) {
            (Value::Number(_), Value::Number(_)) => {
                numeric_op(&left, &right, "+", |a, b| Ok(a + b))
            }
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            _ => Err(EngineError::ExprTypeMismatch(format!(
                "cannot add {} and {}",
                type_name(&left),
                type_name(&right)
            ))),
        },
        BinaryOp::Sub => numeric_op(&left, &right, "-", |a, b| Ok(a - b)),
        BinaryOp::Mul => numeric_op(&left, &right, "*", |a, b| Ok(a * b)),
        BinaryOp::Div => numeric_op(&left, &right, "/", |a, b| {
            if b == 0.0 {
                Err(EngineError::ExprRuntime("division by zero".to_string()))
            } else {
                Ok(a / b)
            }
        }),
        BinaryOp::Mod => numeric_op(&left, &right, "%", |a, b| {
            if b == 0.0 {
                Err(EngineError::ExprRuntime("modulo by zero".to_string()))
            } else {
                Ok(a % b)
            }
        }),
        BinaryOp::Eq => Ok(Value::Bool(json_eq(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!json_eq(&left, &right))),
        BinaryOp::Lt => compare(&left, &right, |ord| ord.is_lt()),
        BinaryOp::Le => compare(&left, &right, |ord| ord.is_le()),
        BinaryOp::Gt => compare(&left, &right, |ord| ord.is_gt()),
        BinaryOp::Ge => compare(&left, &right, |ord| ord.is_ge()),
        BinaryOp::And | BinaryOp::Or | BinaryOp::Nullish => unreachable!(),
    }
}

fn numeric_op(
    left: &Value,
    right: &Value,
    op: &str,
    f: impl Fn(f64, f64) -> Result<f64>,
) -> Result<Value> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok(number_value(f(a, b)?)),
        _ => Err(EngineError::ExprTypeMismatch(format!(
            "operator '{}' requires numbers, got {} and {}",
            op,
            type_name(left),
            type_name(right)
        ))),
    }
}

/// Deep equality with numeric normalization: 2 == 2.0.
fn json_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).map(|w| json_eq(v, w)).unwrap_or(false))
        }
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value, check: impl Fn(std::cmp::Ordering) -> bool) -> Result<Value> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    match ordering {
        Some(ord) => Ok(Value::Bool(check(ord))),
        None => Err(EngineError::ExprTypeMismatch(format!(
            "cannot compare {} with {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

fn index_value(value: &Value, idx: &Value) -> Result<Value> {
    match (value, idx) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n.as_f64().unwrap_or(-1.0);
            if i < 0.0 || i.fract() != 0.0 {
                return Err(EngineError::ExprRuntime(format!(
                    "invalid array index {}",
                    value_to_string(idx)
                )));
            }
            items.get(i as usize).cloned().ok_or_else(|| {
                EngineError::ExprRuntime(format!(
                    "index {} out of range for array of length {}",
                    i as usize,
                    items.len()
                ))
            })
        }
        (Value::Object(map), Value::String(key)) => map.get(key).cloned().ok_or_else(|| {
            EngineError::ExprRuntime(format!("object has no field '{}'", key))
        }),
        _ => Err(EngineError::ExprTypeMismatch(format!(
            "cannot index {} with {}",
            type_name(value),
            type_name(idx)
        ))),
    }
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

fn arity(name: &str, args: &[Value], expected: usize) -> Result<()> {
    if args.len() != expected {
        return Err(EngineError::ExprTypeMismatch(format!(
            "{}() takes {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn string_arg<'a>(name: &str, args: &'a [Value], idx: usize) -> Result<&'a str> {
    args[idx].as_str().ok_or_else(|| {
        EngineError::ExprTypeMismatch(format!(
            "{}() expects a string argument, got {}",
            name,
            type_name(&args[idx])
        ))
    })
}

fn number_arg(name: &str, args: &[Value], idx: usize) -> Result<f64> {
    args[idx].as_f64().ok_or_else(|| {
        EngineError::ExprTypeMismatch(format!(
            "{}() expects a number argument, got {}",
            name,
            type_name(&args[idx])
        ))
    })
}

/// Dispatch a built-in function call.
fn call_builtin(name: &str, args: &[Value]) -> Result<Value> {
    match name {
        // String
        "len" => {
            arity(name, args, 1)?;
            Ok(number_value(string_arg(name, args, 0)?.chars().count() as f64))
        }
        "upper" => {
            arity(name, args, 1)?;
            Ok(Value::String(string_arg(name, args, 0)?.to_uppercase()))
        }
        "lower" => {
            arity(name, args, 1)?;
            Ok(Value::String(string_arg(name, args, 0)?.to_lowercase()))
        }
        "trim" => {
            arity(name, args, 1)?;
            Ok(Value::String(string_arg(name, args, 0)?.trim().to_string()))
        }
        "split" => {
            arity(name, args, 2)?;
            let s = string_arg(name, args, 0)?;
            let sep = string_arg(name, args, 1)?;
            Ok(Value::Array(
                s.split(sep)
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            ))
        }
        "join" => {
            arity(name, args, 2)?;
            let items = args[0].as_array().ok_or_else(|| {
                EngineError::ExprTypeMismatch("join() expects an array first argument".to_string())
            })?;
            let sep = string_arg(name, args, 1)?;
            Ok(Value::String(
                items
                    .iter()
                    .map(value_to_string)
                    .collect::<Vec<_>>()
                    .join(sep),
            ))
        }
        "replace" => {
            arity(name, args, 3)?;
            let s = string_arg(name, args, 0)?;
            let from = string_arg(name, args, 1)?;
            let to = string_arg(name, args, 2)?;
            Ok(Value::String(s.replace(from, to)))
        }
        "contains" => {
            arity(name, args, 2)?;
            match &args[0] {
                Value::String(s) => {
                    Ok(Value::Bool(s.contains(string_arg(name, args, 1)?)))
                }
                Value::Array(items) => Ok(Value::Bool(items.iter().any(|v| json_eq(v, &args[1])))),
                other => Err(EngineError::ExprTypeMismatch(format!(
                    "contains() expects a string or array, got {}",
                    type_name(other)
                ))),
            }
        }
        "startsWith" => {
            arity(name, args, 2)?;
            Ok(Value::Bool(
                string_arg(name, args, 0)?.starts_with(string_arg(name, args, 1)?),
            ))
        }
        "endsWith" => {
            arity(name, args, 2)?;
            Ok(Value::Bool(
                string_arg(name, args, 0)?.ends_with(string_arg(name, args, 1)?),
            ))
        }

        // Numeric
        "min" | "max" => {
            if args.is_empty() {
                return Err(EngineError::ExprTypeMismatch(format!(
                    "{}() needs at least one argument",
                    name
                )));
            }
            let mut best = number_arg(name, args, 0)?;
            for i in 1..args.len() {
                let n = number_arg(name, args, i)?;
                best = if name == "min" { best.min(n) } else { best.max(n) };
            }
            Ok(number_value(best))
        }
        "abs" => {
            arity(name, args, 1)?;
            Ok(number_value(number_arg(name, args, 0)?.abs()))
        }
        "round" => {
            arity(name, args, 1)?;
            Ok(number_value(number_arg(name, args, 0)?.round()))
        }
        "floor" => {
            arity(name, args, 1)?;
            Ok(number_value(number_arg(name, args, 0)?.floor()))
        }
        "ceil" => {
            arity(name, args, 1)?;
            Ok(number_value(number_arg(name, args, 0)?.ceil()))
        }

        // Collection
        "size" => {
            arity(name, args, 1)?;
            let n = match &args[0] {
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::String(s) => s.chars().count(),
                other => {
                    return Err(EngineError::ExprTypeMismatch(format!(
                        "size() expects a collection, got {}",
                        type_name(other)
                    )))
                }
            };
            Ok(number_value(n as f64))
        }
        "at" => {
            arity(name, args, 2)?;
            index_value(&args[0], &args[1])
        }
        "keys" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::Object(map) => Ok(Value::Array(
                    map.keys().map(|k| Value::String(k.clone())).collect(),
                )),
                other => Err(EngineError::ExprTypeMismatch(format!(
                    "keys() expects an object, got {}",
                    type_name(other)
                ))),
            }
        }
        "values" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::Object(map) => Ok(Value::Array(map.values().cloned().collect())),
                other => Err(EngineError::ExprTypeMismatch(format!(
                    "values() expects an object, got {}",
                    type_name(other)
                ))),
            }
        }

        // Type
        "toNumber" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::Number(n) => Ok(Value::Number(n.clone())),
                Value::Bool(b) => Ok(number_value(if *b { 1.0 } else { 0.0 })),
                Value::String(s) => s.trim().parse::<f64>().map(number_value).map_err(|_| {
                    EngineError::ExprRuntime(format!("cannot convert '{}' to a number", s))
                }),
                other => Err(EngineError::ExprTypeMismatch(format!(
                    "toNumber() cannot convert {}",
                    type_name(other)
                ))),
            }
        }
        "toString" => {
            arity(name, args, 1)?;
            Ok(Value::String(value_to_string(&args[0])))
        }
        "toBool" => {
            arity(name, args, 1)?;
            Ok(Value::Bool(truthy(&args[0])))
        }
        "typeof" => {
            arity(name, args, 1)?;
            Ok(Value::String(type_name(&args[0]).to_string()))
        }

        _ => Err(EngineError::ExprUnknownName(format!("{}()", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(input: &str) -> Result<Value> {
        evaluate_str(input, &NoBindings)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), json!(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), json!(9));
        assert_eq!(eval("10 / 4").unwrap(), json!(2.5));
        assert_eq!(eval("7 % 3").unwrap(), json!(1));
        assert_eq!(eval("-3 + 1").unwrap(), json!(-2));
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval("1 / 0").unwrap_err();
        assert!(matches!(err, EngineError::ExprRuntime(_)));
    }

    #[test]
    fn test_string_concat_and_mismatch() {
        assert_eq!(eval("'a' + 'b'").unwrap(), json!("ab"));
        assert!(matches!(
            eval("'a' + 1").unwrap_err(),
            EngineError::ExprTypeMismatch(_)
        ));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("1 < 2").unwrap(), json!(true));
        assert_eq!(eval("2 <= 2").unwrap(), json!(true));
        assert_eq!(eval("'abc' < 'abd'").unwrap(), json!(true));
        assert_eq!(eval("1 == 1.0").unwrap(), json!(true));
        assert_eq!(eval("'1' == 1").unwrap(), json!(false));
    }

    #[test]
    fn test_logical_short_circuit() {
        // The right side references an unknown name; short-circuiting
        // must skip it entirely.
        assert_eq!(eval("true || missing").unwrap(), json!(true));
        assert_eq!(eval("false && missing").unwrap(), json!(false));
        assert!(matches!(
            eval("false || missing").unwrap_err(),
            EngineError::ExprUnknownName(_)
        ));
    }

    #[test]
    fn test_nullish_coalescing() {
        assert_eq!(eval("null ?? 5").unwrap(), json!(5));
        assert_eq!(eval("0 ?? 5").unwrap(), json!(0));
    }

    #[test]
    fn test_bindings_and_member_access() {
        let scope = Bindings::new().bind("user", json!({"name": "ada", "tags": ["a", "b"]}));
        assert_eq!(evaluate_str("user.name", &scope).unwrap(), json!("ada"));
        assert_eq!(evaluate_str("user.tags[1]", &scope).unwrap(), json!("b"));
        assert!(matches!(
            evaluate_str("user.tags[9]", &scope).unwrap_err(),
            EngineError::ExprRuntime(_)
        ));
    }

    #[test]
    fn test_unknown_identifier() {
        assert!(matches!(
            eval("nope").unwrap_err(),
            EngineError::ExprUnknownName(_)
        ));
    }

    #[test]
    fn test_string_builtins() {
        assert_eq!(eval("upper('abc')").unwrap(), json!("ABC"));
        assert_eq!(eval("len('héllo')").unwrap(), json!(5));
        assert_eq!(eval("trim('  x  ')").unwrap(), json!("x"));
        assert_eq!(eval("split('a,b,c', ',')").unwrap(), json!(["a", "b", "c"]));
        assert_eq!(eval("join(split('a,b', ','), '-')").unwrap(), json!("a-b"));
        assert_eq!(eval("replace('aaa', 'a', 'b')").unwrap(), json!("bbb"));
        assert_eq!(eval("contains('hello', 'ell')").unwrap(), json!(true));
        assert_eq!(eval("startsWith('hello', 'he')").unwrap(), json!(true));
        assert_eq!(eval("endsWith('hello', 'lo')").unwrap(), json!(true));
    }

    #[test]
    fn test_numeric_builtins() {
        assert_eq!(eval("min(3, 1, 2)").unwrap(), json!(1));
        assert_eq!(eval("max(3, 1, 2)").unwrap(), json!(3));
        assert_eq!(eval("abs(-4)").unwrap(), json!(4));
        assert_eq!(eval("round(2.5)").unwrap(), json!(3));
        assert_eq!(eval("floor(2.9)").unwrap(), json!(2));
        assert_eq!(eval("ceil(2.1)").unwrap(), json!(3));
    }

    #[test]
    fn test_collection_and_type_builtins() {
        let scope = Bindings::new().bind("obj", json!({"a": 1, "b": 2}));
        assert_eq!(evaluate_str("size(keys(obj))", &scope).unwrap(), json!(2));
        assert_eq!(eval("at(split('x,y', ','), 1)").unwrap(), json!("y"));
        assert_eq!(eval("toNumber('42')").unwrap(), json!(42));
        assert_eq!(eval("toString(42)").unwrap(), json!("42"));
        assert_eq!(eval("toBool('')").unwrap(), json!(false));
        assert_eq!(eval("typeof(null)").unwrap(), json!("null"));
        assert_eq!(eval("typeof(1)").unwrap(), json!("number"));
    }

    #[test]
    fn test_unknown_function() {
        assert!(matches!(
            eval("frobnicate(1)").unwrap_err(),
            EngineError::ExprUnknownName(_)
        ));
    }
}
