//! Expression language used in node parameters.
//!
//! Evaluation runs in two phases:
//! 1. `${name}` tokens are replaced with the string form of the bound value.
//!    Unresolved names stay as literal text.
//! 2. Known `function(args)` calls are evaluated innermost-first, rescanning
//!    after each substitution until none remain. The number of passes is
//!    capped; hitting the cap is an [`Error::Expression`].

pub mod functions;
mod scan;

use std::collections::HashMap;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

/// Default cap on function rescans per evaluation.
pub const MAX_FUNCTION_PASSES: usize = 256;

/// Name lookup used by the evaluator.
pub trait Scope {
    /// Resolve a possibly dotted name (`order.items.0.price`).
    fn lookup(&self, name: &str) -> Option<Value>;
}

impl Scope for HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.get(name) {
            return Some(value.clone());
        }
        let (head, path) = name.split_once('.')?;
        get_path_value(self.get(head)?, path)
    }
}

impl Scope for Value {
    fn lookup(&self, name: &str) -> Option<Value> {
        get_path_value(self, name)
    }
}

/// Two-phase expression evaluator.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    max_passes: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            max_passes: MAX_FUNCTION_PASSES,
        }
    }

    /// Override the rescan cap.
    pub fn with_max_passes(max_passes: usize) -> Self {
        Self {
            max_passes: max_passes.max(1),
        }
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    /// Evaluate a template to its final string.
    pub fn evaluate(&self, template: &str, scope: &dyn Scope) -> Result<String> {
        let substituted = substitute_variables(template, scope);
        self.evaluate_functions(substituted)
    }

    /// Evaluate a template and type the result: integer, then float, then
    /// boolean, then the plain string.
    pub fn evaluate_to_object(&self, template: &str, scope: &dyn Scope) -> Result<Value> {
        Ok(infer_type(&self.evaluate(template, scope)?))
    }

    /// Evaluate every expression inside a JSON value.
    ///
    /// A string that is exactly one `${name}` token keeps the bound value's
    /// JSON type, so objects and arrays pass through intact. Strings without
    /// expressions are returned untouched.
    pub fn evaluate_value(&self, value: &Value, scope: &dyn Scope) -> Result<Value> {
        match value {
            Value::String(s) => {
                if let Some(name) = sole_reference(s) {
                    if let Some(bound) = scope.lookup(name) {
                        return Ok(bound);
                    }
                }
                if has_expression(s) {
                    self.evaluate_to_object(s, scope)
                } else {
                    Ok(value.clone())
                }
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.evaluate_value(item, scope))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    out.insert(key.clone(), self.evaluate_value(item, scope)?);
                }
                Ok(Value::Object(out))
            }
            _ => Ok(value.clone()),
        }
    }

    fn evaluate_functions(&self, mut text: String) -> Result<String> {
        let mut passes = 0;
        while let Some((call, nested)) = scan::innermost_call(&text) {
            if passes >= self.max_passes {
                return Err(Error::Expression(format!(
                    "Function evaluation exceeded {} passes: {}",
                    self.max_passes,
                    truncate(&text, 120)
                )));
            }
            passes += 1;

            let args = scan::split_args(call.args(&text));
            let result = functions::call(call.name(&text), &args)?;
            let replacement = if nested {
                scan::quote(&result)
            } else {
                result
            };
            text.replace_range(call.span(), &replacement);
        }
        Ok(text)
    }
}

fn variable_regex() -> &'static Regex {
    static VARIABLE_REGEX: OnceLock<Regex> = OnceLock::new();
    VARIABLE_REGEX.get_or_init(|| Regex::new(r"\$\{([^{}]+)\}").expect("valid regex"))
}

/// Phase one: replace `${name}` tokens, leaving unresolved ones as written.
pub fn substitute_variables(template: &str, scope: &dyn Scope) -> String {
    variable_regex()
        .replace_all(template, |caps: &regex_lite::Captures| {
            match scope.lookup(caps[1].trim()) {
                Some(value) => value_to_string(&value),
                None => caps[0].to_string(),
            }
        })
        .to_string()
}

/// Whether a string contains anything the evaluator would change.
pub fn has_expression(text: &str) -> bool {
    text.contains("${") || scan::has_known_call(text)
}

fn sole_reference(text: &str) -> Option<&str> {
    let caps = variable_regex().captures(text.trim())?;
    let whole = caps.get(0)?;
    if whole.start() == 0 && whole.end() == text.trim().len() {
        caps.get(1).map(|m| m.as_str().trim())
    } else {
        None
    }
}

/// String form used when substituting a value into text.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

/// Truthiness of an evaluated JSON value.
pub fn is_truthy_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => functions::is_truthy(s),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Weakly type an evaluated string.
pub fn infer_type(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = text.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(text.to_string()),
    }
}

/// Walk a dotted path into a JSON value. Numeric segments index arrays.
pub fn get_path_value(value: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(value.clone());
    }
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_variable_substitution() {
        let ctx = scope(json!({"x": 5}));
        let eval = Evaluator::new();
        assert_eq!(eval.evaluate("${x}", &ctx).unwrap(), "5");
        assert_eq!(eval.evaluate("${ x }", &ctx).unwrap(), "5");
    }

    #[test]
    fn test_missing_variable_stays_literal() {
        let ctx = scope(json!({"x": 5}));
        let eval = Evaluator::new();
        assert_eq!(eval.evaluate("${y}", &ctx).unwrap(), "${y}");
        assert_eq!(eval.evaluate("a ${y} b ${x}", &ctx).unwrap(), "a ${y} b 5");
    }

    #[test]
    fn test_concat_with_variable() {
        let ctx = scope(json!({"name": "World"}));
        let eval = Evaluator::new();
        assert_eq!(
            eval.evaluate("concat('Hello, ', ${name}, '!')", &ctx).unwrap(),
            "Hello, World!"
        );
    }

    #[test]
    fn test_concat_with_apostrophe_in_value() {
        let ctx = scope(json!({"name": "O'Brien"}));
        let eval = Evaluator::new();
        assert_eq!(
            eval.evaluate("concat('Hello, ', ${name}, '!')", &ctx).unwrap(),
            "Hello, O'Brien!"
        );
        assert_eq!(
            eval.evaluate("upper(concat(${name}, 's'))", &ctx).unwrap(),
            "O'BRIENS"
        );
    }

    #[test]
    fn test_nested_if_gt() {
        let eval = Evaluator::new();
        let expr = "if(gt(${x},3), 'big', 'small')";
        assert_eq!(eval.evaluate(expr, &scope(json!({"x": 5}))).unwrap(), "big");
        assert_eq!(eval.evaluate(expr, &scope(json!({"x": 1}))).unwrap(), "small");
    }

    #[test]
    fn test_nested_results_keep_commas() {
        let ctx = scope(json!({}));
        let eval = Evaluator::new();
        assert_eq!(
            eval.evaluate("upper(concat('a, ', 'b'))", &ctx).unwrap(),
            "A, B"
        );
        assert_eq!(
            eval.evaluate("join(split('x;y;z', ';'), '+')", &ctx).unwrap(),
            "x+y+z"
        );
    }

    #[test]
    fn test_unknown_function_passes_through() {
        let ctx = scope(json!({"v": 2}));
        let eval = Evaluator::new();
        assert_eq!(eval.evaluate("mystery(${v})", &ctx).unwrap(), "mystery(2)");
        assert_eq!(
            eval.evaluate("mystery(upper('a'))", &ctx).unwrap(),
            "mystery(A)"
        );
    }

    #[test]
    fn test_text_around_calls_is_preserved() {
        let ctx = scope(json!({"n": 3}));
        let eval = Evaluator::new();
        assert_eq!(
            eval.evaluate("Total: add(${n}, 4) items", &ctx).unwrap(),
            "Total: 7 items"
        );
    }

    #[test]
    fn test_rescan_cap_is_enforced() {
        let ctx = scope(json!({}));
        // Four calls need four passes.
        let eval = Evaluator::with_max_passes(3);
        let expr = "concat('upper(', concat('lower(', concat('trim(', concat('x', ')'), ')'), ')'), ')')";
        let err = eval.evaluate(expr, &ctx).unwrap_err();
        assert!(matches!(err, Error::Expression(_)));
        assert!(err.to_string().contains("exceeded 3 passes"));
    }

    #[test]
    fn test_rescan_of_generated_call() {
        let ctx = scope(json!({}));
        let eval = Evaluator::new();
        assert_eq!(
            eval.evaluate("concat('upp', 'er(x)')", &ctx).unwrap(),
            "X"
        );
    }

    #[test]
    fn test_evaluate_to_object_typing() {
        let ctx = scope(json!({"n": "42", "f": "2.5", "b": "true", "s": "hello"}));
        let eval = Evaluator::new();
        assert_eq!(eval.evaluate_to_object("${n}", &ctx).unwrap(), json!(42));
        assert_eq!(eval.evaluate_to_object("${f}", &ctx).unwrap(), json!(2.5));
        assert_eq!(eval.evaluate_to_object("${b}", &ctx).unwrap(), json!(true));
        assert_eq!(eval.evaluate_to_object("${s}", &ctx).unwrap(), json!("hello"));
        assert_eq!(
            eval.evaluate_to_object("gt(${n}, 40)", &ctx).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_value_truthiness() {
        assert!(is_truthy_value(&json!(true)));
        assert!(is_truthy_value(&json!("yes")));
        assert!(is_truthy_value(&json!([0])));
        assert!(!is_truthy_value(&json!(0)));
        assert!(!is_truthy_value(&json!("false")));
        assert!(!is_truthy_value(&json!(null)));
        assert!(!is_truthy_value(&json!({})));
    }

    #[test]
    fn test_dotted_paths() {
        let ctx = scope(json!({"order": {"items": [{"price": 9}]}}));
        let eval = Evaluator::new();
        assert_eq!(eval.evaluate("${order.items.0.price}", &ctx).unwrap(), "9");
    }

    #[test]
    fn test_evaluate_value_keeps_json_types() {
        let ctx = scope(json!({"items": [1, 2, 3], "n": 2}));
        let eval = Evaluator::new();
        let params = json!({
            "items": "${items}",
            "label": "n=${n}",
            "count": "add(${n}, 1)",
            "plain": "007",
            "nested": ["${n}"]
        });
        let out = eval.evaluate_value(&params, &ctx).unwrap();
        assert_eq!(out["items"], json!([1, 2, 3]));
        assert_eq!(out["label"], json!("n=2"));
        assert_eq!(out["count"], json!(3));
        assert_eq!(out["plain"], json!("007"));
        assert_eq!(out["nested"], json!([2]));
    }
}
