//! Built-in expression functions.
//!
//! Functions take and return strings. Numeric comparisons parse their
//! arguments and answer `false` when parsing fails.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

use crate::error::{Error, Result};

const LOGICAL: &[&str] = &["if", "and", "or", "not"];
const COMPARISON: &[&str] = &["eq", "ne", "gt", "lt", "gte", "lte"];
const STRING: &[&str] = &[
    "contains",
    "startsWith",
    "endsWith",
    "length",
    "trim",
    "upper",
    "lower",
    "concat",
    "substring",
    "replace",
    "split",
    "join",
];
const TEMPORAL: &[&str] = &["now", "format"];
const CONVERSION: &[&str] = &["toNumber", "toString", "toBoolean"];
const MATH: &[&str] = &["add", "sub", "mul", "div", "mod", "round", "abs", "min", "max"];

/// Whether `name` is a built-in function.
pub fn is_known(name: &str) -> bool {
    [LOGICAL, COMPARISON, STRING, TEMPORAL, CONVERSION, MATH]
        .iter()
        .any(|group| group.contains(&name))
}

/// All built-in function names, grouped by category.
pub fn catalog() -> Vec<(&'static str, &'static [&'static str])> {
    vec![
        ("logical", LOGICAL),
        ("comparison", COMPARISON),
        ("string", STRING),
        ("temporal", TEMPORAL),
        ("conversion", CONVERSION),
        ("math", MATH),
    ]
}

/// Invoke a built-in function.
pub fn call(name: &str, args: &[String]) -> Result<String> {
    match name {
        "if" => {
            arity(name, args, 2, 3)?;
            let branch = if is_truthy(&args[0]) { args.get(1) } else { args.get(2) };
            Ok(branch.cloned().unwrap_or_default())
        }
        "and" => {
            arity(name, args, 1, usize::MAX)?;
            Ok(bool_str(args.iter().all(|a| is_truthy(a))))
        }
        "or" => {
            arity(name, args, 1, usize::MAX)?;
            Ok(bool_str(args.iter().any(|a| is_truthy(a))))
        }
        "not" => {
            arity(name, args, 1, 1)?;
            Ok(bool_str(!is_truthy(&args[0])))
        }

        "eq" | "ne" => {
            arity(name, args, 2, 2)?;
            let equal = match (parse_number(&args[0]), parse_number(&args[1])) {
                (Some(a), Some(b)) => a == b,
                _ => args[0] == args[1],
            };
            Ok(bool_str(if name == "eq" { equal } else { !equal }))
        }
        "gt" | "lt" | "gte" | "lte" => {
            arity(name, args, 2, 2)?;
            let result = match (parse_number(&args[0]), parse_number(&args[1])) {
                (Some(a), Some(b)) => match name {
                    "gt" => a > b,
                    "lt" => a < b,
                    "gte" => a >= b,
                    _ => a <= b,
                },
                _ => false,
            };
            Ok(bool_str(result))
        }

        "contains" => {
            arity(name, args, 2, 2)?;
            Ok(bool_str(args[0].contains(args[1].as_str())))
        }
        "startsWith" => {
            arity(name, args, 2, 2)?;
            Ok(bool_str(args[0].starts_with(args[1].as_str())))
        }
        "endsWith" => {
            arity(name, args, 2, 2)?;
            Ok(bool_str(args[0].ends_with(args[1].as_str())))
        }
        "length" => {
            arity(name, args, 1, 1)?;
            let len = match serde_json::from_str::<Value>(&args[0]) {
                Ok(Value::Array(items)) => items.len(),
                _ => args[0].chars().count(),
            };
            Ok(len.to_string())
        }
        "trim" => {
            arity(name, args, 1, 1)?;
            Ok(args[0].trim().to_string())
        }
        "upper" => {
            arity(name, args, 1, 1)?;
            Ok(args[0].to_uppercase())
        }
        "lower" => {
            arity(name, args, 1, 1)?;
            Ok(args[0].to_lowercase())
        }
        "concat" => Ok(args.concat()),
        "substring" => {
            arity(name, args, 2, 3)?;
            substring(&args[0], &args[1], args.get(2))
        }
        "replace" => {
            arity(name, args, 3, 3)?;
            if args[1].is_empty() {
                return Ok(args[0].clone());
            }
            Ok(args[0].replace(args[1].as_str(), &args[2]))
        }
        "split" => {
            arity(name, args, 1, 2)?;
            let delimiter = args.get(1).map(String::as_str).unwrap_or(",");
            let parts: Vec<&str> = if delimiter.is_empty() {
                vec![args[0].as_str()]
            } else {
                args[0].split(delimiter).collect()
            };
            Ok(serde_json::to_string(&parts)?)
        }
        "join" => {
            arity(name, args, 1, 2)?;
            let delimiter = args.get(1).map(String::as_str).unwrap_or(",");
            join(&args[0], delimiter)
        }

        "now" => {
            arity(name, args, 0, 1)?;
            let now = Utc::now();
            match args.first() {
                Some(pattern) => format_datetime(&now, pattern),
                None => Ok(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
            }
        }
        "format" => {
            arity(name, args, 2, 2)?;
            let datetime = parse_datetime(&args[0]).ok_or_else(|| {
                Error::Expression(format!("format: cannot parse date '{}'", args[0]))
            })?;
            format_datetime(&datetime, &args[1])
        }

        "toNumber" => {
            arity(name, args, 1, 1)?;
            Ok(format_number(parse_number(&args[0]).unwrap_or(0.0)))
        }
        "toString" => {
            arity(name, args, 1, 1)?;
            Ok(args[0].clone())
        }
        "toBoolean" => {
            arity(name, args, 1, 1)?;
            Ok(bool_str(is_truthy(&args[0])))
        }

        "add" | "mul" | "min" | "max" => {
            arity(name, args, 1, usize::MAX)?;
            let numbers = numbers(name, args)?;
            let result = match name {
                "add" => numbers.iter().sum(),
                "mul" => numbers.iter().product(),
                "min" => numbers.iter().copied().fold(f64::INFINITY, f64::min),
                _ => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            };
            Ok(format_number(result))
        }
        "sub" | "div" | "mod" => {
            arity(name, args, 2, 2)?;
            let n = numbers(name, args)?;
            if name != "sub" && n[1] == 0.0 {
                return Err(Error::Expression(format!("{}: division by zero", name)));
            }
            let result = match name {
                "sub" => n[0] - n[1],
                "div" => n[0] / n[1],
                _ => n[0] % n[1],
            };
            Ok(format_number(result))
        }
        "round" => {
            arity(name, args, 1, 2)?;
            let n = numbers(name, &args[..1])?[0];
            let digits = match args.get(1) {
                Some(d) => d.trim().parse::<i32>().map_err(|_| {
                    Error::Expression(format!("round: invalid digits '{}'", d))
                })?,
                None => 0,
            };
            let factor = 10f64.powi(digits.clamp(0, 12));
            Ok(format_number((n * factor).round() / factor))
        }
        "abs" => {
            arity(name, args, 1, 1)?;
            Ok(format_number(numbers(name, args)?[0].abs()))
        }

        _ => Err(Error::Expression(format!("Unknown function '{}'", name))),
    }
}

fn arity(name: &str, args: &[String], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("{}", min)
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(Error::Expression(format!(
            "{} expects {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

/// Weak truthiness: empty, `false`, `0`, `null` and `no` are false.
pub fn is_truthy(value: &str) -> bool {
    let v = value.trim();
    if let Some(n) = parse_number(v) {
        return n != 0.0;
    }
    !matches!(
        v.to_ascii_lowercase().as_str(),
        "" | "false" | "null" | "no" | "off"
    )
}

fn bool_str(value: bool) -> String {
    value.to_string()
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn numbers(name: &str, args: &[String]) -> Result<Vec<f64>> {
    args.iter()
        .map(|a| {
            parse_number(a).ok_or_else(|| {
                Error::Expression(format!("{}: '{}' is not a number", name, a))
            })
        })
        .collect()
}

/// Render a number without a trailing `.0` when it is integral.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn substring(text: &str, start: &str, end: Option<&String>) -> Result<String> {
    let index = |raw: &str| {
        raw.trim()
            .parse::<i64>()
            .map_err(|_| Error::Expression(format!("substring: invalid index '{}'", raw)))
    };

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len() as i64;
    let start = index(start)?.clamp(0, len) as usize;
    let end = match end {
        Some(e) => index(e)?.clamp(0, len) as usize,
        None => len as usize,
    };

    if start >= end {
        return Ok(String::new());
    }
    Ok(chars[start..end].iter().collect())
}

fn join(list: &str, delimiter: &str) -> Result<String> {
    match serde_json::from_str::<Value>(list) {
        Ok(Value::Array(items)) => Ok(items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(delimiter)),
        _ => Ok(list.to_string()),
    }
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let v = value.trim();
    if v.eq_ignore_ascii_case("now") {
        return Some(Utc::now());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(v, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&dt));
    }
    if let Ok(date) = NaiveDate::parse_from_str(v, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }
    v.parse::<i64>()
        .ok()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
}

fn format_datetime(datetime: &DateTime<Utc>, pattern: &str) -> Result<String> {
    let pattern = if pattern.contains('%') {
        pattern.to_string()
    } else {
        translate_pattern(pattern)
    };

    if StrftimeItems::new(&pattern).any(|item| matches!(item, Item::Error)) {
        return Err(Error::Expression(format!(
            "format: invalid pattern '{}'",
            pattern
        )));
    }
    Ok(datetime.format(&pattern).to_string())
}

/// Translate `yyyy-MM-dd HH:mm:ss` style patterns to strftime.
fn translate_pattern(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }

        let token = match (c, run) {
            ('y', 4) => Some("%Y"),
            ('y', 2) => Some("%y"),
            ('M', 2) => Some("%m"),
            ('d', 2) => Some("%d"),
            ('H', 2) => Some("%H"),
            ('m', 2) => Some("%M"),
            ('s', 2) => Some("%S"),
            ('S', 3) => Some("%3f"),
            _ => None,
        };

        match token {
            Some(t) => out.push_str(t),
            None => {
                for _ in 0..run {
                    out.push(c);
                }
            }
        }
        i += run;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_logical() {
        assert_eq!(call("if", &args(&["true", "a", "b"])).unwrap(), "a");
        assert_eq!(call("if", &args(&["0", "a", "b"])).unwrap(), "b");
        assert_eq!(call("if", &args(&["false", "a"])).unwrap(), "");
        assert_eq!(call("and", &args(&["true", "1"])).unwrap(), "true");
        assert_eq!(call("or", &args(&["false", "no"])).unwrap(), "false");
        assert_eq!(call("not", &args(&["false"])).unwrap(), "true");
    }

    #[test]
    fn test_comparison_defaults_to_false_on_parse_failure() {
        assert_eq!(call("gt", &args(&["5", "3"])).unwrap(), "true");
        assert_eq!(call("lte", &args(&["3", "3.0"])).unwrap(), "true");
        assert_eq!(call("gt", &args(&["abc", "3"])).unwrap(), "false");
        assert_eq!(call("lt", &args(&["abc", "3"])).unwrap(), "false");
    }

    #[test]
    fn test_eq_compares_numbers_then_strings() {
        assert_eq!(call("eq", &args(&["5", "5.0"])).unwrap(), "true");
        assert_eq!(call("eq", &args(&["abc", "abc"])).unwrap(), "true");
        assert_eq!(call("ne", &args(&["abc", "abd"])).unwrap(), "true");
    }

    #[test]
    fn test_strings() {
        assert_eq!(call("concat", &args(&["Hello, ", "World", "!"])).unwrap(), "Hello, World!");
        assert_eq!(call("substring", &args(&["workflow", "0", "4"])).unwrap(), "work");
        assert_eq!(call("substring", &args(&["workflow", "4"])).unwrap(), "flow");
        assert_eq!(call("substring", &args(&["abc", "5", "9"])).unwrap(), "");
        assert_eq!(call("replace", &args(&["a-b-c", "-", "+"])).unwrap(), "a+b+c");
        assert_eq!(call("length", &args(&["héllo"])).unwrap(), "5");
        assert_eq!(call("length", &args(&["[1,2,3]"])).unwrap(), "3");
        assert_eq!(call("startsWith", &args(&["nodeflow", "node"])).unwrap(), "true");
        assert_eq!(call("trim", &args(&["  x "])).unwrap(), "x");
    }

    #[test]
    fn test_split_and_join() {
        let parts = call("split", &args(&["a,b,c"])).unwrap();
        assert_eq!(parts, r#"["a","b","c"]"#);
        assert_eq!(call("join", &args(&[&parts, "-"])).unwrap(), "a-b-c");
        assert_eq!(call("join", &args(&["not json", "-"])).unwrap(), "not json");
    }

    #[test]
    fn test_conversion() {
        assert_eq!(call("toNumber", &args(&[" 42 "])).unwrap(), "42");
        assert_eq!(call("toNumber", &args(&["2.5"])).unwrap(), "2.5");
        assert_eq!(call("toNumber", &args(&["nope"])).unwrap(), "0");
        assert_eq!(call("toBoolean", &args(&["yes"])).unwrap(), "true");
        assert_eq!(call("toBoolean", &args(&["null"])).unwrap(), "false");
    }

    #[test]
    fn test_math() {
        assert_eq!(call("add", &args(&["1", "2", "3.5"])).unwrap(), "6.5");
        assert_eq!(call("mul", &args(&["2", "4"])).unwrap(), "8");
        assert_eq!(call("div", &args(&["7", "2"])).unwrap(), "3.5");
        assert_eq!(call("round", &args(&["3.14159", "2"])).unwrap(), "3.14");
        assert_eq!(call("max", &args(&["3", "9", "1"])).unwrap(), "9");
        assert!(call("div", &args(&["1", "0"])).is_err());
        assert!(call("add", &args(&["x"])).is_err());
    }

    #[test]
    fn test_format_dates() {
        assert_eq!(
            call("format", &args(&["2024-03-05T10:30:00Z", "yyyy-MM-dd"])).unwrap(),
            "2024-03-05"
        );
        assert_eq!(
            call("format", &args(&["2024-03-05", "%d/%m/%Y"])).unwrap(),
            "05/03/2024"
        );
        assert!(call("format", &args(&["not a date", "yyyy"])).is_err());
        assert!(call("now", &[]).unwrap().ends_with('Z'));
    }

    #[test]
    fn test_arity_errors() {
        let err = call("upper", &args(&["a", "b"])).unwrap_err();
        assert!(err.to_string().contains("upper expects 1 argument(s), got 2"));
    }

    #[test]
    fn test_catalog_names_are_known() {
        for (_, names) in catalog() {
            for name in names {
                assert!(is_known(name));
            }
        }
        assert!(!is_known("eval"));
    }
}
