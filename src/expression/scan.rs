//! Lexical helpers for function-call rescanning.
//!
//! Quotes are only significant inside a call's parentheses. At the top level
//! a template is free text, so an apostrophe in prose does not hide calls.
//! Inside a call a quote opens only at the start of an argument and closes
//! only right before a `,`, a `)` or the end of the text, so substituted
//! values such as `O'Brien` keep their apostrophes as plain characters.

use super::functions;

/// A known function call located in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    /// Byte offset of the function name
    pub start: usize,
    /// Byte offset of the opening parenthesis
    pub open: usize,
    /// Byte offset of the closing parenthesis
    pub close: usize,
}

impl Call {
    pub fn name<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.open]
    }

    pub fn args<'a>(&self, text: &'a str) -> &'a str {
        &text[self.open + 1..self.close]
    }

    /// Byte range covering the whole call, including the closing parenthesis.
    pub fn span(&self) -> std::ops::Range<usize> {
        self.start..self.close + 1
    }

    fn encloses(&self, other: &Call) -> bool {
        self.open < other.start && self.close > other.close
    }
}

/// Locate the rightmost known call. Any known call nested inside it would
/// start further right, so the rightmost call is always an innermost one.
///
/// Returns the call and whether another known call encloses it.
pub(crate) fn innermost_call(text: &str) -> Option<(Call, bool)> {
    let calls = known_calls(text);
    let innermost = calls.last()?.clone();
    let nested = calls.iter().any(|c| c.encloses(&innermost));
    Some((innermost, nested))
}

/// True when the text contains at least one evaluable known call.
pub(crate) fn has_known_call(text: &str) -> bool {
    !known_calls(text).is_empty()
}

fn known_calls(text: &str) -> Vec<Call> {
    let bytes = text.as_bytes();
    let mut calls = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q && closes_quote(bytes, i) {
                quote = None;
            }
            i += 1;
            continue;
        }

        match b {
            b'\'' | b'"' if depth > 0 && opens_quote(bytes, i) => quote = Some(b),
            b'(' => {
                if let Some(start) = identifier_before(bytes, i) {
                    if functions::is_known(&text[start..i]) {
                        if let Some(close) = matching_paren(bytes, i) {
                            calls.push(Call {
                                start,
                                open: i,
                                close,
                            });
                        }
                    }
                }
                depth += 1;
            }
            b')' => depth = depth.saturating_sub(1),
            _ => {}
        }
        i += 1;
    }

    calls
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Start offset of the identifier ending right before `open`.
fn identifier_before(bytes: &[u8], open: usize) -> Option<usize> {
    let mut start = open;
    while start > 0 && is_ident_byte(bytes[start - 1]) {
        start -= 1;
    }
    if start == open || bytes[start].is_ascii_digit() {
        return None;
    }
    Some(start)
}

/// A quote opens an argument when only whitespace separates it from the
/// preceding `(`, `,` or the start of the text.
fn opens_quote(bytes: &[u8], at: usize) -> bool {
    bytes[..at]
        .iter()
        .rev()
        .find(|b| !b.is_ascii_whitespace())
        .map_or(true, |&b| b == b'(' || b == b',')
}

/// A quote closes an argument when only whitespace separates it from the
/// following `,`, `)` or the end of the text.
fn closes_quote(bytes: &[u8], at: usize) -> bool {
    bytes[at + 1..]
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .map_or(true, |&b| b == b')' || b == b',')
}

fn matching_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = open;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q && closes_quote(bytes, i) {
                quote = None;
            }
        } else {
            match b {
                b'\'' | b'"' if opens_quote(bytes, i) => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }

    None
}

/// Split an argument list on top-level commas, honoring quotes and nested
/// parentheses. Quoted arguments are unquoted and unescaped.
pub(crate) fn split_args(args: &str) -> Vec<String> {
    if args.trim().is_empty() {
        return Vec::new();
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let bytes = args.as_bytes();
    let mut chars = args.char_indices();

    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if c == '\\' {
                if let Some((_, next)) = chars.next() {
                    current.push(next);
                }
            } else if c == q && closes_quote(bytes, i) {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' if opens_quote(bytes, i) => {
                quote = Some(c);
                current.push(c);
            }
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    parts.iter().map(|p| unquote(p.trim())).collect()
}

/// Strip one layer of matching quotes when they wrap the whole argument.
fn unquote(arg: &str) -> String {
    let Some(q @ ('\'' | '"')) = arg.chars().next() else {
        return arg.to_string();
    };
    if arg.len() < 2 || !arg.ends_with(q) {
        return arg.to_string();
    }

    let mut out = String::new();
    let mut chars = arg[1..arg.len() - 1].chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                // The closing quote was escaped.
                None => return arg.to_string(),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Quote a value so it survives as a single argument of an enclosing call.
pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_respects_quotes_and_parens() {
        let args = split_args("'Hello, ', World, '!'");
        assert_eq!(args, vec!["Hello, ", "World", "!"]);

        let args = split_args("gt(5, 3), 'a,b', \"c\"");
        assert_eq!(args, vec!["gt(5, 3)", "a,b", "c"]);
    }

    #[test]
    fn test_split_empty_and_escaped() {
        assert!(split_args("  ").is_empty());
        assert_eq!(split_args(r"'it\'s', x"), vec!["it's", "x"]);
    }

    #[test]
    fn test_partially_quoted_argument_is_kept_raw() {
        assert_eq!(split_args("'a' b"), vec!["'a' b"]);
    }

    #[test]
    fn test_innermost_call_is_rightmost() {
        let text = "concat(upper('a'), lower('B'))";
        let (call, nested) = innermost_call(text).unwrap();
        assert_eq!(call.name(text), "lower");
        assert_eq!(call.args(text), "'B'");
        assert!(nested);
    }

    #[test]
    fn test_unknown_functions_are_not_calls() {
        assert!(innermost_call("mystery(1, 2)").is_none());
        let text = "mystery(upper('a'))";
        let (call, nested) = innermost_call(text).unwrap();
        assert_eq!(call.name(text), "upper");
        assert!(!nested);
    }

    #[test]
    fn test_quoted_parens_do_not_close_call() {
        let text = "concat('(', ')')";
        let (call, _) = innermost_call(text).unwrap();
        assert_eq!(call.close, text.len() - 1);
    }

    #[test]
    fn test_top_level_apostrophe_does_not_hide_calls() {
        let text = "Don't shout: lower('HEY')";
        let (call, _) = innermost_call(text).unwrap();
        assert_eq!(call.name(text), "lower");
    }

    #[test]
    fn test_apostrophe_inside_bare_argument_is_literal() {
        let text = "concat('Hello, ', O'Brien, '!')";
        let (call, _) = innermost_call(text).unwrap();
        assert_eq!(call.close, text.len() - 1);
        assert_eq!(
            split_args(call.args(text)),
            vec!["Hello, ", "O'Brien", "!"]
        );
    }

    #[test]
    fn test_apostrophe_inside_quoted_argument_is_literal() {
        assert_eq!(split_args("'it's', x"), vec!["it's", "x"]);
    }

    #[test]
    fn test_quote_round_trips_through_split() {
        let quoted = quote("a, 'b'");
        assert_eq!(split_args(&quoted), vec!["a, 'b'"]);
    }
}
