//! Macro strings: literal text with `${name}` expansions.
//!
//! ```text
//! macro-string = *( macro-expand / macro-escape / macro-literal )
//! macro-expand = "${" 1*( ALPHA / DIGIT / "_" / "-" / "." ) "}"
//! macro-escape = "\\" / "\#" / "\$" / "\&"
//! ```
//!
//! An expansion `${name}` is looked up, in order, as an environment variable
//! (only for `env.NAME`), a context variable, a payload path and a header.
//! If any expansion is absent the whole macro evaluates to `None`.

use std::fmt;

use serde_json::Value;
use tracing::warn;

use super::error::{ParseError, ParseResult};
use crate::webhook::WebHook;

/// One lexical part of a macro string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroPart {
    Literal(String),
    Escape(char),
    Expansion(String),
}

/// How values that are not strings are rendered by an expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expand {
    /// Strings, numbers and booleans only; anything else is absent.
    Strict,
    /// Any JSON value; structures render as compact JSON, null as `null`.
    Coerce,
}

/// A parsed macro string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroString {
    parts: Vec<MacroPart>,
}

impl MacroString {
    /// A macro made of a single literal.
    pub fn literal(text: impl Into<String>) -> Self {
        MacroString {
            parts: vec![MacroPart::Literal(text.into())],
        }
    }

    pub fn parts(&self) -> &[MacroPart] {
        &self.parts
    }

    /// Lexes `text` (trimmed) into a macro string. Errors report `line`.
    pub fn parse(text: &str, line: usize) -> ParseResult<Self> {
        let text = text.trim();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '\\' => {
                    flush(&mut literal, &mut parts);
                    match chars.next() {
                        Some((_, e @ ('\\' | '#' | '$' | '&'))) => parts.push(MacroPart::Escape(e)),
                        Some((_, e)) => {
                            return Err(ParseError::new(line, format!("Illegal escape \\{e}")));
                        }
                        None => return Err(ParseError::new(line, "Illegal escape \\")),
                    }
                }
                '$' => {
                    flush(&mut literal, &mut parts);
                    match chars.next() {
                        Some((open, '{')) => {
                            let body_start = open + 1;
                            let Some(len) = text[body_start..].find('}') else {
                                return Err(ParseError::new(line, "Unterminated macro-expand"));
                            };
                            let name = &text[body_start..body_start + len];
                            if !is_expansion_name(name) {
                                return Err(ParseError::new(
                                    line,
                                    format!("Illegal macro-expansion ${{{name}}}"),
                                ));
                            }
                            parts.push(MacroPart::Expansion(name.to_string()));
                            // Skip past the closing brace.
                            while let Some((p, _)) = chars.peek() {
                                if *p > body_start + len {
                                    break;
                                }
                                chars.next();
                            }
                        }
                        Some((_, other)) => {
                            return Err(ParseError::new(line, format!("Illegal sequence ${other}")));
                        }
                        None => {
                            return Err(ParseError::new(
                                line,
                                format!("Illegal sequence {}", &text[pos..]),
                            ));
                        }
                    }
                }
                other => literal.push(other),
            }
        }
        flush(&mut literal, &mut parts);

        if parts.is_empty() {
            return Err(ParseError::new(line, "Expected macro-string"));
        }
        Ok(MacroString { parts })
    }

    /// Appends the parts of `other` to a copy of `self`.
    pub fn concat(&self, other: &MacroString) -> MacroString {
        let mut parts = self.parts.clone();
        parts.extend(other.parts.iter().cloned());
        MacroString { parts }
    }

    /// Evaluates the macro against `hook`.
    ///
    /// A single-part macro returns its part verbatim. Multi-part macros are
    /// concatenated and runs of whitespace collapse to one space.
    pub fn eval(&self, hook: &WebHook<'_>, mode: Expand) -> Option<String> {
        if let [part] = self.parts.as_slice() {
            return part.eval(hook, mode);
        }
        let mut joined = String::new();
        for part in &self.parts {
            joined.push_str(&part.eval(hook, mode)?);
        }
        Some(collapse_whitespace(&joined))
    }
}

fn flush(literal: &mut String, parts: &mut Vec<MacroPart>) {
    if !literal.is_empty() {
        parts.push(MacroPart::Literal(std::mem::take(literal)));
    }
}

fn is_expansion_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

impl MacroPart {
    fn eval(&self, hook: &WebHook<'_>, mode: Expand) -> Option<String> {
        match self {
            MacroPart::Literal(text) => Some(text.clone()),
            MacroPart::Escape(c) => Some(c.to_string()),
            MacroPart::Expansion(name) => expand(name, hook, mode),
        }
    }
}

fn expand(name: &str, hook: &WebHook<'_>, mode: Expand) -> Option<String> {
    if let Some(var) = name.strip_prefix("env.") {
        return std::env::var(var).ok();
    }
    let value = hook
        .variable(name)
        .or_else(|| hook.payload_value(name).cloned())
        .or_else(|| hook.header(name).map(|h| Value::String(h.to_string())))?;
    let rendered = match mode {
        Expand::Strict => render_scalar(&value),
        Expand::Coerce => Some(render_any(&value)),
    };
    if rendered.is_none() {
        warn!("${{{name}}} is not a string, number or boolean");
    }
    rendered
}

/// Renders a string, number or boolean as text.
pub fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(render_number(n)),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Renders any JSON value as text.
pub fn render_any(value: &Value) -> String {
    render_scalar(value).unwrap_or_else(|| value.to_string())
}

/// Formats a number without a trailing `.0` when it is integral.
pub fn render_number(n: &serde_json::Number) -> String {
    if n.is_f64()
        && let Some(f) = n.as_f64()
        && f.is_finite()
        && f.fract() == 0.0
        && f.abs() < 1e15
    {
        return format!("{}", f as i64);
    }
    n.to_string()
}

impl fmt::Display for MacroPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MacroPart::Literal(text) => f.write_str(text),
            MacroPart::Escape(c) => write!(f, "\\{c}"),
            MacroPart::Expansion(name) => write!(f, "${{{name}}}"),
        }
    }
}

impl fmt::Display for MacroString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            write!(f, "{part}")?;
        }
        Ok(())
    }
}
