//! Turns typed parameters and a needle body into one Lua chunk.
//!
//! Every parameter becomes a `local` binding ahead of the body. Host
//! strings are always escaped before they reach guest source; this is the
//! only place host data is spliced into Lua text.

use std::fmt::Write;

use storage::Needle;

use crate::params::{NeedleParameter, ParamValue};
use crate::{Error, Result};

const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if", "in",
    "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Build the full guest source: the parameter prelude, a blank line, then
/// the needle body.
///
/// Bindings follow the needle's declaration order. An argument without a
/// parameter is bound to its declared default literal (verbatim), or to
/// `nil`.
pub fn build_source(params: &[NeedleParameter], needle: &Needle) -> Result<String> {
    let mut source = String::new();

    for arg in &needle.args {
        if !is_identifier(&arg.name) {
            return Err(Error::Generation(format!(
                "argument name '{}' is not a valid Lua identifier",
                arg.name
            )));
        }

        let literal = match params.iter().find(|p| p.name == arg.name) {
            Some(param) => literal(&param.name, &param.value)?,
            None => arg.default_value.clone().unwrap_or_else(|| "nil".to_string()),
        };
        // Writing to a String cannot fail.
        let _ = writeln!(source, "local {} = {}", arg.name, literal);
    }

    if !source.is_empty() {
        source.push('\n');
    }
    source.push_str(&needle.code);
    Ok(source)
}

fn literal(name: &str, value: &ParamValue) -> Result<String> {
    match value {
        ParamValue::String(s) => Ok(quote(s)),
        // The decimal form of i64::MIN overflows the lexer and reads as a float.
        ParamValue::Int(i64::MIN) => Ok(format!("({} - 1)", i64::MIN + 1)),
        ParamValue::Int(i) => Ok(i.to_string()),
        ParamValue::Float(f) if f.is_finite() => Ok(format!("{f:?}")),
        ParamValue::Float(f) => Err(Error::Generation(format!(
            "argument '{name}' is {f}, which has no Lua literal"
        ))),
        ParamValue::Boolean(b) => Ok(b.to_string()),
    }
}

/// Render `s` as a double-quoted Lua string literal.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            // Three digits so a following digit is not read as part of the escape.
            c if c.is_ascii_control() => {
                let _ = write!(out, "\\{:03}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !LUA_KEYWORDS.contains(&name)
}
