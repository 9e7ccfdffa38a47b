//! Repair for the JavaScript object literals sites embed in `<script>` tags.
//!
//! The repair is a fixed list of small rules, each working only on text
//! outside string literals. Every rule is idempotent and so is the whole
//! pass: `repair(repair(x)) == repair(x)`.
//!
//! 1. strip a leading `identifier:` label in front of an object or array
//! 2. rewrite single-quoted strings as double-quoted ones
//! 3. replace `void 0` and `undefined` with `null`
//! 4. quote bare keys that follow `{` or `,`
//! 5. collapse runs of commas into one
//! 6. drop trailing commas before `}` or `]`

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::ParseError;

static LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[A-Za-z_$][\w$]*\s*:\s*([\[{])").expect("static regex"));
static UNDEFINED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bvoid\s+0\b|\bundefined\b").expect("static regex"));
static BARE_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([{,]\s*)([A-Za-z_$][\w$]*)(\s*:)").expect("static regex"));
static COMMA_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*,)+").expect("static regex"));
static TRAILING_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(\s*[}\]])").expect("static regex"));

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    /// A quoted literal, quotes included.
    Str(&'a str),
    Code(&'a str),
}

/// Split `text` into string literals and everything else. An unterminated
/// literal runs to the end of the input.
fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let bytes = text.as_bytes();
    let mut code_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let quote = bytes[i];
        if quote != b'"' && quote != b'\'' {
            i += 1;
            continue;
        }
        if code_start < i {
            out.push(Segment::Code(&text[code_start..i]));
        }
        let start = i;
        i += 1;
        while i < bytes.len() && bytes[i] != quote {
            if bytes[i] == b'\\' {
                i += 1;
            }
            i += 1;
        }
        let end = (i + 1).min(bytes.len());
        out.push(Segment::Str(&text[start..end]));
        i = end;
        code_start = end;
    }
    if code_start < bytes.len() {
        out.push(Segment::Code(&text[code_start..]));
    }
    out
}

fn map_code(text: &str, rule: impl Fn(&str) -> String) -> String {
    segments(text)
        .into_iter()
        .map(|seg| match seg {
            Segment::Str(s) => s.to_string(),
            Segment::Code(c) => rule(c),
        })
        .collect()
}

/// `episodes: [..]` becomes `[..]`.
pub fn strip_label(text: &str) -> String {
    LABEL.replace(text, "$1").into_owned()
}

/// `'it\'s "x"'` becomes `"it's \"x\""`. Double-quoted literals are kept.
pub fn double_quote_strings(text: &str) -> String {
    segments(text)
        .into_iter()
        .map(|seg| match seg {
            Segment::Str(s) if s.starts_with('\'') => requote(s),
            Segment::Str(s) | Segment::Code(s) => s.to_string(),
        })
        .collect()
}

fn requote(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len() + 2);
    out.push('"');
    let mut chars = literal[1..].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\'') => out.push('\''),
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            },
            '\'' => break,
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

pub fn replace_undefined(text: &str) -> String {
    map_code(text, |c| UNDEFINED.replace_all(c, "null").into_owned())
}

pub fn quote_bare_keys(text: &str) -> String {
    map_code(text, |c| BARE_KEY.replace_all(c, "$1\"$2\"$3").into_owned())
}

pub fn collapse_commas(text: &str) -> String {
    map_code(text, |c| COMMA_RUN.replace_all(c, ",").into_owned())
}

pub fn drop_trailing_commas(text: &str) -> String {
    map_code(text, |c| TRAILING_COMMA.replace_all(c, "$1").into_owned())
}

/// Apply every repair rule in order.
pub fn repair_loose_json(text: &str) -> String {
    let text = strip_label(text);
    let text = double_quote_strings(&text);
    let text = replace_undefined(&text);
    let text = quote_bare_keys(&text);
    let text = collapse_commas(&text);
    drop_trailing_commas(&text)
}

/// Parse strictly first; repair and retry on failure. The error reported is
/// the one from the repaired text.
pub fn parse_loose_json<T: DeserializeOwned>(text: &str) -> Result<T, ParseError> {
    if let Ok(value) = serde_json::from_str(text) {
        return Ok(value);
    }
    Ok(serde_json::from_str(&repair_loose_json(text))?)
}
