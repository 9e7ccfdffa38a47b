//! Parsed response bodies and selector queries.
//!
//! [`Document`] wraps an html5ever tree (via `scraper`) and keeps the raw
//! text around for the script-scraping paths. Parsing never fails: malformed
//! markup is recovered the way a browser would.
//!
//! `scraper::Html` is not `Send`, so a `Document` must be dropped before the
//! next `.await` in any future that has to be `Send`. Pipeline code parses,
//! extracts owned values, and lets the document go out of scope.

pub mod loose_json;

use std::fmt;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

pub use loose_json::{parse_loose_json, repair_loose_json};

/// A compiled CSS selector that remembers its source text.
///
/// Deserializes from a string so descriptor files fail to load when a
/// selector is invalid.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sel {
    source: String,
    selector: Selector,
}

impl Sel {
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let selector = Selector::parse(source).map_err(|e| ParseError::Selector {
            selector: source.to_string(),
            reason: format!("{e:?}"),
        })?;
        Ok(Self {
            source: source.to_string(),
            selector,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl TryFrom<String> for Sel {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Sel> for String {
    fn from(value: Sel) -> Self {
        value.source
    }
}

impl fmt::Debug for Sel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sel({:?})", self.source)
    }
}

/// A compiled regex that deserializes from its pattern string.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, ParseError> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|source| ParseError::Regex {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn regex(&self) -> &Regex {
        &self.0
    }
}

impl TryFrom<String> for Pattern {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Pattern> for String {
    fn from(value: Pattern) -> Self {
        value.0.as_str().to_string()
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.0.as_str())
    }
}

/// How the body was declared by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Html,
    Json,
    Text,
}

impl BodyKind {
    fn from_content_type(content_type: &str) -> Self {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if mime.contains("json") || mime.contains("javascript") {
            Self::Json
        } else if mime.contains("html") || mime.contains("xml") || mime.is_empty() {
            Self::Html
        } else {
            Self::Text
        }
    }
}

/// A parsed response body.
pub struct Document {
    html: Html,
    raw: String,
    kind: BodyKind,
}

impl Document {
    /// Parse raw bytes. Invalid UTF-8 is replaced, never rejected.
    pub fn parse(bytes: &[u8], content_type: &str) -> Self {
        let raw = String::from_utf8_lossy(bytes).into_owned();
        let kind = BodyKind::from_content_type(content_type);
        Self::build(raw, kind)
    }

    pub fn from_html(text: &str) -> Self {
        Self::build(text.to_string(), BodyKind::Html)
    }

    fn build(raw: String, kind: BodyKind) -> Self {
        let html = match kind {
            BodyKind::Html => Html::parse_document(&raw),
            // Some AJAX endpoints answer JSON wrapped in an HTML body; parsing
            // an empty tree keeps `select` total without touching the text.
            BodyKind::Json | BodyKind::Text => Html::new_document(),
        };
        Self { html, raw, kind }
    }

    pub fn kind(&self) -> BodyKind {
        self.kind
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn select(&self, sel: &Sel) -> Vec<Node<'_>> {
        self.html.select(&sel.selector).map(Node).collect()
    }

    pub fn select_first(&self, sel: &Sel) -> Option<Node<'_>> {
        self.html.select(&sel.selector).next().map(Node)
    }

    /// Text content of every `<script>` element, in document order.
    pub fn scripts(&self) -> Vec<String> {
        static SCRIPT: once_cell::sync::Lazy<Selector> =
            once_cell::sync::Lazy::new(|| Selector::parse("script").expect("static selector"));
        self.html
            .select(&SCRIPT)
            .map(|s| s.text().collect::<String>())
            .collect()
    }

    /// Body as JSON. HTML-wrapped payloads (`<html><body>[...]</body></html>`)
    /// are unwrapped and loose JSON is repaired before giving up.
    pub fn json(&self) -> Result<serde_json::Value, ParseError> {
        if let Ok(v) = serde_json::from_str(self.raw.trim()) {
            return Ok(v);
        }
        let text = match self.kind {
            BodyKind::Html => self.html.root_element().text().collect::<String>(),
            BodyKind::Json | BodyKind::Text => self.raw.clone(),
        };
        parse_loose_json(text.trim())
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("kind", &self.kind)
            .field("len", &self.raw.len())
            .finish()
    }
}

/// An element inside a [`Document`].
#[derive(Clone, Copy)]
pub struct Node<'a>(ElementRef<'a>);

impl<'a> Node<'a> {
    /// Descendant text with whitespace runs collapsed and trimmed.
    pub fn text(&self) -> String {
        let joined = self.0.text().collect::<Vec<_>>().join(" ");
        joined.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.0.value().attr(name)
    }

    /// First attribute from `names` that is present and non-blank.
    pub fn first_attr(&self, names: &[String]) -> Option<&'a str> {
        names
            .iter()
            .filter_map(|n| self.attr(n))
            .map(str::trim)
            .find(|v| !v.is_empty())
    }

    pub fn select(&self, sel: &Sel) -> Vec<Node<'a>> {
        self.0.select(&sel.selector).map(Node).collect()
    }

    pub fn select_first(&self, sel: &Sel) -> Option<Node<'a>> {
        self.0.select(&sel.selector).next().map(Node)
    }

    pub fn inner_html(&self) -> String {
        self.0.inner_html()
    }

    /// Attribute value when `attr` is given, trimmed text otherwise.
    pub fn value_of(&self, attr: Option<&str>) -> Option<String> {
        let value = match attr {
            Some(name) => self.attr(name).map(|s| s.trim().to_string()),
            None => Some(self.text()),
        }?;
        (!value.is_empty()).then_some(value)
    }
}

impl fmt::Debug for Node<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node(<{}>)", self.0.value().name())
    }
}

/// The text between the first `start` marker and the next `end` marker.
pub fn between<'t>(text: &'t str, start: &str, end: &str) -> Option<&'t str> {
    let from = text.find(start)? + start.len();
    let rest = &text[from..];
    let to = rest.find(end)?;
    Some(&rest[..to])
}

/// First run of digits in `text`, e.g. `"Episodio 12"` -> 12.
pub fn first_number(text: &str) -> Option<u32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// A plausible release year (1900..=2099) anywhere in `text`.
pub fn find_year(text: &str) -> Option<i32> {
    static YEAR: once_cell::sync::Lazy<Regex> =
        once_cell::sync::Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("static regex"));
    YEAR.find(text).and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_with_attribute_and_nth_child() {
        let doc = Document::from_html(
            r#"<ul><li><a href="/a" data-id="1">One</a></li>
               <li><a href="/b" data-id="2">Two</a></li></ul>"#,
        );
        let sel = Sel::parse("li:nth-child(2) a[data-id]").unwrap();
        let nodes = doc.select(&sel);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].attr("href"), Some("/b"));
        assert_eq!(nodes[0].text(), "Two");
    }

    #[test]
    fn tolerates_malformed_markup() {
        let doc = Document::from_html("<div><p>unclosed <b>bold<div>next</p>");
        let sel = Sel::parse("b").unwrap();
        assert_eq!(doc.select(&sel).len(), 1);
    }

    #[test]
    fn invalid_selector_is_an_error() {
        let err = Sel::parse("div[").unwrap_err();
        assert!(matches!(err, ParseError::Selector { .. }));
    }

    #[test]
    fn text_collapses_whitespace() {
        let doc = Document::from_html("<h1>  Naruto \n\t <span>Shippuden</span> </h1>");
        let h1 = doc.select_first(&Sel::parse("h1").unwrap()).unwrap();
        assert_eq!(h1.text(), "Naruto Shippuden");
    }

    #[test]
    fn first_attr_skips_blank_values() {
        let doc = Document::from_html(r#"<img data-src=" " src="/p.jpg">"#);
        let img = doc.select_first(&Sel::parse("img").unwrap()).unwrap();
        let attrs = vec!["data-src".to_string(), "src".to_string()];
        assert_eq!(img.first_attr(&attrs), Some("/p.jpg"));
    }

    #[test]
    fn between_markers() {
        let script = "var a = 1; var episodes = [[3,1],[2,1],[1,1]]; var b;";
        assert_eq!(
            between(script, "var episodes = [", "];"),
            Some("[3,1],[2,1],[1,1]")
        );
        assert_eq!(between(script, "var nope = ", ";"), None);
    }

    #[test]
    fn scripts_are_collected_in_order() {
        let doc = Document::from_html(
            "<script>var a = 1;</script><p>x</p><script>var b = 2;</script>",
        );
        assert_eq!(doc.scripts(), vec!["var a = 1;", "var b = 2;"]);
    }

    #[test]
    fn json_body_unwraps_html() {
        let doc = Document::parse(b"<html><body>[{\"num\":1}]</body></html>", "text/html");
        let value = doc.json().unwrap();
        assert_eq!(value[0]["num"], 1);
    }

    #[test]
    fn json_body_repairs_loose_text() {
        let doc = Document::parse(b"{eps: [{num: 1,},]}", "application/json");
        let value = doc.json().unwrap();
        assert_eq!(value["eps"][0]["num"], 1);
    }

    #[test]
    fn number_and_year_helpers() {
        assert_eq!(first_number("Episodio 12"), Some(12));
        assert_eq!(first_number("sin número"), None);
        assert_eq!(find_year("Emitido: 2019-04-06"), Some(2019));
        assert_eq!(find_year("1080p"), None);
    }

    #[test]
    fn pattern_round_trips_through_string() {
        let p = Pattern::new(r"-\d+$").unwrap();
        assert!(p.regex().is_match("/ver/naruto-12"));
        assert_eq!(String::from(p), r"-\d+$");
        assert!(Pattern::new("(").is_err());
    }
}
