//! `{name}` placeholder filling for URL and form templates in descriptors.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").expect("static regex"));

/// Named values available to a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vars(BTreeMap<&'static str, String>);

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.0.insert(name, value.into());
        self
    }

    pub fn set(&mut self, name: &'static str, value: impl Into<String>) {
        self.0.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Replace every known `{name}` in one pass over `template`. Unknown
    /// placeholders stay as written; substituted values are never rescanned.
    pub fn fill(&self, template: &str) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures<'_>| {
                self.get(&caps[1]).map_or_else(|| caps[0].to_string(), str::to_string)
            })
            .into_owned()
    }

    /// Fill every string inside a JSON body template. Keys are left alone.
    pub fn fill_json(&self, template: &Value) -> Value {
        match template {
            Value::String(s) => Value::String(self.fill(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.fill_json(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.fill_json(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Fill every value of a form template, keeping field order.
    pub fn fill_form(&self, form: &BTreeMap<String, String>) -> Vec<(String, String)> {
        form.iter()
            .map(|(k, v)| (k.clone(), self.fill(v)))
            .collect()
    }
}

/// Last non-empty path segment of a URL: `https://x.com/anime/naruto/` -> `naruto`.
pub fn slug_of(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_known_placeholders() {
        let vars = Vars::new().with("base", "https://x.com/").with("n", "12");
        assert_eq!(vars.fill("{base}ver/naruto-{n}"), "https://x.com/ver/naruto-12");
        assert_eq!(vars.fill("{base}{missing}"), "https://x.com/{missing}");
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let vars = Vars::new()
            .with("query", "{page}")
            .with("page", "2");
        assert_eq!(vars.fill("s={query}&p={page}"), "s={page}&p=2");
    }

    #[test]
    fn json_templates_fill_nested_strings() {
        let vars = Vars::new().with("query", "naruto").with("token", "t0k");
        let body = serde_json::json!({
            "_token": "{token}",
            "components": [{"updates": {"search": "{query}"}, "calls": []}],
            "page": 1
        });
        assert_eq!(
            vars.fill_json(&body),
            serde_json::json!({
                "_token": "t0k",
                "components": [{"updates": {"search": "naruto"}, "calls": []}],
                "page": 1
            })
        );
    }

    #[test]
    fn slug_is_last_segment() {
        assert_eq!(slug_of("https://x.com/anime/naruto"), "naruto");
        assert_eq!(slug_of("https://x.com/anime/naruto/?page=2"), "naruto");
    }
}
