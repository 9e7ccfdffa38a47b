//! Mirror-domain aliases: embed hosts that rotate domains are mapped back to
//! the canonical host the extractors know.

use std::collections::BTreeMap;

const BUILTIN: &[(&str, &str)] = &[
    ("https://hglink.to", "https://streamwish.to"),
    ("https://swdyu.com", "https://streamwish.to"),
    ("https://wishembed.pro", "https://streamwish.to"),
    ("https://mivalyo.com", "https://vidhidepro.com"),
    ("https://dhtpre.com", "https://vidhidepro.com"),
    ("https://filemoon.link", "https://filemoon.sx"),
    ("https://sblona.com", "https://watchsb.com"),
    ("https://embedsb.com", "https://watchsb.com"),
    ("https://dooood.com", "https://dood.to"),
    ("https://d0000d.com", "https://dood.to"),
    ("https://ok.ru", "http://ok.ru"),
];

#[derive(Debug, Clone)]
pub struct DomainAliases {
    entries: Vec<(String, String)>,
}

impl Default for DomainAliases {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DomainAliases {
    pub fn builtin() -> Self {
        Self::with_extra(&BTreeMap::new())
    }

    /// Built-in table plus site-specific entries, which take precedence.
    pub fn with_extra(extra: &BTreeMap<String, String>) -> Self {
        let mut entries: Vec<(String, String)> = extra
            .iter()
            .map(|(from, to)| (from.trim_end_matches('/').to_string(), to.trim_end_matches('/').to_string()))
            .collect();
        entries.extend(BUILTIN.iter().map(|(f, t)| ((*f).to_string(), (*t).to_string())));
        Self { entries }
    }

    /// Replace a matching scheme+host prefix. At most one alias applies.
    pub fn rewrite(&self, url: &str) -> String {
        for (from, to) in &self.entries {
            let Some(rest) = url.strip_prefix(from.as_str()) else {
                continue;
            };
            // Prefix must end at a host boundary.
            if rest.is_empty() || rest.starts_with(['/', '?', '#', ':']) {
                return format!("{to}{rest}");
            }
        }
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_alias_applies_once() {
        let aliases = DomainAliases::builtin();
        assert_eq!(aliases.rewrite("https://hglink.to/e/abc"), "https://streamwish.to/e/abc");
        assert_eq!(aliases.rewrite("https://voe.sx/e/abc"), "https://voe.sx/e/abc");
        assert_eq!(aliases.rewrite("https://ok.ru/videoembed/9"), "http://ok.ru/videoembed/9");
    }

    #[test]
    fn prefix_must_end_at_host() {
        let aliases = DomainAliases::builtin();
        assert_eq!(aliases.rewrite("https://hglink.tools/e/1"), "https://hglink.tools/e/1");
        assert_eq!(aliases.rewrite("https://hglink.to"), "https://streamwish.to");
    }

    #[test]
    fn site_entries_override_builtin() {
        let mut extra = BTreeMap::new();
        extra.insert("https://hglink.to/".to_string(), "https://wish.mirror".to_string());
        let aliases = DomainAliases::with_extra(&extra);
        assert_eq!(aliases.rewrite("https://hglink.to/e/1"), "https://wish.mirror/e/1");
    }
}
