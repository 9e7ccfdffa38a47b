//! Where an episode page keeps its embed candidates.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::decode::DecoderKind;
use crate::document::{between, parse_loose_json, Document, Pattern, Sel};
use crate::template::Vars;

static SCRIPT_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>\\]+"#).expect("static regex"));

fn default_iframe() -> Sel {
    Sel::parse("iframe").expect("static selector")
}

fn default_src() -> String {
    "src".to_string()
}

fn default_url_field() -> String {
    "/code".to_string()
}

/// One place to look for embed candidates, plus an optional decoder that
/// overrides the link-level default for candidates found here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSource {
    #[serde(flatten)]
    pub kind: CandidateKind,
    #[serde(default)]
    pub decoder: Option<DecoderKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CandidateKind {
    /// Element attribute: `<iframe src>`, `<li data-player>`, `<option value>`.
    Attribute {
        #[serde(default = "default_iframe")]
        selector: Sel,
        #[serde(default = "default_src")]
        attr: String,
        /// Attribute carrying a display label; node text when absent.
        #[serde(default)]
        label_attr: Option<String>,
        /// When this attribute is `1`/`true` the payload names an
        /// intermediate player page instead of the embed itself. Without a
        /// flag every candidate of a source with `hop_template` is a hop.
        #[serde(default)]
        hop_flag: Option<String>,
        /// Player page URL; `{payload}` is the raw attribute value.
        #[serde(default)]
        hop_template: Option<String>,
    },
    /// JSON literal inside a script, e.g. `var videos = {"SUB":[...]};`.
    ScriptJson {
        start: String,
        end: String,
        #[serde(default)]
        items_pointer: String,
        #[serde(default = "default_url_field")]
        url_field: String,
        #[serde(default)]
        label_field: Option<String>,
    },
    /// Every URL mentioned by scripts containing `marker`.
    ScriptUrls {
        #[serde(default)]
        marker: Option<String>,
        #[serde(default)]
        pattern: Option<Pattern>,
    },
    /// One opaque payload between two markers, e.g. `var ad = '...';`.
    ScriptPayload {
        start: String,
        end: String,
        #[serde(default)]
        label: Option<String>,
    },
}

impl Default for CandidateSource {
    fn default() -> Self {
        Self {
            kind: CandidateKind::Attribute {
                selector: default_iframe(),
                attr: default_src(),
                label_attr: None,
                hop_flag: None,
                hop_template: None,
            },
            decoder: None,
        }
    }
}

/// An undecoded embed reference found on the episode page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub label: String,
    pub payload: String,
    /// Player page to fetch first; its iframe is the real embed.
    pub hop: Option<String>,
    pub decoder: Option<DecoderKind>,
}

/// Collect candidates from every source, in source then document order.
/// Duplicate payloads are kept once.
pub fn locate(doc: &Document, sources: &[CandidateSource], vars: &Vars) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::new();
    for source in sources {
        let found = match &source.kind {
            CandidateKind::Attribute {
                selector,
                attr,
                label_attr,
                hop_flag,
                hop_template,
            } => from_attributes(doc, selector, attr, label_attr.as_deref(), hop_flag.as_deref(), hop_template.as_deref(), vars),
            CandidateKind::ScriptJson {
                start,
                end,
                items_pointer,
                url_field,
                label_field,
            } => from_script_json(doc, start, end, items_pointer, url_field, label_field.as_deref()),
            CandidateKind::ScriptUrls { marker, pattern } => {
                from_script_urls(doc, marker.as_deref(), pattern.as_ref().map(Pattern::regex))
            }
            CandidateKind::ScriptPayload { start, end, label } => between(doc.raw(), start, end)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|payload| {
                    let label = label.clone().unwrap_or_else(|| "server".into());
                    (label, payload.to_string(), None::<String>)
                })
                .into_iter()
                .collect(),
        };

        for (label, payload, hop) in found {
            if out.iter().any(|c| c.payload == payload) {
                continue;
            }
            out.push(Candidate {
                label,
                payload,
                hop,
                decoder: source.decoder.clone(),
            });
        }
    }
    debug!(candidates = out.len(), "Embed candidates located");
    out
}

type Found = Vec<(String, String, Option<String>)>;

fn from_attributes(
    doc: &Document,
    selector: &Sel,
    attr: &str,
    label_attr: Option<&str>,
    hop_flag: Option<&str>,
    hop_template: Option<&str>,
    vars: &Vars,
) -> Found {
    doc.select(selector)
        .into_iter()
        .enumerate()
        .filter_map(|(i, node)| {
            let payload = node.attr(attr).map(str::trim).filter(|v| !v.is_empty())?;
            let label = match label_attr {
                Some(name) => node.attr(name).map(str::trim).map(str::to_string),
                None => Some(node.text()),
            }
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| format!("server {}", i + 1));

            let flagged = hop_flag.map_or(true, |flag| {
                node.attr(flag)
                    .is_some_and(|v| matches!(v.trim(), "1" | "true"))
            });
            let hop = match hop_template {
                Some(t) if flagged => Some(vars.clone().with("payload", payload).fill(t)),
                _ => None,
            };
            Some((label, payload.to_string(), hop))
        })
        .collect()
}

fn from_script_json(
    doc: &Document,
    start: &str,
    end: &str,
    items_pointer: &str,
    url_field: &str,
    label_field: Option<&str>,
) -> Found {
    let Some(inner) = between(doc.raw(), start, end) else {
        debug!(marker = start, "Script JSON marker not found");
        return Vec::new();
    };
    let text = match start.trim_end().chars().last() {
        Some('[') => format!("[{inner}]"),
        Some('{') => format!("{{{inner}}}"),
        _ => inner.to_string(),
    };
    let root: Value = match parse_loose_json(&text) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Script JSON is not parseable");
            return Vec::new();
        }
    };
    let node = if items_pointer.is_empty() {
        Some(&root)
    } else {
        root.pointer(items_pointer)
    };

    // An object of arrays (`{"SUB":[..],"LAT":[..]}`) is flattened in key order.
    let items: Vec<&Value> = match node {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Object(map)) => map
            .values()
            .filter_map(Value::as_array)
            .flatten()
            .collect(),
        _ => Vec::new(),
    };

    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| {
            let payload = item.pointer(url_field)?.as_str()?.trim();
            if payload.is_empty() {
                return None;
            }
            let label = label_field
                .and_then(|f| item.pointer(f))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map_or_else(|| format!("server {}", i + 1), str::to_string);
            Some((label, payload.to_string(), None))
        })
        .collect()
}

fn from_script_urls(doc: &Document, marker: Option<&str>, pattern: Option<&Regex>) -> Found {
    let pattern = pattern.unwrap_or(&SCRIPT_URL);
    let mut urls: Vec<String> = Vec::new();
    for script in doc.scripts() {
        if marker.is_some_and(|m| !script.contains(m)) {
            continue;
        }
        let script = script.replace("\\/", "/");
        for m in pattern.find_iter(&script) {
            let url = m.as_str().to_string();
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
    }
    urls.into_iter()
        .map(|url| {
            let label = url::Url::parse(&url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| "server".into());
            (label, url, None)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(toml_text: &str) -> Vec<CandidateSource> {
        #[derive(Deserialize)]
        struct Wrap {
            candidates: Vec<CandidateSource>,
        }
        toml::from_str::<Wrap>(toml_text).unwrap().candidates
    }

    #[test]
    fn default_source_reads_iframes() {
        let doc = Document::from_html(r#"<iframe src="https://voe.sx/e/1"></iframe><iframe src=" "></iframe>"#);
        let found = locate(&doc, &[CandidateSource::default()], &Vars::new());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].payload, "https://voe.sx/e/1");
        assert_eq!(found[0].label, "server 1");
    }

    #[test]
    fn attribute_candidates_with_hop_flag() {
        let doc = Document::from_html(
            r#"<ul>
                 <li data-player="aaa" data-usa-api="0"><span>Voe</span></li>
                 <li data-player="bbb" data-usa-api="1"><span>Api</span></li>
               </ul>"#,
        );
        let srcs = sources(
            r#"
            [[candidates]]
            type = "attribute"
            selector = "li[data-player]"
            attr = "data-player"
            hop_flag = "data-usa-api"
            hop_template = "{base}reproductor?video={payload}"
            decoder = { type = "base64" }
            "#,
        );
        let vars = Vars::new().with("base", "https://d.test/");
        let found = locate(&doc, &srcs, &vars);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].label, "Voe");
        assert_eq!(found[0].hop, None);
        assert_eq!(found[0].decoder, Some(DecoderKind::Base64));
        assert_eq!(found[1].hop.as_deref(), Some("https://d.test/reproductor?video=bbb"));
    }

    #[test]
    fn hop_template_without_flag_always_hops() {
        let doc = Document::from_html(
            r#"<iframe name="player" src="/live/espn"></iframe>
               <a href="/live2/espn">Opcion 2</a>"#,
        );
        let srcs = sources(
            r#"
            [[candidates]]
            type = "attribute"
            selector = "iframe[name=player], a[href*='live2/']"
            attr = "src"
            hop_template = "{payload}"

            [[candidates]]
            type = "attribute"
            selector = "a[href*='live2/']"
            attr = "href"
            hop_template = "{payload}"
            "#,
        );
        let found = locate(&doc, &srcs, &Vars::new());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].hop.as_deref(), Some("/live/espn"));
        assert_eq!(found[1].hop.as_deref(), Some("/live2/espn"));
    }

    #[test]
    fn script_json_object_of_arrays() {
        let doc = Document::from_html(
            r#"<script>var videos = {"SUB":[{"server":"mega","title":"Mega","code":"https://mega.nz/embed/x"},
               {"server":"sw","title":"SW","code":"https://sw.test/e/1"}],"LAT":[{"title":"Okru","code":"https://ok.ru/videoembed/2"}]};</script>"#,
        );
        let srcs = sources(
            r#"
            [[candidates]]
            type = "script_json"
            start = "var videos = {"
            end = "};"
            label_field = "/title"
            "#,
        );
        let found = locate(&doc, &srcs, &Vars::new());
        let labels: Vec<_> = found.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels.len(), 3);
        assert!(labels.contains(&"Okru"));
        let mega = labels.iter().position(|l| *l == "Mega").unwrap();
        let sw = labels.iter().position(|l| *l == "SW").unwrap();
        assert!(mega < sw);
    }

    #[test]
    fn script_urls_unescape_and_dedupe() {
        let doc = Document::from_html(
            r#"<script>var analytics = "https://stats.test/a";</script>
               <script>var videos = ["https:\/\/voe.sx\/e\/1", "https:\/\/voe.sx\/e\/1", "https://dood.to/e/2"];</script>"#,
        );
        let srcs = sources(
            r#"
            [[candidates]]
            type = "script_urls"
            marker = "var videos"
            "#,
        );
        let found = locate(&doc, &srcs, &Vars::new());
        let payloads: Vec<_> = found.iter().map(|c| c.payload.as_str()).collect();
        assert_eq!(payloads, ["https://voe.sx/e/1", "https://dood.to/e/2"]);
        assert_eq!(found[1].label, "dood.to");
    }

    #[test]
    fn script_payload_between_markers() {
        let doc = Document::from_html("<script>var ad = 'SGVsbG8=';</script>");
        let srcs = sources(
            r#"
            [[candidates]]
            type = "script_payload"
            start = "var ad = '"
            end = "';"
            decoder = { type = "provider_codes" }
            "#,
        );
        let found = locate(&doc, &srcs, &Vars::new());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].payload, "SGVsbG8=");
        assert!(matches!(found[0].decoder, Some(DecoderKind::ProviderCodes { shift: 14, .. })));
    }

    #[test]
    fn missing_markers_yield_nothing() {
        let doc = Document::from_html("<p>no player</p>");
        let srcs = sources(
            r#"
            [[candidates]]
            type = "script_payload"
            start = "var ad = '"
            end = "';"
            "#,
        );
        assert!(locate(&doc, &srcs, &Vars::new()).is_empty());
    }
}
