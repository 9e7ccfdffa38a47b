//! Decode plugins for obfuscated embed payloads.
//!
//! Each plugin is a pure string transform with a name and a version. They
//! track undocumented site encodings and may stop working when a site
//! changes; a failure only drops the candidate it was applied to.

use std::collections::BTreeMap;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::document::parse_loose_json;
use crate::error::DecodeError;
use crate::model::Quality;

/// Shift used by the provider-code blobs seen so far.
pub const DEFAULT_SHIFT: u8 = 14;

/// Characters the shift cipher leaves alone.
const STRUCTURAL: &[char] = &['{', '}', '[', ']', ',', ':'];

/// One embed produced by a decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEmbed {
    pub url: String,
    pub label: Option<String>,
    pub quality: Quality,
    pub lang: Option<String>,
}

impl DecodedEmbed {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            label: None,
            quality: Quality::Unknown,
            lang: None,
        }
    }
}

pub trait PayloadDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn version(&self) -> u32;

    fn decode(&self, payload: &str) -> Result<Vec<DecodedEmbed>, DecodeError>;
}

fn default_shift() -> u8 {
    DEFAULT_SHIFT
}

/// Descriptor-level choice of decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecoderKind {
    #[default]
    Plain,
    Base64,
    ShiftCipher {
        #[serde(default = "default_shift")]
        shift: u8,
    },
    ProviderCodes {
        #[serde(default = "default_shift")]
        shift: u8,
        /// Extra or replacement `provider id -> URL template` entries.
        #[serde(default)]
        providers: BTreeMap<String, String>,
    },
}

impl DecoderKind {
    pub fn build(&self) -> Box<dyn PayloadDecoder> {
        match self {
            Self::Plain => Box::new(PlainDecoder),
            Self::Base64 => Box::new(Base64Decoder),
            Self::ShiftCipher { shift } => Box::new(ShiftCipherDecoder { shift: *shift }),
            Self::ProviderCodes { shift, providers } => Box::new(ProviderCodesDecoder {
                shift: *shift,
                providers: providers.clone(),
            }),
        }
    }

    /// Default configuration of the decoder called `name`.
    pub fn by_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace('-', "_").as_str() {
            "plain" => Some(Self::Plain),
            "base64" => Some(Self::Base64),
            "shift_cipher" => Some(Self::ShiftCipher { shift: DEFAULT_SHIFT }),
            "provider_codes" => Some(Self::ProviderCodes {
                shift: DEFAULT_SHIFT,
                providers: BTreeMap::new(),
            }),
            _ => None,
        }
    }
}

fn require_web_url(text: &str) -> Result<String, DecodeError> {
    let text = text.trim();
    if text.starts_with("http://") || text.starts_with("https://") || text.starts_with("//") {
        Ok(text.to_string())
    } else {
        let preview: String = text.chars().take(40).collect();
        Err(DecodeError::Malformed(format!("not a URL: {preview}")))
    }
}

/// Base64 with or without padding, standard or URL-safe alphabet.
pub fn decode_base64(payload: &str) -> Result<String, DecodeError> {
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let mut last_err = None;
    for engine in [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD] {
        match engine.decode(&cleaned) {
            Ok(bytes) => return Ok(String::from_utf8(bytes)?),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.map_or_else(|| DecodeError::Malformed("empty payload".into()), DecodeError::from))
}

/// Shift every printable ASCII character down by `shift`, wrapping inside
/// 32..=126. JSON structural characters pass through.
pub fn unshift(text: &str, shift: u8) -> String {
    text.chars()
        .map(|c| {
            let code = c as u32;
            if !(32..=126).contains(&code) || STRUCTURAL.contains(&c) {
                return c;
            }
            let mut shifted = i64::from(code) - i64::from(shift);
            while shifted < 32 {
                shifted += 95;
            }
            u32::try_from(shifted).ok().and_then(char::from_u32).unwrap_or(c)
        })
        .collect()
}

/// Payload is already a URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDecoder;

impl PayloadDecoder for PlainDecoder {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn version(&self) -> u32 {
        1
    }

    fn decode(&self, payload: &str) -> Result<Vec<DecodedEmbed>, DecodeError> {
        Ok(vec![DecodedEmbed::url(require_web_url(payload)?)])
    }
}

/// `data-player="aHR0cHM6Ly92b2Uuc3gvZS9hYmM="` style payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Decoder;

impl PayloadDecoder for Base64Decoder {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn version(&self) -> u32 {
        1
    }

    fn decode(&self, payload: &str) -> Result<Vec<DecodedEmbed>, DecodeError> {
        // Some players already hand out plain URLs.
        if let Ok(url) = require_web_url(payload) {
            return Ok(vec![DecodedEmbed::url(url)]);
        }
        let text = decode_base64(payload)?;
        Ok(vec![DecodedEmbed::url(require_web_url(&text)?)])
    }
}

/// Base64, then [`unshift`]; the result is a single URL.
#[derive(Debug, Clone, Copy)]
pub struct ShiftCipherDecoder {
    pub shift: u8,
}

impl PayloadDecoder for ShiftCipherDecoder {
    fn name(&self) -> &'static str {
        "shift_cipher"
    }

    fn version(&self) -> u32 {
        1
    }

    fn decode(&self, payload: &str) -> Result<Vec<DecodedEmbed>, DecodeError> {
        let text = unshift(&decode_base64(payload)?, self.shift);
        Ok(vec![DecodedEmbed::url(require_web_url(&text)?)])
    }
}

/// Provider id -> embed URL template. `{id}` is the provider-side code.
const PROVIDERS: &[(&str, &str)] = &[
    ("1", "https://powvideo.net/embed-{id}.html"),
    ("2", "https://streamplay.to/embed-{id}.html"),
    ("4", "https://clicknupload.link/embed-{id}.html"),
    ("5", "https://gounlimited.to/embed-{id}.html"),
    ("6", "https://streamtape.com/e/{id}"),
    ("7", "https://jetload.net/e/{id}"),
    ("9", "https://vivo.sx/embed/{id}.html"),
    ("10", "https://ok.ru/videoembed/{id}"),
    ("11", "https://1fichier.com/?{id}"),
    ("12", "https://gamovideo.com/embed-{id}.html"),
    ("13", "https://clipwatching.com/embed-{id}.html"),
    ("14", "https://jawcloud.co/embed-{id}.html"),
    ("15", "https://mixdrop.co/e/{id}"),
    ("17", "https://upstream.to/embed-{id}.html"),
    ("18", "https://videobin.co/embed-{id}.html"),
    ("21", "https://evoload.io/e/{id}"),
    ("22", "https://embedsito.com/v/{id}"),
    ("23", "https://dood.to/e/{id}"),
    ("24", "https://streamsb.net/e/{id}"),
    ("25", "https://uqload.com/embed-{id}.html"),
    ("26", "https://voe.sx/e/{id}"),
    ("27", "https://sendvid.com/embed/{id}"),
    ("31", "https://mega.nz/embed#!{id}"),
    ("33", "https://wishfast.top/e/{id}"),
    ("35", "https://streamlare.com/e/{id}"),
    ("36", "https://hexload.com/embed-{id}.html"),
    ("40", "https://vidmoly.to/embed-{id}.html"),
    ("41", "https://streamvid.net/embed-{id}"),
    ("43", "https://filelions.to/v/{id}"),
    ("44", "https://filemoon.sx/e/{id}"),
];

/// Label corruptions the cipher is known to produce.
const LABEL_FIXES: &[(&str, &str)] = &[
    ("7SPSU4", "ESPSUB"),
    ("7N9", "ENG"),
    ("7SP", "ESP"),
    ("L3T", "LAT"),
    ("hd72", "hd720"),
    ("ddi", "dvdrip"),
];

static FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]{1,16})"\s*:\s*"([^"]*)""#).expect("static regex"));

/// One entry of a decoded provider-code blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderCode {
    pub provider: String,
    pub code: String,
    pub lang: Option<String>,
    pub quality: Option<String>,
}

/// HDFull-style `var ad = '...'` blob: base64, shift cipher, then a JSON list
/// of `{id, provider, code, lang, quality}` mapped through [`PROVIDERS`].
///
/// The cipher turns `m`, `o`, `M` and `O` into bracket characters it then
/// refuses to shift back. Inside string literals those brackets can only be
/// letters, so they are restored before parsing.
#[derive(Debug, Clone, Default)]
pub struct ProviderCodesDecoder {
    pub shift: u8,
    pub providers: BTreeMap<String, String>,
}

impl ProviderCodesDecoder {
    pub fn provider_url(&self, provider: &str, code: &str) -> Option<String> {
        let template = self.providers.get(provider).map(String::as_str).or_else(|| {
            PROVIDERS
                .iter()
                .find(|(id, _)| *id == provider)
                .map(|(_, t)| *t)
        })?;
        Some(template.replace("{id}", code))
    }

    /// Decode the blob into provider entries without mapping them to URLs.
    pub fn parse_codes(&self, payload: &str) -> Result<Vec<ProviderCode>, DecodeError> {
        let text = restore_letters(&unshift(&decode_base64(payload)?, self.shift));

        if let Ok(Value::Array(items)) = parse_loose_json::<Value>(&text) {
            let codes: Vec<ProviderCode> = items.iter().filter_map(code_from_value).collect();
            if !codes.is_empty() {
                return Ok(codes);
            }
        }

        let codes = scan_codes(&text);
        if codes.is_empty() {
            let preview: String = text.chars().take(60).collect();
            return Err(DecodeError::Malformed(format!("no provider entries in `{preview}`")));
        }
        Ok(codes)
    }
}

impl PayloadDecoder for ProviderCodesDecoder {
    fn name(&self) -> &'static str {
        "provider_codes"
    }

    fn version(&self) -> u32 {
        2
    }

    fn decode(&self, payload: &str) -> Result<Vec<DecodedEmbed>, DecodeError> {
        let codes = self.parse_codes(payload)?;
        let mut unknown = None;
        let embeds: Vec<DecodedEmbed> = codes
            .into_iter()
            .filter_map(|c| {
                let Some(url) = self.provider_url(&c.provider, &c.code) else {
                    debug!(provider = %c.provider, "Unknown provider id");
                    unknown.get_or_insert(c.provider);
                    return None;
                };
                let lang = c.lang.map(|l| fix_label(&l));
                let quality = c.quality.map(|q| fix_label(&q));
                let label = match (&lang, &quality) {
                    (Some(l), Some(q)) => Some(format!("{l} {q}")),
                    (Some(x), None) | (None, Some(x)) => Some(x.clone()),
                    (None, None) => None,
                };
                Some(DecodedEmbed {
                    url,
                    label,
                    quality: quality.as_deref().map_or(Quality::Unknown, Quality::from_name),
                    lang,
                })
            })
            .collect();

        match (embeds.is_empty(), unknown) {
            (true, Some(provider)) => Err(DecodeError::UnknownProvider(provider)),
            _ => Ok(embeds),
        }
    }
}

fn fix_label(value: &str) -> String {
    LABEL_FIXES
        .iter()
        .find(|(bad, _)| value == *bad)
        .map_or_else(|| value.to_string(), |(_, good)| (*good).to_string())
}

/// Inside string literals, map `{}[]` back to `moMO`.
fn restore_letters(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            let mapped = match c {
                _ if escaped => {
                    escaped = false;
                    c
                }
                '\\' => {
                    escaped = true;
                    c
                }
                '"' => {
                    in_string = false;
                    c
                }
                '{' => 'm',
                '}' => 'o',
                '[' => 'M',
                ']' => 'O',
                other => other,
            };
            out.push(mapped);
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }
    out
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn code_from_value(value: &Value) -> Option<ProviderCode> {
    Some(ProviderCode {
        provider: scalar(value.get("provider")?)?,
        code: scalar(value.get("code")?)?,
        lang: value.get("lang").and_then(scalar),
        quality: value.get("quality").and_then(scalar),
    })
}

fn canonical_key(key: &str) -> Option<&'static str> {
    let key = key.to_ascii_lowercase();
    if key == "id" {
        Some("id")
    } else if key.contains("vide") || key.contains("ide") {
        Some("provider")
    } else if key == "code" || (key.starts_with('c') && key.ends_with("de")) {
        Some("code")
    } else if key.contains("lang") {
        Some("lang")
    } else if key.contains("ali") {
        Some("quality")
    } else {
        None
    }
}

/// Last-resort scan for `"key":"value"` pairs when the blob is not JSON.
/// A new entry starts at every `id` key or repeated field.
fn scan_codes(text: &str) -> Vec<ProviderCode> {
    let mut records: Vec<BTreeMap<&'static str, String>> = Vec::new();
    let mut current: BTreeMap<&'static str, String> = BTreeMap::new();

    for caps in FIELD.captures_iter(text) {
        let Some(key) = canonical_key(&caps[1]) else {
            continue;
        };
        if key == "id" || current.contains_key(key) {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
        }
        current.insert(key, caps[2].trim().to_string());
    }
    if !current.is_empty() {
        records.push(current);
    }

    records
        .into_iter()
        .filter_map(|mut r| {
            Some(ProviderCode {
                provider: r.remove("provider").filter(|s| !s.is_empty())?,
                code: r.remove("code").filter(|s| !s.is_empty())?,
                lang: r.remove("lang"),
                quality: r.remove("quality"),
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Inverse of [`unshift`], including the cipher's letter collisions.
    pub(crate) fn obfuscate(plain: &str, shift: u8) -> String {
        let shifted: String = plain
            .chars()
            .map(|c| {
                let code = c as u32;
                if !(32..=126).contains(&code) || STRUCTURAL.contains(&c) {
                    return c;
                }
                let mut s = code + u32::from(shift);
                if s > 126 {
                    s -= 95;
                }
                char::from_u32(s).unwrap()
            })
            .collect();
        STANDARD.encode(shifted)
    }

    #[test]
    fn base64_accepts_padding_variants() {
        let url = "https://voe.sx/e/abc";
        let padded = STANDARD.encode(url);
        let unpadded = STANDARD_NO_PAD.encode(url);
        assert_eq!(decode_base64(&padded).unwrap(), url);
        assert_eq!(decode_base64(&unpadded).unwrap(), url);
        assert!(matches!(decode_base64("%%%"), Err(DecodeError::Base64(_))));
    }

    #[test]
    fn base64_decoder_requires_url() {
        let payload = STANDARD.encode("not a url");
        assert!(matches!(Base64Decoder.decode(&payload), Err(DecodeError::Malformed(_))));
        let ok = Base64Decoder.decode(&STANDARD.encode("https://ok.ru/videoembed/1")).unwrap();
        assert_eq!(ok[0].url, "https://ok.ru/videoembed/1");
    }

    #[test]
    fn unshift_wraps_and_preserves_structure() {
        assert_eq!(unshift("v", 14), "h");
        // ' ' (32) - 14 wraps to 113 'q'.
        assert_eq!(unshift(" ", 14), "q");
        assert_eq!(unshift("{}[],:", 14), "{}[],:");
        assert_eq!(unshift("ñ", 14), "ñ");
    }

    #[test]
    fn shift_cipher_decodes_url() {
        // Free of m/o/M/O, which the cipher cannot round-trip outside JSON.
        let clean = "https://stape.net/e/xyz";
        let decoded = ShiftCipherDecoder { shift: 14 }.decode(&obfuscate(clean, 14)).unwrap();
        assert_eq!(decoded[0].url, clean);
    }

    #[test]
    fn provider_codes_decode_and_map() {
        let blob = r#"[{"id":"1","provider":"26","code":"xk3","lang":"ESPSUB","quality":"hd720"},{"id":"2","provider":"99","code":"zz","lang":"LAT","quality":"hd720"},{"id":"3","provider":"15","code":"mo9","lang":"LAT","quality":"dvdrip"}]"#;
        let decoder = ProviderCodesDecoder {
            shift: 14,
            providers: BTreeMap::new(),
        };
        let embeds = decoder.decode(&obfuscate(blob, 14)).unwrap();
        assert_eq!(embeds.len(), 2);
        assert_eq!(embeds[0].url, "https://voe.sx/e/xk3");
        assert_eq!(embeds[0].quality, Quality::Height(720));
        assert_eq!(embeds[0].label.as_deref(), Some("ESPSUB hd720"));
        // Letters the cipher turns into brackets come back inside strings.
        assert_eq!(embeds[1].url, "https://mixdrop.co/e/mo9");
        assert_eq!(embeds[1].lang.as_deref(), Some("LAT"));
    }

    #[test]
    fn provider_override_table_wins() {
        let mut providers = BTreeMap::new();
        providers.insert("26".to_string(), "https://voe.mirror/e/{id}".to_string());
        let decoder = ProviderCodesDecoder { shift: 14, providers };
        assert_eq!(decoder.provider_url("26", "a").as_deref(), Some("https://voe.mirror/e/a"));
        assert_eq!(decoder.provider_url("44", "b").as_deref(), Some("https://filemoon.sx/e/b"));
        assert_eq!(decoder.provider_url("0", "c"), None);
    }

    #[test]
    fn only_unknown_providers_is_an_error() {
        let blob = r#"[{"id":"1","provider":"99","code":"x","lang":"LAT","quality":"hd"}]"#;
        let decoder = ProviderCodesDecoder {
            shift: 14,
            providers: BTreeMap::new(),
        };
        assert!(matches!(
            decoder.decode(&obfuscate(blob, 14)),
            Err(DecodeError::UnknownProvider(p)) if p == "99"
        ));
    }

    #[test]
    fn scan_recovers_broken_blobs() {
        let broken = r#""id":"1","pr?vide":"6","c}de":"aa","lang":"7SP","quality":"ddi""id":"2","provider":"44","code":"bb""#;
        let codes = scan_codes(broken);
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].provider, "6");
        assert_eq!(codes[0].code, "aa");
        assert_eq!(fix_label(codes[0].lang.as_deref().unwrap()), "ESP");
        assert_eq!(fix_label(codes[0].quality.as_deref().unwrap()), "dvdrip");
        assert_eq!(codes[1].code, "bb");
    }

    #[test]
    fn decoders_report_names() {
        for name in ["plain", "base64", "shift-cipher", "provider_codes"] {
            let kind = DecoderKind::by_name(name).unwrap();
            let decoder = kind.build();
            assert_eq!(decoder.name(), name.replace('-', "_"));
            assert!(decoder.version() >= 1);
        }
        assert!(DecoderKind::by_name("rot13").is_none());
    }
}
