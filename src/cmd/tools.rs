use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use cinescrape::{repair_loose_json, DecoderKind};

use super::output::print_json;

pub fn cmd_repair_json(file: Option<&Path>) -> Result<()> {
    let input = match file {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    let repaired = repair_loose_json(&input);
    match serde_json::from_str::<serde_json::Value>(&repaired) {
        Ok(value) => print_json(&value),
        Err(e) => {
            // Still show what the rules produced.
            println!("{repaired}");
            Err(anyhow!("repaired text is not valid JSON: {e}"))
        }
    }
}

#[derive(Serialize)]
struct DecodedEntry {
    url: String,
    label: Option<String>,
    quality: String,
    lang: Option<String>,
}

pub fn cmd_decode(decoder: &str, payload: &str) -> Result<()> {
    let kind = DecoderKind::by_name(decoder).ok_or_else(|| {
        anyhow!("unknown decoder `{decoder}` (plain, base64, shift-cipher, provider-codes)")
    })?;
    let decoder = kind.build();
    let embeds = decoder
        .decode(payload)
        .with_context(|| format!("{} v{} failed", decoder.name(), decoder.version()))?;

    let entries: Vec<DecodedEntry> = embeds
        .into_iter()
        .map(|e| DecodedEntry {
            url: e.url,
            label: e.label,
            quality: e.quality.to_string(),
            lang: e.lang,
        })
        .collect();
    print_json(&entries)
}
