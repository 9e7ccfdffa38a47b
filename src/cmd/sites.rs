use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use cinescrape::{load_config, Capabilities, MediaKind};

use super::output::print_json;

#[derive(Serialize)]
struct SiteEntry<'a> {
    name: &'a str,
    base_url: &'a str,
    lang: &'a str,
    kinds: &'a [MediaKind],
    capabilities: Capabilities,
    sections: Vec<&'a str>,
}

pub fn cmd_sites(config: Option<&Path>) -> Result<()> {
    let config = load_config(config).context("loading configuration")?;
    let entries: Vec<SiteEntry<'_>> = config
        .sites
        .iter()
        .map(|s| SiteEntry {
            name: &s.name,
            base_url: &s.base_url,
            lang: &s.lang,
            kinds: &s.kinds,
            capabilities: s.capabilities,
            sections: s.sections.iter().map(|x| x.key.as_str()).collect(),
        })
        .collect();
    print_json(&entries)
}
