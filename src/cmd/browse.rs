use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use cinescrape::{load_config, ContentSource, ExtractorChain, SourceRegistry};

use super::output::print_json;

fn open_source(config: Option<&Path>, site: &str) -> Result<Arc<dyn ContentSource>> {
    let config = load_config(config).context("loading configuration")?;
    let registry = SourceRegistry::from_config(&config, Arc::new(ExtractorChain::standard()))
        .context("building site pipelines")?;
    Ok(registry.require(site)?)
}

pub async fn cmd_home(config: Option<&Path>, site: &str, section: Option<&str>, page: u32) -> Result<()> {
    let source = open_source(config, site)?;
    let sections = source
        .list_home(page, section)
        .await
        .with_context(|| format!("listing home of {site}"))?;
    print_json(&sections)
}

pub async fn cmd_search(config: Option<&Path>, site: &str, query: &str, quick: bool) -> Result<()> {
    let source = open_source(config, site)?;
    let results = if quick {
        source.quick_search(query).await
    } else {
        source.search(query).await
    }
    .with_context(|| format!("searching {site} for `{query}`"))?;
    print_json(&results)
}

pub async fn cmd_detail(config: Option<&Path>, site: &str, url: &str) -> Result<()> {
    let source = open_source(config, site)?;
    let detail = source
        .get_detail(url)
        .await
        .with_context(|| format!("resolving {url}"))?;
    if detail.partial {
        tracing::warn!(episodes = detail.episodes.len(), "Episode list is incomplete");
    }
    print_json(&detail)
}

pub async fn cmd_streams(config: Option<&Path>, site: &str, token: &str) -> Result<()> {
    let source = open_source(config, site)?;
    let set = source
        .get_streams(token)
        .await
        .with_context(|| format!("resolving streams for {token}"))?;
    if set.is_empty() {
        tracing::info!("No playable link found");
    }
    print_json(&set)
}
