//! Name-to-source lookup for hosts.

use std::sync::Arc;

use tracing::debug;

use super::{Capabilities, ContentSource, Pipeline};
use crate::config::Config;
use crate::error::{ConfigError, ResolveError, Result};
use crate::links::EmbedExtractor;

/// Registered content sources, in registration order.
#[derive(Default)]
pub struct SourceRegistry {
    sources: Vec<Arc<dyn ContentSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`Pipeline`] per configured site, all sharing `extractor`.
    pub fn from_config(config: &Config, extractor: Arc<dyn EmbedExtractor>) -> Result<Self> {
        let mut registry = Self::new();
        for site in &config.sites {
            let pipeline = Pipeline::new(site.clone(), &config.fetch, Arc::clone(&extractor))?;
            registry.register(Arc::new(pipeline))?;
        }
        Ok(registry)
    }

    /// Add a source. Names must be unique.
    pub fn register(&mut self, source: Arc<dyn ContentSource>) -> Result<()> {
        if self.get(source.name()).is_some() {
            return Err(ConfigError::Invalid {
                site: source.name().to_string(),
                reason: "registered twice".into(),
            }
            .into());
        }
        debug!(source = source.name(), "Registered content source");
        self.sources.push(source);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ContentSource>> {
        self.sources
            .iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Like [`SourceRegistry::get`], as an error when absent.
    pub fn require(&self, name: &str) -> Result<Arc<dyn ContentSource>> {
        self.get(name)
            .ok_or_else(|| ResolveError::UnknownSource(name.to_string()))
    }

    pub fn list(&self) -> Vec<(String, Capabilities)> {
        self.sources
            .iter()
            .map(|s| (s.name().to_string(), s.capabilities()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("SourceRegistry").field("sources", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::ExtractorChain;
    use crate::site::tests::minimal;

    fn config_with(names: &[&str]) -> Config {
        let sites = names
            .iter()
            .map(|n| {
                let mut site = minimal();
                site.name = (*n).to_string();
                site
            })
            .collect();
        Config {
            sites,
            ..Config::default()
        }
    }

    #[test]
    fn registers_sites_in_order() {
        let registry =
            SourceRegistry::from_config(&config_with(&["animeflv", "hdfull"]), Arc::new(ExtractorChain::standard()))
                .unwrap();
        let names: Vec<_> = registry.list().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["animeflv", "hdfull"]);
        assert!(registry.get("HDFull").is_some());
        assert!(matches!(registry.require("nope"), Err(ResolveError::UnknownSource(_))));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result =
            SourceRegistry::from_config(&config_with(&["animeflv", "animeflv"]), Arc::new(ExtractorChain::standard()));
        assert!(matches!(result, Err(ResolveError::Config(_))));
    }
}
