use crate::config::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource families with their own cache lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Default,
    Item,
    Workspace,
    Collection,
    Search,
}

/// Configuration for the response cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size: usize,
    #[serde(rename = "default_ttl_ms", with = "duration_ms")]
    pub default_ttl: Duration,
    #[serde(rename = "item_ttl_ms", with = "duration_ms")]
    pub item_ttl: Duration,
    #[serde(rename = "workspace_ttl_ms", with = "duration_ms")]
    pub workspace_ttl: Duration,
    #[serde(rename = "collection_ttl_ms", with = "duration_ms")]
    pub collection_ttl: Duration,
    #[serde(rename = "search_ttl_ms", with = "duration_ms")]
    pub search_ttl: Duration,
    #[serde(rename = "sweep_interval_ms", with = "duration_ms")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1000,
            default_ttl: Duration::from_secs(5 * 60),
            item_ttl: Duration::from_secs(10 * 60),
            workspace_ttl: Duration::from_secs(30 * 60),
            collection_ttl: Duration::from_secs(15 * 60),
            search_ttl: Duration::from_secs(2 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, kind: ResourceKind) -> Duration {
        match kind {
            ResourceKind::Default => self.default_ttl,
            ResourceKind::Item => self.item_ttl,
            ResourceKind::Workspace => self.workspace_ttl,
            ResourceKind::Collection => self.collection_ttl,
            ResourceKind::Search => self.search_ttl,
        }
    }
}
