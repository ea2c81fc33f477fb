mod config;
mod core;
mod entry;
mod metrics;
mod policy;

pub use config::{CacheConfig, ResourceKind};
pub use self::core::Cache;
pub use entry::{CacheEntry, EntryInfo};
pub use metrics::{CacheMetrics, CacheStats};
