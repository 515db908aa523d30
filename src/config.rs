//! Configuration for Stockroom
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::batch::BatchPolicy;

/// Main configuration for a Stockroom instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all durable state
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── records/ab/abc123.json   (one file per record)
    ///     ├── index.json               (filterable field summary)
    ///     ├── store.lock               (advisory lock target)
    ///     └── journal.log              (only present mid-mutation)
    pub data_dir: PathBuf,

    /// fsync policy for record, index and journal writes
    pub sync_strategy: SyncStrategy,

    /// Move unreadable records into `quarantine/` during rebuild instead of failing
    pub quarantine_corrupt: bool,

    // -------------------------------------------------------------------------
    // Record Configuration
    // -------------------------------------------------------------------------
    /// How ids are assigned to documents saved without one
    pub id_strategy: IdStrategy,

    /// Dotted paths every saved document must carry
    pub required_fields: Vec<String>,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Dotted paths summarized into the index (fast filter/sort path)
    pub indexed_fields: Vec<String>,

    // -------------------------------------------------------------------------
    // Concurrency Configuration
    // -------------------------------------------------------------------------
    /// Upper bound on lock acquisition; `None` blocks until acquired
    pub lock_timeout: Option<Duration>,

    /// Default failure policy for `*_many` calls
    pub batch_policy: BatchPolicy,
}

/// fsync strategy for durable writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync every file and its parent directory (safest, slowest)
    EveryWrite,

    /// Leave flushing to the OS (tests, bulk imports)
    OsBuffered,
}

/// Id assignment for documents without an `id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// Random UUIDv4
    Uuid,

    /// Derived from product identifiers (seller/sku, brand/mpn, gtin, url, name hash)
    Derived,
}

/// Fields indexed when nothing else is configured
pub const DEFAULT_INDEXED_FIELDS: &[&str] = &[
    "title",
    "brand",
    "category",
    "sku",
    "url",
    "price.amount",
    "price.currency",
    "created_at",
    "updated_at",
];

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./stockroom_data"),
            sync_strategy: SyncStrategy::EveryWrite,
            quarantine_corrupt: false,
            id_strategy: IdStrategy::Uuid,
            required_fields: vec!["title".to_string()],
            indexed_fields: DEFAULT_INDEXED_FIELDS.iter().map(|f| f.to_string()).collect(),
            lock_timeout: Some(Duration::from_secs(30)),
            batch_policy: BatchPolicy::BestEffort,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the engine cannot honor
    pub fn validate(&self) -> crate::Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(crate::StockroomError::Config("data_dir is empty".to_string()));
        }
        for field in self.indexed_fields.iter().chain(self.required_fields.iter()) {
            if field.is_empty() || field.split('.').any(|seg| seg.is_empty()) {
                return Err(crate::StockroomError::Config(format!(
                    "invalid field path: {:?}",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the fsync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Quarantine corrupt records during rebuild
    pub fn quarantine_corrupt(mut self, enabled: bool) -> Self {
        self.config.quarantine_corrupt = enabled;
        self
    }

    /// Set the id assignment strategy
    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.config.id_strategy = strategy;
        self
    }

    /// Replace the required field list
    pub fn required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the indexed field list
    pub fn indexed_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.indexed_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set the lock acquisition bound (`None` waits forever)
    pub fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.lock_timeout = timeout;
        self
    }

    /// Set the default batch failure policy
    pub fn batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.config.batch_policy = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
