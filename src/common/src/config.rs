use crate::{EngineError, MAX_PAGE_SIZE, PAGE_SIZE, POOL_PAGES, SHARD_WIDTH};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Engine configuration. Every field has a default, so a config file only
/// needs to name the settings it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bytes per spill page.
    pub page_size: usize,
    /// Pages a DISTINCT index keeps in memory before spilling.
    pub buffer_pool_pages: usize,
    /// Directory for spill files.
    pub spill_dir: PathBuf,
    /// Spill to a file in `spill_dir`; when false evicted pages stay in an
    /// in-memory page store.
    pub spill_to_disk: bool,
    /// Record ids per shard.
    pub shard_width: u64,
    /// Lifetime of the import transaction opened by INSERT, in milliseconds.
    pub insert_txn_timeout_ms: u64,
    /// How long an exclusive import transaction waits to become active, in milliseconds.
    pub txn_request_timeout_ms: u64,
    /// Copies kept of every shard.
    pub replicas: usize,
}

impl Default for Config {
    fn default() -> Self {
        let mut spill_dir = env::temp_dir();
        spill_dir.push("bitsql");
        Config {
            page_size: PAGE_SIZE,
            buffer_pool_pages: POOL_PAGES,
            spill_dir,
            spill_to_disk: true,
            shard_width: SHARD_WIDTH,
            insert_txn_timeout_ms: 60_000,
            txn_request_timeout_ms: 5_000,
            replicas: 1,
        }
    }
}

impl Config {
    /// Loads a config from a JSON file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path of the config file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parses a config from JSON and validates it.
    pub fn from_json(contents: &str) -> Result<Self, EngineError> {
        let config: Config = serde_json::from_str(contents)?;
        config.validate()?;
        debug!("loaded config {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.page_size < 64 {
            return Err(EngineError::ValidationError(format!(
                "page_size {} is too small",
                self.page_size
            )));
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(EngineError::ValidationError(format!(
                "page_size {} is larger than {}",
                self.page_size, MAX_PAGE_SIZE
            )));
        }
        if self.buffer_pool_pages < 2 {
            return Err(EngineError::ValidationError(String::from(
                "buffer_pool_pages must be at least 2",
            )));
        }
        if self.shard_width == 0 || self.replicas == 0 {
            return Err(EngineError::ValidationError(String::from(
                "shard_width and replicas must be positive",
            )));
        }
        Ok(())
    }
}
