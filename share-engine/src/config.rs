//! Configuration for the share engine

use crate::types::Tier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Catalog file seeded at startup
    pub catalog_path: Option<PathBuf>,

    /// Allocation configuration
    pub allocation: AllocationConfig,

    /// Selection policy configuration
    pub selection: SelectionConfig,

    /// Persistence backend configuration
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "share-engine".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            catalog_path: None,
            allocation: AllocationConfig::default(),
            selection: SelectionConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Allocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Claim attempts before a purchase gives up with OutOfStock
    pub max_claim_attempts: u32,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            max_claim_attempts: 8,
        }
    }
}

/// Which selection policy to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Uniform over all available items
    Uniform,
    /// Weighted by tier
    TierWeighted,
}

/// Selection policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Policy
    pub policy: PolicyKind,

    /// Relative weights per tier (tier_weighted only)
    pub tier_weights: BTreeMap<Tier, u32>,

    /// RNG seed; random when absent
    pub seed: Option<u64>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        let tier_weights = BTreeMap::from([
            (Tier::Common, 50),
            (Tier::Uncommon, 25),
            (Tier::Rare, 15),
            (Tier::Epic, 7),
            (Tier::Legendary, 3),
        ]);

        Self {
            policy: PolicyKind::Uniform,
            tier_weights,
            seed: None,
        }
    }
}

/// Where inventory, accounts and the ledger live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// In-process stores, lost on exit
    Memory,
    /// RocksDB stores (requires the `rocksdb` feature)
    Rocksdb,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend
    pub backend: StorageBackend,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: PathBuf::from("./data/share-engine"),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        Config::default().with_env_overrides()
    }

    /// Overlay environment variables onto this configuration
    pub fn with_env_overrides(mut self) -> crate::Result<Self> {
        if let Ok(path) = std::env::var("SHARE_ENGINE_CATALOG") {
            self.catalog_path = Some(PathBuf::from(path));
        }

        if let Ok(seed) = std::env::var("SHARE_ENGINE_SEED") {
            let seed = seed
                .parse::<u64>()
                .map_err(|e| crate::Error::Config(format!("Invalid SHARE_ENGINE_SEED: {}", e)))?;
            self.selection.seed = Some(seed);
        }

        if let Ok(attempts) = std::env::var("SHARE_ENGINE_MAX_ATTEMPTS") {
            self.allocation.max_claim_attempts = attempts.parse::<u32>().map_err(|e| {
                crate::Error::Config(format!("Invalid SHARE_ENGINE_MAX_ATTEMPTS: {}", e))
            })?;
        }

        if let Ok(dir) = std::env::var("SHARE_ENGINE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
            self.storage.backend = StorageBackend::Rocksdb;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.allocation.max_claim_attempts == 0 {
            return Err(crate::Error::Config(
                "max_claim_attempts must be at least 1".to_string(),
            ));
        }

        if self.selection.policy == PolicyKind::TierWeighted
            && self.selection.tier_weights.values().all(|w| *w == 0)
        {
            return Err(crate::Error::Config(
                "tier_weighted policy needs at least one non-zero weight".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::Rocksdb && !cfg!(feature = "rocksdb") {
            return Err(crate::Error::Config(
                "rocksdb storage backend requires the `rocksdb` feature".to_string(),
            ));
        }

        Ok(())
    }
}
