//! Configuration of the event core
//!
//! Read from TOML. Every section and field is optional:
//!
//! ```toml
//! [retry]
//! max_retries = 8
//! first_backoff_ms = 100
//! max_backoff_ms = 10000
//! jitter_factor = 0.5
//!
//! [indexer]
//! deployment = "each_node"   # or "once"
//! node_id = "james-1"
//! execution = "asynchronous" # or "synchronous"
//! ```

use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};
use crate::events::listener::ExecutionMode;
use crate::events::retry::RetryBackoffConfiguration;

/// How many consumers a search index listener has in a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexerDeployment {
    /// One consumer for the whole cluster, for a shared remote index
    #[default]
    Once,
    /// One consumer per node, for node local indexes
    EachNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IndexerConfiguration {
    pub deployment: IndexerDeployment,
    pub node_id: Option<String>,
    pub execution: ExecutionMode,
}

impl Default for IndexerConfiguration {
    fn default() -> Self {
        Self {
            deployment: IndexerDeployment::Once,
            node_id: None,
            execution: ExecutionMode::Asynchronous,
        }
    }
}

impl IndexerConfiguration {
    pub fn validate(&self) -> Result<()> {
        let has_node_id = self.node_id.as_deref().is_some_and(|id| !id.trim().is_empty());
        if self.deployment == IndexerDeployment::EachNode && !has_node_id {
            return Err(Error::Config(
                "indexer.node_id is required with each_node deployment".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub retry: RetryBackoffConfiguration,
    pub indexer: IndexerConfiguration,
}

impl Configuration {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let configuration: Configuration = toml::from_str(content)?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        log::info!("Loading configuration from {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.indexer.validate()
    }
}
