use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::config::FileSourceConfig;
use crate::models::UpstreamItem;

use super::{parse_items, Provider};

/// Reads a saved upstream snapshot from disk. Used for manual replay of a
/// missed run and for offline testing.
pub struct FileProvider {
    config: FileSourceConfig,
}

impl FileProvider {
    pub fn new(config: FileSourceConfig) -> Self {
        Self { config }
    }

    pub fn from_path(name: &str, path: impl Into<PathBuf>) -> Self {
        Self::new(FileSourceConfig {
            name: name.to_string(),
            path: path.into(),
            items_pointer: None,
        })
    }
}

#[async_trait]
impl Provider for FileProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn provider_type(&self) -> &str {
        "file"
    }

    async fn fetch(&self) -> Result<Vec<UpstreamItem>> {
        let path = &self.config.path;
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading snapshot {}", path.display()))?;
        let payload: serde_json::Value = serde_json::from_str(&content)
            .with_context(|| format!("parsing snapshot {}", path.display()))?;
        parse_items(&payload, self.config.items_pointer.as_deref())
    }
}
