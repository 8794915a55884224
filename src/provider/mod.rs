//! Upstream data providers.
//!
//! A [`Provider`] fetches the current upstream snapshot for one configured
//! source and returns raw items. Providers never write anything; the
//! updater job combines, de-duplicates and transforms their output.
//!
//! | `type` | Provider | Upstream |
//! |--------|----------|----------|
//! | `json` | [`JsonProvider`] | HTTP endpoint returning a JSON array |
//! | `file` | [`FileProvider`] | Local JSON snapshot (manual replay) |
//! | `guardian` | [`GuardianProvider`] | The Guardian content API |
//! | `arxiv` | [`ArxivProvider`] | arXiv Atom query API |
//! | `nyt` | [`NytProvider`] | New York Times Article Search API |
//!
//! Any error returned by [`Provider::fetch`] aborts the refresh run.

pub mod arxiv;
pub mod file;
pub mod guardian;
pub mod json;
pub mod nyt;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::{Config, SourceConfig};
use crate::models::UpstreamItem;

pub use arxiv::ArxivProvider;
pub use file::FileProvider;
pub use guardian::GuardianProvider;
pub use json::JsonProvider;
pub use nyt::NytProvider;

#[async_trait]
pub trait Provider: Send + Sync {
    /// Instance name from the configuration (e.g. `"guardian"`).
    fn name(&self) -> &str;

    /// Provider type identifier (e.g. `"json"`, `"arxiv"`).
    fn provider_type(&self) -> &str;

    /// Fetch the full current snapshot from upstream.
    async fn fetch(&self) -> Result<Vec<UpstreamItem>>;
}

/// Builds one provider per configured source, in configuration order.
/// Credentials are resolved here, so a missing secret fails before any
/// network traffic.
pub fn create_providers(config: &Config) -> Result<Vec<Box<dyn Provider>>> {
    let mut providers: Vec<Box<dyn Provider>> = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let provider: Box<dyn Provider> = match source {
            SourceConfig::Json(c) => Box::new(JsonProvider::new(c.clone())?),
            SourceConfig::File(c) => Box::new(FileProvider::new(c.clone())),
            SourceConfig::Guardian(c) => Box::new(GuardianProvider::new(c.clone())?),
            SourceConfig::Arxiv(c) => Box::new(ArxivProvider::new(c.clone())?),
            SourceConfig::Nyt(c) => Box::new(NytProvider::new(c.clone())?),
        };
        providers.push(provider);
    }
    Ok(providers)
}

/// Reads a credential from the named environment variable.
pub fn resolve_credential(env_name: &str) -> Result<String> {
    match std::env::var(env_name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("environment variable {} not set", env_name),
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("blip/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")
}

/// Extracts the item array from a JSON payload. `pointer` selects a nested
/// array (e.g. `/data`); without it the payload itself must be the array.
pub fn parse_items(payload: &Value, pointer: Option<&str>) -> Result<Vec<UpstreamItem>> {
    let target = match pointer {
        Some(p) => payload
            .pointer(p)
            .ok_or_else(|| anyhow!("payload has no value at '{}'", p))?,
        None => payload,
    };
    let array = target
        .as_array()
        .ok_or_else(|| anyhow!("expected a JSON array of objects"))?;

    array
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_object()
                .cloned()
                .ok_or_else(|| anyhow!("item {} is not a JSON object", i))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_items_accepts_top_level_and_nested_arrays() {
        let items = parse_items(&json!([{"id": 1}, {"id": 2}]), None).unwrap();
        assert_eq!(items.len(), 2);

        let nested = json!({"data": {"rows": [{"id": 1}]}});
        let items = parse_items(&nested, Some("/data/rows")).unwrap();
        assert_eq!(items[0]["id"], 1);
    }

    #[test]
    fn parse_items_rejects_malformed_payloads() {
        assert!(parse_items(&json!({"id": 1}), None).is_err());
        assert!(parse_items(&json!([{"id": 1}, 7]), None).is_err());
        assert!(parse_items(&json!({"data": []}), Some("/rows")).is_err());
    }

    #[test]
    fn missing_credential_is_an_error() {
        let err = resolve_credential("BLIP_TEST_CREDENTIAL_THAT_IS_NEVER_SET").unwrap_err();
        assert!(err.to_string().contains("not set"));
    }
}
