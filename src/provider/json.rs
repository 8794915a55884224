use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use crate::config::JsonSourceConfig;
use crate::models::UpstreamItem;

use super::{http_client, parse_items, resolve_credential, Provider};

/// Fetches a JSON array of items from an HTTP endpoint.
pub struct JsonProvider {
    config: JsonSourceConfig,
    token: Option<String>,
    client: reqwest::Client,
}

impl JsonProvider {
    pub fn new(config: JsonSourceConfig) -> Result<Self> {
        let token = match &config.api_key_env {
            Some(env) => Some(resolve_credential(env)?),
            None => None,
        };
        let client = http_client(config.timeout_secs)?;
        Ok(Self {
            config,
            token,
            client,
        })
    }
}

#[async_trait]
impl Provider for JsonProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn provider_type(&self) -> &str {
        "json"
    }

    async fn fetch(&self) -> Result<Vec<UpstreamItem>> {
        let mut request = self.client.get(&self.config.url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("requesting {}", self.config.url))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{} returned HTTP {}: {}", self.config.url, status, body);
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("decoding JSON from {}", self.config.url))?;
        parse_items(&payload, self.config.items_pointer.as_deref())
    }
}
