//! The Guardian content API provider.
//!
//! Runs one search per configured topic over the lookback window and maps
//! each result onto an article item. The topic becomes the article's
//! `label`. Articles whose body is shorter than `min_text_len` are skipped.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::GuardianSourceConfig;
use crate::models::UpstreamItem;

use super::{http_client, resolve_credential, Provider};

pub const MAGAZINE: &str = "The Guardian";

pub struct GuardianProvider {
    config: GuardianSourceConfig,
    api_key: String,
    client: reqwest::Client,
}

impl GuardianProvider {
    pub fn new(config: GuardianSourceConfig) -> Result<Self> {
        let api_key = resolve_credential(&config.api_key_env)?;
        let client = http_client(config.timeout_secs)?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    async fn search(&self, query: &str) -> Result<Vec<UpstreamItem>> {
        let now = Utc::now();
        let from = now - ChronoDuration::days(self.config.lookback_days);
        let params: Vec<(&str, String)> = vec![
            ("q", query.to_string()),
            ("from-date", from.format("%Y-%m-%d").to_string()),
            ("to-date", now.format("%Y-%m-%d").to_string()),
            ("page-size", self.config.page_size.to_string()),
            ("show-fields", "bodyText,trailText".to_string()),
            ("order-by", "relevance".to_string()),
            ("section", self.config.section.clone()),
            ("api-key", self.api_key.clone()),
        ];

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&params)
            .send()
            .await
            .with_context(|| format!("requesting Guardian search for '{}'", query))?;

        // The request URL carries the API key, so only the status is reported.
        let status = response.status();
        if !status.is_success() {
            bail!("Guardian API returned HTTP {} for '{}'", status, query);
        }

        let payload: Value = response
            .json()
            .await
            .context("decoding Guardian response")?;
        parse_results(&payload, query, self.config.min_text_len)
    }
}

#[async_trait]
impl Provider for GuardianProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn provider_type(&self) -> &str {
        "guardian"
    }

    async fn fetch(&self) -> Result<Vec<UpstreamItem>> {
        let mut items = Vec::new();
        for (i, query) in self.config.queries.iter().enumerate() {
            if i > 0 && self.config.request_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.request_delay_ms)).await;
            }
            let found = self.search(query).await?;
            tracing::debug!(
                provider = %self.config.name,
                query = %query,
                items = found.len(),
                "guardian search"
            );
            items.extend(found);
        }
        Ok(items)
    }
}

/// Maps a Guardian search response onto article items.
pub fn parse_results(
    payload: &Value,
    query: &str,
    min_text_len: usize,
) -> Result<Vec<UpstreamItem>> {
    let response = payload
        .get("response")
        .context("Guardian response missing 'response'")?;
    let status = response.get("status").and_then(Value::as_str).unwrap_or("");
    if status != "ok" {
        bail!("Guardian API status '{}'", status);
    }
    let results = response
        .get("results")
        .and_then(Value::as_array)
        .context("Guardian response missing 'results'")?;

    let mut items = Vec::new();
    for result in results {
        let Some(url) = result.get("webUrl").and_then(Value::as_str) else {
            continue;
        };
        let fields = result.get("fields");
        let field = |name: &str| {
            fields
                .and_then(|f| f.get(name))
                .and_then(Value::as_str)
                .unwrap_or("")
        };
        let text = match field("bodyText") {
            "" => field("trailText"),
            body => body,
        };
        if text.chars().count() < min_text_len {
            continue;
        }

        let published = result
            .get("webPublicationDate")
            .and_then(Value::as_str)
            .and_then(|d| d.get(..10))
            .unwrap_or("");

        let item = json!({
            "id": url,
            "url": url,
            "title": result.get("webTitle").and_then(Value::as_str).unwrap_or(""),
            "text": text,
            "magazine": MAGAZINE,
            "label": query,
            "published_at": published,
        });
        if let Value::Object(map) = item {
            items.push(map);
        }
    }
    Ok(items)
}
