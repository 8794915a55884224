//! New York Times Article Search provider.
//!
//! Pages through `articlesearch.json` for each configured topic, limited to
//! the Technology news desk. The API allows five requests a minute, so every
//! request after the first waits `request_delay_ms`. Paging for a topic stops
//! at the first empty page or after `page_limit` pages.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::NytSourceConfig;
use crate::models::UpstreamItem;

use super::{http_client, resolve_credential, Provider};

pub const MAGAZINE: &str = "New York Times";

pub struct NytProvider {
    config: NytSourceConfig,
    api_key: String,
    client: reqwest::Client,
}

impl NytProvider {
    pub fn new(config: NytSourceConfig) -> Result<Self> {
        let api_key = resolve_credential(&config.api_key_env)?;
        let client = http_client(config.timeout_secs)?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    async fn page(&self, query: &str, page: u32) -> Result<Value> {
        let now = Utc::now();
        let from = now - ChronoDuration::days(self.config.lookback_days);
        let params: Vec<(&str, String)> = vec![
            ("q", query.to_string()),
            ("begin_date", from.format("%Y%m%d").to_string()),
            ("end_date", now.format("%Y%m%d").to_string()),
            ("fq", format!("news_desk:(\"{}\")", self.config.news_desk)),
            ("sort", "relevance".to_string()),
            ("page", page.to_string()),
            ("api-key", self.api_key.clone()),
        ];

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&params)
            .send()
            .await
            .with_context(|| format!("requesting NYT search for '{}' page {}", query, page))?;

        // The request URL carries the API key, so only the status is reported.
        let status = response.status();
        if !status.is_success() {
            bail!(
                "NYT API returned HTTP {} for '{}' page {}",
                status,
                query,
                page
            );
        }

        response.json().await.context("decoding NYT response")
    }
}

#[async_trait]
impl Provider for NytProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn provider_type(&self) -> &str {
        "nyt"
    }

    async fn fetch(&self) -> Result<Vec<UpstreamItem>> {
        let mut items = Vec::new();
        let mut requests = 0u32;
        for query in &self.config.queries {
            for page in 0..self.config.page_limit {
                if requests > 0 && self.config.request_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.config.request_delay_ms)).await;
                }
                requests += 1;

                let payload = self.page(query, page).await?;
                let Some(found) = parse_docs(&payload, query, self.config.min_text_len)? else {
                    break;
                };
                tracing::debug!(
                    provider = %self.config.name,
                    query = %query,
                    page,
                    items = found.len(),
                    "nyt search page"
                );
                items.extend(found);
            }
        }
        Ok(items)
    }
}

/// Maps one Article Search page onto article items. Returns `None` when the
/// page has no documents, which ends paging for the topic.
pub fn parse_docs(
    payload: &Value,
    query: &str,
    min_text_len: usize,
) -> Result<Option<Vec<UpstreamItem>>> {
    let status = payload.get("status").and_then(Value::as_str).unwrap_or("");
    if status != "OK" {
        bail!("NYT API status '{}'", status);
    }
    let docs = payload
        .pointer("/response/docs")
        .and_then(Value::as_array)
        .context("NYT response missing 'response.docs'")?;
    if docs.is_empty() {
        return Ok(None);
    }

    let mut items = Vec::new();
    for doc in docs {
        let Some(url) = doc.get("web_url").and_then(Value::as_str) else {
            continue;
        };
        let field = |name: &str| doc.get(name).and_then(Value::as_str).unwrap_or("");
        let text = match (field("snippet"), field("lead_paragraph")) {
            ("", lead) => lead.to_string(),
            (snippet, "") => snippet.to_string(),
            (snippet, lead) => format!("{}\n\n{}", snippet, lead),
        };
        if text.chars().count() < min_text_len {
            continue;
        }

        let published = field("pub_date").get(..10).unwrap_or("");
        let title = doc
            .pointer("/headline/main")
            .and_then(Value::as_str)
            .unwrap_or("");

        let item = json!({
            "id": url,
            "url": url,
            "title": title,
            "text": text,
            "magazine": MAGAZINE,
            "label": query,
            "published_at": published,
        });
        if let Value::Object(map) = item {
            items.push(map);
        }
    }
    Ok(Some(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_docs_onto_articles() {
        let payload = json!({
            "status": "OK",
            "response": {
                "docs": [
                    {
                        "web_url": "https://www.nytimes.com/2026/09/12/technology/vr.html",
                        "headline": {"main": "Headsets everywhere"},
                        "snippet": "A short snippet.",
                        "lead_paragraph": "l".repeat(120),
                        "pub_date": "2026-09-12T10:15:00+0000"
                    },
                    {
                        "web_url": "https://www.nytimes.com/2026/09/13/technology/tiny.html",
                        "headline": {"main": "Tiny"},
                        "snippet": "too short",
                        "pub_date": "2026-09-13T10:15:00+0000"
                    },
                    {"headline": {"main": "No url"}, "lead_paragraph": "l".repeat(200)}
                ]
            }
        });

        let items = parse_docs(&payload, "virtual reality", 100)
            .unwrap()
            .unwrap();
        assert_eq!(items.len(), 1);
        let a = &items[0];
        assert_eq!(
            a["id"],
            "https://www.nytimes.com/2026/09/12/technology/vr.html"
        );
        assert_eq!(a["title"], "Headsets everywhere");
        assert_eq!(a["magazine"], MAGAZINE);
        assert_eq!(a["label"], "virtual reality");
        assert_eq!(a["published_at"], "2026-09-12");
        assert!(a["text"].as_str().unwrap().starts_with("A short snippet.\n\n"));
    }

    #[test]
    fn empty_page_ends_paging() {
        let payload = json!({"status": "OK", "response": {"docs": []}});
        assert!(parse_docs(&payload, "robotics", 100).unwrap().is_none());
    }

    #[test]
    fn error_status_fails_the_fetch() {
        let payload = json!({"status": "ERROR", "errors": ["bad key"]});
        assert!(parse_docs(&payload, "robotics", 100).is_err());
        assert!(parse_docs(&json!({"status": "OK"}), "robotics", 100).is_err());
    }
}
