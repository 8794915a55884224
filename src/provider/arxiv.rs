//! arXiv query API provider.
//!
//! Searches paper titles for each configured topic, newest submissions
//! first, and keeps entries published inside the lookback window. The
//! response is an Atom feed, parsed with `quick-xml`.
//!
//! Identifiers are the version-less abstract URL, so a paper that gets a new
//! revision upstream keeps the same record.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::ArxivSourceConfig;
use crate::models::UpstreamItem;

use super::{http_client, Provider};

pub const MAGAZINE: &str = "arXiv";

/// One `<entry>` of the Atom feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub published: String,
}

#[derive(Clone, Copy)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
}

pub struct ArxivProvider {
    config: ArxivSourceConfig,
    client: reqwest::Client,
}

impl ArxivProvider {
    pub fn new(config: ArxivSourceConfig) -> Result<Self> {
        let client = http_client(config.timeout_secs)?;
        Ok(Self { config, client })
    }

    async fn search(&self, query: &str) -> Result<Vec<UpstreamItem>> {
        let params: Vec<(&str, String)> = vec![
            ("search_query", format!("ti:\"{}\"", query)),
            ("start", "0".to_string()),
            ("max_results", self.config.max_results.to_string()),
            ("sortBy", "submittedDate".to_string()),
            ("sortOrder", "descending".to_string()),
        ];

        let response = self
            .client
            .get(&self.config.base_url)
            .query(&params)
            .send()
            .await
            .with_context(|| format!("requesting arXiv search for '{}'", query))?;
        let status = response.status();
        if !status.is_success() {
            bail!("arXiv API returned HTTP {} for '{}'", status, query);
        }

        let xml = response.text().await.context("reading arXiv response")?;
        let entries = parse_feed(&xml)?;
        let cutoff = Utc::now() - ChronoDuration::days(self.config.lookback_days);
        Ok(entries_to_items(&entries, query, cutoff))
    }
}

#[async_trait]
impl Provider for ArxivProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn provider_type(&self) -> &str {
        "arxiv"
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
                "arxiv search"
            );
            items.extend(found);
        }
        Ok(items)
    }
}

/// Parses the `<entry>` elements of an Atom feed. arXiv reports a bad query
/// as a feed holding one entry under `/api/errors`, which fails the parse.
pub fn parse_feed(xml: &str) -> Result<Vec<AtomEntry>> {
    let mut reader = quick_xml::Reader::from_reader(xml.as_bytes());
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<AtomEntry> = None;
    let mut field: Option<Field> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => match e.local_name().as_ref() {
                b"entry" => current = Some(AtomEntry::default()),
                b"id" if current.is_some() => field = Some(Field::Id),
                b"title" if current.is_some() => field = Some(Field::Title),
                b"summary" if current.is_some() => field = Some(Field::Summary),
                b"published" if current.is_some() => field = Some(Field::Published),
                _ => field = None,
            },
            Ok(quick_xml::events::Event::Text(te)) => {
                if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                    let text = te.unescape().unwrap_or_default();
                    let target = match f {
                        Field::Id => &mut entry.id,
                        Field::Title => &mut entry.title,
                        Field::Summary => &mut entry.summary,
                        Field::Published => &mut entry.published,
                    };
                    if !target.is_empty() {
                        target.push(' ');
                    }
                    target.push_str(text.as_ref());
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"entry" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                field = None;
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => bail!("malformed arXiv feed: {}", e),
            _ => {}
        }
        buf.clear();
    }

    if let Some(error) = entries.iter().find(|e| e.id.contains("/api/errors")) {
        bail!("arXiv API error: {}", collapse_whitespace(&error.summary));
    }
    Ok(entries)
}

/// `http://arxiv.org/abs/2401.01234v2` → `2401.01234`.
pub fn normalize_arxiv_id(raw: &str) -> String {
    let id = raw.rsplit("/abs/").next().unwrap_or(raw).trim();
    match id.rfind('v') {
        Some(pos)
            if pos > 0
                && pos + 1 < id.len()
                && id[pos + 1..].chars().all(|c| c.is_ascii_digit()) =>
        {
            id[..pos].to_string()
        }
        _ => id.to_string(),
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Maps feed entries published at or after `cutoff` onto article items.
pub fn entries_to_items(
    entries: &[AtomEntry],
    query: &str,
    cutoff: DateTime<Utc>,
) -> Vec<UpstreamItem> {
    entries
        .iter()
        .filter_map(|entry| {
            let published = DateTime::parse_from_rfc3339(entry.published.trim())
                .ok()?
                .with_timezone(&Utc);
            if published < cutoff || entry.id.trim().is_empty() {
                return None;
            }
            let url = format!("https://arxiv.org/abs/{}", normalize_arxiv_id(&entry.id));
            match json!({
                "id": url,
                "url": url,
                "title": collapse_whitespace(&entry.title),
                "text": collapse_whitespace(&entry.summary),
                "magazine": MAGAZINE,
                "label": query,
                "published_at": published.format("%Y-%m-%d").to_string(),
            }) {
                Value::Object(map) => Some(map),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>http://arxiv.org/api/query</id>
  <title>ArXiv Query</title>
  <entry>
    <id>http://arxiv.org/abs/2610.01234v2</id>
    <published>2026-10-10T17:59:00Z</published>
    <title>Social Media
      and Wellbeing</title>
    <summary>  We study &amp; measure
      harms.</summary>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/2501.00001v1</id>
    <published>2025-01-02T10:00:00Z</published>
    <title>Old Paper</title>
    <summary>Old.</summary>
  </entry>
</feed>"#;

    #[test]
    fn parses_entries_but_not_feed_metadata() {
        let entries = parse_feed(FEED).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "http://arxiv.org/abs/2610.01234v2");
        assert_eq!(entries[0].published, "2026-10-10T17:59:00Z");
        assert!(entries[0].summary.contains("&"));
    }

    #[test]
    fn keeps_recent_entries_with_stable_ids() {
        let entries = parse_feed(FEED).unwrap();
        let cutoff = Utc.with_ymd_and_hms(2026, 9, 15, 0, 0, 0).unwrap();
        let items = entries_to_items(&entries, "social media", cutoff);
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item["id"], "https://arxiv.org/abs/2610.01234");
        assert_eq!(item["title"], "Social Media and Wellbeing");
        assert_eq!(item["text"], "We study & measure harms.");
        assert_eq!(item["label"], "social media");
        assert_eq!(item["published_at"], "2026-10-10");
    }

    #[test]
    fn normalizes_ids() {
        assert_eq!(normalize_arxiv_id("http://arxiv.org/abs/2401.01234v12"), "2401.01234");
        assert_eq!(normalize_arxiv_id("2401.01234"), "2401.01234");
        assert_eq!(normalize_arxiv_id("http://arxiv.org/abs/cs/0112017v1"), "cs/0112017");
    }

    #[test]
    fn error_feed_fails_the_fetch() {
        let feed = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>http://arxiv.org/api/query</id>
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format_for_1234</id>
    <title>Error</title>
    <summary>incorrect id format for 1234</summary>
  </entry>
</feed>"#;
        let err = parse_feed(feed).unwrap_err().to_string();
        assert!(err.contains("incorrect id format"), "{}", err);
    }
}
