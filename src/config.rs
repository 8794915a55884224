//! TOML configuration.
//!
//! One [`Config`] is loaded per process and passed explicitly into the
//! updater job, the query service, the HTTP server and the scheduler.
//! Secrets never live in the file: providers name the environment variable
//! holding their credential (`api_key_env`), and `BLIP_DB_PATH` may override
//! the store location.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::schema::Schema;

/// Environment variable that overrides `[db].path`.
pub const DB_PATH_ENV: &str = "BLIP_DB_PATH";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default = "Schema::article_catalogue")]
    pub schema: Schema,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    /// Upper bound for a single query, store reads included.
    #[serde(default = "default_query_timeout_ms")]
    pub timeout_ms: u64,
    /// Hint returned to callers when the store is unavailable.
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
    #[serde(default)]
    pub max_limit: Option<usize>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_query_timeout_ms(),
            retry_after_secs: default_retry_after_secs(),
            max_limit: None,
        }
    }
}

fn default_query_timeout_ms() -> u64 {
    2000
}
fn default_retry_after_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// What happens to stored records that are missing from a run's snapshot.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StalePolicy {
    /// Remove them in the same transaction as the upserts.
    #[default]
    Delete,
    /// Leave them untouched.
    Retain,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RefreshConfig {
    #[serde(default)]
    pub stale_policy: StalePolicy,
    /// Accept a run whose combined snapshot has no records. Off by default so
    /// an upstream outage cannot wipe the store under [`StalePolicy::Delete`].
    #[serde(default)]
    pub allow_empty_snapshot: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    #[default]
    Monthly,
    Weekly,
    Daily,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub cadence: Cadence,
    /// UTC hour of the scheduled tick.
    #[serde(default = "default_schedule_hour")]
    pub hour: u32,
    /// Explicit 6-field cron expression (seconds first). Replaces the
    /// cadence-derived expression for ticks. Requires `catch_up = false`,
    /// since catch-up periods come from the cadence.
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default = "default_true")]
    pub catch_up: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cadence: Cadence::default(),
            hour: default_schedule_hour(),
            cron: None,
            catch_up: true,
        }
    }
}

fn default_schedule_hour() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

/// One upstream provider. The `type` key selects the variant.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Json(JsonSourceConfig),
    File(FileSourceConfig),
    Guardian(GuardianSourceConfig),
    Arxiv(ArxivSourceConfig),
    Nyt(NytSourceConfig),
}

impl SourceConfig {
    pub fn name(&self) -> &str {
        match self {
            SourceConfig::Json(c) => &c.name,
            SourceConfig::File(c) => &c.name,
            SourceConfig::Guardian(c) => &c.name,
            SourceConfig::Arxiv(c) => &c.name,
            SourceConfig::Nyt(c) => &c.name,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JsonSourceConfig {
    pub name: String,
    pub url: String,
    /// Environment variable holding a bearer token, if the feed needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// JSON pointer to the item array inside the response (e.g. `/data`).
    #[serde(default)]
    pub items_pointer: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FileSourceConfig {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub items_pointer: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GuardianSourceConfig {
    #[serde(default = "default_guardian_name")]
    pub name: String,
    #[serde(default = "default_guardian_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_guardian_url")]
    pub base_url: String,
    #[serde(default = "default_topics")]
    pub queries: Vec<String>,
    #[serde(default = "default_guardian_section")]
    pub section: String,
    #[serde(default = "default_guardian_page_size")]
    pub page_size: u32,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    /// Articles with less body text than this are skipped.
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,
    #[serde(default = "default_guardian_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArxivSourceConfig {
    #[serde(default = "default_arxiv_name")]
    pub name: String,
    #[serde(default = "default_arxiv_url")]
    pub base_url: String,
    #[serde(default = "default_topics")]
    pub queries: Vec<String>,
    #[serde(default = "default_arxiv_max_results")]
    pub max_results: u32,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_arxiv_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NytSourceConfig {
    #[serde(default = "default_nyt_name")]
    pub name: String,
    #[serde(default = "default_nyt_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_nyt_url")]
    pub base_url: String,
    #[serde(default = "default_topics")]
    pub queries: Vec<String>,
    #[serde(default = "default_nyt_news_desk")]
    pub news_desk: String,
    /// Pages of ten results fetched per topic.
    #[serde(default = "default_nyt_page_limit")]
    pub page_limit: u32,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default = "default_min_text_len")]
    pub min_text_len: usize,
    /// The API allows five requests a minute.
    #[serde(default = "default_nyt_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_http_timeout_secs() -> u64 {
    30
}
fn default_guardian_name() -> String {
    "guardian".to_string()
}
fn default_guardian_key_env() -> String {
    "GUARDIAN_API_KEY".to_string()
}
fn default_guardian_url() -> String {
    "https://content.guardianapis.com/search".to_string()
}
fn default_guardian_section() -> String {
    "technology".to_string()
}
fn default_guardian_page_size() -> u32 {
    50
}
fn default_min_text_len() -> usize {
    100
}
fn default_guardian_delay_ms() -> u64 {
    1000
}
fn default_arxiv_name() -> String {
    "arxiv".to_string()
}
fn default_arxiv_url() -> String {
    "http://export.arxiv.org/api/query".to_string()
}
fn default_arxiv_max_results() -> u32 {
    50
}
fn default_arxiv_delay_ms() -> u64 {
    3000
}
fn default_nyt_name() -> String {
    "nyt".to_string()
}
fn default_nyt_key_env() -> String {
    "NYT_API_KEY".to_string()
}
fn default_nyt_url() -> String {
    "https://api.nytimes.com/svc/search/v2/articlesearch.json".to_string()
}
fn default_nyt_news_desk() -> String {
    "Technology".to_string()
}
fn default_nyt_page_limit() -> u32 {
    5
}
fn default_nyt_delay_ms() -> u64 {
    12_000
}
fn default_lookback_days() -> i64 {
    31
}

/// Technology topics tracked by the article catalogue.
pub const DEFAULT_TOPICS: [&str; 10] = [
    "social media",
    "voice assistants",
    "virtual reality",
    "computer vision",
    "robotics",
    "mobile technology",
    "ai decision-making",
    "neuroscience",
    "computational biology",
    "ubiquitous computing",
];

fn default_topics() -> Vec<String> {
    DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;

    Ok(config)
}

/// Applies environment overrides through `lookup` so callers (and tests)
/// decide where values come from.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(path) = lookup(DB_PATH_ENV).filter(|p| !p.trim().is_empty()) {
        config.db.path = PathBuf::from(path);
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.query.timeout_ms == 0 {
            bail!("query.timeout_ms must be > 0");
        }
        if self.query.max_limit == Some(0) {
            bail!("query.max_limit must be >= 1 when set");
        }

        if self.schedule.hour > 23 {
            bail!("schedule.hour must be in [0, 23]");
        }
        if let Some(cron) = &self.schedule.cron {
            if cron.split_whitespace().count() != 6 {
                bail!(
                    "schedule.cron must have 6 fields (sec min hour day month weekday): '{}'",
                    cron
                );
            }
            if self.schedule.catch_up {
                bail!("schedule.cron cannot be combined with catch_up; set catch_up = false");
            }
        }

        self.schema.validate()?;

        let mut names = HashSet::new();
        for source in &self.sources {
            if source.name().trim().is_empty() {
                bail!("sources: every source needs a non-empty name");
            }
            if !names.insert(source.name().to_string()) {
                bail!("sources: duplicate source name '{}'", source.name());
            }
            match source {
                SourceConfig::Json(c) if c.url.trim().is_empty() => {
                    bail!("sources.{}: url must not be empty", c.name)
                }
                SourceConfig::Guardian(c) if c.queries.is_empty() => {
                    bail!("sources.{}: queries must not be empty", c.name)
                }
                SourceConfig::Arxiv(c) if c.queries.is_empty() => {
                    bail!("sources.{}: queries must not be empty", c.name)
                }
                SourceConfig::Nyt(c) if c.queries.is_empty() || c.page_limit == 0 => {
                    bail!(
                        "sources.{}: queries must not be empty and page_limit must be >= 1",
                        c.name
                    )
                }
                _ => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Config {
        let content = format!("[db]\npath = \"/tmp/blip.sqlite\"\n{}", extra);
        toml::from_str(&content).unwrap()
    }

    #[test]
    fn defaults_apply_when_sections_are_omitted() {
        let cfg = parse("");
        assert_eq!(cfg.query.timeout_ms, 2000);
        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert_eq!(cfg.refresh.stale_policy, StalePolicy::Delete);
        assert!(!cfg.refresh.allow_empty_snapshot);
        assert_eq!(cfg.schedule.cadence, Cadence::Monthly);
        assert!(cfg.schedule.catch_up);
        assert!(cfg.schema.attribute("label").is_some());
        assert!(cfg.sources.is_empty());
        cfg.validate().unwrap();
    }

    #[test]
    fn sources_are_tagged_by_type() {
        let cfg = parse(
            r#"
[[sources]]
type = "guardian"

[[sources]]
type = "file"
name = "replay"
path = "./snapshot.json"
"#,
        );
        assert_eq!(cfg.sources.len(), 2);
        match &cfg.sources[0] {
            SourceConfig::Guardian(g) => {
                assert_eq!(g.name, "guardian");
                assert_eq!(g.api_key_env, "GUARDIAN_API_KEY");
                assert_eq!(g.queries.len(), DEFAULT_TOPICS.len());
            }
            other => panic!("unexpected source: {:?}", other),
        }
        assert_eq!(cfg.sources[1].name(), "replay");
    }

    #[test]
    fn duplicate_source_names_are_rejected() {
        let cfg = parse(
            r#"
[[sources]]
type = "file"
name = "a"
path = "x.json"

[[sources]]
type = "file"
name = "a"
path = "y.json"
"#,
        );
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("duplicate source name"), "{}", err);
    }

    #[test]
    fn bad_schedule_is_rejected() {
        let cfg = parse("[schedule]\nhour = 24\n");
        assert!(cfg.validate().is_err());

        let cfg = parse("[schedule]\ncron = \"0 0 1 * *\"\ncatch_up = false\n");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn cron_override_requires_catch_up_off() {
        let cfg = parse("[schedule]\ncron = \"0 0 3 1 * *\"\n");
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("catch_up"), "{}", err);

        let cfg = parse("[schedule]\ncron = \"0 0 3 1 * *\"\ncatch_up = false\n");
        cfg.validate().unwrap();
    }

    #[test]
    fn nyt_source_defaults() {
        let cfg = parse("[[sources]]\ntype = \"nyt\"\n");
        match &cfg.sources[0] {
            SourceConfig::Nyt(n) => {
                assert_eq!(n.name, "nyt");
                assert_eq!(n.api_key_env, "NYT_API_KEY");
                assert_eq!(n.news_desk, "Technology");
                assert_eq!(n.page_limit, 5);
                assert_eq!(n.min_text_len, 100);
                assert_eq!(n.request_delay_ms, 12_000);
            }
            other => panic!("unexpected source: {:?}", other),
        }
        cfg.validate().unwrap();

        let cfg = parse("[[sources]]\ntype = \"nyt\"\npage_limit = 0\n");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn example_config_is_valid() {
        let cfg: Config = toml::from_str(include_str!("../config/blip.example.toml")).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.refresh.stale_policy, StalePolicy::Retain);
        assert_eq!(cfg.sources.len(), 3);
    }

    #[test]
    fn env_override_replaces_db_path() {
        let mut cfg = parse("");
        apply_env_overrides(&mut cfg, |key| {
            (key == DB_PATH_ENV).then(|| "/var/lib/blip/data.sqlite".to_string())
        });
        assert_eq!(cfg.db.path, PathBuf::from("/var/lib/blip/data.sqlite"));

        let mut cfg = parse("");
        apply_env_overrides(&mut cfg, |_| Some("  ".to_string()));
        assert_eq!(cfg.db.path, PathBuf::from("/tmp/blip.sqlite"));
    }
}
