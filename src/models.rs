//! Core data types that flow from the upstream providers through the store
//! to the query API.

use chrono::{DateTime, SubsecRound, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Raw item produced by a provider before it is mapped onto the schema.
pub type UpstreamItem = serde_json::Map<String, serde_json::Value>;

/// A typed attribute value. Text and category attributes are both strings;
/// the schema tells them apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            AttributeValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            AttributeValue::Text(_) => None,
        }
    }

    /// Total order used for sorting: numbers numerically, strings
    /// lexicographically, numbers before strings.
    pub fn sort_cmp(&self, other: &AttributeValue) -> Ordering {
        match (self, other) {
            (AttributeValue::Number(a), AttributeValue::Number(b)) => {
                a.partial_cmp(b).unwrap_or(Ordering::Equal)
            }
            (AttributeValue::Text(a), AttributeValue::Text(b)) => a.cmp(b),
            (AttributeValue::Number(_), AttributeValue::Text(_)) => Ordering::Less,
            (AttributeValue::Text(_), AttributeValue::Number(_)) => Ordering::Greater,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Number(n) => write!(f, "{}", n),
            AttributeValue::Text(s) => f.write_str(s),
        }
    }
}

/// One dataset entity. `id` is the upsert key and never changes between
/// refresh runs.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub attributes: BTreeMap<String, AttributeValue>,
    /// Start of the run that last changed this record's content.
    pub last_updated: DateTime<Utc>,
}

impl Record {
    pub fn get(&self, attribute: &str) -> Option<&AttributeValue> {
        self.attributes.get(attribute)
    }

    /// SHA-256 over the canonical attribute JSON. Attribute maps are ordered,
    /// so equal content always hashes equal.
    pub fn content_hash(&self) -> String {
        let canonical = serde_json::to_string(&self.attributes).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Records serialize as one flat object: `{"id", <attributes>..., "last_updated"}`.
impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attributes.len() + 2))?;
        map.serialize_entry("id", &self.id)?;
        for (name, value) in &self.attributes {
            map.serialize_entry(name, value)?;
        }
        map.serialize_entry("last_updated", &self.last_updated.to_rfc3339())?;
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Created at job start, not yet finalized.
    Running,
    Success,
    /// Committed, but some upstream items were rejected.
    Partial,
    Failure,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Running => "running",
            RunOutcome::Success => "success",
            RunOutcome::Partial => "partial",
            RunOutcome::Failure => "failure",
        }
    }
}

impl FromStr for RunOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunOutcome::Running),
            "success" => Ok(RunOutcome::Success),
            "partial" => Ok(RunOutcome::Partial),
            "failure" => Ok(RunOutcome::Failure),
            other => Err(format!("unknown run outcome: {}", other)),
        }
    }
}

/// Execution record of one updater job invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: RunOutcome,
    /// Inserted plus updated records.
    pub records_written: u64,
    pub records_deleted: u64,
    pub records_rejected: u64,
    pub error: Option<String>,
}

impl RefreshRun {
    pub fn start() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now().trunc_subsecs(0),
            finished_at: None,
            outcome: RunOutcome::Running,
            records_written: 0,
            records_deleted: 0,
            records_rejected: 0,
            error: None,
        }
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = outcome;
        self.finished_at = Some(Utc::now().trunc_subsecs(0));
    }
}
