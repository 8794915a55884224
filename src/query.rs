//! Filter/sort query service.
//!
//! Answers "records matching these attribute values, in this order" over
//! whatever the store holds right now. Filters combine with AND across
//! attributes and OR within one attribute's value set. Without a sort
//! directive records come back by identifier ascending; with one, records
//! lacking the attribute sort last in either direction and ties fall back
//! to identifier ascending, so equal inputs always give equal output.
//!
//! Every filter value is checked against [`legal_values`](QueryService::legal_values),
//! the same resolver the filter UI binding lists options from.

use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::models::Record;
use crate::schema::{AttributeSpec, Schema};
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(QueryError::InvalidSort(format!(
                "unknown sort direction '{}' (expected asc or desc)",
                other
            ))),
        }
    }
}

/// Sort directive as received from a caller. The direction stays a string
/// until validation so a bad value surfaces as `invalid_sort`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SortRequest {
    pub attribute: String,
    #[serde(default)]
    pub direction: Option<String>,
}

/// Unknown keys are rejected so a misspelled `filters` or `direction` cannot
/// pass as an unfiltered or default-ordered query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryRequest {
    /// Attribute → accepted values. A single string is accepted as a
    /// one-value set.
    #[serde(default, deserialize_with = "one_or_many")]
    pub filters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub sort: Option<SortRequest>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl QueryRequest {
    pub fn filter(mut self, attribute: &str, value: &str) -> Self {
        self.filters
            .entry(attribute.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn sort_by(mut self, attribute: &str, direction: &str) -> Self {
        self.sort = Some(SortRequest {
            attribute: attribute.to_string(),
            direction: Some(direction.to_string()),
        });
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, OneOrMany>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| match v {
            OneOrMany::One(s) => (k, vec![s]),
            OneOrMany::Many(list) => (k, list),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub records: Vec<Record>,
    /// Matches before pagination.
    pub total: usize,
}

struct SortDirective<'a> {
    attribute: &'a str,
    direction: SortDirection,
}

pub struct QueryService {
    store: Arc<dyn Store>,
    schema: Schema,
    timeout: Duration,
    retry_after_secs: u64,
    max_limit: Option<usize>,
}

impl QueryService {
    pub fn new(store: Arc<dyn Store>, schema: Schema, config: &QueryConfig) -> Self {
        Self {
            store,
            schema,
            timeout: Duration::from_millis(config.timeout_ms),
            retry_after_secs: config.retry_after_secs,
            max_limit: config.max_limit,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, QueryError> {
        let result = match tokio::time::timeout(self.timeout, self.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(self.timed_out()),
        };
        if let Err(e) = &result {
            match e {
                QueryError::ServiceUnavailable { .. } => tracing::warn!(error = %e, "query failed"),
                _ => tracing::debug!(error = %e, "rejected query"),
            }
        }
        result
    }

    async fn execute(&self, request: &QueryRequest) -> Result<QueryResponse, QueryError> {
        let sort = self.validate_sort(request.sort.as_ref())?;
        let specs = self.validate_filter_names(&request.filters)?;

        let records = self.load_records().await?;

        let mut predicates: Vec<(&str, BTreeSet<&str>)> = Vec::new();
        for (spec, values) in specs {
            let legal = legal_values_in(spec, &records);
            for value in values {
                if !legal.iter().any(|l| l == value) {
                    return Err(QueryError::InvalidFilter(format!(
                        "'{}' is not a legal value for '{}'",
                        value, spec.name
                    )));
                }
            }
            predicates.push((
                spec.name.as_str(),
                values.iter().map(String::as_str).collect(),
            ));
        }

        let mut matched: Vec<Record> = records
            .into_iter()
            .filter(|record| {
                predicates.iter().all(|(attribute, accepted)| {
                    record
                        .get(attribute)
                        .and_then(|v| v.as_str())
                        .is_some_and(|v| accepted.contains(v))
                })
            })
            .collect();

        match &sort {
            Some(directive) => matched.sort_by(|a, b| compare(a, b, directive)),
            None => matched.sort_by(|a, b| a.id.cmp(&b.id)),
        }

        let total = matched.len();
        let offset = request.offset.unwrap_or(0);
        let limit = match (request.limit, self.max_limit) {
            (Some(l), Some(max)) => Some(l.min(max)),
            (None, Some(max)) => Some(max),
            (l, None) => l,
        };
        let records = matched
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        Ok(QueryResponse { records, total })
    }

    fn validate_sort<'a>(
        &self,
        sort: Option<&'a SortRequest>,
    ) -> Result<Option<SortDirective<'a>>, QueryError> {
        let Some(sort) = sort else {
            return Ok(None);
        };
        match self.schema.attribute(&sort.attribute) {
            None => {
                return Err(QueryError::InvalidSort(format!(
                    "unknown attribute '{}'",
                    sort.attribute
                )))
            }
            Some(spec) if !spec.sortable => {
                return Err(QueryError::InvalidSort(format!(
                    "attribute '{}' is not sortable",
                    sort.attribute
                )))
            }
            Some(_) => {}
        }
        let direction = match &sort.direction {
            Some(d) => d.parse()?,
            None => SortDirection::default(),
        };
        Ok(Some(SortDirective {
            attribute: &sort.attribute,
            direction,
        }))
    }

    fn validate_filter_names<'a>(
        &self,
        filters: &'a BTreeMap<String, Vec<String>>,
    ) -> Result<Vec<(&AttributeSpec, &'a Vec<String>)>, QueryError> {
        filters
            .iter()
            .map(|(name, values)| {
                let spec = self.filterable_spec(name)?;
                if values.is_empty() {
                    return Err(QueryError::InvalidFilter(format!(
                        "filter '{}' has no values",
                        name
                    )));
                }
                Ok((spec, values))
            })
            .collect()
    }

    fn filterable_spec(&self, name: &str) -> Result<&AttributeSpec, QueryError> {
        match self.schema.attribute(name) {
            None => Err(QueryError::InvalidFilter(format!(
                "unknown attribute '{}'",
                name
            ))),
            Some(spec) if !spec.filterable => Err(QueryError::InvalidFilter(format!(
                "attribute '{}' is not filterable",
                name
            ))),
            Some(spec) => Ok(spec),
        }
    }

    /// Ordered legal values of a filterable attribute.
    pub async fn legal_values(&self, attribute: &str) -> Result<Vec<String>, QueryError> {
        let spec = self.filterable_spec(attribute)?;
        if spec.has_fixed_values() {
            return Ok(spec.values.clone());
        }
        let records = self.load_records_with_timeout().await?;
        Ok(legal_values_in(spec, &records))
    }

    /// Legal values of every filterable attribute, from one store read.
    pub async fn all_legal_values(&self) -> Result<Vec<(&AttributeSpec, Vec<String>)>, QueryError> {
        let needs_store = self.schema.filterable().any(|s| !s.has_fixed_values());
        let records = if needs_store {
            self.load_records_with_timeout().await?
        } else {
            Vec::new()
        };
        Ok(self
            .schema
            .filterable()
            .map(|spec| (spec, legal_values_in(spec, &records)))
            .collect())
    }

    async fn load_records(&self) -> Result<Vec<Record>, QueryError> {
        self.store
            .all_records()
            .await
            .map_err(|e| QueryError::ServiceUnavailable {
                message: format!("store read failed: {:#}", e),
                retry_after_secs: self.retry_after_secs,
            })
    }

    async fn load_records_with_timeout(&self) -> Result<Vec<Record>, QueryError> {
        match tokio::time::timeout(self.timeout, self.load_records()).await {
            Ok(result) => result,
            Err(_) => Err(self.timed_out()),
        }
    }

    fn timed_out(&self) -> QueryError {
        QueryError::ServiceUnavailable {
            message: format!("query timed out after {}ms", self.timeout.as_millis()),
            retry_after_secs: self.retry_after_secs,
        }
    }
}

/// Legal values of `spec` given the current records: the fixed set when the
/// schema declares one, otherwise the distinct stored values in ascending
/// order.
pub fn legal_values_in(spec: &AttributeSpec, records: &[Record]) -> Vec<String> {
    if spec.has_fixed_values() {
        return spec.values.clone();
    }
    records
        .iter()
        .filter_map(|r| r.get(&spec.name).and_then(|v| v.as_str()))
        .collect::<BTreeSet<&str>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn compare(a: &Record, b: &Record, sort: &SortDirective<'_>) -> Ordering {
    let by_value = match (a.get(sort.attribute), b.get(sort.attribute)) {
        (Some(x), Some(y)) => match sort.direction {
            SortDirection::Asc => x.sort_cmp(y),
            SortDirection::Desc => y.sort_cmp(x),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_value.then_with(|| a.id.cmp(&b.id))
}
