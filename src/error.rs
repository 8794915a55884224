//! Error taxonomy for the updater job and the query service.

use std::fmt;

/// Failure of a refresh run. Every variant aborts the run with the store
/// left as it was before the run started.
#[derive(Debug)]
pub enum RefreshError {
    /// Missing credential, unreadable provider configuration.
    Config(anyhow::Error),
    /// Upstream provider unreachable or returned malformed data.
    UpstreamFetch {
        provider: String,
        source: anyhow::Error,
    },
    /// The store rejected the write or could not be reached.
    StoreWrite(anyhow::Error),
}

impl RefreshError {
    pub fn upstream(provider: impl Into<String>, source: anyhow::Error) -> Self {
        RefreshError::UpstreamFetch {
            provider: provider.into(),
            source,
        }
    }

    /// Process exit code reported to the surrounding scheduler.
    pub fn exit_code(&self) -> u8 {
        match self {
            RefreshError::Config(_) => 1,
            RefreshError::UpstreamFetch { .. } => 2,
            RefreshError::StoreWrite(_) => 3,
        }
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshError::Config(e) => write!(f, "configuration error: {:#}", e),
            RefreshError::UpstreamFetch { provider, source } => {
                write!(f, "upstream fetch failed ({}): {:#}", provider, source)
            }
            RefreshError::StoreWrite(e) => write!(f, "store write failed: {:#}", e),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Request-scoped failure of the query service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    InvalidFilter(String),
    InvalidSort(String),
    /// Store unreachable or too slow. Callers may retry after the hint.
    ServiceUnavailable {
        message: String,
        retry_after_secs: u64,
    },
}

impl QueryError {
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::InvalidFilter(_) => "invalid_filter",
            QueryError::InvalidSort(_) => "invalid_sort",
            QueryError::ServiceUnavailable { .. } => "service_unavailable",
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::InvalidFilter(msg) => write!(f, "invalid filter: {}", msg),
            QueryError::InvalidSort(msg) => write!(f, "invalid sort: {}", msg),
            QueryError::ServiceUnavailable {
                message,
                retry_after_secs,
            } => write!(
                f,
                "service unavailable: {} (retry after {}s)",
                message, retry_after_secs
            ),
        }
    }
}

impl std::error::Error for QueryError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_failure_kinds() {
        let upstream = RefreshError::upstream("guardian", anyhow::anyhow!("HTTP 503"));
        assert_eq!(upstream.exit_code(), 2);
        assert_eq!(
            upstream.to_string(),
            "upstream fetch failed (guardian): HTTP 503"
        );
        assert_eq!(
            RefreshError::StoreWrite(anyhow::anyhow!("disk full")).exit_code(),
            3
        );
        assert_eq!(RefreshError::Config(anyhow::anyhow!("x")).exit_code(), 1);
    }

    #[test]
    fn query_error_codes() {
        assert_eq!(
            QueryError::InvalidFilter("x".into()).code(),
            "invalid_filter"
        );
        let e = QueryError::ServiceUnavailable {
            message: "timed out".into(),
            retry_after_secs: 30,
        };
        assert_eq!(e.code(), "service_unavailable");
        assert!(e.to_string().contains("retry after 30s"));
    }
}
