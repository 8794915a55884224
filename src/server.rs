//! HTTP API for the query service and the filter UI binding.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/records` | Query via URL parameters |
//! | `POST` | `/records/query` | Query via JSON body |
//! | `GET`  | `/filters` | Filter and sort vocabulary |
//! | `GET`  | `/filters/{attribute}` | Legal values of one attribute |
//!
//! `GET /records` treats `sort`, `order`, `limit` and `offset` as controls
//! and every other parameter as a filter; repeating a parameter adds values
//! to that attribute's set:
//!
//! ```text
//! GET /records?label=robotics&label=neuroscience&sort=published_at&order=desc
//! ```
//!
//! The JSON body of `POST /records/query` is
//! `{"filters": {"label": ["robotics"]}, "sort": {"attribute": "title", "direction": "asc"}, "limit": 20, "offset": 0}`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "invalid_filter", "message": "unknown attribute 'colour'" } }
//! ```
//!
//! Error codes: `invalid_filter` (400), `invalid_sort` (400), `bad_request`
//! (400), `service_unavailable` (503, with a `Retry-After` header).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the UI is served from a
//! separate origin.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::QueryError;
use crate::filters::{self, FilterOption, Vocabulary};
use crate::query::{QueryRequest, QueryResponse, QueryService, SortRequest};
use crate::store::SqliteStore;

#[derive(Clone)]
struct AppState {
    service: Arc<QueryService>,
}

/// Builds the API router around a query service.
pub fn router(service: Arc<QueryService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/records", get(handle_records))
        .route("/records/query", post(handle_query))
        .route("/filters", get(handle_vocabulary))
        .route("/filters/{attribute}", get(handle_filter_options))
        .layer(cors)
        .with_state(AppState { service })
}

/// Starts the HTTP server on `[server].bind` over the SQLite store. Runs
/// until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = SqliteStore::open(config).await?;
    let service = QueryService::new(Arc::new(store), config.schema.clone(), &config.query);
    let app = router(Arc::new(service));

    let bind_addr = &config.server.bind;
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    println!("Query API listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "query API started");

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    retry_after_secs: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        let (status, retry_after_secs) = match &err {
            QueryError::InvalidFilter(_) | QueryError::InvalidSort(_) => {
                (StatusCode::BAD_REQUEST, None)
            }
            QueryError::ServiceUnavailable {
                retry_after_secs, ..
            } => (StatusCode::SERVICE_UNAVAILABLE, Some(*retry_after_secs)),
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
            retry_after_secs,
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        retry_after_secs: None,
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /records ============

fn parse_count(name: &str, value: &str) -> Result<usize, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| bad_request(format!("{} must be a non-negative integer", name)))
}

/// Splits URL parameters into a [`QueryRequest`].
fn request_from_params(params: Vec<(String, String)>) -> Result<QueryRequest, AppError> {
    let mut request = QueryRequest::default();
    let mut sort_attribute = None;
    let mut order = None;

    for (key, value) in params {
        match key.as_str() {
            "sort" => sort_attribute = Some(value),
            "order" => order = Some(value),
            "limit" => request.limit = Some(parse_count("limit", &value)?),
            "offset" => request.offset = Some(parse_count("offset", &value)?),
            _ => request.filters.entry(key).or_default().push(value),
        }
    }

    match (sort_attribute, order) {
        (Some(attribute), direction) => {
            request.sort = Some(SortRequest {
                attribute,
                direction,
            })
        }
        (None, Some(_)) => {
            return Err(QueryError::InvalidSort("order given without sort".to_string()).into())
        }
        (None, None) => {}
    }
    Ok(request)
}

async fn handle_records(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<QueryResponse>, AppError> {
    let request = request_from_params(params)?;
    Ok(Json(state.service.query(&request).await?))
}

// ============ POST /records/query ============

async fn handle_query(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<QueryResponse>, AppError> {
    let request: QueryRequest = if body.iter().all(u8::is_ascii_whitespace) {
        QueryRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| bad_request(format!("invalid query body: {}", e)))?
    };
    Ok(Json(state.service.query(&request).await?))
}

// ============ GET /filters ============

async fn handle_vocabulary(State(state): State<AppState>) -> Result<Json<Vocabulary>, AppError> {
    Ok(Json(filters::vocabulary(&state.service).await?))
}

async fn handle_filter_options(
    State(state): State<AppState>,
    Path(attribute): Path<String>,
) -> Result<Json<Vec<FilterOption>>, AppError> {
    Ok(Json(
        filters::filter_options(&state.service, &attribute).await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn url_params_split_into_filters_and_controls() {
        let req = request_from_params(params(&[
            ("label", "robotics"),
            ("label", "neuroscience"),
            ("magazine", "arXiv"),
            ("sort", "title"),
            ("order", "desc"),
            ("limit", "5"),
        ]))
        .unwrap();
        assert_eq!(req.filters["label"], vec!["robotics", "neuroscience"]);
        assert_eq!(req.filters["magazine"], vec!["arXiv"]);
        let sort = req.sort.unwrap();
        assert_eq!(sort.attribute, "title");
        assert_eq!(sort.direction.as_deref(), Some("desc"));
        assert_eq!(req.limit, Some(5));
        assert_eq!(req.offset, None);
    }

    #[test]
    fn bad_controls_are_rejected() {
        let err = request_from_params(params(&[("limit", "-1")])).unwrap_err();
        assert_eq!(err.code, "bad_request");
        let err = request_from_params(params(&[("order", "asc")])).unwrap_err();
        assert_eq!(err.code, "invalid_sort");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unavailable_maps_to_503_with_retry_hint() {
        let err = AppError::from(QueryError::ServiceUnavailable {
            message: "timed out".into(),
            retry_after_secs: 30,
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "30");
    }
}
