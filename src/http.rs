//! REST front-end.
//!
//! Identity comes from the `Tailscale-User-Login` / `Tailscale-User-Name`
//! headers injected by Tailscale Serve; a request without them is anonymous
//! (tier 0). Errors render as `ErrorBody` with a status derived from the
//! error kind.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header::HeaderMap, request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::KnowledgeError;
use crate::knowledge::types::{Caller, Channel};
use crate::service::{KnowledgeService, NewProjectDoc, NewReference, NewRule, ReferenceQuery};

pub const LOGIN_HEADER: &str = "tailscale-user-login";
pub const NAME_HEADER: &str = "tailscale-user-name";

/// Build the REST router. The MCP service is nested by the caller.
pub fn router(service: KnowledgeService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _parts: &Parts| {
            origin_allowed(origin.to_str().unwrap_or_default())
        }))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/ingest/rule", post(handle_ingest_rule))
        .route("/ingest/project", post(handle_ingest_project))
        .route("/refs", get(handle_list_refs).post(handle_add_ref))
        .route("/admin/metrics", get(handle_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Tailnet hosts and local development origins.
fn origin_allowed(origin: &str) -> bool {
    let Ok(url) = url::Url::parse(origin) else {
        return false;
    };
    match url.host_str() {
        Some(host) => host.ends_with(".ts.net") || host == "localhost" || host == "127.0.0.1",
        None => false,
    }
}

/// Resolve the caller from identity headers.
pub fn caller_from_headers(headers: &HeaderMap) -> Caller {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from)
    };
    Caller {
        login: header(LOGIN_HEADER),
        display_name: header(NAME_HEADER),
        channel: Channel::Http,
    }
}

// ============ Error response ============

/// A [`KnowledgeError`] on its way out as an HTTP response.
pub struct ApiError(KnowledgeError);

impl From<KnowledgeError> for ApiError {
    fn from(e: KnowledgeError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(KnowledgeError::invalid_field(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(KnowledgeError::invalid_field(rejection.body_text()))
    }
}

pub fn status_for(error: &KnowledgeError) -> StatusCode {
    match error {
        KnowledgeError::Validation { .. } | KnowledgeError::InvalidArgument(_) => {
            StatusCode::BAD_REQUEST
        }
        KnowledgeError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        KnowledgeError::Forbidden { .. } => StatusCode::FORBIDDEN,
        KnowledgeError::NotFound(_) => StatusCode::NOT_FOUND,
        KnowledgeError::EmbeddingUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        KnowledgeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "request failed");
        }
        (status, Json(self.0.to_body())).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn body<T: DeserializeOwned>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    Ok(payload?.0)
}

// ============ Handlers ============

async fn handle_health(State(service): State<KnowledgeService>) -> ApiResult<serde_json::Value> {
    let report = service.health().await?;
    Ok(Json(serde_json::json!({
        "status": report.status,
        "timestamp": report.checked_at,
        "database": "connected",
        "schema_version": report.schema_version,
        "sqlite_vec_version": report.sqlite_vec_version,
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

async fn handle_ingest_rule(
    State(service): State<KnowledgeService>,
    headers: HeaderMap,
    payload: Result<Json<NewRule>, JsonRejection>,
) -> Response {
    let caller = caller_from_headers(&headers);
    let result = match body(payload) {
        Ok(req) => service.ingest_rule(&caller, req).await.map_err(ApiError::from),
        Err(e) => Err(e),
    };
    respond(result)
}

async fn handle_ingest_project(
    State(service): State<KnowledgeService>,
    headers: HeaderMap,
    payload: Result<Json<NewProjectDoc>, JsonRejection>,
) -> Response {
    let caller = caller_from_headers(&headers);
    let result = match body(payload) {
        Ok(req) => service.ingest_project_doc(&caller, req).await.map_err(ApiError::from),
        Err(e) => Err(e),
    };
    respond(result)
}

/// `GET /refs?tags=a,b&limit=n`
#[derive(Debug, Deserialize)]
struct RefsQuery {
    tags: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct RefsResponse<T> {
    count: usize,
    #[serde(rename = "tagFilter", skip_serializing_if = "Vec::is_empty")]
    tag_filter: Vec<String>,
    references: Vec<T>,
}

async fn handle_list_refs(
    State(service): State<KnowledgeService>,
    headers: HeaderMap,
    query: Result<Query<RefsQuery>, QueryRejection>,
) -> Response {
    let caller = caller_from_headers(&headers);
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => return ApiError::from(rejection).into_response(),
    };
    let tags: Vec<String> = query
        .tags
        .as_deref()
        .map(|t| t.split(',').map(String::from).collect())
        .unwrap_or_default();

    let req = ReferenceQuery {
        tags: tags.clone(),
        limit: query.limit,
    };
    let result = service
        .list_references(&caller, req)
        .await
        .map(|references| RefsResponse {
            count: references.len(),
            tag_filter: tags,
            references,
        })
        .map_err(ApiError::from);
    respond(result)
}

async fn handle_add_ref(
    State(service): State<KnowledgeService>,
    headers: HeaderMap,
    payload: Result<Json<NewReference>, JsonRejection>,
) -> Response {
    let caller = caller_from_headers(&headers);
    let result = match body(payload) {
        Ok(req) => service.add_reference(&caller, req).await.map_err(ApiError::from),
        Err(e) => Err(e),
    };
    respond(result)
}

async fn handle_metrics(State(service): State<KnowledgeService>, headers: HeaderMap) -> Response {
    let caller = caller_from_headers(&headers);
    respond(service.metrics(&caller).await.map_err(ApiError::from))
}

fn respond<T: Serialize>(result: Result<T, ApiError>) -> Response {
    match result {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::config::KnowledgeConfig;
    use crate::db::Store;
    use crate::embedding::{hashed::HashedProvider, EmbeddingAdapter};

    fn test_service() -> KnowledgeService {
        let store = Store::open_in_memory(Duration::from_secs(5)).unwrap();
        let embedder = EmbeddingAdapter::new(Arc::new(HashedProvider::new(16)), 16, Duration::from_secs(5));
        KnowledgeService::new(store, embedder, Arc::new(KnowledgeConfig::default()))
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn post_json(uri: &str, login: Option<&str>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::post(uri).header("content-type", "application/json");
        if let Some(login) = login {
            builder = builder.header(LOGIN_HEADER, login);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(&KnowledgeError::invalid_field("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&KnowledgeError::InvalidArgument("k".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&KnowledgeError::Unauthenticated("x".into())), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(&KnowledgeError::Forbidden { required: 1, actual: 0 }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status_for(&KnowledgeError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&KnowledgeError::EmbeddingUnavailable("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for(&KnowledgeError::Storage("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn headers_resolve_caller() {
        let mut headers = HeaderMap::new();
        assert!(caller_from_headers(&headers).login.is_none());

        headers.insert(LOGIN_HEADER, HeaderValue::from_static("alice@example.com"));
        headers.insert(NAME_HEADER, HeaderValue::from_static("Alice"));
        let caller = caller_from_headers(&headers);
        assert_eq!(caller.login.as_deref(), Some("alice@example.com"));
        assert_eq!(caller.display_name.as_deref(), Some("Alice"));
        assert_eq!(caller.channel, Channel::Http);
    }

    #[test]
    fn cors_origins() {
        assert!(origin_allowed("https://box.tail1234.ts.net"));
        assert!(origin_allowed("http://localhost:5173"));
        assert!(!origin_allowed("https://evil.example.com"));
        assert!(!origin_allowed("not an origin"));
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, json) = send(router(test_service()), Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn ingest_rule_then_validation_error() {
        let app = router(test_service());
        let (status, json) = send(
            app.clone(),
            post_json("/ingest/rule", Some("alice"), serde_json::json!({"title": "Validate input", "body": "Always."})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["replaced"], false);

        let (status, json) = send(app, post_json("/ingest/rule", Some("alice"), serde_json::json!({"title": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
    }

    #[tokio::test]
    async fn anonymous_reference_add_is_forbidden() {
        let app = router(test_service());
        let (status, json) = send(
            app,
            post_json("/refs", None, serde_json::json!({"title": "Docs", "url": "https://docs.rs"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "forbidden");
    }

    #[tokio::test]
    async fn refs_listing_parses_query() {
        let (status, json) = send(
            router(test_service()),
            Request::get("/refs?tags=rust,async&limit=5").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["count"], 0);
        assert_eq!(json["tagFilter"][0], "rust");
    }

    #[tokio::test]
    async fn malformed_refs_query_renders_error_body() {
        let (status, json) = send(
            router(test_service()),
            Request::get("/refs?limit=abc").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "validation_error");
        assert!(json["message"].as_str().unwrap().starts_with("validation failed"));
    }

    #[tokio::test]
    async fn metrics_require_admin_tier() {
        let (status, _) = send(
            router(test_service()),
            Request::get("/admin/metrics").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
