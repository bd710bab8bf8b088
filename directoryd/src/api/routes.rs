use std::path::PathBuf;
use std::sync::Arc;
use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;
use shared::protocol::{
    CheckIpResponse, CheckIpStatus, ErrorResponse, ExternalServicesRequest, ExternalServicesResponse,
    LocalityReport, StatusReport, API_PREFIX,
};
use crate::aggregate::template::TemplateContext;
use crate::directory::hash::compute_hash;
use crate::directory::{load_document, Directory, RenderOptions};

#[derive(Clone)]
pub struct AppState {
    pub directory: Directory,
    pub document_path: Arc<PathBuf>,
    pub context: Arc<TemplateContext>,
    /// Cancelled on shutdown; each request works under a child token
    pub cancel: CancellationToken,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(code: StatusCode, message: impl Into<String>) -> ApiError {
    (code, Json(ErrorResponse { error: message.into() }))
}

#[derive(Deserialize)]
pub struct UrlQuery {
    pub url: Option<String>,
}

impl UrlQuery {
    fn required(self) -> Result<String, ApiError> {
        self.url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "URL is required"))
    }
}

#[derive(Deserialize)]
pub struct LocalityQuery {
    pub beacon: Option<String>,
}

#[derive(Deserialize)]
pub struct DirectoryQuery {
    #[serde(default, deserialize_with = "query_flag")]
    pub status: bool,
    pub mode: Option<String>,
    pub q: Option<String>,
}

/// Query-string boolean: `true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`.
/// A bare `?status` reads as true.
fn query_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(serde::de::Error::custom(format!("invalid flag {:?}", other))),
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/check-ip", get(check_ip))
        .route("/locality", get(get_locality))
        .route("/external-services", post(external_services))
        .route("/directory", get(get_directory));

    Router::new().nest(API_PREFIX, api).with_state(state)
}

async fn get_status(
    State(state): State<AppState>,
    Query(params): Query<UrlQuery>,
) -> Result<Json<StatusReport>, ApiError> {
    let url = params.required()?;
    let cancel = state.cancel.child_token();
    Ok(Json(state.directory.status.resolve(&url, &cancel).await))
}

async fn check_ip(
    State(state): State<AppState>,
    Query(params): Query<UrlQuery>,
) -> Result<(StatusCode, Json<CheckIpResponse>), ApiError> {
    let url = params.required()?;
    let cancel = state.cancel.child_token();

    if state.directory.status.is_reachable(&url, &cancel).await {
        Ok((
            StatusCode::OK,
            Json(CheckIpResponse {
                status: CheckIpStatus::Ok,
                reachable: true,
            }),
        ))
    } else {
        Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(CheckIpResponse {
                status: CheckIpStatus::Error,
                reachable: false,
            }),
        ))
    }
}

async fn get_locality(
    State(state): State<AppState>,
    Query(params): Query<LocalityQuery>,
) -> Json<LocalityReport> {
    let cancel = state.cancel.child_token();
    Json(state.directory.locality.resolve(params.beacon.as_deref(), &cancel).await)
}

async fn external_services(
    State(state): State<AppState>,
    Json(request): Json<ExternalServicesRequest>,
) -> Result<Json<ExternalServicesResponse>, ApiError> {
    let document = load_document(&state.document_path).await;
    let source = document.find_source(&request.source_name).ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            format!("Unknown external source: {}", request.source_name),
        )
    })?;

    let cancel = state.cancel.child_token();
    state
        .directory
        .aggregator
        .try_aggregate(source, request.is_local, &state.context, &cancel)
        .await
        .map(|services| Json(ExternalServicesResponse { services }))
        .map_err(|e| {
            tracing::error!("Failed to fetch external source {}: {}", source.name, e);
            api_error(
                e.upstream_status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                "Failed to fetch external services",
            )
        })
}

fn parse_mode(mode: Option<&str>) -> Result<Option<bool>, ApiError> {
    match mode.map(str::trim) {
        None | Some("") | Some("auto") => Ok(None),
        Some("local") | Some("internal") => Ok(Some(true)),
        Some("remote") | Some("external") => Ok(Some(false)),
        Some(other) => Err(api_error(StatusCode::BAD_REQUEST, format!("Unknown mode: {}", other))),
    }
}

/// `If-None-Match` matches on the bare hash, ignoring quotes and weak prefixes.
fn etag_matches(headers: &HeaderMap, hash: &str) -> bool {
    let Some(value) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    value.split(',').map(str::trim).any(|tag| {
        tag == "*" || tag.trim_start_matches("W/").trim_matches('"') == hash
    })
}

async fn get_directory(
    State(state): State<AppState>,
    Query(params): Query<DirectoryQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let options = RenderOptions {
        with_status: params.status,
        forced_locality: parse_mode(params.mode.as_deref())?,
        query: params.q,
    };

    let document = load_document(&state.document_path).await;
    let cancel = state.cancel.child_token();
    let view = state
        .directory
        .render(document, &state.context, &options, &cancel)
        .await;

    let hash = compute_hash(&view);
    let etag = HeaderValue::from_str(&format!("\"{}\"", hash))
        .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "Invalid ETag"))?;

    if etag_matches(&headers, &hash) {
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
    }
    Ok(([(header::ETAG, etag)], Json(view)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tempfile::NamedTempFile;
    use tower::ServiceExt;
    use crate::config::Config;
    use crate::probe::Prober;
    use crate::testing;

    fn app(document: &str) -> (Router, NamedTempFile) {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(document.as_bytes()).unwrap();

        let mut config = Config::default();
        config.probe.status_timeout_ms = 1000;
        config.probe.check_ip_timeout_ms = 1000;
        config.probe.locality_timeout_ms = 1000;
        let directory = Directory::from_config(&config, Prober::new("directoryd-test").unwrap(), reqwest::Client::new());

        let state = AppState {
            directory,
            document_path: Arc::new(file.path().to_path_buf()),
            context: Arc::new(TemplateContext::default()),
            cancel: CancellationToken::new(),
        };
        (router(state), file)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_requires_url() {
        let (app, _file) = app("");
        let (status, _, body) = send(app, get_request("/api/status")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "URL is required");
    }

    #[tokio::test]
    async fn test_status_reports_online_and_offline() {
        let up = testing::serve(Router::new().route("/", get(|| async { StatusCode::NOT_FOUND }))).await;
        let closed = testing::closed_url().await;

        let (app, _file) = app("");
        let (status, _, body) = send(app.clone(), get_request(&format!("/api/status?url={}/", up))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "online");
        assert_eq!(body["httpStatus"], 404);
        assert!(body["latencyMs"].is_u64());

        let (_, _, body) = send(app, get_request(&format!("/api/status?url={}/", closed))).await;
        assert_eq!(body["status"], "offline");
        assert!(body.get("httpStatus").is_none());
    }

    #[tokio::test]
    async fn test_check_ip() {
        let up = testing::serve(Router::new().route("/", get(|| async { "ok" }))).await;
        let closed = testing::closed_url().await;
        let (app, _file) = app("");

        let (status, _, body) = send(app.clone(), get_request(&format!("/api/check-ip?url={}/", up))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok", "reachable": true }));

        let (status, _, body) = send(app.clone(), get_request(&format!("/api/check-ip?url={}/", closed))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "status": "error", "reachable": false }));

        let (status, _, _) = send(app, get_request("/api/check-ip")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_locality_without_beacon_is_unknown() {
        let (app, _file) = app("");
        let (status, _, body) = send(app, get_request("/api/locality")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "verdict": "unknown", "signals": [] }));
    }

    #[tokio::test]
    async fn test_locality_reports_each_signal() {
        let beacon = testing::serve(Router::new().route("/", get(|| async { "hi" }))).await;
        let (app, _file) = app("");
        let (_, _, body) = send(app, get_request(&format!("/api/locality?beacon={}", beacon))).await;
        assert_eq!(body["verdict"], "local");
        assert_eq!(body["signals"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_external_services() {
        let upstream = testing::serve(
            Router::new()
                .route(
                    "/ok",
                    post(|Json(payload): Json<Value>| async move {
                        Json(json!({
                            "success": true,
                            "services": [{ "title": "db", "url": "http://db", "echo": payload["isLocal"] }]
                        }))
                    }),
                )
                .route("/down", post(|| async { StatusCode::BAD_GATEWAY })),
        )
        .await;
        let document = format!(
            r#"
external_sources:
  - name: good
    url: {upstream}/ok
    mapping: {{ name: title, url: url }}
  - name: bad
    url: {upstream}/down
    mapping: {{ name: title, url: url }}
"#
        );
        let (app, _file) = app(&document);

        let (status, _, body) = send(
            app.clone(),
            post_json("/api/external-services", json!({ "sourceName": "good", "isLocal": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["services"][0]["name"], "db");
        assert_eq!(body["services"][0]["isLocal"], true);

        let (status, _, body) = send(
            app.clone(),
            post_json("/api/external-services", json!({ "sourceName": "bad", "isLocal": false })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].is_string());

        let (status, _, _) = send(
            app,
            post_json("/api/external-services", json!({ "sourceName": "nope", "isLocal": false })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_directory_etag_round_trip() {
        let document = r#"
title: Lab
groups:
  - name: Core
    is_local: true
    services:
      - name: router
        url: http://10.0.0.1
"#;
        let (app, _file) = app(document);

        let (status, headers, body) = send(app.clone(), get_request("/api/directory")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Lab");
        assert_eq!(body["groups"][0]["locality"], "local");
        assert_eq!(body["groups"][0]["services"][0]["icon"], "http://10.0.0.1/favicon.ico");
        let etag = headers.get(header::ETAG).unwrap().clone();

        let request = Request::get("/api/directory")
            .header(header::IF_NONE_MATCH, etag.clone())
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(app.clone(), request).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);
        assert_eq!(headers.get(header::ETAG), Some(&etag));

        let (_, headers, body) = send(app, get_request("/api/directory?mode=external")).await;
        assert_eq!(body["groups"][0]["locality"], "remote");
        assert_ne!(headers.get(header::ETAG), Some(&etag));
    }

    #[tokio::test]
    async fn test_directory_etag_follows_live_status() {
        let healthy = Arc::new(AtomicBool::new(true));
        let flag = healthy.clone();
        let site = testing::serve(Router::new().route(
            "/",
            get(move || {
                let flag = flag.clone();
                async move {
                    if flag.load(Ordering::SeqCst) {
                        StatusCode::OK
                    } else {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                }
            }),
        ))
        .await;
        let document = format!(
            r#"
groups:
  - name: Apps
    isLocal: true
    services:
      - name: grafana
        url: {site}/
"#
        );
        let (app, _file) = app(&document);
        let conditional = |etag: &HeaderValue| {
            Request::get("/api/directory?status=1")
                .header(header::IF_NONE_MATCH, etag.clone())
                .body(Body::empty())
                .unwrap()
        };

        let (status, headers, body) = send(app.clone(), get_request("/api/directory?status=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["groups"][0]["services"][0]["status"]["status"], "online");
        let online_etag = headers.get(header::ETAG).unwrap().clone();

        let (status, _, _) = send(app.clone(), conditional(&online_etag)).await;
        assert_eq!(status, StatusCode::NOT_MODIFIED);

        healthy.store(false, Ordering::SeqCst);
        let (status, headers, body) = send(app.clone(), conditional(&online_etag)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["groups"][0]["services"][0]["status"]["status"], "offline");
        assert_eq!(body["groups"][0]["services"][0]["status"]["httpStatus"], 500);
        assert_ne!(headers.get(header::ETAG), Some(&online_etag));

        let (_, _, body) = send(app, get_request("/api/directory?status=0")).await;
        assert!(body["groups"][0]["services"][0].get("status").is_none());
    }

    #[tokio::test]
    async fn test_directory_status_flag_spellings() {
        let (app, _file) = app("");
        for query in ["status=true", "status=1", "status=yes", "status=off", "status"] {
            let (status, _, _) = send(app.clone(), get_request(&format!("/api/directory?{}", query))).await;
            assert_eq!(status, StatusCode::OK, "{}", query);
        }
        let (status, _, _) = send(app, get_request("/api/directory?status=maybe")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_directory_rejects_unknown_mode() {
        let (app, _file) = app("");
        let (status, _, body) = send(app, get_request("/api/directory?mode=sideways")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unknown mode: sideways");
    }

    #[test]
    fn test_etag_matching() {
        let mut headers = HeaderMap::new();
        assert!(!etag_matches(&headers, "abc"));
        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("W/\"abc\", \"def\""));
        assert!(etag_matches(&headers, "abc"));
        assert!(etag_matches(&headers, "def"));
        assert!(!etag_matches(&headers, "xyz"));
    }
}
