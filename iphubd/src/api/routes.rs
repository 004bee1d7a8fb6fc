use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use shared::protocol::{DIGEST_PATH, LIST_PATH, REMOVE_PATH, REPORT_PATH, RESOLVE_PATH};
use shared::types::{DeviceList, DeviceRecord, RemoveResponse, ReportRequest, ReportResponse};
use crate::registry::RegistryHandle;
use super::error::{self, ApiError};

#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub digest_rx: watch::Receiver<String>,
}

#[derive(Deserialize)]
pub struct HostnameQuery {
    pub hostname: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(REPORT_PATH, post(report_ip))
        .route(RESOLVE_PATH, get(get_ip))
        .route(LIST_PATH, get(list_devices))
        .route(DIGEST_PATH, get(get_digest))
        .route(REMOVE_PATH, delete(remove_device))
        .layer(CatchPanicLayer::custom(error::panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Whitespace-only values count as missing
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn hostname_param(
    query: Result<Query<HostnameQuery>, QueryRejection>,
) -> Result<String, ApiError> {
    let Query(params) = query?;
    non_empty(params.hostname)
        .ok_or_else(|| ApiError::Validation("Missing hostname query parameter".to_string()))
}

async fn report_ip(
    State(state): State<AppState>,
    payload: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Result<Json<ReportResponse>, ApiError> {
    // Only a JSON object is a report; arrays must not bind fields by position
    let Json(fields) = payload?;
    let req: ReportRequest = serde_json::from_value(Value::Object(fields))
        .map_err(|e| ApiError::Validation(format!("Malformed JSON body: {}", e)))?;

    let (Some(hostname), Some(address)) = (non_empty(req.hostname), non_empty(req.address)) else {
        return Err(ApiError::Validation("Missing hostname or address".to_string()));
    };

    let record = state.registry.upsert(hostname, address).await?.record;

    tracing::info!(
        "Reported IP: {} -> {} (Last Updated: {})",
        record.hostname,
        record.address,
        record.last_updated
    );

    Ok(Json(ReportResponse {
        message: "IP updated successfully".to_string(),
        record,
    }))
}

async fn get_ip(
    State(state): State<AppState>,
    query: Result<Query<HostnameQuery>, QueryRejection>,
) -> Result<Json<DeviceRecord>, ApiError> {
    let hostname = hostname_param(query)?;

    match state.registry.lookup(hostname.clone()).await? {
        Some(record) => {
            tracing::debug!("Queried IP: {} -> {}", record.hostname, record.address);
            Ok(Json(record))
        }
        None => {
            tracing::debug!("Queried IP: hostname '{}' not found", hostname);
            Err(ApiError::NotFound(hostname))
        }
    }
}

async fn list_devices(State(state): State<AppState>) -> Result<Json<DeviceList>, ApiError> {
    let devices = state.registry.list_hostnames().await?;
    Ok(Json(DeviceList { devices }))
}

async fn get_digest(State(state): State<AppState>) -> String {
    state.digest_rx.borrow().clone()
}

async fn remove_device(
    State(state): State<AppState>,
    query: Result<Query<HostnameQuery>, QueryRejection>,
) -> Result<Json<RemoveResponse>, ApiError> {
    let hostname = hostname_param(query)?;

    if !state.registry.remove(hostname.clone()).await? {
        return Err(ApiError::NotFound(hostname));
    }

    tracing::info!("Removed device: {}", hostname);

    Ok(Json(RemoveResponse {
        message: "Device removed".to_string(),
        hostname,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
    };
    use chrono::{SubsecRound, Utc};
    use serde_json::json;
    use tower::ServiceExt;
    use crate::store::{db::DeviceDb, hash};

    fn build_app(acquire_timeout: Duration) -> Router {
        let db = DeviceDb::open(":memory:", Duration::from_secs(1)).unwrap();
        let (digest_tx, digest_rx) = watch::channel(hash::compute_digest(&[]));
        let registry = RegistryHandle::spawn(db, digest_tx, acquire_timeout);
        router(AppState { registry, digest_rx })
    }

    fn test_app() -> Router {
        build_app(Duration::from_secs(5))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn report(body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/report_ip")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn delete(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::DELETE)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_report_then_resolve() {
        let app = test_app();
        let before = Utc::now().trunc_subsecs(6);

        let (status, body) = send(&app, report(json!({"hostname": "node1", "address": "192.168.1.50"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "IP updated successfully");
        assert_eq!(body["hostname"], "node1");
        assert_eq!(body["address"], "192.168.1.50");

        let (status, body) = send(&app, get("/get_ip?hostname=node1")).await;
        assert_eq!(status, StatusCode::OK);
        let record: DeviceRecord = serde_json::from_value(body).unwrap();
        assert_eq!(record.hostname, "node1");
        assert_eq!(record.address, "192.168.1.50");
        assert!(record.last_updated >= before);
    }

    #[tokio::test]
    async fn test_last_report_wins() {
        let app = test_app();

        send(&app, report(json!({"hostname": "node1", "address": "10.0.0.1"}))).await;
        send(&app, report(json!({"hostname": "other", "address": "10.0.0.9"}))).await;
        send(&app, report(json!({"hostname": "node1", "address": "10.0.0.2"}))).await;

        let (_, body) = send(&app, get("/get_ip?hostname=node1")).await;
        assert_eq!(body["address"], "10.0.0.2");

        let (_, body) = send(&app, get("/list_devices")).await;
        assert_eq!(body, json!({"devices": ["node1", "other"]}));
    }

    #[tokio::test]
    async fn test_report_accepts_ip_address_field() {
        let app = test_app();

        let (status, _) = send(&app, report(json!({"hostname": "legacy", "ip_address": "10.0.0.5"}))).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, get("/get_ip?hostname=legacy")).await;
        assert_eq!(body["address"], "10.0.0.5");
    }

    #[tokio::test]
    async fn test_resolve_unknown_hostname_is_not_found() {
        let app = test_app();

        let (status, body) = send(&app, get("/get_ip?hostname=unknown-host")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Hostname 'unknown-host' not found");
    }

    #[tokio::test]
    async fn test_resolve_requires_hostname() {
        let app = test_app();

        for uri in ["/get_ip", "/get_ip?hostname=", "/get_ip?host=node1"] {
            let (status, body) = send(&app, get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"], "Missing hostname query parameter");
        }
    }

    #[tokio::test]
    async fn test_report_missing_address_creates_nothing() {
        let app = test_app();

        let (status, body) = send(&app, report(json!({"hostname": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing hostname or address");

        let (status, _) = send(&app, get("/get_ip?hostname=x")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(&app, get("/list_devices")).await;
        assert_eq!(body, json!({"devices": []}));
    }

    #[tokio::test]
    async fn test_report_rejects_blank_fields() {
        let app = test_app();

        for payload in [
            json!({"hostname": "", "address": "10.0.0.1"}),
            json!({"hostname": "   ", "address": "10.0.0.1"}),
            json!({"hostname": "node1", "address": ""}),
            json!({}),
        ] {
            let (status, _) = send(&app, report(payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_report_requires_json() {
        let app = test_app();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/report_ip")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("hostname=node1"))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Request must be JSON");

        let request = Request::builder()
            .method(Method::POST)
            .uri("/report_ip")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Malformed JSON body"));

        let (status, _) = send(&app, report(json!("node1 10.0.0.1"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_report_rejects_non_object_body() {
        let app = test_app();

        for payload in [json!(["node1", "10.0.0.1"]), json!(42), json!(null)] {
            let (status, body) = send(&app, report(payload.clone())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{payload}");
            assert!(body["error"].as_str().unwrap().starts_with("Malformed JSON body"));
        }

        let (status, body) = send(&app, report(json!({"hostname": 7, "address": "10.0.0.1"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Malformed JSON body"));

        let (_, body) = send(&app, get("/list_devices")).await;
        assert_eq!(body, json!({"devices": []}));
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let app = test_app();

        for (hostname, address) in [("zeta", "10.0.0.3"), ("alpha", "10.0.0.1"), ("mike", "10.0.0.2")] {
            send(&app, report(json!({"hostname": hostname, "address": address}))).await;
        }

        let (status, body) = send(&app, get("/list_devices")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"devices": ["alpha", "mike", "zeta"]}));
    }

    #[tokio::test]
    async fn test_remove_device() {
        let app = test_app();
        send(&app, report(json!({"hostname": "node1", "address": "10.0.0.1"}))).await;

        let (status, body) = send(&app, delete("/remove_device?hostname=node1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["hostname"], "node1");

        let (status, _) = send(&app, delete("/remove_device?hostname=node1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, delete("/remove_device")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, get("/get_ip?hostname=node1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_digest_changes_with_registry() {
        let app = test_app();

        let digest = |app: Router| async move {
            let response = app.oneshot(get("/list_devices/hash")).await.unwrap();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            String::from_utf8(bytes.to_vec()).unwrap()
        };

        let empty = digest(app.clone()).await;
        assert_eq!(empty.len(), 64);

        send(&app, report(json!({"hostname": "node1", "address": "10.0.0.1"}))).await;
        assert_ne!(digest(app.clone()).await, empty);
    }

    #[tokio::test]
    async fn test_storage_failure_is_server_error() {
        let app = build_app(Duration::ZERO);

        let (status, body) = send(&app, report(json!({"hostname": "node1", "address": "10.0.0.1"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Database error");
        assert!(body["details"].as_str().unwrap().contains("timed out"));

        let (status, body) = send(&app, get("/list_devices")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["details"].is_string());
    }

    #[tokio::test]
    async fn test_validation_precedes_store_access() {
        // A store that rejects everything still yields client errors for bad input
        let app = build_app(Duration::ZERO);

        let (status, _) = send(&app, report(json!({"hostname": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, get("/get_ip")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
