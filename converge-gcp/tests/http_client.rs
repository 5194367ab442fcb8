//! GcpHttpClient against a local mock of the Google APIs.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use converge_gcp::client::{
    CloudError, ComputeApi, ComputeOperation, DnsApi, OperationPolling, wait_for_compute_operation,
};
use converge_gcp::GcpHttpClient;
use serde_json::json;
use tokio::net::TcpListener;

const TOKEN: &str = "test-token";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", TOKEN))
}

async fn get_zone(headers: HeaderMap, Path((project, zone)): Path<(String, String)>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if zone != "prod-example" {
        return (StatusCode::NOT_FOUND, "zone not found").into_response();
    }
    Json(json!({
        "id": "1234",
        "name": zone,
        "dnsName": "example.com.",
        "description": format!("{project}: prod/example"),
    }))
    .into_response()
}

async fn list_rrsets(Query(query): Query<HashMap<String, String>>) -> Response {
    match query.get("pageToken").map(String::as_str) {
        None => Json(json!({
            "rrsets": [{"name": "example.com.", "type": "NS", "ttl": 21600, "rrdatas": ["ns1."]}],
            "nextPageToken": "page-2"
        }))
        .into_response(),
        Some("page-2") => Json(json!({
            "rrsets": [{"name": "www.example.com.", "type": "A", "ttl": 300, "rrdatas": ["203.0.113.7"]}]
        }))
        .into_response(),
        Some(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn global_operation(Path((_project, op)): Path<(String, String)>) -> Response {
    let body = if op == "op-broken" {
        json!({
            "name": op,
            "status": "DONE",
            "error": {"errors": [{"code": "QUOTA_EXCEEDED", "message": "no more addresses"}]}
        })
    } else {
        json!({"name": op, "status": "DONE"})
    };
    Json(body).into_response()
}

async fn spawn_mock() -> SocketAddr {
    let router = Router::new()
        .route(
            "/dns/v1/projects/{project}/managedZones/{zone}",
            get(get_zone),
        )
        .route(
            "/dns/v1/projects/{project}/managedZones/{zone}/rrsets",
            get(list_rrsets),
        )
        .route(
            "/compute/v1/projects/{project}/global/operations/{op}",
            get(global_operation),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn client(addr: SocketAddr, token: &str) -> GcpHttpClient {
    GcpHttpClient::with_endpoints(
        token,
        format!("http://{}/dns/v1", addr),
        format!("http://{}/compute/v1", addr),
    )
}

#[tokio::test]
async fn test_get_zone_and_not_found() {
    let addr = spawn_mock().await;
    let gcp = client(addr, TOKEN);

    let zone = gcp.get_zone("acme", "prod-example").await.unwrap().unwrap();
    assert_eq!(zone.id, "1234");
    assert_eq!(zone.dns_name, "example.com.");

    assert!(gcp.get_zone("acme", "other").await.unwrap().is_none());
}

#[tokio::test]
async fn test_bad_token_is_an_error() {
    let addr = spawn_mock().await;
    let gcp = client(addr, "wrong");

    let err = gcp.get_zone("acme", "prod-example").await.unwrap_err();
    assert!(matches!(err, CloudError::Status { status: 401, .. }));
}

#[tokio::test]
async fn test_record_sets_follow_pages() {
    let addr = spawn_mock().await;
    let gcp = client(addr, TOKEN);

    let records = gcp.list_record_sets("acme", "prod-example").await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].record_type, "A");
    assert_eq!(records[1].rrdatas, vec!["203.0.113.7"]);
}

#[tokio::test]
async fn test_wait_for_operation() {
    let addr = spawn_mock().await;
    let gcp = client(addr, TOKEN);
    let polling = OperationPolling {
        interval: std::time::Duration::from_millis(1),
        max_attempts: 3,
    };

    let running = |name: &str| ComputeOperation {
        name: name.to_string(),
        status: "RUNNING".to_string(),
        zone: None,
        region: None,
        error: None,
    };

    wait_for_compute_operation(&gcp, "acme", running("op-1"), polling)
        .await
        .unwrap();

    let err = wait_for_compute_operation(&gcp, "acme", running("op-broken"), polling)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::OperationFailed { .. }));

    let op = ComputeApi::get_operation(&gcp, "acme", &running("op-2"))
        .await
        .unwrap();
    assert!(op.is_done());
}
