//! HTTP API tests driving the router with `oneshot` against `MockCluster`.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use fleet_provisioner::manifests::{self, pod_name, service_name};
use fleet_provisioner::mocks::MockCluster;
use fleet_provisioner::{build_router, Provisioner, ProvisionerSettings};

// =============================================================================
// Helpers
// =============================================================================

fn app(cluster: &Arc<MockCluster>) -> Router {
    let provisioner = Provisioner::new(cluster.clone(), ProvisionerSettings::default())
        .with_node_port_wait(3, Duration::from_millis(10));
    build_router(Arc::new(provisioner))
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health() {
    let cluster = Arc::new(MockCluster::new());
    let (status, body) = send(app(&cluster), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

// =============================================================================
// Create
// =============================================================================

#[tokio::test]
async fn test_create_sandbox() {
    let cluster = Arc::new(MockCluster::new());

    let (status, body) = send(
        app(&cluster),
        "POST",
        "/api/sandboxes",
        Some(json!({ "sandbox_id": "s1", "thread_id": "t1" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sandbox_id"], "s1");
    assert_eq!(body["sandbox_url"], "http://host.docker.internal:31000");
    assert_eq!(body["status"], "Unknown");
    assert!(cluster.has_pod(&pod_name("s1")));
    assert!(cluster.has_service(&service_name("s1")));

    let pod = cluster.pod(&pod_name("s1")).unwrap();
    let volumes = pod.spec.unwrap().volumes.unwrap();
    let user_data = volumes.iter().find(|v| v.name == "user-data").unwrap();
    assert_eq!(
        user_data.host_path.as_ref().unwrap().path,
        "/.sandbox-fleet/threads/t1/user-data"
    );
}

#[tokio::test]
async fn test_create_returns_existing_service_without_new_pod() {
    let cluster = Arc::new(MockCluster::new());
    let mut service = manifests::build_service(&ProvisionerSettings::default(), "s1");
    manifests::assign_node_port(&mut service, 31000);
    cluster.insert_service(service);

    let (status, body) = send(
        app(&cluster),
        "POST",
        "/api/sandboxes",
        Some(json!({ "sandbox_id": "s1", "thread_id": "t1" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sandbox_url"], "http://host.docker.internal:31000");
    assert_eq!(body["status"], "NotFound");
    assert_eq!(cluster.pod_create_count(), 0);
    assert_eq!(cluster.service_create_count(), 0);
}

#[tokio::test]
async fn test_create_is_idempotent() {
    let cluster = Arc::new(MockCluster::new());
    let request = json!({ "sandbox_id": "s1", "thread_id": "t1" });

    let (_, first) = send(app(&cluster), "POST", "/api/sandboxes", Some(request.clone())).await;
    let (status, second) = send(app(&cluster), "POST", "/api/sandboxes", Some(request)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["sandbox_url"], second["sandbox_url"]);
    assert_eq!(cluster.pod_create_count(), 1);
}

#[tokio::test]
async fn test_create_tolerates_existing_pod() {
    let cluster = Arc::new(MockCluster::new());
    // A Pod left behind without its Service.
    {
        use fleet_provisioner::ClusterApi;
        let pod = manifests::build_pod(&ProvisionerSettings::default(), "s1", Some("t1"));
        cluster.create_pod(pod).await.unwrap();
    }

    let (status, body) = send(
        app(&cluster),
        "POST",
        "/api/sandboxes",
        Some(json!({ "sandbox_id": "s1", "thread_id": "t1" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sandbox_url"], "http://host.docker.internal:31000");
}

#[tokio::test]
async fn test_anonymous_create_uses_scratch_volume() {
    let cluster = Arc::new(MockCluster::new());

    let (status, _) = send(
        app(&cluster),
        "POST",
        "/api/sandboxes",
        Some(json!({ "sandbox_id": "anon1" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let pod = cluster.pod(&pod_name("anon1")).unwrap();
    let volumes = pod.spec.unwrap().volumes.unwrap();
    let user_data = volumes.iter().find(|v| v.name == "user-data").unwrap();
    assert!(user_data.empty_dir.is_some());
}

#[tokio::test]
async fn test_create_rejects_path_like_thread_id() {
    let cluster = Arc::new(MockCluster::new());

    let (status, body) = send(
        app(&cluster),
        "POST",
        "/api/sandboxes",
        Some(json!({ "sandbox_id": "s1", "thread_id": "../../etc" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("../../etc"));
    assert_eq!(cluster.pod_create_count(), 0);
}

#[tokio::test]
async fn test_service_failure_rolls_back_pod() {
    let cluster = Arc::new(MockCluster::new());
    cluster.set_fail_service_create(true);

    let (status, body) = send(
        app(&cluster),
        "POST",
        "/api/sandboxes",
        Some(json!({ "sandbox_id": "s1", "thread_id": "t1" })),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .starts_with("Service creation failed"));
    assert!(!cluster.has_pod(&pod_name("s1")));
}

#[tokio::test]
async fn test_node_port_never_allocated() {
    let cluster = Arc::new(MockCluster::new());
    cluster.set_allocate_ports(false);

    let (status, body) = send(
        app(&cluster),
        "POST",
        "/api/sandboxes",
        Some(json!({ "sandbox_id": "s1", "thread_id": "t1" })),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "NodePort was not allocated in time");
}

// =============================================================================
// Get / List
// =============================================================================

#[tokio::test]
async fn test_get_reports_phase() {
    let cluster = Arc::new(MockCluster::new());
    send(
        app(&cluster),
        "POST",
        "/api/sandboxes",
        Some(json!({ "sandbox_id": "s1", "thread_id": "t1" })),
    )
    .await;
    cluster.set_pod_phase(&pod_name("s1"), "Running");

    let (status, body) = send(app(&cluster), "GET", "/api/sandboxes/s1", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "sandbox_id": "s1",
            "sandbox_url": "http://host.docker.internal:31000",
            "status": "Running",
        })
    );
}

#[tokio::test]
async fn test_get_missing_is_404() {
    let cluster = Arc::new(MockCluster::new());
    let (status, body) = send(app(&cluster), "GET", "/api/sandboxes/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Sandbox 'nope' not found");
}

#[tokio::test]
async fn test_list_sandboxes() {
    let cluster = Arc::new(MockCluster::new());
    for id in ["s1", "s2"] {
        send(
            app(&cluster),
            "POST",
            "/api/sandboxes",
            Some(json!({ "sandbox_id": id, "thread_id": "t1" })),
        )
        .await;
    }
    // A Service still waiting for its port is skipped.
    cluster.set_allocate_ports(false);
    {
        use fleet_provisioner::ClusterApi;
        let service = manifests::build_service(&ProvisionerSettings::default(), "s3");
        cluster.create_service(service).await.unwrap();
    }

    let (status, body) = send(app(&cluster), "GET", "/api/sandboxes", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);
    let ids: Vec<&str> = body["sandboxes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["sandbox_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["s1", "s2"]);
}

// =============================================================================
// Delete
// =============================================================================

#[tokio::test]
async fn test_delete_sandbox() {
    let cluster = Arc::new(MockCluster::new());
    send(
        app(&cluster),
        "POST",
        "/api/sandboxes",
        Some(json!({ "sandbox_id": "s1", "thread_id": "t1" })),
    )
    .await;

    let (status, body) = send(app(&cluster), "DELETE", "/api/sandboxes/s1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "sandbox_id": "s1" }));
    assert!(!cluster.has_pod(&pod_name("s1")));
    assert!(!cluster.has_service(&service_name("s1")));

    // Already gone is still a success.
    let (status, _) = send(app(&cluster), "DELETE", "/api/sandboxes/s1", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_delete_partial_failure() {
    let cluster = Arc::new(MockCluster::new());
    send(
        app(&cluster),
        "POST",
        "/api/sandboxes",
        Some(json!({ "sandbox_id": "s1", "thread_id": "t1" })),
    )
    .await;
    cluster.set_fail_pod_delete(true);

    let (status, body) = send(app(&cluster), "DELETE", "/api/sandboxes/s1", None).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "Partial cleanup: pod: forbidden");
    // The Service deletion still went through.
    assert!(!cluster.has_service(&service_name("s1")));
    assert!(cluster.has_pod(&pod_name("s1")));
}
