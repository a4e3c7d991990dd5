//! ClearML client tests against a wiremock server

use clearml_session_manager::api::{AuthStyle, ClearMlClient, LogOrder, ProjectMatch, TaskFilter, TaskLogRequest};
use clearml_session_manager::config::AuthConfig;
use clearml_session_manager::SessionError;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// HELPERS
// =============================================================================

fn client_for(server: &MockServer) -> ClearMlClient {
    ClearMlClient::new(AuthConfig {
        api_server: server.uri(),
        access_key: "AK".into(),
        secret_key: "SK".into(),
    })
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/auth.login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "meta": {"result_code": 200},
            "data": {"token": "tok-123"}
        })))
        .mount(server)
        .await;
}

async fn authed_client(server: &MockServer) -> ClearMlClient {
    mount_login(server).await;
    let mut client = client_for(server);
    client.auth().await.unwrap();
    client
}

fn envelope(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"meta": {"result_code": 200}, "data": data}))
}

// =============================================================================
// AUTH
// =============================================================================

#[tokio::test]
async fn test_auth_sends_basic_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth.login"))
        // base64("AK:SK")
        .and(header("authorization", "Basic QUs6U0s="))
        .respond_with(envelope(json!({"token": "tok-123"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    assert!(!client.is_authed());
    client.auth().await.unwrap();
    assert!(client.is_authed());
}

#[tokio::test]
async fn test_auth_query_style() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth.login"))
        .and(query_param("access_key", "AK"))
        .and(query_param("secret_key", "SK"))
        .respond_with(envelope(json!({"token": "tok-123"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server).with_auth_style(AuthStyle::Query);
    client.auth().await.unwrap();
    assert!(client.is_authed());
}

#[tokio::test]
async fn test_auth_rejected_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth.login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    let err = client.auth().await.unwrap_err();
    assert!(matches!(err, SessionError::Authentication { .. }));
    assert!(!client.is_authed());
}

#[tokio::test]
async fn test_auth_server_error_is_http_not_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth.login"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    match client.auth().await {
        Err(SessionError::Http { endpoint, status, body }) => {
            assert_eq!(endpoint, "auth.login");
            assert_eq!(status, 503);
            assert_eq!(body, "maintenance");
        }
        other => panic!("expected Http error, got {:?}", other),
    }
    assert!(!client.is_authed());
}

#[tokio::test]
async fn test_auth_wrong_path_is_http() {
    // Nothing mounted: wiremock answers 404
    let server = MockServer::start().await;

    let mut client = client_for(&server);
    assert!(matches!(
        client.auth().await,
        Err(SessionError::Http { status: 404, .. })
    ));
}

#[tokio::test]
async fn test_auth_forbidden_is_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth.login"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    assert!(matches!(
        client.auth().await,
        Err(SessionError::Authentication { .. })
    ));
}

#[tokio::test]
async fn test_auth_without_token_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth.login"))
        .respond_with(envelope(json!({})))
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    assert!(matches!(
        client.auth().await,
        Err(SessionError::Authentication { .. })
    ));
}

#[tokio::test]
async fn test_unauthenticated_calls_never_hit_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(envelope(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(matches!(
        client.get_tasks(&TaskFilter::new()).await,
        Err(SessionError::AuthRequired { operation: "get_tasks" })
    ));
}

// =============================================================================
// PROJECTS
// =============================================================================

#[tokio::test]
async fn test_project_lookup_sends_bearer_and_name() {
    let server = MockServer::start().await;
    let client = authed_client(&server).await;

    Mock::given(method("POST"))
        .and(path("/projects.get_all"))
        .and(header("authorization", "Bearer tok-123"))
        .and(body_json(json!({"name": "DevOps"})))
        .respond_with(envelope(json!({"projects": [
            {"id": "p-devops-2", "name": "DevOps/archive"},
            {"id": "p-devops", "name": "DevOps"},
            {"id": "p-devops-dup", "name": "DevOps"}
        ]})))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(client.get_project_id_by_name("DevOps").await.unwrap(), "p-devops");
}

#[tokio::test]
async fn test_project_lookup_unique_policy() {
    let server = MockServer::start().await;
    let client = authed_client(&server).await;

    Mock::given(method("POST"))
        .and(path("/projects.get_all"))
        .respond_with(envelope(json!({"projects": [
            {"id": "a", "name": "DevOps"},
            {"id": "b", "name": "DevOps"}
        ]})))
        .mount(&server)
        .await;

    let err = client
        .find_project_id("DevOps", ProjectMatch::Unique)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AmbiguousProject { count: 2, .. }));
}

#[tokio::test]
async fn test_missing_project_is_not_found() {
    let server = MockServer::start().await;
    let client = authed_client(&server).await;

    Mock::given(method("POST"))
        .and(path("/projects.get_all"))
        .respond_with(envelope(json!({"projects": []})))
        .mount(&server)
        .await;

    let err = client.get_project_id_by_name("Nope").await.unwrap_err();
    assert!(matches!(err, SessionError::NotFound { .. }));
    assert!(err.to_string().contains("Nope"));
}

// =============================================================================
// TASKS
// =============================================================================

#[tokio::test]
async fn test_get_tasks_sends_conjunctive_filters() {
    let server = MockServer::start().await;
    let client = authed_client(&server).await;

    Mock::given(method("POST"))
        .and(path("/tasks.get_all_ex"))
        .and(body_json(json!({
            "project": ["p-devops"],
            "name": "Interactive Session",
            "status": ["in_progress", "queued"]
        })))
        .respond_with(envelope(json!({"tasks": [
            {"id": "b0000000000000000000000000000001", "name": "Interactive Session", "status": "queued"},
            {"id": "a0000000000000000000000000000002", "name": "Interactive Session", "status": "in_progress",
             "project": {"id": "p-devops"}}
        ]})))
        .expect(1)
        .mount(&server)
        .await;

    let filter = TaskFilter::new()
        .with_project_ids(["p-devops"])
        .with_name("Interactive Session")
        .with_statuses(["in_progress", "queued"]);
    let tasks = client.get_tasks(&filter).await.unwrap();

    // Server order is preserved
    let ids: Vec<_> = tasks.iter().map(|t| t.short_id()).collect();
    assert_eq!(ids, vec!["b0000000", "a0000000"]);
    assert_eq!(tasks[1].project_id(), Some("p-devops"));
}

#[tokio::test]
async fn test_get_tasks_without_filters_sends_empty_body() {
    let server = MockServer::start().await;
    let client = authed_client(&server).await;

    Mock::given(method("POST"))
        .and(path("/tasks.get_all_ex"))
        .and(body_json(json!({})))
        .respond_with(envelope(json!({"tasks": []})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client.get_tasks(&TaskFilter::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_expired_token_surfaces_as_authentication() {
    let server = MockServer::start().await;
    let client = authed_client(&server).await;

    Mock::given(method("POST"))
        .and(path("/tasks.get_all_ex"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    assert!(matches!(
        client.get_tasks(&TaskFilter::new()).await,
        Err(SessionError::Authentication { .. })
    ));
}

#[tokio::test]
async fn test_server_error_keeps_status_and_body() {
    let server = MockServer::start().await;
    let client = authed_client(&server).await;

    Mock::given(method("POST"))
        .and(path("/tasks.get_all_ex"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    match client.get_tasks(&TaskFilter::new()).await {
        Err(SessionError::Http { endpoint, status, body }) => {
            assert_eq!(endpoint, "tasks.get_all_ex");
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected Http error, got {:?}", other),
    }
}

// =============================================================================
// LOGS
// =============================================================================

#[tokio::test]
async fn test_get_task_logs() {
    let server = MockServer::start().await;
    let client = authed_client(&server).await;

    Mock::given(method("POST"))
        .and(path("/events.get_task_log"))
        .and(body_json(json!({"task": "t1", "batch_size": 10000, "order": "asc"})))
        .respond_with(envelope(json!({
            "events": [
                {"msg": "SSH Server running on host [10.0.0.7] port 10022", "timestamp": 1},
                {"msg": "LOGIN u:root p:pw", "timestamp": 2}
            ],
            "returned": 2,
            "total": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = TaskLogRequest::new("t1")
        .with_batch_size(10_000)
        .with_order(LogOrder::Asc);
    let logs = client.get_task_logs(&request).await.unwrap();

    assert_eq!(logs.events.len(), 2);
    assert_eq!(logs.total, Some(2));
    assert_eq!(
        logs.concatenated(),
        "SSH Server running on host [10.0.0.7] port 10022 LOGIN u:root p:pw"
    );
}
