//! Integration tests for the action server API.
//!
//! Each test builds its own router over an in-memory database; upstream
//! services are wiremock servers.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kairon_action::{ActionExecutor, Services};
use kairon_api::error::ErrorBody;
use kairon_api::handlers::{ActionsResponse, HealthResponse};
use kairon_api::{create_router, AppState};
use kairon_core::types::{ActionReply, ActionStatus};
use kairon_core::KaironConfig;
use kairon_storage::{vault, ActionConfigRecord, Database, KeyVault};

// =============================================================================
// Helpers
// =============================================================================

const FAILURE_TEXT: &str = "I have failed to process your request";

fn make_state() -> AppState {
    let mut config = KaironConfig::default();
    config.storage.config_cache_ttl_secs = 0;
    let db = Arc::new(Database::in_memory().unwrap());
    let vault = KeyVault::new(Arc::clone(&db), vault::generate_key().unwrap());
    vault.put("b1", "API_KEY", "sk-live-123").unwrap();
    let services = Services::new(config, db, Some(vault)).unwrap();
    AppState::new(Arc::new(ActionExecutor::with_defaults(Arc::new(services))))
}

fn save_action(state: &AppState, name: &str, action_type: &str, config: Value) {
    state
        .executor
        .services()
        .action_configs
        .save(&ActionConfigRecord {
            bot: "b1".to_string(),
            name: name.to_string(),
            action_type: action_type.to_string(),
            config,
            active: true,
        })
        .unwrap();
}

fn webhook_body(action: &str, slots: Value) -> String {
    json!({
        "next_action": action,
        "sender_id": "u1",
        "tracker": {
            "sender_id": "u1",
            "slots": slots,
            "latest_message": {"text": "hi", "intent": {"name": "greet", "confidence": 0.9}},
            "events": [],
            "latest_input_channel": "web",
            "latest_action_name": "action_listen"
        },
        "domain": {"responses": {}},
        "version": "3.6.21"
    })
    .to_string()
}

fn post_json(uri: &str, body: String) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn body_json<T: serde::de::DeserializeOwned>(resp: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// Introspection
// =============================================================================

#[tokio::test]
async fn test_health() {
    let app = create_router(make_state());
    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let health: HealthResponse = body_json(resp).await;
    assert_eq!(health.status, "healthy");
    assert_eq!(health.log_failures, 0);
}

#[tokio::test]
async fn test_list_actions() {
    let app = create_router(make_state());
    let resp = app
        .oneshot(Request::get("/actions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let actions: ActionsResponse = body_json(resp).await;
    assert_eq!(actions.action_types.len(), 21);
    assert_eq!(actions.action_types[0], "http_action");
    assert!(actions.action_types.contains(&"callback_action".to_string()));
}

// =============================================================================
// Webhook
// =============================================================================

#[tokio::test]
async fn test_http_action_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Ada"})))
        .mount(&server)
        .await;

    let state = make_state();
    save_action(
        &state,
        "action_user",
        "http_action",
        json!({
            "http_url": format!("{}/user/${{user_id}}", server.uri()),
            "request_method": "GET",
            "response": {"value": "Hello ${data.name}"},
            "set_slots": [{"name": "name", "value": "data.name"}]
        }),
    );
    let app = create_router(state.clone());
    let resp = app
        .oneshot(post_json(
            "/webhook",
            webhook_body("action_user", json!({"bot": "b1", "user_id": "42"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let reply: ActionReply = body_json(resp).await;
    assert_eq!(reply.responses[0].text.as_deref(), Some("Hello Ada"));
    assert_eq!(reply.events[0].name, "name");
    assert_eq!(reply.events[0].value, json!("Ada"));

    let logs = state
        .executor
        .services()
        .logger
        .repository()
        .recent("b1", 10)
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, ActionStatus::Success);
    assert_eq!(logs[0].http_status_code, Some(200));
}

#[tokio::test]
async fn test_unknown_action_is_400_with_name() {
    let app = create_router(make_state());
    let resp = app
        .oneshot(post_json(
            "/webhook",
            webhook_body("action_nowhere", json!({"bot": "b1"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = body_json(resp).await;
    assert_eq!(body.action_name.as_deref(), Some("action_nowhere"));
    assert!(body.error.contains("action_nowhere"));
}

#[tokio::test]
async fn test_unknown_action_type_is_400() {
    let state = make_state();
    save_action(&state, "action_odd", "teleport_action", json!({}));
    let resp = create_router(state)
        .oneshot(post_json(
            "/webhook",
            webhook_body("action_odd", json!({"bot": "b1"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = body_json(resp).await;
    assert!(body.error.contains("teleport_action"));
}

#[tokio::test]
async fn test_missing_bot_slot_is_400() {
    let resp = create_router(make_state())
        .oneshot(post_json("/webhook", webhook_body("action_user", json!({}))))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body_is_400_without_name() {
    let resp = create_router(make_state())
        .oneshot(post_json("/webhook", "{\"sender_id\": ".to_string()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ErrorBody = body_json(resp).await;
    assert!(body.action_name.is_none());
}

#[tokio::test]
async fn test_handler_failure_is_200_with_canned_reply() {
    let state = make_state();
    save_action(
        &state,
        "action_script",
        "pyscript_action",
        json!({"source_code": "throw \"boom\";"}),
    );
    let resp = create_router(state)
        .oneshot(post_json(
            "/webhook",
            webhook_body("action_script", json!({"bot": "b1"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let reply: ActionReply = body_json(resp).await;
    assert_eq!(reply.responses[0].text.as_deref(), Some(FAILURE_TEXT));
    assert_eq!(reply.events.len(), 1);
    assert_eq!(reply.events[0].name, "kairon_action_response");
}

#[tokio::test]
async fn test_script_action_end_to_end() {
    let state = make_state();
    save_action(
        &state,
        "action_double",
        "pyscript_action",
        json!({"source_code": "bot_response = \"x=\" + str(slots[\"x\"] * 2);"}),
    );
    let resp = create_router(state)
        .oneshot(post_json(
            "/webhook",
            webhook_body("action_double", json!({"bot": "b1", "x": 3})),
        ))
        .await
        .unwrap();
    let reply: ActionReply = body_json(resp).await;
    assert_eq!(reply.responses[0].text.as_deref(), Some("x=6"));
}
