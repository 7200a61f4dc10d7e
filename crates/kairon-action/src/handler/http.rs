//! HTTP action handler.
//!
//! Calls an authored endpoint and turns the upstream reply into a bot
//! message and slot values. Non-2xx statuses are passed to the composer
//! like any other reply.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::composer::{inline, to_utterance};
use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};
use crate::params::{substitute_slots, substitute_slots_in_value};
use crate::types::{
    ActionType, ContentType, HttpMethod, ParameterSpec, ResponseTemplate, SlotAssignment,
};

#[derive(Debug, Clone, Deserialize)]
pub struct HttpActionConfig {
    pub http_url: String,
    #[serde(default)]
    pub request_method: HttpMethod,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub headers: Vec<ParameterSpec>,
    #[serde(default)]
    pub params_list: Vec<ParameterSpec>,
    /// Script whose `bot_response` map replaces `params_list` when set.
    #[serde(default)]
    pub dynamic_params: Option<String>,
    #[serde(default)]
    pub response: ResponseTemplate,
    #[serde(default)]
    pub set_slots: Vec<SlotAssignment>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Sub-events recorded whatever the outcome.
#[derive(Default)]
struct HttpTrace {
    response: Value,
    api_call: Value,
    filled_slots: Value,
}

pub struct HttpActionHandler;

#[async_trait]
impl ActionHandler for HttpActionHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Http
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let mut trace = HttpTrace::default();
        let result = match ctx.parse_config::<HttpActionConfig>() {
            Ok(config) => call(ctx, &config, &mut trace).await,
            Err(e) => Err(e),
        };
        ctx.log.push_event("response", trace.response);
        ctx.log.push_event("api_call", trace.api_call);
        ctx.log.push_event("filled_slots", trace.filled_slots);
        result
    }
}

async fn call(
    ctx: &mut ActionContext<'_>,
    config: &HttpActionConfig,
    trace: &mut HttpTrace,
) -> Result<SlotChanges, ActionError> {
    let context = ctx.context(true);
    let dynamic_params = config
        .dynamic_params
        .as_deref()
        .filter(|s| !s.trim().is_empty());

    let mut sources = vec![config.response.value.as_str()];
    sources.extend(dynamic_params);
    sources.extend(config.set_slots.iter().map(|s| s.value.as_str()));
    let locals = ctx.script_locals(&context, &sources)?;
    let script_timeout = ctx.script_timeout()?;
    let composer = ctx.composer(locals.clone(), script_timeout);
    let resolver = ctx.resolver(&context);

    let headers = resolver.prepare_request(&config.headers)?;
    let (params, logged_params) = match dynamic_params {
        Some(script) => {
            let scope = ctx
                .services
                .sandbox
                .run_script(script, locals, script_timeout)
                .await?;
            match scope.get("bot_response") {
                Some(Value::Object(map)) => (map.clone(), Value::Object(map.clone())),
                other => {
                    return Err(ActionError::ParameterResolution(format!(
                        "dynamic_params must set bot_response to a map, got {}",
                        other.cloned().unwrap_or(Value::Null)
                    )))
                }
            }
        }
        None => {
            let prepared = resolver.prepare_request(&config.params_list)?;
            (prepared.values, Value::Object(prepared.redacted))
        }
    };

    let url = substitute_slots(&config.http_url, context.slots());
    let params = match substitute_slots_in_value(&Value::Object(params), context.slots()) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let method = config.request_method;
    trace.api_call = json!({
        "url": url,
        "method": method.to_string(),
        "headers": headers.redacted,
        "request_params": logged_params,
    });

    let timeout = Duration::from_secs(
        config
            .timeout_secs
            .unwrap_or(ctx.services.config.timeouts.http_secs),
    );
    let mut request = ctx
        .services
        .http
        .request(method.as_reqwest(), &url)
        .timeout(timeout);
    for (name, value) in headers.string_values() {
        request = request.header(name, value);
    }
    if method.uses_query() {
        if !params.is_empty() {
            let query: Vec<(String, String)> =
                params.iter().map(|(k, v)| (k.clone(), inline(v))).collect();
            request = request.query(&query);
        }
    } else {
        request = match config.content_type {
            ContentType::Json => request.json(&params),
            ContentType::Data => {
                let form: Vec<(String, String)> =
                    params.iter().map(|(k, v)| (k.clone(), inline(v))).collect();
                request.form(&form)
            }
        };
    }

    let started = Instant::now();
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            trace.api_call["error"] = json!(e.to_string());
            return Err(e.into());
        }
    };
    let status = response.status().as_u16();
    ctx.log.set_http_status(status);
    let response_headers: Map<String, Value> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|s| (k.to_string(), Value::String(s.to_string())))
        })
        .collect();
    let text = response.text().await?;
    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    trace.api_call["http_status_code"] = json!(status);
    trace.api_call["response"] = body.clone();
    trace.api_call["time_elapsed"] = json!(started.elapsed().as_millis() as u64);

    let data = json!({
        "data": body,
        "context": context.to_locals(),
        "http_status_code": status,
        "response_headers": response_headers,
    });

    let composed = composer.compose(&config.response, &data).await?;
    trace.response = composed.log.clone();

    let filled = composer.fill_slots(&config.set_slots, &data).await?;
    let mut slots: SlotChanges = filled.into_iter().collect();
    trace.filled_slots = slots.to_json();

    if config.response.dispatch {
        ctx.dispatcher
            .utter_message(to_utterance(&composed.value, config.response.dispatch_type));
    }
    ctx.log.set_bot_response(composed.value.clone());
    slots.set_response(composed.value);
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use crate::types::{DEFAULT_FAILURE_MESSAGE, KAIRON_ACTION_RESPONSE_SLOT};
    use kairon_core::types::{ActionStatus, SlotEvent};
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, ResponseTemplate as MockResponse};

    fn event_types(log: &kairon_core::types::ActionServerLog) -> Vec<String> {
        log.events
            .iter()
            .map(|e| e["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_http_happy_path() {
        let harness = TestHarness::new().await;
        Mock::given(method("GET"))
            .and(path("/u/42"))
            .respond_with(
                MockResponse::new(200)
                    .set_body_json(json!({"name": "Ada", "address": {"city": "London"}})),
            )
            .mount(&harness.server)
            .await;
        harness.save_action(
            "action_user",
            "http_action",
            json!({
                "http_url": format!("{}/u/${{user_id}}", harness.server.uri()),
                "request_method": "GET",
                "response": {"value": "Hello ${data.name}!"},
                "set_slots": [{"name": "last_city", "from": "data.address.city"}]
            }),
        );

        let reply = harness
            .executor
            .run(&harness.request("action_user", json!({"user_id": "42"})))
            .await
            .unwrap();
        assert_eq!(reply.responses.len(), 1);
        assert_eq!(reply.responses[0].text.as_deref(), Some("Hello Ada!"));
        assert!(reply.events.contains(&SlotEvent::slot("last_city", json!("London"))));
        assert!(reply
            .events
            .contains(&SlotEvent::slot(KAIRON_ACTION_RESPONSE_SLOT, json!("Hello Ada!"))));

        let log = harness.last_log();
        assert_eq!(log.status, ActionStatus::Success);
        assert_eq!(log.http_status_code, Some(200));
        assert_eq!(event_types(&log), vec!["response", "api_call", "filled_slots"]);
    }

    #[tokio::test]
    async fn test_http_error_status_is_not_fatal() {
        let harness = TestHarness::new().await;
        Mock::given(method("GET"))
            .respond_with(MockResponse::new(500).set_body_json(json!({"error": "db down"})))
            .mount(&harness.server)
            .await;
        harness.save_action(
            "action_user",
            "http_action",
            json!({
                "http_url": format!("{}/u/${{user_id}}", harness.server.uri()),
                "response": {"value": "Sorry: ${data.error}"}
            }),
        );

        let reply = harness
            .executor
            .run(&harness.request("action_user", json!({"user_id": "42"})))
            .await
            .unwrap();
        assert_eq!(reply.responses[0].text.as_deref(), Some("Sorry: db down"));
        let log = harness.last_log();
        assert_eq!(log.http_status_code, Some(500));
        assert_eq!(log.status, ActionStatus::Success);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_sub_events() {
        let harness = TestHarness::new().await;
        harness.save_action(
            "action_down",
            "http_action",
            json!({
                "http_url": "http://127.0.0.1:1/unreachable",
                "response": {"value": "ok"},
                "set_slots": [{"name": "x", "value": "data.x"}]
            }),
        );

        let reply = harness
            .executor
            .run(&harness.request("action_down", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.responses[0].text.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
        assert_eq!(
            reply.events,
            vec![SlotEvent::slot(KAIRON_ACTION_RESPONSE_SLOT, json!(DEFAULT_FAILURE_MESSAGE))]
        );
        let log = harness.last_log();
        assert_eq!(log.status, ActionStatus::Failure);
        assert_eq!(event_types(&log), vec!["response", "api_call", "filled_slots"]);
    }

    #[tokio::test]
    async fn test_invalid_config_keeps_sub_events() {
        let harness = TestHarness::new().await;
        harness.save_action(
            "action_bad",
            "http_action",
            json!({"http_url": 42, "response": "not an object"}),
        );

        let reply = harness
            .executor
            .run(&harness.request("action_bad", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.responses[0].text.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
        let log = harness.last_log();
        assert_eq!(log.status, ActionStatus::Failure);
        assert_eq!(event_types(&log), vec!["response", "api_call", "filled_slots"]);
    }

    #[tokio::test]
    async fn test_dispatch_false_keeps_slots() {
        let harness = TestHarness::new().await;
        Mock::given(method("GET"))
            .respond_with(MockResponse::new(200).set_body_json(json!({"id": 7})))
            .mount(&harness.server)
            .await;
        harness.save_action(
            "action_quiet",
            "http_action",
            json!({
                "http_url": harness.server.uri(),
                "response": {"value": "id ${data.id}", "dispatch": false},
                "set_slots": [{"name": "order_id", "value": "data.id"}]
            }),
        );

        let reply = harness
            .executor
            .run(&harness.request("action_quiet", json!({})))
            .await
            .unwrap();
        assert!(reply.responses.is_empty());
        assert!(reply.events.contains(&SlotEvent::slot("order_id", json!(7))));
        assert!(reply
            .events
            .contains(&SlotEvent::slot(KAIRON_ACTION_RESPONSE_SLOT, json!("id 7"))));
    }

    #[tokio::test]
    async fn test_post_with_secret_header_and_slot_body() {
        let harness = TestHarness::new().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(header("authorization", "sk-live-123"))
            .and(body_json(json!({"city": "Paris", "note": "for Paris", "sender": "u1"})))
            .respond_with(MockResponse::new(201).set_body_json(json!({"ok": true})))
            .mount(&harness.server)
            .await;
        harness.save_action(
            "action_order",
            "http_action",
            json!({
                "http_url": format!("{}/orders", harness.server.uri()),
                "request_method": "POST",
                "headers": [{"key": "authorization", "parameter_type": "key_vault", "value": "API_KEY"}],
                "params_list": [
                    {"key": "city", "parameter_type": "slot"},
                    {"key": "note", "parameter_type": "value", "value": "for ${city}"},
                    {"key": "sender", "parameter_type": "sender_id"}
                ],
                "response": {"value": "${data}", "dispatch_type": "json"}
            }),
        );

        let reply = harness
            .executor
            .run(&harness.request("action_order", json!({"city": "Paris"})))
            .await
            .unwrap();
        assert_eq!(reply.responses[0].custom, Some(json!({"ok": true})));

        let log = harness.last_log();
        assert_eq!(log.status, ActionStatus::Success);
        let serialized = serde_json::to_string(&log).unwrap();
        assert!(!serialized.contains("sk-live-123"));
        assert!(serialized.contains("***"));
    }

    #[tokio::test]
    async fn test_dynamic_params_win_over_params_list() {
        let harness = TestHarness::new().await;
        Mock::given(method("GET"))
            .and(query_param("q", "6"))
            .respond_with(MockResponse::new(200).set_body_json(json!({"hits": 1})))
            .mount(&harness.server)
            .await;
        harness.save_action(
            "action_dyn",
            "http_action",
            json!({
                "http_url": harness.server.uri(),
                "params_list": [{"key": "q", "parameter_type": "value", "value": "ignored"}],
                "dynamic_params": "bot_response = #{ q: slots[\"x\"] * 2 };",
                "response": {"value": "hits=${data.hits}"}
            }),
        );

        let reply = harness
            .executor
            .run(&harness.request("action_dyn", json!({"x": 3})))
            .await
            .unwrap();
        assert_eq!(reply.responses[0].text.as_deref(), Some("hits=1"));
    }

    #[tokio::test]
    async fn test_dynamic_params_must_be_a_map() {
        let harness = TestHarness::new().await;
        harness.save_action(
            "action_dyn",
            "http_action",
            json!({
                "http_url": harness.server.uri(),
                "dynamic_params": "bot_response = 5;",
                "response": {"value": "x"}
            }),
        );
        let reply = harness
            .executor
            .run(&harness.request("action_dyn", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.responses[0].text.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
        let log = harness.last_log();
        assert!(log.exception.unwrap().contains("dynamic_params"));
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_fails() {
        let harness = TestHarness::new().await;
        Mock::given(method("GET"))
            .respond_with(MockResponse::new(200).set_body_json(json!({"a": 1})))
            .mount(&harness.server)
            .await;
        harness.save_action(
            "action_tpl",
            "http_action",
            json!({"http_url": harness.server.uri(), "response": {"value": "${data.b}"}}),
        );
        let reply = harness
            .executor
            .run(&harness.request("action_tpl", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.responses[0].text.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
        assert_eq!(harness.last_log().status, ActionStatus::Failure);
    }
}
