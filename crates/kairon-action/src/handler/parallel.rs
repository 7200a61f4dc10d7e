//! Parallel action: run several actions concurrently within one request.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;

use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};
use crate::types::ActionType;

#[derive(Debug, Clone, Deserialize)]
pub struct ParallelActionConfig {
    pub actions: Vec<String>,
    #[serde(default)]
    pub response_text: Option<String>,
    #[serde(default = "default_dispatch")]
    pub dispatch_response_text: bool,
}

fn default_dispatch() -> bool {
    true
}

pub struct ParallelActionHandler;

#[async_trait]
impl ActionHandler for ParallelActionHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Parallel
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: ParallelActionConfig = ctx.parse_config()?;
        let executor = ctx.executor.ok_or_else(|| {
            ActionError::Rejected(format!("parallel action '{}' cannot be nested", ctx.action_name))
        })?;
        if config.actions.iter().any(|a| a == ctx.action_name) {
            return Err(ActionError::Rejected(format!(
                "parallel action '{}' lists itself",
                ctx.action_name
            )));
        }

        let (bot, tracker, domain) = (ctx.bot, ctx.tracker, ctx.domain);
        let trigger = json!({"parallel_action": ctx.action_name});
        let runs = config
            .actions
            .iter()
            .map(|name| executor.run_nested(name, bot, tracker, domain, Some(trigger.clone())));
        let outcomes = join_all(runs).await;

        // Merged in listed order so later actions win on shared slots.
        let mut slots = SlotChanges::new();
        let mut summary = Vec::with_capacity(outcomes.len());
        for (name, outcome) in config.actions.iter().zip(outcomes) {
            let outcome = outcome?;
            summary.push(json!({
                "action": name,
                "slots": outcome.slots.to_json(),
                "messages": outcome.messages.len(),
            }));
            slots.merge(outcome.slots);
            for message in outcome.messages {
                ctx.dispatcher.utter_message(message);
            }
        }
        ctx.log.push_event("parallel", json!({"actions": summary}));

        match config.response_text {
            Some(text) => {
                if config.dispatch_response_text {
                    ctx.dispatcher.utter_text(text.clone());
                }
                ctx.log.set_bot_response(text.clone());
                slots.set_response(text);
            }
            None => slots.set_response(serde_json::Value::Null),
        }
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use kairon_core::types::{ActionStatus, SlotEvent};
    use serde_json::Value;
    use std::time::{Duration, Instant};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    async fn slow_endpoint(harness: &TestHarness, route: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(body)
                    .set_delay(Duration::from_millis(400)),
            )
            .mount(&harness.server)
            .await;
    }

    fn http_action(harness: &TestHarness, name: &str, route: &str, slot: &str) {
        harness.save_action(
            name,
            "http_action",
            json!({
                "http_url": format!("{}{}", harness.server.uri(), route),
                "request_method": "GET",
                "response": {"value": "${data.value}", "dispatch": true},
                "set_slots": [{"name": slot, "value": "data.value"}]
            }),
        );
    }

    #[tokio::test]
    async fn test_children_run_concurrently_and_merge() {
        let harness = TestHarness::new().await;
        slow_endpoint(&harness, "/a", json!({"value": "alpha"})).await;
        slow_endpoint(&harness, "/b", json!({"value": "beta"})).await;
        http_action(&harness, "action_a", "/a", "a");
        http_action(&harness, "action_b", "/b", "b");
        harness.save_action(
            "action_both",
            "parallel_action",
            json!({"actions": ["action_a", "action_b"], "response_text": "All done"}),
        );

        let started = Instant::now();
        let reply = harness
            .executor
            .run(&harness.request("action_both", json!({})))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(750));

        let texts: Vec<_> = reply.responses.iter().filter_map(|r| r.text.clone()).collect();
        assert_eq!(texts, vec!["alpha", "beta", "All done"]);
        assert!(reply.events.contains(&SlotEvent::slot("a", json!("alpha"))));
        assert!(reply.events.contains(&SlotEvent::slot("b", json!("beta"))));
        assert!(reply
            .events
            .contains(&SlotEvent::slot("kairon_action_response", json!("All done"))));

        // One record per child plus the parallel action itself.
        let logs = harness.logs();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs.last().unwrap().action, "action_both");
    }

    #[tokio::test]
    async fn test_nested_parallel_is_rejected() {
        let harness = TestHarness::new().await;
        harness.save_action("action_inner", "parallel_action", json!({"actions": []}));
        harness.save_action(
            "action_outer",
            "parallel_action",
            json!({"actions": ["action_inner"]}),
        );
        let err = harness
            .executor
            .run(&harness.request("action_outer", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Rejected(_)));
        assert!(harness
            .logs()
            .iter()
            .all(|l| l.status == ActionStatus::Failure));
    }

    #[tokio::test]
    async fn test_failed_child_does_not_fail_parent() {
        let harness = TestHarness::new().await;
        harness.save_action(
            "action_broken",
            "pyscript_action",
            json!({"source_code": "let x = ;"}),
        );
        harness.save_action(
            "action_wrap",
            "parallel_action",
            json!({"actions": ["action_broken"], "response_text": "Done"}),
        );
        let reply = harness
            .executor
            .run(&harness.request("action_wrap", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.responses.len(), 2);
        assert_eq!(reply.responses[1].text.as_deref(), Some("Done"));
        assert_eq!(harness.last_log().status, ActionStatus::Success);
    }
}
