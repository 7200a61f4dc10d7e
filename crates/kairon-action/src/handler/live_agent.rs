//! Live-agent handoff.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};
use crate::types::ActionType;

#[derive(Debug, Clone, Deserialize)]
pub struct LiveAgentConfig {
    /// Reply used when the handoff service is unreachable or refuses.
    #[serde(default = "default_bot_response")]
    pub bot_response: String,
    #[serde(default = "default_dispatch")]
    pub dispatch_bot_response: bool,
}

fn default_bot_response() -> String {
    "Connecting to live agent".to_string()
}

fn default_dispatch() -> bool {
    true
}

/// Map an input channel onto one the live-agent service knows.
pub fn normalize_channel(channel: Option<&str>) -> &'static str {
    match channel.map(str::to_ascii_lowercase).as_deref() {
        Some("telegram") => "telegram",
        Some("messenger") | Some("facebook") => "messenger",
        Some("instagram") => "instagram",
        Some("whatsapp") => "whatsapp",
        _ => "web",
    }
}

pub struct LiveAgentHandler;

#[async_trait]
impl ActionHandler for LiveAgentHandler {
    fn action_type(&self) -> ActionType {
        ActionType::LiveAgent
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: LiveAgentConfig = ctx.parse_config()?;
        let channel = normalize_channel(ctx.tracker.latest_input_channel.as_deref());
        let integrations = &ctx.services.config.integrations;

        let outcome = match integrations.live_agent_url.as_deref() {
            Some(url) => {
                let body = json!({
                    "bot": ctx.bot,
                    "sender_id": ctx.tracker.sender_id,
                    "channel": channel,
                });
                let mut request = ctx
                    .services
                    .http
                    .post(format!("{}/api/live_agent/request", url.trim_end_matches('/')))
                    .json(&body);
                if let Some(token) = &integrations.live_agent_token {
                    request = request.bearer_auth(token);
                }
                handoff(request).await
            }
            None => Err(ActionError::UpstreamFailure(
                "live agent service is not configured".to_string(),
            )),
        };

        let (message, raw) = match outcome {
            Ok((message, raw)) => (message.unwrap_or_else(|| config.bot_response.clone()), raw),
            Err(e) => {
                warn!(bot = %ctx.bot, error = %ctx.scrubbed(&e), "Live agent handoff failed");
                ctx.log.fail(&e);
                (config.bot_response.clone(), json!({"error": e.to_string()}))
            }
        };
        ctx.log.push_event("live_agent", json!({"channel": channel, "response": raw}));

        if config.dispatch_bot_response {
            if channel == "web" {
                ctx.dispatcher
                    .utter_custom(json!({"action": "live_agent", "response": message}));
            } else {
                ctx.dispatcher.utter_text(message.clone());
            }
        }
        ctx.log.set_bot_response(message.clone());
        let mut slots = SlotChanges::new();
        slots.set_response(message);
        Ok(slots)
    }
}

async fn handoff(
    request: reqwest::RequestBuilder,
) -> Result<(Option<String>, Value), ActionError> {
    let response = request.send().await?;
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        return Err(ActionError::UpstreamFailure(format!(
            "live agent service returned {}",
            status
        )));
    }
    let message = body["data"]["msg"].as_str().map(str::to_string);
    Ok((message, body))
}
