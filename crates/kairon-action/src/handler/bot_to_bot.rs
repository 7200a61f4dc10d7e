//! Relay the user's message to another bot and speak its replies.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use kairon_core::types::BotUtterance;

use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{send_json, ActionContext, ActionHandler};
use crate::types::{ActionType, ParameterSpec};

#[derive(Debug, Clone, Deserialize)]
pub struct BotToBotConfig {
    /// Chat endpoint of the target bot.
    pub bot_url: String,
    /// Sent as a bearer token when set.
    #[serde(default)]
    pub auth_token: Option<ParameterSpec>,
    #[serde(default = "default_dispatch")]
    pub dispatch_response: bool,
}

fn default_dispatch() -> bool {
    true
}

/// Pull utterances out of either a Rasa-style list or a
/// `{data: {response: [...]}}` envelope.
pub fn extract_messages(body: &Value) -> Vec<BotUtterance> {
    let items = body
        .as_array()
        .or_else(|| body["data"]["response"].as_array())
        .cloned()
        .unwrap_or_default();
    items
        .iter()
        .filter(|item| item.get("text").is_some() || item.get("custom").is_some())
        .map(BotUtterance::from_template)
        .collect()
}

pub struct BotToBotHandler;

#[async_trait]
impl ActionHandler for BotToBotHandler {
    fn action_type(&self) -> ActionType {
        ActionType::BotToBot
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: BotToBotConfig = ctx.parse_config()?;
        let context = ctx.context(false);
        let token = ctx
            .resolver(&context)
            .resolve_string(config.auth_token.as_ref())?;
        let message = context.user_message().unwrap_or_default().to_string();

        let mut request = ctx
            .services
            .http
            .post(&config.bot_url)
            .json(&json!({"sender": context.sender_id(), "message": message}));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let result = send_json(request, "Target bot").await;
        ctx.log.push_event(
            "bot_to_bot",
            json!({
                "bot_url": config.bot_url,
                "message": message,
                "response": result.as_ref().ok(),
                "error": result.as_ref().err().map(|e| e.to_string()),
            }),
        );
        let messages = extract_messages(&result?);

        let text: Vec<String> = messages
            .iter()
            .filter_map(|m| m.text.clone())
            .collect();
        let response = Value::String(text.join("\n"));
        if config.dispatch_response {
            for message in messages {
                ctx.dispatcher.utter_message(message);
            }
        }
        ctx.log.set_bot_response(response.clone());
        let mut slots = SlotChanges::new();
        slots.set_response(response);
        Ok(slots)
    }
}
