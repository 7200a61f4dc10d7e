//! Bot-response handler.
//!
//! Picks one of the domain's templates for the utterance uniformly at
//! random and, when the bot asks for it, has the LLM rephrase the text.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use kairon_core::types::BotUtterance;

use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};
use crate::types::ActionType;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotResponseConfig {
    /// Domain utterance to draw from; defaults to the action name.
    #[serde(default)]
    pub utterance: Option<String>,
}

pub struct BotResponseHandler;

#[async_trait]
impl ActionHandler for BotResponseHandler {
    fn action_type(&self) -> ActionType {
        ActionType::BotResponse
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: BotResponseConfig = ctx.parse_config()?;
        let utterance = config.utterance.as_deref().unwrap_or(ctx.action_name);
        let templates = ctx
            .domain
            .responses
            .get(utterance)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ActionError::InvalidConfig(format!("domain has no responses for '{}'", utterance))
            })?;

        let index = rand::rng().random_range(0..templates.len());
        let mut message = BotUtterance::from_template(&templates[index]);

        let settings = ctx.settings()?;
        let mut rephrased = false;
        let mut rephraser_response = Value::Null;
        if settings.rephrase_response && ctx.services.llm.is_configured() {
            if let Some(text) = message.text.clone() {
                let timeout = Duration::from_secs(ctx.services.config.timeouts.rephrase_secs);
                match ctx.services.llm.rephrase(&text, timeout).await {
                    Ok(reply) if !reply.content.is_empty() => {
                        message.text = Some(reply.content);
                        rephraser_response = reply.raw;
                        rephrased = true;
                    }
                    Ok(reply) => rephraser_response = reply.raw,
                    Err(e) => {
                        warn!(
                            bot = %ctx.bot,
                            action = %ctx.action_name,
                            error = %ctx.scrubbed(&e),
                            "Rephrasing failed"
                        );
                        rephraser_response = json!({"error": e.to_string()});
                    }
                }
            }
        }

        ctx.log.push_event(
            "bot_response",
            json!({
                "utterance": utterance,
                "template_index": index,
                "rephrased": rephrased,
                "rephraser_response": rephraser_response,
            }),
        );

        let response = match &message.text {
            Some(text) => Value::String(text.clone()),
            None => serde_json::to_value(&message).unwrap_or(Value::Null),
        };
        ctx.dispatcher.utter_message(message);
        ctx.log.set_bot_response(response.clone());

        let mut slots = SlotChanges::new();
        slots.set_response(response);
        Ok(slots)
    }
}
