//! Two-stage fallback: offer the user buttons for the likeliest intents
//! before giving up.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use kairon_core::types::BotUtterance;

use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};
use crate::types::ActionType;

const NLU_FALLBACK_INTENT: &str = "nlu_fallback";

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerRule {
    /// Button title.
    pub text: String,
    /// Intent name; sent as `/payload`.
    pub payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwoStageFallbackConfig {
    #[serde(default)]
    pub trigger_rules: Vec<TriggerRule>,
    /// How many ranked intents to suggest after the trigger rules.
    #[serde(default = "default_num_suggestions")]
    pub num_suggestions: usize,
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

fn default_num_suggestions() -> usize {
    3
}

fn default_fallback_message() -> String {
    "I could not understand you! Did you mean any of the suggestions below? \
     Or else please rephrase your question."
        .to_string()
}

fn button(title: &str, intent: &str) -> Value {
    json!({"title": title, "payload": format!("/{}", intent)})
}

/// Buttons from the configured rules, then the top ranked intents.
/// Duplicates and the fallback intent itself are skipped.
pub fn suggestions(config: &TwoStageFallbackConfig, ranking: &[(String, f64)]) -> Vec<Value> {
    let mut seen: Vec<&str> = Vec::new();
    let mut buttons = Vec::new();
    for rule in &config.trigger_rules {
        if !seen.contains(&rule.payload.as_str()) {
            seen.push(&rule.payload);
            buttons.push(button(&rule.text, &rule.payload));
        }
    }
    for (intent, _) in ranking
        .iter()
        .filter(|(name, _)| name != NLU_FALLBACK_INTENT)
        .take(config.num_suggestions)
    {
        if !seen.contains(&intent.as_str()) {
            seen.push(intent);
            buttons.push(button(&intent.replace('_', " "), intent));
        }
    }
    buttons
}

pub struct TwoStageFallbackHandler;

#[async_trait]
impl ActionHandler for TwoStageFallbackHandler {
    fn action_type(&self) -> ActionType {
        ActionType::TwoStageFallback
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: TwoStageFallbackConfig = ctx.parse_config()?;
        let mut ranking: Vec<(String, f64)> = ctx
            .tracker
            .latest_message
            .intent_ranking
            .iter()
            .filter_map(|i| Some((i.name.clone()?, i.confidence.unwrap_or(0.0))))
            .collect();
        ranking.sort_by(|a, b| b.1.total_cmp(&a.1));

        let buttons = suggestions(&config, &ranking);
        ctx.log
            .push_event("two_stage_fallback", json!({"suggestions": buttons}));

        let message = BotUtterance::text(config.fallback_message.clone()).with_buttons(buttons);
        ctx.dispatcher.utter_message(message);
        ctx.log.set_bot_response(config.fallback_message.clone());
        let mut slots = SlotChanges::new();
        slots.set_response(config.fallback_message);
        Ok(slots)
    }
}
