//! Callback action: mint a one-off URL an external system can call back on.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use kairon_storage::CallbackRecord;

use crate::composer::to_utterance;
use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};
use crate::types::{ActionType, ParameterSpec, ResponseTemplate};

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackActionConfig {
    pub callback_name: String,
    /// Slot that receives the generated URL.
    pub dynamic_url_slot_name: String,
    #[serde(default)]
    pub metadata_list: Vec<ParameterSpec>,
    /// Rendered against `{data: {callback_url, token}}`.
    #[serde(default)]
    pub bot_response: ResponseTemplate,
}

pub fn callback_url(base: &str, token: &str) -> String {
    format!("{}/callback/d/{}", base.trim_end_matches('/'), token)
}

pub struct CallbackActionHandler;

#[async_trait]
impl ActionHandler for CallbackActionHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Callback
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: CallbackActionConfig = ctx.parse_config()?;
        let context = ctx.context(false);
        let metadata = ctx.resolver(&context).prepare_request(&config.metadata_list)?;
        let composer = ctx.default_composer(&context, &[config.bot_response.value.as_str()])?;

        let token = Uuid::new_v4().simple().to_string();
        let url = callback_url(&ctx.services.config.integrations.callback_base_url, &token);
        ctx.services.schedules.save_callback(&CallbackRecord {
            token: token.clone(),
            bot: ctx.bot.to_string(),
            sender_id: context.sender_id().to_string(),
            callback_name: config.callback_name.clone(),
            url: url.clone(),
            metadata: Value::Object(metadata.values),
        })?;
        ctx.log.push_event(
            "callback",
            json!({
                "callback_name": config.callback_name,
                "callback_url": url,
                "metadata": metadata.redacted,
            }),
        );

        let data = json!({"data": {"callback_url": url, "token": token}});
        let composed = composer.compose(&config.bot_response, &data).await?;
        if config.bot_response.dispatch && !composed.text().is_empty() {
            ctx.dispatcher.utter_message(to_utterance(
                &composed.value,
                config.bot_response.dispatch_type,
            ));
        }
        ctx.log.set_bot_response(composed.value.clone());

        let mut slots = SlotChanges::new();
        slots.set(config.dynamic_url_slot_name, Value::String(url));
        slots.set_response(composed.value);
        Ok(slots)
    }
}
