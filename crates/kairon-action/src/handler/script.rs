//! Script action handler.
//!
//! Runs an authored script in the sandbox. `bot_response` becomes the reply
//! and any slot the script changed is written back.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::composer::to_utterance;
use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};
use crate::types::{ActionType, DispatchType};

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptActionConfig {
    pub source_code: String,
    #[serde(default = "default_dispatch")]
    pub dispatch_response: bool,
    #[serde(default)]
    pub dispatch_type: DispatchType,
}

fn default_dispatch() -> bool {
    true
}

pub struct ScriptActionHandler;

#[async_trait]
impl ActionHandler for ScriptActionHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Script
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: ScriptActionConfig = ctx.parse_config()?;
        let context = ctx.context(true);
        let locals = ctx.script_locals(&context, &[config.source_code.as_str()])?;
        let timeout = ctx.script_timeout()?;

        let result = ctx
            .services
            .sandbox
            .run_script(&config.source_code, locals, timeout)
            .await;
        let scope = match result {
            Ok(scope) => scope,
            Err(e) => {
                ctx.log.push_event("script", json!({"source": config.source_code, "error": e.to_string()}));
                return Err(e);
            }
        };

        let mut slots = SlotChanges::new();
        if let Some(Value::Object(updated)) = scope.get("slots") {
            for (name, value) in updated {
                if name == "bot" {
                    continue;
                }
                if context.slots().get(name) != Some(value) {
                    slots.set(name.clone(), value.clone());
                }
            }
        }

        let response = scope.get("bot_response").cloned().unwrap_or(Value::Null);
        ctx.log.push_event(
            "script",
            json!({"source": config.source_code, "bot_response": response, "slots": slots.to_json()}),
        );

        if config.dispatch_response && !response.is_null() {
            ctx.dispatcher
                .utter_message(to_utterance(&response, config.dispatch_type));
        }
        ctx.log.set_bot_response(response.clone());
        slots.set_response(response);
        Ok(slots)
    }
}
