//! Form slot validation.
//!
//! Validates the slot the form is currently asking for. A rejected value is
//! reset so the form asks again.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};
use crate::params::substitute_slots;
use crate::types::ActionType;

pub const REQUESTED_SLOT: &str = "requested_slot";

#[derive(Debug, Clone, Deserialize)]
pub struct SlotValidation {
    pub slot: String,
    /// Rhai expression over `slot_value` and the context variables; must
    /// evaluate to `true` for the value to be accepted.
    #[serde(default)]
    pub validation_semantic: Option<String>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub valid_response: Option<String>,
    #[serde(default)]
    pub invalid_response: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormValidationConfig {
    pub validations: Vec<SlotValidation>,
}

pub struct FormValidationHandler;

#[async_trait]
impl ActionHandler for FormValidationHandler {
    fn action_type(&self) -> ActionType {
        ActionType::FormValidation
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: FormValidationConfig = ctx.parse_config()?;
        let mut slots = SlotChanges::new();

        let Some(requested) = ctx.tracker.slot_str(REQUESTED_SLOT).map(str::to_string) else {
            ctx.log.push_event("form_validation", json!({"requested_slot": null}));
            return Ok(slots);
        };
        let value = ctx.tracker.slot(&requested).cloned().unwrap_or(Value::Null);

        let Some(validation) = config.validations.iter().find(|v| v.slot == requested) else {
            ctx.log.push_event(
                "form_validation",
                json!({"requested_slot": requested, "validated": false}),
            );
            slots.set(requested, value);
            return Ok(slots);
        };

        let context = ctx.context(false);
        let (valid, expression_result) = if value.is_null() {
            (!validation.is_required, Value::Null)
        } else if let Some(semantic) = validation
            .validation_semantic
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            let mut locals = ctx.script_locals(&context, &[semantic])?;
            locals.insert("slot_value".to_string(), value.clone());
            let result = ctx
                .services
                .sandbox
                .eval_expression(semantic, locals, ctx.script_timeout()?)
                .await?;
            (result == Value::Bool(true), result)
        } else {
            (true, Value::Null)
        };

        let response = if valid {
            slots.set(requested.clone(), value.clone());
            validation.valid_response.as_deref()
        } else {
            slots.set(requested.clone(), Value::Null);
            validation.invalid_response.as_deref()
        }
        .map(|text| substitute_slots(text, context.slots()));

        ctx.log.push_event(
            "form_validation",
            json!({
                "requested_slot": requested,
                "slot_value": value,
                "validation_semantic": validation.validation_semantic,
                "expression_result": expression_result,
                "is_valid": valid,
            }),
        );

        match response {
            Some(text) => {
                ctx.dispatcher.utter_text(text.clone());
                ctx.log.set_bot_response(text.clone());
                slots.set_response(text);
            }
            None => slots.set_response(Value::Null),
        }
        Ok(slots)
    }
}
