//! Slot set/reset handler.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};
use crate::types::ActionType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotSetType {
    FromValue,
    ResetSlot,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotSetEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub set_type: SlotSetType,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotSetConfig {
    pub set_slots: Vec<SlotSetEntry>,
}

pub struct SlotSetHandler;

#[async_trait]
impl ActionHandler for SlotSetHandler {
    fn action_type(&self) -> ActionType {
        ActionType::SlotSet
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: SlotSetConfig = ctx.parse_config()?;
        let mut slots = SlotChanges::new();
        for entry in &config.set_slots {
            let value = match entry.set_type {
                SlotSetType::FromValue => entry.value.clone(),
                SlotSetType::ResetSlot => Value::Null,
            };
            slots.set(entry.name.clone(), value);
        }
        ctx.log.push_event("slots", json!({"set_slots": slots.to_json()}));
        slots.set_response(Value::Null);
        Ok(slots)
    }
}
