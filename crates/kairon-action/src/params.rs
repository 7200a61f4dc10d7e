//! Parameter resolution.
//!
//! Turns authored `(key, source, value)` specs into concrete values drawn
//! from the request context or the bot's key vault, and performs the
//! `${slot}` substitution pass applied to HTTP URLs and bodies.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use kairon_storage::KeyVault;

use crate::composer::{inline, PLACEHOLDER};
use crate::context::Context;
use crate::dispatcher::Redactor;
use crate::error::ActionError;
use crate::types::{ParameterSpec, ParameterType, REDACTED};

/// Resolved parameters plus the version safe to log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedRequest {
    pub values: Map<String, Value>,
    pub redacted: Map<String, Value>,
}

impl PreparedRequest {
    /// Values rendered as strings, e.g. for headers and query strings.
    pub fn string_values(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), inline(v)))
            .collect()
    }
}

pub struct ParameterResolver<'a> {
    context: &'a Context,
    vault: Option<&'a KeyVault>,
    redactor: &'a Redactor,
}

impl<'a> ParameterResolver<'a> {
    pub fn new(context: &'a Context, vault: Option<&'a KeyVault>, redactor: &'a Redactor) -> Self {
        Self {
            context,
            vault,
            redactor,
        }
    }

    /// Resolve one spec.
    ///
    /// Missing slots and absent context fields resolve to `""`. Vault
    /// lookups register the revealed secret with the redactor.
    pub fn resolve(&self, spec: &ParameterSpec) -> Result<Value, ActionError> {
        let ctx = self.context;
        let text = |v: Option<&str>| Value::String(v.unwrap_or_default().to_string());
        match spec.parameter_type {
            ParameterType::Value => match &spec.value {
                Some(v) => Ok(Value::String(v.clone())),
                None => Err(ActionError::ParameterResolution(format!(
                    "parameter '{}' of type value has no value",
                    spec.key
                ))),
            },
            ParameterType::Slot => {
                let name = spec
                    .value
                    .as_deref()
                    .filter(|v| !v.is_empty())
                    .unwrap_or(&spec.key);
                Ok(ctx.slot(name).cloned().unwrap_or_else(|| json!("")))
            }
            ParameterType::SenderId => Ok(json!(ctx.sender_id())),
            ParameterType::UserMessage => Ok(text(ctx.user_message())),
            ParameterType::Intent => Ok(text(ctx.intent())),
            ParameterType::LatestInputChannel => Ok(text(ctx.latest_input_channel())),
            ParameterType::LatestActionName => Ok(text(ctx.latest_action_name())),
            ParameterType::ChatLog => Ok(json!(ctx.chat_log())),
            ParameterType::KeyVault => {
                let name = spec.value.as_deref().unwrap_or_default();
                let secret = self.secret(name)?;
                Ok(Value::String(secret))
            }
        }
    }

    /// Fetch a secret for the context's bot and remember it for scrubbing.
    pub fn secret(&self, name: &str) -> Result<String, ActionError> {
        let vault = self
            .vault
            .ok_or_else(|| ActionError::SecretMissing(format!("{} (key vault not configured)", name)))?;
        let secret = vault
            .get(self.context.bot(), name)?
            .ok_or_else(|| ActionError::SecretMissing(name.to_string()))?;
        self.redactor.register(&secret);
        Ok(secret)
    }

    /// Resolve a list of specs into a request map and its redacted twin.
    pub fn prepare_request(&self, specs: &[ParameterSpec]) -> Result<PreparedRequest, ActionError> {
        let mut prepared = PreparedRequest::default();
        for spec in specs {
            let value = self.resolve(spec)?;
            let logged = if spec.parameter_type == ParameterType::KeyVault {
                json!(REDACTED)
            } else {
                value.clone()
            };
            prepared.values.insert(spec.key.clone(), value);
            prepared.redacted.insert(spec.key.clone(), logged);
        }
        Ok(prepared)
    }

    /// Resolve an optional spec to a string; `None` stays `None`.
    pub fn resolve_string(&self, spec: Option<&ParameterSpec>) -> Result<Option<String>, ActionError> {
        spec.map(|s| self.resolve(s).map(|v| inline(&v))).transpose()
    }
}

/// Replace `${slot}` with slot values; unknown slots become empty.
pub fn substitute_slots(template: &str, slots: &BTreeMap<String, Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            slots
                .get(caps[1].trim())
                .filter(|v| !v.is_null())
                .map(inline)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Apply `substitute_slots` to every string inside a JSON value.
pub fn substitute_slots_in_value(value: &Value, slots: &BTreeMap<String, Value>) -> Value {
    match value {
        Value::String(s) if s.contains("${") => Value::String(substitute_slots(s, slots)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| substitute_slots_in_value(v, slots))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_slots_in_value(v, slots)))
                .collect(),
        ),
        other => other.clone(),
    }
}
