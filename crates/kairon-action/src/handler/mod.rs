//! Action handler registry and trait definition.
//!
//! Defines the `ActionHandler` async trait, the per-invocation
//! `ActionContext` handlers work against, and the registry that maps each
//! action type to its implementation.

pub mod bot_response;
pub mod bot_to_bot;
pub mod callback;
pub mod crm;
pub mod database;
pub mod email;
pub mod form_validation;
pub mod http;
pub mod live_agent;
pub mod llm;
pub mod parallel;
pub mod razorpay;
pub mod schedule;
pub mod script;
pub mod search;
pub mod slot_set;
pub mod two_stage_fallback;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use kairon_core::types::{Domain, TrackerSnapshot};
use kairon_storage::BotSettings;

use crate::composer::ResponseComposer;
use crate::context::Context;
use crate::dispatcher::{ActionLogBuilder, Dispatcher, Redactor, SlotChanges};
use crate::error::ActionError;
use crate::executor::ActionExecutor;
use crate::params::ParameterResolver;
use crate::services::Services;
use crate::types::ActionType;

/// Everything a handler needs for one invocation.
pub struct ActionContext<'a> {
    pub bot: &'a str,
    pub action_name: &'a str,
    pub tracker: &'a TrackerSnapshot,
    pub domain: &'a Domain,
    /// Type-specific payload of the stored action config.
    pub config: &'a Value,
    pub services: &'a Services,
    pub dispatcher: Dispatcher,
    pub log: &'a mut ActionLogBuilder,
    pub redactor: &'a Redactor,
    /// Set for top-level invocations; lets a handler run other actions.
    pub executor: Option<&'a ActionExecutor>,
}

impl<'a> ActionContext<'a> {
    /// Deserialize the stored config into the handler's config type.
    pub fn parse_config<T: DeserializeOwned>(&self) -> Result<T, ActionError> {
        serde_json::from_value(self.config.clone()).map_err(|e| {
            ActionError::InvalidConfig(format!("{}: {}", self.action_name, e))
        })
    }

    /// Error text with every secret revealed so far blanked out, for tracing.
    pub fn scrubbed(&self, err: &ActionError) -> String {
        self.redactor.scrub_str(&err.to_string())
    }

    pub fn context(&self, include_chat_log: bool) -> Context {
        Context::build(self.tracker, self.bot, include_chat_log)
    }

    pub fn resolver<'b>(&self, context: &'b Context) -> ParameterResolver<'b>
    where
        'a: 'b,
    {
        ParameterResolver::new(context, self.services.vault.as_ref(), self.redactor)
    }

    pub fn settings(&self) -> Result<BotSettings, ActionError> {
        Ok(self.services.bot_settings.get(self.bot)?)
    }

    /// Script timeout for this bot, capped by the sandbox maximum.
    pub fn script_timeout(&self) -> Result<Duration, ActionError> {
        let secs = self
            .settings()?
            .script_timeout_secs
            .unwrap_or(self.services.config.timeouts.script_secs);
        Ok(self.services.sandbox.clamp_timeout(Duration::from_secs(secs)))
    }

    /// Script-visible variables. `key_vault` is only loaded when one of
    /// `sources` mentions it.
    pub fn script_locals(
        &self,
        context: &Context,
        sources: &[&str],
    ) -> Result<Map<String, Value>, ActionError> {
        let mut locals = context.to_locals();
        if sources.iter().any(|s| s.contains("key_vault")) {
            let mut secrets = Map::new();
            if let Some(vault) = &self.services.vault {
                for key in vault.list_keys(self.bot)? {
                    if let Some(secret) = vault.get(self.bot, &key)? {
                        self.redactor.register(&secret);
                        secrets.insert(key, Value::String(secret));
                    }
                }
            }
            locals.insert("key_vault".to_string(), Value::Object(secrets));
        }
        Ok(locals)
    }

    pub fn composer(&self, locals: Map<String, Value>, timeout: Duration) -> ResponseComposer<'a> {
        ResponseComposer::new(&self.services.sandbox, locals, timeout)
    }

    /// Composer over the standard context, for handlers whose templates
    /// and slot scripts share one set of locals.
    pub fn default_composer(
        &self,
        context: &Context,
        sources: &[&str],
    ) -> Result<ResponseComposer<'a>, ActionError> {
        let locals = self.script_locals(context, sources)?;
        Ok(self.composer(locals, self.script_timeout()?))
    }
}

/// Trait that all action handlers must implement.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_type(&self) -> ActionType;

    /// Run the action. Bot messages go to `ctx.dispatcher`, audit sub-events
    /// to `ctx.log`; the returned slot changes become the reply's events.
    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError>;
}

/// Send an upstream request and parse its JSON body; non-2xx statuses
/// become `UpstreamFailure` naming `service`.
pub(crate) async fn send_json(
    request: reqwest::RequestBuilder,
    service: &str,
) -> Result<Value, ActionError> {
    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    if !status.is_success() {
        return Err(ActionError::UpstreamFailure(format!(
            "{} returned {}: {}",
            service, status, body
        )));
    }
    Ok(body)
}

/// Explicit table of handlers keyed by action type.
pub struct ActionRegistry {
    handlers: HashMap<ActionType, Box<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Box<dyn ActionHandler>) {
        self.handlers.insert(handler.action_type(), handler);
    }

    /// Register one handler for every built-in action type.
    pub fn register_defaults(&mut self) {
        self.register(Box::new(http::HttpActionHandler));
        self.register(Box::new(email::EmailActionHandler));
        self.register(Box::new(bot_response::BotResponseHandler));
        self.register(Box::new(script::ScriptActionHandler));
        self.register(Box::new(llm::FaqActionHandler));
        self.register(Box::new(llm::PromptActionHandler));
        self.register(Box::new(live_agent::LiveAgentHandler));
        self.register(Box::new(slot_set::SlotSetHandler));
        self.register(Box::new(form_validation::FormValidationHandler));
        self.register(Box::new(search::GoogleSearchHandler));
        self.register(Box::new(search::WebSearchHandler));
        self.register(Box::new(crm::ZendeskHandler));
        self.register(Box::new(crm::PipedriveHandler));
        self.register(Box::new(crm::HubspotHandler));
        self.register(Box::new(two_stage_fallback::TwoStageFallbackHandler));
        self.register(Box::new(bot_to_bot::BotToBotHandler));
        self.register(Box::new(razorpay::RazorpayHandler));
        self.register(Box::new(database::DatabaseActionHandler));
        self.register(Box::new(parallel::ParallelActionHandler));
        self.register(Box::new(schedule::ScheduleActionHandler));
        self.register(Box::new(callback::CallbackActionHandler));
    }

    pub fn get(&self, action_type: ActionType) -> Option<&dyn ActionHandler> {
        self.handlers.get(&action_type).map(|h| h.as_ref())
    }

    /// Registered types in declaration order.
    pub fn types(&self) -> Vec<ActionType> {
        ActionType::ALL
            .iter()
            .copied()
            .filter(|t| self.handlers.contains_key(t))
            .collect()
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_defaults_covers_every_type() {
        let mut registry = ActionRegistry::new();
        registry.register_defaults();
        assert_eq!(registry.types(), ActionType::ALL.to_vec());
        for action_type in ActionType::ALL {
            let handler = registry.get(action_type).unwrap();
            assert_eq!(handler.action_type(), action_type);
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = ActionRegistry::default();
        assert!(registry.get(ActionType::Http).is_none());
        assert!(registry.types().is_empty());
    }
}
