//! Action executor.
//!
//! Resolves the requested action's config, dispatches it to the registered
//! handler, frames the reply, and guarantees exactly one audit record per
//! invocation, including invocations abandoned mid-flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use kairon_core::types::{ActionReply, BotUtterance, Domain, TrackerSnapshot};
use kairon_storage::ActionConfigRecord;

use crate::dispatcher::{ActionLogBuilder, ActionLogger, Redactor, SlotChanges};
use crate::error::ActionError;
use crate::handler::{ActionContext, ActionRegistry};
use crate::services::Services;
use crate::types::{ActionType, DEFAULT_FAILURE_MESSAGE, KAIRON_ACTION_RESPONSE_SLOT};

/// Slots and messages produced by one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutcome {
    pub slots: SlotChanges,
    pub messages: Vec<BotUtterance>,
}

impl ActionOutcome {
    fn failed() -> Self {
        let mut slots = SlotChanges::new();
        slots.set_response(DEFAULT_FAILURE_MESSAGE);
        Self {
            slots,
            messages: vec![BotUtterance::text(DEFAULT_FAILURE_MESSAGE)],
        }
    }

    pub fn into_reply(self) -> ActionReply {
        ActionReply {
            events: self.slots.into_events(),
            responses: self.messages,
        }
    }
}

/// Audit record that is written exactly once: by `commit`, or on drop as a
/// cancelled invocation.
struct PendingLog<'a> {
    logger: &'a ActionLogger,
    redactor: &'a Redactor,
    builder: ActionLogBuilder,
    written: bool,
}

impl<'a> PendingLog<'a> {
    fn new(logger: &'a ActionLogger, redactor: &'a Redactor, builder: ActionLogBuilder) -> Self {
        Self {
            logger,
            redactor,
            builder,
            written: false,
        }
    }

    fn commit(&mut self) {
        if !self.written {
            self.written = true;
            self.logger.write(&self.builder.finish(self.redactor));
        }
    }
}

impl Drop for PendingLog<'_> {
    fn drop(&mut self) {
        if !self.written {
            warn!("Action invocation dropped before completion");
            self.builder.fail(ActionError::Cancelled);
            self.commit();
        }
    }
}

type SenderKey = (String, String);

/// Runs actions for the webhook.
pub struct ActionExecutor {
    registry: ActionRegistry,
    services: Arc<Services>,
    sender_locks: Mutex<HashMap<SenderKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ActionExecutor {
    pub fn new(registry: ActionRegistry, services: Arc<Services>) -> Self {
        Self {
            registry,
            services,
            sender_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Executor with every built-in handler registered.
    pub fn with_defaults(services: Arc<Services>) -> Self {
        let mut registry = ActionRegistry::new();
        registry.register_defaults();
        Self::new(registry, services)
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Handle one webhook request.
    ///
    /// `UnknownActionType`, `ConfigMissing` and `Rejected` are returned as
    /// errors; every other failure becomes the canned failure reply.
    pub async fn run(
        &self,
        request: &kairon_core::types::ActionRequest,
    ) -> Result<ActionReply, ActionError> {
        let bot = request
            .tracker
            .slot_str("bot")
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ActionError::Rejected("tracker has no 'bot' slot".to_string()))?;

        let sender_lock = if self.services.config.server.serialize_per_sender {
            Some(self.sender_lock(bot, &request.tracker.sender_id))
        } else {
            None
        };
        let _serialized = match &sender_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let outcome = self
            .invoke(
                &request.next_action,
                bot,
                &request.tracker,
                &request.domain,
                request.trigger_info.clone(),
                false,
            )
            .await?;
        Ok(outcome.into_reply())
    }

    /// Run another action inside the current request. Nested invocations
    /// cannot themselves be parallel actions.
    pub fn run_nested<'a>(
        &'a self,
        name: &'a str,
        bot: &'a str,
        tracker: &'a TrackerSnapshot,
        domain: &'a Domain,
        trigger_info: Option<Value>,
    ) -> BoxFuture<'a, Result<ActionOutcome, ActionError>> {
        Box::pin(self.invoke(name, bot, tracker, domain, trigger_info, true))
    }

    fn sender_lock(&self, bot: &str, sender_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.sender_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            locks
                .entry((bot.to_string(), sender_id.to_string()))
                .or_default(),
        )
    }

    /// Find the config for `name`. `utter_*` names without a config fall
    /// back to bot-response templating when the domain defines them.
    fn resolve_config(
        &self,
        bot: &str,
        name: &str,
        domain: &Domain,
    ) -> Result<ActionConfigRecord, ActionError> {
        if let Some(record) = self.services.action_configs.lookup(bot, name)? {
            return Ok(record);
        }
        if name.starts_with("utter_") && domain.responses.contains_key(name) {
            return Ok(ActionConfigRecord {
                bot: bot.to_string(),
                name: name.to_string(),
                action_type: ActionType::BotResponse.as_str().to_string(),
                config: json!({}),
                active: true,
            });
        }
        Err(ActionError::ConfigMissing(name.to_string()))
    }

    async fn invoke(
        &self,
        name: &str,
        bot: &str,
        tracker: &TrackerSnapshot,
        domain: &Domain,
        trigger_info: Option<Value>,
        nested: bool,
    ) -> Result<ActionOutcome, ActionError> {
        let redactor = Redactor::new();
        let mut pending = PendingLog::new(
            &self.services.logger,
            &redactor,
            ActionLogBuilder::new(name, bot, tracker, trigger_info),
        );

        let record = match self.resolve_config(bot, name, domain) {
            Ok(record) => record,
            Err(e) if e.is_client_error() => return Err(reject(&mut pending, e)),
            Err(e) => return Ok(fail(&mut pending, bot, name, e)),
        };
        pending.builder.set_action_type(record.action_type.clone());

        let action_type: ActionType = match record.action_type.parse() {
            Ok(t) => t,
            Err(_) => {
                return Err(reject(
                    &mut pending,
                    ActionError::UnknownActionType(record.action_type.clone()),
                ))
            }
        };
        if nested && action_type == ActionType::Parallel {
            return Err(reject(
                &mut pending,
                ActionError::Rejected(format!("nested parallel action '{}'", name)),
            ));
        }
        let Some(handler) = self.registry.get(action_type) else {
            return Err(reject(
                &mut pending,
                ActionError::UnknownActionType(record.action_type.clone()),
            ));
        };

        debug!(bot = %bot, action = %name, action_type = %action_type, "Executing action");

        let (result, dispatcher) = {
            let mut ctx = ActionContext {
                bot,
                action_name: name,
                tracker,
                domain,
                config: &record.config,
                services: &self.services,
                dispatcher: Default::default(),
                log: &mut pending.builder,
                redactor: &redactor,
                executor: if nested { None } else { Some(self) },
            };
            let result = handler.execute(&mut ctx).await;
            (result, ctx.dispatcher)
        };

        match result {
            Ok(slots) => {
                if pending.builder.bot_response().is_none() {
                    if let Some(response) = slots.get(KAIRON_ACTION_RESPONSE_SLOT) {
                        pending.builder.set_bot_response(response.clone());
                    }
                }
                pending.commit();
                Ok(ActionOutcome {
                    slots,
                    messages: dispatcher.into_messages(),
                })
            }
            Err(e) if e.is_client_error() => Err(reject(&mut pending, e)),
            Err(e) => Ok(fail(&mut pending, bot, name, e)),
        }
    }
}

fn fail(pending: &mut PendingLog<'_>, bot: &str, name: &str, err: ActionError) -> ActionOutcome {
    let message = pending.redactor.scrub_str(&err.to_string());
    error!(bot = %bot, action = %name, error = %message, "Action failed");
    pending.builder.fail(&err);
    pending.builder.set_bot_response(DEFAULT_FAILURE_MESSAGE);
    pending.commit();
    ActionOutcome::failed()
}

fn reject(pending: &mut PendingLog<'_>, err: ActionError) -> ActionError {
    let message = pending.redactor.scrub_str(&err.to_string());
    warn!(error = %message, "Action rejected");
    pending.builder.fail(&err);
    pending.commit();
    err
}

impl std::fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("types", &self.registry.types())
            .finish()
    }
}
