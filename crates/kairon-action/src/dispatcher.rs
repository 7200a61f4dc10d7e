//! Dispatcher and audit logger.
//!
//! `Dispatcher` collects the bot messages of one invocation, `SlotChanges`
//! collects its slot writes, and `ActionLogBuilder` assembles the single
//! `ActionServerLog` record that `ActionLogger` persists.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use kairon_core::types::{
    ActionServerLog, ActionStatus, BotUtterance, SlotEvent, TrackerSnapshot,
};
use kairon_storage::ActionLogRepository;

use crate::types::{KAIRON_ACTION_RESPONSE_SLOT, REDACTED};

// =============================================================================
// Messages and slots
// =============================================================================

/// Ordered collection of messages to send back to the user.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    messages: Vec<BotUtterance>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn utter_message(&mut self, message: BotUtterance) {
        self.messages.push(message);
    }

    pub fn utter_text(&mut self, text: impl Into<String>) {
        self.utter_message(BotUtterance::text(text));
    }

    pub fn utter_custom(&mut self, payload: Value) {
        self.utter_message(BotUtterance::custom(payload));
    }

    pub fn messages(&self) -> &[BotUtterance] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<BotUtterance> {
        self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Slot writes produced by a handler.
///
/// Insertion-ordered with one entry per slot name: setting a slot twice
/// keeps its first position and the last value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotChanges {
    entries: Vec<(String, Value)>,
}

impl SlotChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Set the canonical response slot.
    pub fn set_response(&mut self, value: impl Into<Value>) {
        self.set(KAIRON_ACTION_RESPONSE_SLOT, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn merge(&mut self, other: SlotChanges) {
        for (name, value) in other.entries {
            self.set(name, value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Slot map for audit sub-events.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(n, v)| (n.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn into_events(self) -> Vec<SlotEvent> {
        self.entries
            .into_iter()
            .map(|(name, value)| SlotEvent::slot(name, value))
            .collect()
    }
}

impl FromIterator<(String, Value)> for SlotChanges {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut changes = SlotChanges::new();
        for (name, value) in iter {
            changes.set(name, value);
        }
        changes
    }
}

// =============================================================================
// Secret scrubbing
// =============================================================================

/// Remembers every secret revealed during a request and blanks it out of
/// anything written to the audit log.
#[derive(Debug, Default)]
pub struct Redactor {
    secrets: Mutex<BTreeSet<String>>,
}

impl Redactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, secret: &str) {
        if secret.is_empty() {
            return;
        }
        if let Ok(mut secrets) = self.secrets.lock() {
            secrets.insert(secret.to_string());
        }
    }

    pub fn scrub_str(&self, text: &str) -> String {
        let Ok(secrets) = self.secrets.lock() else {
            return text.to_string();
        };
        // Longest first so a secret containing another is replaced whole.
        let mut ordered: Vec<&String> = secrets.iter().collect();
        ordered.sort_by_key(|s| std::cmp::Reverse(s.len()));
        ordered
            .into_iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
    }

    pub fn scrub_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => *s = self.scrub_str(s),
            Value::Array(items) => items.iter_mut().for_each(|v| self.scrub_value(v)),
            Value::Object(map) => map.values_mut().for_each(|v| self.scrub_value(v)),
            _ => {}
        }
    }

    fn scrub_opt(&self, text: &mut Option<String>) {
        if let Some(s) = text {
            *s = self.scrub_str(s);
        }
    }
}

// =============================================================================
// Audit log
// =============================================================================

/// Accumulates the audit record of one invocation.
#[derive(Debug, Clone)]
pub struct ActionLogBuilder {
    action_type: String,
    action: String,
    bot: String,
    sender_id: String,
    intent: Option<String>,
    user_msg: Option<String>,
    trigger_info: Option<Value>,
    events: Vec<Value>,
    bot_response: Option<Value>,
    http_status_code: Option<u16>,
    exception: Option<String>,
    started: Instant,
}

impl ActionLogBuilder {
    pub fn new(
        action: &str,
        bot: &str,
        tracker: &TrackerSnapshot,
        trigger_info: Option<Value>,
    ) -> Self {
        Self {
            action_type: String::new(),
            action: action.to_string(),
            bot: bot.to_string(),
            sender_id: tracker.sender_id.clone(),
            intent: tracker.latest_message.intent_name().map(str::to_string),
            user_msg: tracker.latest_message.text.clone(),
            trigger_info,
            events: Vec::new(),
            bot_response: None,
            http_status_code: None,
            exception: None,
            started: Instant::now(),
        }
    }

    pub fn set_action_type(&mut self, action_type: impl Into<String>) {
        self.action_type = action_type.into();
    }

    /// Append a structured sub-event. `payload` fields are merged next to
    /// the `type` tag; non-object payloads land under `data`.
    pub fn push_event(&mut self, kind: &str, payload: Value) {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(kind.to_string()));
        match payload {
            Value::Object(fields) => event.extend(fields),
            Value::Null => {}
            other => {
                event.insert("data".to_string(), other);
            }
        }
        self.events.push(Value::Object(event));
    }

    pub fn set_bot_response(&mut self, response: impl Into<Value>) {
        self.bot_response = Some(response.into());
    }

    pub fn set_http_status(&mut self, status: u16) {
        self.http_status_code = Some(status);
    }

    /// Mark the invocation failed. The record is written with FAILURE.
    pub fn fail(&mut self, exception: impl ToString) {
        self.exception = Some(exception.to_string());
    }

    pub fn is_failed(&self) -> bool {
        self.exception.is_some()
    }

    pub fn events(&self) -> &[Value] {
        &self.events
    }

    pub fn bot_response(&self) -> Option<&Value> {
        self.bot_response.as_ref()
    }

    /// Seal the record, scrubbing every registered secret.
    pub fn finish(&self, redactor: &Redactor) -> ActionServerLog {
        let status = if self.exception.is_some() {
            ActionStatus::Failure
        } else {
            ActionStatus::Success
        };
        let mut log = ActionServerLog {
            action_type: self.action_type.clone(),
            intent: self.intent.clone(),
            action: self.action.clone(),
            sender_id: self.sender_id.clone(),
            bot: self.bot.clone(),
            user_msg: self.user_msg.clone(),
            bot_response: self.bot_response.clone(),
            status,
            exception: self.exception.clone(),
            events: self.events.clone(),
            http_status_code: self.http_status_code,
            time_elapsed_ms: self.started.elapsed().as_millis() as u64,
            trigger_info: self.trigger_info.clone(),
            timestamp: Utc::now(),
        };

        redactor.scrub_opt(&mut log.user_msg);
        redactor.scrub_opt(&mut log.exception);
        if let Some(v) = log.bot_response.as_mut() {
            redactor.scrub_value(v);
        }
        if let Some(v) = log.trigger_info.as_mut() {
            redactor.scrub_value(v);
        }
        log.events.iter_mut().for_each(|v| redactor.scrub_value(v));
        log
    }
}

/// Persists audit records. Write failures are logged and counted, never
/// propagated.
pub struct ActionLogger {
    repo: Arc<ActionLogRepository>,
    written: AtomicU64,
    failures: AtomicU64,
}

impl ActionLogger {
    pub fn new(repo: Arc<ActionLogRepository>) -> Self {
        Self {
            repo,
            written: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn write(&self, log: &ActionServerLog) {
        info!(
            bot = %log.bot,
            action = %log.action,
            action_type = %log.action_type,
            status = %log.status,
            elapsed_ms = log.time_elapsed_ms,
            "Action executed"
        );
        match self.repo.append(log) {
            Ok(_) => {
                self.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(bot = %log.bot, action = %log.action, error = %e, "Failed to write action log");
            }
        }
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn repository(&self) -> &ActionLogRepository {
        &self.repo
    }
}
