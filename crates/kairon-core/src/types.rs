use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Tracker snapshot (input)
// =============================================================================

/// Snapshot of a conversation as sent by the dialogue manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub slots: BTreeMap<String, Value>,
    #[serde(default)]
    pub latest_message: LatestMessage,
    #[serde(default)]
    pub events: Vec<TrackerEvent>,
    #[serde(default)]
    pub latest_input_channel: Option<String>,
    #[serde(default)]
    pub latest_action_name: Option<String>,
}

impl TrackerSnapshot {
    /// Current value of a slot, treating explicit nulls as unset.
    pub fn slot(&self, name: &str) -> Option<&Value> {
        self.slots.get(name).filter(|v| !v.is_null())
    }

    /// Slot value as a string, if the slot holds a string.
    pub fn slot_str(&self, name: &str) -> Option<&str> {
        self.slot(name).and_then(Value::as_str)
    }
}

/// The most recent user message with its NLU parse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatestMessage {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub intent: Option<IntentRef>,
    #[serde(default)]
    pub intent_ranking: Vec<IntentInfo>,
    #[serde(default)]
    pub entities: Vec<Value>,
}

impl LatestMessage {
    pub fn intent_name(&self) -> Option<&str> {
        match self.intent.as_ref()? {
            IntentRef::Name(name) => Some(name.as_str()),
            IntentRef::Info(info) => info.name.as_deref(),
        }
    }
}

/// Intents arrive either as a bare name or as a `{name, confidence}` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntentRef {
    Name(String),
    Info(IntentInfo),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntentInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// One entry of the tracker's event stream.
///
/// Only the fields the engine reads are typed; everything else is kept in
/// `extra` so events survive a round trip untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerEvent {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Static bot definition; the engine only reads response templates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Domain {
    #[serde(default)]
    pub responses: BTreeMap<String, Vec<Value>>,
}

// =============================================================================
// Wire protocol
// =============================================================================

/// Body of `POST /webhook`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub next_action: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub tracker: TrackerSnapshot,
    #[serde(default)]
    pub domain: Domain,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub trigger_info: Option<Value>,
}

/// Successful reply to the dialogue manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionReply {
    pub events: Vec<SlotEvent>,
    pub responses: Vec<BotUtterance>,
}

/// A `slot` event asking the tracker to set `name` to `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotEvent {
    pub event: String,
    pub name: String,
    pub value: Value,
}

impl SlotEvent {
    pub fn slot(name: impl Into<String>, value: Value) -> Self {
        Self {
            event: "slot".to_string(),
            name: name.into(),
            value,
        }
    }
}

/// A message sent back to the user.
///
/// Known message fields are typed; template fields the engine does not
/// interpret (quick replies, attachments, channel payloads) ride in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotUtterance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BotUtterance {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn custom(payload: Value) -> Self {
        Self {
            custom: Some(payload),
            ..Self::default()
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Value>) -> Self {
        self.buttons = buttons;
        self
    }

    /// Build an utterance from a domain response template.
    ///
    /// Non-object templates are rendered as plain text.
    pub fn from_template(template: &Value) -> Self {
        match template {
            Value::Object(_) => serde_json::from_value(template.clone())
                .unwrap_or_else(|_| Self::custom(template.clone())),
            Value::String(s) => Self::text(s.clone()),
            other => Self::text(other.to_string()),
        }
    }
}

// =============================================================================
// Audit log
// =============================================================================

/// Outcome of one action invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionStatus {
    Success,
    Failure,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Success => write!(f, "SUCCESS"),
            ActionStatus::Failure => write!(f, "FAILURE"),
        }
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(ActionStatus::Success),
            "FAILURE" => Ok(ActionStatus::Failure),
            _ => Err(format!("Unknown action status: {}", s)),
        }
    }
}

/// Append-only audit record, one per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionServerLog {
    #[serde(rename = "type")]
    pub action_type: String,
    pub intent: Option<String>,
    pub action: String,
    pub sender_id: String,
    pub bot: String,
    pub user_msg: Option<String>,
    pub bot_response: Option<Value>,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status_code: Option<u16>,
    pub time_elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_info: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
