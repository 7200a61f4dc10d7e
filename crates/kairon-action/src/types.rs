//! Core types and value objects for the action engine.
//!
//! Defines action types, parameter specs, response templates and the
//! constants shared by every handler.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Slot carrying the human-readable outcome of the last action.
pub const KAIRON_ACTION_RESPONSE_SLOT: &str = "kairon_action_response";

/// Reply used whenever a handler fails without a more specific message.
pub const DEFAULT_FAILURE_MESSAGE: &str = "I have failed to process your request";

pub const FAQ_DISABLED_MESSAGE: &str = "Faq feature is disabled for the bot! Please contact support.";

/// LLM answer meaning "no grounded answer available".
pub const LLM_UNKNOWN_ANSWER: &str = "I don't know.";

pub const LLM_FALLBACK_MESSAGE: &str = "Sorry I didn't get that. Can you rephrase?";

/// Placeholder written in place of secret values.
pub const REDACTED: &str = "***";

// =============================================================================
// Enums
// =============================================================================

/// Every action type the server can execute, keyed by its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "http_action")]
    Http,
    #[serde(rename = "email_action")]
    Email,
    #[serde(rename = "kairon_bot_response")]
    BotResponse,
    #[serde(rename = "pyscript_action")]
    Script,
    #[serde(rename = "kairon_faq_action")]
    Faq,
    #[serde(rename = "prompt_action")]
    Prompt,
    #[serde(rename = "live_agent_action")]
    LiveAgent,
    #[serde(rename = "slot_set_action")]
    SlotSet,
    #[serde(rename = "form_validation_action")]
    FormValidation,
    #[serde(rename = "google_search_action")]
    GoogleSearch,
    #[serde(rename = "web_search_action")]
    WebSearch,
    #[serde(rename = "zendesk_action")]
    Zendesk,
    #[serde(rename = "pipedrive_leads_action")]
    Pipedrive,
    #[serde(rename = "hubspot_forms_action")]
    Hubspot,
    #[serde(rename = "two_stage_fallback")]
    TwoStageFallback,
    #[serde(rename = "bot_to_bot_action")]
    BotToBot,
    #[serde(rename = "razorpay_action")]
    Razorpay,
    #[serde(rename = "database_action")]
    Database,
    #[serde(rename = "parallel_action")]
    Parallel,
    #[serde(rename = "schedule_action")]
    Schedule,
    #[serde(rename = "callback_action")]
    Callback,
}

impl ActionType {
    pub const ALL: [ActionType; 21] = [
        ActionType::Http,
        ActionType::Email,
        ActionType::BotResponse,
        ActionType::Script,
        ActionType::Faq,
        ActionType::Prompt,
        ActionType::LiveAgent,
        ActionType::SlotSet,
        ActionType::FormValidation,
        ActionType::GoogleSearch,
        ActionType::WebSearch,
        ActionType::Zendesk,
        ActionType::Pipedrive,
        ActionType::Hubspot,
        ActionType::TwoStageFallback,
        ActionType::BotToBot,
        ActionType::Razorpay,
        ActionType::Database,
        ActionType::Parallel,
        ActionType::Schedule,
        ActionType::Callback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Http => "http_action",
            ActionType::Email => "email_action",
            ActionType::BotResponse => "kairon_bot_response",
            ActionType::Script => "pyscript_action",
            ActionType::Faq => "kairon_faq_action",
            ActionType::Prompt => "prompt_action",
            ActionType::LiveAgent => "live_agent_action",
            ActionType::SlotSet => "slot_set_action",
            ActionType::FormValidation => "form_validation_action",
            ActionType::GoogleSearch => "google_search_action",
            ActionType::WebSearch => "web_search_action",
            ActionType::Zendesk => "zendesk_action",
            ActionType::Pipedrive => "pipedrive_leads_action",
            ActionType::Hubspot => "hubspot_forms_action",
            ActionType::TwoStageFallback => "two_stage_fallback",
            ActionType::BotToBot => "bot_to_bot_action",
            ActionType::Razorpay => "razorpay_action",
            ActionType::Database => "database_action",
            ActionType::Parallel => "parallel_action",
            ActionType::Schedule => "schedule_action",
            ActionType::Callback => "callback_action",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown action type: {}", s))
    }
}

/// Where a parameter value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    Value,
    Slot,
    SenderId,
    UserMessage,
    Intent,
    ChatLog,
    KeyVault,
    LatestInputChannel,
    LatestActionName,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationType {
    #[default]
    Expression,
    Script,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchType {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Put,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    /// GET and DELETE carry parameters in the query string.
    pub fn uses_query(&self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

/// Request body encoding for HTTP actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Json,
    Data,
}

// =============================================================================
// Value objects
// =============================================================================

/// An authored `(key, source, value)` parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub key: String,
    pub parameter_type: ParameterType,
    #[serde(default)]
    pub value: Option<String>,
}

impl ParameterSpec {
    pub fn value(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            parameter_type: ParameterType::Value,
            value: Some(value.into()),
        }
    }

    pub fn slot(key: impl Into<String>, slot: Option<&str>) -> Self {
        Self {
            key: key.into(),
            parameter_type: ParameterType::Slot,
            value: slot.map(str::to_string),
        }
    }

    pub fn key_vault(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            parameter_type: ParameterType::KeyVault,
            value: Some(secret.into()),
        }
    }
}

fn default_true() -> bool {
    true
}

/// How to turn an upstream result into a bot message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTemplate {
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_true")]
    pub dispatch: bool,
    #[serde(default)]
    pub evaluation_type: EvaluationType,
    #[serde(default)]
    pub dispatch_type: DispatchType,
}

impl Default for ResponseTemplate {
    fn default() -> Self {
        Self {
            value: String::new(),
            dispatch: true,
            evaluation_type: EvaluationType::Expression,
            dispatch_type: DispatchType::Text,
        }
    }
}

impl ResponseTemplate {
    pub fn expression(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn script(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            evaluation_type: EvaluationType::Script,
            ..Self::default()
        }
    }
}

/// Fill slot `name` from a response path, a `${...}` template or a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub name: String,
    #[serde(default, alias = "from")]
    pub value: String,
    #[serde(default)]
    pub evaluation_type: EvaluationType,
}

impl SlotAssignment {
    pub fn path(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: path.into(),
            evaluation_type: EvaluationType::Expression,
        }
    }
}
