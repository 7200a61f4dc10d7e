//! Tracker context builder.
//!
//! Projects a tracker snapshot into the flat, read-only record that
//! parameter resolution, templating and scripts work against.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use kairon_core::types::TrackerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Bot,
}

/// One turn of the conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

/// Immutable per-request view of the conversation.
///
/// Secrets are not part of the context; they are fetched on demand by the
/// parameter resolver and the script locals builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    bot: String,
    sender_id: String,
    user_message: Option<String>,
    intent: Option<String>,
    slots: BTreeMap<String, Value>,
    chat_log: Vec<ChatTurn>,
    latest_action_name: Option<String>,
    latest_input_channel: Option<String>,
}

impl Context {
    /// Build the context for `bot` from a tracker snapshot.
    ///
    /// The chat log walks the whole event stream and is only built when
    /// `include_chat_log` is set.
    pub fn build(tracker: &TrackerSnapshot, bot: &str, include_chat_log: bool) -> Self {
        let chat_log = if include_chat_log {
            tracker
                .events
                .iter()
                .filter_map(|event| {
                    let role = match event.event.as_str() {
                        "user" => ChatRole::User,
                        "bot" => ChatRole::Bot,
                        _ => return None,
                    };
                    let text = event.text.as_ref()?;
                    Some(ChatTurn {
                        role,
                        text: text.clone(),
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            bot: bot.to_string(),
            sender_id: tracker.sender_id.clone(),
            user_message: tracker.latest_message.text.clone(),
            intent: tracker.latest_message.intent_name().map(str::to_string),
            slots: tracker.slots.clone(),
            chat_log,
            latest_action_name: tracker.latest_action_name.clone(),
            latest_input_channel: tracker.latest_input_channel.clone(),
        }
    }

    pub fn bot(&self) -> &str {
        &self.bot
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn user_message(&self) -> Option<&str> {
        self.user_message.as_deref()
    }

    pub fn intent(&self) -> Option<&str> {
        self.intent.as_deref()
    }

    pub fn slots(&self) -> &BTreeMap<String, Value> {
        &self.slots
    }

    /// Slot value; explicit nulls read as missing.
    pub fn slot(&self, name: &str) -> Option<&Value> {
        self.slots.get(name).filter(|v| !v.is_null())
    }

    pub fn chat_log(&self) -> &[ChatTurn] {
        &self.chat_log
    }

    /// The most recent `turns` user/bot exchanges, oldest first.
    pub fn recent_turns(&self, turns: usize) -> &[ChatTurn] {
        let start = self.chat_log.len().saturating_sub(turns.saturating_mul(2));
        &self.chat_log[start..]
    }

    pub fn latest_action_name(&self) -> Option<&str> {
        self.latest_action_name.as_deref()
    }

    pub fn latest_input_channel(&self) -> Option<&str> {
        self.latest_input_channel.as_deref()
    }

    /// Context fields as JSON, keyed the way scripts see them.
    pub fn to_locals(&self) -> Map<String, Value> {
        let mut locals = Map::new();
        locals.insert("bot".into(), json!(self.bot));
        locals.insert("sender_id".into(), json!(self.sender_id));
        locals.insert("user_message".into(), json!(self.user_message));
        locals.insert("intent".into(), json!(self.intent));
        locals.insert("slots".into(), json!(self.slots));
        locals.insert("chat_log".into(), json!(self.chat_log));
        locals.insert("latest_action_name".into(), json!(self.latest_action_name));
        locals.insert(
            "latest_input_channel".into(),
            json!(self.latest_input_channel),
        );
        locals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kairon_core::types::TrackerEvent;

    fn event(kind: &str, text: Option<&str>) -> TrackerEvent {
        TrackerEvent {
            event: kind.to_string(),
            text: text.map(str::to_string),
            ..TrackerEvent::default()
        }
    }

    fn make_tracker() -> TrackerSnapshot {
        serde_json::from_value(json!({
            "sender_id": "u1",
            "slots": {"bot": "b1", "city": "Paris", "empty": null},
            "latest_message": {"text": "weather?", "intent": {"name": "ask_weather", "confidence": 0.97}},
            "latest_input_channel": "telegram",
            "latest_action_name": "action_listen"
        }))
        .unwrap()
    }

    #[test]
    fn test_build_reads_tracker_fields() {
        let ctx = Context::build(&make_tracker(), "b1", false);
        assert_eq!(ctx.bot(), "b1");
        assert_eq!(ctx.sender_id(), "u1");
        assert_eq!(ctx.user_message(), Some("weather?"));
        assert_eq!(ctx.intent(), Some("ask_weather"));
        assert_eq!(ctx.slot("city"), Some(&json!("Paris")));
        assert!(ctx.slot("empty").is_none());
        assert_eq!(ctx.latest_input_channel(), Some("telegram"));
        assert_eq!(ctx.latest_action_name(), Some("action_listen"));
    }

    #[test]
    fn test_chat_log_only_when_requested() {
        let mut tracker = make_tracker();
        tracker.events = vec![
            event("action", None),
            event("user", Some("hi")),
            event("bot", Some("hello")),
            event("slot", Some("ignored")),
            event("user", Some("weather?")),
            event("bot", None),
        ];

        assert!(Context::build(&tracker, "b1", false).chat_log().is_empty());

        let ctx = Context::build(&tracker, "b1", true);
        let texts: Vec<_> = ctx.chat_log().iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["hi", "hello", "weather?"]);
        assert_eq!(ctx.chat_log()[1].role, ChatRole::Bot);
    }

    #[test]
    fn test_recent_turns() {
        let mut tracker = make_tracker();
        tracker.events = (0..6)
            .map(|i| event(if i % 2 == 0 { "user" } else { "bot" }, Some(&i.to_string())))
            .collect();
        let ctx = Context::build(&tracker, "b1", true);
        let recent: Vec<_> = ctx.recent_turns(1).iter().map(|t| t.text.as_str()).collect();
        assert_eq!(recent, vec!["4", "5"]);
        assert_eq!(ctx.recent_turns(10).len(), 6);
        assert_eq!(ctx.recent_turns(usize::MAX).len(), 6);
    }

    #[test]
    fn test_to_locals_shape() {
        let locals = Context::build(&make_tracker(), "b1", true).to_locals();
        assert_eq!(locals["slots"]["city"], json!("Paris"));
        assert_eq!(locals["intent"], json!("ask_weather"));
        assert_eq!(locals["chat_log"], json!([]));
        assert!(!locals.contains_key("key_vault"));
    }
}
