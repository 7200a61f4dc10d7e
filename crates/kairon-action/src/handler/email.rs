//! Email action handler.
//!
//! Sends the recent conversation transcript (or an authored text) to each
//! configured recipient over SMTP.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::composer::inline;
use crate::context::{ChatRole, Context};
use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};
use crate::mail::{EmailMessage, SmtpSettings};
use crate::params::ParameterResolver;
use crate::types::{ActionType, ParameterSpec};

/// Recipients are either listed inline or resolved from a parameter that
/// yields a list or a comma-separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Recipients {
    List(Vec<String>),
    Parameter(ParameterSpec),
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailActionConfig {
    pub smtp_url: String,
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_userid: Option<ParameterSpec>,
    pub smtp_password: ParameterSpec,
    pub from_email: ParameterSpec,
    pub to_email: Recipients,
    pub subject: String,
    pub response: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub custom_text: Option<ParameterSpec>,
    #[serde(default = "default_transcript_turns")]
    pub transcript_turns: usize,
}

fn default_transcript_turns() -> usize {
    10
}

pub struct EmailActionHandler;

#[async_trait]
impl ActionHandler for EmailActionHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Email
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: EmailActionConfig = ctx.parse_config()?;
        let context = ctx.context(true);
        let resolver = ctx.resolver(&context);

        let smtp = SmtpSettings {
            host: config.smtp_url.clone(),
            port: config.smtp_port,
            username: resolver.resolve_string(config.smtp_userid.as_ref())?,
            password: inline(&resolver.resolve(&config.smtp_password)?),
            tls: config.tls,
            timeout: Duration::from_secs(ctx.services.config.timeouts.smtp_secs),
        };
        let from = inline(&resolver.resolve(&config.from_email)?);
        let recipients = resolve_recipients(&resolver, &config.to_email)?;
        if recipients.is_empty() {
            return Err(ActionError::ParameterResolution(
                "email action has no recipients".to_string(),
            ));
        }
        let body = match resolver.resolve_string(config.custom_text.as_ref())? {
            Some(text) => text,
            None => transcript_html(&context, config.transcript_turns),
        };

        let mut outcome = Ok(());
        for to in &recipients {
            let message = EmailMessage {
                from: from.clone(),
                to: to.clone(),
                subject: config.subject.clone(),
                body: body.clone(),
            };
            outcome = ctx.services.mailer.send(&smtp, &message).await;
            if outcome.is_err() {
                break;
            }
        }

        ctx.log.push_event(
            "email",
            json!({
                "smtp_url": config.smtp_url,
                "smtp_port": config.smtp_port,
                "from": from,
                "to": recipients,
                "subject": config.subject,
                "error": outcome.as_ref().err().map(|e| e.to_string()),
            }),
        );
        outcome?;

        ctx.dispatcher.utter_text(config.response.clone());
        ctx.log.set_bot_response(config.response.clone());
        let mut slots = SlotChanges::new();
        slots.set_response(config.response);
        Ok(slots)
    }
}

fn resolve_recipients(
    resolver: &ParameterResolver<'_>,
    recipients: &Recipients,
) -> Result<Vec<String>, ActionError> {
    let raw: Vec<String> = match recipients {
        Recipients::List(list) => list.clone(),
        Recipients::Parameter(spec) => match resolver.resolve(spec)? {
            Value::Array(items) => items.iter().map(inline).collect(),
            other => inline(&other).split(',').map(str::to_string).collect(),
        },
    };
    Ok(raw
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect())
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render the last `turns` exchanges as an HTML transcript.
pub fn transcript_html(context: &Context, turns: usize) -> String {
    let mut html = String::from("<div class=\"transcript\">");
    for turn in context.recent_turns(turns) {
        let speaker = match turn.role {
            ChatRole::User => "User",
            ChatRole::Bot => "Bot",
        };
        html.push_str(&format!(
            "<p><b>{}:</b> {}</p>",
            speaker,
            escape_html(&turn.text)
        ));
    }
    html.push_str("</div>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use crate::types::DEFAULT_FAILURE_MESSAGE;
    use kairon_core::types::ActionStatus;

    fn config(to: Value) -> Value {
        json!({
            "smtp_url": "smtp.example.com",
            "smtp_port": 587,
            "smtp_userid": {"key": "user", "parameter_type": "value", "value": "bot@example.com"},
            "smtp_password": {"key": "password", "parameter_type": "key_vault", "value": "API_KEY"},
            "from_email": {"key": "from", "parameter_type": "value", "value": "bot@example.com"},
            "to_email": to,
            "subject": "Conversation <u1>",
            "response": "Email sent!",
            "tls": true
        })
    }

    #[tokio::test]
    async fn test_email_sent_per_recipient() {
        let harness = TestHarness::new().await;
        harness.save_action(
            "action_mail",
            "email_action",
            config(json!(["ops@example.com", "sales@example.com"])),
        );
        let reply = harness
            .executor
            .run(&harness.request("action_mail", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.responses[0].text.as_deref(), Some("Email sent!"));

        let sent = harness.mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        let (smtp, message) = &sent[0];
        assert_eq!(smtp.password, "sk-live-123");
        assert_eq!(smtp.port, 587);
        assert_eq!(message.to, "ops@example.com");
        assert!(message.body.contains("<b>User:</b> hello there"));
        assert!(message.body.contains("<b>Bot:</b> Hello! How can I help?"));

        let log = harness.last_log();
        assert!(!serde_json::to_string(&log).unwrap().contains("sk-live-123"));
    }

    #[tokio::test]
    async fn test_recipients_from_comma_separated_slot() {
        let harness = TestHarness::new().await;
        harness.save_action(
            "action_mail",
            "email_action",
            config(json!({"key": "to", "parameter_type": "slot", "value": "emails"})),
        );
        harness
            .executor
            .run(&harness.request(
                "action_mail",
                json!({"emails": "a@example.com, b@example.com,"}),
            ))
            .await
            .unwrap();
        let sent = harness.mailer.sent.lock().unwrap();
        let to: Vec<&str> = sent.iter().map(|(_, m)| m.to.as_str()).collect();
        assert_eq!(to, vec!["a@example.com", "b@example.com"]);
    }

    #[tokio::test]
    async fn test_huge_transcript_turns_sends_whole_log() {
        let harness = TestHarness::new().await;
        let mut action = config(json!(["ops@example.com"]));
        action["transcript_turns"] = json!(u64::MAX);
        harness.save_action("action_mail", "email_action", action);

        let reply = harness
            .executor
            .run(&harness.request("action_mail", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.responses[0].text.as_deref(), Some("Email sent!"));
        let sent = harness.mailer.sent.lock().unwrap();
        assert!(sent[0].1.body.contains("<b>User:</b> hi"));
        assert!(sent[0].1.body.contains("<b>User:</b> hello there"));
    }

    #[tokio::test]
    async fn test_smtp_failure_is_canned() {
        let harness = TestHarness::with_failing_mailer().await;
        harness.save_action("action_mail", "email_action", config(json!(["ops@example.com"])));
        let reply = harness
            .executor
            .run(&harness.request("action_mail", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.responses[0].text.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
        let log = harness.last_log();
        assert_eq!(log.status, ActionStatus::Failure);
        assert_eq!(log.events[0]["type"], json!("email"));
    }

    #[test]
    fn test_transcript_escapes_html() {
        let tracker = serde_json::from_value(json!({
            "sender_id": "u1",
            "events": [{"event": "user", "text": "<script>x</script> & more"}]
        }))
        .unwrap();
        let context = Context::build(&tracker, "b1", true);
        let html = transcript_html(&context, 5);
        assert!(html.contains("&lt;script&gt;x&lt;/script&gt; &amp; more"));
    }
}
