//! Schedule action: defer another action to a later time.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use kairon_storage::{JobStatus, ScheduledJob};

use crate::composer::inline;
use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{ActionContext, ActionHandler};
use crate::types::{ActionType, ParameterSpec, ParameterType};

const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"];

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleActionConfig {
    /// RFC 3339, or a naive date-time taken as UTC.
    pub schedule_time: ParameterSpec,
    /// Action to run at `schedule_time`.
    pub schedule_action: String,
    #[serde(default)]
    pub params_list: Vec<ParameterSpec>,
    #[serde(default)]
    pub response_text: Option<String>,
    #[serde(default = "default_dispatch")]
    pub dispatch_bot_response: bool,
}

fn default_dispatch() -> bool {
    true
}

pub fn parse_schedule_time(text: &str) -> Result<DateTime<Utc>, ActionError> {
    let text = text.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Ok(time.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            ActionError::ParameterResolution(format!("invalid schedule time '{}'", text))
        })
}

pub struct ScheduleActionHandler;

#[async_trait]
impl ActionHandler for ScheduleActionHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Schedule
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: ScheduleActionConfig = ctx.parse_config()?;
        let context = ctx.context(false);
        let resolver = ctx.resolver(&context);

        let run_at = parse_schedule_time(&inline(&resolver.resolve(&config.schedule_time)?))?;
        if run_at <= Utc::now() {
            return Err(ActionError::ParameterResolution(format!(
                "schedule time {} is in the past",
                run_at.to_rfc3339()
            )));
        }

        // Secrets are looked up again when the job runs, never stored.
        let (secrets, plain): (Vec<_>, Vec<_>) = config
            .params_list
            .iter()
            .cloned()
            .partition(|p| p.parameter_type == ParameterType::KeyVault);
        let params = resolver.prepare_request(&plain)?;
        let secret_refs: Vec<Value> = secrets
            .iter()
            .map(|s| json!({"key": s.key, "value": s.value}))
            .collect();

        let job = ScheduledJob {
            id: Uuid::new_v4(),
            bot: ctx.bot.to_string(),
            sender_id: context.sender_id().to_string(),
            action_name: config.schedule_action.clone(),
            run_at,
            data: json!({"params": params.values, "key_vault": secret_refs}),
            status: JobStatus::Pending,
        };
        ctx.services.schedules.save_job(&job)?;
        ctx.log.push_event(
            "schedule",
            json!({
                "job_id": job.id.to_string(),
                "schedule_action": job.action_name,
                "run_at": run_at.to_rfc3339(),
                "params": params.redacted,
            }),
        );

        let mut slots = SlotChanges::new();
        match config.response_text {
            Some(text) => {
                if config.dispatch_bot_response {
                    ctx.dispatcher.utter_text(text.clone());
                }
                ctx.log.set_bot_response(text.clone());
                slots.set_response(text);
            }
            None => slots.set_response(Value::Null),
        }
        Ok(slots)
    }
}
