//! Background runner for actions deferred by `schedule_action`.
//!
//! Polls the schedule table, runs every due job through the executor and
//! records whether it succeeded.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use kairon_core::types::{ActionRequest, Domain, TrackerSnapshot};
use kairon_storage::{JobStatus, ScheduledJob};

use crate::error::ActionError;
use crate::executor::ActionExecutor;

/// Jobs claimed per poll.
const BATCH_SIZE: u64 = 50;

pub struct Scheduler {
    executor: Arc<ActionExecutor>,
    poll_interval: Duration,
    shutdown: Arc<Notify>,
}

impl Scheduler {
    pub fn new(executor: Arc<ActionExecutor>, poll_interval: Duration) -> Self {
        Self {
            executor,
            poll_interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Poll until `shutdown` is called.
    pub async fn run(&self) {
        info!(interval_secs = self.poll_interval.as_secs(), "Scheduler started");
        loop {
            match self.run_due(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => debug!(jobs = n, "Ran scheduled jobs"),
                Err(e) => warn!(error = %e, "Scheduler poll failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.shutdown.notified() => {
                    info!("Scheduler stopped");
                    return;
                }
            }
        }
    }

    /// Run every job due at `now`. Returns how many were attempted.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<usize, ActionError> {
        let schedules = &self.executor.services().schedules;
        let jobs = schedules.due_jobs(now, BATCH_SIZE)?;
        for job in &jobs {
            let status = match self.executor.run(&job_request(job)).await {
                Ok(_) => JobStatus::Done,
                Err(e) => {
                    warn!(bot = %job.bot, job = %job.id, error = %e, "Scheduled job rejected");
                    JobStatus::Failed
                }
            };
            schedules.set_job_status(job.id, status)?;
        }
        Ok(jobs.len())
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// Synthesize the webhook request a due job stands for. Stored params
/// become slots next to `bot`.
fn job_request(job: &ScheduledJob) -> ActionRequest {
    let mut slots: BTreeMap<String, Value> = job.data["params"]
        .as_object()
        .map(|params| params.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    slots.insert("bot".to_string(), json!(job.bot));

    ActionRequest {
        next_action: job.action_name.clone(),
        sender_id: job.sender_id.clone(),
        tracker: TrackerSnapshot {
            sender_id: job.sender_id.clone(),
            slots,
            ..TrackerSnapshot::default()
        },
        domain: Domain::default(),
        version: None,
        trigger_info: Some(json!({"scheduled_job": job.id.to_string()})),
    }
}
