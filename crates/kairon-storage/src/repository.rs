//! Repository implementations for SQLite-backed persistence.
//!
//! Provides ActionConfigRepository (with a TTL read cache), BotSettingsRepository,
//! ActionLogRepository and ScheduleRepository on top of the Database struct.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use kairon_core::error::KaironError;
use kairon_core::types::ActionServerLog;

use crate::db::Database;

// =============================================================================
// Records
// =============================================================================

/// A stored action definition. `config` is the type-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfigRecord {
    pub bot: String,
    pub name: String,
    pub action_type: String,
    pub config: Value,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Per-bot feature switches read by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    pub enable_gpt_llm_faq: bool,
    pub rephrase_response: bool,
    /// Overrides `timeouts.script_secs`, capped by `sandbox.max_timeout_secs`.
    pub script_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Done,
    Failed,
}

impl JobStatus {
    fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self, KaironError> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(KaironError::Storage(format!("Unknown job status: {}", other))),
        }
    }
}

/// An action invocation deferred to `run_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub bot: String,
    pub sender_id: String,
    pub action_name: String,
    pub run_at: DateTime<Utc>,
    pub data: Value,
    pub status: JobStatus,
}

/// A pending asynchronous callback, addressed by `token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackRecord {
    pub token: String,
    pub bot: String,
    pub sender_id: String,
    pub callback_name: String,
    pub url: String,
    pub metadata: Value,
}

fn storage_err(e: impl std::fmt::Display) -> KaironError {
    KaironError::Storage(e.to_string())
}

fn parse_json(text: &str) -> Result<Value, KaironError> {
    serde_json::from_str(text).map_err(|e| KaironError::Storage(format!("Corrupt JSON column: {}", e)))
}

// =============================================================================
// Action configs
// =============================================================================

struct CachedConfig {
    loaded_at: Instant,
    record: Option<ActionConfigRecord>,
}

/// Repository for action definitions keyed by `(bot, name)`.
///
/// Reads go through a TTL cache; every write through this repository
/// invalidates the affected entry. A zero TTL disables caching.
pub struct ActionConfigRepository {
    db: Arc<Database>,
    ttl: Duration,
    cache: Mutex<HashMap<(String, String), CachedConfig>>,
}

impl ActionConfigRepository {
    pub fn new(db: Arc<Database>, ttl: Duration) -> Self {
        Self {
            db,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or replace an action definition and mark it active.
    pub fn save(&self, record: &ActionConfigRecord) -> Result<(), KaironError> {
        let config = serde_json::to_string(&record.config)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO action_configs (bot, name, action_type, config, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, strftime('%s', 'now'))
                 ON CONFLICT (bot, name) DO UPDATE SET
                    action_type = excluded.action_type,
                    config = excluded.config,
                    status = excluded.status,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    record.bot,
                    record.name,
                    record.action_type,
                    config,
                    if record.active { "active" } else { "inactive" },
                ],
            )
            .map_err(|e| KaironError::Storage(format!("Failed to save action config: {}", e)))?;
            Ok(())
        })?;
        self.invalidate(&record.bot, &record.name);
        debug!(bot = %record.bot, action = %record.name, "Action config saved");
        Ok(())
    }

    /// Mark an action inactive. Returns false when it did not exist.
    pub fn deactivate(&self, bot: &str, name: &str) -> Result<bool, KaironError> {
        let affected = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE action_configs SET status = 'inactive', updated_at = strftime('%s', 'now')
                 WHERE bot = ?1 AND name = ?2",
                rusqlite::params![bot, name],
            )
            .map_err(|e| KaironError::Storage(format!("Failed to deactivate action: {}", e)))
        })?;
        self.invalidate(bot, name);
        Ok(affected > 0)
    }

    /// Find the active definition for `(bot, name)`.
    pub fn lookup(&self, bot: &str, name: &str) -> Result<Option<ActionConfigRecord>, KaironError> {
        let key = (bot.to_string(), name.to_string());
        if !self.ttl.is_zero() {
            let cache = self.cache.lock().map_err(storage_err)?;
            if let Some(entry) = cache.get(&key) {
                if entry.loaded_at.elapsed() < self.ttl {
                    return Ok(entry.record.clone());
                }
            }
        }

        let record = self.load(bot, name)?;

        if !self.ttl.is_zero() {
            let mut cache = self.cache.lock().map_err(storage_err)?;
            cache.insert(
                key,
                CachedConfig {
                    loaded_at: Instant::now(),
                    record: record.clone(),
                },
            );
        }
        Ok(record)
    }

    fn load(&self, bot: &str, name: &str) -> Result<Option<ActionConfigRecord>, KaironError> {
        let row: Option<(String, String)> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT action_type, config FROM action_configs
                 WHERE bot = ?1 AND name = ?2 AND status = 'active'",
                rusqlite::params![bot, name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(storage_err)
        })?;

        match row {
            Some((action_type, config)) => Ok(Some(ActionConfigRecord {
                bot: bot.to_string(),
                name: name.to_string(),
                action_type,
                config: parse_json(&config)?,
                active: true,
            })),
            None => Ok(None),
        }
    }

    /// All active definitions for a bot, ordered by name.
    pub fn list(&self, bot: &str) -> Result<Vec<ActionConfigRecord>, KaironError> {
        let rows: Vec<(String, String, String)> = self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT name, action_type, config FROM action_configs
                     WHERE bot = ?1 AND status = 'active' ORDER BY name",
                )
                .map_err(storage_err)?;
            let rows = stmt
                .query_map(rusqlite::params![bot], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .map_err(storage_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })?;

        rows.into_iter()
            .map(|(name, action_type, config)| {
                Ok(ActionConfigRecord {
                    bot: bot.to_string(),
                    name,
                    action_type,
                    config: parse_json(&config)?,
                    active: true,
                })
            })
            .collect()
    }

    /// Drop the cached entry for `(bot, name)`.
    pub fn invalidate(&self, bot: &str, name: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(&(bot.to_string(), name.to_string()));
        }
    }
}

// =============================================================================
// Bot settings
// =============================================================================

/// Repository for per-bot settings. Missing rows read as defaults.
pub struct BotSettingsRepository {
    db: Arc<Database>,
}

impl BotSettingsRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, bot: &str) -> Result<BotSettings, KaironError> {
        let row: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT settings FROM bot_settings WHERE bot = ?1",
                rusqlite::params![bot],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)
        })?;

        match row {
            Some(text) => serde_json::from_str(&text)
                .map_err(|e| KaironError::Storage(format!("Corrupt settings for {}: {}", bot, e))),
            None => Ok(BotSettings::default()),
        }
    }

    pub fn save(&self, bot: &str, settings: &BotSettings) -> Result<(), KaironError> {
        let text = serde_json::to_string(settings)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO bot_settings (bot, settings, updated_at)
                 VALUES (?1, ?2, strftime('%s', 'now'))
                 ON CONFLICT (bot) DO UPDATE SET
                    settings = excluded.settings,
                    updated_at = excluded.updated_at",
                rusqlite::params![bot, text],
            )
            .map_err(|e| KaironError::Storage(format!("Failed to save bot settings: {}", e)))?;
            Ok(())
        })
    }
}

// =============================================================================
// Audit log
// =============================================================================

/// Append-only store for per-invocation audit records.
pub struct ActionLogRepository {
    db: Arc<Database>,
}

impl ActionLogRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one record. Returns the row id.
    pub fn append(&self, log: &ActionServerLog) -> Result<i64, KaironError> {
        let record = serde_json::to_string(log)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO action_server_logs (bot, action, action_type, sender_id, status, record, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    log.bot,
                    log.action,
                    log.action_type,
                    log.sender_id,
                    log.status.to_string(),
                    record,
                    log.timestamp.timestamp_millis(),
                ],
            )
            .map_err(|e| KaironError::Storage(format!("Failed to append action log: {}", e)))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Most recent records for a bot, newest first.
    pub fn recent(&self, bot: &str, limit: u64) -> Result<Vec<ActionServerLog>, KaironError> {
        self.query(
            "SELECT record FROM action_server_logs WHERE bot = ?1
             ORDER BY timestamp DESC, id DESC LIMIT ?2",
            rusqlite::params![bot, limit],
        )
    }

    /// Most recent records for one conversation, newest first.
    pub fn for_sender(
        &self,
        bot: &str,
        sender_id: &str,
        limit: u64,
    ) -> Result<Vec<ActionServerLog>, KaironError> {
        self.query(
            "SELECT record FROM action_server_logs WHERE bot = ?1 AND sender_id = ?2
             ORDER BY timestamp DESC, id DESC LIMIT ?3",
            rusqlite::params![bot, sender_id, limit],
        )
    }

    fn query(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ActionServerLog>, KaironError> {
        let rows: Vec<String> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(params, |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })?;
        rows.iter()
            .map(|text| {
                serde_json::from_str(text)
                    .map_err(|e| KaironError::Storage(format!("Corrupt action log: {}", e)))
            })
            .collect()
    }

    pub fn count(&self, bot: &str) -> Result<u64, KaironError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM action_server_logs WHERE bot = ?1",
                    rusqlite::params![bot],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            Ok(count as u64)
        })
    }
}

// =============================================================================
// Schedules and callbacks
// =============================================================================

/// Store for deferred jobs and pending callbacks.
pub struct ScheduleRepository {
    db: Arc<Database>,
}

impl ScheduleRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn save_job(&self, job: &ScheduledJob) -> Result<(), KaironError> {
        let data = serde_json::to_string(&job.data)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO scheduled_jobs (id, bot, sender_id, action_name, run_at, data, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    job.id.to_string(),
                    job.bot,
                    job.sender_id,
                    job.action_name,
                    job.run_at.timestamp(),
                    data,
                    job.status.as_str(),
                ],
            )
            .map_err(|e| KaironError::Storage(format!("Failed to save scheduled job: {}", e)))?;
            Ok(())
        })
    }

    pub fn find_job(&self, id: Uuid) -> Result<Option<ScheduledJob>, KaironError> {
        let rows = self.query_jobs(
            "SELECT id, bot, sender_id, action_name, run_at, data, status
             FROM scheduled_jobs WHERE id = ?1",
            rusqlite::params![id.to_string()],
        )?;
        Ok(rows.into_iter().next())
    }

    /// Pending jobs whose `run_at` is at or before `now`, oldest first.
    pub fn due_jobs(&self, now: DateTime<Utc>, limit: u64) -> Result<Vec<ScheduledJob>, KaironError> {
        self.query_jobs(
            "SELECT id, bot, sender_id, action_name, run_at, data, status
             FROM scheduled_jobs WHERE status = 'pending' AND run_at <= ?1
             ORDER BY run_at ASC LIMIT ?2",
            rusqlite::params![now.timestamp(), limit],
        )
    }

    pub fn list_jobs(&self, bot: &str) -> Result<Vec<ScheduledJob>, KaironError> {
        self.query_jobs(
            "SELECT id, bot, sender_id, action_name, run_at, data, status
             FROM scheduled_jobs WHERE bot = ?1 ORDER BY run_at ASC",
            rusqlite::params![bot],
        )
    }

    pub fn set_job_status(&self, id: Uuid, status: JobStatus) -> Result<bool, KaironError> {
        self.db.with_conn(|conn| {
            let affected = conn
                .execute(
                    "UPDATE scheduled_jobs SET status = ?1 WHERE id = ?2",
                    rusqlite::params![status.as_str(), id.to_string()],
                )
                .map_err(|e| KaironError::Storage(format!("Failed to update job: {}", e)))?;
            Ok(affected > 0)
        })
    }

    fn query_jobs(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ScheduledJob>, KaironError> {
        type JobRow = (String, String, String, String, i64, String, String);
        let rows: Vec<JobRow> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(storage_err)?;
            let rows = stmt
                .query_map(params, |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                })
                .map_err(storage_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
        })?;

        rows.into_iter()
            .map(|(id, bot, sender_id, action_name, run_at, data, status)| {
                Ok(ScheduledJob {
                    id: Uuid::parse_str(&id)
                        .map_err(|e| KaironError::Storage(format!("Invalid UUID: {}", e)))?,
                    bot,
                    sender_id,
                    action_name,
                    run_at: Utc
                        .timestamp_opt(run_at, 0)
                        .single()
                        .ok_or_else(|| KaironError::Storage("Invalid run_at".to_string()))?,
                    data: parse_json(&data)?,
                    status: JobStatus::parse(&status)?,
                })
            })
            .collect()
    }

    pub fn save_callback(&self, record: &CallbackRecord) -> Result<(), KaironError> {
        let metadata = serde_json::to_string(&record.metadata)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO callback_requests (token, bot, sender_id, callback_name, url, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    record.token,
                    record.bot,
                    record.sender_id,
                    record.callback_name,
                    record.url,
                    metadata,
                ],
            )
            .map_err(|e| KaironError::Storage(format!("Failed to save callback: {}", e)))?;
            Ok(())
        })
    }

    pub fn find_callback(&self, token: &str) -> Result<Option<CallbackRecord>, KaironError> {
        type CallbackRow = (String, String, String, String, String);
        let row: Option<CallbackRow> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT bot, sender_id, callback_name, url, metadata
                 FROM callback_requests WHERE token = ?1",
                rusqlite::params![token],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()
            .map_err(storage_err)
        })?;

        match row {
            Some((bot, sender_id, callback_name, url, metadata)) => Ok(Some(CallbackRecord {
                token: token.to_string(),
                bot,
                sender_id,
                callback_name,
                url,
                metadata: parse_json(&metadata)?,
            })),
            None => Ok(None),
        }
    }
}
