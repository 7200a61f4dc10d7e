//! kairon-storage: SQLite-backed persistence for the action server.
//!
//! Holds action configs, bot settings, the encrypted key vault, the
//! append-only audit log, and schedule/callback records.

pub mod db;
pub mod migrations;
pub mod repository;
pub mod vault;

pub use db::Database;
pub use repository::{
    ActionConfigRecord, ActionConfigRepository, ActionLogRepository, BotSettings,
    BotSettingsRepository, CallbackRecord, JobStatus, ScheduleRepository, ScheduledJob,
};
pub use vault::KeyVault;
