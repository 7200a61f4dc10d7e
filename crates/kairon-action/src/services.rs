//! Shared collaborators handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use kairon_core::error::KaironError;
use kairon_core::KaironConfig;
use kairon_storage::{
    ActionConfigRepository, ActionLogRepository, BotSettingsRepository, Database, KeyVault,
    ScheduleRepository,
};

use crate::dispatcher::ActionLogger;
use crate::llm::LlmClient;
use crate::mail::{MailTransport, SmtpMailer};
use crate::sandbox::Sandbox;

/// Process-wide state used by the executor and its handlers.
///
/// Everything here is either immutable or internally synchronized, so a
/// single instance is shared across requests behind an `Arc`.
pub struct Services {
    pub config: KaironConfig,
    pub http: Client,
    pub sandbox: Sandbox,
    pub action_configs: ActionConfigRepository,
    pub bot_settings: BotSettingsRepository,
    pub schedules: ScheduleRepository,
    pub vault: Option<KeyVault>,
    pub logger: ActionLogger,
    pub mailer: Arc<dyn MailTransport>,
    pub llm: LlmClient,
}

impl Services {
    pub fn new(
        config: KaironConfig,
        db: Arc<Database>,
        vault: Option<KeyVault>,
    ) -> Result<Self, KaironError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeouts.http_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| KaironError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let llm = LlmClient::new(
            http.clone(),
            config.llm.clone(),
            Duration::from_secs(config.timeouts.llm_secs),
        );

        Ok(Self {
            sandbox: Sandbox::new(&config.sandbox),
            action_configs: ActionConfigRepository::new(
                Arc::clone(&db),
                Duration::from_secs(config.storage.config_cache_ttl_secs),
            ),
            bot_settings: BotSettingsRepository::new(Arc::clone(&db)),
            schedules: ScheduleRepository::new(Arc::clone(&db)),
            logger: ActionLogger::new(Arc::new(ActionLogRepository::new(db))),
            mailer: Arc::new(SmtpMailer),
            http,
            llm,
            vault,
            config,
        })
    }

    /// Replace the mail transport.
    pub fn with_mailer(mut self, mailer: Arc<dyn MailTransport>) -> Self {
        self.mailer = mailer;
        self
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("sandbox", &self.sandbox)
            .field("vault", &self.vault.is_some())
            .field("llm", &self.llm)
            .finish()
    }
}
