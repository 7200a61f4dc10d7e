//! Shared fixtures for handler and executor tests.

use std::io::Write;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing_subscriber::fmt::MakeWriter;
use wiremock::MockServer;

use kairon_core::types::{ActionRequest, ActionServerLog};
use kairon_core::KaironConfig;
use kairon_storage::{vault, ActionConfigRecord, BotSettings, Database, KeyVault};

use crate::executor::ActionExecutor;
use crate::mail::testing::RecordingMailer;
use crate::services::Services;

pub const BOT: &str = "b1";
pub const SENDER: &str = "u1";

/// An executor over an in-memory database, with every upstream pointed at
/// one mock server.
pub struct TestHarness {
    pub server: MockServer,
    pub executor: ActionExecutor,
    pub mailer: Arc<RecordingMailer>,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut KaironConfig)) -> Self {
        Self::build(tweak, RecordingMailer::default()).await
    }

    pub async fn with_failing_mailer() -> Self {
        let mailer = RecordingMailer {
            fail: true,
            ..RecordingMailer::default()
        };
        Self::build(|_| {}, mailer).await
    }

    async fn build(tweak: impl FnOnce(&mut KaironConfig), mailer: RecordingMailer) -> Self {
        let server = MockServer::start().await;
        let uri = server.uri();

        let mut config = KaironConfig::default();
        config.storage.config_cache_ttl_secs = 0;
        config.llm.base_url = Some(uri.clone());
        config.llm.api_key = Some("llm-key".to_string());
        config.integrations.live_agent_url = Some(uri.clone());
        config.integrations.google_search_url = format!("{}/customsearch/v1", uri);
        config.integrations.web_search_url = Some(format!("{}/websearch", uri));
        config.integrations.zendesk_url_template = uri.clone();
        config.integrations.pipedrive_url_template = uri.clone();
        config.integrations.hubspot_url = uri.clone();
        config.integrations.razorpay_url = uri.clone();
        config.integrations.vector_db_url = Some(uri.clone());
        config.integrations.callback_base_url = "https://cb.example.com".to_string();
        tweak(&mut config);

        let db = Arc::new(Database::in_memory().unwrap());
        let vault = KeyVault::new(Arc::clone(&db), vault::generate_key().unwrap());
        vault.put(BOT, "API_KEY", "sk-live-123").unwrap();

        let mailer = Arc::new(mailer);
        let services = Services::new(config, db, Some(vault))
            .unwrap()
            .with_mailer(mailer.clone());
        let executor = ActionExecutor::with_defaults(Arc::new(services));

        Self {
            server,
            executor,
            mailer,
        }
    }

    pub fn save_action(&self, name: &str, action_type: &str, config: Value) {
        self.executor
            .services()
            .action_configs
            .save(&ActionConfigRecord {
                bot: BOT.to_string(),
                name: name.to_string(),
                action_type: action_type.to_string(),
                config,
                active: true,
            })
            .unwrap();
    }

    pub fn save_settings(&self, settings: BotSettings) {
        self.executor
            .services()
            .bot_settings
            .save(BOT, &settings)
            .unwrap();
    }

    pub fn enable_llm(&self) {
        self.save_settings(BotSettings {
            enable_gpt_llm_faq: true,
            ..BotSettings::default()
        });
    }

    /// A request for `action` with `slots` merged over the bot slot.
    pub fn request(&self, action: &str, slots: Value) -> ActionRequest {
        let mut all_slots = json!({"bot": BOT});
        if let (Some(target), Value::Object(extra)) = (all_slots.as_object_mut(), slots) {
            target.extend(extra);
        }
        serde_json::from_value(json!({
            "next_action": action,
            "sender_id": SENDER,
            "tracker": {
                "sender_id": SENDER,
                "slots": all_slots,
                "latest_message": {
                    "text": "hello there",
                    "intent": {"name": "greet", "confidence": 0.42},
                    "intent_ranking": [
                        {"name": "greet", "confidence": 0.42},
                        {"name": "ask_price", "confidence": 0.31},
                        {"name": "nlu_fallback", "confidence": 0.2},
                        {"name": "goodbye", "confidence": 0.07}
                    ]
                },
                "events": [
                    {"event": "action", "name": "action_listen"},
                    {"event": "user", "text": "hi"},
                    {"event": "bot", "text": "Hello! How can I help?"},
                    {"event": "user", "text": "hello there"}
                ],
                "latest_input_channel": "web",
                "latest_action_name": "action_listen"
            },
            "domain": {
                "responses": {
                    "utter_greet": [{"text": "Hello!"}],
                    "utter_options": [{"text": "Pick one", "buttons": [{"title": "A", "payload": "/a"}]}]
                }
            },
            "version": "3.6.21"
        }))
        .unwrap()
    }

    /// Audit records for the test bot, oldest first.
    pub fn logs(&self) -> Vec<ActionServerLog> {
        let mut logs = self
            .executor
            .services()
            .logger
            .repository()
            .recent(BOT, 100)
            .unwrap();
        logs.reverse();
        logs
    }

    pub fn last_log(&self) -> ActionServerLog {
        self.logs().pop().unwrap()
    }
}

/// In-memory sink for `tracing` output.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    /// Install a DEBUG-level subscriber writing here for the current thread.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
