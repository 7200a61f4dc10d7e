//! Bulk import of bot data from a JSON seed file.
//!
//! ```json
//! {
//!   "actions":  [{"bot": "b1", "name": "action_x", "action_type": "http_action", "config": {...}}],
//!   "settings": {"b1": {"enable_gpt_llm_faq": true}},
//!   "secrets":  [{"bot": "b1", "key": "API_KEY", "value": "..."}]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use kairon_action::Services;
use kairon_core::{KaironError, Result};
use kairon_storage::{ActionConfigRecord, BotSettings};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub actions: Vec<ActionConfigRecord>,
    pub settings: BTreeMap<String, BotSettings>,
    pub secrets: Vec<SecretEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SecretEntry {
    pub bot: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Default, PartialEq)]
pub struct SeedSummary {
    pub actions: usize,
    pub settings: usize,
    pub secrets: usize,
}

pub fn load_file(path: &Path, services: &Services) -> Result<SeedSummary> {
    let content = std::fs::read_to_string(path)?;
    let seed: SeedFile = serde_json::from_str(&content)?;
    let summary = apply(&seed, services)?;
    info!(
        path = %path.display(),
        actions = summary.actions,
        settings = summary.settings,
        secrets = summary.secrets,
        "Seed file imported"
    );
    Ok(summary)
}

/// Write everything in `seed`. Secrets need a configured vault.
pub fn apply(seed: &SeedFile, services: &Services) -> Result<SeedSummary> {
    if !seed.secrets.is_empty() && services.vault.is_none() {
        return Err(KaironError::Vault(
            "seed file has secrets but no vault master key is configured".to_string(),
        ));
    }

    for record in &seed.actions {
        services.action_configs.save(record)?;
    }
    for (bot, settings) in &seed.settings {
        services.bot_settings.save(bot, settings)?;
    }
    if let Some(vault) = &services.vault {
        for secret in &seed.secrets {
            vault.put(&secret.bot, &secret.key, &secret.value)?;
        }
    }

    Ok(SeedSummary {
        actions: seed.actions.len(),
        settings: seed.settings.len(),
        secrets: seed.secrets.len(),
    })
}
