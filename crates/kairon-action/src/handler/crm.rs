//! CRM integrations: Zendesk tickets, Pipedrive leads and HubSpot form
//! submissions.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::composer::{inline, to_utterance};
use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::email::transcript_html;
use crate::handler::{send_json, ActionContext, ActionHandler};
use crate::types::{ActionType, ParameterSpec, ResponseTemplate};

fn reply_text(ctx: &mut ActionContext<'_>, text: String) -> SlotChanges {
    ctx.dispatcher.utter_text(text.clone());
    ctx.log.set_bot_response(text.clone());
    let mut slots = SlotChanges::new();
    slots.set_response(text);
    slots
}

// =============================================================================
// Zendesk
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ZendeskConfig {
    pub subdomain: String,
    pub user_name: String,
    pub api_token: ParameterSpec,
    pub subject: String,
    pub response: String,
    #[serde(default = "default_transcript_turns")]
    pub transcript_turns: usize,
}

fn default_transcript_turns() -> usize {
    10
}

pub struct ZendeskHandler;

#[async_trait]
impl ActionHandler for ZendeskHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Zendesk
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: ZendeskConfig = ctx.parse_config()?;
        let context = ctx.context(true);
        let token = inline(&ctx.resolver(&context).resolve(&config.api_token)?);

        let base = ctx
            .services
            .config
            .integrations
            .zendesk_url_template
            .replace("{subdomain}", &config.subdomain);
        let body = json!({
            "ticket": {
                "subject": config.subject,
                "comment": {"html_body": transcript_html(&context, config.transcript_turns)},
            }
        });
        let request = ctx
            .services
            .http
            .post(format!("{}/api/v2/tickets.json", base.trim_end_matches('/')))
            .basic_auth(format!("{}/token", config.user_name), Some(token))
            .json(&body);
        let result = send_json(request, "Zendesk").await;
        ctx.log.push_event(
            "zendesk",
            json!({
                "subdomain": config.subdomain,
                "ticket_id": result.as_ref().ok().map(|r| r["ticket"]["id"].clone()),
                "error": result.as_ref().err().map(|e| e.to_string()),
            }),
        );
        result?;
        Ok(reply_text(ctx, config.response))
    }
}

// =============================================================================
// Pipedrive
// =============================================================================

/// Slots holding the lead's contact details.
#[derive(Debug, Clone, Deserialize)]
pub struct LeadMetadata {
    pub name: String,
    #[serde(default)]
    pub org_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipedriveConfig {
    pub domain: String,
    pub api_token: ParameterSpec,
    pub title: String,
    pub metadata: LeadMetadata,
    pub response: String,
}

pub struct PipedriveHandler;

#[async_trait]
impl ActionHandler for PipedriveHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Pipedrive
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: PipedriveConfig = ctx.parse_config()?;
        let context = ctx.context(false);
        let token = inline(&ctx.resolver(&context).resolve(&config.api_token)?);
        let slot = |name: &Option<String>| {
            name.as_deref()
                .and_then(|n| context.slot(n))
                .map(inline)
        };

        let name = context
            .slot(&config.metadata.name)
            .map(inline)
            .ok_or_else(|| {
                ActionError::ParameterResolution(format!(
                    "lead name slot '{}' is not set",
                    config.metadata.name
                ))
            })?;
        let mut person = Map::new();
        person.insert("name".into(), json!(name));
        if let Some(email) = slot(&config.metadata.email) {
            person.insert("email".into(), json!([email]));
        }
        if let Some(phone) = slot(&config.metadata.phone) {
            person.insert("phone".into(), json!([phone]));
        }
        let org_name = slot(&config.metadata.org_name);

        let base = ctx
            .services
            .config
            .integrations
            .pipedrive_url_template
            .replace("{domain}", &config.domain);
        let base = base.trim_end_matches('/');
        let http = &ctx.services.http;

        let person_reply = send_json(
            http.post(format!("{}/api/v1/persons", base))
                .query(&[("api_token", token.as_str())])
                .json(&Value::Object(person)),
            "Pipedrive",
        )
        .await?;
        let person_id = person_reply["data"]["id"].clone();

        let lead = json!({"title": config.title, "person_id": person_id});
        let result = send_json(
            http.post(format!("{}/api/v1/leads", base))
                .query(&[("api_token", token.as_str())])
                .json(&lead),
            "Pipedrive",
        )
        .await;
        ctx.log.push_event(
            "pipedrive",
            json!({
                "person_id": person_id,
                "org_name": org_name,
                "lead_id": result.as_ref().ok().map(|r| r["data"]["id"].clone()),
                "error": result.as_ref().err().map(|e| e.to_string()),
            }),
        );
        result?;
        Ok(reply_text(ctx, config.response))
    }
}

// =============================================================================
// HubSpot
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct HubspotConfig {
    pub portal_id: String,
    pub form_guid: String,
    /// Each spec's `key` is the HubSpot field name.
    pub fields: Vec<ParameterSpec>,
    #[serde(default)]
    pub response: ResponseTemplate,
}

pub struct HubspotHandler;

#[async_trait]
impl ActionHandler for HubspotHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Hubspot
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: HubspotConfig = ctx.parse_config()?;
        let context = ctx.context(false);
        let prepared = ctx.resolver(&context).prepare_request(&config.fields)?;
        let fields: Vec<Value> = prepared
            .string_values()
            .into_iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect();
        let composer = ctx.default_composer(&context, &[config.response.value.as_str()])?;

        let url = format!(
            "{}/submissions/v3/integration/submit/{}/{}",
            ctx.services.config.integrations.hubspot_url.trim_end_matches('/'),
            config.portal_id,
            config.form_guid
        );
        let request = ctx.services.http.post(url).json(&json!({"fields": fields}));
        let result = send_json(request, "HubSpot").await;
        ctx.log.push_event(
            "hubspot",
            json!({
                "portal_id": config.portal_id,
                "form_guid": config.form_guid,
                "fields": prepared.redacted,
                "response": result.as_ref().ok(),
                "error": result.as_ref().err().map(|e| e.to_string()),
            }),
        );
        let data = json!({"data": result?});

        let composed = composer.compose(&config.response, &data).await?;
        if config.response.dispatch {
            ctx.dispatcher
                .utter_message(to_utterance(&composed.value, config.response.dispatch_type));
        }
        ctx.log.set_bot_response(composed.value.clone());
        let mut slots = SlotChanges::new();
        slots.set_response(composed.value);
        Ok(slots)
    }
}
