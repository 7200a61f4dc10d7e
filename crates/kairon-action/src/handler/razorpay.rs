//! Razorpay payment-link action.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::composer::inline;
use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::{send_json, ActionContext, ActionHandler};
use crate::types::{ActionType, ParameterSpec};

#[derive(Debug, Clone, Deserialize)]
pub struct RazorpayConfig {
    pub api_key: ParameterSpec,
    pub api_secret: ParameterSpec,
    /// Amount in the currency's major unit; sent to Razorpay in paise.
    pub amount: ParameterSpec,
    pub currency: ParameterSpec,
    #[serde(default)]
    pub username: Option<ParameterSpec>,
    #[serde(default)]
    pub email: Option<ParameterSpec>,
    #[serde(default)]
    pub contact: Option<ParameterSpec>,
    #[serde(default)]
    pub notes: Vec<ParameterSpec>,
}

/// Convert a major-unit amount to the smallest currency unit.
pub fn to_minor_units(amount: &str) -> Result<i64, ActionError> {
    let value: f64 = amount.trim().parse().map_err(|_| {
        ActionError::ParameterResolution(format!("amount '{}' is not a number", amount))
    })?;
    if !value.is_finite() || value <= 0.0 {
        return Err(ActionError::ParameterResolution(format!(
            "amount '{}' must be positive",
            amount
        )));
    }
    Ok((value * 100.0).round() as i64)
}

pub struct RazorpayHandler;

#[async_trait]
impl ActionHandler for RazorpayHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Razorpay
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: RazorpayConfig = ctx.parse_config()?;
        let context = ctx.context(false);
        let resolver = ctx.resolver(&context);

        let api_key = inline(&resolver.resolve(&config.api_key)?);
        let api_secret = inline(&resolver.resolve(&config.api_secret)?);
        let amount = to_minor_units(&inline(&resolver.resolve(&config.amount)?))?;
        let currency = inline(&resolver.resolve(&config.currency)?);

        let mut customer = Map::new();
        for (field, spec) in [
            ("name", &config.username),
            ("email", &config.email),
            ("contact", &config.contact),
        ] {
            if let Some(value) = resolver.resolve_string(spec.as_ref())? {
                customer.insert(field.to_string(), Value::String(value));
            }
        }
        let mut notes = resolver.prepare_request(&config.notes)?;
        notes.values.insert("bot".to_string(), json!(ctx.bot));
        notes.redacted.insert("bot".to_string(), json!(ctx.bot));

        let body = json!({
            "amount": amount,
            "currency": currency,
            "customer": customer,
            "notes": notes.values,
        });
        let url = format!(
            "{}/v1/payment_links",
            ctx.services.config.integrations.razorpay_url.trim_end_matches('/')
        );
        let request = ctx
            .services
            .http
            .post(url)
            .basic_auth(api_key, Some(api_secret))
            .json(&body);
        let result = send_json(request, "Razorpay").await;
        ctx.log.push_event(
            "razorpay",
            json!({
                "amount": amount,
                "currency": currency,
                "notes": notes.redacted,
                "response": result.as_ref().ok(),
                "error": result.as_ref().err().map(|e| e.to_string()),
            }),
        );
        let link = result?["short_url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ActionError::UpstreamFailure("Razorpay reply has no short_url".to_string())
            })?;

        ctx.dispatcher.utter_text(link.clone());
        ctx.log.set_bot_response(link.clone());
        let mut slots = SlotChanges::new();
        slots.set_response(link);
        Ok(slots)
    }
}
