//! FAQ and prompt actions backed by the LLM.
//!
//! Both are gated by the bot's `enable_gpt_llm_faq` setting and share one
//! request builder: system prompt, optional knowledge-base context, recent
//! history, then the user's message.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::{ChatRole, Context};
use crate::dispatcher::SlotChanges;
use crate::error::ActionError;
use crate::handler::database::VectorStore;
use crate::handler::{ActionContext, ActionHandler};
use crate::llm::{ChatMessage, LlmOverrides, LlmReply};
use crate::params::substitute_slots;
use crate::types::{
    ActionType, SlotAssignment, FAQ_DISABLED_MESSAGE, LLM_FALLBACK_MESSAGE, LLM_UNKNOWN_ANSWER,
};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful personal assistant. \
    Answer the question based on the context below. \
    If the context does not contain the answer, reply \"I don't know.\"";

const DEFAULT_CONTEXT_PROMPT: &str = "Answer using only the following context:";

/// Settings shared by FAQ and prompt actions.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmActionSettings {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_context_prompt")]
    pub context_prompt: String,
    /// Past exchanges included as history.
    #[serde(default = "default_history_turns")]
    pub num_bot_responses: usize,
    #[serde(default)]
    pub failure_message: Option<String>,
    #[serde(default)]
    pub use_knowledge_base: bool,
    /// Defaults to `{bot}_faq_embd`.
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default = "default_top_results")]
    pub top_results: usize,
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
    #[serde(default)]
    pub hyperparameters: LlmOverrides,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_context_prompt() -> String {
    DEFAULT_CONTEXT_PROMPT.to_string()
}

fn default_history_turns() -> usize {
    5
}

fn default_top_results() -> usize {
    10
}

impl Default for LlmActionSettings {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            context_prompt: default_context_prompt(),
            num_bot_responses: default_history_turns(),
            failure_message: None,
            use_knowledge_base: false,
            collection: None,
            top_results: default_top_results(),
            similarity_threshold: None,
            hyperparameters: LlmOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FaqActionConfig {
    #[serde(flatten)]
    pub llm: LlmActionSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptActionConfig {
    #[serde(flatten)]
    pub llm: LlmActionSettings,
    /// Extra instructions sent before the user's message; `${slot}` is
    /// substituted.
    #[serde(default)]
    pub user_prompt: Option<String>,
    /// Evaluated against `{data: <answer>}`.
    #[serde(default)]
    pub set_slots: Vec<SlotAssignment>,
    #[serde(default = "default_dispatch")]
    pub dispatch_response: bool,
}

fn default_dispatch() -> bool {
    true
}

/// Outcome of the gate check.
enum Gate {
    Open,
    Closed(SlotChanges),
}

fn check_enabled(ctx: &mut ActionContext<'_>) -> Result<Gate, ActionError> {
    if ctx.settings()?.enable_gpt_llm_faq {
        return Ok(Gate::Open);
    }
    ctx.dispatcher.utter_text(FAQ_DISABLED_MESSAGE);
    ctx.log.set_bot_response(FAQ_DISABLED_MESSAGE);
    ctx.log.fail(FAQ_DISABLED_MESSAGE);
    let mut slots = SlotChanges::new();
    slots.set_response(FAQ_DISABLED_MESSAGE);
    Ok(Gate::Closed(slots))
}

fn history(context: &Context, turns: usize) -> Vec<ChatMessage> {
    let log = context.chat_log();
    // The latest user message is sent separately.
    let log = match log.last() {
        Some(last) if last.role == ChatRole::User => &log[..log.len() - 1],
        _ => log,
    };
    let start = log.len().saturating_sub(turns.saturating_mul(2));
    log[start..]
        .iter()
        .map(|turn| match turn.role {
            ChatRole::User => ChatMessage::user(turn.text.clone()),
            ChatRole::Bot => ChatMessage::assistant(turn.text.clone()),
        })
        .collect()
}

/// Build the conversation, call the LLM and apply the unknown-answer
/// fallback. Returns the final answer and the raw reply.
async fn ask(
    ctx: &mut ActionContext<'_>,
    settings: &LlmActionSettings,
    context: &Context,
    user_prompt: Option<String>,
) -> Result<(String, LlmReply), ActionError> {
    let services = ctx.services;
    let query = context.user_message().unwrap_or_default().to_string();

    let mut system = settings.system_prompt.clone();
    let mut retrieved = Vec::new();
    if settings.use_knowledge_base {
        let store = VectorStore::new(
            &services.http,
            services.config.integrations.vector_db_url.as_deref(),
        )?;
        let collection = settings
            .collection
            .clone()
            .unwrap_or_else(|| format!("{}_faq_embd", ctx.bot));
        retrieved = store
            .retrieve_content(
                &services.llm,
                &collection,
                &query,
                settings.top_results,
                settings.similarity_threshold,
            )
            .await?;
        if !retrieved.is_empty() {
            system = format!("{}\n{}\n{}", system, settings.context_prompt, retrieved.join("\n"));
        }
    }

    let mut messages = vec![ChatMessage::system(system)];
    messages.extend(history(context, settings.num_bot_responses));
    if let Some(prompt) = user_prompt.filter(|p| !p.trim().is_empty()) {
        messages.push(ChatMessage::user(prompt));
    }
    messages.push(ChatMessage::user(query));

    let result = services.llm.chat(&messages, &settings.hyperparameters).await;
    ctx.log.push_event(
        "llm_response",
        json!({
            "messages": messages,
            "retrieved": retrieved,
            "response": result.as_ref().map(|r| r.raw.clone()).unwrap_or(Value::Null),
            "error": result.as_ref().err().map(|e| e.to_string()),
        }),
    );
    let reply = result?;

    let answer = if reply.content.trim() == LLM_UNKNOWN_ANSWER || reply.content.trim().is_empty() {
        settings
            .failure_message
            .clone()
            .unwrap_or_else(|| LLM_FALLBACK_MESSAGE.to_string())
    } else {
        reply.content.clone()
    };
    Ok((answer, reply))
}

pub struct FaqActionHandler;

#[async_trait]
impl ActionHandler for FaqActionHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Faq
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: FaqActionConfig = ctx.parse_config()?;
        if let Gate::Closed(slots) = check_enabled(ctx)? {
            return Ok(slots);
        }
        let context = ctx.context(true);
        let (answer, _) = ask(ctx, &config.llm, &context, None).await?;

        ctx.dispatcher.utter_text(answer.clone());
        ctx.log.set_bot_response(answer.clone());
        let mut slots = SlotChanges::new();
        slots.set_response(answer);
        Ok(slots)
    }
}

pub struct PromptActionHandler;

#[async_trait]
impl ActionHandler for PromptActionHandler {
    fn action_type(&self) -> ActionType {
        ActionType::Prompt
    }

    async fn execute(&self, ctx: &mut ActionContext<'_>) -> Result<SlotChanges, ActionError> {
        let config: PromptActionConfig = ctx.parse_config()?;
        if let Gate::Closed(slots) = check_enabled(ctx)? {
            return Ok(slots);
        }
        let context = ctx.context(true);
        let user_prompt = config
            .user_prompt
            .as_deref()
            .map(|p| substitute_slots(p, context.slots()));
        let (answer, _) = ask(ctx, &config.llm, &context, user_prompt).await?;

        let sources: Vec<&str> = config.set_slots.iter().map(|s| s.value.as_str()).collect();
        let composer = ctx.default_composer(&context, &sources)?;
        let data = json!({"data": answer});
        let filled = composer.fill_slots(&config.set_slots, &data).await?;
        let mut slots: SlotChanges = filled.into_iter().collect();
        ctx.log.push_event("filled_slots", slots.to_json());

        if config.dispatch_response {
            ctx.dispatcher.utter_text(answer.clone());
        }
        ctx.log.set_bot_response(answer.clone());
        slots.set_response(answer);
        Ok(slots)
    }
}
