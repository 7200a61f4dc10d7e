//! Action execution engine for the kAIron action server.
//!
//! Resolves a requested action's stored config, runs it through the
//! registered handler (HTTP call, email, script, LLM, CRM, ...), and frames
//! the slot events and bot messages returned to the dialogue manager. Every
//! invocation leaves exactly one audit record.

pub mod composer;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod handler;
pub mod llm;
pub mod mail;
pub mod params;
pub mod sandbox;
pub mod scheduler;
pub mod services;
pub mod types;

#[cfg(test)]
mod testing;

pub use composer::{render_expression, walk, ResponseComposer};
pub use context::Context;
pub use dispatcher::{ActionLogger, Dispatcher, SlotChanges};
pub use error::ActionError;
pub use executor::{ActionExecutor, ActionOutcome};
pub use handler::{ActionContext, ActionHandler, ActionRegistry};
pub use scheduler::Scheduler;
pub use services::Services;
pub use types::{ActionType, ParameterSpec, ParameterType, ResponseTemplate, SlotAssignment};
