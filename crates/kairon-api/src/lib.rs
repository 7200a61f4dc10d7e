//! kairon-api: axum HTTP surface of the action server.
//!
//! Exposes the dialogue manager's `POST /webhook` plus health and action
//! listing endpoints.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
