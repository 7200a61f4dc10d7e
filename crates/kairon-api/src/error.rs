//! API error types and JSON error response formatting.
//!
//! Caller errors carry the action name so the dialogue manager can tell
//! which action was refused.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use kairon_action::ActionError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// `null` when the request body could not be parsed.
    pub action_name: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - unknown action, missing config, rejected or
    /// malformed request.
    BadRequest {
        message: String,
        action_name: Option<String>,
    },
    /// 500 Internal Server Error.
    Internal(String),
}

impl ApiError {
    /// Map an executor error for `action_name`.
    pub fn from_action(err: ActionError, action_name: &str) -> Self {
        if err.is_client_error() {
            ApiError::BadRequest {
                message: err.to_string(),
                action_name: Some(action_name.to_string()),
            }
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest {
                message,
                action_name,
            } => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: message,
                    action_name,
                },
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: message,
                    action_name: None,
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}
