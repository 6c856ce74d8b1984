//! Error types for Tally
//!
//! This module defines custom error types used throughout the application.

use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("No pricing entry for provider '{provider}' model '{model}'")]
    UnknownPricing { provider: String, model: String },

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
