/// Notifier error type
///
/// Wraps the per-module errors so callers of the commitment, reminder and
/// signup paths handle one type.

use crate::config::ConfigError;
use crate::dispatch::DispatchError;
use crate::render::RenderError;
use rallypoint_shared::store::StoreError;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Template rendering failed
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Dispatch failed; nothing was stamped
    #[error("Transport error: {0}")]
    Transport(#[from] DispatchError),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Rejected signup input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Event reached its participant limit
    #[error("Event is full: {0}")]
    EventFull(Uuid),
}

/// Notifier result type alias
pub type NotifyResult<T> = Result<T, NotifyError>;

impl NotifyError {
    /// Whether the error came from the outbound transport
    pub fn is_transport(&self) -> bool {
        matches!(self, NotifyError::Transport(_))
    }
}
