/// Core Dispatcher trait and message types
///
/// # Dispatcher Contract
///
/// All dispatchers must:
/// 1. Implement the `Dispatcher` trait (async)
/// 2. Treat a batch as one unit: `Ok` means every message was handed off
/// 3. Return `Ok(0)` for an empty batch without contacting the transport
///
/// # Example
///
/// ```no_run
/// use rallypoint_worker::dispatch::{Dispatcher, DispatchResult, OutboundMessage};
/// use async_trait::async_trait;
///
/// struct NullDispatcher;
///
/// #[async_trait]
/// impl Dispatcher for NullDispatcher {
///     fn name(&self) -> &str {
///         "null"
///     }
///
///     async fn send_batch(&self, messages: Vec<OutboundMessage>) -> DispatchResult<usize> {
///         Ok(messages.len())
///     }
/// }
/// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Dispatch error types
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Transport could not be reached or failed mid-send
    #[error("Transport failed: {0}")]
    Transport(String),

    /// Transport answered but refused the batch
    #[error("Batch rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// A message in the batch cannot be sent as-is
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Dispatch result type alias
pub type DispatchResult<T> = Result<T, DispatchError>;

/// File attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,

    /// MIME type, e.g. `text/calendar`
    pub content_type: String,

    pub content: String,
}

/// A message ready for dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub subject: String,

    pub body_text: String,

    /// HTML alternative; sent as multi-part together with `body_text`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_html: Option<String>,

    pub from: String,

    pub to: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    /// Creates a plain-text message
    pub fn new(
        subject: impl Into<String>,
        body_text: impl Into<String>,
        from: impl Into<String>,
        to: Vec<String>,
    ) -> Self {
        OutboundMessage {
            subject: subject.into(),
            body_text: body_text.into(),
            body_html: None,
            from: from.into(),
            to,
            attachments: Vec::new(),
        }
    }

    /// Adds an HTML alternative
    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.body_html = Some(html.into());
        self
    }

    /// Adds an attachment
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Checks the message has somewhere to go
    pub fn validate(&self) -> DispatchResult<()> {
        if self.to.is_empty() || self.to.iter().any(|to| to.trim().is_empty()) {
            return Err(DispatchError::InvalidMessage(format!(
                "message '{}' has no valid recipient",
                self.subject
            )));
        }
        Ok(())
    }
}

/// Outbound transport for notification batches
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Returns the dispatcher name (e.g., "console", "relay")
    fn name(&self) -> &str;

    /// Sends a batch, returning the number of messages handed off
    async fn send_batch(&self, messages: Vec<OutboundMessage>) -> DispatchResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(to: Vec<&str>) -> OutboundMessage {
        OutboundMessage::new(
            "Subject",
            "Body",
            "noreply@example.org",
            to.into_iter().map(String::from).collect(),
        )
    }

    #[test]
    fn test_validate_recipients() {
        assert!(message(vec!["ada@example.org"]).validate().is_ok());
        assert!(message(vec![]).validate().is_err());
        assert!(message(vec!["ada@example.org", " "]).validate().is_err());
    }

    #[test]
    fn test_serialization_skips_empty_parts() {
        let json = serde_json::to_value(message(vec!["ada@example.org"])).unwrap();
        assert!(json.get("body_html").is_none());
        assert!(json.get("attachments").is_none());

        let json = serde_json::to_value(
            message(vec!["ada@example.org"])
                .with_html("<p>Body</p>")
                .with_attachment(Attachment {
                    filename: "event.ics".to_string(),
                    content_type: "text/calendar".to_string(),
                    content: "BEGIN:VCALENDAR".to_string(),
                }),
        )
        .unwrap();
        assert_eq!(json["body_html"], "<p>Body</p>");
        assert_eq!(json["attachments"][0]["content_type"], "text/calendar");
    }
}
