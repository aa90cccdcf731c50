/// Console dispatcher
///
/// Writes messages to the log instead of delivering them. This is the
/// default backend, so a development setup never mails real people.

use crate::dispatch::{DispatchResult, Dispatcher, OutboundMessage};
use async_trait::async_trait;

/// Logs each message through `tracing`
#[derive(Debug, Clone, Default)]
pub struct ConsoleDispatcher;

impl ConsoleDispatcher {
    pub fn new() -> Self {
        ConsoleDispatcher
    }
}

#[async_trait]
impl Dispatcher for ConsoleDispatcher {
    fn name(&self) -> &str {
        "console"
    }

    async fn send_batch(&self, messages: Vec<OutboundMessage>) -> DispatchResult<usize> {
        for message in &messages {
            message.validate()?;
        }

        for message in &messages {
            tracing::info!(
                subject = %message.subject,
                from = %message.from,
                to = ?message.to,
                html = message.body_html.is_some(),
                attachments = message.attachments.len(),
                "Outbound message"
            );
            tracing::debug!(body = %message.body_text, "Message body");
        }

        Ok(messages.len())
    }
}
