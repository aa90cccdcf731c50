/// Outbound message dispatch
///
/// Everything the notifier sends goes through a [`Dispatcher`] as one batch
/// per event. The notifier only stamps attendees after `send_batch` returns
/// `Ok`, so a dispatcher must not report success for a batch it did not hand
/// off.
///
/// # Dispatcher Types
///
/// - **Console**: Logs messages instead of sending them (development)
/// - **Relay**: Posts signed JSON batches to an HTTP mail relay
/// - **Mock**: Records batches in memory and can be told to fail (tests)
///
/// # Example
///
/// ```no_run
/// use rallypoint_worker::dispatch::{Dispatcher, OutboundMessage, ConsoleDispatcher};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let dispatcher = ConsoleDispatcher::new();
/// let message = OutboundMessage::new(
///     "Hello",
///     "Body",
///     "noreply@example.org",
///     vec!["ada@example.org".to_string()],
/// );
/// dispatcher.send_batch(vec![message]).await?;
/// # Ok(())
/// # }
/// ```

pub mod console;
pub mod dispatcher_trait;
pub mod mock;
pub mod relay;

pub use console::ConsoleDispatcher;
pub use dispatcher_trait::{
    Attachment, DispatchError, DispatchResult, Dispatcher, OutboundMessage,
};
pub use mock::MockDispatcher;
pub use relay::RelayDispatcher;

use crate::config::DispatchBackend;
use std::sync::Arc;

/// Builds the dispatcher selected by configuration
pub fn build_dispatcher(backend: &DispatchBackend) -> DispatchResult<Arc<dyn Dispatcher>> {
    let dispatcher: Arc<dyn Dispatcher> = match backend {
        DispatchBackend::Console => Arc::new(ConsoleDispatcher::new()),
        DispatchBackend::Relay { url, secret } => {
            Arc::new(RelayDispatcher::new(url.clone(), secret.as_bytes().to_vec())?)
        }
    };

    tracing::info!(dispatcher = %dispatcher.name(), "Dispatcher configured");
    Ok(dispatcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_console() {
        let dispatcher = build_dispatcher(&DispatchBackend::Console).unwrap();
        assert_eq!(dispatcher.name(), "console");
    }

    #[test]
    fn test_build_relay() {
        let backend = DispatchBackend::Relay {
            url: "https://relay.example.org/send".to_string(),
            secret: "relay-secret".to_string(),
        };
        let dispatcher = build_dispatcher(&backend).unwrap();
        assert_eq!(dispatcher.name(), "relay");
    }
}
