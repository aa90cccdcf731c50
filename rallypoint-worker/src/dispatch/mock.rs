/// Mock dispatcher for testing
///
/// Records every batch it receives instead of sending it. It can be switched
/// into a failing mode to exercise transport-error paths, and can hold each
/// batch for a fixed delay to widen race windows in concurrency tests.
///
/// # Example
///
/// ```
/// use rallypoint_worker::dispatch::{Dispatcher, MockDispatcher, OutboundMessage};
///
/// # async fn example() {
/// let dispatcher = MockDispatcher::new();
/// let message = OutboundMessage::new("Hi", "Body", "from@example.org", vec!["to@example.org".into()]);
/// dispatcher.send_batch(vec![message]).await.unwrap();
/// assert_eq!(dispatcher.sent_count(), 1);
/// # }
/// ```

use crate::dispatch::{DispatchError, DispatchResult, Dispatcher, OutboundMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::{sleep, Duration};

/// Mock dispatcher implementation
#[derive(Debug, Default)]
pub struct MockDispatcher {
    batches: Mutex<Vec<Vec<OutboundMessage>>>,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl MockDispatcher {
    /// Creates a dispatcher that accepts every batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a dispatcher that rejects every batch
    pub fn failing() -> Self {
        let dispatcher = Self::default();
        dispatcher.set_failing(true);
        dispatcher
    }

    /// Holds each batch for `delay` before accepting it
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn recorded(&self) -> MutexGuard<'_, Vec<Vec<OutboundMessage>>> {
        self.batches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accepted batches, in arrival order
    pub fn batches(&self) -> Vec<Vec<OutboundMessage>> {
        self.recorded().clone()
    }

    /// Every accepted message, flattened
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.recorded().iter().flatten().cloned().collect()
    }

    pub fn sent_count(&self) -> usize {
        self.recorded().iter().map(Vec::len).sum()
    }

    pub fn batch_count(&self) -> usize {
        self.recorded().len()
    }

    /// Every recipient address of every accepted message
    pub fn recipients(&self) -> Vec<String> {
        self.recorded()
            .iter()
            .flatten()
            .flat_map(|m| m.to.iter().cloned())
            .collect()
    }

    pub fn clear(&self) {
        self.recorded().clear();
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send_batch(&self, messages: Vec<OutboundMessage>) -> DispatchResult<usize> {
        if messages.is_empty() {
            return Ok(0);
        }

        if let Some(delay) = self.delay {
            sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Transport("mock transport failure".to_string()));
        }

        for message in &messages {
            message.validate()?;
        }

        let count = messages.len();
        self.recorded().push(messages);
        Ok(count)
    }
}
