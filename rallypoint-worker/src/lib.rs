//! # Rallypoint Worker Library
//!
//! Notification logic for Rallypoint: commitment notices when a pledge
//! threshold is met, reminders ahead of upcoming events, RSVP confirmations
//! and circle notices.
//!
//! ## Modules
//!
//! - `commitment`: Mutual-commitment threshold evaluator and RSVP confirmation
//! - `reminders`: Reminder scheduler and poller
//! - `attendance`: Signup write path with the explicit notification trigger
//! - `circles`: Circle membership and outreach notices
//! - `dispatch`: Outbound message boundary (console, HTTP relay, mock)
//! - `render`: Message templates
//! - `calendar`: iCalendar export for invites
//! - `config`: Settings loading and validation
//!
//! ## Example
//!
//! ```no_run
//! use rallypoint_worker::dispatch::{Dispatcher, MockDispatcher};
//!
//! # async fn example() {
//! let dispatcher = MockDispatcher::new();
//! println!("Dispatcher: {}", dispatcher.name());
//! # }
//! ```

pub mod attendance;
pub mod calendar;
pub mod circles;
pub mod commitment;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod reminders;
pub mod render;

pub use error::{NotifyError, NotifyResult};

use rallypoint_shared::store::NotificationClaim;

/// Releases a claim whose notifications were not sent
///
/// A failed release only means the locks are dropped with the transaction,
/// so it is logged rather than returned.
pub(crate) async fn release_claim(claim: Box<dyn NotificationClaim>) {
    if let Err(e) = claim.release().await {
        tracing::warn!(error = %e, "Failed to release notification claim");
    }
}
