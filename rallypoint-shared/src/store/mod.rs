/// Attendance store boundary
///
/// The notifier never talks to the database directly. Everything it needs is
/// expressed by the [`AttendanceStore`] trait, so the same commitment and
/// reminder logic runs against Postgres in production and against
/// [`MemoryStore`] in tests.
///
/// # Claims
///
/// Sending a notification is a read-decide-write sequence that can race with
/// another trigger for the same event. [`AttendanceStore::claim_attendees`]
/// turns "select targets" into a lock: matching attendees are locked against
/// every other claim until the claim is committed or released, and rows
/// already locked by someone else are skipped rather than waited on.
///
/// ```text
/// claim_attendees(filter) ──> render + send_batch ──ok──> commit(ids, stamp)
///                                    │
///                                    └──err──> release()   (nothing persisted)
/// ```
///
/// Stamps are only persisted by `commit`, after the batch went out. A crash
/// between dispatch and commit can repeat a message on the next run; a crash
/// before dispatch loses nothing.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::models::{Attendance, Attendee, Circle, Event, Signup};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Store error
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Event not found
    #[error("Event not found: {0}")]
    EventNotFound(Uuid),

    /// Participant cap reached for a new attendee
    #[error("Event is full: {0}")]
    EventFull(Uuid),

    /// Rejected input (blank email, negative commitment, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Store result type alias
pub type StoreResult<T> = Result<T, StoreError>;

/// Which attendees of an event a query selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendeeFilter {
    /// Every attendee
    All,

    /// Attendees counting toward a commitment threshold: confirmed
    /// unconditional attendees, plus anyone whose own threshold is at most
    /// `threshold`
    CommitmentCandidates { threshold: i32 },

    /// Candidates still waiting to hear that their condition is met:
    /// conditional (`mutual_commitment > 0`) and never notified
    PendingCommitments { threshold: i32 },

    /// Attendees never notified, or last notified at or before `stale_before`
    DueForReminder { stale_before: DateTime<Utc> },

    /// A single attendee
    Only(Uuid),
}

impl AttendeeFilter {
    /// Reference semantics of the filter, shared by every backend
    pub fn matches(&self, attendee: &Attendee) -> bool {
        match *self {
            AttendeeFilter::All => true,
            AttendeeFilter::CommitmentCandidates { threshold } => {
                is_candidate(attendee, threshold)
            }
            AttendeeFilter::PendingCommitments { threshold } => {
                is_candidate(attendee, threshold)
                    && attendee.notified.is_none()
                    && attendee.mutual_commitment > 0
            }
            AttendeeFilter::DueForReminder { stale_before } => match attendee.notified {
                None => true,
                Some(at) => at <= stale_before,
            },
            AttendeeFilter::Only(id) => attendee.id == id,
        }
    }
}

fn is_candidate(attendee: &Attendee, threshold: i32) -> bool {
    (attendee.promised.is_some() && attendee.mutual_commitment == 0)
        || attendee.mutual_commitment <= threshold
}

/// What to persist for attendees that were notified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    /// New `notified` value; never moves an existing stamp backwards
    pub at: DateTime<Utc>,

    /// Also set `promised = at` where it is still unset
    pub confirm: bool,
}

impl Stamp {
    /// Reminder stamp: `notified` only
    pub fn notified(at: DateTime<Utc>) -> Self {
        Stamp { at, confirm: false }
    }

    /// Commitment or RSVP stamp: `notified`, plus an implicit confirmation
    pub fn confirmed(at: DateTime<Utc>) -> Self {
        Stamp { at, confirm: true }
    }
}

/// Attendees locked for notification by one caller
#[async_trait]
pub trait NotificationClaim: Send {
    /// Claimed attendees, oldest signup first
    fn attendees(&self) -> &[Attendance];

    /// Persists `stamp` for the claimed attendees listed in `ids` and
    /// releases every lock held by the claim
    ///
    /// Ids that were not claimed are ignored. Returns the rows stamped.
    async fn commit(self: Box<Self>, ids: &[Uuid], stamp: Stamp) -> StoreResult<u64>;

    /// Releases the claim without persisting anything
    async fn release(self: Box<Self>) -> StoreResult<()>;
}

/// Data access used by the notifier
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Finds an event by ID
    async fn find_event(&self, id: Uuid) -> StoreResult<Option<Event>>;

    /// Reminder-enabled events starting within `[start, end]`, earliest first
    async fn find_events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>>;

    /// Attendees of an event matching `filter`, oldest signup first
    async fn find_attendees(
        &self,
        event_id: Uuid,
        filter: &AttendeeFilter,
    ) -> StoreResult<Vec<Attendance>>;

    /// Number of attendees of an event matching `filter`
    async fn count_attendees(&self, event_id: Uuid, filter: &AttendeeFilter) -> StoreResult<i64>;

    /// Locks the attendees matching `filter` that no other claim holds
    async fn claim_attendees(
        &self,
        event_id: Uuid,
        filter: &AttendeeFilter,
    ) -> StoreResult<Box<dyn NotificationClaim>>;

    /// Persists a stamp for one attendee outside of a claim
    async fn stamp_attendee(&self, attendee_id: Uuid, stamp: Stamp) -> StoreResult<bool>;

    /// Records a signup: finds or creates the contact, then the attendance row
    ///
    /// A new row takes the signup's commitment; an existing row keeps its
    /// commitment and only picks up non-empty notes and a first promise.
    ///
    /// A new row on an event at its participant cap fails with
    /// [`StoreError::EventFull`]. The check and the insert are atomic, so
    /// concurrent signups cannot overshoot the cap.
    async fn record_signup(
        &self,
        event_id: Uuid,
        signup: &Signup,
        now: DateTime<Utc>,
    ) -> StoreResult<Attendance>;

    /// Newest circle whose name starts with `prefix` (case-insensitive)
    async fn find_circle(&self, prefix: &str) -> StoreResult<Option<Circle>>;
}
