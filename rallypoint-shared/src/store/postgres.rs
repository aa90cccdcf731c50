/// Postgres attendance store
///
/// Claims are transactions: targets are selected with
/// `FOR UPDATE OF a SKIP LOCKED`, so a concurrent trigger for the same event
/// skips rows someone else is already notifying instead of waiting for them
/// and sending a second message. The transaction commits only after the
/// stamps are written.

use crate::models::attendee::{AttendanceRow, ATTENDANCE_SELECT};
use crate::models::{Attendance, Attendee, Circle, Contact, Event, NewContact, Signup};
use crate::store::{AttendanceStore, AttendeeFilter, NotificationClaim, Stamp, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashSet;
use uuid::Uuid;

/// Attendance store backed by a Postgres pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// SQL predicate for a filter; its parameter (if any) is always `$2`
fn filter_predicate(filter: &AttendeeFilter) -> &'static str {
    match filter {
        AttendeeFilter::All => "TRUE",
        AttendeeFilter::CommitmentCandidates { .. } => {
            "((a.promised IS NOT NULL AND a.mutual_commitment = 0) OR a.mutual_commitment <= $2)"
        }
        AttendeeFilter::PendingCommitments { .. } => {
            "(((a.promised IS NOT NULL AND a.mutual_commitment = 0) OR a.mutual_commitment <= $2) \
             AND a.notified IS NULL AND a.mutual_commitment > 0)"
        }
        AttendeeFilter::DueForReminder { .. } => "(a.notified IS NULL OR a.notified <= $2)",
        AttendeeFilter::Only(_) => "a.id = $2",
    }
}

fn bind_filter<'q, O>(
    query: QueryAs<'q, Postgres, O, PgArguments>,
    filter: &AttendeeFilter,
) -> QueryAs<'q, Postgres, O, PgArguments> {
    match *filter {
        AttendeeFilter::All => query,
        AttendeeFilter::CommitmentCandidates { threshold }
        | AttendeeFilter::PendingCommitments { threshold } => query.bind(threshold),
        AttendeeFilter::DueForReminder { stale_before } => query.bind(stale_before),
        AttendeeFilter::Only(id) => query.bind(id),
    }
}

fn attendance_query(filter: &AttendeeFilter, locking: bool) -> String {
    let lock = if locking { " FOR UPDATE OF a SKIP LOCKED" } else { "" };
    format!(
        "{ATTENDANCE_SELECT} WHERE a.event_id = $1 AND {} ORDER BY a.created_at ASC, a.id ASC{lock}",
        filter_predicate(filter)
    )
}

#[async_trait]
impl AttendanceStore for PgStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn find_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(Event::find_by_id(&self.pool, id).await?)
    }

    async fn find_events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>> {
        Ok(Event::find_starting_between(&self.pool, start, end).await?)
    }

    async fn find_attendees(
        &self,
        event_id: Uuid,
        filter: &AttendeeFilter,
    ) -> StoreResult<Vec<Attendance>> {
        let query = attendance_query(filter, false);
        let rows = bind_filter(sqlx::query_as::<_, AttendanceRow>(&query).bind(event_id), filter)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Attendance::from).collect())
    }

    async fn count_attendees(&self, event_id: Uuid, filter: &AttendeeFilter) -> StoreResult<i64> {
        let query = format!(
            "SELECT COUNT(*) FROM attendees a WHERE a.event_id = $1 AND {}",
            filter_predicate(filter)
        );
        let (count,): (i64,) = bind_filter(sqlx::query_as(&query).bind(event_id), filter)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    async fn claim_attendees(
        &self,
        event_id: Uuid,
        filter: &AttendeeFilter,
    ) -> StoreResult<Box<dyn NotificationClaim>> {
        let mut tx = self.pool.begin().await?;

        let query = attendance_query(filter, true);
        let rows = bind_filter(sqlx::query_as::<_, AttendanceRow>(&query).bind(event_id), filter)
            .fetch_all(&mut *tx)
            .await?;

        let attendees: Vec<Attendance> = rows.into_iter().map(Attendance::from).collect();
        tracing::debug!(
            event_id = %event_id,
            filter = ?filter,
            count = attendees.len(),
            "Claimed attendees"
        );

        Ok(Box::new(PgClaim { tx, attendees }))
    }

    async fn stamp_attendee(&self, attendee_id: Uuid, stamp: Stamp) -> StoreResult<bool> {
        let updated = Attendee::stamp(&self.pool, &[attendee_id], stamp.at, stamp.confirm).await?;
        Ok(updated > 0)
    }

    async fn record_signup(
        &self,
        event_id: Uuid,
        signup: &Signup,
        now: DateTime<Utc>,
    ) -> StoreResult<Attendance> {
        let contact = NewContact::from_display_name(&signup.email, &signup.name)
            .ok_or_else(|| StoreError::InvalidInput("email is required".to_string()))?;
        if signup.mutual_commitment < 0 {
            return Err(StoreError::InvalidInput(
                "mutual_commitment must be >= 0".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let event = Event::lock_for_signup(&mut *tx, event_id)
            .await?
            .ok_or(StoreError::EventNotFound(event_id))?;

        let contact = Contact::get_or_create(&mut *tx, &contact).await?;

        if event.max_participants > 0
            && !Attendee::exists(&mut *tx, event_id, contact.id, &signup.role).await?
            && event.is_full(Attendee::count_for_event(&mut *tx, event_id).await?)
        {
            return Err(StoreError::EventFull(event_id));
        }

        let promised_at = signup.promised.then_some(now);
        let attendee =
            Attendee::upsert_signup(&mut *tx, event_id, contact.id, signup, promised_at).await?;

        tx.commit().await?;

        Ok(Attendance::new(attendee, &contact))
    }

    async fn find_circle(&self, prefix: &str) -> StoreResult<Option<Circle>> {
        Ok(Circle::find_by_name_prefix(&self.pool, prefix).await?)
    }
}

/// Row locks held by an open transaction
struct PgClaim {
    tx: Transaction<'static, Postgres>,
    attendees: Vec<Attendance>,
}

#[async_trait]
impl NotificationClaim for PgClaim {
    fn attendees(&self) -> &[Attendance] {
        &self.attendees
    }

    async fn commit(self: Box<Self>, ids: &[Uuid], stamp: Stamp) -> StoreResult<u64> {
        let PgClaim { mut tx, attendees } = *self;

        let claimed: HashSet<Uuid> = attendees.iter().map(|a| a.attendee.id).collect();
        let ids: Vec<Uuid> = ids.iter().copied().filter(|id| claimed.contains(id)).collect();

        let updated = if ids.is_empty() {
            0
        } else {
            Attendee::stamp(&mut *tx, &ids, stamp.at, stamp.confirm).await?
        };

        tx.commit().await?;
        Ok(updated)
    }

    async fn release(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
