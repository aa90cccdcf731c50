/// Attendee model and database operations
///
/// An attendee row links one contact to one event in one role and carries
/// the commitment state the notifier works from:
///
/// - `mutual_commitment`: "I'll come if at least N others commit" (0 means
///   unconditional)
/// - `promised`: set once the attendee is confirmed as coming; never cleared
/// - `notified`: last commitment or reminder notification; never moves back
///
/// # Schema
///
/// ```sql
/// CREATE TABLE attendees (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     event_id UUID NOT NULL REFERENCES events(id) ON DELETE CASCADE,
///     contact_id UUID NOT NULL REFERENCES contacts(id) ON DELETE NO ACTION,
///     role VARCHAR(100) NOT NULL DEFAULT '',
///     promised TIMESTAMPTZ,
///     notes TEXT NOT NULL DEFAULT '',
///     mutual_commitment INTEGER NOT NULL DEFAULT 0 CHECK (mutual_commitment >= 0),
///     notified TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     UNIQUE (event_id, contact_id, role)
/// );
/// ```

use crate::models::contact::Contact;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

pub(crate) const ATTENDEE_COLUMNS: &str = "a.id, a.event_id, a.contact_id, a.role, a.promised, \
     a.notes, a.mutual_commitment, a.notified, a.created_at";

/// Attendee joined with its contact, used for every notifier query
pub(crate) const ATTENDANCE_SELECT: &str = "SELECT a.id, a.event_id, a.contact_id, a.role, \
     a.promised, a.notes, a.mutual_commitment, a.notified, a.created_at, \
     c.email AS contact_email, c.first_name AS contact_first_name, \
     c.last_name AS contact_last_name \
     FROM attendees a JOIN contacts c ON c.id = a.contact_id";

/// A contact's attendance of an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attendee {
    pub id: Uuid,

    pub event_id: Uuid,

    pub contact_id: Uuid,

    /// Attendance role (marshal, arrestable, ...); empty for plain attendance
    pub role: String,

    pub promised: Option<DateTime<Utc>>,

    pub notes: String,

    pub mutual_commitment: i32,

    pub notified: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Attendee {
    /// Whether the attendee conditioned attendance on others committing
    pub fn is_conditional(&self) -> bool {
        self.mutual_commitment > 0
    }

    /// Whether the attendee was notified within the window ending at `now`
    pub fn notified_since(&self, since: DateTime<Utc>) -> bool {
        self.notified.map_or(false, |at| at > since)
    }
}

/// An attendee plus the contact fields needed to address and greet them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    pub attendee: Attendee,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl Attendance {
    pub fn new(attendee: Attendee, contact: &Contact) -> Self {
        Attendance {
            attendee,
            email: contact.email.clone(),
            first_name: contact.first_name.clone(),
            last_name: contact.last_name.clone(),
        }
    }

    /// Greeting name
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AttendanceRow {
    id: Uuid,
    event_id: Uuid,
    contact_id: Uuid,
    role: String,
    promised: Option<DateTime<Utc>>,
    notes: String,
    mutual_commitment: i32,
    notified: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    contact_email: String,
    contact_first_name: String,
    contact_last_name: String,
}

impl From<AttendanceRow> for Attendance {
    fn from(row: AttendanceRow) -> Self {
        Attendance {
            attendee: Attendee {
                id: row.id,
                event_id: row.event_id,
                contact_id: row.contact_id,
                role: row.role,
                promised: row.promised,
                notes: row.notes,
                mutual_commitment: row.mutual_commitment,
                notified: row.notified,
                created_at: row.created_at,
            },
            email: row.contact_email,
            first_name: row.contact_first_name,
            last_name: row.contact_last_name,
        }
    }
}

/// A signup as recorded by the write path
///
/// Re-signing up with the same contact and role never resets an existing
/// commitment; it only replaces notes (when given) and may confirm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signup {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub notes: String,
    /// Confirmed ("I'm coming") signup
    #[serde(default)]
    pub promised: bool,
    /// Conditional commitment threshold; applied only when the row is new
    #[serde(default)]
    pub mutual_commitment: i32,
}

impl Attendee {
    /// Inserts or updates the attendance row for a signup
    ///
    /// `promised_at` is only applied when the row has no promise yet.
    pub async fn upsert_signup<'e>(
        executor: impl PgExecutor<'e>,
        event_id: Uuid,
        contact_id: Uuid,
        signup: &Signup,
        promised_at: Option<DateTime<Utc>>,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO attendees AS a (event_id, contact_id, role, notes, mutual_commitment, promised)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id, contact_id, role) DO UPDATE SET
                notes = CASE WHEN EXCLUDED.notes <> '' THEN EXCLUDED.notes ELSE a.notes END,
                promised = COALESCE(a.promised, EXCLUDED.promised)
            RETURNING {ATTENDEE_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Attendee>(&query)
            .bind(event_id)
            .bind(contact_id)
            .bind(&signup.role)
            .bind(&signup.notes)
            .bind(signup.mutual_commitment.max(0))
            .bind(promised_at)
            .fetch_one(executor)
            .await
    }

    /// Whether `(event, contact, role)` already has an attendance row
    pub async fn exists<'e>(
        executor: impl PgExecutor<'e>,
        event_id: Uuid,
        contact_id: Uuid,
        role: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM attendees WHERE event_id = $1 AND contact_id = $2 AND role = $3)",
        )
        .bind(event_id)
        .bind(contact_id)
        .bind(role)
        .fetch_one(executor)
        .await
    }

    /// Counts attendance rows for an event
    pub async fn count_for_event<'e>(
        executor: impl PgExecutor<'e>,
        event_id: Uuid,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM attendees WHERE event_id = $1")
            .bind(event_id)
            .fetch_one(executor)
            .await?;

        Ok(count)
    }

    /// Stamps `notified` (monotonically) and optionally confirms attendance
    ///
    /// Returns the number of rows updated.
    pub async fn stamp<'e>(
        executor: impl PgExecutor<'e>,
        ids: &[Uuid],
        at: DateTime<Utc>,
        confirm: bool,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE attendees
            SET notified = GREATEST(notified, $2),
                promised = CASE WHEN $3 THEN COALESCE(promised, $2) ELSE promised END
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .bind(at)
        .bind(confirm)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }
}
