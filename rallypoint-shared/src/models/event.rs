/// Event model and database operations
///
/// An event (an "action" in organizer vocabulary) is created and edited by
/// organizers and is never deleted during normal operation. Attendees are
/// owned by their event and go away with it.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE events (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     name VARCHAR(255) NOT NULL,
///     slug VARCHAR(255) NOT NULL UNIQUE,
///     starts_at TIMESTAMPTZ NOT NULL,
///     public BOOLEAN NOT NULL DEFAULT TRUE,
///     reminders_enabled BOOLEAN NOT NULL DEFAULT TRUE,
///     location TEXT NOT NULL DEFAULT '',
///     is_virtual BOOLEAN NOT NULL DEFAULT FALSE,
///     contact_email TEXT,
///     max_participants INTEGER NOT NULL DEFAULT 0,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use rallypoint_shared::models::event::{CreateEvent, Event};
/// use chrono::{Duration, Utc};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let event = Event::create(&pool, CreateEvent::new(
///     "Die-in at City Hall",
///     "die-in-city-hall",
///     Utc::now() + Duration::days(3),
/// )).await?;
///
/// let upcoming = Event::find_starting_between(
///     &pool,
///     Utc::now(),
///     Utc::now() + Duration::days(7),
/// ).await?;
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

const EVENT_COLUMNS: &str = "id, name, slug, starts_at, public, reminders_enabled, location, \
     is_virtual, contact_email, max_participants, created_at, updated_at";

/// An organized event people can sign up for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
    pub id: Uuid,

    /// Display name; may contain literal `\n` sequences used as line breaks
    pub name: String,

    /// Short URL-safe identifier
    pub slug: String,

    /// Start instant
    pub starts_at: DateTime<Utc>,

    /// Whether the event is listed publicly
    pub public: bool,

    /// Organizer opt-out for automated reminders
    pub reminders_enabled: bool,

    /// Free-form location or meeting link
    pub location: String,

    /// Online event (video call) rather than a physical location
    pub is_virtual: bool,

    /// Organizer contact address, if any
    pub contact_email: Option<String>,

    /// Registration cap; 0 means unlimited
    pub max_participants: i32,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Input for creating an event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEvent {
    pub name: String,
    pub slug: String,
    pub starts_at: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub public: bool,
    #[serde(default = "default_true")]
    pub reminders_enabled: bool,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub max_participants: i32,
}

fn default_true() -> bool {
    true
}

impl CreateEvent {
    /// Public event with reminders on and no location or cap
    pub fn new(name: &str, slug: &str, starts_at: DateTime<Utc>) -> Self {
        CreateEvent {
            name: name.to_string(),
            slug: slug.to_string(),
            starts_at,
            public: true,
            reminders_enabled: true,
            location: String::new(),
            is_virtual: false,
            contact_email: None,
            max_participants: 0,
        }
    }

    /// Materializes the row without touching a database
    pub fn into_event(self, now: DateTime<Utc>) -> Event {
        Event {
            id: Uuid::new_v4(),
            name: self.name,
            slug: self.slug,
            starts_at: self.starts_at,
            public: self.public,
            reminders_enabled: self.reminders_enabled,
            location: self.location,
            is_virtual: self.is_virtual,
            contact_email: self.contact_email,
            max_participants: self.max_participants,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Event {
    /// Whether the event start is already behind `now`
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        now > self.starts_at
    }

    /// Title on one line
    pub fn text_title(&self) -> String {
        self.name.replace("\\n", " ").replace('\n', " ")
    }

    /// Site-relative path of the event page
    pub fn path(&self) -> String {
        format!("/action/{}", self.slug)
    }

    /// Absolute URL of the event page
    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.path())
    }

    /// Whether a registration cap is set and reached
    pub fn is_full(&self, attendee_count: i64) -> bool {
        self.max_participants > 0 && attendee_count >= i64::from(self.max_participants)
    }

    /// Creates a new event
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        data: CreateEvent,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            r#"
            INSERT INTO events (name, slug, starts_at, public, reminders_enabled,
                                location, is_virtual, contact_email, max_participants)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {EVENT_COLUMNS}
            "#
        );

        sqlx::query_as::<_, Event>(&query)
            .bind(data.name)
            .bind(data.slug)
            .bind(data.starts_at)
            .bind(data.public)
            .bind(data.reminders_enabled)
            .bind(data.location)
            .bind(data.is_virtual)
            .bind(data.contact_email)
            .bind(data.max_participants)
            .fetch_one(executor)
            .await
    }

    /// Finds an event and row-locks it until the transaction ends
    ///
    /// Signups for the same event serialize on this lock, which keeps the
    /// participant cap exact.
    pub async fn lock_for_signup<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, Event>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Finds an event by ID
    pub async fn find_by_id<'e>(
        executor: impl PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        sqlx::query_as::<_, Event>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Finds an event by slug
    pub async fn find_by_slug<'e>(
        executor: impl PgExecutor<'e>,
        slug: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE slug = $1");
        sqlx::query_as::<_, Event>(&query)
            .bind(slug)
            .fetch_optional(executor)
            .await
    }

    /// Reminder-enabled events starting within `[start, end]` (inclusive)
    pub async fn find_starting_between<'e>(
        executor: impl PgExecutor<'e>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let query = format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE starts_at BETWEEN $1 AND $2
              AND reminders_enabled
            ORDER BY starts_at ASC
            "#
        );

        sqlx::query_as::<_, Event>(&query)
            .bind(start)
            .bind(end)
            .fetch_all(executor)
            .await
    }

    /// Deletes an event
    ///
    /// ⚠️  This also deletes all of its attendees due to CASCADE.
    pub async fn delete<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
