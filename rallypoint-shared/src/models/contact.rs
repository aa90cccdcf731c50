/// Contact model
///
/// A contact is a person identity owned by the organization's address book.
/// The notifier only reads the email and name for targeting and rendering.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE contacts (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     email VARCHAR(255) NOT NULL UNIQUE,
///     first_name VARCHAR(255) NOT NULL DEFAULT '',
///     last_name VARCHAR(255) NOT NULL DEFAULT '',
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

/// Placeholder last name for contacts who signed up with a single name
pub const UNKNOWN_LAST_NAME: &str = "?";

/// A person known to the organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contact {
    pub id: Uuid,

    /// Lower-cased, trimmed email address
    pub email: String,

    pub first_name: String,

    pub last_name: String,

    pub created_at: DateTime<Utc>,
}

/// Input for looking up or creating a contact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewContact {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl NewContact {
    /// Builds a contact from an email and a free-form display name
    ///
    /// Returns `None` if the email is blank.
    pub fn from_display_name(email: &str, name: &str) -> Option<Self> {
        let email = normalize_email(email)?;
        let (first_name, last_name) = split_name(name);
        Some(NewContact {
            email,
            first_name,
            last_name,
        })
    }
}

/// Lower-cases and trims an email address. Blank input yields `None`.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        None
    } else {
        Some(email)
    }
}

/// Splits a display name into first and last name on the first space
///
/// A single word becomes the first name with [`UNKNOWN_LAST_NAME`] as the
/// last name.
pub fn split_name(name: &str) -> (String, String) {
    match name.trim().split_once(' ') {
        Some((first, last)) => (first.to_string(), last.trim().to_string()),
        None => (name.trim().to_string(), UNKNOWN_LAST_NAME.to_string()),
    }
}

impl Contact {
    /// Display name used in greetings
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Returns the contact with this email, creating it if needed
    ///
    /// An existing contact is never overwritten by the new name.
    pub async fn get_or_create<'e>(
        executor: impl PgExecutor<'e>,
        data: &NewContact,
    ) -> Result<Self, sqlx::Error> {
        // The no-op update makes RETURNING yield the existing row on conflict.
        sqlx::query_as::<_, Contact>(
            r#"
            INSERT INTO contacts (email, first_name, last_name)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE SET email = EXCLUDED.email
            RETURNING id, email, first_name, last_name, created_at
            "#,
        )
        .bind(&data.email)
        .bind(&data.first_name)
        .bind(&data.last_name)
        .fetch_one(executor)
        .await
    }

    /// Finds a contact by (normalized) email
    pub async fn find_by_email<'e>(
        executor: impl PgExecutor<'e>,
        email: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let Some(email) = normalize_email(email) else {
            return Ok(None);
        };

        sqlx::query_as::<_, Contact>(
            r#"
            SELECT id, email, first_name, last_name, created_at
            FROM contacts
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(executor)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(
            normalize_email("  Ada@Example.ORG "),
            Some("ada@example.org".to_string())
        );
        assert_eq!(normalize_email("   "), None);
    }

    #[test]
    fn test_split_name() {
        assert_eq!(
            split_name("Ada Lovelace"),
            ("Ada".to_string(), "Lovelace".to_string())
        );
        assert_eq!(
            split_name("Ada King Lovelace"),
            ("Ada".to_string(), "King Lovelace".to_string())
        );
        assert_eq!(split_name("Ada"), ("Ada".to_string(), "?".to_string()));
    }

    #[test]
    fn test_full_name() {
        let contact = Contact {
            id: Uuid::new_v4(),
            email: "ada@example.org".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            created_at: Utc::now(),
        };
        assert_eq!(contact.full_name(), "Ada Lovelace");
    }

    #[test]
    fn test_new_contact_rejects_blank_email() {
        assert!(NewContact::from_display_name(" ", "Ada").is_none());
        let contact = NewContact::from_display_name("ADA@example.org", "Ada").unwrap();
        assert_eq!(contact.email, "ada@example.org");
        assert_eq!(contact.last_name, "?");
    }
}
