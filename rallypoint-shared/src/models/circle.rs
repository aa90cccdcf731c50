/// Circle model
///
/// Circles are the organization's working groups. The notifier only uses
/// them as target groups: a circle's public address plus its leads receive
/// membership and outreach notifications.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE circles (
///     id BIGSERIAL PRIMARY KEY,
///     name VARCHAR(255) NOT NULL,
///     public_email VARCHAR(255),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
///
/// CREATE TABLE circle_leads (
///     circle_id BIGINT NOT NULL REFERENCES circles(id) ON DELETE CASCADE,
///     contact_id UUID NOT NULL REFERENCES contacts(id) ON DELETE CASCADE,
///     PRIMARY KEY (circle_id, contact_id)
/// );
/// ```

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::BTreeSet;

/// A working group with the addresses that should hear about it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circle {
    pub id: i64,
    pub name: String,
    pub public_email: Option<String>,
    pub lead_emails: Vec<String>,
}

impl Circle {
    /// Public address plus every lead, deduplicated and sorted
    pub fn notification_addresses(&self) -> Vec<String> {
        let mut addresses = BTreeSet::new();
        if let Some(public) = self.public_email.as_deref().map(str::trim) {
            if !public.is_empty() {
                addresses.insert(public.to_lowercase());
            }
        }
        for lead in &self.lead_emails {
            addresses.insert(lead.to_lowercase());
        }
        addresses.into_iter().collect()
    }

    /// Whether `name` selects this circle (case-insensitive prefix)
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.name.to_lowercase().starts_with(&prefix.to_lowercase())
    }

    /// Newest circle whose name starts with `prefix` (case-insensitive)
    pub async fn find_by_name_prefix(
        pool: &PgPool,
        prefix: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let row: Option<(i64, String, Option<String>)> = sqlx::query_as(
            r#"
            SELECT id, name, public_email
            FROM circles
            WHERE name ILIKE $1 || '%'
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(escape_like(prefix))
        .fetch_optional(pool)
        .await?;

        let Some((id, name, public_email)) = row else {
            return Ok(None);
        };

        let lead_emails: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT c.email
            FROM circle_leads l JOIN contacts c ON c.id = l.contact_id
            WHERE l.circle_id = $1
            ORDER BY c.email
            "#,
        )
        .bind(id)
        .fetch_all(pool)
        .await?;

        Ok(Some(Circle {
            id,
            name,
            public_email,
            lead_emails,
        }))
    }
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
