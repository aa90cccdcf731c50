/// Signup write path
///
/// Records a signup and then runs the notification trigger explicitly,
/// right after the write:
///
/// - a confirmed, unconditional first signup gets an RSVP confirmation with
///   the calendar invite
/// - a confirmed signup, or a conditional one not yet notified, re-evaluates
///   the event against that attendee's own commitment threshold
///
/// Notification failures are logged and reported in the outcome; they never
/// fail the signup itself.

use crate::calendar;
use crate::commitment::CommitmentNotifier;
use crate::config::NotifierConfig;
use crate::error::{NotifyError, NotifyResult};
use chrono::{DateTime, Utc};
use rallypoint_shared::models::{Attendance, Signup};
use rallypoint_shared::store::{AttendanceStore, StoreError};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Signup request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[serde(default)]
    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: String,

    #[serde(default)]
    #[validate(length(max = 100, message = "Role must be at most 100 characters"))]
    pub role: String,

    #[serde(default)]
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: String,

    /// "I'm coming"
    #[serde(default)]
    pub promised: bool,

    /// "I'll come if at least this many others commit"; 0 is unconditional
    #[serde(default)]
    #[validate(range(min = 0, max = 10000, message = "Commitment must be between 0 and 10000"))]
    pub mutual_commitment: i32,
}

impl From<SignupRequest> for Signup {
    fn from(request: SignupRequest) -> Self {
        Signup {
            email: request.email,
            name: request.name,
            role: request.role,
            notes: request.notes,
            promised: request.promised,
            mutual_commitment: request.mutual_commitment,
        }
    }
}

/// Result of a signup
#[derive(Debug, Clone)]
pub struct SignupOutcome {
    /// Attendance as recorded, before any notification stamps
    pub attendance: Attendance,

    pub rsvp_sent: bool,

    /// Commitment notices sent because of this signup
    pub commitments_notified: usize,
}

/// Signup service
pub struct AttendanceService {
    store: Arc<dyn AttendanceStore>,
    notifier: Arc<CommitmentNotifier>,
    organizer_email: String,
}

impl AttendanceService {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        notifier: Arc<CommitmentNotifier>,
        config: &NotifierConfig,
    ) -> Self {
        AttendanceService {
            store,
            notifier,
            organizer_email: config.organization_contact_email.clone(),
        }
    }

    /// Records a signup for `event_id` and runs the notification trigger
    ///
    /// # Errors
    ///
    /// - `Validation` for malformed input
    /// - `Store(EventNotFound)` for an unknown event
    /// - `EventFull` when a new attendee would exceed the participant limit
    pub async fn signup(&self, event_id: Uuid, request: SignupRequest) -> NotifyResult<SignupOutcome> {
        self.signup_at(event_id, request, Utc::now()).await
    }

    /// [`Self::signup`] as of `now`
    pub async fn signup_at(
        &self,
        event_id: Uuid,
        request: SignupRequest,
        now: DateTime<Utc>,
    ) -> NotifyResult<SignupOutcome> {
        request
            .validate()
            .map_err(|e| NotifyError::Validation(e.to_string()))?;

        let event = self
            .store
            .find_event(event_id)
            .await?
            .ok_or(StoreError::EventNotFound(event_id))?;

        let signup = Signup::from(request);

        // The cap is enforced inside the store's write, atomically with the insert.
        let attendance = match self.store.record_signup(event.id, &signup, now).await {
            Err(StoreError::EventFull(id)) => {
                tracing::info!(event_id = %id, "Signup rejected, event is full");
                return Err(NotifyError::EventFull(id));
            }
            result => result?,
        };
        let attendee = &attendance.attendee;
        tracing::info!(
            event_id = %event.id,
            attendee_id = %attendee.id,
            promised = attendee.promised.is_some(),
            mutual_commitment = attendee.mutual_commitment,
            "Signup recorded"
        );

        let mut outcome = SignupOutcome {
            attendance: attendance.clone(),
            rsvp_sent: false,
            commitments_notified: 0,
        };

        if signup.promised && !attendee.is_conditional() && attendee.notified.is_none() {
            let url = self.notifier.event_url(&event);
            let organizer = event
                .contact_email
                .as_deref()
                .unwrap_or(&self.organizer_email);
            let invite = calendar::event_invite_at(&event, &url, organizer, now);

            match self.notifier.confirm_rsvp_at(&event, &attendance, invite, now).await {
                Ok(sent) => outcome.rsvp_sent = sent > 0,
                Err(e) => {
                    tracing::error!(attendee_id = %attendee.id, error = %e, "RSVP confirmation failed")
                }
            }
        }

        if attendee.promised.is_some() || (attendee.is_conditional() && attendee.notified.is_none()) {
            match self
                .notifier
                .evaluate_and_notify_at(&event, attendee.mutual_commitment, now)
                .await
            {
                Ok(sent) => outcome.commitments_notified = sent,
                Err(e) => {
                    tracing::error!(event_id = %event.id, error = %e, "Commitment evaluation failed")
                }
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            name: "Ada Lovelace".to_string(),
            role: String::new(),
            notes: String::new(),
            promised: false,
            mutual_commitment: 0,
        }
    }

    #[test]
    fn test_request_validation() {
        assert!(request("ada@example.org").validate().is_ok());
        assert!(request("not-an-email").validate().is_err());

        let mut negative = request("ada@example.org");
        negative.mutual_commitment = -1;
        assert!(negative.validate().is_err());

        let mut long_name = request("ada@example.org");
        long_name.name = "x".repeat(101);
        assert!(long_name.validate().is_err());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: SignupRequest =
            serde_json::from_value(serde_json::json!({ "email": "ada@example.org" })).unwrap();
        assert!(!request.promised);
        assert_eq!(request.mutual_commitment, 0);

        let signup = Signup::from(request);
        assert_eq!(signup.email, "ada@example.org");
    }
}
