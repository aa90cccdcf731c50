/// Mutual-commitment notifier
///
/// Attendees can sign up conditionally: "I'll come if at least N others
/// commit". Whenever a signup may have tipped an event over someone's
/// threshold, [`CommitmentNotifier::evaluate_and_notify`] checks the event
/// against that threshold and tells every conditional attendee whose
/// condition is now met, exactly once.
///
/// # Flow
///
/// ```text
/// evaluate_and_notify(event, threshold)
///   ├─> event already started?            -> 0
///   ├─> candidates < threshold?           -> 0
///   ├─> claim pending conditional rows    (locked; concurrent callers skip them)
///   ├─> render one message per attendee
///   ├─> send_batch                        (failure: release, nothing stamped)
///   └─> commit notified = promised = now
/// ```
///
/// Candidates are attendees confirmed unconditionally, plus anyone whose own
/// threshold is at most `threshold`.

use crate::config::NotifierConfig;
use crate::dispatch::{Attachment, Dispatcher, OutboundMessage};
use crate::error::{NotifyError, NotifyResult};
use crate::release_claim;
use crate::render::{MessageRenderer, RenderContext, RenderResult, Template};
use chrono::{DateTime, Utc};
use rallypoint_shared::models::{Attendance, Event};
use rallypoint_shared::store::{AttendanceStore, AttendeeFilter, Stamp};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Commitment and RSVP notifier
pub struct CommitmentNotifier {
    store: Arc<dyn AttendanceStore>,
    dispatcher: Arc<dyn Dispatcher>,
    renderer: Arc<dyn MessageRenderer>,
    from_email: String,
    base_url: String,
}

impl CommitmentNotifier {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        dispatcher: Arc<dyn Dispatcher>,
        renderer: Arc<dyn MessageRenderer>,
        config: &NotifierConfig,
    ) -> Self {
        CommitmentNotifier {
            store,
            dispatcher,
            renderer,
            from_email: config.from_email.clone(),
            base_url: config.base_url.clone(),
        }
    }

    /// Absolute link to the event page
    pub fn event_url(&self, event: &Event) -> String {
        event.url(&self.base_url)
    }

    /// Notifies conditional attendees of `event` whose threshold is met
    ///
    /// Returns the number of messages sent. Calling it again with nothing
    /// changed sends nothing.
    ///
    /// # Errors
    ///
    /// Store, render and transport failures. On any of them no attendee is
    /// stamped, so a later call retries the same people.
    pub async fn evaluate_and_notify(&self, event: &Event, threshold: i32) -> NotifyResult<usize> {
        self.evaluate_and_notify_at(event, threshold, Utc::now()).await
    }

    /// [`Self::evaluate_and_notify`] as of `now`
    pub async fn evaluate_and_notify_at(
        &self,
        event: &Event,
        threshold: i32,
        now: DateTime<Utc>,
    ) -> NotifyResult<usize> {
        if event.has_started(now) {
            tracing::debug!(event_id = %event.id, "Event already started, skipping commitments");
            return Ok(0);
        }

        let candidates = self
            .store
            .count_attendees(event.id, &AttendeeFilter::CommitmentCandidates { threshold })
            .await?;
        if candidates < i64::from(threshold) {
            tracing::debug!(
                event_id = %event.id,
                threshold,
                candidates,
                "Commitment threshold not met"
            );
            return Ok(0);
        }

        let claim = self
            .store
            .claim_attendees(event.id, &AttendeeFilter::PendingCommitments { threshold })
            .await?;
        if claim.attendees().is_empty() {
            release_claim(claim).await;
            return Ok(0);
        }

        let (ids, messages) = match self.commitment_messages(event, claim.attendees()) {
            Ok(rendered) => rendered,
            Err(e) => {
                release_claim(claim).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.dispatcher.send_batch(messages).await {
            tracing::warn!(event_id = %event.id, error = %e, "Commitment batch failed");
            release_claim(claim).await;
            return Err(NotifyError::Transport(e));
        }

        let stamped = claim.commit(&ids, Stamp::confirmed(now)).await?;
        tracing::info!(
            event_id = %event.id,
            threshold,
            sent = ids.len(),
            stamped,
            "Commitment notifications sent"
        );

        Ok(ids.len())
    }

    fn commitment_messages(
        &self,
        event: &Event,
        attendees: &[Attendance],
    ) -> RenderResult<(Vec<Uuid>, Vec<OutboundMessage>)> {
        let url = self.event_url(event);
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut messages = Vec::new();

        for attendance in attendees {
            if !seen.insert(attendance.attendee.id) {
                continue;
            }
            let context = RenderContext::for_event(event, &url).recipient(attendance);
            let rendered = self.renderer.render(Template::CommitmentReached, &context)?;
            messages.push(rendered.into_message(&self.from_email, vec![attendance.email.clone()]));
            ids.push(attendance.attendee.id);
        }

        Ok((ids, messages))
    }

    /// Sends a signup confirmation with the calendar invite attached
    ///
    /// Returns 1 when sent, 0 for an event that already started. The
    /// attendee is stamped notified and confirmed only after the send.
    pub async fn confirm_rsvp(
        &self,
        event: &Event,
        attendance: &Attendance,
        invite: Attachment,
    ) -> NotifyResult<usize> {
        self.confirm_rsvp_at(event, attendance, invite, Utc::now()).await
    }

    /// [`Self::confirm_rsvp`] as of `now`
    pub async fn confirm_rsvp_at(
        &self,
        event: &Event,
        attendance: &Attendance,
        invite: Attachment,
        now: DateTime<Utc>,
    ) -> NotifyResult<usize> {
        if event.has_started(now) {
            return Ok(0);
        }

        let context = RenderContext::for_event(event, &self.event_url(event)).recipient(attendance);
        let message = self
            .renderer
            .render(Template::RsvpConfirmation, &context)?
            .into_message(&self.from_email, vec![attendance.email.clone()])
            .with_attachment(invite);

        self.dispatcher.send_batch(vec![message]).await?;
        self.store
            .stamp_attendee(attendance.attendee.id, Stamp::confirmed(now))
            .await?;

        tracing::info!(
            event_id = %event.id,
            attendee_id = %attendance.attendee.id,
            "RSVP confirmation sent"
        );
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar;
    use crate::dispatch::MockDispatcher;
    use crate::render::BuiltinRenderer;
    use chrono::Duration;
    use rallypoint_shared::models::CreateEvent;
    use rallypoint_shared::store::MemoryStore;

    fn notifier(store: &MemoryStore, dispatcher: &Arc<MockDispatcher>) -> CommitmentNotifier {
        CommitmentNotifier::new(
            Arc::new(store.clone()),
            dispatcher.clone(),
            Arc::new(BuiltinRenderer::default()),
            &NotifierConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_threshold_not_met_sends_nothing() {
        let store = MemoryStore::new();
        let dispatcher = Arc::new(MockDispatcher::new());
        let event = store.insert_event(CreateEvent::new(
            "March",
            "march",
            Utc::now() + Duration::days(2),
        ));
        store.attend(event.id, "a@example.org", 3);
        store.attend(event.id, "b@example.org", 3);

        let sent = notifier(&store, &dispatcher)
            .evaluate_and_notify(&event, 3)
            .await
            .unwrap();
        assert_eq!(sent, 0);
        assert_eq!(dispatcher.batch_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_stamps_nothing() {
        let store = MemoryStore::new();
        let dispatcher = Arc::new(MockDispatcher::failing());
        let event = store.insert_event(CreateEvent::new(
            "March",
            "march",
            Utc::now() + Duration::days(2),
        ));
        let a = store.attend(event.id, "a@example.org", 1);
        store.attend(event.id, "b@example.org", 1);

        let notifier = notifier(&store, &dispatcher);
        let result = notifier.evaluate_and_notify(&event, 1).await;
        assert!(matches!(result, Err(NotifyError::Transport(_))));
        assert!(store.attendee(a.attendee.id).unwrap().notified.is_none());
        assert_eq!(store.locked_count(), 0);

        // Retried once the transport recovers.
        dispatcher.set_failing(false);
        assert_eq!(notifier.evaluate_and_notify(&event, 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rsvp_attaches_invite_and_stamps() {
        let store = MemoryStore::new();
        let dispatcher = Arc::new(MockDispatcher::new());
        let event = store.insert_event(CreateEvent::new(
            "March",
            "march",
            Utc::now() + Duration::days(2),
        ));
        let attendance = store.attend(event.id, "a@example.org", 0);
        let notifier = notifier(&store, &dispatcher);
        let invite = calendar::event_invite(&event, &notifier.event_url(&event), "info@example.org");

        let sent = notifier.confirm_rsvp(&event, &attendance, invite).await.unwrap();
        assert_eq!(sent, 1);

        let message = &dispatcher.sent()[0];
        assert_eq!(message.subject, "[XR] RSVP confirmation for March");
        assert_eq!(message.attachments[0].filename, "march.ics");
        assert_eq!(message.attachments[0].content_type, "text/calendar");

        let attendee = store.attendee(attendance.attendee.id).unwrap();
        assert!(attendee.notified.is_some());
        assert!(attendee.promised.is_some());
    }

    #[tokio::test]
    async fn test_rsvp_skips_started_event() {
        let store = MemoryStore::new();
        let dispatcher = Arc::new(MockDispatcher::new());
        let event = store.insert_event(CreateEvent::new(
            "March",
            "march",
            Utc::now() - Duration::hours(1),
        ));
        let attendance = store.attend(event.id, "a@example.org", 0);
        let invite = calendar::event_invite(&event, "https://example.org", "");

        let sent = notifier(&store, &dispatcher)
            .confirm_rsvp(&event, &attendance, invite)
            .await
            .unwrap();
        assert_eq!(sent, 0);
        assert!(store.attendee(attendance.attendee.id).unwrap().notified.is_none());
    }
}
