/// Reminder scheduler
///
/// Long-running poller that reminds attendees of upcoming events. Every
/// `poll_interval` it runs one tick:
///
/// ```text
/// tick(now)
///   for window in [NextDay (26h ±30m), StartingSoon (2h ±30m)]:
///     for event starting in [now + lead - tol, now + lead + tol]:
///       claim attendees not notified since now - renotify_floor
///       ├─> drop attendees already reminded this tick
///       ├─> drop addresses outside the allow-list (not stamped)
///       ├─> one message per distinct address (text + HTML)
///       ├─> send_batch
///       └─> commit notified = now   (release on any failure)
/// ```
///
/// # Cadence
///
/// A window is `2 * tolerance` wide, so as long as the poll interval is no
/// longer than that every event is seen by at least one tick per window.
/// Shorter intervals see an event on several consecutive ticks; the
/// re-notify floor keeps those from producing more than one reminder.
///
/// The floor must also let an attendee back in for the next window. The
/// first tick clearing it after a next-day reminder has to fall inside the
/// starting-soon window. With a 24h floor some intervals that do not divide
/// 24h (55 minutes, say) overshoot it; configuration validation rejects them.
///
/// # Failure Isolation
///
/// Each event is claimed, sent and stamped on its own. A failure for one
/// event releases that event's claim, is logged and recorded in the
/// [`TickReport`], and the tick moves on.

use crate::config::{ConfigError, NotifierConfig};
use crate::dispatch::{Dispatcher, OutboundMessage};
use crate::error::{NotifyError, NotifyResult};
use crate::release_claim;
use crate::render::{MessageRenderer, RenderContext, RenderResult, Template};
use chrono::{DateTime, Duration, Utc};
use rallypoint_shared::models::{Attendance, Event};
use rallypoint_shared::store::{AttendanceStore, AttendeeFilter, Stamp};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Named reminder windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    NextDay,
    StartingSoon,
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowKind::NextDay => write!(f, "next_day"),
            WindowKind::StartingSoon => write!(f, "starting_soon"),
        }
    }
}

impl WindowKind {
    pub fn template(&self) -> Template {
        match self {
            WindowKind::NextDay => Template::ReminderNextDay,
            WindowKind::StartingSoon => Template::ReminderStartingSoon,
        }
    }
}

/// Lookahead window: events starting `lead ± tolerance` from now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderWindow {
    pub kind: WindowKind,
    pub lead: Duration,
    pub tolerance: Duration,
}

impl ReminderWindow {
    pub fn new(kind: WindowKind, lead: Duration, tolerance: Duration) -> Self {
        ReminderWindow {
            kind,
            lead,
            tolerance,
        }
    }

    /// 26 hours ahead, ±30 minutes
    pub fn next_day() -> Self {
        Self::new(WindowKind::NextDay, Duration::hours(26), Duration::minutes(30))
    }

    /// 2 hours ahead, ±30 minutes
    pub fn starting_soon() -> Self {
        Self::new(
            WindowKind::StartingSoon,
            Duration::hours(2),
            Duration::minutes(30),
        )
    }

    /// Inclusive start-time range covered at `now`
    pub fn range(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let center = now + self.lead;
        (center - self.tolerance, center + self.tolerance)
    }
}

/// Allow-list gate for reminder recipients
///
/// Exists so staging deployments can run the poller against real data
/// without mailing everyone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientPolicy {
    AllowAll,
    AllowList(HashSet<String>),
}

impl RecipientPolicy {
    /// `*` or blank allows everyone; otherwise a comma-separated list
    pub fn parse(raw: &str) -> Self {
        let entries: HashSet<String> = raw
            .split(',')
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        if entries.is_empty() || entries.contains("*") {
            RecipientPolicy::AllowAll
        } else {
            RecipientPolicy::AllowList(entries)
        }
    }

    pub fn allows(&self, email: &str) -> bool {
        match self {
            RecipientPolicy::AllowAll => true,
            RecipientPolicy::AllowList(allowed) => allowed.contains(&email.trim().to_lowercase()),
        }
    }
}

/// Outcome for one event in one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventReport {
    pub event_id: Uuid,
    pub window: WindowKind,

    /// Messages handed to the dispatcher
    pub sent: usize,

    /// Attendees stamped as notified
    pub stamped: usize,

    /// Attendees skipped by the allow-list
    pub blocked: usize,

    /// Failure for this event, if any
    ///
    /// With `sent == 0` nothing went out and nothing was stamped. With
    /// `sent > 0` the batch was delivered but the stamps were not persisted,
    /// so the next tick may repeat it.
    pub error: Option<String>,
}

/// Outcome of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub events: Vec<EventReport>,

    /// Windows whose event lookup failed
    pub window_errors: Vec<(WindowKind, String)>,
}

impl TickReport {
    fn new(at: DateTime<Utc>) -> Self {
        TickReport {
            at,
            events: Vec::new(),
            window_errors: Vec::new(),
        }
    }

    pub fn total_sent(&self) -> usize {
        self.events.iter().map(|e| e.sent).sum()
    }

    pub fn sent_for(&self, window: WindowKind) -> usize {
        self.events
            .iter()
            .filter(|e| e.window == window)
            .map(|e| e.sent)
            .sum()
    }

    pub fn sent_for_event(&self, event_id: Uuid) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_id == event_id)
            .map(|e| e.sent)
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.events.iter().filter(|e| e.error.is_some()).count() + self.window_errors.len()
    }
}

#[derive(Debug, Default)]
struct EventOutcome {
    sent: usize,
    stamped: usize,
    blocked: usize,

    /// Commit failure after a successful send
    unstamped: Option<String>,
}

struct ReminderPlan {
    ids: Vec<Uuid>,
    messages: Vec<OutboundMessage>,
    blocked: usize,
}

/// Reminder scheduler
pub struct ReminderScheduler {
    store: Arc<dyn AttendanceStore>,
    dispatcher: Arc<dyn Dispatcher>,
    renderer: Arc<dyn MessageRenderer>,
    config: NotifierConfig,
}

impl ReminderScheduler {
    /// Creates a scheduler
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, including a poll
    /// interval longer than twice any window's tolerance.
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        dispatcher: Arc<dyn Dispatcher>,
        renderer: Arc<dyn MessageRenderer>,
        config: NotifierConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(ReminderScheduler {
            store,
            dispatcher,
            renderer,
            config,
        })
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Runs the poll loop until `shutdown` is cancelled
    ///
    /// Sleeps first, then ticks. Cancellation interrupts the sleep; a tick
    /// in progress is finished before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            store = %self.store.name(),
            dispatcher = %self.dispatcher.name(),
            "Reminder scheduler starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.config.poll_interval) => {}
            }

            let report = self.tick().await;
            tracing::info!(
                sent = report.total_sent(),
                events = report.events.len(),
                failures = report.failures(),
                "Reminder tick complete"
            );
        }

        tracing::info!("Reminder scheduler stopped");
    }

    /// Runs one tick at the current time
    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    /// Runs one tick as of `now`
    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::new(now);
        let mut reminded: HashSet<Uuid> = HashSet::new();

        for window in &self.config.windows {
            let (start, end) = window.range(now);
            tracing::debug!(window = %window.kind, %start, %end, "Looking for events");

            let events = match self.store.find_events_in_range(start, end).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!(window = %window.kind, error = %e, "Failed to load events");
                    report.window_errors.push((window.kind, e.to_string()));
                    continue;
                }
            };

            if events.is_empty() {
                tracing::debug!(window = %window.kind, "No upcoming events");
            }

            for event in events {
                let entry = match self.remind_event(&event, window, now, &mut reminded).await {
                    Ok(outcome) => {
                        if outcome.sent > 0 && outcome.unstamped.is_none() {
                            tracing::info!(
                                event_id = %event.id,
                                event = %event.text_title(),
                                window = %window.kind,
                                sent = outcome.sent,
                                blocked = outcome.blocked,
                                "Sent reminders"
                            );
                        }
                        EventReport {
                            event_id: event.id,
                            window: window.kind,
                            sent: outcome.sent,
                            stamped: outcome.stamped,
                            blocked: outcome.blocked,
                            error: outcome.unstamped,
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            event_id = %event.id,
                            window = %window.kind,
                            error = %e,
                            "Failed to send reminders"
                        );
                        EventReport {
                            event_id: event.id,
                            window: window.kind,
                            sent: 0,
                            stamped: 0,
                            blocked: 0,
                            error: Some(e.to_string()),
                        }
                    }
                };
                report.events.push(entry);
            }
        }

        report
    }

    async fn remind_event(
        &self,
        event: &Event,
        window: &ReminderWindow,
        now: DateTime<Utc>,
        reminded: &mut HashSet<Uuid>,
    ) -> NotifyResult<EventOutcome> {
        let filter = AttendeeFilter::DueForReminder {
            stale_before: now - self.config.renotify_floor,
        };
        let claim = self.store.claim_attendees(event.id, &filter).await?;

        if claim.attendees().is_empty() {
            tracing::debug!(event_id = %event.id, "No attendees to remind");
            release_claim(claim).await;
            return Ok(EventOutcome::default());
        }

        let plan = match self.plan(event, window.kind, claim.attendees(), reminded) {
            Ok(plan) => plan,
            Err(e) => {
                release_claim(claim).await;
                return Err(e.into());
            }
        };

        if plan.messages.is_empty() {
            release_claim(claim).await;
            return Ok(EventOutcome {
                blocked: plan.blocked,
                ..Default::default()
            });
        }

        let sent = match self.dispatcher.send_batch(plan.messages).await {
            Ok(sent) => sent,
            Err(e) => {
                release_claim(claim).await;
                return Err(NotifyError::Transport(e));
            }
        };

        // Later windows in this tick must not resend, stamped or not.
        reminded.extend(plan.ids.iter().copied());

        match claim.commit(&plan.ids, Stamp::notified(now)).await {
            Ok(stamped) => Ok(EventOutcome {
                sent,
                stamped: stamped as usize,
                blocked: plan.blocked,
                unstamped: None,
            }),
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    window = %window.kind,
                    sent,
                    error = %e,
                    "Reminders sent but not stamped, next tick may repeat them"
                );
                Ok(EventOutcome {
                    sent,
                    stamped: 0,
                    blocked: plan.blocked,
                    unstamped: Some(e.to_string()),
                })
            }
        }
    }

    fn plan(
        &self,
        event: &Event,
        kind: WindowKind,
        attendees: &[Attendance],
        reminded: &HashSet<Uuid>,
    ) -> RenderResult<ReminderPlan> {
        let url = event.url(&self.config.base_url);
        let mut plan = ReminderPlan {
            ids: Vec::new(),
            messages: Vec::new(),
            blocked: 0,
        };
        let mut addresses: HashSet<String> = HashSet::new();

        for attendance in attendees {
            if reminded.contains(&attendance.attendee.id) {
                continue;
            }
            if !self.config.recipients.allows(&attendance.email) {
                tracing::debug!(email = %attendance.email, "Recipient not on allow-list");
                plan.blocked += 1;
                continue;
            }

            // Same address under several roles gets one message; every row is stamped.
            plan.ids.push(attendance.attendee.id);
            if !addresses.insert(attendance.email.to_lowercase()) {
                continue;
            }

            let context = RenderContext::for_event(event, &url).recipient(attendance);
            let rendered = self.renderer.render(kind.template(), &context)?;
            plan.messages.push(
                rendered.into_message(&self.config.from_email, vec![attendance.email.clone()]),
            );
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::MockDispatcher;
    use crate::render::BuiltinRenderer;
    use rallypoint_shared::models::CreateEvent;
    use rallypoint_shared::store::MemoryStore;

    fn scheduler(
        store: &MemoryStore,
        dispatcher: &Arc<MockDispatcher>,
        config: NotifierConfig,
    ) -> ReminderScheduler {
        ReminderScheduler::new(
            Arc::new(store.clone()),
            dispatcher.clone(),
            Arc::new(BuiltinRenderer::default()),
            config,
        )
        .unwrap()
    }

    #[test]
    fn test_window_range_inclusive_bounds() {
        let now = Utc::now();
        let (start, end) = ReminderWindow::next_day().range(now);
        assert_eq!(start, now + Duration::minutes(26 * 60 - 30));
        assert_eq!(end, now + Duration::minutes(26 * 60 + 30));
    }

    #[test]
    fn test_recipient_policy() {
        assert_eq!(RecipientPolicy::parse("*"), RecipientPolicy::AllowAll);
        assert_eq!(RecipientPolicy::parse("  "), RecipientPolicy::AllowAll);

        let policy = RecipientPolicy::parse("Ada@example.org,grace@example.org");
        assert!(policy.allows("ADA@example.org "));
        assert!(!policy.allows("eve@example.org"));
    }

    #[test]
    fn test_rejects_coarse_poll_interval() {
        let config = NotifierConfig {
            poll_interval: std::time::Duration::from_secs(2 * 3600),
            ..Default::default()
        };
        let result = ReminderScheduler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MockDispatcher::new()),
            Arc::new(BuiltinRenderer::default()),
            config,
        );
        assert!(matches!(result, Err(ConfigError::PollExceedsWindow { .. })));
    }

    #[tokio::test]
    async fn test_same_address_gets_one_message() {
        let store = MemoryStore::new();
        let dispatcher = Arc::new(MockDispatcher::new());
        let now = Utc::now();
        let event = store.insert_event(CreateEvent::new(
            "Vigil",
            "vigil",
            now + Duration::hours(26),
        ));
        let first = store.attend(event.id, "ada@example.org", 0);
        let mut marshal = first.attendee.clone();
        marshal.id = Uuid::new_v4();
        marshal.role = "marshal".to_string();
        store.put_attendee(marshal.clone());

        let report = scheduler(&store, &dispatcher, NotifierConfig::default())
            .tick_at(now)
            .await;

        assert_eq!(report.total_sent(), 1);
        assert_eq!(report.events[0].stamped, 2);
        assert!(store.attendee(marshal.id).unwrap().notified.is_some());
    }

    #[tokio::test]
    async fn test_blocked_attendees_are_not_stamped() {
        let store = MemoryStore::new();
        let dispatcher = Arc::new(MockDispatcher::new());
        let now = Utc::now();
        let event = store.insert_event(CreateEvent::new(
            "Vigil",
            "vigil",
            now + Duration::hours(2),
        ));
        let allowed = store.attend(event.id, "ada@example.org", 0);
        let blocked = store.attend(event.id, "eve@example.org", 0);

        let config = NotifierConfig {
            recipients: RecipientPolicy::parse("ada@example.org"),
            ..Default::default()
        };
        let report = scheduler(&store, &dispatcher, config).tick_at(now).await;

        assert_eq!(report.sent_for(WindowKind::StartingSoon), 1);
        assert_eq!(report.events[0].blocked, 1);
        assert_eq!(dispatcher.recipients(), vec!["ada@example.org"]);
        assert!(store.attendee(allowed.attendee.id).unwrap().notified.is_some());
        assert!(store.attendee(blocked.attendee.id).unwrap().notified.is_none());
        assert_eq!(store.locked_count(), 0);
    }

    #[tokio::test]
    async fn test_reminders_carry_html() {
        let store = MemoryStore::new();
        let dispatcher = Arc::new(MockDispatcher::new());
        let now = Utc::now();
        let event = store.insert_event(CreateEvent::new(
            "Vigil",
            "vigil",
            now + Duration::hours(26),
        ));
        store.attend(event.id, "ada@example.org", 0);

        scheduler(&store, &dispatcher, NotifierConfig::default())
            .tick_at(now)
            .await;

        let sent = dispatcher.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body_html.is_some());
        assert!(sent[0].body_text.contains("/action/vigil"));
    }
}
