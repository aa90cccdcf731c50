/// In-memory attendance store
///
/// Deterministic stand-in for Postgres. It is used by the test suites and by
/// the worker's `--memory` demo mode, and follows the same contract,
/// including claim locking: attendees held by an open claim are skipped by
/// every other claim until it is committed, released or dropped.
///
/// # Example
///
/// ```
/// use rallypoint_shared::models::CreateEvent;
/// use rallypoint_shared::store::MemoryStore;
/// use chrono::{Duration, Utc};
///
/// let store = MemoryStore::new();
/// let event = store.insert_event(CreateEvent::new(
///     "Teach-in",
///     "teach-in",
///     Utc::now() + Duration::days(2),
/// ));
/// let attendance = store.attend(event.id, "ada@example.org", 3);
/// assert_eq!(attendance.attendee.mutual_commitment, 3);
/// ```

use crate::models::contact::split_name;
use crate::models::{
    Attendance, Attendee, Circle, Contact, CreateEvent, Event, NewContact, Signup,
};
use crate::store::{AttendanceStore, AttendeeFilter, NotificationClaim, Stamp, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    events: HashMap<Uuid, Event>,
    contacts: HashMap<Uuid, Contact>,
    attendees: HashMap<Uuid, Attendee>,
    circles: Vec<Circle>,
    /// Attendees held by open claims
    locked: HashSet<Uuid>,
}

impl MemoryState {
    fn attendance(&self, attendee: &Attendee) -> Option<Attendance> {
        let contact = self.contacts.get(&attendee.contact_id)?;
        Some(Attendance::new(attendee.clone(), contact))
    }

    fn matching(&self, event_id: Uuid, filter: &AttendeeFilter) -> Vec<Attendance> {
        let mut rows: Vec<&Attendee> = self
            .attendees
            .values()
            .filter(|a| a.event_id == event_id && filter.matches(a))
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows.into_iter().filter_map(|a| self.attendance(a)).collect()
    }

    fn contact_for(&mut self, data: NewContact, now: DateTime<Utc>) -> Contact {
        if let Some(existing) = self.contacts.values().find(|c| c.email == data.email) {
            return existing.clone();
        }
        let contact = Contact {
            id: Uuid::new_v4(),
            email: data.email,
            first_name: data.first_name,
            last_name: data.last_name,
            created_at: now,
        };
        self.contacts.insert(contact.id, contact.clone());
        contact
    }

    fn apply_stamp(&mut self, id: Uuid, stamp: Stamp) -> bool {
        let Some(attendee) = self.attendees.get_mut(&id) else {
            return false;
        };
        attendee.notified = Some(match attendee.notified {
            Some(previous) if previous > stamp.at => previous,
            _ => stamp.at,
        });
        if stamp.confirm && attendee.promised.is_none() {
            attendee.promised = Some(stamp.at);
        }
        true
    }
}

/// Attendance store held in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event
    pub fn insert_event(&self, data: CreateEvent) -> Event {
        let event = data.into_event(Utc::now());
        lock(&self.state).events.insert(event.id, event.clone());
        event
    }

    /// Replaces an event (organizer edit)
    pub fn update_event(&self, event: Event) {
        lock(&self.state).events.insert(event.id, event);
    }

    /// Finds or creates a contact by email
    pub fn contact(&self, email: &str, name: &str) -> Option<Contact> {
        let data = NewContact::from_display_name(email, name)?;
        Some(lock(&self.state).contact_for(data, Utc::now()))
    }

    /// Adds an attendee with the given commitment, named after the email's
    /// local part
    pub fn attend(&self, event_id: Uuid, email: &str, mutual_commitment: i32) -> Attendance {
        let mut state = lock(&self.state);
        let (first_name, last_name) = split_name(email.split('@').next().unwrap_or(email));
        let data = NewContact {
            email: email.trim().to_lowercase(),
            first_name,
            last_name,
        };
        let contact = state.contact_for(data, Utc::now());
        let attendee = Attendee {
            id: Uuid::new_v4(),
            event_id,
            contact_id: contact.id,
            role: String::new(),
            promised: None,
            notes: String::new(),
            mutual_commitment,
            notified: None,
            created_at: Utc::now(),
        };
        state.attendees.insert(attendee.id, attendee.clone());
        Attendance::new(attendee, &contact)
    }

    /// Overwrites an attendee row as-is (test setup for timestamps)
    pub fn put_attendee(&self, attendee: Attendee) {
        lock(&self.state).attendees.insert(attendee.id, attendee);
    }

    /// Current state of an attendee
    pub fn attendee(&self, id: Uuid) -> Option<Attendee> {
        lock(&self.state).attendees.get(&id).cloned()
    }

    /// Adds a circle
    pub fn insert_circle(&self, circle: Circle) {
        lock(&self.state).circles.push(circle);
    }

    /// Number of attendees currently held by open claims
    pub fn locked_count(&self) -> usize {
        lock(&self.state).locked.len()
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(lock(&self.state).events.get(&id).cloned())
    }

    async fn find_events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>> {
        let state = lock(&self.state);
        let mut events: Vec<Event> = state
            .events
            .values()
            .filter(|e| e.reminders_enabled && e.starts_at >= start && e.starts_at <= end)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.starts_at);
        Ok(events)
    }

    async fn find_attendees(
        &self,
        event_id: Uuid,
        filter: &AttendeeFilter,
    ) -> StoreResult<Vec<Attendance>> {
        Ok(lock(&self.state).matching(event_id, filter))
    }

    async fn count_attendees(&self, event_id: Uuid, filter: &AttendeeFilter) -> StoreResult<i64> {
        let state = lock(&self.state);
        let count = state
            .attendees
            .values()
            .filter(|a| a.event_id == event_id && filter.matches(a))
            .count();
        Ok(count as i64)
    }

    async fn claim_attendees(
        &self,
        event_id: Uuid,
        filter: &AttendeeFilter,
    ) -> StoreResult<Box<dyn NotificationClaim>> {
        let mut state = lock(&self.state);
        let attendees: Vec<Attendance> = state
            .matching(event_id, filter)
            .into_iter()
            .filter(|a| !state.locked.contains(&a.attendee.id))
            .collect();
        for attendance in &attendees {
            state.locked.insert(attendance.attendee.id);
        }

        Ok(Box::new(MemoryClaim {
            state: Arc::clone(&self.state),
            attendees,
            open: true,
        }))
    }

    async fn stamp_attendee(&self, attendee_id: Uuid, stamp: Stamp) -> StoreResult<bool> {
        Ok(lock(&self.state).apply_stamp(attendee_id, stamp))
    }

    async fn record_signup(
        &self,
        event_id: Uuid,
        signup: &Signup,
        now: DateTime<Utc>,
    ) -> StoreResult<Attendance> {
        let data = NewContact::from_display_name(&signup.email, &signup.name)
            .ok_or_else(|| StoreError::InvalidInput("email is required".to_string()))?;
        if signup.mutual_commitment < 0 {
            return Err(StoreError::InvalidInput(
                "mutual_commitment must be >= 0".to_string(),
            ));
        }

        let mut state = lock(&self.state);
        let event = state
            .events
            .get(&event_id)
            .cloned()
            .ok_or(StoreError::EventNotFound(event_id))?;

        if event.max_participants > 0 {
            let known = state
                .contacts
                .values()
                .find(|c| c.email == data.email)
                .map(|c| c.id);
            let rows: Vec<&Attendee> = state
                .attendees
                .values()
                .filter(|a| a.event_id == event_id)
                .collect();
            let returning = rows
                .iter()
                .any(|a| Some(a.contact_id) == known && a.role == signup.role);
            if !returning && event.is_full(rows.len() as i64) {
                return Err(StoreError::EventFull(event_id));
            }
        }

        let contact = state.contact_for(data, now);

        let existing = state
            .attendees
            .values_mut()
            .find(|a| a.event_id == event_id && a.contact_id == contact.id && a.role == signup.role);

        let attendee = match existing {
            Some(attendee) => {
                if !signup.notes.is_empty() {
                    attendee.notes = signup.notes.clone();
                }
                if signup.promised && attendee.promised.is_none() {
                    attendee.promised = Some(now);
                }
                attendee.clone()
            }
            None => {
                let attendee = Attendee {
                    id: Uuid::new_v4(),
                    event_id,
                    contact_id: contact.id,
                    role: signup.role.clone(),
                    promised: signup.promised.then_some(now),
                    notes: signup.notes.clone(),
                    mutual_commitment: signup.mutual_commitment,
                    notified: None,
                    created_at: now,
                };
                state.attendees.insert(attendee.id, attendee.clone());
                attendee
            }
        };

        Ok(Attendance::new(attendee, &contact))
    }

    async fn find_circle(&self, prefix: &str) -> StoreResult<Option<Circle>> {
        let state = lock(&self.state);
        Ok(state
            .circles
            .iter()
            .filter(|c| c.matches_prefix(prefix))
            .max_by_key(|c| c.id)
            .cloned())
    }
}

struct MemoryClaim {
    state: Arc<Mutex<MemoryState>>,
    attendees: Vec<Attendance>,
    open: bool,
}

impl MemoryClaim {
    fn unlock(&mut self, state: &mut MemoryState) {
        for attendance in &self.attendees {
            state.locked.remove(&attendance.attendee.id);
        }
        self.open = false;
    }
}

#[async_trait]
impl NotificationClaim for MemoryClaim {
    fn attendees(&self) -> &[Attendance] {
        &self.attendees
    }

    async fn commit(mut self: Box<Self>, ids: &[Uuid], stamp: Stamp) -> StoreResult<u64> {
        let state_handle = Arc::clone(&self.state);
        let mut state = lock(&state_handle);

        let claimed: HashSet<Uuid> = self.attendees.iter().map(|a| a.attendee.id).collect();
        let mut updated = 0;
        for id in ids.iter().filter(|id| claimed.contains(id)) {
            if state.apply_stamp(*id, stamp) {
                updated += 1;
            }
        }

        self.unlock(&mut state);
        Ok(updated)
    }

    async fn release(mut self: Box<Self>) -> StoreResult<()> {
        let state_handle = Arc::clone(&self.state);
        let mut state = lock(&state_handle);
        self.unlock(&mut state);
        Ok(())
    }
}

impl Drop for MemoryClaim {
    fn drop(&mut self) {
        if self.open {
            let state_handle = Arc::clone(&self.state);
            let mut state = lock(&state_handle);
            self.unlock(&mut state);
        }
    }
}
