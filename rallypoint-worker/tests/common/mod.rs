//! Shared fixtures for the worker integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use rallypoint_shared::models::{CreateEvent, Event};
use rallypoint_shared::store::MemoryStore;
use rallypoint_worker::attendance::AttendanceService;
use rallypoint_worker::commitment::CommitmentNotifier;
use rallypoint_worker::config::NotifierConfig;
use rallypoint_worker::dispatch::MockDispatcher;
use rallypoint_worker::reminders::ReminderScheduler;
use std::sync::Arc;

pub struct Harness {
    pub store: MemoryStore,
    pub dispatcher: Arc<MockDispatcher>,
    pub config: NotifierConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_dispatcher(MockDispatcher::new())
    }

    pub fn with_dispatcher(dispatcher: MockDispatcher) -> Self {
        Harness {
            store: MemoryStore::new(),
            dispatcher: Arc::new(dispatcher),
            config: NotifierConfig::default(),
        }
    }

    pub fn notifier(&self) -> CommitmentNotifier {
        CommitmentNotifier::new(
            Arc::new(self.store.clone()),
            self.dispatcher.clone(),
            Arc::new(self.config.renderer()),
            &self.config,
        )
    }

    pub fn scheduler(&self) -> ReminderScheduler {
        ReminderScheduler::new(
            Arc::new(self.store.clone()),
            self.dispatcher.clone(),
            Arc::new(self.config.renderer()),
            self.config.clone(),
        )
        .expect("valid scheduler config")
    }

    pub fn service(&self) -> AttendanceService {
        AttendanceService::new(
            Arc::new(self.store.clone()),
            Arc::new(self.notifier()),
            &self.config,
        )
    }

    /// Event starting `offset` after `now`
    pub fn event_at(&self, slug: &str, now: DateTime<Utc>, offset: Duration) -> Event {
        self.store
            .insert_event(CreateEvent::new(&title_case(slug), slug, now + offset))
    }
}

fn title_case(slug: &str) -> String {
    slug.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
