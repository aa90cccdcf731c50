/// Integration tests for the mutual-commitment notifier
///
/// Run with: cargo test --test commitment_tests

mod common;

use chrono::{Duration, Utc};
use common::Harness;
use rallypoint_shared::store::{AttendanceStore, AttendeeFilter, Stamp};
use rallypoint_worker::dispatch::MockDispatcher;
use rallypoint_worker::NotifyError;
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::test]
async fn test_threshold_reached_notifies_conditional_attendees() {
    let h = Harness::new();
    let now = Utc::now();
    let event = h.event_at("forest-walk", now, Duration::days(3));
    let notifier = h.notifier();

    // Asking for more than the threshold; never candidates at 3.
    let picky_a = h.store.attend(event.id, "picky-a@example.org", 5);
    let picky_b = h.store.attend(event.id, "picky-b@example.org", 5);
    let first = h.store.attend(event.id, "first@example.org", 3);
    let second = h.store.attend(event.id, "second@example.org", 3);

    let sent = notifier.evaluate_and_notify_at(&event, 3, now).await.unwrap();
    assert_eq!(sent, 0, "2 candidates < threshold 3");
    assert_eq!(h.dispatcher.batch_count(), 0);

    let third = h.store.attend(event.id, "third@example.org", 3);
    let sent = notifier.evaluate_and_notify_at(&event, 3, now).await.unwrap();
    assert_eq!(sent, 3);
    assert_eq!(h.dispatcher.batch_count(), 1, "one batch per evaluation");

    for attendance in [&first, &second, &third] {
        let attendee = h.store.attendee(attendance.attendee.id).unwrap();
        assert_eq!(attendee.notified, Some(now));
        assert_eq!(attendee.promised, Some(now));
    }
    for attendance in [&picky_a, &picky_b] {
        let attendee = h.store.attendee(attendance.attendee.id).unwrap();
        assert!(attendee.notified.is_none());
        assert!(attendee.promised.is_none());
    }

    let message = &h.dispatcher.sent()[0];
    assert_eq!(message.subject, "[XR] We've got enough to commit to Forest Walk");
    assert!(message.body_text.contains("if at least 3 people also committed"));
}

#[tokio::test]
async fn test_second_evaluation_sends_nothing() {
    let h = Harness::new();
    let now = Utc::now();
    let event = h.event_at("march", now, Duration::days(2));
    let notifier = h.notifier();
    for i in 0..4 {
        h.store.attend(event.id, &format!("p{i}@example.org"), 2);
    }

    assert_eq!(notifier.evaluate_and_notify_at(&event, 2, now).await.unwrap(), 4);
    assert_eq!(notifier.evaluate_and_notify_at(&event, 2, now).await.unwrap(), 0);
    assert_eq!(notifier.evaluate_and_notify(&event, 2).await.unwrap(), 0);
    assert_eq!(h.dispatcher.sent_count(), 4);
}

#[tokio::test]
async fn test_past_event_never_notifies() {
    let h = Harness::new();
    let now = Utc::now();
    let event = h.event_at("yesterday", now, -Duration::hours(1));
    for i in 0..3 {
        h.store.attend(event.id, &format!("p{i}@example.org"), 1);
    }

    for threshold in [0, 1, 3, 100] {
        let sent = h
            .notifier()
            .evaluate_and_notify_at(&event, threshold, now)
            .await
            .unwrap();
        assert_eq!(sent, 0);
    }
    assert_eq!(h.dispatcher.batch_count(), 0);
}

#[tokio::test]
async fn test_unconditional_confirmed_attendees_count_toward_threshold() {
    let h = Harness::new();
    let now = Utc::now();
    let event = h.event_at("teach-in", now, Duration::days(1));

    for i in 0..2 {
        let attendance = h.store.attend(event.id, &format!("solid{i}@example.org"), 0);
        h.store
            .stamp_attendee(attendance.attendee.id, Stamp::confirmed(now - Duration::hours(2)))
            .await
            .unwrap();
    }
    let conditional = h.store.attend(event.id, "maybe@example.org", 3);

    let sent = h.notifier().evaluate_and_notify_at(&event, 3, now).await.unwrap();
    assert_eq!(sent, 1);
    assert_eq!(h.dispatcher.recipients(), vec!["maybe@example.org"]);
    assert!(h.store.attendee(conditional.attendee.id).unwrap().notified.is_some());
}

#[tokio::test]
async fn test_failed_dispatch_leaves_stamps_untouched() {
    let h = Harness::with_dispatcher(MockDispatcher::failing());
    let now = Utc::now();
    let event = h.event_at("march", now, Duration::days(2));
    let attendance = h.store.attend(event.id, "a@example.org", 1);

    let result = h.notifier().evaluate_and_notify_at(&event, 1, now).await;
    assert!(matches!(result, Err(NotifyError::Transport(_))));

    let attendee = h.store.attendee(attendance.attendee.id).unwrap();
    assert!(attendee.notified.is_none());
    assert!(attendee.promised.is_none());
    assert_eq!(h.store.locked_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_evaluations_notify_each_attendee_once() {
    let h = Harness::with_dispatcher(
        MockDispatcher::new().with_delay(tokio::time::Duration::from_millis(50)),
    );
    let now = Utc::now();
    let event = h.event_at("blockade", now, Duration::days(2));
    for i in 0..10 {
        h.store.attend(event.id, &format!("p{i}@example.org"), 2);
    }

    let notifier = Arc::new(h.notifier());
    let (a, b) = tokio::join!(
        {
            let notifier = notifier.clone();
            let event = event.clone();
            tokio::spawn(async move { notifier.evaluate_and_notify_at(&event, 2, now).await })
        },
        {
            let notifier = notifier.clone();
            let event = event.clone();
            tokio::spawn(async move { notifier.evaluate_and_notify_at(&event, 2, now).await })
        },
    );
    let total = a.unwrap().unwrap() + b.unwrap().unwrap();
    assert_eq!(total, 10);

    let recipients = h.dispatcher.recipients();
    let unique: HashSet<_> = recipients.iter().collect();
    assert_eq!(recipients.len(), 10);
    assert_eq!(unique.len(), 10, "an attendee was notified twice");

    let pending = h
        .store
        .count_attendees(event.id, &AttendeeFilter::PendingCommitments { threshold: 2 })
        .await
        .unwrap();
    assert_eq!(pending, 0);
}
