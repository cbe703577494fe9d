//! CompletionMonitor polling behaviour on a manual clock

mod helpers;

use dsync::completion::CompletionMonitor;
use dsync::models::CompletionVerdict;
use helpers::*;
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(60);
const POLL: Duration = Duration::from_secs(5);

fn monitor(archive: &FakeArchive, clock: &dsync_common::time::ManualClock) -> CompletionMonitor {
    CompletionMonitor::new(Arc::new(archive.clone()), Arc::new(clock.clone()), 3)
}

#[tokio::test]
async fn test_complete_on_first_poll() {
    let archive = FakeArchive::new();
    archive.set_series(LOCAL_AE, "1.1", "1.1.1", 100);
    let clock = test_clock();

    let verdict = monitor(&archive, &clock)
        .wait(&local_node(), "1.1", "1.1.1", 100, TIMEOUT, POLL)
        .await;

    assert_eq!(verdict, CompletionVerdict::Complete { observed: 100 });
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn test_complete_once_count_reaches_expected() {
    let archive = FakeArchive::new();
    archive.script_counts(LOCAL_AE, "1.1", "1.1.1", vec![20, 60, 100]);
    let clock = test_clock();

    let verdict = monitor(&archive, &clock)
        .wait(&local_node(), "1.1", "1.1.1", 100, TIMEOUT, POLL)
        .await;

    assert_eq!(verdict, CompletionVerdict::Complete { observed: 100 });
    assert_eq!(clock.sleeps(), vec![POLL, POLL]);
}

#[tokio::test]
async fn test_settled_count_is_partial() {
    let archive = FakeArchive::new();
    archive.script_counts(LOCAL_AE, "1.1", "1.1.1", vec![10, 50, 80, 80, 80]);
    let clock = test_clock();

    let verdict = monitor(&archive, &clock)
        .wait(&local_node(), "1.1", "1.1.1", 100, TIMEOUT, POLL)
        .await;

    assert_eq!(verdict, CompletionVerdict::Partial { observed: 80 });
    assert!(verdict.is_delivered());
    assert_eq!(clock.sleeps().len(), 4);
}

#[tokio::test]
async fn test_nothing_arriving_is_not_started() {
    let archive = FakeArchive::new();
    let clock = test_clock();

    let verdict = monitor(&archive, &clock)
        .wait(&local_node(), "1.1", "1.1.1", 100, TIMEOUT, POLL)
        .await;

    assert_eq!(verdict, CompletionVerdict::NotStarted);
    assert!(!verdict.is_delivered());
    assert_eq!(clock.sleeps().len(), 2);
}

#[tokio::test]
async fn test_still_rising_at_deadline_times_out() {
    let archive = FakeArchive::new();
    archive.script_counts(LOCAL_AE, "1.1", "1.1.1", (1..=40).collect());
    let clock = test_clock();

    let verdict = monitor(&archive, &clock)
        .wait(&local_node(), "1.1", "1.1.1", 1000, TIMEOUT, POLL)
        .await;

    // Polls at 0s, 5s, ... 60s
    assert_eq!(verdict, CompletionVerdict::TimedOut { observed: 13 });
    assert!(verdict.is_delivered());
    assert_eq!(clock.sleeps().len(), 12);
}

#[tokio::test]
async fn test_failed_polls_run_into_deadline() {
    let archive = FakeArchive::new();
    archive.set_series(LOCAL_AE, "1.1", "1.1.1", 0);
    archive.fail_series_queries(LOCAL_AE, "1.1");
    let clock = test_clock();

    let verdict = monitor(&archive, &clock)
        .wait(&local_node(), "1.1", "1.1.1", 100, TIMEOUT, POLL)
        .await;

    assert_eq!(verdict, CompletionVerdict::TimedOut { observed: 0 });
}

#[tokio::test]
async fn test_stagnation_window_is_configurable() {
    let archive = FakeArchive::new();
    archive.set_series(LOCAL_AE, "1.1", "1.1.1", 30);
    let clock = test_clock();
    let monitor = CompletionMonitor::new(Arc::new(archive.clone()), Arc::new(clock.clone()), 5);

    let verdict = monitor
        .wait(&local_node(), "1.1", "1.1.1", 100, TIMEOUT, POLL)
        .await;

    assert_eq!(verdict, CompletionVerdict::Partial { observed: 30 });
    assert_eq!(clock.sleeps().len(), 4);
}
