//! Integration tests for the polling scheduler: status mapping, terminal
//! transitions, transient-failure bounds, and idle shutdown.

mod common;

use std::time::Duration;

use reelgen_core::config::PollProfile;
use reelgen_core::task::TaskStatus;
use reelgen_core::tier::QuotaTier;
use reelgen_engine::ProgressUpdate;
use reelgen_remote::client::RemoteJobStatus;

use common::*;

const WAIT: Duration = Duration::from_secs(3);

fn running(progress_hint: Option<i16>) -> PollResult {
    PollResult::Status(RemoteJobStatus::Running { progress_hint })
}

fn done(url: &str) -> PollResult {
    PollResult::Status(RemoteJobStatus::Done {
        result_url: url.to_string(),
    })
}

/// Drain a subscription until a terminal update arrives.
async fn collect_until_terminal(
    receiver: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressUpdate>,
) -> Vec<ProgressUpdate> {
    let mut updates = Vec::new();
    loop {
        let update = tokio::time::timeout(WAIT, receiver.recv())
            .await
            .expect("timed out waiting for a progress update")
            .expect("broadcaster closed unexpectedly");
        let terminal = update.status.is_terminal();
        updates.push(update);
        if terminal {
            return updates;
        }
    }
}

#[tokio::test]
async fn running_then_done_completes_the_task() {
    let store = MemoryTaskStore::new();
    let client = FakeRemoteClient::new();
    client.script(
        "rj-1",
        vec![
            running(None),
            running(Some(30)),
            running(None),
            done("https://x/video.mp4"),
        ],
    );

    let engine = build_engine(
        store.clone(),
        client.clone(),
        single_tier(7, QuotaTier::Pro),
        test_config(),
    );
    let handle = engine.submit(7, spec()).await.expect("admitted");
    let mut sub = engine.subscribe(handle.task_id);

    let updates = collect_until_terminal(&mut sub.receiver).await;

    // Terminal transition: completed at 100 with the result URL persisted.
    let last = updates.last().unwrap();
    assert_eq!(last.status, TaskStatus::Completed);
    assert_eq!(last.percent, 100);

    let task_id = handle.task_id;
    wait_until("row to complete", WAIT, || {
        store.row(task_id).status_id == TaskStatus::Completed.id()
    })
    .await;

    let row = store.row(task_id);
    assert_eq!(row.progress_percent, 100);
    assert_eq!(row.video_url.as_deref(), Some("https://x/video.mp4"));
    assert!(row.completed_at.is_some());
    assert!(row.polling_attempts >= 4);

    // Deregistered on terminal transition; the loop goes idle.
    assert!(engine.active_tasks().is_empty());
    wait_polling_stopped(&engine, WAIT).await;
}

#[tokio::test]
async fn progress_is_monotonic_across_updates() {
    let store = MemoryTaskStore::new();
    let client = FakeRemoteClient::new();
    client.script(
        "rj-1",
        vec![
            PollResult::Status(RemoteJobStatus::Queued),
            running(None),
            running(None),
            done("https://x/video.mp4"),
        ],
    );

    let engine = build_engine(
        store,
        client,
        single_tier(7, QuotaTier::Pro),
        test_config(),
    );
    let handle = engine.submit(7, spec()).await.expect("admitted");
    let mut sub = engine.subscribe(handle.task_id);

    let updates = collect_until_terminal(&mut sub.receiver).await;
    for pair in updates.windows(2) {
        assert!(
            pair[1].percent >= pair[0].percent,
            "progress regressed: {} -> {}",
            pair[0].percent,
            pair[1].percent
        );
    }
}

#[tokio::test]
async fn late_queued_never_regresses_processing() {
    let store = MemoryTaskStore::new();
    let client = FakeRemoteClient::new();
    client.script(
        "rj-1",
        vec![
            running(None),
            PollResult::Status(RemoteJobStatus::Queued),
            PollResult::Status(RemoteJobStatus::Queued),
            done("https://x/video.mp4"),
        ],
    );

    let engine = build_engine(
        store,
        client,
        single_tier(7, QuotaTier::Pro),
        test_config(),
    );
    let handle = engine.submit(7, spec()).await.expect("admitted");
    let mut sub = engine.subscribe(handle.task_id);

    let updates = collect_until_terminal(&mut sub.receiver).await;
    let mut seen_processing = false;
    for update in &updates {
        if update.status == TaskStatus::Processing {
            seen_processing = true;
        }
        if seen_processing {
            assert_ne!(
                update.status,
                TaskStatus::Pending,
                "status regressed to pending after processing"
            );
        }
    }
    assert!(seen_processing);
}

#[tokio::test]
async fn queued_task_stays_pending_with_queue_ramp() {
    let store = MemoryTaskStore::new();
    let client = FakeRemoteClient::new();
    // No script: every poll reports queued.
    let engine = build_engine(
        store.clone(),
        client,
        single_tier(7, QuotaTier::Pro),
        test_config(),
    );
    let handle = engine.submit(7, spec()).await.expect("admitted");

    let task_id = handle.task_id;
    wait_until("a few queue polls", WAIT, || {
        store.row(task_id).polling_attempts >= 3
    })
    .await;

    let row = store.row(task_id);
    assert_eq!(row.status_id, TaskStatus::Pending.id());
    assert!((5..=10).contains(&row.progress_percent));
    assert!(row.processing_started_at.is_none());

    engine.shutdown().await;
}

#[tokio::test]
async fn remote_progress_hint_raises_the_estimate() {
    let store = MemoryTaskStore::new();
    let client = FakeRemoteClient::new();
    client.script("rj-1", vec![running(Some(90))]);

    let engine = build_engine(
        store.clone(),
        client,
        single_tier(7, QuotaTier::Pro),
        test_config(),
    );
    let handle = engine.submit(7, spec()).await.expect("admitted");

    let task_id = handle.task_id;
    wait_until("hinted progress", WAIT, || {
        store.row(task_id).progress_percent >= 90
    })
    .await;

    engine.shutdown().await;
}

#[tokio::test]
async fn remote_failure_is_terminal_with_reason() {
    let store = MemoryTaskStore::new();
    let client = FakeRemoteClient::new();
    client.script(
        "rj-1",
        vec![
            running(None),
            PollResult::Status(RemoteJobStatus::Failed {
                reason: "content policy violation".to_string(),
            }),
        ],
    );

    let engine = build_engine(
        store.clone(),
        client,
        single_tier(7, QuotaTier::Pro),
        test_config(),
    );
    let handle = engine.submit(7, spec()).await.expect("admitted");

    let task_id = handle.task_id;
    wait_until("row to fail", WAIT, || {
        store.row(task_id).status_id == TaskStatus::Failed.id()
    })
    .await;

    let row = store.row(task_id);
    assert_eq!(
        row.error_message.as_deref(),
        Some("content policy violation")
    );
    // Progress is frozen, not forced to 100.
    assert!(row.progress_percent < 100);
    assert!(engine.active_tasks().is_empty());
    wait_polling_stopped(&engine, WAIT).await;
}

#[tokio::test]
async fn consecutive_poll_failures_past_the_bound_fail_the_task() {
    let store = MemoryTaskStore::new();
    let client = FakeRemoteClient::new();
    // Every poll errors; the bound in test_config is 4.
    client.script("rj-1", vec![PollResult::Error]);

    let engine = build_engine(
        store.clone(),
        client,
        single_tier(7, QuotaTier::Pro),
        test_config(),
    );
    let handle = engine.submit(7, spec()).await.expect("admitted");

    let task_id = handle.task_id;
    wait_until("row to fail after repeated errors", WAIT, || {
        store.row(task_id).status_id == TaskStatus::Failed.id()
    })
    .await;

    let row = store.row(task_id);
    let message = row.error_message.expect("network-error reason recorded");
    assert!(message.contains("5 times in a row"), "message: {message}");
    assert!(row.polling_attempts >= 5);

    // No further polling for it.
    assert!(engine.active_tasks().is_empty());
    wait_polling_stopped(&engine, WAIT).await;
}

#[tokio::test]
async fn vanished_remote_job_fails_immediately() {
    let store = MemoryTaskStore::new();
    let client = FakeRemoteClient::new();
    client.script("rj-1", vec![PollResult::NotFound]);

    let engine = build_engine(
        store.clone(),
        client,
        single_tier(7, QuotaTier::Pro),
        test_config(),
    );
    let handle = engine.submit(7, spec()).await.expect("admitted");

    let task_id = handle.task_id;
    wait_until("row to fail", WAIT, || {
        store.row(task_id).status_id == TaskStatus::Failed.id()
    })
    .await;

    let row = store.row(task_id);
    assert!(row
        .error_message
        .unwrap()
        .contains("no longer exists upstream"));
}

#[tokio::test]
async fn cancelling_a_task_stops_polling_it() {
    let store = MemoryTaskStore::new();
    let client = FakeRemoteClient::new();
    let engine = build_engine(
        store.clone(),
        client,
        single_tier(7, QuotaTier::Pro),
        test_config(),
    );
    let handle = engine.submit(7, spec()).await.expect("admitted");

    engine.cancel_task(handle.task_id).await.expect("cancelled");

    assert!(engine.active_tasks().is_empty());
    assert!(store.row(handle.task_id).removed_at.is_some());
    wait_polling_stopped(&engine, WAIT).await;
}

#[tokio::test]
async fn hidden_profile_suspends_polling() {
    let store = MemoryTaskStore::new();
    let client = FakeRemoteClient::new();
    let engine = build_engine(
        store.clone(),
        client,
        single_tier(7, QuotaTier::Pro),
        test_config(),
    );

    engine.set_poll_profile(PollProfile::Hidden);
    let handle = engine.submit(7, spec()).await.expect("admitted");

    // Give the loop several would-be intervals: no poll must happen.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.row(handle.task_id).polling_attempts, 0);

    // Back to foreground: polling resumes.
    engine.set_poll_profile(PollProfile::Foreground);
    let task_id = handle.task_id;
    wait_until("polling to resume", WAIT, || {
        store.row(task_id).polling_attempts > 0
    })
    .await;

    engine.shutdown().await;
}
