mod common;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::*;
use ride_report::error::{NotifyError, StoreError};
use ride_report::models::body_digest;
use ride_report::notify::Notifier;
use ride_report::orchestrator::{Orchestrator, RunOutcome, RunState};
use ride_report::report::ReportGenerator;

#[tokio::test(start_paused = true)]
async fn three_rides_are_delivered_verbatim() {
    let store = Arc::new(ScriptedStore::new(three_rides()));
    let transport = Arc::new(RecordingTransport::new());
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(store.clone(), transport.clone(), sink.clone());

    let result = orch.run(trigger(), &CancellationToken::new()).await;

    assert_eq!(result.outcome, RunOutcome::Delivered);
    assert_eq!(result.terminal_state, RunState::Delivered);
    assert_eq!(result.failed_in, None);
    assert_eq!(result.generation_attempts, 1);
    assert_eq!(result.delivery_attempts, 1);
    assert_eq!(result.report_date.to_string(), "2024-03-04");
    assert_eq!(result.receipt.as_ref().unwrap().token, "msg-1");

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, RECIPIENT);
    assert_eq!(sent[0].subject, "Daily ride report for 2024-03-04");
    assert!(sent[0].body.contains("3 rides"));
    assert_eq!(
        result.artifact_digest.as_deref(),
        Some(body_digest(&sent[0].body).as_str())
    );

    let recorded = sink.results();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].run_id, result.run_id);
}

#[tokio::test(start_paused = true)]
async fn empty_day_still_sends_a_report() {
    let store = Arc::new(ScriptedStore::new(vec![]));
    let transport = Arc::new(RecordingTransport::new());
    let orch = orchestrator(store, transport.clone(), Arc::new(MemorySink::default()));

    let result = orch.run(trigger(), &CancellationToken::new()).await;

    assert!(result.is_delivered());
    assert!(transport.sent()[0].body.contains("0 rides"));
}

#[tokio::test(start_paused = true)]
async fn store_outage_exhausts_generation_attempts() {
    let store = Arc::new(ScriptedStore::new(three_rides()).with_steps(vec![
        StoreStep::Hang,
        StoreStep::Hang,
        StoreStep::Hang,
    ]));
    let transport = Arc::new(RecordingTransport::new());
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(store.clone(), transport.clone(), sink.clone());

    let result = orch.run(trigger(), &CancellationToken::new()).await;

    assert_eq!(result.outcome, RunOutcome::GenerationFailed);
    assert_eq!(result.terminal_state, RunState::Failed);
    assert_eq!(result.failed_in, Some(RunState::Generating));
    assert_eq!(result.generation_attempts, 3);
    assert_eq!(result.delivery_attempts, 0);
    assert!(result.detail.as_deref().unwrap().contains("timed out"));
    assert_eq!(store.calls(), 3);
    assert_eq!(transport.attempts(), 0);
    assert_eq!(sink.results()[0].outcome, RunOutcome::GenerationFailed);
}

#[tokio::test(start_paused = true)]
async fn store_recovers_within_budget() {
    let store = Arc::new(ScriptedStore::new(three_rides()).with_steps(vec![
        StoreStep::Fail(StoreError::Unavailable("connection refused".into())),
        StoreStep::Fail(StoreError::Unavailable("connection refused".into())),
    ]));
    let transport = Arc::new(RecordingTransport::new());
    let orch = orchestrator(store.clone(), transport.clone(), Arc::new(MemorySink::default()));

    let result = orch.run(trigger(), &CancellationToken::new()).await;

    assert!(result.is_delivered());
    assert_eq!(result.generation_attempts, 3);
    assert_eq!(transport.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_rows_are_not_retried() {
    let store = Arc::new(
        ScriptedStore::new(three_rides())
            .with_steps(vec![StoreStep::Rides(vec![ride(1, 8, -30)])]),
    );
    let transport = Arc::new(RecordingTransport::new());
    let orch = orchestrator(store.clone(), transport.clone(), Arc::new(MemorySink::default()));

    let result = orch.run(trigger(), &CancellationToken::new()).await;

    assert_eq!(result.outcome, RunOutcome::GenerationFailed);
    assert_eq!(result.generation_attempts, 1);
    assert_eq!(store.calls(), 1);
    assert_eq!(transport.attempts(), 0);
    assert!(result.artifact_digest.is_none());
}

#[tokio::test(start_paused = true)]
async fn overflowing_durations_fail_the_run_and_are_recorded() {
    let store = Arc::new(ScriptedStore::new(vec![ride(1, 8, i64::MAX), ride(2, 9, 10)]));
    let transport = Arc::new(RecordingTransport::new());
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(store.clone(), transport.clone(), sink.clone());

    let result = orch.run(trigger(), &CancellationToken::new()).await;

    assert_eq!(result.outcome, RunOutcome::GenerationFailed);
    assert_eq!(result.failed_in, Some(RunState::Generating));
    assert_eq!(result.generation_attempts, 1);
    assert!(result.detail.as_deref().unwrap().contains("overflows"));
    assert_eq!(transport.attempts(), 0);
    assert_eq!(sink.results().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_send_failure_is_retried_with_the_same_body() {
    let store = Arc::new(ScriptedStore::new(three_rides()));
    let transport = Arc::new(RecordingTransport::with_steps(vec![SendStep::Fail(
        NotifyError::DeliveryTransient("429 Too Many Requests".into()),
    )]));
    let orch = orchestrator(store.clone(), transport.clone(), Arc::new(MemorySink::default()));

    let result = orch.run(trigger(), &CancellationToken::new()).await;

    assert!(result.is_delivered());
    assert_eq!(result.generation_attempts, 1);
    assert_eq!(result.delivery_attempts, 2);
    assert_eq!(store.calls(), 1, "report must not be regenerated for a resend");
    assert_eq!(
        result.artifact_digest.as_deref(),
        Some(body_digest(&transport.sent()[0].body).as_str())
    );
}

#[tokio::test(start_paused = true)]
async fn rejected_send_is_not_retried() {
    let store = Arc::new(ScriptedStore::new(three_rides()));
    let transport = Arc::new(RecordingTransport::with_steps(vec![SendStep::Fail(
        NotifyError::DeliveryRejected("mailbox does not exist".into()),
    )]));
    let orch = orchestrator(store, transport.clone(), Arc::new(MemorySink::default()));

    let result = orch.run(trigger(), &CancellationToken::new()).await;

    assert_eq!(result.outcome, RunOutcome::DeliveryFailed);
    assert_eq!(result.failed_in, Some(RunState::Notifying));
    assert_eq!(result.delivery_attempts, 1);
    assert_eq!(transport.attempts(), 1);
    assert!(result.receipt.is_none());
    assert!(result.artifact_digest.is_some());
    assert!(result.detail.as_deref().unwrap().contains("mailbox does not exist"));
}

#[tokio::test(start_paused = true)]
async fn persistent_transient_failures_exhaust_delivery_attempts() {
    let store = Arc::new(ScriptedStore::new(three_rides()));
    let transport = Arc::new(RecordingTransport::with_steps(vec![
        SendStep::Hang,
        SendStep::Hang,
        SendStep::Hang,
    ]));
    let orch = orchestrator(store, transport.clone(), Arc::new(MemorySink::default()));

    let result = orch.run(trigger(), &CancellationToken::new()).await;

    assert_eq!(result.outcome, RunOutcome::DeliveryFailed);
    assert_eq!(result.delivery_attempts, 3);
    assert_eq!(transport.attempts(), 3);
    assert!(transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_recipient_fails_without_sending() {
    let store = Arc::new(ScriptedStore::new(three_rides()));
    let transport = Arc::new(RecordingTransport::new());
    let mut settings = settings();
    settings.recipient = "not-an-address".into();
    let timeout = Duration::from_secs(5);
    let orch = Orchestrator::new(
        ReportGenerator::new(store, timeout),
        Notifier::new(transport.clone(), timeout),
        settings,
    );

    let result = orch.run(trigger(), &CancellationToken::new()).await;

    assert_eq!(result.outcome, RunOutcome::DeliveryFailed);
    assert_eq!(result.delivery_attempts, 1);
    assert_eq!(transport.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_sends_nothing() {
    let store = Arc::new(ScriptedStore::new(three_rides()));
    let transport = Arc::new(RecordingTransport::new());
    let orch = orchestrator(store.clone(), transport.clone(), Arc::new(MemorySink::default()));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = orch.run(trigger(), &cancel).await;

    assert_eq!(result.outcome, RunOutcome::Cancelled);
    assert_eq!(result.failed_in, Some(RunState::Generating));
    assert_eq!(result.generation_attempts, 0);
    assert_eq!(result.delivery_attempts, 0);
    assert_eq!(store.calls(), 0);
    assert_eq!(transport.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_while_sending() {
    let store = Arc::new(ScriptedStore::new(three_rides()));
    let transport = Arc::new(RecordingTransport::with_steps(vec![SendStep::Hang]));
    let orch = orchestrator(store, transport.clone(), Arc::new(MemorySink::default()));

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let result = orch.run(trigger(), &cancel).await;

    assert_eq!(result.outcome, RunOutcome::Cancelled);
    assert_eq!(result.failed_in, Some(RunState::Notifying));
    assert_eq!(result.delivery_attempts, 1);
    assert!(transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failing_sink_does_not_change_the_outcome() {
    let store = Arc::new(ScriptedStore::new(three_rides()));
    let transport = Arc::new(RecordingTransport::new());
    let sink = Arc::new(MemorySink::default());
    let orch = orchestrator(store, transport, sink.clone()).with_sink(Arc::new(BrokenSink));

    let result = orch.run(trigger(), &CancellationToken::new()).await;

    assert!(result.is_delivered());
    assert_eq!(sink.results().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn every_run_generates_a_fresh_report() {
    let store = Arc::new(ScriptedStore::new(three_rides()).with_steps(vec![
        StoreStep::Rides(vec![ride(1, 8, 60)]),
        StoreStep::Rides(vec![ride(1, 8, 60), ride(2, 9, 60)]),
    ]));
    let transport = Arc::new(RecordingTransport::new());
    let orch = orchestrator(store.clone(), transport.clone(), Arc::new(MemorySink::default()));

    let first = orch.run(trigger(), &CancellationToken::new()).await;
    let second = orch.run(trigger(), &CancellationToken::new()).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(store.calls(), 2);
    let sent = transport.sent();
    assert!(sent[0].body.contains("1 ride"));
    assert!(sent[1].body.contains("2 rides"));
}
