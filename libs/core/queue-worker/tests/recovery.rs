//! Supervised-restart tests driven with a paused clock, so the 5 s / 10 s
//! / 20 s backoff sequence is observed in virtual time.

use std::time::Duration;

use messaging::{MessagingSettings, NoOpConsumer};
use queue_worker::{InMemoryBroker, ProcessorHealth, QueueWorker};
use tokio::sync::watch;

fn settings() -> MessagingSettings {
    MessagingSettings::new("orders", "inmemory://local")
}

async fn wait_for_health(
    health: &mut watch::Receiver<ProcessorHealth>,
    target: ProcessorHealth,
) {
    health
        .wait_for(|state| *state == target)
        .await
        .expect("health channel closed");
}

#[tokio::test(start_paused = true)]
async fn restart_backoff_doubles_until_success() {
    let broker = InMemoryBroker::new();

    let worker = QueueWorker::<serde_json::Value, _>::new(
        Box::new(broker.clone()),
        settings(),
        || NoOpConsumer,
    )
    .await
    .unwrap();
    let mut health = worker.health();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    wait_for_health(&mut health, ProcessorHealth::Running).await;
    assert_eq!(broker.start_attempts(), 1);

    // Two restarts fail, the third succeeds: delays 5 s + 10 s + 20 s.
    broker.fail_next_starts(2);
    let faulted_at = tokio::time::Instant::now();
    broker.fault("link detached").await;

    wait_for_health(&mut health, ProcessorHealth::Restarting).await;
    wait_for_health(&mut health, ProcessorHealth::Running).await;

    let elapsed = faulted_at.elapsed();
    assert!(
        elapsed >= Duration::from_secs(35) && elapsed < Duration::from_secs(36),
        "expected ~35s of backoff, observed {elapsed:?}"
    );
    assert_eq!(broker.start_attempts(), 4);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_stops_until_next_error_event() {
    let broker = InMemoryBroker::new();

    let worker = QueueWorker::<serde_json::Value, _>::new(
        Box::new(broker.clone()),
        settings(),
        || NoOpConsumer,
    )
    .await
    .unwrap();
    let mut health = worker.health();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    wait_for_health(&mut health, ProcessorHealth::Running).await;

    broker.fail_next_starts(3);
    let faulted_at = tokio::time::Instant::now();
    broker.fault("link detached").await;

    wait_for_health(&mut health, ProcessorHealth::TerminallyFailed).await;
    let elapsed = faulted_at.elapsed();
    assert!(
        elapsed >= Duration::from_secs(35) && elapsed < Duration::from_secs(36),
        "expected ~35s before giving up, observed {elapsed:?}"
    );
    assert_eq!(broker.start_attempts(), 4);

    // No self-scheduled recovery past the budget.
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(broker.start_attempts(), 4);

    // A fresh error event grants a fresh budget.
    broker.fault("link detached again").await;
    wait_for_health(&mut health, ProcessorHealth::Running).await;
    assert_eq!(broker.start_attempts(), 5);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_a_recovery_sequence() {
    let broker = InMemoryBroker::new();

    let worker = QueueWorker::<serde_json::Value, _>::new(
        Box::new(broker.clone()),
        settings(),
        || NoOpConsumer,
    )
    .await
    .unwrap();
    let mut health = worker.health();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker.run(shutdown_rx));

    wait_for_health(&mut health, ProcessorHealth::Running).await;

    broker.fail_next_starts(3);
    broker.fault("link detached").await;
    wait_for_health(&mut health, ProcessorHealth::Restarting).await;

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(*health.borrow(), ProcessorHealth::Stopped);
}
