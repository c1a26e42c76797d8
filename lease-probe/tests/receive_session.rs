mod common;

use std::sync::Arc;
use std::time::Duration;

use lease_probe::output::TraceLine;
use lease_probe::{
    DispositionPolicy, ExceptionAction, MemorySink, MonitorOutcome, ReceiveSession, SessionConfig,
};
use lease_queue::backend::memory::{BrokerConfig, MAX_DELIVERY_COUNT_EXCEEDED};
use lease_queue::{MessageId, MessageState, OutgoingMessage, QueueClient, QueueEvent};
use tokio::sync::{broadcast, watch};

use common::{broker, lock_duration, CountingClient, Faults, RecordingExceptions};

/// Wait until `count` events match, then request shutdown
async fn shutdown_after(
    mut events: broadcast::Receiver<QueueEvent>,
    count: usize,
    matches: impl Fn(&QueueEvent) -> bool,
    shutdown: watch::Sender<bool>,
) {
    let mut seen = 0;
    while seen < count {
        match events.recv().await {
            Ok(event) if matches(&event) => seen += 1,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    shutdown.send(true).unwrap();
}

async fn send(client: &CountingClient, body: &str) -> MessageId {
    client
        .send(OutgoingMessage::new(MessageId::new(), body))
        .await
        .unwrap()
}

/// S1. Complete: every delivered message gets one monitor and one settle
#[tokio::test(start_paused = true)]
async fn test_session_completes_each_delivery() {
    let (broker, clock) = broker(BrokerConfig::default());
    let client = Arc::new(CountingClient::new(broker.clone()));
    let first = send(&client, "one").await;
    let second = send(&client, "two").await;

    let sink = Arc::new(MemorySink::new());
    let session = ReceiveSession::new(
        client.clone(),
        Arc::new(clock),
        SessionConfig::new(DispositionPolicy::Complete, Duration::from_secs(60)),
    )
    .with_sink(sink.clone());

    let (tx, rx) = watch::channel(false);
    let stop = shutdown_after(
        broker.subscribe(),
        2,
        |e| matches!(e, QueueEvent::Completed { .. }),
        tx,
    );
    let (summary, ()) = tokio::join!(session.run(rx), stop);
    let summary = summary.unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.total(), 2);
    assert!(summary.recent().iter().all(|r| r.outcome == MonitorOutcome::Completed));
    assert_eq!(client.settle_calls(), (2, 0, 0));
    assert_eq!(broker.active_count(), 0);

    // One monitor at a time, so traces appear in queue order
    let received: Vec<MessageId> = sink
        .lines()
        .into_iter()
        .filter_map(|line| match line {
            TraceLine::Message(id) => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(received, vec![first, second]);
}

/// S2. Abandon: redelivered until the broker dead-letters it
#[tokio::test(start_paused = true)]
async fn test_session_abandon_until_max_delivery_count() {
    let (broker, clock) = broker(BrokerConfig {
        max_delivery_count: 3,
        ..BrokerConfig::default()
    });
    let client = Arc::new(CountingClient::new(broker.clone()));
    let id = send(&client, "poison").await;

    let session = ReceiveSession::new(
        client.clone(),
        Arc::new(clock),
        SessionConfig::new(DispositionPolicy::Abandon, Duration::from_secs(60)),
    )
    .with_sink(Arc::new(MemorySink::new()));

    let (tx, rx) = watch::channel(false);
    let stop = shutdown_after(
        broker.subscribe(),
        1,
        |e| matches!(e, QueueEvent::DeadLettered { .. }),
        tx,
    );
    let (summary, ()) = tokio::join!(session.run(rx), stop);
    let summary = summary.unwrap();

    assert_eq!(summary.abandoned, 3);
    assert_eq!(summary.total(), 3);
    assert!(summary
        .recent()
        .iter()
        .all(|r| r.message_id == id && r.outcome == MonitorOutcome::Abandoned));
    assert_eq!(client.settle_calls(), (0, 3, 0));

    let dead = broker.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].delivery_count, 3);
    assert!(matches!(
        &dead[0].state,
        MessageState::DeadLettered { reason, .. } if reason == MAX_DELIVERY_COUNT_EXCEEDED
    ));
}

/// S3. LockExpire: each lapsed lease comes back with a higher delivery count
#[tokio::test(start_paused = true)]
async fn test_session_lock_expire_redelivers() {
    let (broker, clock) = broker(BrokerConfig {
        max_delivery_count: 2,
        ..lock_duration(10)
    });
    let client = Arc::new(CountingClient::new(broker.clone()));
    send(&client, "held").await;

    let sink = Arc::new(MemorySink::new());
    let session = ReceiveSession::new(
        client.clone(),
        Arc::new(clock),
        SessionConfig::new(DispositionPolicy::LockExpire, Duration::ZERO),
    )
    .with_sink(sink.clone());

    let (tx, rx) = watch::channel(false);
    let stop = shutdown_after(
        broker.subscribe(),
        1,
        |e| matches!(e, QueueEvent::DeadLettered { .. }),
        tx,
    );
    let (summary, ()) = tokio::join!(session.run(rx), stop);
    let summary = summary.unwrap();

    assert_eq!(summary.expired, 2);
    assert_eq!(summary.total(), 2);
    for report in summary.recent() {
        assert_eq!(report.outcome, MonitorOutcome::Expired);
        assert_eq!(report.expiry_noted_on_tick, Some(1));
        assert_eq!(report.renewals, 0);
    }
    assert_eq!(client.settle_calls(), (0, 0, 0));

    let counts: Vec<u32> = sink.rows().iter().map(|row| row.delivery_count).collect();
    assert_eq!(counts.first(), Some(&1));
    assert_eq!(counts.last(), Some(&2));
    assert_eq!(broker.dead_letters().len(), 1);
}

/// S4. Receive errors reach the exception hook and the session carries on
#[tokio::test(start_paused = true)]
async fn test_session_reports_receive_errors() {
    let (broker, clock) = broker(BrokerConfig::default());
    let client = Arc::new(CountingClient::with_faults(
        broker.clone(),
        Faults {
            failing_receives: 2,
            ..Faults::default()
        },
    ));
    send(&client, "after the errors").await;

    let exceptions = Arc::new(RecordingExceptions::default());
    let session = ReceiveSession::new(
        client.clone(),
        Arc::new(clock),
        SessionConfig::new(DispositionPolicy::Complete, Duration::from_secs(60)),
    )
    .with_sink(Arc::new(MemorySink::new()))
    .with_exception_handler(exceptions.clone());

    let (tx, rx) = watch::channel(false);
    let stop = shutdown_after(
        broker.subscribe(),
        1,
        |e| matches!(e, QueueEvent::Completed { .. }),
        tx,
    );
    let (summary, ()) = tokio::join!(session.run(rx), stop);

    assert_eq!(summary.unwrap().completed, 1);
    let events = exceptions.events();
    assert_eq!(events.len(), 2);
    for event in &events {
        assert_eq!(event.action, ExceptionAction::Receive);
        assert!(event.message_id.is_none());
    }
}

/// S5. An idle session stops on shutdown with nothing to report
#[tokio::test(start_paused = true)]
async fn test_idle_session_stops_on_shutdown() {
    let (broker, clock) = broker(BrokerConfig::default());
    let client = Arc::new(CountingClient::new(broker));
    let session = ReceiveSession::new(client.clone(), Arc::new(clock), SessionConfig::default());

    let (tx, rx) = watch::channel(false);
    let stop = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
    };
    let (summary, ()) = tokio::join!(session.run(rx), stop);

    let summary = summary.unwrap();
    assert_eq!(summary.total(), 0);
    assert!(summary.recent().is_empty());
    assert!(client.receives.load(std::sync::atomic::Ordering::SeqCst) > 1);
}

/// S6. A long session counts every delivery but keeps only the latest reports
#[tokio::test(start_paused = true)]
async fn test_session_bounds_report_history() {
    let (broker, clock) = broker(BrokerConfig::default());
    let client = Arc::new(CountingClient::new(broker.clone()));
    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(send(&client, &format!("message {}", n)).await);
    }

    let config = SessionConfig::new(DispositionPolicy::Complete, Duration::from_secs(60))
        .with_report_history(2);
    let session = ReceiveSession::new(client.clone(), Arc::new(clock), config)
        .with_sink(Arc::new(MemorySink::new()));

    let (tx, rx) = watch::channel(false);
    let stop = shutdown_after(
        broker.subscribe(),
        5,
        |e| matches!(e, QueueEvent::Completed { .. }),
        tx,
    );
    let (summary, ()) = tokio::join!(session.run(rx), stop);
    let summary = summary.unwrap();

    assert_eq!(summary.completed, 5);
    let kept: Vec<MessageId> = summary.recent().iter().map(|r| r.message_id.clone()).collect();
    assert_eq!(kept, ids[3..].to_vec());
}
