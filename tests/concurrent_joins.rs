//! High concurrency tests for ticket issuance
//!
//! Many joins race for the same queue on a multi-threaded runtime; positions
//! must come out gap-free and duplicate holders must never get two tickets.

mod fixtures;

use futures::future::join_all;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use waitline::error::QueueError;
use waitline::queue::QueueManager;
use waitline::types::{QueueId, TicketStatus};

async fn join_many(manager: &QueueManager, queue_id: QueueId, holders: Vec<String>) -> Vec<u64> {
    let handles = holders.into_iter().map(|holder| {
        let manager = manager.clone();
        tokio::spawn(async move { manager.issue_ticket(queue_id, holder).await })
    });

    let mut positions: Vec<u64> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("join task panicked").expect("join refused").position)
        .collect();
    positions.sort_unstable();
    positions
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_get_gap_free_positions() {
    let manager = QueueManager::in_memory().unwrap();
    let queue = manager.create_queue("Concert box office").unwrap();

    let start = Instant::now();
    let holders = (0..64).map(|i| format!("fan-{}", i)).collect();
    let positions = join_many(&manager, queue.id, holders).await;
    let elapsed = start.elapsed();

    assert_eq!(positions, (1..=64).collect::<Vec<_>>());
    assert_eq!(manager.query_state(queue.id).unwrap().last_issued, 64);
    assert!(
        elapsed < Duration::from_secs(5),
        "64 joins took {:?}",
        elapsed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_duplicate_holder_gets_one_ticket() {
    let manager = QueueManager::in_memory().unwrap();
    let queue = manager.create_queue("Clinic").unwrap();

    let attempts = (0..16).map(|_| {
        let manager = manager.clone();
        tokio::spawn(async move { manager.issue_ticket(queue.id, "alice").await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("join task panicked"))
        .collect();

    let issued: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].position, 1);

    for result in results.iter().filter_map(|r| r.as_ref().err()) {
        match result {
            QueueError::DuplicateHolder { ticket_id, .. } => assert_eq!(*ticket_id, issued[0].id),
            other => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(manager.query_state(queue.id).unwrap().last_issued, 1);
    assert_eq!(manager.stats().unwrap().duplicate_joins, 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_rejection_consumes_no_position() {
    let manager = QueueManager::in_memory().unwrap();
    let queue = manager.create_queue("Clinic").unwrap();

    manager.issue_ticket(queue.id, "alice").await.unwrap();
    let err = manager.issue_ticket(queue.id, "alice").await.unwrap_err();
    assert!(matches!(err, QueueError::DuplicateHolder { .. }));
    assert_eq!(manager.query_state(queue.id).unwrap().last_issued, 1);

    let bob = manager.issue_ticket(queue.id, "bob").await.unwrap();
    assert_eq!(bob.position, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_holder_can_rejoin_after_leaving() {
    let manager = QueueManager::in_memory().unwrap();
    let queue = manager.create_queue("Food truck").unwrap();

    let first = manager.issue_ticket(queue.id, "alice").await.unwrap();
    manager
        .transition(first.id, TicketStatus::Cancelled)
        .await
        .unwrap();

    let second = manager.issue_ticket(queue.id, "alice").await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(second.position, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queues_sequence_independently() {
    let manager = QueueManager::in_memory().unwrap();
    let north = manager.create_queue("North gate").unwrap();
    let south = manager.create_queue("South gate").unwrap();

    // The same holders join both queues at once
    let holders: Vec<String> = (0..32).map(|i| format!("visitor-{}", i)).collect();
    let (north_positions, south_positions) = tokio::join!(
        join_many(&manager, north.id, holders.clone()),
        join_many(&manager, south.id, holders),
    );

    let expected: Vec<u64> = (1..=32).collect();
    assert_eq!(north_positions, expected);
    assert_eq!(south_positions, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_joins_interleaved_with_serving() {
    let manager = QueueManager::in_memory().unwrap();
    let queue = manager.create_queue("Bank").unwrap();

    let seed = join_many(
        &manager,
        queue.id,
        (0..8).map(|i| format!("early-{}", i)).collect(),
    )
    .await;
    assert_eq!(seed, (1..=8).collect::<Vec<_>>());

    let first_tickets = manager
        .queue_tickets(queue.id, Some(TicketStatus::Waiting))
        .unwrap();

    let server = {
        let manager = manager.clone();
        tokio::spawn(async move {
            for ticket in first_tickets.iter().take(4) {
                fixtures::serve_to_completion(&manager, ticket.id)
                    .await
                    .expect("serving failed");
            }
        })
    };
    let late = join_many(
        &manager,
        queue.id,
        (0..24).map(|i| format!("late-{}", i)).collect(),
    )
    .await;
    server.await.unwrap();

    assert_eq!(late, (9..=32).collect::<Vec<_>>());

    let state = manager.query_state(queue.id).unwrap();
    assert_eq!(state.last_issued, 32);
    assert_eq!(state.current_position, 4);
    assert_eq!(state.completed_count, 4);

    let positions: HashSet<u64> = manager
        .queue_tickets(queue.id, None)
        .unwrap()
        .iter()
        .map(|t| t.position)
        .collect();
    assert_eq!(positions.len(), 32);
}
