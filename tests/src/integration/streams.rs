//! # Streams Between Nodes
//!
//! Publishing on STREAM links, subscribing from other nodes, broker
//! reconnects and concurrent publishers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mesh_bus::MemoryBroker;
use mesh_node::{MeshNode, NodeError};
use serde_json::json;

use super::fixtures::{
    eventually, owner_descriptor, requester_descriptor, start, ATTEMPT_TIMEOUT,
};

#[tokio::test]
async fn test_single_stream_node() {
    let broker = MemoryBroker::new();
    let node = start(
        &broker,
        json!({"endpoint":"node","links":{"/0":{"type":"STREAM"}},"requests":[]}),
    )
    .await;

    assert!(node.publish("node/0", "hi").is_ok());
    assert!(matches!(
        node.publish("node/1", "hi"),
        Err(NodeError::NotPublishable(_))
    ));

    node.stop().await;
    assert_eq!(broker.published_on("node/0").len(), 1);
    assert!(broker.published_on("node/1").is_empty());
}

#[tokio::test]
async fn test_subscriber_receives_stream() {
    let broker = MemoryBroker::new();
    let owner = start(&broker, owner_descriptor()).await;
    let requester = start(&broker, requester_descriptor()).await;

    let feed = requester.subscribe("owner/feed").await.unwrap();
    owner.publish("owner/feed", "tick-1").unwrap();
    owner.publish("owner/feed", "tick-2").unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), feed.dequeue())
        .await
        .expect("timeout");
    let second = tokio::time::timeout(Duration::from_secs(1), feed.dequeue())
        .await
        .expect("timeout");
    assert_eq!(first, "tick-1");
    assert_eq!(second, "tick-2");

    requester.stop().await;
    owner.stop().await;
}

#[tokio::test]
async fn test_resubscribe_once_after_reconnect() {
    let broker = MemoryBroker::new();
    let owner = start(&broker, owner_descriptor()).await;
    let requester = start(&broker, requester_descriptor()).await;
    let feed = requester.subscribe("owner/feed").await.unwrap();
    assert_eq!(broker.subscribe_count("owner/feed"), 1);
    assert_eq!(broker.subscribe_count("owner/requests"), 1);

    broker.simulate_reconnect();
    eventually(|| {
        broker.subscribe_count("owner/feed") == 2 && broker.subscribe_count("owner/requests") == 2
    })
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.subscribe_count("owner/feed"), 2);
    assert_eq!(broker.subscribe_count("owner/requests"), 2);

    // Both directions work again
    owner.publish("owner/feed", "after").unwrap();
    let received = tokio::time::timeout(Duration::from_secs(1), feed.dequeue())
        .await
        .expect("timeout");
    assert_eq!(received, "after");

    owner.put("owner/value", "still here").unwrap();
    let value = requester
        .get("owner/value", 3, ATTEMPT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(value, "still here");

    requester.stop().await;
    owner.stop().await;
}

#[tokio::test]
async fn test_concurrent_publishers_keep_per_task_order() {
    const TASKS: usize = 8;
    const PER_TASK: usize = 25;

    let broker = MemoryBroker::new();
    let owner: Arc<MeshNode> = Arc::new(start(&broker, owner_descriptor()).await);
    let requester = start(&broker, requester_descriptor()).await;
    let feed = requester.subscribe("owner/feed").await.unwrap();

    let handles: Vec<_> = (0..TASKS)
        .map(|task| {
            let owner = Arc::clone(&owner);
            tokio::spawn(async move {
                for seq in 0..PER_TASK {
                    owner.publish("owner/feed", &format!("{task}:{seq}")).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    let mut last_seen: HashMap<usize, usize> = HashMap::new();
    for _ in 0..TASKS * PER_TASK {
        let message = tokio::time::timeout(Duration::from_secs(2), feed.dequeue())
            .await
            .expect("timeout");
        let (task, seq) = message.split_once(':').unwrap();
        let task: usize = task.parse().unwrap();
        let seq: usize = seq.parse().unwrap();

        if let Some(previous) = last_seen.insert(task, seq) {
            assert!(seq > previous, "task {task} out of order: {previous} then {seq}");
        } else {
            assert_eq!(seq, 0);
        }
    }
    assert_eq!(last_seen.len(), TASKS);
    assert!(last_seen.values().all(|seq| *seq == PER_TASK - 1));
    assert!(feed.is_empty());

    requester.stop().await;
    owner.stop().await;
}
