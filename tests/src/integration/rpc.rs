//! # Request/Response Between Nodes
//!
//! GET and PUT exchanges over `<endpoint>/requests` and
//! `<endpoint>/responses/<id>`, including loss, retries and timeouts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mesh_bus::{MemoryBroker, PubSubClient, QoS};
use mesh_node::NodeError;
use serde_json::{json, Value};

use super::fixtures::{
    eventually, owner_descriptor, requester_descriptor, start, ATTEMPT_TIMEOUT,
};

fn responses_from(broker: &MemoryBroker, endpoint: &str) -> usize {
    let prefix = format!("{endpoint}/responses/");
    broker
        .publish_log()
        .iter()
        .filter(|message| message.topic.starts_with(&prefix))
        .count()
}

// =============================================================================
// GET
// =============================================================================

#[tokio::test]
async fn test_get_round_trip() {
    let broker = MemoryBroker::new();
    let owner = start(&broker, owner_descriptor()).await;
    let requester = start(&broker, requester_descriptor()).await;

    owner.put("owner/value", "42").unwrap();
    let value = requester
        .get("owner/value", 3, ATTEMPT_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(value, "42");

    assert_eq!(broker.published_on("owner/requests").len(), 1);
    assert_eq!(responses_from(&broker, "owner"), 1);

    requester.stop().await;
    owner.stop().await;
}

#[tokio::test]
async fn test_get_sees_latest_put() {
    let broker = MemoryBroker::new();
    let owner = start(&broker, owner_descriptor()).await;
    let requester = start(&broker, requester_descriptor()).await;

    owner.put("owner/value", "a").unwrap();
    assert_eq!(requester.get_with_defaults("owner/value").await.unwrap(), "a");

    owner.put("owner/value", "b").unwrap();
    assert_eq!(requester.get_with_defaults("owner/value").await.unwrap(), "b");

    requester.stop().await;
    owner.stop().await;
}

#[tokio::test]
async fn test_get_node_descriptor() {
    let broker = MemoryBroker::new();
    let owner = start(&broker, owner_descriptor()).await;
    let requester = start(&broker, requester_descriptor()).await;

    let text = requester
        .get_with_defaults("owner/node_descriptor")
        .await
        .unwrap();
    let descriptor: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(descriptor, owner_descriptor());

    requester.stop().await;
    owner.stop().await;
}

#[tokio::test]
async fn test_get_unset_value_is_not_found() {
    let broker = MemoryBroker::new();
    let owner = start(&broker, owner_descriptor()).await;
    let requester = start(&broker, requester_descriptor()).await;

    let result = requester.get("owner/value", 3, ATTEMPT_TIMEOUT).await;
    match result {
        Err(NodeError::Status { link, status }) => {
            assert_eq!(link, "owner/value");
            assert_eq!(status, "404");
        }
        other => panic!("expected 404, got {other:?}"),
    }

    requester.stop().await;
    owner.stop().await;
}

#[tokio::test]
async fn test_get_times_out_after_all_attempts() {
    let broker = MemoryBroker::new();
    let requester = start(&broker, requester_descriptor()).await;
    let topics_before = requester.client().subscribed_topics().await.unwrap();

    let timeout = Duration::from_millis(50);
    let started = Instant::now();
    let result = requester.get("ghost/value", 3, timeout).await;
    let elapsed = started.elapsed();

    match result {
        Err(NodeError::Timeout { link, attempts }) => {
            assert_eq!(link, "ghost/value");
            assert_eq!(attempts, 3);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(elapsed >= timeout * 3, "returned after {elapsed:?}");
    assert_eq!(broker.published_on("ghost/requests").len(), 3);

    // Response subscription removed
    assert_eq!(
        requester.client().subscribed_topics().await.unwrap(),
        topics_before
    );

    requester.stop().await;
}

#[tokio::test]
async fn test_get_retries_after_lost_request() {
    let broker = MemoryBroker::new();
    let owner = start(&broker, owner_descriptor()).await;
    let requester = start(&broker, requester_descriptor()).await;
    owner.put("owner/value", "v").unwrap();

    broker.drop_next(1);
    let value = requester
        .get("owner/value", 3, ATTEMPT_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(value, "v");
    assert_eq!(broker.published_on("owner/requests").len(), 2);

    requester.stop().await;
    owner.stop().await;
}

#[tokio::test]
async fn test_late_reply_to_earlier_attempt_completes_get() {
    let broker = MemoryBroker::new();
    let requester = start(&broker, requester_descriptor()).await;

    // Stands in for `ghost`: answers every request 80ms late.
    let slow = Arc::new(PubSubClient::new(Arc::new(broker.transport()), QoS::AtLeastOnce));
    slow.start().await.unwrap();
    let requests = slow.subscribe("ghost/requests").await.unwrap();
    let responder = {
        let slow = Arc::clone(&slow);
        tokio::spawn(async move {
            loop {
                let request: Value = serde_json::from_str(&requests.dequeue().await).unwrap();
                let id = request["id"].as_str().unwrap().to_string();
                let slow = Arc::clone(&slow);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    let reply = json!({ "status": "200", "body": "late", "type": "DATA" });
                    let _ = slow.publish(&format!("ghost/responses/{id}"), &reply.to_string());
                });
            }
        })
    };

    let value = requester
        .get("ghost/value", 3, Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(value, "late");
    assert_eq!(broker.published_on("ghost/requests").len(), 2);

    responder.abort();
    slow.stop().await;
    requester.stop().await;
}

#[tokio::test]
async fn test_abandoned_get_leaves_no_subscription() {
    let broker = MemoryBroker::new();
    let requester = start(&broker, requester_descriptor()).await;
    let topics_before = requester.client().subscribed_topics().await.unwrap();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(30),
        requester.get("ghost/value", 3, Duration::from_millis(100)),
    )
    .await;
    assert!(abandoned.is_err());

    assert_eq!(
        requester.client().subscribed_topics().await.unwrap(),
        topics_before
    );
    eventually(|| {
        broker
            .publish_log()
            .iter()
            .filter(|message| message.topic == "ghost/requests")
            .all(|message| {
                let request: Value = serde_json::from_str(&message.text()).unwrap();
                let id = request["id"].as_str().unwrap();
                broker.subscriber_count(&format!("ghost/responses/{id}")) == 0
            })
    })
    .await;

    requester.stop().await;
}

#[tokio::test]
async fn test_get_unknown_remote_link_is_dropped() {
    let broker = MemoryBroker::new();
    let owner = start(&broker, owner_descriptor()).await;
    let requester = start(&broker, requester_descriptor()).await;

    let result = requester
        .get("owner/missing", 2, Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(NodeError::Timeout { attempts: 2, .. })));
    assert_eq!(responses_from(&broker, "owner"), 0);

    requester.stop().await;
    owner.stop().await;
}

#[tokio::test]
async fn test_get_after_owner_stopped_times_out() {
    let broker = MemoryBroker::new();
    let owner = start(&broker, owner_descriptor()).await;
    let requester = start(&broker, requester_descriptor()).await;
    owner.put("owner/value", "v").unwrap();
    owner.stop().await;

    let result = requester
        .get("owner/value", 2, Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(NodeError::Timeout { .. })));

    requester.stop().await;
}

// =============================================================================
// PUT
// =============================================================================

#[tokio::test]
async fn test_remote_put_sets_owner_value() {
    let broker = MemoryBroker::new();
    let owner = start(&broker, owner_descriptor()).await;
    let requester = start(&broker, requester_descriptor()).await;

    requester
        .put_remote("owner/value", "from-afar", 3, ATTEMPT_TIMEOUT)
        .await
        .unwrap();

    assert_eq!(
        owner.value("owner/value").await.unwrap(),
        Some("from-afar".to_string())
    );
    assert_eq!(
        requester.get_with_defaults("owner/value").await.unwrap(),
        "from-afar"
    );

    requester.stop().await;
    owner.stop().await;
}

#[tokio::test]
async fn test_remote_put_to_stream_link_is_dropped() {
    let broker = MemoryBroker::new();
    let owner = start(&broker, owner_descriptor()).await;
    let requester = start(
        &broker,
        json!({
            "endpoint": "confused",
            "links": { "/0": { "type": "STREAM" } },
            "requests": [{ "link": "owner/feed", "type": "DATA" }]
        }),
    )
    .await;

    let result = requester
        .put_remote("owner/feed", "x", 2, Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(NodeError::Timeout { attempts: 2, .. })));
    assert_eq!(responses_from(&broker, "owner"), 0);

    requester.stop().await;
    owner.stop().await;
}

#[tokio::test]
async fn test_redelivered_put_keeps_last_write() {
    let broker = MemoryBroker::new();
    let owner = start(&broker, owner_descriptor()).await;

    let raw = PubSubClient::new(Arc::new(broker.transport()), QoS::AtLeastOnce);
    raw.start().await.unwrap();
    let first = json!({ "id": "dup", "method": "PUT", "link": "owner/value", "body": "one" });
    raw.publish("owner/requests", &first.to_string()).unwrap();
    raw.publish("owner/requests", &first.to_string()).unwrap();
    eventually(|| broker.published_on("owner/responses/dup").len() == 2).await;
    assert_eq!(owner.value("owner/value").await.unwrap(), Some("one".to_string()));

    let second = json!({ "id": "dup", "method": "PUT", "link": "owner/value", "body": "two" });
    raw.publish("owner/requests", &second.to_string()).unwrap();
    eventually(|| broker.published_on("owner/responses/dup").len() == 3).await;
    assert_eq!(owner.value("owner/value").await.unwrap(), Some("two".to_string()));

    raw.stop().await;
    owner.stop().await;
}

// =============================================================================
// MALFORMED TRAFFIC
// =============================================================================

#[tokio::test]
async fn test_malformed_requests_get_no_response() {
    let broker = MemoryBroker::new();
    let owner = start(&broker, owner_descriptor()).await;
    let requester = start(&broker, requester_descriptor()).await;
    owner.put("owner/value", "ok").unwrap();

    let raw = PubSubClient::new(Arc::new(broker.transport()), QoS::AtLeastOnce);
    raw.start().await.unwrap();
    raw.publish("owner/requests", "not json").unwrap();
    raw.publish("owner/requests", r#"{"id":"a","method":"DELETE","link":"owner/value"}"#)
        .unwrap();
    raw.publish("owner/requests", r#"{"method":"GET","link":"owner/value"}"#)
        .unwrap();
    raw.publish("owner/requests", r#"{"id":"b","method":"GET","link":"owner/nope"}"#)
        .unwrap();
    eventually(|| broker.published_on("owner/requests").len() == 4).await;

    // Still serving afterwards
    assert_eq!(requester.get_with_defaults("owner/value").await.unwrap(), "ok");
    assert_eq!(responses_from(&broker, "owner"), 1);
    assert!(broker.published_on("owner/responses/a").is_empty());
    assert!(broker.published_on("owner/responses/b").is_empty());

    raw.stop().await;
    requester.stop().await;
    owner.stop().await;
}
