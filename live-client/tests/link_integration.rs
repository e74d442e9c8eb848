// Link-level integration tests: multiplexing, correlation, reconnect.
//
// All scenarios run over the in-process memory transport; each
// MemoryTransport pair is one connection epoch and the test plays the
// server side.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use live_client::transport::{MemoryConnector, MemoryServerEnd, MemoryTransport};
use live_client::{ClientError, GraphqlLink, Operation, ReconnectConfig};
use shared::protocol::{ClientMessage, ExecutionResult, OperationPayload, ServerMessage};

/// Answers the connection handshake.
async fn ack_handshake(server: &mut MemoryServerEnd) {
    match server.recv().await {
        Some(ClientMessage::ConnectionInit { .. }) => {
            assert!(server.send(ServerMessage::ConnectionAck));
        }
        other => panic!("expected connection_init, got {:?}", other),
    }
}

/// Receives the next `start` message.
async fn expect_start(server: &mut MemoryServerEnd) -> (String, OperationPayload) {
    match server.recv().await {
        Some(ClientMessage::Start { id, payload }) => (id, payload),
        other => panic!("expected start, got {:?}", other),
    }
}

fn data(id: &str, payload: serde_json::Value) -> ServerMessage {
    ServerMessage::Data {
        id: id.to_string(),
        payload: ExecutionResult::data(payload),
    }
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig::new()
        .with_initial_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(50))
}

#[tokio::test]
async fn test_query_and_mutation_correlated() {
    let (transport, mut server) = MemoryTransport::pair();
    let link = GraphqlLink::open(
        Arc::new(MemoryConnector::new([transport])),
        fast_reconnect(),
    );

    let server_task = tokio::spawn(async move {
        ack_handshake(&mut server).await;
        // Two starts, in whichever order the client queued them; answer
        // each based on its document so correlation does the matching.
        for _ in 0..2 {
            let (id, payload) = expect_start(&mut server).await;
            let tag = if payload.query.starts_with("mutation") {
                "mutation"
            } else {
                "query"
            };
            assert!(server.send(data(&id, json!({ "tag": tag }))));
            assert!(server.send(ServerMessage::Complete { id }));
        }
        server
    });

    let query = link.execute(&Operation::query("{ status }"));
    let mutation = link.execute(&Operation::mutation("mutation { noop }"));

    let (query_results, mutation_results) =
        tokio::join!(query.collect::<Vec<_>>(), mutation.collect::<Vec<_>>());

    // Exactly one terminal result each, matched to the right caller
    assert_eq!(query_results.len(), 1);
    assert_eq!(
        query_results[0].as_ref().unwrap().data,
        Some(json!({"tag": "query"}))
    );
    assert_eq!(mutation_results.len(), 1);
    assert_eq!(
        mutation_results[0].as_ref().unwrap().data,
        Some(json!({"tag": "mutation"}))
    );

    server_task.await.unwrap();
}

#[tokio::test]
async fn test_concurrent_subscriptions_independent_streams() {
    let (transport, mut server) = MemoryTransport::pair();
    let link = GraphqlLink::open(
        Arc::new(MemoryConnector::new([transport])),
        fast_reconnect(),
    );

    let mut alpha = link.execute(&Operation::subscription("subscription { alpha }"));
    let mut beta = link.execute(&Operation::subscription("subscription { beta }"));

    let server_task = tokio::spawn(async move {
        ack_handshake(&mut server).await;
        let (first_id, first) = expect_start(&mut server).await;
        let (second_id, _) = expect_start(&mut server).await;
        let (alpha_id, beta_id) = if first.query.contains("alpha") {
            (first_id, second_id)
        } else {
            (second_id, first_id)
        };

        // Interleave pushes across the two operations
        assert!(server.send(data(&alpha_id, json!({"alpha": 1}))));
        assert!(server.send(data(&beta_id, json!({"beta": 1}))));
        assert!(server.send(data(&alpha_id, json!({"alpha": 2}))));
        assert!(server.send(data(&beta_id, json!({"beta": 2}))));
        server
    });

    // Each stream sees only its own results, in delivery order
    assert_eq!(
        alpha.next().await.unwrap().unwrap().data,
        Some(json!({"alpha": 1}))
    );
    assert_eq!(
        alpha.next().await.unwrap().unwrap().data,
        Some(json!({"alpha": 2}))
    );
    assert_eq!(
        beta.next().await.unwrap().unwrap().data,
        Some(json!({"beta": 1}))
    );
    assert_eq!(
        beta.next().await.unwrap().unwrap().data,
        Some(json!({"beta": 2}))
    );

    server_task.await.unwrap();
}

#[tokio::test]
async fn test_disposed_subscription_receives_no_further_pushes() {
    let (transport, mut server) = MemoryTransport::pair();
    let link = GraphqlLink::open(
        Arc::new(MemoryConnector::new([transport])),
        fast_reconnect(),
    );

    let mut stream = link.execute(&Operation::subscription("subscription { ticks }"));

    let handshake = tokio::spawn(async move {
        ack_handshake(&mut server).await;
        let (id, _) = expect_start(&mut server).await;
        assert!(server.send(data(&id, json!({"tick": 1}))));
        (server, id)
    });
    let (mut server, id) = handshake.await.unwrap();

    assert_eq!(
        stream.next().await.unwrap().unwrap().data,
        Some(json!({"tick": 1}))
    );

    // Dispose; a second stop is a no-op
    stream.stop();
    stream.stop();
    assert!(stream.next().await.is_none());
    assert_eq!(link.active_operations(), 0);

    // The server sees the unsubscribe...
    match server.recv().await {
        Some(ClientMessage::Stop { id: stopped }) => assert_eq!(stopped, id),
        other => panic!("expected stop, got {:?}", other),
    }

    // ...and a late push for the dead id must not disturb a new operation
    assert!(server.send(data(&id, json!({"tick": 2}))));
    let mut fresh = link.execute(&Operation::subscription("subscription { fresh }"));
    let (fresh_id, _) = expect_start(&mut server).await;
    assert!(server.send(data(&fresh_id, json!({"fresh": true}))));
    assert_eq!(
        fresh.next().await.unwrap().unwrap().data,
        Some(json!({"fresh": true}))
    );
}

#[tokio::test]
async fn test_reconnect_resumes_subscription_without_caller_action() {
    let (first, mut server1) = MemoryTransport::pair();
    let (second, mut server2) = MemoryTransport::pair();
    let link = GraphqlLink::open(
        Arc::new(MemoryConnector::new([first, second])),
        fast_reconnect(),
    );

    let mut stream = link.execute(&Operation::subscription("subscription { beacon }"));

    let epoch1 = tokio::spawn(async move {
        ack_handshake(&mut server1).await;
        let (id, _) = expect_start(&mut server1).await;
        assert!(server1.send(data(&id, json!({"seq": 1}))));
        // Kill the connection mid-subscription
        server1.disconnect();
        id
    });

    assert_eq!(
        stream.next().await.unwrap().unwrap().data,
        Some(json!({"seq": 1}))
    );
    let original_id = epoch1.await.unwrap();

    // After the drop the supervisor reconnects and silently re-registers
    // the subscription under the same correlation id.
    let epoch2 = tokio::spawn(async move {
        ack_handshake(&mut server2).await;
        let (id, payload) = expect_start(&mut server2).await;
        assert!(payload.query.contains("beacon"));
        assert!(server2.send(data(&id, json!({"seq": 2}))));
        (server2, id)
    });

    // Delivery resumes without any caller action
    assert_eq!(
        stream.next().await.unwrap().unwrap().data,
        Some(json!({"seq": 2}))
    );
    let (_server2, resumed_id) = epoch2.await.unwrap();
    assert_eq!(resumed_id, original_id);
}

#[tokio::test]
async fn test_in_flight_one_shot_fails_on_drop() {
    let (first, mut server1) = MemoryTransport::pair();
    let (second, mut server2) = MemoryTransport::pair();
    let link = GraphqlLink::open(
        Arc::new(MemoryConnector::new([first, second])),
        fast_reconnect(),
    );

    let epoch1 = tokio::spawn(async move {
        ack_handshake(&mut server1).await;
        // Swallow the query and drop the connection before answering
        let _ = expect_start(&mut server1).await;
        server1.disconnect();
    });

    let mut lost = link.execute(&Operation::query("{ status }"));
    match lost.next().await {
        Some(Err(ClientError::ConnectionLost)) => {}
        other => panic!("expected ConnectionLost, got {:?}", other),
    }
    epoch1.await.unwrap();

    // The link is still usable on the next epoch
    let epoch2 = tokio::spawn(async move {
        ack_handshake(&mut server2).await;
        let (id, _) = expect_start(&mut server2).await;
        assert!(server2.send(data(&id, json!({"ok": true}))));
        assert!(server2.send(ServerMessage::Complete { id }));
        server2
    });

    let mut retry = link.execute(&Operation::query("{ status }"));
    assert_eq!(
        retry.next().await.unwrap().unwrap().data,
        Some(json!({"ok": true}))
    );
    epoch2.await.unwrap();
}

#[tokio::test]
async fn test_retry_exhaustion_fails_live_operations() {
    let (transport, mut server) = MemoryTransport::pair();
    let link = GraphqlLink::open(
        Arc::new(MemoryConnector::new([transport])),
        fast_reconnect().with_max_attempts(2),
    );

    let mut stream = link.execute(&Operation::subscription("subscription { beacon }"));

    let epoch1 = tokio::spawn(async move {
        ack_handshake(&mut server).await;
        let (id, _) = expect_start(&mut server).await;
        assert!(server.send(data(&id, json!({"seq": 1}))));
        server.disconnect();
    });

    assert_eq!(
        stream.next().await.unwrap().unwrap().data,
        Some(json!({"seq": 1}))
    );
    epoch1.await.unwrap();

    // No further connections are available; after two failed attempts the
    // supervisor gives up and the stream ends with a terminal error.
    match stream.next().await {
        Some(Err(ClientError::ConnectionClosed(_))) => {}
        other => panic!("expected ConnectionClosed, got {:?}", other),
    }
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_rejected_handshake_retries_on_next_connection() {
    let (first, mut server1) = MemoryTransport::pair();
    let (second, mut server2) = MemoryTransport::pair();
    let link = GraphqlLink::open(
        Arc::new(MemoryConnector::new([first, second])),
        fast_reconnect(),
    );

    let mut stream = link.execute(&Operation::subscription("subscription { beacon }"));

    // First connection rejects the handshake; this counts as a failed
    // attempt and the supervisor moves on to the next connection.
    let epoch1 = tokio::spawn(async move {
        match server1.recv().await {
            Some(ClientMessage::ConnectionInit { .. }) => {
                assert!(server1.send(ServerMessage::ConnectionError {
                    payload: Some(json!({"message": "unauthorized"})),
                }));
            }
            other => panic!("expected connection_init, got {:?}", other),
        }
    });

    let epoch2 = tokio::spawn(async move {
        ack_handshake(&mut server2).await;
        let (id, payload) = expect_start(&mut server2).await;
        assert!(payload.query.contains("beacon"));
        assert!(server2.send(data(&id, json!({"seq": 1}))));
        server2
    });

    assert_eq!(
        stream.next().await.unwrap().unwrap().data,
        Some(json!({"seq": 1}))
    );
    epoch1.await.unwrap();
    epoch2.await.unwrap();
}

#[tokio::test]
async fn test_rejected_handshake_exhausts_attempts() {
    let (transport, mut server) = MemoryTransport::pair();
    let link = GraphqlLink::open(
        Arc::new(MemoryConnector::new([transport])),
        fast_reconnect().with_max_attempts(1),
    );

    let mut stream = link.execute(&Operation::subscription("subscription { beacon }"));

    let server_task = tokio::spawn(async move {
        match server.recv().await {
            Some(ClientMessage::ConnectionInit { .. }) => {
                assert!(server.send(ServerMessage::ConnectionError {
                    payload: Some(json!({"message": "unauthorized"})),
                }));
            }
            other => panic!("expected connection_init, got {:?}", other),
        }
    });

    // The only attempt was rejected; live operations fail terminally.
    match stream.next().await {
        Some(Err(ClientError::ConnectionClosed(_))) => {}
        other => panic!("expected ConnectionClosed, got {:?}", other),
    }
    assert!(stream.next().await.is_none());
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_operation_error_is_isolated() {
    let (transport, mut server) = MemoryTransport::pair();
    let link = GraphqlLink::open(
        Arc::new(MemoryConnector::new([transport])),
        fast_reconnect(),
    );

    let mut doomed = link.execute(&Operation::subscription("subscription { doomed }"));
    let mut healthy = link.execute(&Operation::subscription("subscription { healthy }"));

    let server_task = tokio::spawn(async move {
        ack_handshake(&mut server).await;
        let (first_id, first) = expect_start(&mut server).await;
        let (second_id, _) = expect_start(&mut server).await;
        let (doomed_id, healthy_id) = if first.query.contains("doomed") {
            (first_id, second_id)
        } else {
            (second_id, first_id)
        };

        assert!(server.send(ServerMessage::Error {
            id: doomed_id,
            payload: json!({"message": "subscription rejected"}),
        }));
        assert!(server.send(data(&healthy_id, json!({"healthy": 1}))));
        server
    });

    // The failed operation gets a terminal error...
    match doomed.next().await {
        Some(Err(ClientError::Operation(errors))) => {
            assert_eq!(errors[0].message, "subscription rejected");
        }
        other => panic!("expected operation error, got {:?}", other),
    }
    assert!(doomed.next().await.is_none());

    // ...while the other operation is unaffected
    assert_eq!(
        healthy.next().await.unwrap().unwrap().data,
        Some(json!({"healthy": 1}))
    );

    server_task.await.unwrap();
}
