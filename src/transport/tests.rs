use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, Receiver, UnboundedReceiver};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::notifier::AdminEvent;
use crate::broker::{Broker, Delivery, Session};
use crate::persistence::SledStore;
use crate::transport::message::{ClientMessage, ServerMessage};
use crate::transport::websocket::{Connection, serve};

fn broker() -> Arc<Broker> {
    Arc::new(Broker::new(Arc::new(SledStore::temporary().unwrap()), 64))
}

struct Harness {
    conn: Connection,
    session_id: String,
    deliveries: Receiver<Delivery>,
    replies: UnboundedReceiver<ServerMessage>,
}

fn connection() -> Harness {
    let (session, deliveries) = Session::channel();
    let (reply_tx, replies) = mpsc::unbounded_channel();
    let session_id = session.id.clone();
    Harness {
        conn: Connection::new(session, reply_tx),
        session_id,
        deliveries,
        replies,
    }
}

#[test]
fn test_handle_subscribe() {
    let broker = broker();
    let mut h = connection();

    let msg = json!({
        "type": "subscribe",
        "consumer": "alice",
        "topics": ["sports", "news"]
    })
    .to_string();
    h.conn.handle_text(&broker, &msg);

    match h.replies.try_recv().unwrap() {
        ServerMessage::Subscribed { topics } => assert_eq!(topics, vec!["sports", "news"]),
        other => panic!("Expected Subscribed, got {other:?}"),
    }
    assert_eq!(
        broker.registry().topics_of(&h.session_id),
        vec!["news", "sports"]
    );
}

#[test]
fn test_handle_subscribe_without_consumer_is_rejected() {
    let broker = broker();
    let mut h = connection();

    h.conn
        .handle_text(&broker, r#"{"type":"subscribe","topics":["t"]}"#);

    assert!(matches!(
        h.replies.try_recv().unwrap(),
        ServerMessage::Error { .. }
    ));
    assert_eq!(broker.registry().binding_count(), 0);
}

#[test]
fn test_handle_publish_delivers_to_subscriber() {
    let broker = broker();
    let mut consumer = connection();
    let mut producer = connection();

    consumer.conn.handle(
        &broker,
        ClientMessage::Subscribe {
            consumer: "alice".to_string(),
            topics: vec!["sports".to_string()],
        },
    );

    let msg = json!({
        "type": "publish",
        "topic": "sports",
        "message": "goal",
        "producer": "ref"
    })
    .to_string();
    producer.conn.handle_text(&broker, &msg);

    let message_id = match producer.replies.try_recv().unwrap() {
        ServerMessage::Published { message_id } => message_id,
        other => panic!("Expected Published, got {other:?}"),
    };
    let delivery = consumer.deliveries.try_recv().unwrap();
    assert_eq!(delivery.message_id, message_id);
    assert_eq!(delivery.message, "goal");
    assert!(producer.deliveries.try_recv().is_err());
}

#[test]
fn test_handle_publish_with_structured_payload() {
    let broker = broker();
    let mut consumer = connection();
    let mut producer = connection();
    consumer.conn.handle(
        &broker,
        ClientMessage::Subscribe {
            consumer: "billing".to_string(),
            topics: vec!["orders".to_string()],
        },
    );

    let payload = json!({"order_id": 7, "status": "created"});
    let msg = json!({
        "type": "publish",
        "topic": "orders",
        "message": payload.clone(),
        "producer": "shop"
    })
    .to_string();
    producer.conn.handle_text(&broker, &msg);

    assert!(matches!(
        producer.replies.try_recv().unwrap(),
        ServerMessage::Published { .. }
    ));
    let delivery = consumer.deliveries.try_recv().unwrap();
    let echoed: serde_json::Value = serde_json::from_str(&delivery.message).unwrap();
    assert_eq!(echoed, payload);

    let rows = broker.list_messages().unwrap();
    assert_eq!(rows[0].message.payload, delivery.message);
}

#[test]
fn test_handle_publish_with_null_payload_is_rejected() {
    let broker = broker();
    let mut h = connection();

    h.conn
        .handle_text(&broker, r#"{"type":"publish","topic":"t","message":null}"#);

    assert!(matches!(
        h.replies.try_recv().unwrap(),
        ServerMessage::Error { .. }
    ));
    assert!(broker.list_messages().unwrap().is_empty());
}

#[test]
fn test_handle_publish_without_topic_is_rejected() {
    let broker = broker();
    let mut h = connection();

    h.conn
        .handle_text(&broker, r#"{"type":"publish","message":"x"}"#);

    match h.replies.try_recv().unwrap() {
        ServerMessage::Error { message } => assert!(message.contains("topic")),
        other => panic!("Expected Error, got {other:?}"),
    }
    assert!(broker.list_messages().unwrap().is_empty());
}

#[test]
fn test_handle_consumed_records_row() {
    let broker = broker();
    let mut h = connection();

    let msg = json!({
        "type": "consumed",
        "consumer": "alice",
        "topic": "sports",
        "message_id": "m-1",
        "message": "goal"
    })
    .to_string();
    h.conn.handle_text(&broker, &msg);
    h.conn.handle_text(&broker, &msg);

    assert!(matches!(
        h.replies.try_recv().unwrap(),
        ServerMessage::Recorded { .. }
    ));
    assert_eq!(broker.list_consumptions().unwrap().len(), 2);
}

#[test]
fn test_handle_incomplete_consumed_is_rejected() {
    let broker = broker();
    let mut h = connection();

    h.conn.handle_text(
        &broker,
        r#"{"type":"consumed","consumer":"alice","topic":"sports"}"#,
    );

    assert!(matches!(
        h.replies.try_recv().unwrap(),
        ServerMessage::Error { .. }
    ));
    assert!(broker.list_consumptions().unwrap().is_empty());
}

#[test]
fn test_handle_invalid_json() {
    let broker = broker();
    let mut h = connection();

    h.conn.handle_text(&broker, "not json");
    h.conn.handle_text(&broker, r#"{"type":"launch"}"#);

    for _ in 0..2 {
        match h.replies.try_recv().unwrap() {
            ServerMessage::Error { message } => assert!(message.starts_with("invalid message")),
            other => panic!("Expected Error, got {other:?}"),
        }
    }
}

#[test]
fn test_handle_list_requests() {
    let broker = broker();
    let mut h = connection();
    h.conn.handle(
        &broker,
        ClientMessage::Subscribe {
            consumer: "alice".to_string(),
            topics: vec!["t".to_string()],
        },
    );
    broker.publish("t", "x", None, None).unwrap();
    let _ = h.replies.try_recv();

    h.conn.handle(&broker, ClientMessage::ListMessages);
    h.conn.handle(&broker, ClientMessage::ListSubscriptions);
    h.conn.handle(&broker, ClientMessage::ListConsumptions);

    match h.replies.try_recv().unwrap() {
        ServerMessage::Messages { rows } => assert_eq!(rows.len(), 1),
        other => panic!("Expected Messages, got {other:?}"),
    }
    match h.replies.try_recv().unwrap() {
        ServerMessage::Subscriptions { rows } => {
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].session, h.session_id);
        }
        other => panic!("Expected Subscriptions, got {other:?}"),
    }
    match h.replies.try_recv().unwrap() {
        ServerMessage::Consumptions { rows } => assert!(rows.is_empty()),
        other => panic!("Expected Consumptions, got {other:?}"),
    }
}

#[tokio::test]
async fn test_watch_forwards_admin_events() {
    let broker = broker();
    let mut observer = connection();
    observer.conn.handle(&broker, ClientMessage::Watch);
    assert!(matches!(
        observer.replies.recv().await.unwrap(),
        ServerMessage::Watching
    ));

    broker.publish("t", "x", Some("p"), Some("m-1")).unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(1), observer.replies.recv())
        .await
        .expect("timed out")
        .unwrap();
    match frame {
        ServerMessage::Admin {
            event: AdminEvent::NewMessage { message_id, .. },
        } => assert_eq!(message_id, "m-1"),
        other => panic!("Expected admin NewMessage, got {other:?}"),
    }
}

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn start_server(max_connections: usize) -> (String, Arc<Broker>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let broker = broker();
    tokio::spawn(serve(listener, broker.clone(), max_connections));
    (url, broker)
}

async fn send(ws: &mut Ws, value: serde_json::Value) {
    ws.send(WsMessage::text(value.to_string())).await.unwrap();
}

async fn next_frame(ws: &mut Ws) -> ServerMessage {
    let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .unwrap();
    serde_json::from_slice(&frame.into_data()).unwrap()
}

#[tokio::test]
async fn test_socket_publish_and_disconnect() {
    let (url, broker) = start_server(16).await;
    let (mut consumer, _) = connect_async(url.as_str()).await.unwrap();
    let (mut producer, _) = connect_async(url.as_str()).await.unwrap();

    send(
        &mut consumer,
        json!({"type": "subscribe", "consumer": "alice", "topics": ["sports"]}),
    )
    .await;
    assert!(matches!(
        next_frame(&mut consumer).await,
        ServerMessage::Subscribed { .. }
    ));

    send(
        &mut producer,
        json!({"type": "publish", "topic": "sports", "message": "goal", "producer": "ref"}),
    )
    .await;
    assert!(matches!(
        next_frame(&mut producer).await,
        ServerMessage::Published { .. }
    ));

    match next_frame(&mut consumer).await {
        ServerMessage::Message {
            topic,
            message,
            producer,
            ..
        } => {
            assert_eq!(topic, "sports");
            assert_eq!(message, "goal");
            assert_eq!(producer, "ref");
        }
        other => panic!("Expected Message, got {other:?}"),
    }

    consumer.close(None).await.unwrap();
    for _ in 0..50 {
        if broker.registry().binding_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(broker.registry().binding_count(), 0);
    assert!(broker.list_subscriptions().unwrap().is_empty());
}

#[tokio::test]
async fn test_connections_beyond_limit_are_refused() {
    let (url, _broker) = start_server(1).await;
    let (_first, _) = connect_async(url.as_str()).await.unwrap();

    let second = tokio::time::timeout(Duration::from_secs(2), connect_async(url.as_str()))
        .await
        .expect("timed out");
    assert!(second.is_err());
}
