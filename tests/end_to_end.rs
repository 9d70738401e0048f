use std::sync::Arc;
use std::time::Duration;

use auditbus::broker::{Broker, Delivery};
use auditbus::client::{self, PubSubClient};
use auditbus::persistence::SledStore;
use auditbus::transport::serve;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn publish_is_delivered_handled_and_acknowledged() {
    let dir = tempfile::tempdir().unwrap();
    let store = SledStore::open(dir.path().to_str().unwrap(), true).unwrap();
    let broker = Arc::new(Broker::new(Arc::new(store), 64));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(serve(listener, broker.clone(), 16));

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<Delivery>();
    let mut consumer = PubSubClient::new(url.clone(), "alice", vec!["sports".to_string()]);
    consumer.register_handler("sports", move |d: &Delivery| {
        let _ = seen_tx.send(d.clone());
    });
    let consumer_task = tokio::spawn(async move { consumer.run().await });

    wait_for(|| !broker.registry().subscribers_of("sports").is_empty()).await;

    let message_id = client::publish(&url, "sports", "goal", "ref", None)
        .await
        .unwrap();

    let delivery = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .expect("timed out")
        .unwrap();
    assert_eq!(delivery.message_id, message_id);
    assert_eq!(delivery.message, "goal");
    assert_eq!(delivery.producer, "ref");

    wait_for(|| broker.list_consumptions().unwrap().len() == 1).await;
    let consumption = &broker.list_consumptions().unwrap()[0];
    assert_eq!(consumption.consumer, "alice");
    assert_eq!(consumption.message_id, message_id);

    let messages = broker.list_messages().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message.topic, "sports");

    consumer_task.abort();
}

#[tokio::test]
async fn rejected_publish_surfaces_broker_error() {
    let broker = Arc::new(Broker::new(Arc::new(SledStore::temporary().unwrap()), 8));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(serve(listener, broker.clone(), 4));

    let err = client::publish(&url, "", "goal", "ref", None)
        .await
        .unwrap_err();
    assert!(matches!(err, auditbus::BrokerError::Rejected(_)));
    assert!(broker.list_messages().unwrap().is_empty());
}
