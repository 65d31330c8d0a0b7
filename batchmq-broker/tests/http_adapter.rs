use std::time::Duration;

use batchmq_broker::{
    http::{
        client::{BrokerClient, HttpProducer},
        consumer::{HttpAsyncConsumer, HttpConsumerSettings},
        server::{serve, ServerSettings, MAX_RETURN_DELAY_MILLIS},
    },
    in_memory::MessageBroker,
    send_all, AcknowledgerToken, BrokerError, HeapType, MessageFilter, MqAsyncConsumer, MqProducer,
    QueueRead,
};
use batchmq_models::{DataBatchPayload, Message};
use tokio::{net::TcpListener, sync::mpsc};

const TIMEOUT: Duration = Duration::from_secs(2);

fn batch(ks: &str, node: &str, idx: i16) -> Message {
    Message::data_batch(
        ks,
        1,
        node,
        idx,
        DataBatchPayload {
            script_url: "file:///script.json".into(),
            script_params_url: "file:///params.json".into(),
            first_token: i64::from(idx) * 10,
            last_token: i64::from(idx) * 10 + 9,
            batches_total: 5,
        },
    )
}

async fn start_server(settings: ServerSettings) -> (String, MessageBroker) {
    let _ = env_logger::builder().is_test(true).try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    let broker = MessageBroker::new();
    tokio::spawn(serve(
        listener,
        broker.clone(),
        settings,
        std::future::pending::<()>(),
    ));
    (endpoint, broker)
}

#[tokio::test]
async fn producer_claim_and_ack_over_http() {
    let (endpoint, broker) = start_server(ServerSettings::default()).await;
    let mut producer = HttpProducer::new(endpoint.clone());
    producer.open().await.unwrap();
    send_all(&mut producer, &[batch("ks1", "a", 0), batch("ks1", "a", 1), batch("ks0", "b", 0)])
        .await
        .unwrap();
    producer.close().await.unwrap();

    let client = BrokerClient::from_endpoint(&endpoint).unwrap();
    assert_eq!(client.count(HeapType::Q, &MessageFilter::default()).await.unwrap(), 3);
    assert_eq!(client.list_keyspaces().await.unwrap(), vec!["ks0", "ks1"]);

    let claimed = client.claim("worker-1", TIMEOUT).await.unwrap().unwrap();
    assert_eq!(claimed.id, 1);
    assert_eq!(claimed.claim_comment, "worker-1");
    client.heartbeat(claimed.id, TIMEOUT).await.unwrap();
    client.ack(claimed.id, TIMEOUT).await.unwrap();

    let err = client.ack(claimed.id, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, BrokerError::Remote { status: 404, .. }));
    assert_eq!(broker.count(HeapType::Wip, &MessageFilter::default()), 0);
}

#[tokio::test]
async fn capacity_and_bad_arguments_map_to_status_codes() {
    let settings = ServerSettings {
        max_messages: 2,
        ..ServerSettings::default()
    };
    let (endpoint, _broker) = start_server(settings).await;
    let client = BrokerClient::from_endpoint(&endpoint).unwrap();

    let msgs: Vec<Message> = (0..3).map(|i| batch("ks1", "a", i)).collect();
    let err = client.enqueue_bulk(&msgs, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, BrokerError::Remote { status: 503, .. }));
    assert_eq!(client.count(HeapType::Q, &MessageFilter::default()).await.unwrap(), 0);

    let raw = reqwest::get(format!("{endpoint}/heap/queue/count")).await.unwrap();
    assert_eq!(raw.status().as_u16(), 400);
}

#[tokio::test]
async fn out_of_range_return_delay_leaves_the_message_claimed() {
    let (endpoint, broker) = start_server(ServerSettings::default()).await;
    let client = BrokerClient::from_endpoint(&endpoint).unwrap();
    client.enqueue_bulk(&[batch("ks1", "a", 0)], TIMEOUT).await.unwrap();
    let claimed = client.claim("worker-1", TIMEOUT).await.unwrap().unwrap();

    for delay in [i64::MAX, MAX_RETURN_DELAY_MILLIS + 1, -1] {
        let err = client
            .return_to_queue(claimed.id, Some(delay), TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Remote { status: 400, .. }), "delay {delay}: {err}");
    }
    assert_eq!(broker.count(HeapType::Wip, &MessageFilter::default()), 1);
    assert_eq!(broker.count(HeapType::Q, &MessageFilter::default()), 0);

    client
        .return_to_queue(claimed.id, Some(MAX_RETURN_DELAY_MILLIS), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(broker.count(HeapType::Wip, &MessageFilter::default()), 0);
    assert_eq!(broker.count(HeapType::Q, &MessageFilter::default()), 1);
    assert!(client.claim("worker-1", TIMEOUT).await.unwrap().is_none());
}

#[tokio::test]
async fn inspection_routes() {
    let (endpoint, _broker) = start_server(ServerSettings::default()).await;
    let client = BrokerClient::from_endpoint(&endpoint).unwrap();
    let msgs: Vec<Message> = (0..4)
        .map(|i| batch("ks1", "a", i))
        .chain((0..2).map(|i| batch("ks1", "b", i)))
        .collect();
    assert_eq!(client.enqueue_bulk(&msgs, TIMEOUT).await.unwrap(), vec![1, 2, 3, 4, 5, 6]);

    let tail = client.head_tail(HeapType::Q, QueueRead::Tail, 0, 2).await.unwrap();
    assert_eq!(tail.iter().map(|m| m.id).collect::<Vec<_>>(), vec![6, 5]);

    let node_b = client
        .filter(HeapType::Q, &MessageFilter::new("", 0, "b"))
        .await
        .unwrap();
    assert_eq!(node_b.len(), 2);

    assert_eq!(
        client.delete(HeapType::Q, &MessageFilter::new("ks1", 1, "a")).await.unwrap(),
        4
    );
    let head = client.head_tail(HeapType::Q, QueueRead::Head, 0, 10).await.unwrap();
    assert_eq!(head.iter().map(|m| m.id).collect::<Vec<_>>(), vec![5, 6]);
}

#[tokio::test]
async fn async_consumer_round_trip() {
    let settings = ServerSettings {
        returned_delivery_delay: 60_000,
        ..ServerSettings::default()
    };
    let (endpoint, broker) = start_server(settings).await;
    broker
        .enqueue_bulk(vec![batch("ks1", "a", 0), batch("ks1", "b", 0)], 10)
        .unwrap();

    let consumer = HttpAsyncConsumer::new(
        BrokerClient::from_endpoint(&endpoint).unwrap(),
        HttpConsumerSettings {
            max_processors: 2,
            claim_comment: "test-daemon".into(),
        },
    );
    assert!(consumer.supports_heartbeat());

    let (msg_tx, mut msg_rx) = mpsc::channel(2);
    let (ack_tx, ack_rx) = mpsc::channel(2);
    consumer.start(msg_tx, ack_rx).unwrap();

    let first = tokio::time::timeout(TIMEOUT, msg_rx.recv()).await.unwrap().unwrap();
    let second = tokio::time::timeout(TIMEOUT, msg_rx.recv()).await.unwrap().unwrap();
    assert_eq!((first.id, second.id), (1, 2));
    assert_eq!(first.claim_comment, "test-daemon");

    ack_tx.send(AcknowledgerToken::heartbeat(first.id)).await.unwrap();
    ack_tx.send(AcknowledgerToken::ack(first.id)).await.unwrap();
    ack_tx.send(AcknowledgerToken::retry(second.id)).await.unwrap();

    consumer.stop_listener().await.unwrap();
    assert!(msg_rx.recv().await.is_none());
    drop(ack_tx);
    consumer.stop_acknowledger().await.unwrap();

    assert_eq!(broker.count(HeapType::Wip, &MessageFilter::default()), 0);
    let pending = broker.filter(HeapType::Q, &MessageFilter::default());
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, second.id);
    assert_eq!(pending[0].claim_comment, "");
    assert_eq!(consumer.active_processors(), 0);
}
