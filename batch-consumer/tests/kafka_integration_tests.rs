use std::sync::Arc;
use std::time::Duration;

use batch_consumer::kafka::context::BatchConsumerContext;
use batch_consumer::kafka::ConsumerConfigBuilder;
use batch_consumer::test_utils::RecordingProcessor;
use batch_consumer::{BatchConfig, ConsumerError, JsonDecoder, KafkaBatchConsumer};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::mocking::MockCluster;
use rdkafka::producer::{DefaultProducerContext, FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const TEST_TOPIC: &str = "batch-consumer-integration-test";
const TEST_GROUP: &str = "batch-consumer-integration-group";
const PARTITIONS: i32 = 2;

fn setup_mock_cluster(
    partitions: i32,
) -> (
    MockCluster<'static, DefaultProducerContext>,
    FutureProducer,
) {
    let cluster = MockCluster::new(1).expect("failed to create mock brokers");
    assert_eq!(cluster.create_topic(TEST_TOPIC, partitions, 1), Ok(()));

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", cluster.bootstrap_servers())
        .set("message.timeout.ms", "5000")
        .create()
        .expect("failed to create producer");

    (cluster, producer)
}

async fn produce(producer: &FutureProducer, partition: i32, payload: &[u8]) {
    let record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(TEST_TOPIC)
        .partition(partition)
        .payload(payload);
    producer
        .send(record, Timeout::After(Duration::from_secs(5)))
        .await
        .map_err(|(e, _)| e)
        .expect("failed to produce test message");
}

fn batch_consumer(
    cluster: &MockCluster<'static, DefaultProducerContext>,
    processor: Arc<RecordingProcessor<Value>>,
    shutdown: CancellationToken,
) -> KafkaBatchConsumer<JsonDecoder<Value>> {
    let config = ConsumerConfigBuilder::for_batch_consumer(&cluster.bootstrap_servers(), TEST_GROUP)
        .with_offset_reset("earliest")
        .with_session_timeout_ms(6000)
        .with_heartbeat_interval_ms(500)
        .build();

    KafkaBatchConsumer::new(
        &config,
        TEST_TOPIC,
        BatchConfig::new(3, Duration::from_millis(200)).unwrap(),
        JsonDecoder::<Value>::new(),
        processor,
        shutdown,
    )
    .expect("failed to create consumer")
}

fn committed_offset(consumer: &StreamConsumer<BatchConsumerContext>, partition: i32) -> Offset {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(TEST_TOPIC, partition);
    let committed = consumer
        .committed_offsets(tpl, Duration::from_secs(10))
        .expect("failed to fetch committed offsets");
    committed
        .find_partition(TEST_TOPIC, partition)
        .expect("partition missing from committed offsets")
        .offset()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_consumer_processes_and_commits_every_partition() {
    let (cluster, producer) = setup_mock_cluster(PARTITIONS);

    // five messages per partition, one of them undecodable
    for i in 0..10 {
        let partition = i % PARTITIONS;
        let payload = if i == 5 {
            b"not json".to_vec()
        } else {
            serde_json::to_vec(&json!({ "n": i })).unwrap()
        };
        produce(&producer, partition, &payload).await;
    }

    let processor = Arc::new(RecordingProcessor::<Value>::default());
    let shutdown = CancellationToken::new();
    let consumer = batch_consumer(&cluster, processor.clone(), shutdown.clone());
    let inner = consumer.inner_consumer();
    let handle = tokio::spawn(consumer.run());

    let decoded = || {
        processor
            .batches()
            .iter()
            .map(|b| b.values.len())
            .sum::<usize>()
    };
    timeout(Duration::from_secs(30), async {
        while decoded() < 9 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("timed out waiting for batches");

    shutdown.cancel();
    handle
        .await
        .expect("consumer task panicked")
        .expect("consumer stopped with an error");

    let batches = processor.batches();
    assert!(batches.iter().all(|b| b.succeeded));
    assert!(batches.iter().all(|b| b.values.len() <= 3));
    assert!(batches
        .iter()
        .flat_map(|b| b.values.iter())
        .all(|v| v.get("n").is_some()));

    for partition in 0..PARTITIONS {
        // the commit points past the last consumed message
        assert_eq!(committed_offset(inner.as_ref(), partition), Offset::Offset(5));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_processor_failure_stops_consumer_without_commit() {
    let (cluster, producer) = setup_mock_cluster(1);
    for i in 0..4 {
        let payload = serde_json::to_vec(&json!({ "n": i })).unwrap();
        produce(&producer, 0, &payload).await;
    }

    let processor = Arc::new(RecordingProcessor::<Value>::failing_on(1));
    let shutdown = CancellationToken::new();
    let consumer = batch_consumer(&cluster, processor.clone(), shutdown.clone());
    let inner = consumer.inner_consumer();

    // no cancellation: the failure alone has to end the run
    let err = timeout(Duration::from_secs(30), consumer.run())
        .await
        .expect("consumer kept running after a failed batch")
        .unwrap_err();

    match err {
        ConsumerError::Processing {
            partition,
            first_offset,
            ..
        } => {
            assert_eq!(partition.topic(), TEST_TOPIC);
            assert_eq!(partition.partition_number(), 0);
            assert_eq!(first_offset, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!shutdown.is_cancelled());
    assert_eq!(processor.call_count(), 1);
    assert!(!processor.batches()[0].succeeded);

    // nothing was acknowledged, so the batch is handed out again
    assert_eq!(committed_offset(inner.as_ref(), 0), Offset::Invalid);
}
