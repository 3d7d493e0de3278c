//! The real driver: rdkafka consumer and producer around a topology.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::PipelineError;
use crate::topology::Topology;
use crate::Message;

const PRODUCE_RETRIES: u32 = 3;
const PRODUCE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct KafkaDriver {
    tx: oneshot::Sender<()>,
    task: JoinHandle<Result<(), PipelineError>>,
}

impl KafkaDriver {
    /// Create the consumer and producer and start the poll loop.
    /// Client creation or subscription failure is fatal here; nothing
    /// has been consumed yet.
    pub fn start(
        brokers: &str,
        group_id: &str,
        topology: Topology,
    ) -> Result<KafkaDriver, PipelineError> {
        let consumer: StreamConsumer = consumer_config(brokers, group_id, None).create()?;

        let sources: Vec<&str> = topology.sources().iter().map(String::as_str).collect();
        consumer.subscribe(&sources)?;
        log::info!("subscribed to {:?}, sink {}", sources, topology.sink());

        let producer: FutureProducer = producer_config(brokers).create()?;

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(run(consumer, producer, topology, rx));

        Ok(KafkaDriver { tx, task })
    }
}

#[async_trait]
impl super::Driver for KafkaDriver {
    async fn stop(self) -> Result<(), PipelineError> {
        log::info!("shutting down");

        // the loop may already have exited on its own
        let _ = self.tx.send(());

        let result = self
            .task
            .await
            .map_err(|e| PipelineError::Driver(e.to_string()))?;

        log::info!("shut down complete");
        result
    }
}

async fn run(
    consumer: StreamConsumer,
    producer: FutureProducer,
    mut topology: Topology,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<(), PipelineError> {
    // next offset to consume per source partition, committed only as
    // far as the topology has let go of its buffered input
    let mut positions: HashMap<(String, i32), i64> = HashMap::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            polled = consumer.recv() => match polled {
                Err(e) => {
                    // transient; librdkafka reconnects underneath us
                    log::warn!("consume error: {}", e);
                }
                Ok(record) => {
                    let message = to_message(&record);
                    for output in topology.apply(&message) {
                        publish(&producer, &output).await?;
                    }

                    let next = message.offset + 1;
                    positions.insert((message.topic.clone(), message.partition), next);

                    // at-least-once: never commit past a record whose
                    // output is still buffered in the join
                    let committable = committable_offset(
                        next,
                        topology.held_offset(&message.topic, message.partition),
                    );

                    let mut tpl = TopicPartitionList::new();
                    tpl.add_partition_offset(
                        &message.topic,
                        message.partition,
                        Offset::Offset(committable),
                    )?;
                    if let Err(e) = consumer.commit(&tpl, CommitMode::Async) {
                        log::warn!("offset commit failed: {}", e);
                    }
                }
            }
        }
    }

    // graceful stop: drain the join, publish everything, then the
    // full positions are safe to commit
    for output in topology.flush() {
        publish(&producer, &output).await?;
    }
    producer.flush(PRODUCE_TIMEOUT);

    if !positions.is_empty() {
        let mut tpl = TopicPartitionList::new();
        for ((topic, partition), next) in &positions {
            tpl.add_partition_offset(topic, *partition, Offset::Offset(*next))?;
        }
        if let Err(e) = consumer.commit(&tpl, CommitMode::Sync) {
            log::warn!("final offset commit failed: {}", e);
        }
    }

    Ok(())
}

/// How far a partition may be committed: up to the next unconsumed
/// offset, unless the topology still holds an earlier record.
fn committable_offset(next: i64, held: Option<i64>) -> i64 {
    held.map_or(next, |held| held.min(next))
}

fn to_message(record: &impl KafkaMessage) -> Message {
    Message {
        topic: record.topic().to_string(),
        key: record.key().map(<[u8]>::to_vec),
        payload: record.payload().map(<[u8]>::to_vec),
        partition: record.partition(),
        offset: record.offset(),
        timestamp: record.timestamp(),
    }
}

/// Publish with a short retry ladder. Exhausting the retries is fatal:
/// the record's offset has not been committed, so failing the job here
/// means a restart redelivers it instead of silently losing it.
async fn publish(producer: &FutureProducer, message: &Message) -> Result<(), PipelineError> {
    let payload = match message.payload.as_deref() {
        Some(payload) => payload,
        None => return Ok(()),
    };

    let mut attempt = 0;
    loop {
        attempt += 1;

        let mut record: FutureRecord<[u8], [u8]> =
            FutureRecord::to(&message.topic).payload(payload);
        if let Some(key) = message.key.as_deref() {
            record = record.key(key);
        }

        match producer.send(record, PRODUCE_TIMEOUT).await {
            Ok((partition, offset)) => {
                log::debug!(
                    "published to {} partition {} offset {}",
                    message.topic,
                    partition,
                    offset
                );
                return Ok(());
            }
            Err((e, _)) if attempt < PRODUCE_RETRIES => {
                log::warn!(
                    "produce to {} failed (attempt {}/{}): {}",
                    message.topic,
                    attempt,
                    PRODUCE_RETRIES,
                    e
                );
                tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt - 1))).await;
            }
            Err((e, _)) => {
                log::error!("produce to {} failed, giving up: {}", message.topic, e);
                return Err(e.into());
            }
        }
    }
}

pub fn consumer_config(
    brokers: &str,
    group_id: &str,
    config_overrides: Option<HashMap<&str, &str>>,
) -> ClientConfig {
    let mut config = ClientConfig::new();

    config.set("group.id", group_id);
    config.set("bootstrap.servers", brokers);
    config.set("enable.partition.eof", "false");
    config.set("session.timeout.ms", "6000");
    config.set("enable.auto.commit", "false");
    config.set("api.version.request", "true");
    config.set("auto.offset.reset", "earliest");

    if let Some(overrides) = config_overrides {
        for (key, value) in overrides {
            config.set(key, value);
        }
    }

    config
}

pub fn producer_config(brokers: &str) -> ClientConfig {
    let mut config = ClientConfig::new();

    config.set("bootstrap.servers", brokers);
    config.set("message.timeout.ms", "5000");
    // preserve per-partition input order on retry
    config.set("max.in.flight.requests.per.connection", "1");

    config
}
