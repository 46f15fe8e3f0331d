// Copyright (C) 2025-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Kafka consumer actor feeding the aggregation lanes.
//!
//! - `KafkaConsumerActor` - consumes the page view topic
//! - `KafkaConsumerActorHandle` - shutdown control and access to the lane
//!   channels
//! - `KafkaConsumerStats` - consumer metrics
//!
//! For each Kafka message:
//! 1. Skip it when the payload is empty (tombstone)
//! 2. Wrap partition, offset, key, timestamp and payload into an
//!    [`InputRecord`]
//! 3. Send it to lane `partition % lanes`, so records of one partition are
//!    always processed in order by the same lane
//!
//! Sending waits for room in the lane channel, a slow lane throttles the
//! consumer instead of losing records.
//!
//! Offsets are stored for commit only once a lane reports the record as
//! processed. Whatever a halted lane still held is consumed again after a
//! restart.
use crate::{
    config::KafkaSecurityConfig,
    inputs::kafka::{lane_for_partition, InputRecord, KafkaInputConfig, ProcessedOffset},
};
use chrono::DateTime;
use rdkafka::{
    config::ClientConfig,
    consumer::{
        stream_consumer::StreamConsumer, BaseConsumer, Consumer, ConsumerContext, Rebalance,
    },
    error::{KafkaError, KafkaResult, RDKafkaErrorCode},
    message::BorrowedMessage,
    ClientContext, Message, Offset, TopicPartitionList,
};
use std::{str::Utf8Error, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, trace, warn};

const METADATA_TIMEOUT: Duration = Duration::from_secs(5);
const BROKERS_DOWN_RETRY_DELAY: Duration = Duration::from_secs(60);
const FATAL_ERROR_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum KafkaConsumerActorError {
    Kafka(KafkaError),
    Utf8(Utf8Error),
    LaneClosed(usize),
}

impl std::fmt::Display for KafkaConsumerActorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kafka(err) => write!(f, "Kafka consumer error: {err}"),
            Self::Utf8(err) => write!(f, "record key is not valid UTF-8: {err}"),
            Self::LaneClosed(lane) => write!(f, "aggregation lane {lane} is closed"),
        }
    }
}

impl std::error::Error for KafkaConsumerActorError {}

impl From<KafkaError> for KafkaConsumerActorError {
    fn from(err: KafkaError) -> Self {
        Self::Kafka(err)
    }
}

impl From<Utf8Error> for KafkaConsumerActorError {
    fn from(err: Utf8Error) -> Self {
        Self::Utf8(err)
    }
}

#[derive(Debug, Clone)]
pub struct KafkaConsumerStats {
    received: opentelemetry::metrics::Counter<u64>,
    tombstones: opentelemetry::metrics::Counter<u64>,
    routed: opentelemetry::metrics::Counter<u64>,
    offsets_stored: opentelemetry::metrics::Counter<u64>,
    reconnects: opentelemetry::metrics::Counter<u64>,
}

impl KafkaConsumerStats {
    pub fn new(meter: opentelemetry::metrics::Meter) -> Self {
        let received = meter
            .u64_counter("pageview.aggregator.input.kafka.received")
            .with_description("Number of page view records consumed from the input topic")
            .build();
        let tombstones = meter
            .u64_counter("pageview.aggregator.input.kafka.empty_payload")
            .with_description("Number of consumed records skipped for having no payload")
            .build();
        let routed = meter
            .u64_counter("pageview.aggregator.input.kafka.routed")
            .with_description("Number of records handed over to an aggregation lane")
            .build();
        let offsets_stored = meter
            .u64_counter("pageview.aggregator.input.kafka.offsets_stored")
            .with_description("Number of processed record offsets stored for commit")
            .build();
        let reconnects = meter
            .u64_counter("pageview.aggregator.input.kafka.reconnect_attempts")
            .with_description("Number of attempts to reconnect to the Kafka brokers")
            .build();
        Self {
            received,
            tombstones,
            routed,
            offsets_stored,
            reconnects,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KafkaConsumerActorCommand {
    Shutdown,
}

/// Outcome of handing a record over to a lane
#[derive(Debug, PartialEq, Eq)]
enum Routed {
    Delivered,
    /// A command arrived while the lane was full, `None` when the command
    /// channel closed
    Interrupted(Option<KafkaConsumerActorCommand>),
}

/// Logs rebalancing and commit events of the consumer
struct KafkaContext;

impl ClientContext for KafkaContext {}

impl ConsumerContext for KafkaContext {
    fn pre_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        info!("Input partitions about to be rebalanced: {rebalance:?}");
    }

    fn post_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        info!("Input partitions rebalanced: {rebalance:?}");
    }

    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        debug!("Committed {} input offsets: {result:?}", offsets.count());
    }
}

/// librdkafka consumer config. Offsets are stored only once the lanes report
/// a record as processed, the periodic auto commit then picks them up.
fn consumer_client_config(
    config: &KafkaInputConfig,
    security: Option<&KafkaSecurityConfig>,
) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    for (k, v) in &config.consumer_config {
        client_config.set(k.as_str(), v.as_str());
    }
    if let Some(security) = security {
        security.apply(&mut client_config);
    }
    client_config.set("enable.auto.offset.store", "false");
    client_config
}

/// Create the consumer, subscribe it and make sure the brokers answer for
/// the input topic
fn connect(
    config: &KafkaInputConfig,
    security: Option<&KafkaSecurityConfig>,
) -> Result<StreamConsumer<KafkaContext>, KafkaConsumerActorError> {
    let consumer: StreamConsumer<KafkaContext> = consumer_client_config(config, security)
        .create_with_context(KafkaContext)
        .inspect_err(|err| error!("Failed to create Kafka consumer: {err}"))?;
    consumer
        .subscribe(&[config.topic.as_str()])
        .inspect_err(|err| error!("Failed to subscribe to topic `{}`: {err}", config.topic))?;
    let metadata = consumer
        .fetch_metadata(Some(&config.topic), METADATA_TIMEOUT)
        .inspect_err(|err| {
            error!(
                "Failed to fetch metadata of topic `{}` from the Kafka brokers: {err}",
                config.topic
            )
        })?;
    let partitions = metadata
        .topics()
        .first()
        .map(|topic| topic.partitions().len())
        .unwrap_or_default();
    info!(
        "Connected to Kafka, topic `{}` has {partitions} partitions",
        config.topic
    );
    Ok(consumer)
}

struct KafkaConsumerActor {
    cmd_rx: mpsc::Receiver<KafkaConsumerActorCommand>,
    config: KafkaInputConfig,
    security: Option<KafkaSecurityConfig>,
    consumer: StreamConsumer<KafkaContext>,
    lanes: Vec<async_channel::Sender<InputRecord>>,
    processed_rx: mpsc::UnboundedReceiver<ProcessedOffset>,
    stats: KafkaConsumerStats,
    tags: Box<[opentelemetry::KeyValue]>,
}

impl KafkaConsumerActor {
    fn new(
        config: KafkaInputConfig,
        security: Option<KafkaSecurityConfig>,
        cmd_rx: mpsc::Receiver<KafkaConsumerActorCommand>,
        lanes: Vec<async_channel::Sender<InputRecord>>,
        processed_rx: mpsc::UnboundedReceiver<ProcessedOffset>,
        stats: KafkaConsumerStats,
    ) -> Result<Self, KafkaConsumerActorError> {
        let consumer = connect(&config, security.as_ref())?;
        let tags = vec![
            opentelemetry::KeyValue::new("topic", config.topic.clone()),
            opentelemetry::KeyValue::new("format", config.value_format.to_string()),
        ]
        .into_boxed_slice();
        Ok(Self {
            cmd_rx,
            config,
            security,
            consumer,
            lanes,
            processed_rx,
            stats,
            tags,
        })
    }

    /// Keep recreating the consumer every `delay` until the brokers answer
    async fn reconnect(&mut self, delay: Duration) {
        loop {
            tokio::time::sleep(delay).await;
            self.stats.reconnects.add(1, &self.tags);
            match connect(&self.config, self.security.as_ref()) {
                Ok(consumer) => {
                    info!("Reconnected to the Kafka brokers");
                    self.consumer = consumer;
                    return;
                }
                Err(err) => {
                    warn!("Reconnecting to the Kafka brokers failed, retrying in {delay:?}: {err}");
                }
            }
        }
    }

    /// `None` for tombstones, which carry no page view
    fn input_record(
        &self,
        msg: &BorrowedMessage<'_>,
    ) -> Result<Option<InputRecord>, KafkaConsumerActorError> {
        let partition = msg.partition();
        let offset = msg.offset();
        let payload = match msg.payload() {
            Some(payload) if !payload.is_empty() => payload.to_vec(),
            _ => {
                self.stats.tombstones.add(1, &self.tags);
                warn!(
                    "Skipping empty record of `{}` at partition {partition} offset {offset}",
                    self.config.topic
                );
                return Ok(None);
            }
        };
        let key = msg
            .key()
            .map(std::str::from_utf8)
            .transpose()
            .inspect_err(|err| {
                error!(
                    "Invalid record key at topic `{}` partition {partition} offset {offset}: {err}",
                    self.config.topic
                )
            })?
            .map(str::to_string);
        Ok(Some(InputRecord {
            partition,
            offset,
            key,
            timestamp: msg
                .timestamp()
                .to_millis()
                .and_then(DateTime::from_timestamp_millis),
            payload,
        }))
    }

    /// Hand the record over to the lane owning its partition, waiting for
    /// room when the lane is behind
    async fn route(&mut self, record: InputRecord) -> Result<Routed, KafkaConsumerActorError> {
        let lane = lane_for_partition(record.partition, self.lanes.len());
        trace!(
            "Routing record at partition {} offset {} to lane {lane}",
            record.partition,
            record.offset
        );
        let lane_tx = self
            .lanes
            .get(lane)
            .ok_or(KafkaConsumerActorError::LaneClosed(lane))?;
        let routed = deliver(lane, lane_tx, record, &mut self.cmd_rx).await?;
        if routed == Routed::Delivered {
            self.stats.routed.add(1, &self.tags);
        }
        Ok(routed)
    }

    /// Mark a processed record for the next commit. The committed position is
    /// the offset following it.
    fn store_processed(&self, processed: ProcessedOffset) {
        let mut offsets = TopicPartitionList::new();
        let stored = offsets
            .add_partition_offset(
                &self.config.topic,
                processed.partition,
                Offset::Offset(processed.offset + 1),
            )
            .and_then(|_| self.consumer.store_offsets(&offsets));
        match stored {
            Ok(()) => self.stats.offsets_stored.add(1, &self.tags),
            Err(err) => warn!(
                "Failed to store offset {} of partition {}: {err}",
                processed.offset, processed.partition
            ),
        }
    }

    fn stop(&self, cmd: Option<KafkaConsumerActorCommand>) -> String {
        match cmd {
            Some(KafkaConsumerActorCommand::Shutdown) => {
                info!("Shutting down Kafka consumer of `{}`", self.config.topic);
            }
            None => {
                warn!(
                    "Kafka consumer of `{}` terminated due to command channel closing",
                    self.config.topic
                );
            }
        }
        "Kafka consumer shutdown successfully".to_string()
    }

    /// Recover from broker outages, fail on a missing topic and skip any
    /// other consumption error
    async fn recover(&mut self, err: KafkaError) -> Result<(), KafkaConsumerActorError> {
        match err {
            KafkaError::MessageConsumption(RDKafkaErrorCode::AllBrokersDown) => {
                error!("All Kafka brokers are down, reconnecting: {err}");
                self.reconnect(BROKERS_DOWN_RETRY_DELAY).await;
                Ok(())
            }
            KafkaError::MessageConsumption(RDKafkaErrorCode::UnknownTopicOrPartition) => {
                error!("Input topic `{}` does not exist: {err}", self.config.topic);
                Err(err.into())
            }
            KafkaError::MessageConsumptionFatal(code) => {
                error!("Fatal Kafka consumption error, reconnecting: {code}");
                self.reconnect(FATAL_ERROR_RETRY_DELAY).await;
                Ok(())
            }
            err => {
                warn!("Ignoring Kafka consumption error: {err}");
                Ok(())
            }
        }
    }

    async fn run(mut self) -> anyhow::Result<String> {
        info!(
            "Consuming {} page views from topic `{}` into {} lanes",
            self.config.value_format,
            self.config.topic,
            self.lanes.len()
        );
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => return Ok(self.stop(cmd)),
                Some(processed) = self.processed_rx.recv() => self.store_processed(processed),
                msg = self.consumer.recv() => {
                    let record = match msg {
                        Ok(msg) => {
                            self.stats.received.add(1, &self.tags);
                            self.input_record(&msg)?
                        }
                        Err(err) => {
                            self.recover(err).await?;
                            None
                        }
                    };
                    if let Some(record) = record {
                        if let Routed::Interrupted(cmd) = self.route(record).await? {
                            return Ok(self.stop(cmd));
                        }
                    }
                }
            }
        }
    }
}

/// Send the record to the lane while still listening for commands, so a
/// back-pressured lane cannot delay a shutdown
async fn deliver(
    lane: usize,
    lane_tx: &async_channel::Sender<InputRecord>,
    record: InputRecord,
    cmd_rx: &mut mpsc::Receiver<KafkaConsumerActorCommand>,
) -> Result<Routed, KafkaConsumerActorError> {
    tokio::select! {
        biased;
        cmd = cmd_rx.recv() => Ok(Routed::Interrupted(cmd)),
        sent = lane_tx.send(record) => match sent {
            Ok(()) => Ok(Routed::Delivered),
            Err(err) => {
                error!("Failed to hand record over to aggregation lane {lane}: {err}");
                Err(KafkaConsumerActorError::LaneClosed(lane))
            }
        },
    }
}

#[derive(Debug)]
pub enum KafkaConsumerActorHandleError {
    SendError,
}

impl std::fmt::Display for KafkaConsumerActorHandleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendError => write!(f, "Failed to send command to Kafka consumer actor"),
        }
    }
}

impl std::error::Error for KafkaConsumerActorHandleError {}

/// Handle for controlling a Kafka consumer actor and reaching its lanes.
#[derive(Debug)]
pub struct KafkaConsumerActorHandle {
    cmd_send: mpsc::Sender<KafkaConsumerActorCommand>,
    lane_rxs: Vec<async_channel::Receiver<InputRecord>>,
    processed_tx: mpsc::UnboundedSender<ProcessedOffset>,
}

impl KafkaConsumerActorHandle {
    /// Start consuming, records are split over `lanes` bounded channels of
    /// `buffer_size` each.
    pub fn new(
        config: KafkaInputConfig,
        security: Option<KafkaSecurityConfig>,
        lanes: usize,
        buffer_size: usize,
        stats: either::Either<opentelemetry::metrics::Meter, KafkaConsumerStats>,
    ) -> Result<(JoinHandle<anyhow::Result<String>>, Self), KafkaConsumerActorError> {
        let (cmd_send, cmd_rx) = mpsc::channel::<KafkaConsumerActorCommand>(1);
        let stats = match stats {
            either::Left(meter) => KafkaConsumerStats::new(meter),
            either::Right(stats) => stats,
        };
        let (lane_txs, lane_rxs): (Vec<_>, Vec<_>) = (0..lanes.max(1))
            .map(|_| async_channel::bounded(buffer_size.max(1)))
            .unzip();
        let (processed_tx, processed_rx) = mpsc::unbounded_channel();
        let actor =
            KafkaConsumerActor::new(config, security, cmd_rx, lane_txs, processed_rx, stats)?;
        let join_handle = tokio::spawn(actor.run());
        let handle = KafkaConsumerActorHandle {
            cmd_send,
            lane_rxs,
            processed_tx,
        };
        Ok((join_handle, handle))
    }

    /// Receivers of every lane, index `i` carries the records of lane `i`
    pub fn subscribe_lanes(&self) -> Vec<async_channel::Receiver<InputRecord>> {
        self.lane_rxs.clone()
    }

    /// Channel for the lanes to report records they are done with
    pub fn processed_reporter(&self) -> mpsc::UnboundedSender<ProcessedOffset> {
        self.processed_tx.clone()
    }

    pub async fn shutdown(&self) -> Result<(), KafkaConsumerActorHandleError> {
        self.cmd_send
            .send(KafkaConsumerActorCommand::Shutdown)
            .await
            .map_err(|_| KafkaConsumerActorHandleError::SendError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ValueFormat;
    use std::collections::HashMap;

    fn input_config() -> KafkaInputConfig {
        let mut consumer_config = HashMap::new();
        consumer_config.insert("bootstrap.servers".to_string(), "kafka:9092".to_string());
        consumer_config.insert("group.id".to_string(), "pageview-aggregator".to_string());
        consumer_config.insert("enable.auto.offset.store".to_string(), "true".to_string());
        KafkaInputConfig {
            topic: "page-views".to_string(),
            value_format: ValueFormat::Json,
            consumer_config,
        }
    }

    fn record(offset: i64) -> InputRecord {
        InputRecord {
            partition: 0,
            offset,
            key: Some("SW1".to_string()),
            timestamp: None,
            payload: b"{}".to_vec(),
        }
    }

    #[test]
    fn test_offsets_are_stored_only_after_processing() {
        let client_config = consumer_client_config(&input_config(), None);
        assert_eq!(client_config.get("enable.auto.offset.store"), Some("false"));
        assert_eq!(client_config.get("bootstrap.servers"), Some("kafka:9092"));
        assert_eq!(client_config.get("group.id"), Some("pageview-aggregator"));
    }

    #[tokio::test]
    async fn test_deliver_to_lane() {
        let (_cmd_tx, mut cmd_rx) = mpsc::channel(1);
        let (lane_tx, lane_rx) = async_channel::bounded(1);

        let routed = deliver(0, &lane_tx, record(3), &mut cmd_rx).await;
        assert_eq!(routed.unwrap(), Routed::Delivered);
        assert_eq!(lane_rx.recv().await.unwrap(), record(3));
    }

    #[tokio::test]
    async fn test_deliver_to_closed_lane() {
        let (_cmd_tx, mut cmd_rx) = mpsc::channel(1);
        let (lane_tx, lane_rx) = async_channel::bounded(1);
        drop(lane_rx);

        let routed = deliver(4, &lane_tx, record(3), &mut cmd_rx).await;
        assert!(matches!(routed, Err(KafkaConsumerActorError::LaneClosed(4))));
    }

    #[tokio::test]
    async fn test_shutdown_while_lane_is_full() {
        let (cmd_tx, mut cmd_rx) = mpsc::channel(1);
        let (lane_tx, lane_rx) = async_channel::bounded(1);
        lane_tx.send(record(1)).await.unwrap();

        let pending = tokio::spawn(async move {
            let routed = deliver(0, &lane_tx, record(2), &mut cmd_rx).await;
            (routed, lane_tx)
        });
        cmd_tx.send(KafkaConsumerActorCommand::Shutdown).await.unwrap();

        let (routed, _lane_tx) = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            routed.unwrap(),
            Routed::Interrupted(Some(KafkaConsumerActorCommand::Shutdown))
        );
        // The interrupted record never reached the lane
        assert_eq!(lane_rx.len(), 1);
        assert_eq!(lane_rx.recv().await.unwrap(), record(1));
    }
}
