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

use crate::{
    config::KafkaSecurityConfig,
    publishers::{
        producer_client_config, publisher_tags, KeyedRecord, LoggingProducerContext,
        PublisherActorHandle, PublisherCommand, PublisherError, PublisherStats,
    },
};
use rdkafka::{
    config::FromClientConfigAndContext,
    error::{KafkaError, RDKafkaErrorCode},
    producer::{BaseRecord, Producer, ThreadedProducer},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// Give up on a record once the back-off on a full librdkafka queue grows
/// past this
const MAX_POLLING_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Output topic
    pub topic: String,
    /// Key/Value producer configs are defined in librdkafka
    pub producer_config: HashMap<String, String>,
}

/// Message key and JSON payload of a record
pub fn encode_json<T: Serialize + KeyedRecord>(
    input: &T,
) -> Result<(Option<String>, Vec<u8>), PublisherError> {
    Ok((input.record_key(), serde_json::to_vec(input)?))
}

struct KafkaJsonPublisherActor<T> {
    cmd_rx: mpsc::Receiver<PublisherCommand>,
    topic: String,
    producer: ThreadedProducer<LoggingProducerContext>,
    results_rx: async_channel::Receiver<T>,
    stats: PublisherStats,
    tags: Box<[opentelemetry::KeyValue]>,
}

impl<T: Serialize + KeyedRecord> KafkaJsonPublisherActor<T> {
    fn new(
        cmd_rx: mpsc::Receiver<PublisherCommand>,
        config: KafkaConfig,
        security: Option<&KafkaSecurityConfig>,
        results_rx: async_channel::Receiver<T>,
        meter: &opentelemetry::metrics::Meter,
    ) -> Result<Self, PublisherError> {
        let client_config = producer_client_config(&config.producer_config, security);
        let context = LoggingProducerContext::new(meter, &config.topic);
        let producer = ThreadedProducer::from_config_and_context(&client_config, context)
            .inspect_err(|err| error!("Failed to create Kafka JSON producer: {err}"))?;
        Ok(Self {
            cmd_rx,
            tags: publisher_tags(&config.topic, "json"),
            topic: config.topic,
            producer,
            results_rx,
            stats: PublisherStats::new(meter),
        })
    }

    fn record_send_error(&self, err: &KafkaError) {
        error!("Failed to send JSON record to topic `{}`: {err}", self.topic);
        self.stats.error_send.add(1, &self.tags);
    }

    /// Enqueue the record on the producer, backing off exponentially while
    /// the librdkafka queue is full
    async fn send(&self, input: T) -> Result<(), PublisherError> {
        let (key, payload) = encode_json(&input).inspect_err(|err| {
            error!("Failed to encode aggregated result as JSON: {err}");
            self.stats.error_encode.add(1, &self.tags);
        })?;
        let mut record: BaseRecord<'_, str, Vec<u8>> =
            BaseRecord::to(self.topic.as_str()).payload(&payload);
        if let Some(key) = key.as_deref() {
            record = record.key(key);
        }
        let mut polling_interval = Duration::from_micros(10);
        loop {
            match self.producer.send(record) {
                Ok(()) => {
                    self.stats.sent.add(1, &self.tags);
                    return Ok(());
                }
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), rejected))
                    if polling_interval <= MAX_POLLING_INTERVAL =>
                {
                    debug!("librdkafka queue is full, retrying in {polling_interval:?}");
                    self.stats.send_retries.add(1, &self.tags);
                    tokio::time::sleep(polling_interval).await;
                    polling_interval *= 2;
                    record = rejected;
                }
                Err((err, _)) => {
                    self.record_send_error(&err);
                    return Err(err.into());
                }
            }
        }
    }

    fn flush(&self) {
        if let Err(err) = self.producer.flush(Duration::from_secs(1)) {
            error!("Failed to flush JSON records to `{}`: {err}", self.topic);
        }
    }

    async fn run(mut self) -> anyhow::Result<String> {
        info!("Starting Kafka JSON publisher to topic `{}`", self.topic);
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(PublisherCommand::Shutdown) => {
                            info!("Shutting down Kafka JSON publisher to `{}`", self.topic);
                        }
                        None => {
                            warn!(
                                "Kafka JSON publisher to `{}` stopped, command channel closed",
                                self.topic
                            );
                        }
                    }
                    self.flush();
                    return Ok("Kafka JSON publisher shutdown successfully".to_string());
                }
                result = self.results_rx.recv() => {
                    match result {
                        Ok(result) => {
                            self.stats.received.add(1, &self.tags);
                            // Delivery failures are logged and counted, the
                            // publisher keeps going
                            let _ = self.send(result).await;
                        }
                        Err(err) => {
                            error!(
                                "Kafka JSON publisher to `{}` lost its input: {err}",
                                self.topic
                            );
                            self.flush();
                            return Err(PublisherError::ReceiveChannelError.into());
                        }
                    }
                }
            }
        }
    }
}

impl PublisherActorHandle {
    /// Spawn a publisher writing each received record as a JSON message
    pub fn kafka_json<T>(
        config: KafkaConfig,
        security: Option<&KafkaSecurityConfig>,
        results_rx: async_channel::Receiver<T>,
        meter: &opentelemetry::metrics::Meter,
    ) -> Result<(JoinHandle<anyhow::Result<String>>, Self), PublisherError>
    where
        T: Serialize + KeyedRecord + Send + 'static,
    {
        let (handle, cmd_rx) = Self::new(&config.topic);
        let actor = KafkaJsonPublisherActor::new(cmd_rx, config, security, results_rx, meter)?;
        let join_handle = tokio::spawn(actor.run());
        Ok((join_handle, handle))
    }
}
