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

//! Kafka publishers of the aggregated results.
//!
//! Both publishers run as actors reading from an `async_channel` and are
//! controlled through a [`PublisherActorHandle`]. Records are keyed with
//! [`KeyedRecord::record_key`] so every update of a postcode lands on the
//! same output partition.

use crate::config::KafkaSecurityConfig;
use rdkafka::{
    config::ClientConfig,
    error::KafkaError,
    message::DeliveryResult,
    producer::{NoCustomPartitioner, ProducerContext},
    ClientContext,
};
use schema_registry_converter::error::SRCError;
use std::{collections::HashMap, convert::Infallible};
use tokio::sync::mpsc;
use tracing::{trace, warn};

pub mod kafka_avro;
pub mod kafka_json;

/// Records published with a Kafka message key
pub trait KeyedRecord {
    fn record_key(&self) -> Option<String>;
}

#[derive(Debug)]
pub enum PublisherError {
    Kafka(KafkaError),
    Json(serde_json::Error),
    Avro(apache_avro::Error),
    SchemaRegistry(SRCError),
    ReceiveChannelError,
}

impl std::fmt::Display for PublisherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kafka(err) => write!(f, "Kafka error: {err}"),
            Self::Json(err) => write!(f, "JSON serialization error: {err}"),
            Self::Avro(err) => write!(f, "Avro error: {err}"),
            Self::SchemaRegistry(err) => write!(f, "schema registry error: {err}"),
            Self::ReceiveChannelError => write!(f, "aggregation results channel is closed"),
        }
    }
}

impl std::error::Error for PublisherError {}

impl From<KafkaError> for PublisherError {
    fn from(err: KafkaError) -> Self {
        Self::Kafka(err)
    }
}

impl From<serde_json::Error> for PublisherError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<apache_avro::Error> for PublisherError {
    fn from(err: apache_avro::Error) -> Self {
        Self::Avro(err)
    }
}

impl From<SRCError> for PublisherError {
    fn from(err: SRCError) -> Self {
        Self::SchemaRegistry(err)
    }
}

impl From<Infallible> for PublisherError {
    fn from(err: Infallible) -> Self {
        match err {}
    }
}

#[derive(Debug, Clone)]
pub struct PublisherStats {
    received: opentelemetry::metrics::Counter<u64>,
    sent: opentelemetry::metrics::Counter<u64>,
    send_retries: opentelemetry::metrics::Counter<u64>,
    error_encode: opentelemetry::metrics::Counter<u64>,
    error_send: opentelemetry::metrics::Counter<u64>,
}

impl PublisherStats {
    pub fn new(meter: &opentelemetry::metrics::Meter) -> Self {
        let received = meter
            .u64_counter("pageview.aggregator.publisher.received")
            .with_description("Number of aggregated results received from the lane")
            .build();
        let sent = meter
            .u64_counter("pageview.aggregator.publisher.sent")
            .with_description("Number of aggregated results handed over to the Kafka producer")
            .build();
        let send_retries = meter
            .u64_counter("pageview.aggregator.publisher.send.retries")
            .with_description("Number of send retries due to a full librdkafka queue")
            .build();
        let error_encode = meter
            .u64_counter("pageview.aggregator.publisher.error_encode")
            .with_description("Number of aggregated results that could not be encoded")
            .build();
        let error_send = meter
            .u64_counter("pageview.aggregator.publisher.error_send")
            .with_description("Number of aggregated results that could not be sent to Kafka")
            .build();
        Self {
            received,
            sent,
            send_retries,
            error_encode,
            error_send,
        }
    }
}

/// Telemetry attributes identifying a publisher
fn publisher_tags(topic: &str, format: &'static str) -> Box<[opentelemetry::KeyValue]> {
    vec![
        opentelemetry::KeyValue::new("topic", topic.to_string()),
        opentelemetry::KeyValue::new("format", format),
    ]
    .into_boxed_slice()
}

/// librdkafka producer settings with the deployment security applied on top
pub fn producer_client_config(
    producer_config: &HashMap<String, String>,
    security: Option<&KafkaSecurityConfig>,
) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    for (k, v) in producer_config {
        client_config.set(k.as_str(), v.as_str());
    }
    if let Some(security) = security {
        security.apply(&mut client_config);
    }
    client_config
}

#[derive(Debug, Clone, Copy)]
enum PublisherCommand {
    Shutdown,
}

#[derive(Debug)]
pub enum PublisherActorHandleError {
    SendError,
}

impl std::fmt::Display for PublisherActorHandleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendError => write!(f, "Failed to send command to the publisher actor"),
        }
    }
}

impl std::error::Error for PublisherActorHandleError {}

/// Shutdown control of a running publisher actor
#[derive(Debug)]
pub struct PublisherActorHandle {
    cmd_tx: mpsc::Sender<PublisherCommand>,
    topic: String,
}

impl PublisherActorHandle {
    fn new(topic: &str) -> (Self, mpsc::Receiver<PublisherCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(10);
        let handle = Self {
            cmd_tx,
            topic: topic.to_string(),
        };
        (handle, cmd_rx)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn shutdown(self) -> Result<(), PublisherActorHandleError> {
        self.cmd_tx
            .send(PublisherCommand::Shutdown)
            .await
            .map_err(|_| PublisherActorHandleError::SendError)
    }
}

/// Producer context with tracing logs enabled
#[derive(Clone)]
pub struct LoggingProducerContext {
    telemetry_attributes: Box<[opentelemetry::KeyValue]>,
    delivered_messages: opentelemetry::metrics::Counter<u64>,
    failed_delivery_messages: opentelemetry::metrics::Counter<u64>,
}

impl LoggingProducerContext {
    pub fn new(meter: &opentelemetry::metrics::Meter, topic: &str) -> Self {
        let delivered_messages = meter
            .u64_counter("pageview.aggregator.kafka.delivered")
            .with_description("Number of messages acknowledged by the Kafka brokers")
            .build();
        let failed_delivery_messages = meter
            .u64_counter("pageview.aggregator.kafka.delivery_failed")
            .with_description("Number of messages the Kafka brokers failed to acknowledge")
            .build();
        Self {
            telemetry_attributes: vec![opentelemetry::KeyValue::new("topic", topic.to_string())]
                .into_boxed_slice(),
            delivered_messages,
            failed_delivery_messages,
        }
    }
}

impl ClientContext for LoggingProducerContext {}

impl ProducerContext<NoCustomPartitioner> for LoggingProducerContext {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _: Self::DeliveryOpaque) {
        match delivery_result {
            Ok(_) => {
                trace!("Aggregated result delivered to Kafka");
                self.delivered_messages.add(1, &self.telemetry_attributes);
            }
            Err((err, _)) => {
                warn!("Failed to deliver aggregated result to Kafka: {err}");
                self.failed_delivery_messages
                    .add(1, &self.telemetry_attributes)
            }
        }
    }
}
