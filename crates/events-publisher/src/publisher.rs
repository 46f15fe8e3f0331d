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

use crate::{config::EventsPublisherConfig, generator::PageViewGenerator};
use pageview_aggregator::{
    codec::{schema_registry_settings, PageViewEvent, PageViewEventAvroConverter, ValueFormat},
    publishers::{
        kafka_avro::{supplied_schema, AvroConverter},
        PublisherError,
    },
};
use rand::Rng;
use rdkafka::{
    config::ClientConfig,
    error::KafkaError,
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use schema_registry_converter::{
    async_impl::avro::AvroEncoder,
    error::SRCError,
    schema_registry_common::{SubjectNameStrategy, SuppliedSchema},
};
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug)]
pub enum EventsPublisherError {
    Kafka(KafkaError),
    Json(serde_json::Error),
    Avro(apache_avro::Error),
    SchemaRegistry(SRCError),
    Schema(PublisherError),
}

impl std::fmt::Display for EventsPublisherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kafka(err) => write!(f, "Kafka error: {err}"),
            Self::Json(err) => write!(f, "JSON encoding error: {err}"),
            Self::Avro(err) => write!(f, "Avro error: {err}"),
            Self::SchemaRegistry(err) => write!(f, "schema registry error: {err}"),
            Self::Schema(err) => write!(f, "invalid page view schema: {err}"),
        }
    }
}

impl std::error::Error for EventsPublisherError {}

impl From<KafkaError> for EventsPublisherError {
    fn from(err: KafkaError) -> Self {
        Self::Kafka(err)
    }
}

impl From<serde_json::Error> for EventsPublisherError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<apache_avro::Error> for EventsPublisherError {
    fn from(err: apache_avro::Error) -> Self {
        Self::Avro(err)
    }
}

impl From<SRCError> for EventsPublisherError {
    fn from(err: SRCError) -> Self {
        Self::SchemaRegistry(err)
    }
}

impl From<PublisherError> for EventsPublisherError {
    fn from(err: PublisherError) -> Self {
        Self::Schema(err)
    }
}

enum ValueEncoder {
    Json,
    Avro {
        encoder: Box<AvroEncoder<'static>>,
        converter: PageViewEventAvroConverter,
        schema: SuppliedSchema,
    },
}

/// Encode a page view as a JSON object
pub fn encode_json(event: &PageViewEvent) -> Result<Vec<u8>, EventsPublisherError> {
    Ok(serde_json::to_vec(event)?)
}

/// Publishes page views keyed by postcode
pub struct EventsPublisher {
    topic: String,
    producer: FutureProducer,
    encoder: ValueEncoder,
}

impl EventsPublisher {
    pub fn from_config(config: &EventsPublisherConfig) -> Result<Self, EventsPublisherError> {
        let mut producer_config = ClientConfig::new();
        producer_config.set("acks", "all");
        for (k, v) in &config.producer_config {
            producer_config.set(k.as_str(), v.as_str());
        }
        if let Some(security) = &config.security {
            security.apply(&mut producer_config);
        }
        let producer: FutureProducer = producer_config.create()?;
        let encoder = match &config.value_format {
            ValueFormat::Json => ValueEncoder::Json,
            ValueFormat::Avro(registry) => {
                let sr_settings =
                    schema_registry_settings(&registry.url, config.security.as_ref())?;
                let converter = PageViewEventAvroConverter::new()?;
                let schema = supplied_schema(converter.get_avro_schema())?;
                ValueEncoder::Avro {
                    encoder: Box::new(AvroEncoder::new(sr_settings)),
                    converter,
                    schema,
                }
            }
        };
        Ok(Self {
            topic: config.topic.clone(),
            producer,
            encoder,
        })
    }

    async fn encode(&self, event: PageViewEvent) -> Result<Vec<u8>, EventsPublisherError> {
        match &self.encoder {
            ValueEncoder::Json => encode_json(&event),
            ValueEncoder::Avro {
                encoder,
                converter,
                schema,
            } => {
                let value = converter.get_avro_value(event)?;
                let strategy = SubjectNameStrategy::TopicRecordNameStrategyWithSchema(
                    self.topic.clone(),
                    schema.clone(),
                );
                Ok(encoder.encode_value(value, &strategy).await?)
            }
        }
    }

    /// Publish a single event and wait for the broker acknowledgement
    pub async fn publish(&self, event: PageViewEvent) -> Result<(), EventsPublisherError> {
        let key = event.postcode.clone();
        info!(
            "Publishing page view to topic={} key={key} webpage={:?}",
            self.topic, event.webpage
        );
        let payload = self.encode(event).await?;
        let record = FutureRecord::to(self.topic.as_str())
            .key(key.as_str())
            .payload(&payload);
        match self
            .producer
            .send(record, Timeout::After(Duration::from_secs(5)))
            .await
        {
            Ok(delivery) => {
                info!(
                    "Published page view key={key} partition={} offset={}",
                    delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((err, _)) => {
                error!("Failed to publish page view key={key}: {err}");
                Err(err.into())
            }
        }
    }
}

/// Publish `config.count` random page views, pausing `config.interval`
/// between two of them.
pub async fn publish_events<R: Rng>(
    config: &EventsPublisherConfig,
    mut generator: PageViewGenerator<R>,
) -> anyhow::Result<()> {
    let publisher = EventsPublisher::from_config(config)?;
    info!(
        "Loaded {} postcodes: {:?}",
        generator.postcodes().len(),
        generator.postcodes()
    );
    for i in 0..config.count {
        let event = generator.next_event(chrono::Utc::now());
        publisher.publish(event).await?;
        if i + 1 < config.count {
            tokio::time::sleep(config.interval).await;
        }
    }
    info!("Published {} page views to {}", config.count, config.topic);
    Ok(())
}
