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
    codec::schema_registry_settings,
    config::KafkaSecurityConfig,
    publishers::{
        producer_client_config, publisher_tags, PublisherActorHandle, PublisherCommand,
        PublisherError, PublisherStats,
    },
};
use rdkafka::{
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
};
use schema_registry_converter::{
    async_impl::avro::AvroEncoder,
    schema_registry_common::{SchemaType, SubjectNameStrategy, SuppliedSchema},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, marker::PhantomData, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};

/// Turns records into Avro values of a fixed schema
pub trait AvroConverter<T, E: std::error::Error> {
    fn get_avro_schema(&self) -> String;
    /// Kafka message key of the record, if any
    fn get_key(&self, input: &T) -> Option<String>;
    fn get_avro_value(&self, input: T) -> Result<apache_avro::types::Value, E>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Output topic
    pub topic: String,
    /// Key/Value producer configs are defined in librdkafka
    pub producer_config: HashMap<String, String>,
    pub schema_registry_url: String,
}

/// Registry subject schema for a converter schema string
pub fn supplied_schema(schema_str: String) -> Result<SuppliedSchema, PublisherError> {
    let schema = apache_avro::Schema::parse_str(&schema_str)
        .inspect_err(|err| error!("Invalid Avro schema `{schema_str}`: {err}"))?;
    Ok(SuppliedSchema {
        name: schema.name().map(|x| x.to_string()),
        schema_type: SchemaType::Avro,
        schema: schema_str,
        references: vec![],
        properties: None,
        tags: None,
    })
}

struct KafkaAvroPublisherActor<T, E, C> {
    cmd_rx: mpsc::Receiver<PublisherCommand>,
    topic: String,
    converter: C,
    subject_strategy: SubjectNameStrategy,
    producer: FutureProducer,
    encoder: AvroEncoder<'static>,
    results_rx: async_channel::Receiver<T>,
    stats: PublisherStats,
    tags: Box<[opentelemetry::KeyValue]>,
    _error: PhantomData<fn() -> E>,
}

impl<T, E, C> KafkaAvroPublisherActor<T, E, C>
where
    E: std::error::Error,
    C: AvroConverter<T, E>,
    PublisherError: From<E>,
{
    fn new(
        cmd_rx: mpsc::Receiver<PublisherCommand>,
        config: KafkaConfig,
        security: Option<&KafkaSecurityConfig>,
        converter: C,
        results_rx: async_channel::Receiver<T>,
        meter: &opentelemetry::metrics::Meter,
    ) -> Result<Self, PublisherError> {
        let producer: FutureProducer = producer_client_config(&config.producer_config, security)
            .create()
            .inspect_err(|err| error!("Failed to create Kafka Avro producer: {err}"))?;
        let sr_settings = schema_registry_settings(&config.schema_registry_url, security)?;
        let schema = supplied_schema(converter.get_avro_schema())?;
        info!(
            "Kafka Avro publisher to topic `{}` registers schema `{}`",
            config.topic,
            schema.name.as_deref().unwrap_or_default()
        );
        Ok(Self {
            cmd_rx,
            tags: publisher_tags(&config.topic, "avro"),
            subject_strategy: SubjectNameStrategy::TopicRecordNameStrategyWithSchema(
                config.topic.clone(),
                schema,
            ),
            topic: config.topic,
            converter,
            producer,
            encoder: AvroEncoder::new(sr_settings),
            results_rx,
            stats: PublisherStats::new(meter),
            _error: PhantomData,
        })
    }

    async fn encode(&self, input: T) -> Result<(Option<String>, Vec<u8>), PublisherError> {
        let key = self.converter.get_key(&input);
        let value = self.converter.get_avro_value(input)?;
        let payload = self
            .encoder
            .encode_value(value, &self.subject_strategy)
            .await?;
        Ok((key, payload))
    }

    async fn send(&self, input: T) -> Result<(), PublisherError> {
        let (key, payload) = self.encode(input).await.inspect_err(|err| {
            error!("Failed to encode aggregated result as Avro: {err}");
            self.stats.error_encode.add(1, &self.tags);
        })?;
        let mut record: FutureRecord<'_, str, Vec<u8>> =
            FutureRecord::to(self.topic.as_str()).payload(&payload);
        if let Some(key) = key.as_deref() {
            record = record.key(key);
        }
        match self
            .producer
            .send(record, Timeout::After(Duration::from_secs(1)))
            .await
        {
            Ok(_) => {
                self.stats.sent.add(1, &self.tags);
                Ok(())
            }
            Err((err, _)) => {
                error!("Failed to send Avro record to topic `{}`: {err}", self.topic);
                self.stats.error_send.add(1, &self.tags);
                Err(err.into())
            }
        }
    }

    fn flush(&self) {
        if let Err(err) = self.producer.flush(Duration::from_secs(1)) {
            error!("Failed to flush Avro records to `{}`: {err}", self.topic);
        }
    }

    async fn run(mut self) -> anyhow::Result<String> {
        info!("Starting Kafka Avro publisher to topic `{}`", self.topic);
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(PublisherCommand::Shutdown) => {
                            info!("Shutting down Kafka Avro publisher to `{}`", self.topic);
                        }
                        None => {
                            warn!(
                                "Kafka Avro publisher to `{}` stopped, command channel closed",
                                self.topic
                            );
                        }
                    }
                    self.flush();
                    return Ok("Kafka Avro publisher shutdown successfully".to_string());
                }
                result = self.results_rx.recv() => {
                    match result {
                        Ok(result) => {
                            self.stats.received.add(1, &self.tags);
                            let _ = self.send(result).await;
                        }
                        Err(err) => {
                            error!(
                                "Kafka Avro publisher to `{}` lost its input: {err}",
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
    /// Spawn a publisher writing each received record as a schema registry
    /// framed Avro message
    pub fn kafka_avro<T, E, C>(
        config: KafkaConfig,
        security: Option<&KafkaSecurityConfig>,
        converter: C,
        results_rx: async_channel::Receiver<T>,
        meter: &opentelemetry::metrics::Meter,
    ) -> Result<(JoinHandle<anyhow::Result<String>>, Self), PublisherError>
    where
        T: Send + 'static,
        E: std::error::Error + Send + 'static,
        C: AvroConverter<T, E> + Send + Sync + 'static,
        PublisherError: From<E>,
    {
        let (handle, cmd_rx) = Self::new(&config.topic);
        let actor =
            KafkaAvroPublisherActor::new(cmd_rx, config, security, converter, results_rx, meter)?;
        let join_handle = tokio::spawn(actor.run());
        Ok((join_handle, handle))
    }
}
