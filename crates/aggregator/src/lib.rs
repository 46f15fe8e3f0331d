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
    codec::{AggregatedPageViewAvroConverter, PageViewDecoder},
    config::{AggregatorConfig, PublisherEndpoint},
    inputs::kafka::KafkaConsumerActorHandle,
    lanes::AggregationLaneActorHandle,
    publishers::PublisherActorHandle,
};
use futures_util::{stream::FuturesUnordered, StreamExt};
use std::time::Duration;
use tracing::{info, warn};

pub mod codec;
pub mod config;
pub mod inputs;
pub mod lanes;
pub mod publishers;
pub mod telemetry;

/// Consume page views, count them per lane and publish every updated count.
///
/// Returns once the consumer or any lane or publisher exits, after shutting
/// down all the other actors.
pub async fn init_aggregation(
    config: AggregatorConfig,
    meter: opentelemetry::metrics::Meter,
) -> anyhow::Result<()> {
    config.aggregation.validate()?;
    let aggregation = config.aggregation.clone();
    let security = config.security.as_ref();

    let (consumer_join_handle, consumer_handle) = KafkaConsumerActorHandle::new(
        config.input.clone(),
        config.security.clone(),
        aggregation.partitions,
        aggregation.buffer_size,
        either::Left(meter.clone()),
    )?;

    let mut lane_handles = Vec::new();
    let mut publisher_handles = Vec::new();
    let mut join_set = FuturesUnordered::new();
    for (lane_id, records_rx) in consumer_handle.subscribe_lanes().into_iter().enumerate() {
        let decoder = PageViewDecoder::from_config(&config.input.value_format, security)?;
        let (lane_join, lane_handle) = AggregationLaneActorHandle::new(
            aggregation.buffer_size,
            records_rx,
            consumer_handle.processed_reporter(),
            decoder,
            aggregation.windowing(),
            aggregation.sweep_interval,
            either::Left(meter.clone()),
            lane_id,
        )?;
        join_set.push(lane_join);

        match &config.output {
            PublisherEndpoint::KafkaJson(output) => {
                info!(
                    "Creating Kafka JSON publisher to topic '{}' for lane {lane_id}",
                    output.topic
                );
                let (kafka_join, kafka_handle) = PublisherActorHandle::kafka_json(
                    output.clone(),
                    security,
                    lane_handle.subscribe(),
                    &meter,
                )?;
                join_set.push(kafka_join);
                publisher_handles.push(kafka_handle);
            }
            PublisherEndpoint::KafkaAvro(output) => {
                info!(
                    "Creating Kafka Avro publisher to topic '{}' for lane {lane_id}",
                    output.topic
                );
                let (kafka_join, kafka_handle) = PublisherActorHandle::kafka_avro(
                    output.clone(),
                    security,
                    AggregatedPageViewAvroConverter,
                    lane_handle.subscribe(),
                    &meter,
                )?;
                join_set.push(kafka_join);
                publisher_handles.push(kafka_handle);
            }
        }
        lane_handles.push(lane_handle);
    }

    let ret = tokio::select! {
        consumer_ret = consumer_join_handle => {
            info!("Kafka consumer exited, shutting down all lanes and publishers");
            for handle in &lane_handles {
                let _ = handle.shutdown().await;
            }
            for handle in publisher_handles {
                let topic = handle.topic().to_string();
                if let Err(err) = handle.shutdown().await {
                    warn!("Error in shutting down publisher to `{topic}`: {err}");
                }
            }
            match consumer_ret {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(err)) => Err(err),
                Err(err) => Err(anyhow::anyhow!(err)),
            }
        },
        join_ret = join_set.next() => {
            warn!("Aggregation lane or publisher exited, shutting down page view aggregation");
            let _ = tokio::time::timeout(Duration::from_secs(1), consumer_handle.shutdown()).await;
            for handle in &lane_handles {
                let _ = handle.shutdown().await;
            }
            for handle in publisher_handles {
                let topic = handle.topic().to_string();
                if let Err(err) = handle.shutdown().await {
                    warn!("Error in shutting down publisher to `{topic}`: {err}");
                }
            }
            match join_ret {
                None | Some(Ok(Ok(_))) => Ok(()),
                Some(Err(err)) => Err(anyhow::anyhow!(err)),
                Some(Ok(Err(err))) => Err(err),
            }
        }
    };
    ret
}
