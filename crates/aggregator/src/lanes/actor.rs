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
    codec::{AggregatedPageView, PageViewDecoder, PageViewEvent},
    inputs::kafka::{InputRecord, ProcessedOffset},
};
use chrono::{DateTime, Utc};
use either::Either;
use opentelemetry::metrics::Meter;
use pageview_analytics::{
    aggregation::{
        AggregationError, PartitionedWindowCounter, TimeSeriesData, WindowingConfig,
    },
    timestamp::{PayloadTimestampResolver, TimestampResolver},
    watermark::PartitionId,
};
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone)]
pub struct AggregationLaneStats {
    pub records_received: opentelemetry::metrics::Counter<u64>,
    pub decode_error: opentelemetry::metrics::Counter<u64>,
    pub accepted: opentelemetry::metrics::Counter<u64>,
    pub late_dropped: opentelemetry::metrics::Counter<u64>,
    pub evicted: opentelemetry::metrics::Counter<u64>,
    pub results_sent: opentelemetry::metrics::Counter<u64>,
    pub results_sent_error: opentelemetry::metrics::Counter<u64>,
}

impl AggregationLaneStats {
    pub fn new(meter: Meter) -> Self {
        let records_received = meter
            .u64_counter("pageview.aggregator.lane.records.received")
            .with_description("Number of input records received by the aggregation lane")
            .build();
        let decode_error = meter
            .u64_counter("pageview.aggregator.lane.records.decode_error")
            .with_description("Number of input records that could not be decoded")
            .build();
        let accepted = meter
            .u64_counter("pageview.aggregator.lane.events.accepted")
            .with_description("Number of page views counted into a window")
            .build();
        let late_dropped = meter
            .u64_counter("pageview.aggregator.lane.events.late_dropped")
            .with_description("Number of page views dropped for arriving after the grace period")
            .build();
        let evicted = meter
            .u64_counter("pageview.aggregator.lane.aggregates.evicted")
            .with_description("Number of window aggregates evicted after retention")
            .build();
        let results_sent = meter
            .u64_counter("pageview.aggregator.lane.results.sent")
            .with_description("Number of aggregated results sent to the publisher")
            .build();
        let results_sent_error = meter
            .u64_counter("pageview.aggregator.lane.results.sent.error")
            .with_description("Number of aggregated results that failed to send to the publisher")
            .build();
        Self {
            records_received,
            decode_error,
            accepted,
            late_dropped,
            evicted,
            results_sent,
            results_sent_error,
        }
    }
}

/// A decoded page view keyed and timed for aggregation
#[derive(Debug, Clone, PartialEq, Eq)]
struct TimedPageView {
    key: String,
    ts: DateTime<Utc>,
    partition: PartitionId,
    offset: i64,
}

impl TimeSeriesData<String> for TimedPageView {
    fn get_key(&self) -> String {
        self.key.clone()
    }

    fn get_ts(&self) -> DateTime<Utc> {
        self.ts
    }

    fn get_partition(&self) -> PartitionId {
        self.partition
    }
}

impl TimedPageView {
    /// Key by the record key, falling back to the postcode, and time by the
    /// payload timestamp, falling back to the record timestamp then `now`
    fn from_record(record: &InputRecord, event: PageViewEvent, now: DateTime<Utc>) -> Self {
        let reference = record.timestamp.unwrap_or(now);
        let ts = PayloadTimestampResolver.resolve(&event, reference);
        Self {
            key: record.key.clone().unwrap_or(event.postcode),
            ts,
            partition: record.partition,
            offset: record.offset,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AggregationLaneCommand {
    Shutdown,
}

struct AggregationLaneActor {
    cmd_rx: mpsc::Receiver<AggregationLaneCommand>,
    rx: async_channel::Receiver<InputRecord>,
    tx: async_channel::Sender<AggregatedPageView>,
    processed_tx: mpsc::UnboundedSender<ProcessedOffset>,
    decoder: PageViewDecoder,
    counter: PartitionedWindowCounter<String>,
    sweep_interval: Duration,
    stats: AggregationLaneStats,
    lane_id: usize,
}

impl AggregationLaneActor {
    #[allow(clippy::too_many_arguments)]
    fn new(
        cmd_rx: mpsc::Receiver<AggregationLaneCommand>,
        rx: async_channel::Receiver<InputRecord>,
        tx: async_channel::Sender<AggregatedPageView>,
        processed_tx: mpsc::UnboundedSender<ProcessedOffset>,
        decoder: PageViewDecoder,
        windowing: WindowingConfig,
        sweep_interval: Duration,
        stats: AggregationLaneStats,
        lane_id: usize,
    ) -> Result<Self, LaneError> {
        let counter = PartitionedWindowCounter::new(windowing).map_err(LaneError::Aggregation)?;
        Ok(Self {
            cmd_rx,
            rx,
            tx,
            processed_tx,
            decoder,
            counter,
            sweep_interval,
            stats,
            lane_id,
        })
    }

    fn lane_tags(&self) -> [opentelemetry::KeyValue; 1] {
        [opentelemetry::KeyValue::new(
            "lane_id",
            opentelemetry::Value::I64(self.lane_id as i64),
        )]
    }

    fn record_evictions(&self, before: u64) {
        let evicted = self.counter.evicted().saturating_sub(before);
        if evicted > 0 {
            debug!("Lane {} evicted {evicted} aggregates", self.lane_id);
            self.stats.evicted.add(evicted, &self.lane_tags());
        }
    }

    /// Tell the consumer the record is fully handled and its offset may be
    /// committed. Records of a halted lane are never reported.
    fn report_processed(&self, processed: ProcessedOffset) {
        if self.processed_tx.send(processed).is_err() {
            trace!(
                "Kafka consumer is gone, not storing offset {} of partition {}",
                processed.offset,
                processed.partition
            );
        }
    }

    async fn process(&mut self, record: InputRecord) -> Result<(), LaneError> {
        let processed = ProcessedOffset {
            partition: record.partition,
            offset: record.offset,
        };
        let tags = [
            opentelemetry::KeyValue::new("lane_id", opentelemetry::Value::I64(self.lane_id as i64)),
            opentelemetry::KeyValue::new(
                "partition",
                opentelemetry::Value::I64(record.partition.into()),
            ),
        ];
        self.stats.records_received.add(1, &tags);

        let event = match self.decoder.decode(&record.payload).await {
            Ok(event) => event,
            Err(err) => {
                error!(
                    "Failed to decode page view at partition {} offset {}: {err}",
                    record.partition, record.offset
                );
                self.stats.decode_error.add(1, &tags);
                return Err(LaneError::Decode(err.to_string()));
            }
        };

        let now = Utc::now();
        let page_view = TimedPageView::from_record(&record, event, now);
        let evicted_before = self.counter.evicted();
        let outcome = self.counter.process(page_view, now);
        self.record_evictions(evicted_before);
        match outcome {
            Ok(Either::Left(result)) => {
                self.stats.accepted.add(1, &tags);
                trace!(
                    "Page view counted for {} in window {}, count {}",
                    result.key,
                    result.window_start,
                    result.count
                );
                if let Err(err) = self.tx.send(AggregatedPageView::from(result)).await {
                    error!("Aggregation lane send error: {err}");
                    self.stats.results_sent_error.add(1, &tags);
                    return Err(LaneError::SendChannelError);
                }
                self.stats.results_sent.add(1, &tags);
                self.report_processed(processed);
                Ok(())
            }
            Ok(Either::Right(late)) => {
                self.stats.late_dropped.add(1, &tags);
                debug!(
                    "Dropping late page view for {} at {} (partition {} offset {}), watermark {:?}",
                    late.key,
                    late.ts,
                    late.partition,
                    late.offset,
                    self.counter.watermark(late.partition)
                );
                self.report_processed(processed);
                Ok(())
            }
            Err(err) => {
                error!("Aggregation lane {} failed to count page view: {err}", self.lane_id);
                Err(LaneError::Aggregation(err))
            }
        }
    }

    async fn run(mut self) -> anyhow::Result<String> {
        info!("Starting aggregation lane {}", self.lane_id);
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(AggregationLaneCommand::Shutdown) => {
                            info!("Shutting down aggregation lane {}", self.lane_id);
                        }
                        None => {
                            warn!(
                                "Aggregation lane {} terminated due to command channel closing",
                                self.lane_id
                            );
                        }
                    }
                    return Ok("Aggregation lane shutdown successfully".to_string());
                }
                _ = sweep.tick() => {
                    let evicted_before = self.counter.evicted();
                    self.counter.sweep();
                    self.record_evictions(evicted_before);
                }
                record = self.rx.recv() => {
                    match record {
                        Ok(record) => self.process(record).await?,
                        Err(err) => {
                            error!("Shutting down due to aggregation lane recv error: {err}");
                            return Err(LaneError::ReceiveChannelError.into());
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneError {
    ReceiveChannelError,
    SendChannelError,
    Decode(String),
    Aggregation(AggregationError),
}

impl std::fmt::Display for LaneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReceiveChannelError => write!(f, "error in aggregation lane receive channel"),
            Self::SendChannelError => write!(f, "error in aggregation lane send channel"),
            Self::Decode(err) => write!(f, "page view decoding failed: {err}"),
            Self::Aggregation(err) => write!(f, "aggregation failed: {err}"),
        }
    }
}

impl std::error::Error for LaneError {}

#[derive(Debug, Clone)]
pub enum AggregationLaneActorHandleError {
    SendError,
}

impl std::fmt::Display for AggregationLaneActorHandleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendError => write!(f, "Failed to send command to aggregation lane actor"),
        }
    }
}

impl std::error::Error for AggregationLaneActorHandleError {}

/// Handle for controlling an aggregation lane and subscribing to its results.
#[derive(Debug, Clone)]
pub struct AggregationLaneActorHandle {
    cmd_send: mpsc::Sender<AggregationLaneCommand>,
    aggregated_rx: async_channel::Receiver<AggregatedPageView>,
    lane_id: usize,
}

impl AggregationLaneActorHandle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buffer_size: usize,
        records_rx: async_channel::Receiver<InputRecord>,
        processed_tx: mpsc::UnboundedSender<ProcessedOffset>,
        decoder: PageViewDecoder,
        windowing: WindowingConfig,
        sweep_interval: Duration,
        stats: Either<Meter, AggregationLaneStats>,
        lane_id: usize,
    ) -> Result<(JoinHandle<anyhow::Result<String>>, Self), LaneError> {
        let (cmd_send, cmd_recv) = mpsc::channel(10);
        let (aggregated_tx, aggregated_rx) = async_channel::bounded(buffer_size.max(1));
        let stats = match stats {
            Either::Left(meter) => AggregationLaneStats::new(meter),
            Either::Right(stats) => stats,
        };
        let actor = AggregationLaneActor::new(
            cmd_recv,
            records_rx,
            aggregated_tx,
            processed_tx,
            decoder,
            windowing,
            sweep_interval,
            stats,
            lane_id,
        )?;
        let join_handle = tokio::spawn(actor.run());
        let handle = Self {
            cmd_send,
            aggregated_rx,
            lane_id,
        };
        Ok((join_handle, handle))
    }

    pub fn lane_id(&self) -> usize {
        self.lane_id
    }

    pub async fn shutdown(&self) -> Result<(), AggregationLaneActorHandleError> {
        self.cmd_send
            .send(AggregationLaneCommand::Shutdown)
            .await
            .map_err(|_| AggregationLaneActorHandleError::SendError)
    }

    /// Subscribe to the aggregated results of the lane, one per accepted
    /// page view.
    pub fn subscribe(&self) -> async_channel::Receiver<AggregatedPageView> {
        self.aggregated_rx.clone()
    }
}
