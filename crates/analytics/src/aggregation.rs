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

//! Incremental counting of keyed events in event-time tumbling windows.
//!
//! The main components are:
//! - `TimeSeriesData`: A trait that defines required methods for keyed,
//!   timestamped and partitioned data points
//! - `WindowedCounter`: Core struct that owns the watermark and aggregate store
//!   of a single partition and decides whether an event is accepted or dropped
//! - `PartitionedWindowCounter`: One `WindowedCounter` per input partition,
//!   created lazily, partitions never share state
//! - `WindowCountAdaptor` and `WindowCountStreamAdaptor`: Iterator and Stream
//!   adapters providing an ergonomic API over `PartitionedWindowCounter`
//!
//! The windowing system features:
//! - Fixed-sized tumbling windows aligned to the UNIX epoch
//! - Late events are accepted as long as `window_end + grace` is still ahead
//!   of the partition watermark observed *before* the event
//! - One result per accepted event carrying the new cumulative count
//! - Retention based eviction of aggregates that can no longer change
//!
//! Example usage:
//! ```text
//! use pageview_analytics::aggregation::{WindowCountExt, WindowingConfig};
//!
//! let results = page_views
//!     .window_count(WindowingConfig::default())?
//!     .filter_map(|x| x.ok()?.left()) // Keep only accepted events
//!     .collect::<Vec<_>>();
//! ```

use crate::{
    eviction::{EvictionError, EvictionPolicy},
    store::{InMemoryWindowStore, StoreError, WindowStore},
    watermark::{PartitionId, Watermark},
    window::{TumblingWindows, WindowError},
};
use chrono::{DateTime, TimeDelta, Utc};
use either::Either;
use futures_core::Stream;
use pin_project::pin_project;
use serde::{Deserialize, Serialize};
use std::{
    collections::{hash_map::Entry, HashMap},
    hash::Hash,
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tracing::trace;

const DEFAULT_WINDOW_SIZE: Duration = Duration::from_secs(60);
const DEFAULT_GRACE: Duration = Duration::from_secs(30 * 60);
const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// A trait for defining time-series data points
pub trait TimeSeriesData<K> {
    fn get_key(&self) -> K;
    fn get_ts(&self) -> DateTime<Utc>;
    /// Input partition (ordering domain) the data point was received on
    fn get_partition(&self) -> PartitionId {
        0
    }
}

/// Emitted every time the count of a window changes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowResult<K> {
    pub key: K,
    pub window_start: DateTime<Utc>,
    pub count: i64,
    pub window_size_seconds: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationError {
    Window(WindowError),
    Eviction(EvictionError),
    GraceOutOfRange,
    Store(StoreError),
}

impl std::fmt::Display for AggregationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Window(err) => write!(f, "invalid window: {err}"),
            Self::Eviction(err) => write!(f, "invalid retention: {err}"),
            Self::GraceOutOfRange => write!(f, "grace period is too large to be represented"),
            Self::Store(err) => write!(f, "window store error: {err}"),
        }
    }
}

impl std::error::Error for AggregationError {}

impl From<WindowError> for AggregationError {
    fn from(err: WindowError) -> Self {
        Self::Window(err)
    }
}

impl From<EvictionError> for AggregationError {
    fn from(err: EvictionError) -> Self {
        Self::Eviction(err)
    }
}

impl From<StoreError> for AggregationError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// Immutable windowing parameters of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowingConfig {
    pub window_size: Duration,
    pub grace: Duration,
    pub retention: Duration,
    /// Upper bound of aggregates held per partition, unbounded when `None`
    pub max_entries: Option<usize>,
}

impl Default for WindowingConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            grace: DEFAULT_GRACE,
            retention: DEFAULT_RETENTION,
            max_entries: None,
        }
    }
}

impl WindowingConfig {
    pub fn validate(&self) -> Result<(), AggregationError> {
        TumblingWindows::new(self.window_size)?;
        TimeDelta::from_std(self.grace).map_err(|_| AggregationError::GraceOutOfRange)?;
        EvictionPolicy::new(self.retention, self.window_size, self.grace)?;
        Ok(())
    }
}

/// Windowed counter of a single partition.
///
/// Owns the partition watermark and its slice of the aggregate store, it must
/// only be driven from the processing lane of that partition.
#[derive(Debug, Clone)]
pub struct WindowedCounter<K, S = InMemoryWindowStore<K>> {
    windows: TumblingWindows,
    /// `window_size + grace`, a window accepts events while
    /// `window_start + allowed_lateness > watermark`
    allowed_lateness: TimeDelta,
    eviction: EvictionPolicy,
    watermark: Watermark,
    store: S,
    evicted: u64,
    _phantom: PhantomData<K>,
}

impl<K: Eq + Hash + Clone> WindowedCounter<K, InMemoryWindowStore<K>> {
    pub fn new(partition: PartitionId, config: &WindowingConfig) -> Result<Self, AggregationError> {
        let store = match config.max_entries {
            Some(max_entries) => InMemoryWindowStore::with_capacity_limit(max_entries),
            None => InMemoryWindowStore::new(),
        };
        Self::with_store(partition, config, store)
    }
}

impl<K: Clone, S: WindowStore<K>> WindowedCounter<K, S> {
    pub fn with_store(
        partition: PartitionId,
        config: &WindowingConfig,
        store: S,
    ) -> Result<Self, AggregationError> {
        let windows = TumblingWindows::new(config.window_size)?;
        let grace =
            TimeDelta::from_std(config.grace).map_err(|_| AggregationError::GraceOutOfRange)?;
        let allowed_lateness = windows
            .size()
            .checked_add(&grace)
            .ok_or(AggregationError::GraceOutOfRange)?;
        let eviction = EvictionPolicy::new(config.retention, config.window_size, config.grace)?;
        Ok(Self {
            windows,
            allowed_lateness,
            eviction,
            watermark: Watermark::new(partition),
            store,
            evicted: 0,
            _phantom: PhantomData,
        })
    }

    pub fn watermark(&self) -> &Watermark {
        &self.watermark
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn windows(&self) -> &TumblingWindows {
        &self.windows
    }

    /// Total number of aggregates evicted since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Whether a window is still open for (late) events given the current
    /// watermark. Every window is open before the first event.
    pub fn is_open(&self, window_start: DateTime<Utc>) -> bool {
        let Some(watermark) = self.watermark.current() else {
            return true;
        };
        window_start
            .checked_add_signed(self.allowed_lateness)
            .map_or(true, |closes_at| closes_at > watermark)
    }

    /// Process a single data point.
    ///
    /// Returns `Left` with the new cumulative count when the event is accepted
    /// and `Right` with the untouched input when it arrived after the grace
    /// period of its window. A store error is fatal: the counter must not be
    /// used afterwards.
    pub fn process<I: TimeSeriesData<K>>(
        &mut self,
        item: I,
        now: DateTime<Utc>,
    ) -> Result<Either<WindowResult<K>, I>, StoreError> {
        let ts = item.get_ts();
        let window_start = self.windows.window_start(ts);
        // Judge against the watermark before this event moves it
        let accepted = self.is_open(window_start);
        let advanced = self.watermark.advance(ts);

        if !accepted {
            trace!(
                "Dropping late event at {ts} for window {window_start} of partition {}, wm {:?}",
                self.watermark.partition(),
                self.watermark.current()
            );
            return Ok(Either::Right(item));
        }

        let key = item.get_key();
        let aggregate = self.store.increment(&key, window_start, now)?;
        if advanced {
            self.sweep();
        }
        Ok(Either::Left(WindowResult {
            key,
            window_start,
            count: aggregate.count(),
            window_size_seconds: self.windows.size_seconds(),
        }))
    }

    /// Evict aggregates that aged past retention relative to the watermark.
    pub fn sweep(&mut self) -> usize {
        let evicted = match self.watermark.current() {
            Some(watermark) => self.eviction.sweep(&mut self.store, watermark),
            None => 0,
        };
        self.evicted += evicted as u64;
        evicted
    }
}

/// Routes data points to one [`WindowedCounter`] per input partition.
#[derive(Debug, Clone)]
pub struct PartitionedWindowCounter<K> {
    config: WindowingConfig,
    partitions: HashMap<PartitionId, WindowedCounter<K>>,
}

impl<K: Eq + Hash + Clone> PartitionedWindowCounter<K> {
    pub fn new(config: WindowingConfig) -> Result<Self, AggregationError> {
        config.validate()?;
        Ok(Self {
            config,
            partitions: HashMap::new(),
        })
    }

    pub fn config(&self) -> &WindowingConfig {
        &self.config
    }

    pub fn process<I: TimeSeriesData<K>>(
        &mut self,
        item: I,
        now: DateTime<Utc>,
    ) -> Result<Either<WindowResult<K>, I>, AggregationError> {
        let partition = item.get_partition();
        let counter = match self.partitions.entry(partition) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(WindowedCounter::new(partition, &self.config)?),
        };
        Ok(counter.process(item, now)?)
    }

    /// Run eviction on every partition, returns the number of evicted
    /// aggregates
    pub fn sweep(&mut self) -> usize {
        self.partitions.values_mut().map(|x| x.sweep()).sum()
    }

    pub fn partition(&self, partition: PartitionId) -> Option<&WindowedCounter<K>> {
        self.partitions.get(&partition)
    }

    pub fn watermark(&self, partition: PartitionId) -> Option<DateTime<Utc>> {
        self.partitions
            .get(&partition)
            .and_then(|x| x.watermark().current())
    }

    pub fn evicted(&self) -> u64 {
        self.partitions.values().map(|x| x.evicted()).sum()
    }

    /// Number of aggregates retained across all partitions
    pub fn retained(&self) -> usize {
        self.partitions.values().map(|x| x.store().len()).sum()
    }
}

/// An iterator adaptor that provides an ergonomic API for windowed counting.
///
/// Yields exactly one item per input: `Left` with the updated count or `Right`
/// with a dropped late input. The adaptor stops after the first error.
pub struct WindowCountAdaptor<K, Input, I: Iterator<Item = Input>> {
    source: I,
    counter: PartitionedWindowCounter<K>,
    halted: bool,
}

impl<K, Input, I> Iterator for WindowCountAdaptor<K, Input, I>
where
    K: Eq + Hash + Clone,
    Input: TimeSeriesData<K>,
    I: Iterator<Item = Input>,
{
    type Item = Result<Either<WindowResult<K>, Input>, AggregationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.halted {
            return None;
        }
        let item = self.source.next()?;
        let result = self.counter.process(item, Utc::now());
        self.halted = result.is_err();
        Some(result)
    }
}

pub trait WindowCountExt<K: Eq + Hash + Clone, Input: TimeSeriesData<K>>:
    Iterator<Item = Input> + Sized
{
    fn window_count(
        self,
        config: WindowingConfig,
    ) -> Result<WindowCountAdaptor<K, Input, Self>, AggregationError> {
        Ok(WindowCountAdaptor {
            source: self,
            counter: PartitionedWindowCounter::new(config)?,
            halted: false,
        })
    }
}

impl<K: Eq + Hash + Clone, Input: TimeSeriesData<K>, I: Iterator<Item = Input>>
    WindowCountExt<K, Input> for I
{
}

#[pin_project]
pub struct WindowCountStreamAdaptor<K, Input, I: Stream<Item = Input>> {
    #[pin]
    source: I,
    counter: PartitionedWindowCounter<K>,
    halted: bool,
}

impl<K, Input, I> Stream for WindowCountStreamAdaptor<K, Input, I>
where
    K: Eq + Hash + Clone,
    Input: TimeSeriesData<K>,
    I: Stream<Item = Input>,
{
    type Item = Result<Either<WindowResult<K>, Input>, AggregationError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.halted {
            return Poll::Ready(None);
        }
        match this.source.poll_next(cx) {
            Poll::Ready(Some(item)) => {
                let result = this.counter.process(item, Utc::now());
                *this.halted = result.is_err();
                Poll::Ready(Some(result))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub trait WindowCountStreamExt<K: Eq + Hash + Clone, Input: TimeSeriesData<K>>:
    Stream<Item = Input>
{
    fn window_count(
        self,
        config: WindowingConfig,
    ) -> Result<WindowCountStreamAdaptor<K, Input, Self>, AggregationError>
    where
        Self: Sized,
    {
        Ok(WindowCountStreamAdaptor {
            source: self,
            counter: PartitionedWindowCounter::new(config)?,
            halted: false,
        })
    }
}

impl<K: Eq + Hash + Clone, Input: TimeSeriesData<K>, I: Stream<Item = Input>>
    WindowCountStreamExt<K, Input> for I
{
}

#[cfg(test)]
mod tests;
