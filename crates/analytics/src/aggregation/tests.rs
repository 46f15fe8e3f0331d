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

use super::*;
use crate::store::WindowStore;
use chrono::TimeZone;
use futures::StreamExt;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PageView {
    postcode: &'static str,
    ts: DateTime<Utc>,
    partition: PartitionId,
}

impl PageView {
    fn new(postcode: &'static str, ts: DateTime<Utc>) -> Self {
        Self {
            postcode,
            ts,
            partition: 0,
        }
    }

    fn on_partition(mut self, partition: PartitionId) -> Self {
        self.partition = partition;
        self
    }
}

impl TimeSeriesData<String> for PageView {
    fn get_key(&self) -> String {
        self.postcode.to_string()
    }

    fn get_ts(&self) -> DateTime<Utc> {
        self.ts
    }

    fn get_partition(&self) -> PartitionId {
        self.partition
    }
}

/// Minute aligned reference instant
fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
}

fn at(offset: TimeDelta) -> DateTime<Utc> {
    t0() + offset
}

fn accepted(
    results: Vec<Result<Either<WindowResult<String>, PageView>, AggregationError>>,
) -> Vec<WindowResult<String>> {
    results
        .into_iter()
        .filter_map(|x| x.unwrap().left())
        .collect()
}

fn final_count(results: &[WindowResult<String>], key: &str, window_start: DateTime<Utc>) -> i64 {
    results
        .iter()
        .filter(|x| x.key == key && x.window_start == window_start)
        .map(|x| x.count)
        .max()
        .unwrap_or(0)
}

#[test]
fn test_default_config() {
    let config = WindowingConfig::default();
    assert_eq!(config.window_size, Duration::from_secs(60));
    assert_eq!(config.grace, Duration::from_secs(1800));
    assert_eq!(config.retention, Duration::from_secs(3600));
    assert_eq!(config.max_entries, None);
    assert_eq!(config.validate(), Ok(()));
}

#[test]
fn test_config_validation() {
    let zero_window = WindowingConfig {
        window_size: Duration::ZERO,
        ..Default::default()
    };
    assert!(matches!(
        zero_window.validate(),
        Err(AggregationError::Window(_))
    ));

    let short_retention = WindowingConfig {
        retention: Duration::from_secs(60),
        ..Default::default()
    };
    assert!(matches!(
        short_retention.validate(),
        Err(AggregationError::Eviction(_))
    ));

    // retention == window_size + grace is the smallest valid value
    let tight = WindowingConfig {
        retention: Duration::from_secs(60 + 1800),
        ..Default::default()
    };
    assert_eq!(tight.validate(), Ok(()));
    assert!(PartitionedWindowCounter::<String>::new(short_retention).is_err());
}

#[test]
fn test_incremental_emission() {
    let items = vec![
        PageView::new("SW1", at(TimeDelta::seconds(1))),
        PageView::new("SW1", at(TimeDelta::seconds(2))),
        PageView::new("SW1", at(TimeDelta::seconds(3))),
    ];
    let results = accepted(
        items
            .into_iter()
            .window_count(WindowingConfig::default())
            .unwrap()
            .collect(),
    );
    let counts = results.iter().map(|x| x.count).collect::<Vec<_>>();
    assert_eq!(counts, vec![1, 2, 3]);
    assert!(results.iter().all(|x| x.window_start == t0()));
    assert!(results.iter().all(|x| x.window_size_seconds == 60));
}

#[test]
fn test_no_input_no_output() {
    let items: Vec<PageView> = vec![];
    let results = items
        .into_iter()
        .window_count(WindowingConfig::default())
        .unwrap()
        .collect::<Vec<_>>();
    assert!(results.is_empty());
}

#[test]
fn test_counts_by_postcode_in_same_window() {
    let items = vec![
        PageView::new("SW1", at(TimeDelta::zero())),
        PageView::new("EC1", at(TimeDelta::seconds(5))),
        PageView::new("SW1", at(TimeDelta::seconds(10))),
        PageView::new("EC1", at(TimeDelta::seconds(20))),
        PageView::new("SW1", at(TimeDelta::seconds(30))),
    ];
    let results = accepted(
        items
            .into_iter()
            .window_count(WindowingConfig::default())
            .unwrap()
            .collect(),
    );
    assert_eq!(results.len(), 5);
    assert_eq!(final_count(&results, "SW1", t0()), 3);
    assert_eq!(final_count(&results, "EC1", t0()), 2);

    // Interleaving one key never changes the counts of the other
    let sw1 = results
        .iter()
        .filter(|x| x.key == "SW1")
        .map(|x| x.count)
        .collect::<Vec<_>>();
    let ec1 = results
        .iter()
        .filter(|x| x.key == "EC1")
        .map(|x| x.count)
        .collect::<Vec<_>>();
    assert_eq!(sw1, vec![1, 2, 3]);
    assert_eq!(ec1, vec![1, 2]);
}

#[test]
fn test_separate_windows() {
    let items = vec![
        PageView::new("SW1", at(TimeDelta::seconds(10))),
        PageView::new("SW1", at(TimeDelta::seconds(59))),
        PageView::new("SW1", at(TimeDelta::seconds(60))),
        PageView::new("SW1", at(TimeDelta::seconds(150))),
    ];
    let results = accepted(
        items
            .into_iter()
            .window_count(WindowingConfig::default())
            .unwrap()
            .collect(),
    );
    assert_eq!(final_count(&results, "SW1", t0()), 2);
    assert_eq!(final_count(&results, "SW1", at(TimeDelta::minutes(1))), 1);
    assert_eq!(final_count(&results, "SW1", at(TimeDelta::minutes(2))), 1);
}

#[test]
fn test_late_event_within_grace_is_counted() {
    let items = vec![
        PageView::new("SW1", at(TimeDelta::seconds(30))),
        // Advances the watermark 10 minutes past the first window
        PageView::new("EC1", at(TimeDelta::minutes(10))),
        PageView::new("SW1", at(TimeDelta::seconds(45))),
    ];
    let results = items
        .into_iter()
        .window_count(WindowingConfig::default())
        .unwrap()
        .collect::<Vec<_>>();
    let results = accepted(results);
    assert_eq!(results.len(), 3);
    assert_eq!(final_count(&results, "SW1", t0()), 2);
}

#[test]
fn test_event_after_grace_is_dropped() {
    let late = PageView::new("SW1", at(TimeDelta::seconds(10)));
    let items = vec![
        PageView::new("SW1", at(TimeDelta::seconds(45))),
        PageView::new("EC1", at(TimeDelta::hours(1))),
        late.clone(),
    ];
    let results = items
        .into_iter()
        .window_count(WindowingConfig::default())
        .unwrap()
        .map(|x| x.unwrap())
        .collect::<Vec<_>>();
    assert_eq!(results.len(), 3);
    // Dropped events are handed back untouched
    assert_eq!(results[2], Either::Right(late));
    let counts = results
        .into_iter()
        .filter_map(|x| x.left())
        .collect::<Vec<_>>();
    assert_eq!(final_count(&counts, "SW1", t0()), 1);
}

#[test]
fn test_grace_boundary() {
    let config = WindowingConfig::default();
    // Window [t0, t0 + 1m) closes once the watermark reaches t0 + 31m
    let closes_at = at(TimeDelta::minutes(31));

    let mut counter = WindowedCounter::<String>::new(0, &config).unwrap();
    counter
        .process(PageView::new("EC1", closes_at), t0())
        .unwrap();
    let result = counter
        .process(PageView::new("SW1", at(TimeDelta::seconds(10))), t0())
        .unwrap();
    assert!(result.is_right());
    assert!(counter.store().get(&"SW1".to_string(), t0()).is_none());

    let mut counter = WindowedCounter::<String>::new(0, &config).unwrap();
    counter
        .process(
            PageView::new("EC1", closes_at - TimeDelta::milliseconds(1)),
            t0(),
        )
        .unwrap();
    let result = counter
        .process(PageView::new("SW1", at(TimeDelta::seconds(10))), t0())
        .unwrap();
    assert_eq!(
        result.left().map(|x| x.count),
        Some(1),
        "window must still be open one millisecond before it closes"
    );
}

#[test]
fn test_first_event_always_accepted() {
    let mut counter = WindowedCounter::<String>::new(7, &WindowingConfig::default()).unwrap();
    assert_eq!(counter.watermark().current(), None);
    assert!(counter.is_open(DateTime::<Utc>::MIN_UTC));
    let result = counter
        .process(PageView::new("SW1", at(TimeDelta::seconds(5))), t0())
        .unwrap();
    assert!(result.is_left());
    assert_eq!(counter.watermark().current(), Some(at(TimeDelta::seconds(5))));
    assert_eq!(counter.watermark().partition(), 7);
}

#[test]
fn test_event_cannot_close_its_own_window() {
    let config = WindowingConfig {
        grace: Duration::ZERO,
        retention: Duration::from_secs(60),
        ..Default::default()
    };
    let mut counter = WindowedCounter::<String>::new(0, &config).unwrap();
    counter
        .process(PageView::new("SW1", at(TimeDelta::seconds(5))), t0())
        .unwrap();
    // The last millisecond of a later window
    let result = counter
        .process(
            PageView::new("SW1", at(TimeDelta::seconds(120) - TimeDelta::milliseconds(1))),
            t0(),
        )
        .unwrap();
    assert!(result.is_left());
    // The watermark now sits in window [t0 + 1m, t0 + 2m), the first window is
    // closed
    let result = counter
        .process(PageView::new("SW1", at(TimeDelta::seconds(6))), t0())
        .unwrap();
    assert!(result.is_right());
}

#[test]
fn test_redelivery_is_counted_again() {
    let event = PageView::new("SW1", at(TimeDelta::seconds(10)));
    let items = vec![event.clone(), event];
    let results = accepted(
        items
            .into_iter()
            .window_count(WindowingConfig::default())
            .unwrap()
            .collect(),
    );
    assert_eq!(
        results.iter().map(|x| x.count).collect::<Vec<_>>(),
        vec![1, 2]
    );
}

#[test]
fn test_arrival_order_within_grace_does_not_change_counts() {
    let offsets = [0, 50, 5, 130, 20, 65, 1, 190, 30];
    let in_order = {
        let mut sorted = offsets;
        sorted.sort();
        sorted
    };
    let run = |offsets: &[i64]| {
        let items = offsets
            .iter()
            .map(|x| PageView::new("SW1", at(TimeDelta::seconds(*x))))
            .collect::<Vec<_>>();
        let results = accepted(
            items
                .into_iter()
                .window_count(WindowingConfig::default())
                .unwrap()
                .collect(),
        );
        (0..4)
            .map(|minute| final_count(&results, "SW1", at(TimeDelta::minutes(minute))))
            .collect::<Vec<_>>()
    };
    assert_eq!(run(&offsets), run(&in_order));
    assert_eq!(run(&offsets), vec![6, 1, 1, 1]);
}

#[test]
fn test_eviction_on_watermark_advance() {
    let mut counter = WindowedCounter::<String>::new(0, &WindowingConfig::default()).unwrap();
    counter
        .process(PageView::new("SW1", at(TimeDelta::seconds(10))), t0())
        .unwrap();
    counter
        .process(PageView::new("EC1", at(TimeDelta::minutes(30))), t0())
        .unwrap();
    assert_eq!(counter.store().len(), 2);

    // Exactly one retention period after the first window start, still kept
    counter
        .process(PageView::new("EC1", at(TimeDelta::hours(1))), t0())
        .unwrap();
    assert_eq!(counter.store().len(), 3);

    counter
        .process(
            PageView::new("EC1", at(TimeDelta::hours(1) + TimeDelta::milliseconds(1))),
            t0(),
        )
        .unwrap();
    assert!(counter.store().get(&"SW1".to_string(), t0()).is_none());
    assert_eq!(counter.store().len(), 2);
    assert_eq!(counter.evicted(), 1);
}

#[test]
fn test_last_updated_tracks_processing_time() {
    let mut counter = WindowedCounter::<String>::new(0, &WindowingConfig::default()).unwrap();
    let first = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
    let second = first + TimeDelta::seconds(3);
    counter
        .process(PageView::new("SW1", t0()), first)
        .unwrap();
    counter
        .process(PageView::new("SW1", t0()), second)
        .unwrap();
    let aggregate = counter.store().get(&"SW1".to_string(), t0()).unwrap();
    assert_eq!(aggregate.count(), 2);
    assert_eq!(aggregate.last_updated(), second);
}

#[test]
fn test_partitions_are_independent() {
    let mut counter = PartitionedWindowCounter::<String>::new(WindowingConfig::default()).unwrap();
    counter
        .process(
            PageView::new("SW1", at(TimeDelta::hours(2))).on_partition(0),
            t0(),
        )
        .unwrap();
    // Far behind partition 0 watermark but partition 1 has not seen any event
    let result = counter
        .process(PageView::new("SW1", t0()).on_partition(1), t0())
        .unwrap();
    assert_eq!(result.left().map(|x| x.count), Some(1));
    let result = counter
        .process(PageView::new("SW1", t0()).on_partition(0), t0())
        .unwrap();
    assert!(result.is_right());

    assert_eq!(counter.watermark(0), Some(at(TimeDelta::hours(2))));
    assert_eq!(counter.watermark(1), Some(t0()));
    assert_eq!(counter.watermark(2), None);
    assert_eq!(counter.retained(), 2);
}

#[test]
fn test_periodic_sweep() {
    let mut counter = PartitionedWindowCounter::<String>::new(WindowingConfig::default()).unwrap();
    assert_eq!(counter.sweep(), 0);
    counter
        .process(PageView::new("SW1", t0()), t0())
        .unwrap();
    assert_eq!(counter.sweep(), 0);
    assert_eq!(counter.retained(), 1);
}

#[test]
fn test_store_capacity_halts_processing() {
    let config = WindowingConfig {
        max_entries: Some(1),
        ..Default::default()
    };
    let items = vec![
        PageView::new("SW1", at(TimeDelta::seconds(1))),
        PageView::new("EC1", at(TimeDelta::seconds(2))),
        PageView::new("SW1", at(TimeDelta::seconds(3))),
    ];
    let results = items
        .into_iter()
        .window_count(config)
        .unwrap()
        .collect::<Vec<_>>();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert_eq!(
        results[1],
        Err(AggregationError::Store(StoreError::CapacityExceeded {
            capacity: 1
        }))
    );
}

#[tokio::test]
async fn test_stream_window_count() {
    let items = vec![
        PageView::new("SW1", at(TimeDelta::zero())),
        PageView::new("EC1", at(TimeDelta::seconds(5))),
        PageView::new("SW1", at(TimeDelta::seconds(10))),
        PageView::new("EC1", at(TimeDelta::hours(1))),
        PageView::new("SW1", at(TimeDelta::seconds(30))),
    ];
    let stream = futures::stream::iter(items);
    let results = stream
        .window_count(WindowingConfig::default())
        .unwrap()
        .collect::<Vec<_>>()
        .await;
    assert_eq!(results.len(), 5);
    let results = results
        .into_iter()
        .map(|x| x.unwrap())
        .collect::<Vec<_>>();
    assert!(results[4].is_right());
    let counts = results
        .into_iter()
        .filter_map(|x| x.left())
        .collect::<Vec<_>>();
    assert_eq!(final_count(&counts, "SW1", t0()), 2);
    assert_eq!(final_count(&counts, "EC1", t0()), 1);
    assert_eq!(final_count(&counts, "EC1", at(TimeDelta::hours(1))), 1);
}
