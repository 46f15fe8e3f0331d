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

use crate::codec::ValueFormat;
use chrono::{DateTime, Utc};
use pageview_analytics::watermark::PartitionId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

mod actor;

pub use actor::{
    KafkaConsumerActorError, KafkaConsumerActorHandle, KafkaConsumerActorHandleError,
    KafkaConsumerStats,
};

/// Kafka consumer of the page view input topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KafkaInputConfig {
    pub topic: String,

    pub value_format: ValueFormat,

    /// Key/Value consumer configs are defined in librdkafka
    pub consumer_config: HashMap<String, String>,
}

/// A raw record received from the input topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub partition: PartitionId,
    pub offset: i64,
    pub key: Option<String>,
    /// Broker or producer assigned record timestamp
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: Vec<u8>,
}

/// Position of a record the aggregation lanes are done with. Only these
/// offsets are stored for commit, so records still queued in a lane or lost
/// with a halted lane are consumed again after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessedOffset {
    pub partition: PartitionId,
    pub offset: i64,
}

/// Processing lane handling a given input partition
pub fn lane_for_partition(partition: PartitionId, lanes: usize) -> usize {
    if lanes == 0 {
        return 0;
    }
    (i64::from(partition).rem_euclid(lanes as i64)) as usize
}
