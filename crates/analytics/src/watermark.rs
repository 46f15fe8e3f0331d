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

//! Per-partition event-time watermark.
//!
//! The watermark is the maximum event-time a partition has observed so far and
//! is the clock lateness is judged against. Each partition owns exactly one
//! watermark; no merging happens across partitions.

use chrono::{DateTime, Utc};

/// Identifier of an input partition (ordering domain).
pub type PartitionId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    partition: PartitionId,
    max_event_time_seen: Option<DateTime<Utc>>,
}

impl Watermark {
    /// A watermark that has not observed any event yet
    pub const fn new(partition: PartitionId) -> Self {
        Self {
            partition,
            max_event_time_seen: None,
        }
    }

    pub const fn partition(&self) -> PartitionId {
        self.partition
    }

    pub const fn current(&self) -> Option<DateTime<Utc>> {
        self.max_event_time_seen
    }

    /// Move the watermark to `ts` if it is ahead of the current value.
    /// Returns `true` when the watermark moved.
    pub fn advance(&mut self, ts: DateTime<Utc>) -> bool {
        match self.max_event_time_seen {
            Some(current) if current >= ts => false,
            _ => {
                self.max_event_time_seen = Some(ts);
                true
            }
        }
    }
}
