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

//! Retention based eviction of window aggregates.
//!
//! An aggregate is removed once `watermark - window_start > retention`.
//! Retention must cover at least `window_size + grace`, otherwise an aggregate
//! could be dropped while its window still accepts late events.

use crate::store::WindowStore;
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionError {
    RetentionTooShort {
        retention: Duration,
        minimum: Duration,
    },
    RetentionOutOfRange,
}

impl std::fmt::Display for EvictionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RetentionTooShort { retention, minimum } => write!(
                f,
                "retention {retention:?} is shorter than window size plus grace {minimum:?}"
            ),
            Self::RetentionOutOfRange => write!(f, "retention is too large to be represented"),
        }
    }
}

impl std::error::Error for EvictionError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    retention: TimeDelta,
}

impl EvictionPolicy {
    pub fn new(
        retention: Duration,
        window_size: Duration,
        grace: Duration,
    ) -> Result<Self, EvictionError> {
        let minimum = window_size.saturating_add(grace);
        if retention < minimum {
            return Err(EvictionError::RetentionTooShort { retention, minimum });
        }
        let retention =
            TimeDelta::from_std(retention).map_err(|_| EvictionError::RetentionOutOfRange)?;
        Ok(Self { retention })
    }

    pub fn retention(&self) -> TimeDelta {
        self.retention
    }

    /// Windows starting strictly before the cutoff are expired.
    pub fn cutoff(&self, watermark: DateTime<Utc>) -> DateTime<Utc> {
        watermark
            .checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Remove expired aggregates from `store`, returns how many were removed.
    pub fn sweep<K, S: WindowStore<K>>(&self, store: &mut S, watermark: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(watermark);
        let evicted = store.evict_older_than(cutoff).len();
        if evicted > 0 {
            debug!("Evicted {evicted} window aggregates starting before {cutoff}");
        }
        evicted
    }
}
