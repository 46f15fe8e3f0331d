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

//! Tumbling (fixed-size, non-overlapping) event-time windows.
//!
//! A window is identified by its key and start instant; given the fixed size
//! of a deployment the end is derived as `start + size` and the window covers
//! the half-open interval `[start, end)`.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum WindowError {
    #[strum(to_string = "window size must be at least one millisecond")]
    InvalidSize,
    #[strum(to_string = "window size is too large to be represented")]
    SizeOutOfRange,
}

impl std::error::Error for WindowError {}

/// A derived window for a given key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Window<K> {
    key: K,
    start: DateTime<Utc>,
    size: TimeDelta,
}

impl<K> Window<K> {
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn size(&self) -> TimeDelta {
        self.size
    }

    /// Non-inclusive end of the window
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.size
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end()
    }
}

/// Assigns every instant to exactly one window of a fixed size, aligned to
/// the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TumblingWindows {
    size: TimeDelta,
    size_ms: i64,
}

impl TumblingWindows {
    pub fn new(size: Duration) -> Result<Self, WindowError> {
        let size = TimeDelta::from_std(size).map_err(|_| WindowError::SizeOutOfRange)?;
        let size_ms = size.num_milliseconds();
        if size_ms < 1 {
            return Err(WindowError::InvalidSize);
        }
        Ok(Self { size, size_ms })
    }

    pub fn size(&self) -> TimeDelta {
        self.size
    }

    /// Window size in whole seconds, saturated to `i32`.
    pub fn size_seconds(&self) -> i32 {
        i32::try_from(self.size.num_seconds()).unwrap_or(i32::MAX)
    }

    /// `floor(ts / size) * size` on the millisecond scale.
    pub fn window_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let millis = ts.timestamp_millis();
        let start = millis - millis.rem_euclid(self.size_ms);
        // Only unrepresentable within one window of the minimum instant
        DateTime::<Utc>::from_timestamp_millis(start).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn assign<K>(&self, key: K, ts: DateTime<Utc>) -> Window<K> {
        Window {
            key,
            start: self.window_start(ts),
            size: self.size,
        }
    }
}
