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

//! Resolve the event-time of a record used for window assignment.
//!
//! Resolution never fails: a record without a usable timestamp degrades to
//! the reference time supplied by the caller, typically the time the transport
//! assigned to the record when it was ingested.

use chrono::{DateTime, Utc};

/// A payload that may carry its own event timestamp as milliseconds since the
/// UNIX epoch.
pub trait EventTimestamp {
    fn timestamp_millis(&self) -> Option<i64>;
}

/// Extracts the event-time used for window assignment from a record.
pub trait TimestampResolver<R> {
    fn resolve(&self, record: &R, reference: DateTime<Utc>) -> DateTime<Utc>;
}

/// Use the payload timestamp verbatim when present, otherwise the reference
/// time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PayloadTimestampResolver;

impl<R: EventTimestamp> TimestampResolver<R> for PayloadTimestampResolver {
    fn resolve(&self, record: &R, reference: DateTime<Utc>) -> DateTime<Utc> {
        resolve_event_time(record.timestamp_millis(), reference)
    }
}

/// Convert optional epoch milliseconds to an instant, falling back to
/// `reference` when the value is absent or outside the representable range.
pub fn resolve_event_time(millis: Option<i64>, reference: DateTime<Utc>) -> DateTime<Utc> {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(reference)
}
