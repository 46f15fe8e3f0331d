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

//! Object storage path encoding for aggregated page view records.
//!
//! [`TimeBasedPartitioner`] buckets records by time, e.g.
//! `year=2025/month=03/day=01/hour=10/minute=00`, and
//! [`FieldAndTimePartitioner`] appends a `field=value` segment read from the
//! record value, e.g. `.../minute=00/postcode=SW1`.

pub mod field;
pub mod record;
pub mod time;

pub use field::FieldAndTimePartitioner;
pub use record::{SinkRecord, SinkValue};
pub use time::{TimeBasedPartitioner, TimestampSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionerError {
    /// A struct value has no field with this name
    FieldNotFound { field: String },
    /// The value is not a struct or map, or its field is null
    CannotExtractField { field: String, value_type: String },
    /// No usable timestamp for the configured source
    MissingTimestamp,
    /// Timestamp not representable as an instant
    InvalidTimestamp(i64),
    InvalidPartitionDuration,
    InvalidPathFormat(String),
}

impl std::fmt::Display for PartitionerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FieldNotFound { field } => write!(f, "field '{field}' not found in record value"),
            Self::CannotExtractField { field, value_type } => write!(
                f,
                "cannot extract field '{field}' from record value of type {value_type}"
            ),
            Self::MissingTimestamp => write!(f, "record has no timestamp"),
            Self::InvalidTimestamp(ts) => write!(f, "invalid record timestamp {ts}"),
            Self::InvalidPartitionDuration => {
                write!(f, "partition duration must be at least one millisecond")
            }
            Self::InvalidPathFormat(format) => write!(f, "invalid path format '{format}'"),
        }
    }
}

impl std::error::Error for PartitionerError {}

/// Maps a sink record to the directory its object is written under
pub trait Partitioner {
    fn encode_partition(&self, record: &SinkRecord) -> Result<String, PartitionerError>;
}
