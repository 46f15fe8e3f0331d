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

use crate::{record::SinkRecord, Partitioner, PartitionerError};
use chrono::{
    format::{Item, StrftimeItems},
    DateTime, Utc,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::serde_as;
use std::{fmt::Write, time::Duration};
use tracing::trace;

pub const DEFAULT_PATH_FORMAT: &str = "year=%Y/month=%m/day=%d/hour=%H/minute=%M";

const fn default_partition_duration() -> Duration {
    Duration::from_secs(60)
}

fn default_path_format() -> String {
    DEFAULT_PATH_FORMAT.to_string()
}

/// Where the instant a record is bucketed by comes from
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampSource {
    /// Kafka record timestamp
    #[default]
    Record,
    /// Time the record is partitioned
    Wallclock,
    /// Epoch milliseconds or RFC 3339 string in a field of the record value
    RecordField(String),
}

impl TimestampSource {
    fn extract(
        &self,
        record: &SinkRecord,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, PartitionerError> {
        match self {
            Self::Record => record.timestamp.ok_or(PartitionerError::MissingTimestamp),
            Self::Wallclock => Ok(now),
            Self::RecordField(field) => match record.field(field) {
                Some(Value::Number(number)) => {
                    let millis = number.as_i64().ok_or(PartitionerError::MissingTimestamp)?;
                    DateTime::from_timestamp_millis(millis)
                        .ok_or(PartitionerError::InvalidTimestamp(millis))
                }
                Some(Value::String(value)) => DateTime::parse_from_rfc3339(value)
                    .map(|x| x.with_timezone(&Utc))
                    .map_err(|_| PartitionerError::MissingTimestamp),
                _ => Err(PartitionerError::MissingTimestamp),
            },
        }
    }
}

/// Buckets records into fixed time slots and renders the slot start with a
/// strftime style path format
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBasedPartitioner {
    #[serde(default = "default_path_format")]
    path_format: String,

    #[serde(default = "default_partition_duration")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    partition_duration: Duration,

    #[serde(default)]
    timestamp_source: TimestampSource,
}

impl Default for TimeBasedPartitioner {
    fn default() -> Self {
        Self {
            path_format: default_path_format(),
            partition_duration: default_partition_duration(),
            timestamp_source: TimestampSource::default(),
        }
    }
}

impl TimeBasedPartitioner {
    pub fn new(
        path_format: impl Into<String>,
        partition_duration: Duration,
        timestamp_source: TimestampSource,
    ) -> Result<Self, PartitionerError> {
        let partitioner = Self {
            path_format: path_format.into(),
            partition_duration,
            timestamp_source,
        };
        partitioner.validate()?;
        Ok(partitioner)
    }

    /// Check a deserialized partitioner before use
    pub fn validate(&self) -> Result<(), PartitionerError> {
        if self.partition_duration.as_millis() == 0 {
            return Err(PartitionerError::InvalidPartitionDuration);
        }
        if StrftimeItems::new(&self.path_format).any(|item| matches!(item, Item::Error)) {
            return Err(PartitionerError::InvalidPathFormat(self.path_format.clone()));
        }
        Ok(())
    }

    pub fn path_format(&self) -> &str {
        &self.path_format
    }

    pub fn partition_duration(&self) -> Duration {
        self.partition_duration
    }

    pub fn timestamp_source(&self) -> &TimestampSource {
        &self.timestamp_source
    }

    /// Start of the time slot holding `ts`
    pub fn slot_start(&self, ts: DateTime<Utc>) -> Result<DateTime<Utc>, PartitionerError> {
        let size = i64::try_from(self.partition_duration.as_millis())
            .map_err(|_| PartitionerError::InvalidPartitionDuration)?;
        if size == 0 {
            return Err(PartitionerError::InvalidPartitionDuration);
        }
        let millis = ts.timestamp_millis();
        let start = millis - millis.rem_euclid(size);
        DateTime::from_timestamp_millis(start).ok_or(PartitionerError::InvalidTimestamp(start))
    }

    /// Encode using `now` as the wall clock
    pub fn encode_partition_at(
        &self,
        record: &SinkRecord,
        now: DateTime<Utc>,
    ) -> Result<String, PartitionerError> {
        let ts = self.timestamp_source.extract(record, now)?;
        let slot = self.slot_start(ts)?;
        let mut path = String::new();
        write!(path, "{}", slot.format(&self.path_format))
            .map_err(|_| PartitionerError::InvalidPathFormat(self.path_format.clone()))?;
        trace!("Record at {ts} encoded to time partition {path}");
        Ok(path)
    }
}

impl Partitioner for TimeBasedPartitioner {
    fn encode_partition(&self, record: &SinkRecord) -> Result<String, PartitionerError> {
        self.encode_partition_at(record, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SinkValue;
    use chrono::TimeZone;
    use rstest::rstest;
    use serde_json::json;

    fn record_at(ts: DateTime<Utc>) -> SinkRecord {
        SinkRecord::new(Some(ts), SinkValue::from(json!({"postcode": "SW1"})))
    }

    #[rstest]
    #[case(
        Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap(),
        "year=2025/month=01/day=01/hour=10/minute=00"
    )]
    #[case(
        Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 59).unwrap(),
        "year=2025/month=01/day=01/hour=10/minute=00"
    )]
    #[case(
        Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 30).unwrap(),
        "year=2025/month=12/day=31/hour=23/minute=59"
    )]
    fn test_default_path(#[case] ts: DateTime<Utc>, #[case] expected: &str) {
        let partitioner = TimeBasedPartitioner::default();
        assert_eq!(partitioner.encode_partition(&record_at(ts)).unwrap(), expected);
    }

    #[test]
    fn test_hourly_slots() {
        let partitioner = TimeBasedPartitioner::new(
            "dt=%Y-%m-%d/hour=%H",
            Duration::from_secs(3600),
            TimestampSource::Record,
        )
        .unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 10, 42, 7).unwrap();
        assert_eq!(
            partitioner.encode_partition(&record_at(ts)).unwrap(),
            "dt=2025-03-01/hour=10"
        );
        assert_eq!(
            partitioner.slot_start(ts).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_pre_epoch_slot_floors() {
        let partitioner = TimeBasedPartitioner::default();
        let ts = DateTime::from_timestamp_millis(-1).unwrap();
        assert_eq!(
            partitioner.slot_start(ts).unwrap(),
            DateTime::from_timestamp_millis(-60_000).unwrap()
        );
    }

    #[test]
    fn test_missing_record_timestamp() {
        let partitioner = TimeBasedPartitioner::default();
        let record = SinkRecord::new(None, SinkValue::Null);
        assert_eq!(
            partitioner.encode_partition(&record),
            Err(PartitionerError::MissingTimestamp)
        );
    }

    #[test]
    fn test_wallclock_source() {
        let partitioner = TimeBasedPartitioner::new(
            DEFAULT_PATH_FORMAT,
            Duration::from_secs(60),
            TimestampSource::Wallclock,
        )
        .unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 8, 15, 45).unwrap();
        let record = SinkRecord::new(None, SinkValue::Null);
        assert_eq!(
            partitioner.encode_partition_at(&record, now).unwrap(),
            "year=2025/month=06/day=02/hour=08/minute=15"
        );
    }

    #[test]
    fn test_record_field_source() {
        let partitioner = TimeBasedPartitioner::new(
            DEFAULT_PATH_FORMAT,
            Duration::from_secs(60),
            TimestampSource::RecordField("aggregationWindow".to_string()),
        )
        .unwrap();
        let window = Utc.with_ymd_and_hms(2025, 3, 1, 10, 1, 0).unwrap();
        let record = SinkRecord::new(
            None,
            SinkValue::from(json!({
                "postcode": "SW1",
                "aggregationWindow": window.timestamp_millis(),
            })),
        );
        assert_eq!(
            partitioner.encode_partition(&record).unwrap(),
            "year=2025/month=03/day=01/hour=10/minute=01"
        );

        let record = SinkRecord::new(None, SinkValue::from(json!({"postcode": "SW1"})));
        assert_eq!(
            partitioner.encode_partition(&record),
            Err(PartitionerError::MissingTimestamp)
        );
    }

    #[test]
    fn test_invalid_settings() {
        assert_eq!(
            TimeBasedPartitioner::new(DEFAULT_PATH_FORMAT, Duration::ZERO, TimestampSource::Record),
            Err(PartitionerError::InvalidPartitionDuration)
        );
        assert_eq!(
            TimeBasedPartitioner::new("year=%", Duration::from_secs(60), TimestampSource::Record),
            Err(PartitionerError::InvalidPathFormat("year=%".to_string()))
        );
    }

    #[test]
    fn test_deserialize_defaults() {
        let partitioner: TimeBasedPartitioner = serde_yaml::from_str("{}").unwrap();
        assert_eq!(partitioner, TimeBasedPartitioner::default());

        let yaml = r#"
path_format: "dt=%Y-%m-%d"
partition_duration: 86400000
timestamp_source: !RecordField aggregationWindow
"#;
        let partitioner: TimeBasedPartitioner = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(partitioner.path_format(), "dt=%Y-%m-%d");
        assert_eq!(partitioner.partition_duration(), Duration::from_secs(86400));
        assert_eq!(
            partitioner.timestamp_source(),
            &TimestampSource::RecordField("aggregationWindow".to_string())
        );
    }
}
