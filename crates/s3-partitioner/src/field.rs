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
    record::{SinkRecord, SinkValue},
    time::TimeBasedPartitioner,
    Partitioner, PartitionerError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Time based path followed by `<field>=<value>` taken from the record value,
/// e.g. `year=2025/month=01/day=01/hour=10/minute=00/postcode=SW1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAndTimePartitioner {
    field_name: String,

    #[serde(flatten)]
    time: TimeBasedPartitioner,
}

impl FieldAndTimePartitioner {
    pub fn new(field_name: impl Into<String>, time: TimeBasedPartitioner) -> Self {
        Self {
            field_name: field_name.into(),
            time,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn time(&self) -> &TimeBasedPartitioner {
        &self.time
    }

    fn extract_field_value(&self, record: &SinkRecord) -> Result<String, PartitionerError> {
        let cannot_extract = || PartitionerError::CannotExtractField {
            field: self.field_name.clone(),
            value_type: record.value.to_string(),
        };
        match &record.value {
            SinkValue::Struct(fields) => match fields.get(&self.field_name) {
                None => Err(PartitionerError::FieldNotFound {
                    field: self.field_name.clone(),
                }),
                Some(Value::Null) => Err(cannot_extract()),
                Some(value) => Ok(render(value)),
            },
            SinkValue::Map(fields) => match fields.get(&self.field_name) {
                None | Some(Value::Null) => Err(cannot_extract()),
                Some(value) => Ok(render(value)),
            },
            SinkValue::Null | SinkValue::Other(_) => Err(cannot_extract()),
        }
    }

    /// Encode using `now` as the wall clock
    pub fn encode_partition_at(
        &self,
        record: &SinkRecord,
        now: DateTime<Utc>,
    ) -> Result<String, PartitionerError> {
        let field_value = self.extract_field_value(record)?;
        let time_path = self.time.encode_partition_at(record, now)?;
        Ok(format!("{time_path}/{}={field_value}", self.field_name))
    }
}

impl Partitioner for FieldAndTimePartitioner {
    fn encode_partition(&self, record: &SinkRecord) -> Result<String, PartitionerError> {
        self.encode_partition_at(record, Utc::now())
    }
}

/// Strings are written without quotes, other values as JSON
fn render(value: &Value) -> String {
    match value {
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}
