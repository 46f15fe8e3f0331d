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

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Value of a record delivered to the sink
#[derive(Debug, Clone, PartialEq)]
pub enum SinkValue {
    /// Schema-full value, every schema field is present
    Struct(Map<String, Value>),
    /// Schema-less value
    Map(Map<String, Value>),
    Null,
    /// Any other value, only its type name is kept
    Other(String),
}

impl std::fmt::Display for SinkValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Struct(_) => write!(f, "struct"),
            Self::Map(_) => write!(f, "map"),
            Self::Null => write!(f, "null"),
            Self::Other(type_name) => write!(f, "{type_name}"),
        }
    }
}

impl From<Value> for SinkValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Map(map),
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Other("boolean".to_string()),
            Value::Number(_) => Self::Other("number".to_string()),
            Value::String(_) => Self::Other("string".to_string()),
            Value::Array(_) => Self::Other("array".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Kafka record timestamp
    pub timestamp: Option<DateTime<Utc>>,
    pub value: SinkValue,
}

impl SinkRecord {
    pub fn new(timestamp: Option<DateTime<Utc>>, value: SinkValue) -> Self {
        Self {
            topic: String::new(),
            partition: 0,
            offset: 0,
            timestamp,
            value,
        }
    }

    /// Look up a field of a struct or map value
    pub fn field(&self, name: &str) -> Option<&Value> {
        match &self.value {
            SinkValue::Struct(map) | SinkValue::Map(map) => map.get(name),
            SinkValue::Null | SinkValue::Other(_) => None,
        }
    }
}
