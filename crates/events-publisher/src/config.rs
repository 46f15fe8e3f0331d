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

use pageview_aggregator::{
    codec::ValueFormat,
    config::{KafkaSecurityConfig, LoggingConfig},
};
use serde_with::serde_as;
use std::{collections::HashMap, time::Duration};

const fn default_count() -> usize {
    10
}

const fn default_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_postcodes() -> Vec<String> {
    ["SW1A", "EC1A", "W1A", "N1", "SE1"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[serde_as]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EventsPublisherConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default, skip_serializing_if = "::std::option::Option::is_none")]
    pub security: Option<KafkaSecurityConfig>,

    pub topic: String,

    pub value_format: ValueFormat,

    /// Key/Value producer configs are defined in librdkafka
    pub producer_config: HashMap<String, String>,

    /// Postcodes picked at random for each event
    #[serde(default = "default_postcodes")]
    pub postcodes: Vec<String>,

    /// Number of events to publish before exiting
    #[serde(default = "default_count")]
    pub count: usize,

    /// Pause between two events, in milliseconds
    #[serde(default = "default_interval")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub interval: Duration,
}
