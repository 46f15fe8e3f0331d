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
    inputs::kafka::KafkaInputConfig,
    publishers::{kafka_avro, kafka_json},
};
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use pageview_analytics::aggregation::{AggregationError, WindowingConfig};
use rdkafka::config::ClientConfig;
use serde_with::serde_as;
use std::{path::Path, time::Duration};

/// Prefix of environment variables overriding the configuration file, nested
/// keys are separated by `__` (e.g. `PV_AGGREGATION__GRACE=600000`)
pub const ENV_PREFIX: &str = "PV_";

pub(crate) const fn default_partitions() -> usize {
    1
}

pub(crate) const fn default_buffer_size() -> usize {
    1_000
}

pub(crate) const fn default_window_size() -> Duration {
    Duration::from_secs(60)
}

pub(crate) const fn default_grace() -> Duration {
    Duration::from_secs(30 * 60)
}

pub(crate) const fn default_retention() -> Duration {
    Duration::from_secs(60 * 60)
}

pub(crate) const fn default_sweep_interval() -> Duration {
    Duration::from_secs(10)
}

pub(crate) const fn default_telemetry_timeout() -> Duration {
    Duration::from_secs(5)
}

pub(crate) const fn default_telemetry_interval() -> Duration {
    Duration::from_secs(60)
}

/// Layered configuration source: the YAML file overridden by `PV_`
/// environment variables
pub fn figment(config_file: impl AsRef<Path>) -> Figment {
    Figment::new()
        .merge(Yaml::file(config_file.as_ref()))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AggregatorConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub telemetry: Option<TelemetryConfig>,
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub security: Option<KafkaSecurityConfig>,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    pub input: KafkaInputConfig,
    pub output: PublisherEndpoint,
}

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    #[serde(skip_serializing_if = "::std::option::Option::is_none")]
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC collector endpoint
    pub url: String,

    /// Metrics exporter GRPC timeout
    #[serde(default = "default_telemetry_timeout")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub exporter_timeout: Duration,

    /// Configures the intervening time between exports for a
    /// [opentelemetry_sdk::metrics::PeriodicReader]
    #[serde(default = "default_telemetry_interval")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub reader_interval: Duration,
}

impl TelemetryConfig {
    pub fn url(&self) -> &str {
        self.url.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    InvalidPartitionCount,
    InvalidBufferSize,
    InvalidSweepInterval,
    Windowing(AggregationError),
}

impl std::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPartitionCount => write!(f, "partitions must be greater than 0"),
            Self::InvalidBufferSize => write!(f, "buffer_size must be greater than 0"),
            Self::InvalidSweepInterval => write!(f, "sweep_interval must be greater than 0"),
            Self::Windowing(err) => write!(f, "invalid windowing: {err}"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Windowing and processing lanes of the aggregation.
///
/// Durations are given in milliseconds.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AggregationConfig {
    /// Number of processing lanes, input partition `p` is handled by lane
    /// `p % partitions`
    #[serde(default = "default_partitions")]
    pub partitions: usize,

    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    #[serde(default = "default_window_size")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub window_size: Duration,

    #[serde(default = "default_grace")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub grace: Duration,

    #[serde(default = "default_retention")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub retention: Duration,

    /// Upper bound of aggregates held per input partition
    #[serde(default, skip_serializing_if = "::std::option::Option::is_none")]
    pub max_entries: Option<usize>,

    #[serde(default = "default_sweep_interval")]
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    pub sweep_interval: Duration,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            buffer_size: default_buffer_size(),
            window_size: default_window_size(),
            grace: default_grace(),
            retention: default_retention(),
            max_entries: None,
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl AggregationConfig {
    pub fn windowing(&self) -> WindowingConfig {
        WindowingConfig {
            window_size: self.window_size,
            grace: self.grace,
            retention: self.retention,
            max_entries: self.max_entries,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.partitions == 0 {
            return Err(ConfigurationError::InvalidPartitionCount);
        }
        if self.buffer_size == 0 {
            return Err(ConfigurationError::InvalidBufferSize);
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigurationError::InvalidSweepInterval);
        }
        self.windowing()
            .validate()
            .map_err(ConfigurationError::Windowing)
    }
}

/// Credentials of a SASL_SSL secured deployment.
///
/// Only applied when `security_protocol` is `SASL_SSL` (any case).
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KafkaSecurityConfig {
    pub security_protocol: String,
    #[serde(default, skip_serializing_if = "::std::option::Option::is_none")]
    pub sasl_mechanism: Option<String>,
    #[serde(default, skip_serializing_if = "::std::option::Option::is_none")]
    pub sasl_username: Option<String>,
    #[serde(default, skip_serializing_if = "::std::option::Option::is_none")]
    pub sasl_password: Option<String>,
    #[serde(default, skip_serializing_if = "::std::option::Option::is_none")]
    pub client_dns_lookup: Option<String>,
    #[serde(default, skip_serializing_if = "::std::option::Option::is_none")]
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds<u64>>")]
    pub session_timeout: Option<Duration>,
    /// Schema registry basic auth in the `user:password` form
    #[serde(default, skip_serializing_if = "::std::option::Option::is_none")]
    pub schema_registry_user_info: Option<String>,
}

impl KafkaSecurityConfig {
    pub fn is_sasl_ssl(&self) -> bool {
        self.security_protocol.eq_ignore_ascii_case("SASL_SSL")
    }

    /// Set the security properties on a librdkafka client config
    pub fn apply(&self, client_config: &mut ClientConfig) {
        if !self.is_sasl_ssl() {
            return;
        }
        client_config.set("security.protocol", "SASL_SSL");
        if let Some(mechanism) = &self.sasl_mechanism {
            client_config.set("sasl.mechanism", mechanism);
        }
        if let Some(username) = &self.sasl_username {
            client_config.set("sasl.username", username);
        }
        if let Some(password) = &self.sasl_password {
            client_config.set("sasl.password", password);
        }
        if let Some(dns_lookup) = &self.client_dns_lookup {
            client_config.set("client.dns.lookup", dns_lookup);
        }
        if let Some(timeout) = self.session_timeout {
            client_config.set("session.timeout.ms", timeout.as_millis().to_string());
        }
    }

    /// Schema registry basic auth username and optional password
    pub fn schema_registry_credentials(&self) -> Option<(&str, Option<&str>)> {
        if !self.is_sasl_ssl() {
            return None;
        }
        let user_info = self.schema_registry_user_info.as_deref()?;
        match user_info.split_once(':') {
            Some((username, password)) => Some((username, Some(password))),
            None => Some((user_info, None)),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum PublisherEndpoint {
    KafkaJson(kafka_json::KafkaConfig),
    KafkaAvro(kafka_avro::KafkaConfig),
}

#[cfg(test)]
mod tests;
