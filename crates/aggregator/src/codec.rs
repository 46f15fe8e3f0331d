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

//! Page view records exchanged over Kafka and their wire codecs.
//!
//! Input values are [`PageViewEvent`]s encoded either as JSON or as Confluent
//! framed Avro (schema id looked up in a schema registry). Output values are
//! [`AggregatedPageView`]s, one per accepted input event.

use crate::{
    config::KafkaSecurityConfig,
    publishers::{kafka_avro::AvroConverter, KeyedRecord},
};
use chrono::{DateTime, Utc};
use pageview_analytics::{aggregation::WindowResult, timestamp::EventTimestamp};
use schema_registry_converter::{
    async_impl::{avro::AvroDecoder, schema_registry::SrSettings},
    error::SRCError,
};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnError};
use std::convert::Infallible;

/// Avro schema of the input records
pub const PAGE_VIEW_EVENT_SCHEMA: &str = r#"{
  "type": "record",
  "name": "PageViewEvent",
  "namespace": "com.checkout.events",
  "fields": [
    {"name": "postcode", "type": "string"},
    {"name": "timestamp", "type": ["null", "long"], "default": null},
    {"name": "userId", "type": ["null", "int"], "default": null},
    {"name": "webpage", "type": ["null", "string"], "default": null}
  ]
}"#;

/// Avro schema of the published aggregates
pub const AGGREGATED_PAGE_VIEW_SCHEMA: &str = r#"{
  "type": "record",
  "name": "AggregatedPageViewEvent",
  "namespace": "com.checkout.events",
  "fields": [
    {"name": "postcode", "type": "string"},
    {"name": "pageViewCount", "type": "long"},
    {"name": "aggregateIntervalInSeconds", "type": "int"},
    {"name": "aggregationWindow", "type": {"type": "long", "logicalType": "timestamp-millis"}}
  ]
}"#;

/// A single page view as published by the website.
///
/// A timestamp that is missing or not a number is treated as absent, the
/// event is then timed by its Kafka record instead.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageViewEvent {
    pub postcode: String,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i32>,
    #[serde(default)]
    pub webpage: Option<String>,
}

impl EventTimestamp for PageViewEvent {
    fn timestamp_millis(&self) -> Option<i64> {
        self.timestamp
    }
}

/// Number of page views seen so far for a postcode in one window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedPageView {
    pub postcode: String,
    pub page_view_count: i64,
    pub aggregate_interval_in_seconds: i32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub aggregation_window: DateTime<Utc>,
}

impl From<WindowResult<String>> for AggregatedPageView {
    fn from(value: WindowResult<String>) -> Self {
        Self {
            postcode: value.key,
            page_view_count: value.count,
            aggregate_interval_in_seconds: value.window_size_seconds,
            aggregation_window: value.window_start,
        }
    }
}

impl KeyedRecord for AggregatedPageView {
    fn record_key(&self) -> Option<String> {
        Some(self.postcode.clone())
    }
}

/// Converts [`AggregatedPageView`] to Avro values of
/// [`AGGREGATED_PAGE_VIEW_SCHEMA`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggregatedPageViewAvroConverter;

impl AvroConverter<AggregatedPageView, Infallible> for AggregatedPageViewAvroConverter {
    fn get_avro_schema(&self) -> String {
        AGGREGATED_PAGE_VIEW_SCHEMA.to_string()
    }

    fn get_key(&self, input: &AggregatedPageView) -> Option<String> {
        input.record_key()
    }

    fn get_avro_value(
        &self,
        input: AggregatedPageView,
    ) -> Result<apache_avro::types::Value, Infallible> {
        use apache_avro::types::Value;
        Ok(Value::Record(vec![
            ("postcode".to_string(), Value::String(input.postcode)),
            ("pageViewCount".to_string(), Value::Long(input.page_view_count)),
            (
                "aggregateIntervalInSeconds".to_string(),
                Value::Int(input.aggregate_interval_in_seconds),
            ),
            (
                "aggregationWindow".to_string(),
                Value::TimestampMillis(input.aggregation_window.timestamp_millis()),
            ),
        ]))
    }
}

/// Converts [`PageViewEvent`] to Avro values of [`PAGE_VIEW_EVENT_SCHEMA`],
/// keyed by postcode
#[derive(Debug, Clone)]
pub struct PageViewEventAvroConverter {
    schema: apache_avro::Schema,
}

impl PageViewEventAvroConverter {
    pub fn new() -> Result<Self, apache_avro::Error> {
        let schema = apache_avro::Schema::parse_str(PAGE_VIEW_EVENT_SCHEMA)?;
        Ok(Self { schema })
    }
}

impl AvroConverter<PageViewEvent, apache_avro::Error> for PageViewEventAvroConverter {
    fn get_avro_schema(&self) -> String {
        PAGE_VIEW_EVENT_SCHEMA.to_string()
    }

    fn get_key(&self, input: &PageViewEvent) -> Option<String> {
        Some(input.postcode.clone())
    }

    fn get_avro_value(
        &self,
        input: PageViewEvent,
    ) -> Result<apache_avro::types::Value, apache_avro::Error> {
        apache_avro::to_value(input)?.resolve(&self.schema)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRegistryConfig {
    pub url: String,
}

/// Encoding of the input topic values
#[derive(strum_macros::Display, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueFormat {
    #[strum(to_string = "json")]
    Json,
    #[strum(to_string = "avro")]
    Avro(SchemaRegistryConfig),
}

#[derive(Debug)]
pub enum DecodeError {
    Json(serde_json::Error),
    Avro(apache_avro::Error),
    SchemaRegistry(SRCError),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "invalid JSON page view: {err}"),
            Self::Avro(err) => write!(f, "invalid Avro page view: {err}"),
            Self::SchemaRegistry(err) => write!(f, "schema registry error: {err}"),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

impl From<apache_avro::Error> for DecodeError {
    fn from(err: apache_avro::Error) -> Self {
        Self::Avro(err)
    }
}

impl From<SRCError> for DecodeError {
    fn from(err: SRCError) -> Self {
        Self::SchemaRegistry(err)
    }
}

/// Schema registry client settings, with basic auth when the deployment
/// runs over SASL_SSL
pub fn schema_registry_settings(
    url: &str,
    security: Option<&KafkaSecurityConfig>,
) -> Result<SrSettings, SRCError> {
    match security.and_then(|x| x.schema_registry_credentials()) {
        Some((username, password)) => SrSettings::new_builder(url.to_string())
            .set_basic_authorization(username, password)
            .build(),
        None => Ok(SrSettings::new(url.to_string())),
    }
}

/// Decodes input record values into [`PageViewEvent`]
pub enum PageViewDecoder {
    Json,
    Avro(Box<AvroDecoder<'static>>),
}

impl PageViewDecoder {
    pub fn from_config(
        format: &ValueFormat,
        security: Option<&KafkaSecurityConfig>,
    ) -> Result<Self, DecodeError> {
        match format {
            ValueFormat::Json => Ok(Self::Json),
            ValueFormat::Avro(registry) => {
                let sr_settings = schema_registry_settings(&registry.url, security)?;
                Ok(Self::Avro(Box::new(AvroDecoder::new(sr_settings))))
            }
        }
    }

    pub async fn decode(&self, payload: &[u8]) -> Result<PageViewEvent, DecodeError> {
        match self {
            Self::Json => Ok(serde_json::from_slice(payload)?),
            Self::Avro(decoder) => {
                let decoded = decoder.decode(Some(payload)).await?;
                Ok(apache_avro::from_value::<PageViewEvent>(&decoded.value)?)
            }
        }
    }
}
