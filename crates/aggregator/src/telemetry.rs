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

use crate::config::TelemetryConfig;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};
use tracing::info;

pub const SERVICE_NAME: &str = "pageview-aggregator";

/// Build a meter provider periodically exporting to an OTLP gRPC collector.
pub fn init_meter_provider(config: &TelemetryConfig) -> anyhow::Result<SdkMeterProvider> {
    info!("Exporting metrics to OTLP collector at {}", config.url());
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(config.url())
        .with_timeout(config.exporter_timeout)
        .build()?;
    let reader = PeriodicReader::builder(exporter)
        .with_interval(config.reader_interval)
        .build();
    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
        .build();
    Ok(provider)
}
