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
    config::{self, AggregatorConfig},
    init_aggregation, telemetry,
};
use std::{env, path::PathBuf, str::FromStr};
use tracing::{error, info, Level};

fn init_tracing(level: &'_ str) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let level = Level::from_str(level).map_err(|err| format!("invalid logging level: {err}"))?;
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        return Err(format!("Usage: {} <config-file>", args[0]).into());
    }
    let config_file = PathBuf::from(&args[1]);
    let config: AggregatorConfig = match config::figment(config_file).extract() {
        Ok(config) => config,
        Err(err) => {
            return Err(format!("Parsing config file failed: {err}").into());
        }
    };
    init_tracing(&config.logging.level)?;
    config.aggregation.validate()?;

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    // If num threads is not configured then the default use all CPU cores is used
    if let Some(num_threads) = config.runtime.threads {
        runtime_builder.worker_threads(num_threads);
    }
    runtime_builder.enable_all();
    let runtime = runtime_builder.build()?;
    runtime.block_on(async move {
        let meter_provider = match config.telemetry.as_ref() {
            Some(telemetry_config) => {
                let provider = telemetry::init_meter_provider(telemetry_config)?;
                opentelemetry::global::set_meter_provider(provider.clone());
                Some(provider)
            }
            None => {
                info!("No telemetry collector configured, metrics are not exported");
                None
            }
        };
        let meter = opentelemetry::global::meter(telemetry::SERVICE_NAME);

        let aggregation_handle = init_aggregation(config, meter);
        let ret = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Termination signal received, gracefully shutting down actors");
                Ok(())
            }
            aggregation_ret = aggregation_handle => {
                info!("Page view aggregation is terminated, shutting down the aggregator");
                aggregation_ret
            }
        };
        if let Some(provider) = meter_provider {
            if let Err(err) = provider.shutdown() {
                error!("Failed to shutdown the meter provider: {err}");
            }
        }
        ret.map_err(|err| -> Box<dyn std::error::Error + Send + Sync + 'static> { err.into() })
    })
}
