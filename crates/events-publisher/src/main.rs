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

use pageview_aggregator::config::figment;
use pageview_events_publisher::{
    config::EventsPublisherConfig, generator::PageViewGenerator, publisher::publish_events,
};
use std::{env, path::PathBuf, str::FromStr};
use tracing::{info, Level};

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
    let config: EventsPublisherConfig = match figment(config_file).extract() {
        Ok(config) => config,
        Err(err) => {
            return Err(format!("Parsing config file failed: {err}").into());
        }
    };
    init_tracing(&config.logging.level)?;
    let generator = PageViewGenerator::new(config.postcodes.clone(), rand::rng())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Termination signal received, stopping the events publisher");
                Ok(())
            }
            ret = publish_events(&config, generator) => ret,
        }
    })?;
    Ok(())
}
