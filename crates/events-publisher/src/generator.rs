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

//! Random page view events.

use chrono::{DateTime, Utc};
use pageview_aggregator::codec::PageViewEvent;
use rand::{seq::IndexedRandom, Rng};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorError {
    NoPostcodes,
}

impl std::fmt::Display for GeneratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPostcodes => write!(f, "at least one postcode is required"),
        }
    }
}

impl std::error::Error for GeneratorError {}

/// Generates page views for a random postcode, user and page, stamped with
/// the generation time.
#[derive(Debug)]
pub struct PageViewGenerator<R> {
    postcodes: Vec<String>,
    rng: R,
}

impl<R: Rng> PageViewGenerator<R> {
    pub fn new(postcodes: Vec<String>, rng: R) -> Result<Self, GeneratorError> {
        if postcodes.is_empty() {
            return Err(GeneratorError::NoPostcodes);
        }
        Ok(Self { postcodes, rng })
    }

    pub fn postcodes(&self) -> &[String] {
        &self.postcodes
    }

    pub fn next_event(&mut self, now: DateTime<Utc>) -> PageViewEvent {
        let postcode = self
            .postcodes
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_default();
        let user_id = self.rng.random_range(0..i32::MAX);
        let page: u64 = self.rng.random();
        PageViewEvent {
            postcode,
            timestamp: Some(now.timestamp_millis()),
            user_id: Some(user_id),
            webpage: Some(format!("www.sample.com/{page:016x}")),
        }
    }
}
