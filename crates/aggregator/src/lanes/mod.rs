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

//! Processing lanes.
//!
//! Each lane runs in its own actor and owns the watermarks and aggregates of
//! the input partitions routed to it. Lanes never share state, so records of
//! one partition are processed strictly in arrival order.

pub mod actor;

pub use actor::{
    AggregationLaneActorHandle, AggregationLaneActorHandleError, AggregationLaneStats, LaneError,
};
