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

//! Building blocks for counting keyed events in event-time tumbling windows.
//!
//! The pipeline for a single event is:
//! [`timestamp`] (resolve event time) -> [`window`] (assign window) ->
//! [`aggregation`] (accept/drop against the [`watermark`], update the
//! [`store`]) -> [`eviction`] (free state that can no longer change).

pub mod aggregation;
pub mod eviction;
pub mod store;
pub mod timestamp;
pub mod watermark;
pub mod window;
