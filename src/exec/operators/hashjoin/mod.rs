// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Hash-join operator module exports.
//!
//! Responsibilities:
//! - Registers the vectorized probe engine, its build-side interface types,
//!   and the probe operator used by pipeline graph construction.
//!
//! Current limitations:
//! - Implements only the equi-join probe phase; build-side construction is
//!   owned by the surrounding join operator.
//! - Unsupported states should be surfaced as explicit runtime errors
//!   instead of fallback behavior.

pub(crate) mod build_side;
pub(crate) mod copier;
mod join_table;
mod probe_operator;
mod vectorized_probe;

pub use build_side::{
    BATCH_MASK, BATCH_SIZE, BUILD_RECORD_LINK_SIZE, BuildInfo, MatchBitmap, SKIP, StartIndices,
};
pub use join_table::{JoinTable, NOT_FOUND, NullComparator};
pub use probe_operator::{HashJoinProbeOperator, HashJoinProbeOperatorFactory};
pub use vectorized_probe::VectorizedProbe;

/// Join types implemented by the probe engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
}

impl JoinType {
    /// Whether probe rows without a build match are projected (with null build columns).
    pub fn projects_unmatched_probe(self) -> bool {
        matches!(self, JoinType::LeftOuter | JoinType::FullOuter)
    }

    /// Whether build rows never paired with a probe row are projected at the end.
    pub fn projects_unmatched_build(self) -> bool {
        matches!(self, JoinType::RightOuter | JoinType::FullOuter)
    }
}

/// Return a stable string label for one join type, used by diagnostics and errors.
pub fn join_type_str(join_type: JoinType) -> &'static str {
    match join_type {
        JoinType::Inner => "INNER",
        JoinType::LeftOuter => "LEFT_OUTER",
        JoinType::RightOuter => "RIGHT_OUTER",
        JoinType::FullOuter => "FULL_OUTER",
    }
}
