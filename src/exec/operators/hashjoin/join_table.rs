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
//! Lookup contract between the probe engine and the build-side hash table.
//!
//! Responsibilities:
//! - Defines the batch lookup call that resolves probe rows to hash-slot ids.
//! - Carries the null-equality policy opaquely from plan lowering to the table.
//!
//! Key exported interfaces:
//! - Types: `JoinTable`, `NullComparator`.
//! - Constants: `NOT_FOUND`.

use crate::exec::chunk::Chunk;

/// Sentinel slot id for probe rows whose key is absent from the table.
pub const NOT_FOUND: i32 = -1;

/// Null-equality policy for the join keys, opaque to the probe engine.
///
/// One flag per key position; `true` marks a key compared with null-safe
/// equality (`<=>`), where null matches null.
#[derive(Clone, Debug, Default)]
pub struct NullComparator {
    eq_null_safe: Vec<bool>,
}

impl NullComparator {
    pub fn new(eq_null_safe: Vec<bool>) -> Self {
        Self { eq_null_safe }
    }

    pub fn eq_null_safe(&self) -> &[bool] {
        &self.eq_null_safe
    }

    pub fn is_null_safe(&self, key_index: usize) -> bool {
        self.eq_null_safe.get(key_index).copied().unwrap_or(false)
    }
}

/// Batch lookup over the build-side hash table.
///
/// The table owns its key layout: pivoting the probe key columns into its
/// comparison format happens behind `find`. The probe engine only sizes the
/// output buffer and interprets the slot ids it gets back — the high 16 bits
/// select a start buffer, the low 16 bits a slot within it, and `NOT_FOUND`
/// marks a miss.
pub trait JoinTable: Send {
    /// Number of build rows indexed by the table.
    fn size(&self) -> usize;

    /// Write one slot id per probe row of `probe` into `out`.
    /// `out.len()` equals the probe row count.
    fn find(
        &self,
        probe: &Chunk,
        null_comparator: &NullComparator,
        out: &mut [i32],
    ) -> Result<(), String>;
}
