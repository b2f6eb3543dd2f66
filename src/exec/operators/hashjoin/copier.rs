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
//! Column copiers that materialize probe output batches.
//!
//! Responsibilities:
//! - Gathers probe-side columns through the 2-byte selection cells.
//! - Gathers build-side columns across the hyper batch through the 6-byte
//!   offset cells, optionally routing skip cells to a null row.
//!
//! Key exported interfaces:
//! - Types: `ProbeFieldCopier`, `BuildFieldCopier`.

use arrow::array::{Array, ArrayRef, UInt32Array, new_null_array};
use arrow::compute::{interleave, take};
use arrow::datatypes::DataType;

use super::build_side::BUILD_RECORD_LINK_SIZE;
use crate::exec::chunk::Chunk;

/// Copies one probe-side column, selecting rows through 2-byte index cells.
pub(crate) struct ProbeFieldCopier {
    source: ArrayRef,
}

impl ProbeFieldCopier {
    pub(crate) fn new(source: ArrayRef) -> Self {
        Self { source }
    }

    /// Null-filled output column used when no probe rows are projected.
    pub(crate) fn allocate(&self, records: usize) -> ArrayRef {
        new_null_array(self.source.data_type(), records)
    }

    pub(crate) fn copy(&self, sv2: &[u8], records: usize) -> Result<ArrayRef, String> {
        let needed = records * 2;
        if sv2.len() < needed {
            return Err(format!(
                "probe selection buffer has {} bytes, need {}",
                sv2.len(),
                needed
            ));
        }
        let mut indices = Vec::with_capacity(records);
        for i in 0..records {
            let at = i * 2;
            indices.push(u16::from_le_bytes([sv2[at], sv2[at + 1]]) as u32);
        }
        let indices = UInt32Array::from(indices);
        take(self.source.as_ref(), &indices, None).map_err(|e| format!("probe copy failed: {e}"))
    }
}

/// Build probe copiers over the selected columns of the bound probe chunk.
pub(crate) fn probe_copiers(
    probe: &Chunk,
    columns: &[usize],
) -> Result<Vec<ProbeFieldCopier>, String> {
    let mut out = Vec::with_capacity(columns.len());
    for &col in columns {
        out.push(ProbeFieldCopier::new(probe.column(col)?));
    }
    Ok(out)
}

/// Copies one build-side column across the hyper batch, selecting rows through
/// 6-byte offset cells. The null-aware variant routes skip cells to an
/// appended single-row null source; the fast variant treats them as corrupt
/// state.
pub(crate) struct BuildFieldCopier {
    sources: Vec<ArrayRef>,
    null_row: Option<ArrayRef>,
    data_type: DataType,
}

impl BuildFieldCopier {
    pub(crate) fn new(sources: Vec<ArrayRef>, data_type: DataType, null_aware: bool) -> Self {
        let null_row = null_aware.then(|| new_null_array(&data_type, 1));
        Self {
            sources,
            null_row,
            data_type,
        }
    }

    pub(crate) fn copy(&self, offsets: &[u8], records: usize) -> Result<ArrayRef, String> {
        let needed = records * BUILD_RECORD_LINK_SIZE;
        if offsets.len() < needed {
            return Err(format!(
                "build offset buffer has {} bytes, need {}",
                offsets.len(),
                needed
            ));
        }
        if self.sources.is_empty() {
            // Empty build side: every projected cell is a skip cell.
            return Ok(new_null_array(&self.data_type, records));
        }
        let mut pairs = Vec::with_capacity(records);
        for i in 0..records {
            let at = i * BUILD_RECORD_LINK_SIZE;
            let batch = i32::from_le_bytes([
                offsets[at],
                offsets[at + 1],
                offsets[at + 2],
                offsets[at + 3],
            ]);
            if batch == -1 {
                if self.null_row.is_none() {
                    return Err(
                        "skip cell reached a build copier without null support".to_string()
                    );
                }
                pairs.push((self.sources.len(), 0));
                continue;
            }
            let batch = batch as usize;
            let row = u16::from_le_bytes([offsets[at + 4], offsets[at + 5]]) as usize;
            let source = self.sources.get(batch).ok_or_else(|| {
                format!(
                    "build offset references batch {} (have {})",
                    batch,
                    self.sources.len()
                )
            })?;
            if row >= source.len() {
                return Err(format!(
                    "build offset references row {} of batch {} (len={})",
                    row,
                    batch,
                    source.len()
                ));
            }
            pairs.push((batch, row));
        }
        let mut refs: Vec<&dyn Array> = self.sources.iter().map(|a| a.as_ref()).collect();
        if let Some(null_row) = self.null_row.as_ref() {
            refs.push(null_row.as_ref());
        }
        interleave(&refs, &pairs).map_err(|e| format!("build copy failed: {e}"))
    }
}

/// Build one copier per selected build column, gathering that column from
/// every build batch. `data_types` supplies the column types so the copiers
/// stay usable when the build side is empty.
pub(crate) fn build_copiers(
    build_batches: &[Chunk],
    columns: &[usize],
    data_types: &[DataType],
    null_aware: bool,
) -> Result<Vec<BuildFieldCopier>, String> {
    if columns.len() != data_types.len() {
        return Err(format!(
            "build copier column/type mismatch: {} vs {}",
            columns.len(),
            data_types.len()
        ));
    }
    let mut out = Vec::with_capacity(columns.len());
    for (&col, data_type) in columns.iter().zip(data_types) {
        let mut sources = Vec::with_capacity(build_batches.len());
        for batch in build_batches {
            sources.push(batch.column(col)?);
        }
        out.push(BuildFieldCopier::new(
            sources,
            data_type.clone(),
            null_aware,
        ));
    }
    Ok(out)
}
