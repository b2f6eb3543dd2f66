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
//! Core probe engine for hash-join output assembly.
//!
//! Responsibilities:
//! - Executes key lookup, chain traversal, and join-type specific row selection
//!   into fixed-capacity output chunks, suspending mid-batch when full.
//! - Tracks build-row match bits and projects never-matched build rows in the
//!   terminal phase of RIGHT/FULL joins.
//!
//! Key exported interfaces:
//! - Types: `VectorizedProbe`.
//!
//! Current limitations:
//! - Implements only the equi-join probe semantics wired by the hash-join
//!   probe operator; build-side construction is owned by the caller.
//! - Unsupported states should be surfaced as explicit runtime errors instead
//!   of fallback behavior.

use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch, RecordBatchOptions, new_null_array};
use arrow::datatypes::{Schema, SchemaRef};
use arrow_buffer::Buffer;

use super::JoinType;
use super::build_side::{
    BATCH_SIZE, BUILD_RECORD_LINK_SIZE, BuildInfo, NO_MATCH, SKIP, StartIndices, composite_batch,
    composite_id, composite_row, write_cell,
};
use super::copier::{BuildFieldCopier, ProbeFieldCopier, build_copiers, probe_copiers};
use super::join_table::{JoinTable, NOT_FOUND, NullComparator};
use crate::exec::chunk::Chunk;
use crate::runtime::mem_tracker::{MemTracker, TrackedBytes};
use crate::runtime::profile::{Counter, CounterRef, CounterUnit, ScopedTimer};

/// Byte buffer owned by the engine and accounted against its memory tracker.
struct IndexBuffer {
    bytes: Vec<u8>,
    _tracked: TrackedBytes,
}

impl IndexBuffer {
    fn try_new(len: usize, tracker: &Arc<MemTracker>) -> Result<Self, String> {
        let tracked = TrackedBytes::try_new(len, Arc::clone(tracker))?;
        Ok(Self {
            bytes: vec![0u8; len],
            _tracked: tracked,
        })
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

/// Scratch buffer of slot ids written by the table lookup, grown but never shrunk.
struct ProbedSlots {
    slots: Vec<i32>,
    _tracked: TrackedBytes,
}

#[inline]
fn write_sv2(buf: &mut [u8], cell: usize, value: u16) {
    let at = cell * 2;
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

/// Probe engine for a vectorized hash join.
///
/// Consumes one probe chunk at a time against prebuilt start/link chains and
/// emits output chunks holding at most `target_records_per_batch` rows. A
/// negative return from [`probe_batch`](Self::probe_batch) means the output
/// chunk filled before the probe chunk was exhausted and the call must be
/// repeated; the engine keeps its position, including mid-chain, across calls.
impl std::fmt::Debug for VectorizedProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorizedProbe")
            .field("join_type", &self.join_type)
            .field("closed", &self.closed)
            .field("output_rows", &self.output_rows)
            .finish_non_exhaustive()
    }
}

pub struct VectorizedProbe {
    mem_tracker: Arc<MemTracker>,
    build_infos: Vec<BuildInfo>,
    starts: StartIndices,
    table: Box<dyn JoinTable>,
    null_comparator: NullComparator,
    join_type: JoinType,
    project_unmatched_probe: bool,
    project_unmatched_build: bool,
    target_records_per_batch: usize,

    probe_schema: SchemaRef,
    probe_output_columns: Vec<usize>,
    output_schema: SchemaRef,
    build_copiers: Vec<BuildFieldCopier>,

    probe: Option<Chunk>,
    probe_copiers: Vec<ProbeFieldCopier>,

    probe_sv2: Option<IndexBuffer>,
    build_offsets: Option<IndexBuffer>,
    probed: Option<ProbedSlots>,

    next_probe_index: usize,
    remainder_build_composite: i64,
    remainder_build_set_index: i64,
    remainder_build_element_index: i64,

    output: Option<Chunk>,
    output_rows: u64,
    closed: bool,

    probe_find_timer: CounterRef,
    probe_copy_timer: CounterRef,
    build_copy_timer: CounterRef,
    non_match_timer: CounterRef,
}

impl VectorizedProbe {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mem_tracker: Arc<MemTracker>,
        build_batches: &[Chunk],
        build_schema: SchemaRef,
        probe_schema: SchemaRef,
        probe_output_columns: Vec<usize>,
        build_output_columns: Vec<usize>,
        join_type: JoinType,
        build_infos: Vec<BuildInfo>,
        start_indices: Vec<Buffer>,
        table: Box<dyn JoinTable>,
        target_records_per_batch: usize,
        null_comparator: NullComparator,
    ) -> Result<Self, String> {
        if target_records_per_batch == 0 || target_records_per_batch > BATCH_SIZE {
            return Err(format!(
                "target records per batch {} outside 1..={}",
                target_records_per_batch, BATCH_SIZE
            ));
        }
        if build_infos.len() != build_batches.len() {
            return Err(format!(
                "build info count {} does not match build batch count {}",
                build_infos.len(),
                build_batches.len()
            ));
        }
        if start_indices.len() != build_infos.len() {
            return Err(format!(
                "start buffer count {} does not match build batch count {}",
                start_indices.len(),
                build_infos.len()
            ));
        }
        for (i, (info, batch)) in build_infos.iter().zip(build_batches).enumerate() {
            if info.record_count() != batch.len() {
                return Err(format!(
                    "build batch {} has {} rows but its info claims {}",
                    i,
                    batch.len(),
                    info.record_count()
                ));
            }
        }

        let project_unmatched_probe = join_type.projects_unmatched_probe();
        let project_unmatched_build = join_type.projects_unmatched_build();

        let output_schema = output_schema(
            &probe_schema,
            &build_schema,
            &probe_output_columns,
            &build_output_columns,
            project_unmatched_probe,
            project_unmatched_build,
        )?;

        let build_types = build_output_columns
            .iter()
            .map(|&col| {
                build_schema
                    .fields()
                    .get(col)
                    .map(|f| f.data_type().clone())
                    .ok_or_else(|| format!("build output column {} out of bounds", col))
            })
            .collect::<Result<Vec<_>, String>>()?;
        let build_copiers = build_copiers(
            build_batches,
            &build_output_columns,
            &build_types,
            project_unmatched_probe,
        )?;

        let probe_sv2 = IndexBuffer::try_new(target_records_per_batch * 2, &mem_tracker)?;
        let build_offsets = IndexBuffer::try_new(
            target_records_per_batch * BUILD_RECORD_LINK_SIZE,
            &mem_tracker,
        )?;

        let probe_find_timer = Arc::new(Counter::new("ProbeFindTimeNs", CounterUnit::TimeNs));
        let probe_copy_timer = Arc::new(Counter::new("ProbeCopyTimeNs", CounterUnit::TimeNs));
        let build_copy_timer = Arc::new(Counter::new("BuildCopyTimeNs", CounterUnit::TimeNs));
        let non_match_timer = Arc::new(Counter::new(
            "BuildNonMatchProjectTimeNs",
            CounterUnit::TimeNs,
        ));

        Ok(Self {
            mem_tracker,
            build_infos,
            starts: StartIndices::new(start_indices)?,
            table,
            null_comparator,
            join_type,
            project_unmatched_probe,
            project_unmatched_build,
            target_records_per_batch,
            probe_schema,
            probe_output_columns,
            output_schema,
            build_copiers,
            probe: None,
            probe_copiers: Vec::new(),
            probe_sv2: Some(probe_sv2),
            build_offsets: Some(build_offsets),
            probed: None,
            next_probe_index: 0,
            remainder_build_composite: NO_MATCH,
            remainder_build_set_index: -1,
            remainder_build_element_index: -1,
            output: None,
            output_rows: 0,
            closed: false,
            probe_find_timer,
            probe_copy_timer,
            build_copy_timer,
            non_match_timer,
        })
    }

    pub fn join_type(&self) -> JoinType {
        self.join_type
    }

    pub fn output_schema(&self) -> SchemaRef {
        Arc::clone(&self.output_schema)
    }

    pub fn output_rows(&self) -> u64 {
        self.output_rows
    }

    /// True while a bound probe chunk has rows (or a chain) left to process.
    pub fn has_pending_probe(&self) -> bool {
        self.next_probe_index != 0 || self.remainder_build_composite != NO_MATCH
    }

    /// Bind the next probe chunk. Rejected while a previous chunk is suspended.
    pub fn bind_probe(&mut self, chunk: Chunk) -> Result<(), String> {
        self.ensure_open()?;
        if self.has_pending_probe() {
            return Err("probe chunk replaced while a previous chunk is suspended".to_string());
        }
        if chunk.len() > BATCH_SIZE {
            return Err(format!(
                "probe chunk has {} rows, limit is {}",
                chunk.len(),
                BATCH_SIZE
            ));
        }
        if chunk.schema().as_ref() != self.probe_schema.as_ref() {
            return Err("probe chunk schema does not match the configured probe side".to_string());
        }
        self.probe_copiers = probe_copiers(&chunk, &self.probe_output_columns)?;
        self.probe = Some(chunk);
        Ok(())
    }

    /// Probe with the bound chunk. Returns the emitted row count, negated when
    /// the output chunk filled before the probe chunk was exhausted; the caller
    /// must then call again with the same `records` to resume.
    pub fn probe_batch(&mut self, records: usize) -> Result<i32, String> {
        self.ensure_open()?;
        if records > BATCH_SIZE {
            return Err(format!(
                "probe batch of {} rows exceeds the {} row limit",
                records, BATCH_SIZE
            ));
        }
        let bound = self
            .probe
            .as_ref()
            .ok_or_else(|| "probe_batch called with no probe chunk bound".to_string())?
            .len();
        if bound != records {
            return Err(format!(
                "probe_batch called with {} rows but the bound chunk has {}",
                records, bound
            ));
        }

        // A fresh batch starts with a full lookup; a suspension that parked the
        // cursor at row zero reruns it, which is redundant but harmless.
        if self.next_probe_index == 0 {
            self.find_matches(records)?;
        }

        let target = self.target_records_per_batch;
        let project_unmatched_probe = self.project_unmatched_probe;
        let project_unmatched_build = self.project_unmatched_build;

        let mut output_records = 0usize;
        let mut current_probe_index = self.next_probe_index;
        let mut current_composite = self.remainder_build_composite;

        {
            let _timer = ScopedTimer::new(Arc::clone(&self.probe_find_timer));
            let probed = &self
                .probed
                .as_ref()
                .ok_or_else(|| "probe lookup buffer missing".to_string())?
                .slots;
            let starts = &self.starts;
            let build_infos = &mut self.build_infos;
            let build_count = build_infos.len();
            let sv2 = self
                .probe_sv2
                .as_mut()
                .ok_or_else(|| "probe selection buffer missing".to_string())?
                .bytes_mut();
            let offsets = self
                .build_offsets
                .as_mut()
                .ok_or_else(|| "build offset buffer missing".to_string())?
                .bytes_mut();

            while output_records < target && current_probe_index < records {
                if current_composite == NO_MATCH {
                    // Done with the previous probe row; fetch the next slot id.
                    let slot = probed[current_probe_index];
                    if slot == NOT_FOUND {
                        if project_unmatched_probe {
                            write_sv2(sv2, output_records, current_probe_index as u16);
                            write_cell(offsets, output_records, SKIP);
                            output_records += 1;
                        }
                        current_probe_index += 1;
                        continue;
                    }
                    current_composite = starts.first_in_chain(slot)?;
                }

                let batch = composite_batch(current_composite);
                let row = composite_row(current_composite);
                let info = build_infos.get_mut(batch).ok_or_else(|| {
                    format!("chain reached build batch {} (have {})", batch, build_count)
                })?;

                // The bit must be set before the row is written out so the
                // terminal phase never re-emits a paired build row.
                if project_unmatched_build {
                    info.key_matches_mut().set(row)?;
                }
                write_sv2(sv2, output_records, current_probe_index as u16);
                write_cell(offsets, output_records, current_composite);
                output_records += 1;

                current_composite = info.next_in_chain(row)?;
                if current_composite == NO_MATCH {
                    current_probe_index += 1;
                }
            }
        }

        // A failed copy discards the batch assembled by this call.
        self.output = None;
        let probe_arrays = self.project_probe(output_records)?;
        let build_arrays = self.project_build(output_records)?;
        self.publish(probe_arrays, build_arrays, output_records)?;

        if output_records == target && current_probe_index < records {
            // Output chunk full with probe rows remaining: save the position,
            // including the next chain entry to emit on resume.
            self.next_probe_index = current_probe_index;
            self.remainder_build_composite = current_composite;
            return Ok(-(output_records as i32));
        }

        self.next_probe_index = 0;
        self.remainder_build_composite = NO_MATCH;
        self.probe = None;
        self.probe_copiers = Vec::new();
        Ok(output_records as i32)
    }

    /// Project build rows that never matched. Only legal for RIGHT/FULL joins,
    /// after the probe side is exhausted. Returns the emitted row count,
    /// negated while unscanned bitmap positions remain.
    pub fn project_build_non_matches(&mut self) -> Result<i32, String> {
        self.ensure_open()?;
        if !self.project_unmatched_build {
            return Err(format!(
                "unmatched-build projection is not defined for {:?} joins",
                self.join_type
            ));
        }

        let target = self.target_records_per_batch;
        let mut output_records = 0usize;
        let mut set_index = self.remainder_build_set_index;
        let mut next_clear = self.remainder_build_element_index;

        {
            let _timer = ScopedTimer::new(Arc::clone(&self.non_match_timer));
            let offsets = self
                .build_offsets
                .as_mut()
                .ok_or_else(|| "build offset buffer missing".to_string())?
                .bytes_mut();

            while output_records < target {
                if next_clear == -1 {
                    // Current bitmap exhausted; move to the next one.
                    set_index += 1;
                    if (set_index as usize) < self.build_infos.len() {
                        next_clear = 0;
                    } else {
                        set_index = -1;
                        break;
                    }
                }
                let info = &self.build_infos[set_index as usize];
                let pos = info.key_matches().next_clear_bit(next_clear as usize);
                if pos >= info.record_count() {
                    next_clear = -1;
                    continue;
                }
                write_cell(
                    offsets,
                    output_records,
                    composite_id(set_index as u32, pos as u16),
                );
                output_records += 1;
                next_clear = (pos + 1) as i64;
            }
        }

        self.output = None;
        let probe_arrays = self.allocate_probe_nulls(output_records);
        let build_arrays = self.project_build(output_records)?;
        self.publish(probe_arrays, build_arrays, output_records)?;

        self.remainder_build_set_index = set_index;
        self.remainder_build_element_index = next_clear;
        if next_clear == -1 {
            Ok(output_records as i32)
        } else {
            Ok(-(output_records as i32))
        }
    }

    /// Take the output chunk assembled by the last probe or non-match call.
    pub fn take_output(&mut self) -> Option<Chunk> {
        self.output.take()
    }

    /// Release the engine-owned buffers. A second call is a no-op.
    pub fn close(&mut self) -> Result<(), String> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.probe_sv2 = None;
        self.build_offsets = None;
        self.probed = None;
        self.probe = None;
        self.probe_copiers = Vec::new();
        self.output = None;
        Ok(())
    }

    pub fn probe_find_nanos(&self) -> i64 {
        self.probe_find_timer.value()
    }

    pub fn probe_copy_nanos(&self) -> i64 {
        self.probe_copy_timer.value()
    }

    pub fn build_copy_nanos(&self) -> i64 {
        self.build_copy_timer.value()
    }

    pub fn non_match_projection_nanos(&self) -> i64 {
        self.non_match_timer.value()
    }

    fn ensure_open(&self) -> Result<(), String> {
        if self.closed {
            return Err("probe engine already closed".to_string());
        }
        Ok(())
    }

    /// Resolve every probe row of the bound chunk to a hash-slot id.
    fn find_matches(&mut self, records: usize) -> Result<(), String> {
        let needs_grow = match self.probed.as_ref() {
            Some(p) => p.slots.len() < records,
            None => true,
        };
        if needs_grow {
            // Release the old accounting before the larger request is checked.
            self.probed = None;
            let tracked = TrackedBytes::try_new(records * 4, Arc::clone(&self.mem_tracker))?;
            self.probed = Some(ProbedSlots {
                slots: vec![NOT_FOUND; records],
                _tracked: tracked,
            });
        }
        let probe = self
            .probe
            .as_ref()
            .ok_or_else(|| "find called with no probe chunk bound".to_string())?;
        let probed = self.probed.as_mut().expect("probed buffer allocated");
        self.table
            .find(probe, &self.null_comparator, &mut probed.slots[..records])
    }

    fn project_probe(&self, records: usize) -> Result<Vec<ArrayRef>, String> {
        let _timer = ScopedTimer::new(Arc::clone(&self.probe_copy_timer));
        let sv2 = self
            .probe_sv2
            .as_ref()
            .ok_or_else(|| "probe selection buffer missing".to_string())?
            .bytes();
        self.probe_copiers
            .iter()
            .map(|c| c.copy(sv2, records))
            .collect()
    }

    /// Null probe-side columns for the non-match phase, where no probe row is
    /// projected. Shaped from the configured schema so this works before any
    /// probe chunk was ever bound.
    fn allocate_probe_nulls(&self, records: usize) -> Vec<ArrayRef> {
        self.probe_output_columns
            .iter()
            .map(|&col| new_null_array(self.probe_schema.field(col).data_type(), records))
            .collect()
    }

    fn project_build(&self, records: usize) -> Result<Vec<ArrayRef>, String> {
        let _timer = ScopedTimer::new(Arc::clone(&self.build_copy_timer));
        let offsets = self
            .build_offsets
            .as_ref()
            .ok_or_else(|| "build offset buffer missing".to_string())?
            .bytes();
        self.build_copiers
            .iter()
            .map(|c| c.copy(offsets, records))
            .collect()
    }

    fn publish(
        &mut self,
        probe_arrays: Vec<ArrayRef>,
        build_arrays: Vec<ArrayRef>,
        records: usize,
    ) -> Result<(), String> {
        let mut columns = probe_arrays;
        columns.extend(build_arrays);
        let options = RecordBatchOptions::new().with_row_count(Some(records));
        let batch =
            RecordBatch::try_new_with_options(Arc::clone(&self.output_schema), columns, &options)
                .map_err(|e| format!("output chunk assembly failed: {e}"))?;
        self.output_rows = self.output_rows.saturating_add(records as u64);
        self.output = Some(Chunk::new(batch));
        Ok(())
    }
}

fn output_schema(
    probe_schema: &SchemaRef,
    build_schema: &SchemaRef,
    probe_output_columns: &[usize],
    build_output_columns: &[usize],
    project_unmatched_probe: bool,
    project_unmatched_build: bool,
) -> Result<SchemaRef, String> {
    let mut fields = Vec::with_capacity(probe_output_columns.len() + build_output_columns.len());
    for &col in probe_output_columns {
        let field = probe_schema
            .fields()
            .get(col)
            .ok_or_else(|| format!("probe output column {} out of bounds", col))?
            .as_ref()
            .clone();
        // The non-match phase emits all-null probe cells.
        fields.push(if project_unmatched_build {
            field.with_nullable(true)
        } else {
            field
        });
    }
    for &col in build_output_columns {
        let field = build_schema
            .fields()
            .get(col)
            .ok_or_else(|| format!("build output column {} out of bounds", col))?
            .as_ref()
            .clone();
        // Unmatched probe rows emit all-null build cells.
        fields.push(if project_unmatched_probe {
            field.with_nullable(true)
        } else {
            field
        });
    }
    Ok(Arc::new(Schema::new(fields)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field};

    struct EmptyTable;

    impl JoinTable for EmptyTable {
        fn size(&self) -> usize {
            0
        }

        fn find(
            &self,
            probe: &Chunk,
            _null_comparator: &NullComparator,
            out: &mut [i32],
        ) -> Result<(), String> {
            if out.len() != probe.len() {
                return Err("lookup buffer size mismatch".to_string());
            }
            out.fill(NOT_FOUND);
            Ok(())
        }
    }

    fn probe_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("k", DataType::Int64, true)]))
    }

    fn build_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, true)]))
    }

    fn empty_build_engine(join_type: JoinType, target: usize) -> VectorizedProbe {
        VectorizedProbe::new(
            MemTracker::new_root("test"),
            &[],
            build_schema(),
            probe_schema(),
            vec![0],
            vec![0],
            join_type,
            Vec::new(),
            Vec::new(),
            Box::new(EmptyTable),
            target,
            NullComparator::default(),
        )
        .expect("engine")
    }

    fn probe_chunk(keys: Vec<i64>) -> Chunk {
        let batch =
            RecordBatch::try_new(probe_schema(), vec![Arc::new(Int64Array::from(keys))]).unwrap();
        Chunk::new(batch)
    }

    #[test]
    fn rejects_oversized_probe_batch() {
        let mut engine = empty_build_engine(JoinType::Inner, 16);
        let err = engine.probe_batch(BATCH_SIZE + 1).expect_err("too big");
        assert!(err.contains("row limit"), "err={}", err);
    }

    #[test]
    fn rejects_probe_without_bound_chunk() {
        let mut engine = empty_build_engine(JoinType::Inner, 16);
        let err = engine.probe_batch(4).expect_err("no chunk");
        assert!(err.contains("no probe chunk bound"), "err={}", err);
    }

    #[test]
    fn rejects_record_count_mismatch() {
        let mut engine = empty_build_engine(JoinType::Inner, 16);
        engine.bind_probe(probe_chunk(vec![1, 2, 3])).unwrap();
        let err = engine.probe_batch(2).expect_err("mismatch");
        assert!(err.contains("bound chunk has 3"), "err={}", err);
    }

    #[test]
    fn non_match_projection_requires_outer_build_semantics() {
        let mut engine = empty_build_engine(JoinType::Inner, 16);
        let err = engine.project_build_non_matches().expect_err("inner");
        assert!(err.contains("not defined"), "err={}", err);
    }

    #[test]
    fn close_is_idempotent_and_fences_calls() {
        let mut engine = empty_build_engine(JoinType::LeftOuter, 16);
        let tracker = Arc::clone(&engine.mem_tracker);
        assert!(tracker.current() > 0);
        engine.close().unwrap();
        assert_eq!(tracker.current(), 0);
        engine.close().unwrap();
        let err = engine.probe_batch(1).expect_err("closed");
        assert!(err.contains("closed"), "err={}", err);
    }

    #[test]
    fn rejects_construction_with_zero_target() {
        let err = VectorizedProbe::new(
            MemTracker::new_root("test"),
            &[],
            build_schema(),
            probe_schema(),
            vec![0],
            vec![0],
            JoinType::Inner,
            Vec::new(),
            Vec::new(),
            Box::new(EmptyTable),
            0,
            NullComparator::default(),
        )
        .expect_err("zero target");
        assert!(err.contains("target records"), "err={}", err);
    }

    #[test]
    fn scratch_allocation_respects_tracker_limit() {
        let tracker = MemTracker::new_root_with_limit("test", 64);
        let err = VectorizedProbe::new(
            tracker,
            &[],
            build_schema(),
            probe_schema(),
            vec![0],
            vec![0],
            JoinType::Inner,
            Vec::new(),
            Vec::new(),
            Box::new(EmptyTable),
            4096,
            NullComparator::default(),
        )
        .expect_err("over limit");
        assert!(err.contains("memory limit exceeded"), "err={}", err);
    }
}
