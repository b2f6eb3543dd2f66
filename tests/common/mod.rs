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
//! Common fixtures for probe engine integration tests: a chained build side
//! constructed from key vectors, plus driver loops and row extraction.
#![allow(dead_code)]

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use arrow_buffer::Buffer;
use hashbrown::HashMap;

use novajoin::exec::chunk::Chunk;
use novajoin::exec::operators::hashjoin::{
    BATCH_SIZE, BUILD_RECORD_LINK_SIZE, BuildInfo, JoinTable, JoinType, NOT_FOUND, NullComparator,
    VectorizedProbe,
};
use novajoin::runtime::mem_tracker::MemTracker;

pub fn probe_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("k", DataType::Int64, true),
        Field::new("p", DataType::Utf8, true),
    ]))
}

pub fn build_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("k", DataType::Int64, true),
        Field::new("v", DataType::Utf8, true),
    ]))
}

/// Probe chunk with the given keys and row labels "p0", "p1", ...
pub fn probe_chunk(keys: &[Option<i64>]) -> Chunk {
    let labels: Vec<String> = (0..keys.len()).map(|i| format!("p{i}")).collect();
    let batch = RecordBatch::try_new(
        probe_schema(),
        vec![
            Arc::new(Int64Array::from(keys.to_vec())),
            Arc::new(StringArray::from_iter_values(labels)),
        ],
    )
    .expect("probe batch");
    Chunk::new(batch)
}

/// Label a build row uniquely so outputs identify the exact source row.
pub fn build_label(batch: usize, row: usize) -> String {
    format!("b{batch}_{row}")
}

fn encode_cell(buf: &mut [u8], slot: usize, batch_idx: u32, row_idx: u16) {
    let at = slot * BUILD_RECORD_LINK_SIZE;
    buf[at..at + 4].copy_from_slice(&(batch_idx as i32).to_le_bytes());
    buf[at + 4..at + 6].copy_from_slice(&row_idx.to_le_bytes());
}

/// Hash table over fixture build keys: one slot per distinct key.
pub struct FixtureJoinTable {
    slots: HashMap<i64, i32>,
    size: usize,
}

impl JoinTable for FixtureJoinTable {
    fn size(&self) -> usize {
        self.size
    }

    fn find(
        &self,
        probe: &Chunk,
        _null_comparator: &NullComparator,
        out: &mut [i32],
    ) -> Result<(), String> {
        if out.len() != probe.len() {
            return Err(format!(
                "lookup buffer sized {} for {} probe rows",
                out.len(),
                probe.len()
            ));
        }
        let keys = probe
            .column(0)?
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| "probe key column is not Int64".to_string())?
            .clone();
        for (row, slot) in out.iter_mut().enumerate() {
            *slot = if keys.is_null(row) {
                NOT_FOUND
            } else {
                self.slots
                    .get(&keys.value(row))
                    .copied()
                    .unwrap_or(NOT_FOUND)
            };
        }
        Ok(())
    }
}

/// Build side assembled from per-batch key vectors. `None` keys are rows the
/// table never indexes (null join keys).
pub struct FixtureBuildSide {
    pub batches: Vec<Chunk>,
    pub infos: Vec<BuildInfo>,
    pub starts: Vec<Buffer>,
    pub table: FixtureJoinTable,
}

pub fn build_side(key_batches: &[Vec<Option<i64>>]) -> FixtureBuildSide {
    let cells = BATCH_SIZE * BUILD_RECORD_LINK_SIZE;
    let mut links: Vec<Vec<u8>> = key_batches.iter().map(|_| vec![0xFF; cells]).collect();
    let mut starts: Vec<Vec<u8>> = key_batches.iter().map(|_| vec![0xFF; cells]).collect();

    let mut slots: HashMap<i64, i32> = HashMap::new();
    let mut tails: HashMap<i64, (u32, u16)> = HashMap::new();
    let mut next_slot: u32 = 0;
    let mut size = 0usize;

    for (batch_idx, keys) in key_batches.iter().enumerate() {
        assert!(keys.len() <= BATCH_SIZE, "fixture batch too large");
        for (row_idx, key) in keys.iter().enumerate() {
            let Some(key) = key else {
                continue;
            };
            size += 1;
            match tails.get(key).copied() {
                None => {
                    // First row of this key: anchor the chain in starts.
                    let buffer_idx = (next_slot as usize) / BATCH_SIZE;
                    let offset = (next_slot as usize) % BATCH_SIZE;
                    assert!(
                        buffer_idx < starts.len(),
                        "fixture ran out of start buffers"
                    );
                    encode_cell(
                        &mut starts[buffer_idx],
                        offset,
                        batch_idx as u32,
                        row_idx as u16,
                    );
                    slots.insert(*key, ((buffer_idx as u32) << 16 | offset as u32) as i32);
                    next_slot += 1;
                }
                Some((tail_batch, tail_row)) => {
                    // Same key again: append at the chain tail.
                    encode_cell(
                        &mut links[tail_batch as usize],
                        tail_row as usize,
                        batch_idx as u32,
                        row_idx as u16,
                    );
                }
            }
            tails.insert(*key, (batch_idx as u32, row_idx as u16));
        }
    }

    let batches = key_batches
        .iter()
        .enumerate()
        .map(|(batch_idx, keys)| {
            let labels: Vec<String> = (0..keys.len())
                .map(|row| build_label(batch_idx, row))
                .collect();
            let batch = RecordBatch::try_new(
                build_schema(),
                vec![
                    Arc::new(Int64Array::from(keys.to_vec())),
                    Arc::new(StringArray::from_iter_values(labels)),
                ],
            )
            .expect("build batch");
            Chunk::new(batch)
        })
        .collect();

    let infos = links
        .into_iter()
        .zip(key_batches)
        .map(|(buf, keys)| BuildInfo::new(Buffer::from(buf), keys.len()).expect("build info"))
        .collect();

    FixtureBuildSide {
        batches,
        infos,
        starts: starts.into_iter().map(Buffer::from).collect(),
        table: FixtureJoinTable { slots, size },
    }
}

/// Engine over a fixture build side, projecting all probe and build columns.
pub fn engine_for(
    key_batches: &[Vec<Option<i64>>],
    join_type: JoinType,
    target_records_per_batch: usize,
) -> VectorizedProbe {
    let fixture = build_side(key_batches);
    VectorizedProbe::new(
        MemTracker::new_root("probe-test"),
        &fixture.batches,
        build_schema(),
        probe_schema(),
        vec![0, 1],
        vec![0, 1],
        join_type,
        fixture.infos,
        fixture.starts,
        Box::new(fixture.table),
        target_records_per_batch,
        NullComparator::default(),
    )
    .expect("engine")
}

/// Bind one probe chunk and call `probe_batch` until it reports completion,
/// collecting the emitted chunks and the raw signed returns.
pub fn drive_probe(engine: &mut VectorizedProbe, chunk: Chunk) -> (Vec<Chunk>, Vec<i32>) {
    let records = chunk.len();
    engine.bind_probe(chunk).expect("bind probe");
    let mut outputs = Vec::new();
    let mut returns = Vec::new();
    loop {
        let ret = engine.probe_batch(records).expect("probe batch");
        returns.push(ret);
        if let Some(out) = engine.take_output() {
            if !out.is_empty() {
                outputs.push(out);
            }
        }
        if ret >= 0 {
            break;
        }
    }
    (outputs, returns)
}

/// Call the unmatched-build projection until it reports completion.
pub fn drive_non_matches(engine: &mut VectorizedProbe) -> (Vec<Chunk>, Vec<i32>) {
    let mut outputs = Vec::new();
    let mut returns = Vec::new();
    loop {
        let ret = engine.project_build_non_matches().expect("non matches");
        returns.push(ret);
        if let Some(out) = engine.take_output() {
            if !out.is_empty() {
                outputs.push(out);
            }
        }
        if ret >= 0 {
            break;
        }
    }
    (outputs, returns)
}

/// Full driver protocol: every probe chunk, then the terminal phase when the
/// join projects unmatched build rows.
pub fn run_join(engine: &mut VectorizedProbe, probe_chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut outputs = Vec::new();
    for chunk in probe_chunks {
        let (chunks, _) = drive_probe(engine, chunk);
        outputs.extend(chunks);
    }
    if engine.join_type().projects_unmatched_build() {
        let (chunks, _) = drive_non_matches(engine);
        outputs.extend(chunks);
    }
    outputs
}

/// One output row of the fixture schema [probe k, probe p, build k, build v].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutRow {
    pub probe_k: Option<i64>,
    pub probe_p: Option<String>,
    pub build_k: Option<i64>,
    pub build_v: Option<String>,
}

pub fn collect_rows(chunks: &[Chunk]) -> Vec<OutRow> {
    let mut rows = Vec::new();
    for chunk in chunks {
        let probe_k = int64_column(chunk.columns(), 0);
        let probe_p = string_column(chunk.columns(), 1);
        let build_k = int64_column(chunk.columns(), 2);
        let build_v = string_column(chunk.columns(), 3);
        for row in 0..chunk.len() {
            rows.push(OutRow {
                probe_k: value_at(&probe_k, row),
                probe_p: str_at(&probe_p, row),
                build_k: value_at(&build_k, row),
                build_v: str_at(&build_v, row),
            });
        }
    }
    rows
}

fn int64_column(columns: &[ArrayRef], index: usize) -> Int64Array {
    columns[index]
        .as_any()
        .downcast_ref::<Int64Array>()
        .expect("int64 column")
        .clone()
}

fn string_column(columns: &[ArrayRef], index: usize) -> StringArray {
    columns[index]
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("string column")
        .clone()
}

fn value_at(array: &Int64Array, row: usize) -> Option<i64> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row))
    }
}

fn str_at(array: &StringArray, row: usize) -> Option<String> {
    if array.is_null(row) {
        None
    } else {
        Some(array.value(row).to_string())
    }
}
