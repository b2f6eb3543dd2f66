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
//! Build-side reference structures consumed by the probe engine.
//!
//! Responsibilities:
//! - Encodes and decodes composite build-row ids and their 6-byte cell layout.
//! - Wraps the borrowed start-index and link-chain buffers with bounds-checked reads.
//! - Tracks per-build-batch match bits for RIGHT/FULL outer projection.
//!
//! Key exported interfaces:
//! - Types: `BuildInfo`, `MatchBitmap`, `StartIndices`.
//! - Constants: `BATCH_SIZE`, `BATCH_MASK`, `BUILD_RECORD_LINK_SIZE`.

use arrow_buffer::{BooleanBufferBuilder, Buffer};

/// Row capacity of one build batch; also the shift unit of the composite id encoding.
pub const BATCH_SIZE: usize = 65536;

/// Mask selecting the in-batch offset half of a composite build-row id.
pub const BATCH_MASK: u64 = 0xFFFF;

/// Bytes per chain cell: 4-byte batch index followed by 2-byte in-batch offset.
pub const BUILD_RECORD_LINK_SIZE: usize = 6;

pub(crate) const SHIFT_SIZE: u32 = 16;

/// Sentinel composite id: end of chain, or no match in flight.
pub(crate) const NO_MATCH: i64 = -1;

/// Sentinel in an output offset cell: no build row, project nulls instead.
pub const SKIP: i64 = -1;

/// Pack a build batch index and an in-batch offset into a composite id.
#[inline]
pub(crate) fn composite_id(batch_idx: u32, row_idx: u16) -> i64 {
    ((batch_idx as i64) << SHIFT_SIZE) | row_idx as i64
}

#[inline]
pub(crate) fn composite_batch(id: i64) -> usize {
    (id as u64 >> SHIFT_SIZE) as usize
}

#[inline]
pub(crate) fn composite_row(id: i64) -> usize {
    (id as u64 & BATCH_MASK) as usize
}

/// Decode the 6-byte cell at `slot`. An all-ones batch half is the chain-end sentinel.
#[inline]
pub(crate) fn read_cell(buf: &[u8], slot: usize) -> Result<i64, String> {
    let at = slot * BUILD_RECORD_LINK_SIZE;
    let cell = buf
        .get(at..at + BUILD_RECORD_LINK_SIZE)
        .ok_or_else(|| format!("chain cell {} out of bounds (len={})", slot, buf.len()))?;
    let batch = i32::from_le_bytes([cell[0], cell[1], cell[2], cell[3]]);
    if batch == -1 {
        return Ok(NO_MATCH);
    }
    let row = u16::from_le_bytes([cell[4], cell[5]]);
    Ok(composite_id(batch as u32, row))
}

/// Encode a composite id (or the sentinel) into the 6-byte cell at `slot`.
#[inline]
pub(crate) fn write_cell(buf: &mut [u8], slot: usize, id: i64) {
    let at = slot * BUILD_RECORD_LINK_SIZE;
    if id == NO_MATCH {
        buf[at..at + BUILD_RECORD_LINK_SIZE].copy_from_slice(&[0xFF; BUILD_RECORD_LINK_SIZE]);
        return;
    }
    let batch = composite_batch(id) as i32;
    let row = composite_row(id) as u16;
    buf[at..at + 4].copy_from_slice(&batch.to_le_bytes());
    buf[at + 4..at + 6].copy_from_slice(&row.to_le_bytes());
}

/// Ordered start-index buffers, one per build batch, each holding the first
/// composite id of the chain anchored at every hash slot of that batch.
pub struct StartIndices {
    buffers: Vec<Buffer>,
}

impl StartIndices {
    pub fn new(buffers: Vec<Buffer>) -> Result<Self, String> {
        for (i, buf) in buffers.iter().enumerate() {
            if buf.len() != BATCH_SIZE * BUILD_RECORD_LINK_SIZE {
                return Err(format!(
                    "start buffer {} has {} bytes, expected {}",
                    i,
                    buf.len(),
                    BATCH_SIZE * BUILD_RECORD_LINK_SIZE
                ));
            }
        }
        Ok(Self { buffers })
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Resolve a hash-slot id to the first composite id of its chain. The high
    /// half of the slot id selects the buffer, the low half the slot within it.
    #[inline]
    pub(crate) fn first_in_chain(&self, slot_id: i32) -> Result<i64, String> {
        let buffer_idx = (slot_id as u32 >> SHIFT_SIZE) as usize;
        let slot = (slot_id as u32 & BATCH_MASK as u32) as usize;
        let buf = self.buffers.get(buffer_idx).ok_or_else(|| {
            format!(
                "hash slot id {:#x} references start buffer {} (have {})",
                slot_id,
                buffer_idx,
                self.buffers.len()
            )
        })?;
        let first = read_cell(buf.as_slice(), slot)?;
        if first == NO_MATCH {
            return Err(format!(
                "hash slot {:#x} resolved to an empty chain anchor",
                slot_id
            ));
        }
        Ok(first)
    }
}

/// One bit per populated build row, set the first time that row pairs with a
/// probe row. Mutated during probing, scanned by the unmatched-build phase.
pub struct MatchBitmap {
    bits: BooleanBufferBuilder,
}

impl MatchBitmap {
    pub fn new(len: usize) -> Self {
        let mut bits = BooleanBufferBuilder::new(len);
        bits.append_n(len, false);
        Self { bits }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    #[inline]
    pub(crate) fn set(&mut self, index: usize) -> Result<(), String> {
        if index >= self.bits.len() {
            return Err(format!(
                "match bit {} out of bounds (len={})",
                index,
                self.bits.len()
            ));
        }
        self.bits.set_bit(index, true);
        Ok(())
    }

    pub fn get(&self, index: usize) -> bool {
        index < self.bits.len() && self.bits.get_bit(index)
    }

    /// First clear bit at or after `from`. Positions past the logical length
    /// count as clear, so the caller bounds the result against the populated
    /// record count.
    pub(crate) fn next_clear_bit(&self, from: usize) -> usize {
        let len = self.bits.len();
        if from >= len {
            return from;
        }
        let bytes = self.bits.as_slice();
        let mut byte_idx = from / 8;
        let mut bit_idx = from % 8;
        while byte_idx < bytes.len() {
            let b = bytes[byte_idx];
            if b != 0xFF {
                for bit in bit_idx..8 {
                    if b & (1u8 << bit) == 0 {
                        return byte_idx * 8 + bit;
                    }
                }
            }
            byte_idx += 1;
            bit_idx = 0;
        }
        len.max(from)
    }
}

/// Per-build-batch probe inputs: the link chain, the match bitmap, and the
/// populated record count bounding both.
pub struct BuildInfo {
    links: Buffer,
    key_matches: MatchBitmap,
    record_count: usize,
}

impl BuildInfo {
    pub fn new(links: Buffer, record_count: usize) -> Result<Self, String> {
        if record_count > BATCH_SIZE {
            return Err(format!(
                "build batch record count {} exceeds capacity {}",
                record_count, BATCH_SIZE
            ));
        }
        if links.len() != BATCH_SIZE * BUILD_RECORD_LINK_SIZE {
            return Err(format!(
                "links buffer has {} bytes, expected {}",
                links.len(),
                BATCH_SIZE * BUILD_RECORD_LINK_SIZE
            ));
        }
        Ok(Self {
            links,
            key_matches: MatchBitmap::new(record_count),
            record_count,
        })
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    #[inline]
    pub(crate) fn next_in_chain(&self, row: usize) -> Result<i64, String> {
        read_cell(self.links.as_slice(), row)
    }

    pub(crate) fn key_matches(&self) -> &MatchBitmap {
        &self.key_matches
    }

    pub(crate) fn key_matches_mut(&mut self) -> &mut MatchBitmap {
        &mut self.key_matches
    }
}
