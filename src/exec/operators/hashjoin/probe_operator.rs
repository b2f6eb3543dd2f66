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
//! Hash-join probe processor.
//!
//! Responsibilities:
//! - Drives the vectorized probe engine from pipeline push/pull calls,
//!   resuming suspended probe chunks across pulls and buffering input while
//!   the engine is busy.
//! - Runs the unmatched-build projection phase once the probe side finishes.
//!
//! Key exported interfaces:
//! - Types: `HashJoinProbeOperatorFactory`.
//!
//! Current limitations:
//! - One probe driver per engine; the factory hands its engine to the first
//!   driver and later drivers fail at prepare.
//! - Unsupported states should be surfaced as explicit runtime errors instead
//!   of fallback behavior.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::join_type_str;
use super::vectorized_probe::VectorizedProbe;
use crate::common::config::operator_buffer_chunks;
use crate::exec::chunk::Chunk;
use crate::exec::pipeline::operator::{Operator, ProcessorOperator};
use crate::exec::pipeline::operator_factory::OperatorFactory;
use crate::novajoin_logging::debug;
use crate::runtime::mem_tracker::MemTracker;
use crate::runtime::profile::{CounterUnit, OperatorProfiles};
use crate::runtime::runtime_state::RuntimeState;

/// Factory for the hash-join probe operator over a prebuilt probe engine.
pub struct HashJoinProbeOperatorFactory {
    name: String,
    node_id: i32,
    engine: Mutex<Option<VectorizedProbe>>,
}

impl HashJoinProbeOperatorFactory {
    pub fn new(node_id: i32, engine: VectorizedProbe) -> Self {
        Self {
            name: format!("HASH_JOIN_PROBE (id={})", node_id),
            node_id,
            engine: Mutex::new(Some(engine)),
        }
    }
}

impl OperatorFactory for HashJoinProbeOperatorFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, _dop: i32, driver_id: i32) -> Box<dyn Operator> {
        let engine = self
            .engine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(engine) = engine.as_ref() {
            debug!(
                "HashJoinProbe create: node_id={} driver_id={} join_type={}",
                self.node_id,
                driver_id,
                join_type_str(engine.join_type())
            );
        }
        Box::new(HashJoinProbeOperator {
            name: self.name.clone(),
            node_id: self.node_id,
            driver_id,
            engine,
            max_buffered_probe_chunks: operator_buffer_chunks().max(1),
            buffered: VecDeque::new(),
            pending_output: None,
            probe_records: 0,
            mid_batch: false,
            finishing: false,
            finishing_done: false,
            finished: false,
            input_rows: 0,
            input_chunks: 0,
            mem_tracker: None,
            profiles: None,
            profile_initialized: false,
        })
    }
}

pub struct HashJoinProbeOperator {
    name: String,
    node_id: i32,
    driver_id: i32,
    engine: Option<VectorizedProbe>,
    max_buffered_probe_chunks: usize,
    /// Probe chunks accepted while the engine is mid-batch or output is pending.
    buffered: VecDeque<Chunk>,
    pending_output: Option<Chunk>,
    /// Row count of the bound probe chunk, carried across suspended calls.
    probe_records: usize,
    mid_batch: bool,
    finishing: bool,
    finishing_done: bool,
    finished: bool,
    input_rows: u64,
    input_chunks: u64,
    mem_tracker: Option<Arc<MemTracker>>,
    profiles: Option<OperatorProfiles>,
    profile_initialized: bool,
}

impl Operator for HashJoinProbeOperator {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_mem_tracker(&mut self, tracker: Arc<MemTracker>) {
        self.mem_tracker = Some(tracker);
    }

    fn set_profiles(&mut self, profiles: OperatorProfiles) {
        self.profiles = Some(profiles);
    }

    fn prepare(&mut self) -> Result<(), String> {
        if self.engine.is_none() {
            return Err("hash join probe engine already claimed by another driver".to_string());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), String> {
        if let Some(engine) = self.engine.as_mut() {
            engine.close()?;
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn as_processor_mut(&mut self) -> Option<&mut dyn ProcessorOperator> {
        Some(self)
    }

    fn as_processor_ref(&self) -> Option<&dyn ProcessorOperator> {
        Some(self)
    }
}

impl ProcessorOperator for HashJoinProbeOperator {
    fn need_input(&self) -> bool {
        !self.finishing
            && !self.finished
            && self.engine.is_some()
            && self.pending_output.is_none()
            && (!self.mid_batch || self.buffered.len() < self.max_buffered_probe_chunks)
    }

    fn has_output(&self) -> bool {
        if self.pending_output.is_some() || self.mid_batch || !self.buffered.is_empty() {
            return true;
        }
        self.finishing && !self.finishing_done
    }

    fn push_chunk(&mut self, _state: &RuntimeState, chunk: Chunk) -> Result<(), String> {
        if self.finished {
            return Ok(());
        }
        self.init_profile_if_needed();
        if self.finishing {
            return Err("hash join probe received input after set_finishing".to_string());
        }
        if chunk.is_empty() {
            return Ok(());
        }
        if self.mid_batch || self.pending_output.is_some() {
            if self.buffered.len() >= self.max_buffered_probe_chunks {
                return Err("hash join probe input buffer is full".to_string());
            }
            self.input_rows = self.input_rows.saturating_add(chunk.len() as u64);
            self.input_chunks = self.input_chunks.saturating_add(1);
            self.buffered.push_back(chunk);
            return Ok(());
        }
        self.input_rows = self.input_rows.saturating_add(chunk.len() as u64);
        self.input_chunks = self.input_chunks.saturating_add(1);
        self.bind_and_step(chunk)
    }

    fn pull_chunk(&mut self, _state: &RuntimeState) -> Result<Option<Chunk>, String> {
        if self.pending_output.is_none() {
            if self.mid_batch {
                self.step_probe()?;
            } else if let Some(chunk) = self.buffered.pop_front() {
                self.bind_and_step(chunk)?;
            } else if self.finishing && !self.finishing_done {
                self.step_non_matches()?;
            }
        }
        let out = self.pending_output.take();
        if self.finishing
            && self.finishing_done
            && !self.mid_batch
            && self.buffered.is_empty()
            && self.pending_output.is_none()
            && out.is_none()
            && !self.finished
        {
            self.finished = true;
            self.log_stats();
        }
        Ok(out)
    }

    fn set_finishing(&mut self, _state: &RuntimeState) -> Result<(), String> {
        if self.finished {
            return Ok(());
        }
        self.init_profile_if_needed();
        self.finishing = true;
        if self.engine.is_none() {
            self.finishing_done = true;
        }
        Ok(())
    }
}

impl HashJoinProbeOperator {
    fn bind_and_step(&mut self, chunk: Chunk) -> Result<(), String> {
        self.probe_records = chunk.len();
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| "hash join probe engine missing".to_string())?;
        engine.bind_probe(chunk)?;
        self.step_probe()
    }

    /// One `probe_batch` call: stash its output chunk and record whether the
    /// probe chunk is still suspended.
    fn step_probe(&mut self) -> Result<(), String> {
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| "hash join probe engine missing".to_string())?;
        let ret = engine.probe_batch(self.probe_records)?;
        self.mid_batch = ret < 0;
        let out = engine.take_output();
        self.stash_output(out);
        Ok(())
    }

    /// One unmatched-build projection call; the phase completes on a
    /// non-negative return. Joins without unmatched-build semantics complete
    /// immediately.
    fn step_non_matches(&mut self) -> Result<(), String> {
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| "hash join probe engine missing".to_string())?;
        if !engine.join_type().projects_unmatched_build() {
            self.finishing_done = true;
            return Ok(());
        }
        let ret = engine.project_build_non_matches()?;
        if ret >= 0 {
            self.finishing_done = true;
        }
        let out = engine.take_output();
        self.stash_output(out);
        Ok(())
    }

    fn stash_output(&mut self, out: Option<Chunk>) {
        let Some(mut out) = out else {
            return;
        };
        if out.is_empty() {
            return;
        }
        if let Some(tracker) = self.mem_tracker.as_ref() {
            out.transfer_to(tracker);
        }
        self.pending_output = Some(out);
    }

    fn init_profile_if_needed(&mut self) {
        if self.profile_initialized {
            return;
        }
        self.profile_initialized = true;
        if let Some(profiles) = self.profiles.as_ref() {
            if let Some(engine) = self.engine.as_ref() {
                profiles
                    .common
                    .add_info_string("JoinType", join_type_str(engine.join_type()));
            }
        }
    }

    fn log_stats(&self) {
        let Some(engine) = self.engine.as_ref() else {
            return;
        };
        if let Some(profiles) = self.profiles.as_ref() {
            profiles.unique.counter_set(
                "ProbeFindTimeNs",
                CounterUnit::TimeNs,
                engine.probe_find_nanos(),
            );
            profiles.unique.counter_set(
                "ProbeCopyTimeNs",
                CounterUnit::TimeNs,
                engine.probe_copy_nanos(),
            );
            profiles.unique.counter_set(
                "BuildCopyTimeNs",
                CounterUnit::TimeNs,
                engine.build_copy_nanos(),
            );
            profiles.unique.counter_set(
                "BuildNonMatchProjectTimeNs",
                CounterUnit::TimeNs,
                engine.non_match_projection_nanos(),
            );
        }
        debug!(
            "HashJoinProbe finished: node_id={} driver_id={} join_type={} input_rows={} input_chunks={} output_rows={} probe_find_ns={} probe_copy_ns={} build_copy_ns={} non_match_ns={}",
            self.node_id,
            self.driver_id,
            join_type_str(engine.join_type()),
            self.input_rows,
            self.input_chunks,
            engine.output_rows(),
            engine.probe_find_nanos(),
            engine.probe_copy_nanos(),
            engine.build_copy_nanos(),
            engine.non_match_projection_nanos()
        );
    }
}
