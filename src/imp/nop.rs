// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Nop backend.
//!
//! Stands in for a native command-list/queue implementation. Recording calls
//! are counted rather than executed, so tests can assert that barriers were
//! flushed and debug groups balanced without a GPU in the loop.

use crate::barrier::ResourceBarrierSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Native allocation behind a [`Resource`](crate::resource::Resource).
///
/// The real backends hand descriptor ranges back to the resource manager
/// here; the nop backend just remembers it was released.
#[derive(Debug)]
pub struct NativeResource {
    name: String,
    released: AtomicBool,
}

impl NativeResource {
    pub fn new(name: &str) -> Self {
        NativeResource {
            name: name.to_string(),
            released: AtomicBool::new(false),
        }
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
        logwise::trace_sync!("nop: released resource {name}", name = self.name.clone());
    }
}

/// Native recorder behind a [`CommandList`](crate::command::CommandList).
#[derive(Debug, Default)]
pub struct NativeCommandList {
    begins: AtomicUsize,
    ends: AtomicUsize,
    barrier_flushes: AtomicUsize,
    barriers_inserted: AtomicUsize,
    debug_group_depth: AtomicUsize,
}

impl NativeCommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        self.begins.fetch_add(1, Ordering::Relaxed);
    }

    pub fn end(&self) {
        self.ends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn insert_barriers(&self, barriers: &ResourceBarrierSet) {
        self.barrier_flushes.fetch_add(1, Ordering::Relaxed);
        self.barriers_inserted
            .fetch_add(barriers.len(), Ordering::Relaxed);
    }

    pub fn push_debug_group(&self, _name: &str) {
        self.debug_group_depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pop_debug_group(&self) {
        self.debug_group_depth.fetch_sub(1, Ordering::Relaxed);
    }

    /// How many times a barrier set was flushed into this recorder.
    pub fn barrier_flush_count(&self) -> usize {
        self.barrier_flushes.load(Ordering::Relaxed)
    }

    /// Total barriers inserted across all flushes.
    pub fn barriers_inserted(&self) -> usize {
        self.barriers_inserted.load(Ordering::Relaxed)
    }

    /// Currently-open native debug groups.
    pub fn debug_group_depth(&self) -> usize {
        self.debug_group_depth.load(Ordering::Relaxed)
    }
}

/// Native submission point behind a [`CommandQueue`](crate::command::CommandQueue).
#[derive(Debug)]
pub struct NativeQueue {
    name: String,
    concurrent_recording: bool,
    submissions: AtomicUsize,
}

impl NativeQueue {
    pub fn new(name: &str, concurrent_recording: bool) -> Self {
        NativeQueue {
            name: name.to_string(),
            concurrent_recording,
            submissions: AtomicUsize::new(0),
        }
    }

    pub fn submit(&self, list_count: usize) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
        let count = list_count as u64;
        logwise::trace_sync!(
            "nop: queue {name} submitted {count} lists",
            name = self.name.clone(),
            count = count
        );
    }

    /// Whether worker command lists may record concurrently on this backend.
    ///
    /// Metal-style backends answer false and the parallel encoder falls back
    /// to sequential iteration.
    pub fn supports_concurrent_recording(&self) -> bool {
        self.concurrent_recording
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::Relaxed)
    }
}
