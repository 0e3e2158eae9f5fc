// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Command lists, sets, queues and the parallel encoder.

Everything here revolves around one lifecycle:

```text
Pending -> Encoding -> Committed -> Executing -> Pending
          (reset)      (commit)    (execute)    (complete)
```

Three thread roles touch a command list: encoding threads record it,
a submission thread executes it, and a completion-tracking thread (driven by
GPU fences outside this crate) completes it. The per-list mutex + condvar in
[`list`] is the handoff point between them. Illegal edges in the lifecycle
are synchronous [`CommandError`]s — caller defects, never retried.
*/

use crate::bindings::BindingsError;
use std::error::Error;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub mod list;
pub mod parallel;
pub mod queue;
pub mod set;

pub use list::{CommandList, CommandListState, CompletionCallback, DebugGroup};
pub use parallel::ParallelCommandList;
pub use queue::CommandQueue;
pub use set::CommandListSet;

/// Identifies which in-flight frame a recording belongs to.
pub type FrameIndex = u32;

/// Errors raised by the command lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command list '{list}' is {current}; cannot {attempted}")]
    InvalidState {
        list: String,
        current: CommandListState,
        attempted: &'static str,
    },
    #[error("command list '{list}' was committed for frame {expected}, got frame {actual}")]
    FrameIndexMismatch {
        list: String,
        expected: FrameIndex,
        actual: FrameIndex,
    },
    #[error("command list '{list}': pop_debug_group with no open debug group")]
    EmptyDebugGroupStack { list: String },
    #[error("command list '{list}' belongs to queue '{actual_queue}', expected '{expected_queue}'")]
    QueueMismatch {
        list: String,
        expected_queue: String,
        actual_queue: String,
    },
    #[error("a command list set must contain at least one command list")]
    EmptySet,
    #[error("{operation} is not supported on a parallel command list; use the worker lists")]
    NotSupportedInParallel { operation: &'static str },
    #[error("command list '{list}': completion hook failed: {source}")]
    CompletionHook {
        list: String,
        source: Box<dyn Error + Send + Sync>,
    },
    #[error(transparent)]
    Bindings(#[from] BindingsError),
}

/// Countdown that fires one callback when N member completions have landed.
///
/// Used by [`CommandListSet`] and [`ParallelCommandList`] to aggregate
/// per-member completion into a single caller-visible event.
pub(crate) struct AggregateCompletion {
    remaining: AtomicUsize,
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl AggregateCompletion {
    pub(crate) fn new(members: usize, callback: Option<Box<dyn FnOnce() + Send>>) -> std::sync::Arc<Self> {
        std::sync::Arc::new(AggregateCompletion {
            remaining: AtomicUsize::new(members),
            callback: Mutex::new(callback),
        })
    }

    /// Produces the completion callback to hand one member.
    pub(crate) fn arm(self: &std::sync::Arc<Self>) -> CompletionCallback {
        let shared = self.clone();
        Box::new(move |_list| {
            if shared.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                if let Some(callback) = shared.callback.lock().unwrap().take() {
                    callback();
                }
            }
            Ok(())
        })
    }
}
