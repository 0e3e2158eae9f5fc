// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Multi-threaded encoding.

A [`ParallelCommandList`] owns a pool of ordinary worker command lists and
drives their lifecycles in lockstep: one `reset` begins them all (fanned out
across rayon's thread pool when the backend allows concurrent recording),
one `commit` ends them all, one `execute`/`complete` pair tracks them as a
unit. Callers grab the workers with
[`ParallelCommandList::parallel_command_lists`] and record into them from
their own threads; the parallel list itself never records.

That last point is enforced: per-command operations like debug groups or
binding programs answer [`CommandError::NotSupportedInParallel`]. There is
no meaningful "the" command stream to record them into.
*/

use crate::command::list::{CommandList, DebugGroup};
use crate::command::queue::CommandQueue;
use crate::command::set::CommandListSet;
use crate::command::{CommandError, CommandListState, FrameIndex};
use rayon::prelude::*;
use std::sync::Mutex;
use std::time::Duration;

/// A command list that encodes on multiple threads at once.
pub struct ParallelCommandList {
    name: String,
    queue: CommandQueue,
    workers: Mutex<Vec<CommandList>>,
}

impl ParallelCommandList {
    /// Creates a parallel list with no workers. Call
    /// [`ParallelCommandList::set_parallel_command_lists_count`] before the
    /// first reset.
    pub fn new(queue: &CommandQueue, name: &str) -> Self {
        ParallelCommandList {
            name: name.to_string(),
            queue: queue.clone(),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Grows or shrinks the worker pool. Legal only while every worker is
    /// `Pending`; a pool with recordings in flight cannot be resized.
    ///
    /// Workers keep their identity across calls, so growing from 4 to 8
    /// creates four lists and touches nothing else.
    pub fn set_parallel_command_lists_count(&self, count: usize) -> Result<(), CommandError> {
        let mut workers = self.workers.lock().unwrap();
        for worker in workers.iter() {
            let current = worker.state();
            if current != CommandListState::Pending {
                return Err(CommandError::InvalidState {
                    list: worker.name().to_string(),
                    current,
                    attempted: "set_parallel_command_lists_count",
                });
            }
        }
        while workers.len() < count {
            let worker_name = format!("{} [Thread {}]", self.name, workers.len());
            workers.push(CommandList::new(&self.queue, &worker_name));
        }
        workers.truncate(count);
        Ok(())
    }

    /// Snapshot of the worker lists, one per encoding thread.
    pub fn parallel_command_lists(&self) -> Vec<CommandList> {
        self.workers.lock().unwrap().clone()
    }

    /// Folded lifecycle state of the pool.
    ///
    /// Any worker still encoding makes the whole pool `Encoding`; failing
    /// that, any in-flight worker makes it `Executing`, then `Committed`,
    /// then `Pending`. The fold answers "is it safe to submit / resize /
    /// re-encode" for the pool as a unit.
    pub fn state(&self) -> CommandListState {
        let workers = self.workers.lock().unwrap();
        let mut folded = CommandListState::Pending;
        for worker in workers.iter() {
            match worker.state() {
                CommandListState::Encoding => return CommandListState::Encoding,
                CommandListState::Executing => folded = CommandListState::Executing,
                CommandListState::Committed => {
                    if folded != CommandListState::Executing {
                        folded = CommandListState::Committed;
                    }
                }
                CommandListState::Pending => {}
            }
        }
        folded
    }

    /// Begins encoding on every worker.
    ///
    /// When the backend supports concurrent recording the begins fan out
    /// across rayon's pool; otherwise they run sequentially on the calling
    /// thread, which is the only recording order such backends permit.
    pub fn reset(&self, debug_group: Option<DebugGroup>) -> Result<(), CommandError> {
        let workers = self.workers.lock().unwrap();
        if self.queue.supports_concurrent_recording() {
            workers
                .par_iter()
                .try_for_each(|worker| worker.reset(debug_group.clone()))
        } else {
            workers
                .iter()
                .try_for_each(|worker| worker.reset(debug_group.clone()))
        }
    }

    /// Like [`ParallelCommandList::reset`] but workers already encoding are
    /// left alone.
    pub fn reset_once(&self, debug_group: Option<DebugGroup>) -> Result<(), CommandError> {
        let workers = self.workers.lock().unwrap();
        if self.queue.supports_concurrent_recording() {
            workers
                .par_iter()
                .try_for_each(|worker| worker.reset_once(debug_group.clone()))
        } else {
            workers
                .iter()
                .try_for_each(|worker| worker.reset_once(debug_group.clone()))
        }
    }

    /// Ends recording on every worker.
    pub fn commit(&self) -> Result<(), CommandError> {
        let workers = self.workers.lock().unwrap();
        workers.iter().try_for_each(|worker| worker.commit())
    }

    /// Submits every worker for `frame_index` through the owning queue, so
    /// the fan-out respects the queue's submission serialization and the
    /// backend sees one submit for the whole pool. `completion` fires once,
    /// after the last worker completes.
    pub fn execute(
        &self,
        frame_index: FrameIndex,
        completion: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<(), CommandError> {
        let workers = self.workers.lock().unwrap();
        let set = CommandListSet::new(workers.clone())?;
        self.queue.shared().submit(&set, frame_index, completion)
    }

    /// Completes every worker still executing for `frame_index`, tolerating
    /// per-worker hook failures the way a set sweep does.
    pub fn complete(&self, frame_index: FrameIndex) -> Result<(), CommandError> {
        let workers = self.workers.lock().unwrap();
        let set = CommandListSet::new(workers.clone())?;
        set.complete(frame_index);
        Ok(())
    }

    /// Blocks until no worker is `Executing`. Returns `false` on timeout.
    pub fn wait_until_completed(&self, timeout: Option<Duration>) -> bool {
        let workers = self.workers.lock().unwrap().clone();
        match CommandListSet::new(workers) {
            Ok(set) => set.wait_until_completed(timeout),
            Err(_) => true, //no workers, nothing in flight
        }
    }

    /// Per-command recording is a worker-list concern.
    pub fn push_debug_group(&self, _group: DebugGroup) -> Result<(), CommandError> {
        Err(CommandError::NotSupportedInParallel {
            operation: "push_debug_group",
        })
    }

    pub fn pop_debug_group(&self) -> Result<(), CommandError> {
        Err(CommandError::NotSupportedInParallel {
            operation: "pop_debug_group",
        })
    }

    pub fn set_program_bindings(&self) -> Result<(), CommandError> {
        Err(CommandError::NotSupportedInParallel {
            operation: "set_program_bindings",
        })
    }

    pub fn set_resource_barriers(&self) -> Result<(), CommandError> {
        Err(CommandError::NotSupportedInParallel {
            operation: "set_resource_barriers",
        })
    }
}
