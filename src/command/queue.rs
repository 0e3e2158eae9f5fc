// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Command queues.

A [`CommandQueue`] is the submission point command lists are bound to at
creation. It carries the frame clock — a monotonically increasing
[`FrameIndex`](crate::command::FrameIndex) that `commit` snapshots and
`execute`/`complete` validate against — and the queue family identity used
for cross-queue ownership transfers.

Submission is serialized by a queue-level lock. Encoding is not: many lists
bound to the same queue record concurrently, the lock only covers the moment
a set is handed to the native queue.
*/

use crate::command::set::CommandListSet;
use crate::command::{CommandError, FrameIndex};
use crate::imp;
use crate::resource::QueueFamily;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
pub(crate) struct QueueShared {
    name: String,
    family: QueueFamily,
    frame: AtomicU32,
    submission: Mutex<()>,
    native: imp::NativeQueue,
}

impl QueueShared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn family(&self) -> QueueFamily {
        self.family
    }

    pub(crate) fn current_frame(&self) -> FrameIndex {
        self.frame.load(Ordering::Acquire)
    }

    /// Submission core shared by [`CommandQueue::execute`] and the parallel
    /// encoder: member transitions and the native submit happen under the
    /// submission lock, and the backend is only told about sets whose
    /// members all validated.
    pub(crate) fn submit(
        &self,
        set: &CommandListSet,
        frame_index: FrameIndex,
        completion: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<(), CommandError> {
        let _submission = self.submission.lock().unwrap();
        set.execute(frame_index, completion)?;
        self.native.submit(set.len());
        let count = set.len() as u64;
        logwise::trace_sync!(
            "queue {name}: submitted {count} lists for frame {frame}",
            name = self.name.clone(),
            count = count,
            frame = frame_index
        );
        Ok(())
    }
}

/// Shared handle to a command queue. Clones refer to the same queue.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    shared: Arc<QueueShared>,
}

impl CommandQueue {
    /// Creates a queue whose backend supports concurrent recording of worker
    /// command lists.
    pub fn new(name: &str, family: QueueFamily) -> Self {
        Self::build(name, family, true)
    }

    /// Creates a queue whose backend requires worker command lists to be
    /// recorded one at a time. The parallel encoder honors this by falling
    /// back to sequential iteration.
    pub fn new_serial_recording(name: &str, family: QueueFamily) -> Self {
        Self::build(name, family, false)
    }

    fn build(name: &str, family: QueueFamily, concurrent_recording: bool) -> Self {
        CommandQueue {
            shared: Arc::new(QueueShared {
                name: name.to_string(),
                family,
                frame: AtomicU32::new(0),
                submission: Mutex::new(()),
                native: imp::NativeQueue::new(name, concurrent_recording),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn family(&self) -> QueueFamily {
        self.shared.family
    }

    /// The frame index new commits will be stamped with.
    pub fn current_frame(&self) -> FrameIndex {
        self.shared.current_frame()
    }

    /// Advances the frame clock. Returns the new current frame.
    ///
    /// Callers drive this once per in-flight frame; recordings committed
    /// before the tick stay valid for their own frame, not the new one.
    pub fn begin_frame(&self) -> FrameIndex {
        self.shared.frame.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn supports_concurrent_recording(&self) -> bool {
        self.shared.native.supports_concurrent_recording()
    }

    /// Submits a set of committed command lists for execution on this queue.
    ///
    /// Every member must be bound to this queue. The native submit and the
    /// member state transitions happen under the submission lock, so two
    /// threads submitting to the same queue cannot interleave their sets. A
    /// set that fails validation never reaches the native queue.
    /// `completion` fires once, after the *last* member completes.
    pub fn execute(
        &self,
        set: &CommandListSet,
        completion: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<(), CommandError> {
        if !Arc::ptr_eq(set.queue_shared(), &self.shared) {
            let member = set.iter().next().expect("sets are never empty");
            return Err(CommandError::QueueMismatch {
                list: member.name().to_string(),
                expected_queue: self.shared.name.clone(),
                actual_queue: member.queue_name().to_string(),
            });
        }
        self.shared.submit(set, self.current_frame(), completion)
    }

    pub(crate) fn shared(&self) -> &Arc<QueueShared> {
        &self.shared
    }

    #[cfg(test)]
    pub(crate) fn submission_count(&self) -> usize {
        self.shared.native.submission_count()
    }
}
