// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Grouped submission.

A [`CommandListSet`] is a non-empty, immutable group of command lists bound
to one queue, submitted and completion-tracked as a unit. Membership is
validated at construction; everything after that can assume queue affinity.
*/

use crate::command::list::CommandList;
use crate::command::queue::QueueShared;
use crate::command::{AggregateCompletion, CommandError, CommandListState, FrameIndex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A non-empty group of command lists on a single queue.
#[derive(Debug, Clone)]
pub struct CommandListSet {
    lists: Vec<CommandList>,
    queue: Arc<QueueShared>,
}

impl CommandListSet {
    /// Groups `lists` for submission as a unit.
    ///
    /// Errors on an empty vector, and on any member bound to a different
    /// queue than the first.
    pub fn new(lists: Vec<CommandList>) -> Result<Self, CommandError> {
        let first = lists.first().ok_or(CommandError::EmptySet)?;
        let queue = first.queue_shared().clone();
        for list in &lists[1..] {
            if !Arc::ptr_eq(list.queue_shared(), &queue) {
                return Err(CommandError::QueueMismatch {
                    list: list.name().to_string(),
                    expected_queue: queue.name().to_string(),
                    actual_queue: list.queue_name().to_string(),
                });
            }
        }
        Ok(CommandListSet { lists, queue })
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    /// Always false; sets cannot be constructed empty.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandList> {
        self.lists.iter()
    }

    pub(crate) fn queue_shared(&self) -> &Arc<QueueShared> {
        &self.queue
    }

    /// Marks every member executing for `frame_index`.
    ///
    /// Members are pre-validated (all `Committed`, all stamped with
    /// `frame_index`) before any transition happens, so a bad member leaves
    /// the whole set untouched rather than half-submitted. `completion`
    /// fires once, after the last member's [`CommandList::complete`].
    pub(crate) fn execute(
        &self,
        frame_index: FrameIndex,
        completion: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<(), CommandError> {
        for list in &self.lists {
            let current = list.state();
            if current != CommandListState::Committed {
                return Err(CommandError::InvalidState {
                    list: list.name().to_string(),
                    current,
                    attempted: "execute",
                });
            }
            let committed = list.committed_frame();
            if committed != frame_index {
                return Err(CommandError::FrameIndexMismatch {
                    list: list.name().to_string(),
                    expected: committed,
                    actual: frame_index,
                });
            }
        }
        let aggregate = AggregateCompletion::new(self.lists.len(), completion);
        for list in &self.lists {
            list.execute(frame_index, Some(aggregate.arm()))?;
        }
        Ok(())
    }

    /// Completes every member still executing for `frame_index`.
    ///
    /// This is the sweep the completion-tracking thread runs when a frame's
    /// fence signals. Members already back in `Pending` (completed
    /// individually) are skipped. A failing completion hook is logged and
    /// the sweep continues; one bad hook must not strand the other members
    /// in `Executing`.
    pub fn complete(&self, frame_index: FrameIndex) {
        for list in &self.lists {
            if list.state() != CommandListState::Executing {
                continue;
            }
            if let Err(error) = list.complete(frame_index) {
                logwise::error_sync!(
                    "command list {name}: completion failed during set sweep: {error}",
                    name = list.name().to_string(),
                    error = logwise::privacy::LogIt(&error)
                );
            }
        }
    }

    /// Blocks until no member is `Executing`. Returns `false` if the
    /// timeout elapsed first.
    pub fn wait_until_completed(&self, timeout: Option<Duration>) -> bool {
        match timeout {
            None => {
                for list in &self.lists {
                    list.wait_until_completed(None);
                }
                true
            }
            Some(duration) => {
                let deadline = Instant::now() + duration;
                for list in &self.lists {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    if !list.wait_until_completed(Some(deadline - now)) {
                        return false;
                    }
                }
                true
            }
        }
    }
}
