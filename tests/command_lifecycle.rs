// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Cross-thread command list lifecycle scenarios.
//!
//! The in-module unit tests cover single-threaded edge legality; these tests
//! exercise the handoff the lifecycle actually exists for: one thread
//! encoding and submitting, another thread (standing in for the fence-driven
//! completion tracker) completing, with `wait_until_completed` bridging them.

use commands_and_barriers::command::{
    CommandError, CommandList, CommandListSet, CommandListState, CommandQueue,
};
use commands_and_barriers::resource::QueueFamily;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn committed(queue: &CommandQueue, name: &str) -> CommandList {
    let list = CommandList::new(queue, name);
    list.reset(None).unwrap();
    list.commit().unwrap();
    list
}

#[test]
fn completion_crosses_threads() {
    let queue = CommandQueue::new("render", QueueFamily(0));
    let list = committed(&queue, "frame");
    let frame = list.committed_frame();
    list.execute(frame, None).unwrap();

    let completer = list.clone();
    let handle = thread::spawn(move || {
        //the fence-signal delay
        thread::sleep(Duration::from_millis(50));
        completer.complete(frame).unwrap();
    });

    let started = Instant::now();
    assert!(list.wait_until_completed(None));
    assert!(started.elapsed() >= Duration::from_millis(40));
    assert_eq!(list.state(), CommandListState::Pending);
    handle.join().unwrap();
}

#[test]
fn wait_timeout_elapses_without_completion() {
    let queue = CommandQueue::new("render", QueueFamily(0));
    let list = committed(&queue, "stalled");
    let frame = list.committed_frame();
    list.execute(frame, None).unwrap();

    let started = Instant::now();
    assert!(!list.wait_until_completed(Some(Duration::from_millis(100))));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(5));
    //nothing was forced to complete
    assert_eq!(list.state(), CommandListState::Executing);

    list.complete(frame).unwrap();
    assert!(list.wait_until_completed(Some(Duration::from_millis(100))));
}

#[test]
fn completion_hook_runs_on_completer_thread() {
    let queue = CommandQueue::new("render", QueueFamily(0));
    let list = committed(&queue, "hooked");
    let frame = list.committed_frame();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_hook = fired.clone();
    list.execute(
        frame,
        Some(Box::new(move |_| {
            fired_in_hook.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })),
    )
    .unwrap();

    let completer = list.clone();
    thread::spawn(move || completer.complete(frame).unwrap())
        .join()
        .unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn stale_recording_rejected_after_frame_advance() {
    let queue = CommandQueue::new("render", QueueFamily(0));
    let list = committed(&queue, "stale");
    let set = CommandListSet::new(vec![list.clone()]).unwrap();
    //the frame clock moved on after the commit
    queue.begin_frame();
    let err = queue.execute(&set, None).unwrap_err();
    assert!(matches!(err, CommandError::FrameIndexMismatch { .. }));
    assert_eq!(list.state(), CommandListState::Committed);
}

#[test]
fn set_hook_fires_once_after_sweep() {
    let queue = CommandQueue::new("render", QueueFamily(0));
    let lists: Vec<CommandList> = (0..3)
        .map(|i| committed(&queue, &format!("pass {i}")))
        .collect();
    let frame = queue.current_frame();
    let set = CommandListSet::new(lists).unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_hook = fired.clone();
    queue
        .execute(
            &set,
            Some(Box::new(move || {
                fired_in_hook.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

    let sweeper = set.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        sweeper.complete(frame);
    });
    assert!(set.wait_until_completed(Some(Duration::from_secs(5))));
    handle.join().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    for list in set.iter() {
        assert_eq!(list.state(), CommandListState::Pending);
    }
}

#[test]
fn lists_cycle_across_many_frames() {
    let queue = CommandQueue::new("render", QueueFamily(0));
    let list = CommandList::new(&queue, "recycled");
    for _ in 0..10 {
        let frame = queue.begin_frame();
        list.reset(None).unwrap();
        list.commit().unwrap();
        assert_eq!(list.committed_frame(), frame);
        let set = CommandListSet::new(vec![list.clone()]).unwrap();
        queue.execute(&set, None).unwrap();
        set.complete(frame);
        assert_eq!(list.state(), CommandListState::Pending);
    }
}
