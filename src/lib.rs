// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! commands_and_barriers is the command-submission and resource-state core of a
cross-API GPU abstraction layer.

Explicit graphics APIs (DX12, Vulkan) make resource state transitions the
caller's problem: every texture and buffer is in exactly one state at a time,
and using it in a new way requires inserting a barrier at exactly the right
point in a command stream. Get it wrong and you have a GPU hang that
reproduces on one vendor's hardware, on Tuesdays. This crate centralizes that
bookkeeping:

| Type                                         | Tracks                                                            |
|----------------------------------------------|-------------------------------------------------------------------|
| [`resource::Resource`]                       | the single authoritative state (and owning queue family) per resource |
| [`barrier::ResourceBarrierSet`]              | pending transitions, deduplicated per resource, deterministic order |
| [`bindings::ProgramBindings`]                | which states a shader's arguments require, precomputed at bind time |
| [`command::CommandList`]                     | the Pending→Encoding→Committed→Executing lifecycle, plus retention |
| [`command::CommandQueue`]                    | submission, the frame clock, queue-family identity                 |
| [`command::ParallelCommandList`]             | N worker lists encoded on N threads, driven in lockstep            |

# The shape of a frame

```text
queue.begin_frame();
list.reset(..);                      // Pending -> Encoding
list.set_program_bindings(..);       // aggregate + flush barriers
list.commit();                       // Encoding -> Committed, frame stamped
queue.execute(&set, hook);           // Committed -> Executing
...fence signals, on another thread...
set.complete(frame);                 // Executing -> Pending, retention dropped
```

Illegal edges in that lifecycle are synchronous errors, not panics and not
silent corrections: a list that is `Committed` refuses to `reset`, a stale
frame index refuses to `execute`. The one place errors are tolerated rather
than propagated is a set-wide completion sweep, where a single failing
completion hook must not strand sibling lists in `Executing`.

# State is per-resource, not per-view

A resource bound through two different bindings objects still has one state.
Bindings objects therefore never cache "the state I left it in"; they compute
the state each argument *requires* and ask the resource to transition,
collecting barriers only when the live state actually differs.

# Backends

The native half (recorders, queues, allocations) sits behind the `imp`
module.
Only a counting nop backend is in-tree; it is enough to test every state
machine here without a GPU attached.
*/

pub mod barrier;
pub mod bindings;
pub mod command;
pub mod resource;

mod imp;
