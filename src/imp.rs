// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Backend seam.
//!
//! The core state machines in this crate never talk to a native graphics API
//! directly; they call the types re-exported here. Only the `nop` backend is
//! in-tree today. It performs no GPU work but counts the calls it receives,
//! which is what the test suite observes.

mod nop;
pub use nop::*;
