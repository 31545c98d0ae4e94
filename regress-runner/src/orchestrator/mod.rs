// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The regression run state machine.
//!
//! The main structure in this module is [`Orchestrator`]. It runs every testcase under every
//! context, in order, and stops early once the run is [`ExecutionState::Halted`].

mod events;
mod imp;

pub use events::*;
pub use imp::*;

#[cfg(test)]
mod tests;
