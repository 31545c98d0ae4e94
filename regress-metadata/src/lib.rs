// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to regress machine-readable output.
//!
//! `regress list --message-format json` emits a [`TestcaseListSummary`], and every run writes a
//! [`RunSummary`] to `summary.json` in its work directory. Both are stable formats intended for
//! downstream tooling. Documented exit codes live in [`RegressExitCode`].

mod exit_codes;
mod summaries;

pub use exit_codes::*;
pub use summaries::*;
