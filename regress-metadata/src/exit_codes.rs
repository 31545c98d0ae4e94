// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `regress` failures.
///
/// `regress` runs may fail for a variety of reasons. This structure documents the exit codes that
/// may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum RegressExitCode {}

impl RegressExitCode {
    /// No errors occurred and regress exited normally.
    pub const OK: i32 = 0;

    /// One or more testcases failed or timed out, but the run was not halted.
    pub const TESTCASES_FAILED: i32 = 100;

    /// Results differed between two contexts.
    pub const COMPARISON_FAILED: i32 = 101;

    /// Switching branches, applying a patch or compiling produced an error.
    pub const BUILD_FAILED: i32 = 102;

    /// A fatal step error aborted the run: a remote command outside the workload failed, a
    /// verification failed, or an output artifact was missing.
    pub const RUN_ABORTED: i32 = 103;

    /// The run was halted after a failed or timed-out testcase.
    pub const HALTED: i32 = 104;

    /// No testcases were selected to run, but no other errors occurred.
    pub const NO_TESTCASES_RUN: i32 = 4;

    /// A user issue happened while setting up a regress invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
