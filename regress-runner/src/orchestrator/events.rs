// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    build_cache::CompileOutcome,
    results::{ResultStore, TestcaseResult},
    testcase::{TestContext, Testcase},
};
use indexmap::IndexMap;

/// Whether the run continues.
///
/// `Halted` is terminal: once a run is halted, no further contexts or testcases start.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionState {
    /// Testcases are being run.
    Running,

    /// The run was stopped after a failed or timed out testcase.
    Halted,
}

/// Why a run was halted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HaltReason {
    /// The previous testcase failed and `halt-on-failure` is set.
    TestcaseFailed,

    /// The previous testcase timed out and `halt-on-timeout` is set.
    TestcaseTimedOut,
}

/// A progress event emitted by [`Orchestrator::execute`](super::Orchestrator::execute).
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum RunEvent<'a> {
    /// The run started.
    RunStarted {
        /// The number of contexts.
        context_count: usize,

        /// The number of testcases run per context.
        testcase_count: usize,
    },

    /// A context started.
    ContextStarted {
        /// The context.
        context: &'a TestContext,
    },

    /// The source tree of a context is ready.
    CompileFinished {
        /// The context.
        context: &'a TestContext,

        /// What the build cache did.
        outcome: &'a CompileOutcome,
    },

    /// A testcase started.
    TestcaseStarted {
        /// The context.
        context: &'a TestContext,

        /// The 1-based position of the testcase.
        index: usize,

        /// The testcase.
        testcase: &'a Testcase,
    },

    /// A testcase finished and its artifacts were written.
    TestcaseFinished {
        /// The context.
        context: &'a TestContext,

        /// The testcase.
        testcase: &'a Testcase,

        /// The result.
        result: &'a TestcaseResult,
    },

    /// Every testcase of a context has run, or the run was halted during the context.
    ContextFinished {
        /// The context.
        context: &'a TestContext,

        /// The results of the context, in run order.
        results: &'a IndexMap<String, TestcaseResult>,
    },

    /// The run was halted.
    Halted {
        /// Why.
        reason: HaltReason,
    },

    /// The run finished. Results haven't been compared across contexts yet.
    RunFinished {
        /// All results.
        results: &'a ResultStore,

        /// The final state.
        state: ExecutionState,
    },
}
