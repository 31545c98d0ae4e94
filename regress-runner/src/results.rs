// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Testcase outcomes, per context.

use crate::{cluster::RemoteCommand, errors::ResultComparisonError};
use indexmap::IndexMap;
use itertools::Itertools;
use regress_metadata::{ContextSummary, RunSummary, TestcaseOutcomeSummary, TestcaseResultSummary};
use std::{fmt, time::Duration};
use tracing::debug;

/// The outcome of running a testcase's workload.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TestcaseOutcome {
    /// The workload completed successfully.
    Passed,

    /// The workload exited with an error.
    Failed,

    /// The workload didn't complete within its timeout.
    Timeout,
}

impl TestcaseOutcome {
    /// Returns a short lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    fn to_summary(self) -> TestcaseOutcomeSummary {
        match self {
            Self::Passed => TestcaseOutcomeSummary::Passed,
            Self::Failed => TestcaseOutcomeSummary::Failed,
            Self::Timeout => TestcaseOutcomeSummary::Timeout,
        }
    }
}

impl fmt::Display for TestcaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of one testcase: outcome, the workload command and optional details.
///
/// Results compare equal if all three are equal.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestcaseResult {
    /// The outcome.
    pub outcome: TestcaseOutcome,

    /// The workload command that was run.
    pub command: RemoteCommand,

    /// Details about a failure.
    pub details: Option<String>,
}

impl TestcaseResult {
    /// A passing result.
    pub fn passed(command: RemoteCommand) -> Self {
        Self {
            outcome: TestcaseOutcome::Passed,
            command,
            details: None,
        }
    }

    /// A failing result for a workload allowed to run for `timeout`.
    ///
    /// The details name the timeout, never the elapsed time.
    pub fn failed(command: RemoteCommand, timeout: Duration) -> Self {
        Self {
            outcome: TestcaseOutcome::Failed,
            command,
            details: Some(format!("Error after {} seconds", timeout.as_secs())),
        }
    }

    /// A timed out result.
    pub fn timed_out(command: RemoteCommand, timeout: Duration) -> Self {
        Self {
            outcome: TestcaseOutcome::Timeout,
            command,
            details: Some(format!("Timed out after {} seconds", timeout.as_secs())),
        }
    }
}

impl fmt::Display for TestcaseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.outcome, self.command)?;
        if let Some(details) = &self.details {
            write!(f, ": {details}")?;
        }
        Ok(())
    }
}

/// Records testcase results under the current context, and compares contexts.
#[derive(Clone, Debug, Default)]
pub struct ResultStore {
    contexts: IndexMap<String, IndexMap<String, TestcaseResult>>,
    current: Option<String>,
    last_outcome: Option<TestcaseOutcome>,
}

impl ResultStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh result map for `context`.
    pub fn start_context(&mut self, context: &str) {
        self.contexts.insert(context.to_owned(), IndexMap::new());
        self.current = Some(context.to_owned());
    }

    /// Records the result of `testcase` under the current context.
    ///
    /// Results recorded before any context was started are dropped.
    pub fn record(&mut self, testcase: &str, result: TestcaseResult) {
        self.last_outcome = Some(result.outcome);
        let Some(results) = self
            .current
            .as_ref()
            .and_then(|current| self.contexts.get_mut(current))
        else {
            debug!("no context started, dropping result for `{testcase}`");
            return;
        };
        results.insert(testcase.to_owned(), result);
    }

    /// Returns true if the most recently recorded testcase failed.
    pub fn is_current_failed(&self) -> bool {
        self.last_outcome == Some(TestcaseOutcome::Failed)
    }

    /// Returns true if the most recently recorded testcase timed out.
    pub fn is_current_timed_out(&self) -> bool {
        self.last_outcome == Some(TestcaseOutcome::Timeout)
    }

    /// Returns the results of `context`, in recording order.
    pub fn results(&self, context: &str) -> Option<&IndexMap<String, TestcaseResult>> {
        self.contexts.get(context)
    }

    /// Iterates over contexts and their results, in start order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexMap<String, TestcaseResult>)> {
        self.contexts
            .iter()
            .map(|(name, results)| (name.as_str(), results))
    }

    /// Checks that every context recorded the same results as `reference`.
    ///
    /// Fails on the first context that differs.
    pub fn compare(&self, reference: &str) -> Result<(), ResultComparisonError> {
        let empty = IndexMap::new();
        let expected = self.contexts.get(reference).unwrap_or(&empty);
        for (name, results) in &self.contexts {
            if name == reference {
                continue;
            }
            // IndexMap equality ignores order.
            if results != expected {
                return Err(ResultComparisonError::new(
                    reference,
                    display_results(expected),
                    name,
                    display_results(results),
                ));
            }
            debug!("results of `{name}` match `{reference}`");
        }
        Ok(())
    }

    /// Converts the store into a serializable summary.
    pub fn to_summary(&self, halted: bool) -> RunSummary {
        let mut summary = RunSummary::default();
        summary.halted = halted;
        summary.contexts = self
            .contexts
            .iter()
            .map(|(name, results)| ContextSummary {
                name: name.clone(),
                results: results
                    .iter()
                    .map(|(testcase, result)| {
                        let summary = TestcaseResultSummary {
                            outcome: result.outcome.to_summary(),
                            host: result.command.target().host.to_string(),
                            command: result.command.command().to_owned(),
                            details: result.details.clone(),
                        };
                        (testcase.clone(), summary)
                    })
                    .collect(),
            })
            .collect();
        summary
    }
}

fn display_results(results: &IndexMap<String, TestcaseResult>) -> String {
    if results.is_empty() {
        return "{}".to_owned();
    }
    format!(
        "{{{}}}",
        results
            .iter()
            .map(|(testcase, result)| format!("{testcase}: {result}"))
            .join(", ")
    )
}
