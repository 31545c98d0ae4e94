// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A serializable list of generated testcases, as produced by `regress list`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct TestcaseListSummary {
    /// The number of testcases selected to run.
    pub testcase_count: usize,

    /// The names of the contexts that each testcase runs under, in execution order.
    pub contexts: Vec<String>,

    /// The testcases, in execution order.
    pub testcases: Vec<TestcaseSummary>,
}

/// Serializable information about a single generated testcase.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestcaseSummary {
    /// The full name of the testcase, e.g. `keepalive_1_sleep`.
    pub name: String,

    /// The name of the matrix group this testcase was generated from.
    pub group: String,

    /// The name of the workload this testcase runs.
    pub workload: String,

    /// The configuration overrides applied for this testcase.
    pub config_changes: BTreeMap<String, String>,
}

/// The outcome of a single testcase, as recorded in [`RunSummary`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestcaseOutcomeSummary {
    /// The workload completed successfully.
    Passed,

    /// The workload exited with an error.
    Failed,

    /// The workload did not complete within its timeout.
    Timeout,
}

/// Serializable summary of a whole run, written to `summary.json` in the work directory.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct RunSummary {
    /// Whether the run was halted before all testcases finished.
    pub halted: bool,

    /// Per-context results, in execution order.
    pub contexts: Vec<ContextSummary>,
}

/// Serializable results for one context.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContextSummary {
    /// The name of the context.
    pub name: String,

    /// Results, keyed by testcase name.
    pub results: BTreeMap<String, TestcaseResultSummary>,
}

/// Serializable result of one testcase.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestcaseResultSummary {
    /// The outcome.
    pub outcome: TestcaseOutcomeSummary,

    /// The host the workload ran on.
    pub host: String,

    /// The command line that was executed.
    pub command: String,

    /// Free-form details, e.g. `Timed out after 120 seconds`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl RunSummary {
    /// Parses a run summary from its JSON representation.
    pub fn parse_json(json: impl AsRef<str>) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json.as_ref())
    }

    /// Returns the number of testcases that did not pass, across all contexts.
    pub fn failed_count(&self) -> usize {
        self.contexts
            .iter()
            .flat_map(|context| context.results.values())
            .filter(|result| result.outcome != TestcaseOutcomeSummary::Passed)
            .count()
    }
}
