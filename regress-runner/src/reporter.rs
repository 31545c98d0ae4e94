// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human-readable result tables.
//!
//! Output goes through `tracing` at the `info` level, one event per line, so it interleaves
//! correctly with the rest of the run's logging.

use crate::{
    build_cache::CompileOutcome,
    helpers::plural,
    orchestrator::{ExecutionState, HaltReason, RunEvent},
    results::{ResultStore, TestcaseOutcome, TestcaseResult},
};
use indexmap::IndexMap;
use owo_colors::{OwoColorize, Style};
use swrite::{SWrite, swrite};
use tracing::{debug, info, warn};

/// Renders per-context result tables and the final status line.
#[derive(Clone, Debug, Default)]
pub struct Reporter {
    styles: Styles,
}

impl Reporter {
    /// Creates a reporter with colors disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns on colored output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Logs a progress event of a run.
    pub fn report_event(&self, event: &RunEvent<'_>) {
        match event {
            RunEvent::RunStarted {
                context_count,
                testcase_count,
            } => {
                info!(
                    "running {} {} in {} {}",
                    testcase_count.style(self.styles.count),
                    plural::testcases_str(*testcase_count),
                    context_count.style(self.styles.count),
                    plural::contexts_str(*context_count),
                );
            }
            RunEvent::ContextStarted { context } => {
                info!("context {}", context.name().style(self.styles.context));
            }
            RunEvent::CompileFinished { context, outcome } => match outcome {
                CompileOutcome::Skipped => debug!("{context}: not compiled"),
                CompileOutcome::CacheHit { cache_key } => {
                    info!("{context}: using cached build `{cache_key}`")
                }
                CompileOutcome::Compiled {
                    cache_key,
                    module_count,
                } => info!("{context}: compiled {module_count} modules as `{cache_key}`"),
            },
            RunEvent::TestcaseStarted {
                index, testcase, ..
            } => {
                info!("[{index}] {testcase}");
            }
            RunEvent::TestcaseFinished {
                testcase, result, ..
            } => {
                let mut out = String::new();
                self.write_result_line(testcase.full_name(), 0, result, &mut out);
                info!("{}", out.trim_start());
            }
            RunEvent::ContextFinished { context, results } => {
                self.report_context(context.name(), results);
            }
            RunEvent::Halted { reason } => {
                let reason = match reason {
                    HaltReason::TestcaseFailed => "a testcase failed",
                    HaltReason::TestcaseTimedOut => "a testcase timed out",
                };
                warn!("{}: {reason}", "halting".style(self.styles.fail));
            }
            RunEvent::RunFinished { results, state } => {
                self.report_final(results, *state == ExecutionState::Halted);
            }
        }
    }

    /// Logs the result table of `context`.
    pub fn report_context(&self, context: &str, results: &IndexMap<String, TestcaseResult>) {
        let mut out = String::new();
        self.write_context_results(context, results, &mut out);
        for line in out.lines() {
            info!("{line}");
        }
    }

    /// Logs the final status of the run.
    pub fn report_final(&self, store: &ResultStore, halted: bool) {
        let mut out = String::new();
        self.write_final_status(store, halted, &mut out);
        info!("{out}");
    }

    /// Writes the result table of `context` to `out`.
    pub fn write_context_results(
        &self,
        context: &str,
        results: &IndexMap<String, TestcaseResult>,
        out: &mut String,
    ) {
        swrite!(
            out,
            "results for context {} ({} {}):",
            context.style(self.styles.context),
            results.len().style(self.styles.count),
            plural::testcases_str(results.len()),
        );
        let width = results.keys().map(|name| name.len()).max().unwrap_or(0);
        for (testcase, result) in results {
            out.push('\n');
            self.write_result_line(testcase, width, result, out);
        }
    }

    fn write_result_line(
        &self,
        testcase: &str,
        width: usize,
        result: &TestcaseResult,
        out: &mut String,
    ) {
        swrite!(
            out,
            "  {:>7} {testcase:<width$}  {}",
            result
                .outcome
                .as_str()
                .to_uppercase()
                .style(self.styles.outcome(result.outcome)),
            result.command,
        );
        if let Some(details) = &result.details {
            swrite!(out, "  ({details})");
        }
    }

    /// Writes the final status line to `out`.
    pub fn write_final_status(&self, store: &ResultStore, halted: bool, out: &mut String) {
        let (mut passed, mut failed, mut timed_out, mut contexts) = (0, 0, 0, 0);
        for (_, results) in store.iter() {
            contexts += 1;
            for result in results.values() {
                match result.outcome {
                    TestcaseOutcome::Passed => passed += 1,
                    TestcaseOutcome::Failed => failed += 1,
                    TestcaseOutcome::Timeout => timed_out += 1,
                }
            }
        }
        let total = passed + failed + timed_out;
        let status = if halted {
            "HALTED".style(self.styles.fail)
        } else {
            "FINISHED".style(self.styles.pass)
        };
        swrite!(
            out,
            "{status}: {} {} across {} {}: {} passed, {} failed, {} timed out",
            total.style(self.styles.count),
            plural::testcases_str(total),
            contexts.style(self.styles.count),
            plural::contexts_str(contexts),
            passed.style(self.styles.pass),
            failed.style(self.styles.fail),
            timed_out.style(self.styles.timeout),
        );
    }
}

#[derive(Clone, Debug, Default)]
struct Styles {
    count: Style,
    context: Style,
    pass: Style,
    fail: Style,
    timeout: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.context = Style::new().blue().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.timeout = Style::new().yellow().bold();
    }

    fn outcome(&self, outcome: TestcaseOutcome) -> Style {
        match outcome {
            TestcaseOutcome::Passed => self.pass,
            TestcaseOutcome::Failed => self.fail,
            TestcaseOutcome::Timeout => self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{RemoteCommand, RoleTarget, RoleType};
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn store() -> ResultStore {
        let command = |cmd: &str| {
            RemoteCommand::new(RoleTarget::new("nm1", RoleType::new("nodemanager")), cmd)
        };
        let mut store = ResultStore::new();
        store.start_context("trunk");
        store.record("keepalive_1_sleep", TestcaseResult::passed(command("run sleep")));
        store.record(
            "keepalive_1_loadgen",
            TestcaseResult::timed_out(command("run loadgen"), Duration::from_secs(1000)),
        );
        store
    }

    #[test]
    fn context_table() {
        let store = store();
        let mut out = String::new();
        Reporter::new().write_context_results("trunk", store.results("trunk").unwrap(), &mut out);
        assert_eq!(
            out,
            indoc! {"
                results for context trunk (2 testcases):
                   PASSED keepalive_1_sleep    [nodemanager@nm1] run sleep
                  TIMEOUT keepalive_1_loadgen  [nodemanager@nm1] run loadgen  (Timed out after 1000 seconds)"}
        );
    }

    #[test]
    fn final_status() {
        let mut out = String::new();
        Reporter::new().write_final_status(&store(), true, &mut out);
        assert_eq!(
            out,
            "HALTED: 2 testcases across 1 context: 1 passed, 0 failed, 1 timed out"
        );
    }
}
