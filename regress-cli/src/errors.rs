// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use regress_metadata::RegressExitCode;
use regress_runner::{
    errors::{ConfigParseError, GenerateError, RunError},
    helpers::plural::testcases_str,
};
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are meant to be printed with
// display_to_stderr, which colorizes them.

/// An expected failure of a regress invocation, mapped to a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        error: std::io::Error,
    },
    #[error("repository root is not valid UTF-8")]
    RootInvalidUtf8 { root: std::path::PathBuf },
    #[error("repository root `{root}` is not a directory")]
    RootInvalid { root: Utf8PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("error generating testcases")]
    GenerateError {
        #[from]
        err: GenerateError,
    },
    #[error("no testcases to run")]
    NoTestcasesRun,
    #[error("regression run failed")]
    RunFailed {
        #[from]
        err: RunError,
    },
    #[error("run halted")]
    RunHalted { failed: usize },
    #[error("testcases failed")]
    TestcasesFailed { failed: usize },
    #[error("error writing output")]
    WriteOutput {
        #[source]
        error: std::io::Error,
    },
}

impl ExpectedError {
    pub(crate) fn write_output(error: std::io::Error) -> Self {
        Self::WriteOutput { error }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::RootInvalidUtf8 { .. }
            | Self::RootInvalid { .. }
            | Self::ConfigParseError { .. }
            | Self::GenerateError { .. } => RegressExitCode::SETUP_ERROR,
            Self::NoTestcasesRun => RegressExitCode::NO_TESTCASES_RUN,
            Self::RunFailed { err } => match err {
                RunError::RuntimeCreate(_) => RegressExitCode::SETUP_ERROR,
                RunError::SourceSetup { .. } | RunError::Build { .. } => {
                    RegressExitCode::BUILD_FAILED
                }
                RunError::ResultComparison(_) => RegressExitCode::COMPARISON_FAILED,
                _ => RegressExitCode::RUN_ABORTED,
            },
            Self::RunHalted { .. } => RegressExitCode::HALTED,
            Self::TestcasesFailed { .. } => RegressExitCode::TESTCASES_FAILED,
            Self::WriteOutput { .. } => RegressExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirFailed { error } => {
                error!("could not determine the current directory");
                Some(error as &dyn Error)
            }
            Self::RootInvalidUtf8 { root } => {
                error!(
                    "repository root `{}` is not valid UTF-8",
                    root.display().style(styles.bold)
                );
                None
            }
            Self::RootInvalid { root } => {
                error!(
                    "repository root `{}` is not a directory",
                    root.style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse regress config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::GenerateError { err } => {
                error!("{err}");
                err.source()
            }
            Self::NoTestcasesRun => {
                error!("no testcases to run");
                None
            }
            Self::RunFailed { err } => {
                error!("{err}");
                err.source()
            }
            Self::RunHalted { failed } => {
                error!(
                    "run {} after {} unsuccessful {}",
                    "halted".style(styles.warning_text),
                    failed.style(styles.bold),
                    testcases_str(*failed),
                );
                None
            }
            Self::TestcasesFailed { failed } => {
                error!(
                    "{} {} did not pass",
                    failed.style(styles.bold),
                    testcases_str(*failed),
                );
                None
            }
            Self::WriteOutput { error } => {
                error!("error writing output");
                Some(error as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ExpectedError::NoTestcasesRun, RegressExitCode::NO_TESTCASES_RUN ; "no testcases")]
    #[test_case(ExpectedError::RunHalted { failed: 1 }, RegressExitCode::HALTED ; "halted")]
    #[test_case(
        ExpectedError::TestcasesFailed { failed: 2 },
        RegressExitCode::TESTCASES_FAILED
        ; "testcases failed"
    )]
    #[test_case(
        ExpectedError::RunFailed { err: RunError::RuntimeCreate(std::io::Error::other("no threads")) },
        RegressExitCode::SETUP_ERROR
        ; "runtime"
    )]
    fn exit_codes(error: ExpectedError, expected: i32) {
        assert_eq!(error.process_exit_code(), expected);
    }
}
