// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Output artifacts of a run.
//!
//! Every file produced for a testcase is written by the [`OutputWriter`] and recorded in the
//! [`OutputRegistry`] under an [`OutputCategory`]. Before a testcase is finalized, the registry
//! checks that every category required for the workload's outcome was produced.

pub mod archive;
mod writer;

pub use writer::*;

use crate::errors::{DuplicateOutputError, OutputCompletenessError, OutputError};
use camino::Utf8PathBuf;
use indexmap::IndexMap;
use std::fmt;
use tracing::debug;

/// The kind of an output artifact.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum OutputCategory {
    /// A copy of the context's patch file.
    PatchFile,

    /// Configuration documents as found before the testcase changed anything.
    InitialConfig,

    /// Configuration documents after the testcase's changes were applied.
    TestcaseConfig,

    /// Log lines captured from the daemons while the workload ran.
    DaemonLogs,

    /// Log lines captured from the workers while they restarted.
    RestartLogs,

    /// The workload's own output.
    AppLog,

    /// Application log archives downloaded from the workers.
    AppLogArchives,

    /// Daemon log archives downloaded from the cluster.
    DaemonLogArchives,

    /// Node status and health reports.
    HealthReports,

    /// Files extracted from downloaded archives.
    ExtractedLogs,
}

impl OutputCategory {
    /// Returns the name of the category, as used in logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PatchFile => "patch-file",
            Self::InitialConfig => "initial-config",
            Self::TestcaseConfig => "testcase-config",
            Self::DaemonLogs => "daemon-logs",
            Self::RestartLogs => "restart-logs",
            Self::AppLog => "app-log",
            Self::AppLogArchives => "app-log-archives",
            Self::DaemonLogArchives => "daemon-log-archives",
            Self::HealthReports => "health-reports",
            Self::ExtractedLogs => "extracted-logs",
        }
    }

    /// The categories that must be non-empty for every testcase.
    const ALWAYS_REQUIRED: &'static [Self] = &[
        Self::TestcaseConfig,
        Self::InitialConfig,
        Self::DaemonLogs,
        Self::RestartLogs,
        Self::DaemonLogArchives,
    ];
}

impl fmt::Display for OutputCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type TestcaseOutputs = IndexMap<OutputCategory, Vec<Utf8PathBuf>>;

/// Keeps track of the artifacts produced for each context and testcase.
#[derive(Clone, Debug, Default)]
pub struct OutputRegistry {
    records: IndexMap<String, IndexMap<String, TestcaseOutputs>>,
    current: Option<(String, String)>,
}

impl OutputRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `(context, testcase)` the target of subsequent registrations.
    pub fn start_testcase(&mut self, context: &str, testcase: &str) {
        self.records
            .entry(context.to_owned())
            .or_default()
            .entry(testcase.to_owned())
            .or_default();
        self.current = Some((context.to_owned(), testcase.to_owned()));
    }

    /// Records `files` under `category` for the current testcase.
    ///
    /// A category may only be registered once per testcase, unless `allow_multiple` is set, in
    /// which case the files are appended.
    pub fn register(
        &mut self,
        category: OutputCategory,
        files: Vec<Utf8PathBuf>,
        allow_multiple: bool,
    ) -> Result<(), OutputError> {
        let outputs = self.current_mut().ok_or(OutputError::NoActiveTestcase)?;
        match outputs.get_mut(&category) {
            Some(existing) if allow_multiple => existing.extend(files),
            Some(_) => return Err(DuplicateOutputError::new(category).into()),
            None => {
                outputs.insert(category, files);
            }
        }
        Ok(())
    }

    /// Returns the files registered under `category` for the current testcase.
    pub fn get(&self, category: OutputCategory) -> &[Utf8PathBuf] {
        self.current()
            .and_then(|outputs| outputs.get(&category))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns every file registered for the current testcase, in registration order.
    pub fn all_for_current(&self) -> Vec<&Utf8PathBuf> {
        self.current()
            .map(|outputs| outputs.values().flatten().collect())
            .unwrap_or_default()
    }

    /// Checks that every required category is non-empty for the current testcase.
    ///
    /// Application log archives are only required if the workload didn't fail.
    pub fn verify(&self, app_failed: bool) -> Result<(), OutputCompletenessError> {
        let mut required = OutputCategory::ALWAYS_REQUIRED.to_vec();
        if !app_failed {
            required.push(OutputCategory::AppLogArchives);
        }
        let missing: Vec<_> = required
            .into_iter()
            .filter(|category| self.get(*category).is_empty())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            let testcase = self
                .current
                .as_ref()
                .map_or("<none>", |(_, testcase)| testcase.as_str());
            Err(OutputCompletenessError::new(testcase, app_failed, missing))
        }
    }

    /// Logs everything produced so far at debug level.
    pub fn log_listing(&self) {
        for (context, testcases) in &self.records {
            for (testcase, outputs) in testcases {
                for (category, files) in outputs {
                    debug!(
                        "{context} / {testcase} / {category}: {}",
                        files.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(", ")
                    );
                }
            }
        }
    }

    fn current(&self) -> Option<&TestcaseOutputs> {
        let (context, testcase) = self.current.as_ref()?;
        self.records.get(context)?.get(testcase)
    }

    fn current_mut(&mut self) -> Option<&mut TestcaseOutputs> {
        let (context, testcase) = self.current.as_ref()?;
        self.records.get_mut(context)?.get_mut(testcase)
    }
}
