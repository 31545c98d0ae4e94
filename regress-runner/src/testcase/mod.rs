// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contexts, testcases and workloads.
//!
//! A [`TestContext`] describes the state of the source tree a set of testcases runs against,
//! for example "trunk" and "trunk with a patch applied". [`Testcase`]s are produced by a
//! [`TestcaseGenerator`] from a matrix group, and every testcase runs once per context.

mod generator;
mod workload;

pub use generator::*;
pub use workload::*;

use crate::cluster::RoleType;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::{
    fmt,
    hash::{Hash, Hasher},
};

/// A check run against the daemon logs captured while a workload ran.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogVerification {
    /// Only lines from targets of this role are searched.
    pub role: RoleType,

    /// The text to look for.
    pub marker: String,

    /// If true, the marker must *not* appear.
    pub inverted: bool,
}

/// The source tree state a set of testcases runs against.
///
/// Equality and hashing are by name.
#[derive(Clone, Debug)]
pub struct TestContext {
    name: String,
    base_branch: String,
    patch_file: Option<Utf8PathBuf>,
    verifications: Vec<LogVerification>,
    compile: bool,
    allow_verification_failure: bool,
}

impl TestContext {
    /// Creates a new context on `base_branch`, without a patch.
    pub fn new(name: impl Into<String>, base_branch: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_branch: base_branch.into(),
            patch_file: None,
            verifications: Vec::new(),
            compile: false,
            allow_verification_failure: false,
        }
    }

    /// Sets the patch applied on top of the base branch.
    pub fn with_patch_file(mut self, patch_file: impl Into<Utf8PathBuf>) -> Self {
        self.patch_file = Some(patch_file.into());
        self
    }

    /// Sets the log verifications run after every workload.
    pub fn with_verifications(mut self, verifications: Vec<LogVerification>) -> Self {
        self.verifications = verifications;
        self
    }

    /// Sets whether the source tree is compiled before the context's testcases run.
    pub fn with_compile(mut self, compile: bool) -> Self {
        self.compile = compile;
        self
    }

    /// Sets whether failed log verifications are only reported.
    pub fn with_allow_verification_failure(mut self, allow: bool) -> Self {
        self.allow_verification_failure = allow;
        self
    }

    /// The name of the context.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The branch the source tree is switched to.
    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    /// The patch applied on top of the base branch, if any.
    pub fn patch_file(&self) -> Option<&Utf8Path> {
        self.patch_file.as_deref()
    }

    /// Identifies the patch in cache keys: its file name, if a patch is set.
    pub fn patch_identity(&self) -> Option<&str> {
        self.patch_file.as_deref().and_then(Utf8Path::file_name)
    }

    /// The log verifications run after every workload.
    pub fn verifications(&self) -> &[LogVerification] {
        &self.verifications
    }

    /// Whether the source tree is compiled before the context's testcases run.
    pub fn compile(&self) -> bool {
        self.compile
    }

    /// Whether failed log verifications are only reported.
    pub fn allow_verification_failure(&self) -> bool {
        self.allow_verification_failure
    }

    /// The name of the directory this context's outputs are written to.
    pub fn dir_name(&self) -> String {
        format!("ctx_{}", self.name.replace(' ', "_"))
    }
}

impl PartialEq for TestContext {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for TestContext {}

impl Hash for TestContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A single configuration variant and the workload run under it.
///
/// Equality and hashing are by full name.
#[derive(Clone, Debug)]
pub struct Testcase {
    group: String,
    full_name: String,
    workload_name: String,
    config_changes: IndexMap<String, String>,
    workload: Workload,
}

impl Testcase {
    pub(crate) fn new(
        group: &str,
        index: usize,
        workload_name: &str,
        config_changes: IndexMap<String, String>,
        workload: Workload,
    ) -> Self {
        Self {
            group: group.to_owned(),
            full_name: format!("{group}_{index}_{workload_name}"),
            workload_name: workload_name.to_owned(),
            config_changes,
            workload,
        }
    }

    /// The matrix group this testcase was generated from.
    pub fn simple_name(&self) -> &str {
        &self.group
    }

    /// The unique name of this testcase: `<group>_<index>_<workload>`.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// The name of the workload.
    pub fn workload_name(&self) -> &str {
        &self.workload_name
    }

    /// The configuration overrides applied for this testcase, in matrix key order.
    pub fn config_changes(&self) -> &IndexMap<String, String> {
        &self.config_changes
    }

    /// The workload run for this testcase.
    pub fn workload(&self) -> &Workload {
        &self.workload
    }
}

impl PartialEq for Testcase {
    fn eq(&self, other: &Self) -> bool {
        self.full_name == other.full_name
    }
}

impl Eq for Testcase {}

impl Hash for Testcase {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full_name.hash(state);
    }
}

impl fmt::Display for Testcase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}
