// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Testcase, Workload};
use crate::errors::GenerateError;
use indexmap::IndexMap;
use tracing::warn;

/// Expands a matrix group into testcases.
///
/// Every combination that picks exactly one candidate value per configuration key is paired
/// with every workload. Combinations are enumerated in key insertion order, then value order,
/// and numbered from 1; all workloads of a combination share its number.
///
/// ```
/// use regress_runner::testcase::{JobKind, TestcaseGenerator, Workload};
/// use std::time::Duration;
///
/// let sleep = Workload::Job {
///     kind: JobKind::Sleep,
///     install_path: "/opt/hadoop".to_owned(),
///     args: JobKind::Sleep.default_args(),
///     queue: None,
///     debug: false,
///     timeout: Duration::from_secs(60),
/// };
/// let testcases = TestcaseGenerator::new("max_connections")
///     .with_configs("mapreduce.shuffle.max.connections", ["5", "10"])
///     .with_workloads([("sleep", sleep)])
///     .generate()
///     .unwrap();
/// let names: Vec<_> = testcases.iter().map(|tc| tc.full_name()).collect();
/// assert_eq!(names, ["max_connections_1_sleep", "max_connections_2_sleep"]);
/// ```
#[derive(Clone, Debug)]
pub struct TestcaseGenerator {
    group: String,
    configs: IndexMap<String, Vec<String>>,
    workloads: Vec<(String, Workload)>,
}

impl TestcaseGenerator {
    /// Creates a generator for the matrix group `group`.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            configs: IndexMap::new(),
            workloads: Vec::new(),
        }
    }

    /// Appends a candidate value for `key`.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configs.entry(key.into()).or_default().push(value.into());
        self
    }

    /// Replaces the candidate values for `key`.
    pub fn with_configs<V: Into<String>>(
        mut self,
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let key = key.into();
        let values = values.into_iter().map(Into::into).collect();
        if let Some(previous) = self.configs.insert(key.clone(), values) {
            warn!(
                "testcase group `{}`: overwriting candidate values {previous:?} for `{key}`",
                self.group
            );
        }
        self
    }

    /// Adds workloads, each identified by name.
    pub fn with_workloads<N: Into<String>>(
        mut self,
        workloads: impl IntoIterator<Item = (N, Workload)>,
    ) -> Self {
        self.workloads
            .extend(workloads.into_iter().map(|(name, workload)| (name.into(), workload)));
        self
    }

    /// Produces the testcases.
    pub fn generate(&self) -> Result<Vec<Testcase>, GenerateError> {
        if self.workloads.is_empty() {
            return Err(GenerateError::NoWorkloads {
                group: self.group.clone(),
            });
        }

        let mut combinations: Vec<IndexMap<String, String>> = vec![IndexMap::new()];
        for (key, values) in &self.configs {
            combinations = combinations
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |value| {
                        let mut combination = prefix.clone();
                        combination.insert(key.clone(), value.clone());
                        combination
                    })
                })
                .collect();
        }

        let mut testcases = Vec::with_capacity(combinations.len() * self.workloads.len());
        for (index, combination) in combinations.into_iter().enumerate() {
            for (workload_name, workload) in &self.workloads {
                testcases.push(Testcase::new(
                    &self.group,
                    index + 1,
                    workload_name,
                    combination.clone(),
                    workload.clone(),
                ));
            }
        }
        Ok(testcases)
    }
}
