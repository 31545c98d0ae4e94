// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for `regress`, a runner for configuration-matrix regression tests against
//! live, multi-host clusters.
//!
//! The basic flow is:
//!
//! 1. [`config::RegressConfig`] is read from layered TOML sources.
//! 2. The matrix groups in the config are expanded into [`testcase::Testcase`]s by a
//!    [`testcase::TestcaseGenerator`].
//! 3. An [`orchestrator::Orchestrator`] runs every testcase under every
//!    [`testcase::TestContext`], talking to the cluster through a
//!    [`cluster::ClusterDriver`], caching builds with a [`build_cache::BuildCache`] and tracking
//!    artifacts through an [`output::OutputRegistry`].
//! 4. Results are compared across contexts by the [`results::ResultStore`].

pub mod build_cache;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod helpers;
pub mod log_collector;
pub mod orchestrator;
pub mod output;
pub mod reporter;
pub mod results;
pub mod testcase;
#[cfg(test)]
mod test_helpers;
