// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Access to the cluster under test.
//!
//! Everything regress does on remote hosts goes through two capabilities:
//!
//! * [`RemoteTransport`] runs a command on a single host, either to completion or streaming its
//!   output line by line, and downloads files.
//! * [`ClusterConfigApi`] reads and updates the configuration documents of cluster roles.
//!
//! [`ClusterDriver`] sits on top of a transport: it resolves [`Selector`]s against the configured
//! [`Topology`] and renders every cluster operation from a command template. It also implements
//! [`ClusterConfigApi`], so a single driver is enough for a real run.

mod config_api;
mod driver;
mod selector;
mod ssh;

pub use config_api::*;
pub use driver::*;
pub use selector::*;
pub use ssh::*;

use crate::errors::CommandExecutionError;
use camino::Utf8Path;
use futures::future::BoxFuture;
use std::fmt;

/// A command line addressed to a single role target.
///
/// Equality and hashing are by `(target, command)`: this pair is also the signature used when
/// results are compared across contexts.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RemoteCommand {
    target: RoleTarget,
    command: String,
}

impl RemoteCommand {
    /// Creates a new remote command.
    pub fn new(target: RoleTarget, command: impl Into<String>) -> Self {
        Self {
            target,
            command: command.into(),
        }
    }

    /// The target this command runs on.
    pub fn target(&self) -> &RoleTarget {
        &self.target
    }

    /// The command line.
    pub fn command(&self) -> &str {
        &self.command
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.target, self.command)
    }
}

/// The output of a command that ran to completion.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Standard output, split into lines.
    pub stdout: Vec<String>,

    /// Standard error, split into lines.
    pub stderr: Vec<String>,
}

/// The stream a line of output was read from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamKind {
    /// Standard output.
    Stdout,

    /// Standard error.
    Stderr,
}

/// Called once per line of a streaming command, in the order lines are read.
pub type LineCallback = Box<dyn FnMut(StreamKind, &str) + Send>;

/// Runs commands on cluster hosts.
///
/// Futures returned by this trait must be cancel-safe in one specific sense: dropping a
/// streaming future must stop the remote command. Timeouts and log followers rely on this.
pub trait RemoteTransport: fmt::Debug + Send + Sync {
    /// Runs a command to completion and returns its output.
    ///
    /// A non-zero exit status is an error.
    fn run<'a>(
        &'a self,
        command: &'a RemoteCommand,
    ) -> BoxFuture<'a, Result<CommandOutput, CommandExecutionError>>;

    /// Runs a command, calling `on_line` for every line it prints.
    ///
    /// The future completes when the command exits. A non-zero exit status is an error.
    fn run_streaming<'a>(
        &'a self,
        command: &'a RemoteCommand,
        on_line: LineCallback,
    ) -> BoxFuture<'a, Result<(), CommandExecutionError>>;

    /// Copies `remote_path` on the target's host to `local_path`.
    fn download<'a>(
        &'a self,
        target: &'a RoleTarget,
        remote_path: &'a str,
        local_path: &'a Utf8Path,
    ) -> BoxFuture<'a, Result<(), CommandExecutionError>>;
}
