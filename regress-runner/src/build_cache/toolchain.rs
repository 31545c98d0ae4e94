// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{config::ToolchainConfig, errors::ToolchainError, helpers::render_template};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fmt;
use tracing::{debug, trace};

/// The local source tree and the tools that build it.
///
/// Module maps are keyed by module name; artifact paths are either absolute or relative to
/// [`Self::source_root`].
pub trait BuildToolchain: fmt::Debug + Send + Sync {
    /// The root of the source tree.
    fn source_root(&self) -> &Utf8Path;

    /// Returns the name of the checked out branch.
    fn current_branch(&self) -> Result<String, ToolchainError>;

    /// Discards local changes and checks out `branch`.
    fn switch_branch(&self, branch: &str) -> Result<(), ToolchainError>;

    /// Applies the patch at `patch`.
    fn apply_patch(&self, patch: &Utf8Path) -> Result<(), ToolchainError>;

    /// Returns the modules changed on the current branch and the artifact each one builds.
    fn changed_modules(&self) -> Result<IndexMap<String, Utf8PathBuf>, ToolchainError>;

    /// Builds everything and returns the artifact of every built module.
    fn compile_all(&self) -> Result<IndexMap<String, Utf8PathBuf>, ToolchainError>;
}

/// A [`BuildToolchain`] that runs the commands of the `[toolchain]` config section.
///
/// Commands run in the source root, without a shell.
#[derive(Clone, Debug)]
pub struct ShellToolchain {
    source_root: Utf8PathBuf,
    config: ToolchainConfig,
}

impl ShellToolchain {
    /// Creates a toolchain for the source tree at `source_root`.
    pub fn new(source_root: impl Into<Utf8PathBuf>, config: ToolchainConfig) -> Self {
        Self {
            source_root: source_root.into(),
            config,
        }
    }

    fn expression(
        &self,
        operation: &'static str,
        template: &str,
        vars: &[(&str, &str)],
    ) -> Result<(String, duct::Expression), ToolchainError> {
        let command = render_template(template, vars);
        let args = shell_words::split(&command).map_err(|error| ToolchainError::InvalidCommand {
            operation,
            command: command.clone(),
            error,
        })?;
        let Some((program, args)) = args.split_first() else {
            return Err(ToolchainError::EmptyCommand { operation });
        };
        let expression =
            duct::cmd(program.as_str(), args.iter().map(|arg| arg.as_str())).dir(&self.source_root);
        Ok((command, expression))
    }

    fn read(
        &self,
        operation: &'static str,
        template: &str,
        vars: &[(&str, &str)],
    ) -> Result<String, ToolchainError> {
        let (command, expression) = self.expression(operation, template, vars)?;
        trace!("executing {operation} command: {expression:?}");
        expression
            .read()
            .map_err(|error| ToolchainError::Run {
                operation,
                command,
                error,
            })
    }

    fn run(
        &self,
        operation: &'static str,
        template: &str,
        vars: &[(&str, &str)],
    ) -> Result<(), ToolchainError> {
        let (command, expression) = self.expression(operation, template, vars)?;
        debug!("running {operation} command `{command}`");
        expression
            .run()
            .map(|_| ())
            .map_err(|error| ToolchainError::Run {
                operation,
                command,
                error,
            })
    }
}

impl BuildToolchain for ShellToolchain {
    fn source_root(&self) -> &Utf8Path {
        &self.source_root
    }

    fn current_branch(&self) -> Result<String, ToolchainError> {
        let output = self.read("current-branch", &self.config.current_branch, &[])?;
        Ok(output.trim().to_owned())
    }

    fn switch_branch(&self, branch: &str) -> Result<(), ToolchainError> {
        self.run("reset", &self.config.reset, &[])?;
        self.run(
            "switch-branch",
            &self.config.switch_branch,
            &[("branch", branch)],
        )
    }

    fn apply_patch(&self, patch: &Utf8Path) -> Result<(), ToolchainError> {
        self.run(
            "apply-patch",
            &self.config.apply_patch,
            &[("patch", patch.as_str())],
        )
    }

    fn changed_modules(&self) -> Result<IndexMap<String, Utf8PathBuf>, ToolchainError> {
        let output = self.read("changed-modules", &self.config.changed_modules, &[])?;
        parse_module_lines("changed-modules", &output)
    }

    fn compile_all(&self) -> Result<IndexMap<String, Utf8PathBuf>, ToolchainError> {
        let output = self.read("compile-all", &self.config.compile_all, &[])?;
        parse_module_lines("compile-all", &output)
    }
}

/// Parses `<module> <artifact path>` lines, skipping blank ones.
fn parse_module_lines(
    operation: &'static str,
    output: &str,
) -> Result<IndexMap<String, Utf8PathBuf>, ToolchainError> {
    let mut modules = IndexMap::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(module), Some(path), None) => {
                modules.insert(module.to_owned(), Utf8PathBuf::from(path));
            }
            _ => {
                return Err(ToolchainError::UnparseableOutput {
                    operation,
                    line: line.to_owned(),
                });
            }
        }
    }
    Ok(modules)
}
