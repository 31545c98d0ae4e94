// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{CommandOutput, LineCallback, RemoteCommand, RemoteTransport, RoleTarget, StreamKind};
use crate::{
    errors::{CommandExecutionError, CommandExecutionErrorKind},
    helpers::tail,
};
use camino::Utf8Path;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::{collections::VecDeque, process::Stdio};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
};
use tracing::trace;

/// The number of trailing stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 10;

/// Options for [`SshTransport`].
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SshConfig {
    /// The `ssh` program.
    pub program: String,

    /// The `scp` program.
    pub scp_program: String,

    /// The user to log in as. If unset, the local ssh configuration decides.
    #[serde(default)]
    pub user: Option<String>,

    /// Extra options passed to both `ssh` and `scp`, before the destination.
    #[serde(default)]
    pub options: Vec<String>,
}

/// Runs remote commands through the local `ssh` and `scp` binaries.
///
/// Child processes are killed when their future is dropped, so a timed out or aborted command
/// never outlives the run.
#[derive(Clone, Debug)]
pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    /// Creates a new transport.
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    fn destination(&self, host: &str) -> String {
        match &self.config.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_owned(),
        }
    }

    fn ssh_command(&self, command: &RemoteCommand) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.options)
            .arg(self.destination(&command.target().host))
            .arg(command.command())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn exit_error(
    command: &RemoteCommand,
    code: Option<i32>,
    stderr_tail: Vec<String>,
) -> CommandExecutionError {
    CommandExecutionError::new(
        command.to_string(),
        CommandExecutionErrorKind::ExitStatus { code, stderr_tail },
    )
}

/// Decodes one line read with `read_until`, dropping the line terminator. Invalid UTF-8 is
/// replaced rather than rejected.
fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_owned)
        .collect()
}

impl RemoteTransport for SshTransport {
    fn run<'a>(
        &'a self,
        command: &'a RemoteCommand,
    ) -> BoxFuture<'a, Result<CommandOutput, CommandExecutionError>> {
        Box::pin(async move {
            trace!("ssh: {command}");
            let output = self.ssh_command(command).output().await.map_err(|error| {
                CommandExecutionError::new(
                    command.to_string(),
                    CommandExecutionErrorKind::Spawn(error),
                )
            })?;
            let stdout = split_lines(&output.stdout);
            let stderr = split_lines(&output.stderr);
            if !output.status.success() {
                return Err(exit_error(
                    command,
                    output.status.code(),
                    tail(&stderr, STDERR_TAIL_LINES),
                ));
            }
            Ok(CommandOutput { stdout, stderr })
        })
    }

    fn run_streaming<'a>(
        &'a self,
        command: &'a RemoteCommand,
        mut on_line: LineCallback,
    ) -> BoxFuture<'a, Result<(), CommandExecutionError>> {
        Box::pin(async move {
            trace!("ssh (streaming): {command}");
            let io_error = |error: std::io::Error| {
                CommandExecutionError::new(command.to_string(), CommandExecutionErrorKind::Io(error))
            };

            let mut child = self.ssh_command(command).spawn().map_err(|error| {
                CommandExecutionError::new(
                    command.to_string(),
                    CommandExecutionErrorKind::Spawn(error),
                )
            })?;
            // Both pipes were requested in ssh_command.
            let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
                return Err(io_error(std::io::Error::other("child pipes unavailable")));
            };
            let mut stdout = BufReader::new(stdout);
            let mut stderr = BufReader::new(stderr);
            let (mut stdout_buf, mut stderr_buf) = (Vec::new(), Vec::new());
            let mut stderr_tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

            // A read_until cancelled by select! leaves its partial line in the buffer.
            let (mut stdout_done, mut stderr_done) = (false, false);
            while !(stdout_done && stderr_done) {
                tokio::select! {
                    read = stdout.read_until(b'\n', &mut stdout_buf), if !stdout_done => {
                        if read.map_err(io_error)? == 0 {
                            stdout_done = true;
                        } else {
                            on_line(StreamKind::Stdout, &decode_line(&stdout_buf));
                            stdout_buf.clear();
                        }
                    }
                    read = stderr.read_until(b'\n', &mut stderr_buf), if !stderr_done => {
                        if read.map_err(io_error)? == 0 {
                            stderr_done = true;
                        } else {
                            let line = decode_line(&stderr_buf);
                            stderr_buf.clear();
                            on_line(StreamKind::Stderr, &line);
                            if stderr_tail.len() == STDERR_TAIL_LINES {
                                stderr_tail.pop_front();
                            }
                            stderr_tail.push_back(line);
                        }
                    }
                }
            }

            let status = child.wait().await.map_err(io_error)?;
            if !status.success() {
                return Err(exit_error(command, status.code(), stderr_tail.into()));
            }
            Ok(())
        })
    }

    fn download<'a>(
        &'a self,
        target: &'a RoleTarget,
        remote_path: &'a str,
        local_path: &'a Utf8Path,
    ) -> BoxFuture<'a, Result<(), CommandExecutionError>> {
        Box::pin(async move {
            let source = format!("{}:{remote_path}", self.destination(&target.host));
            let scp_display = format!("{} {source} {local_path}", self.config.scp_program);
            trace!("scp: {scp_display}");
            let output = Command::new(&self.config.scp_program)
                .args(&self.config.options)
                .arg(&source)
                .arg(local_path.as_str())
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|error| {
                    CommandExecutionError::new(&scp_display, CommandExecutionErrorKind::Spawn(error))
                })?;
            if !output.status.success() {
                let stderr = split_lines(&output.stderr);
                return Err(CommandExecutionError::new(
                    scp_display,
                    CommandExecutionErrorKind::ExitStatus {
                        code: output.status.code(),
                        stderr_tail: tail(&stderr, STDERR_TAIL_LINES),
                    },
                ));
            }
            Ok(())
        })
    }
}
