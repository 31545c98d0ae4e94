// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted in-memory stand-ins for the cluster and the build toolchain.

use crate::{
    build_cache::BuildToolchain,
    cluster::{
        ClusterDriver, CommandOutput, LineCallback, RemoteCommand, RemoteTransport, RoleTarget,
        StreamKind,
    },
    config::RegressConfig,
    errors::{CommandExecutionError, CommandExecutionErrorKind, ToolchainError},
};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use flate2::{Compression, write::GzEncoder};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use std::{
    collections::VecDeque,
    fs,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Cluster settings used by every test: one resource manager and two node managers, with
/// short, predictable command templates.
pub(crate) const TEST_CLUSTER_CONFIG: &str = r#"
[cluster]
install-path = "/opt/hadoop"
http-ports = { resourcemanager = 8088, nodemanager = 8042 }

[cluster.services.yarn]
resourcemanager = ["rm1"]
nodemanager = ["nm1", "nm2"]

[cluster.roles]
all = "Yarn"
workers = "Yarn/NodeManager"
coordinator = "Yarn/ResourceManager"

[cluster.commands]
restart = "restart {role}"
force-restart = "force-restart {role}"
follow-logs = "follow {role}"
set-log-level = "setlevel {host}:{http_port} {package} {level}"
get-log-level = "getlevel {host}:{http_port} {package}"
run-workload = "run {command}"
running-apps = "list-running"
finished-apps = "list-finished"
compress-app-logs = "compress-app {app_id}"
app-log-archive = "/tmp/{app_id}_{host}.tar.gz"
compress-daemon-logs = "compress-daemon"
daemon-log-archive = "/tmp/{role}_{host}_daemon.tar.gz"
node-list = "node-list"
node-status = "node-status {node_id}"
get-config = "get-conf {doc_file}"
backup-config = "backup {doc_file}"
update-config = "set-conf {doc_file} {key} {value}"
config-api = "conf-dump {host}"
generate-keystore = "keystore {store_type} {path}"
"#;

/// Loads [`TEST_CLUSTER_CONFIG`] followed by `extra` as the repository config of a fresh
/// temporary root.
///
/// The temporary directory must outlive the config.
pub(crate) fn test_config(extra: &str) -> (Utf8TempDir, RegressConfig) {
    let dir = Utf8TempDir::new().expect("temp dir created");
    let config_dir = dir.path().join(".config");
    fs::create_dir_all(&config_dir).expect("config dir created");
    fs::write(
        config_dir.join("regress.toml"),
        format!("{TEST_CLUSTER_CONFIG}\n{extra}"),
    )
    .expect("config written");
    let config = RegressConfig::from_sources_impl(dir.path().to_owned(), None, std::iter::empty())
        .expect("test config is valid");
    (dir, config)
}

/// Builds a driver for the test cluster on top of `transport`.
pub(crate) fn test_driver(transport: FakeTransport) -> (ClusterDriver, Arc<FakeTransport>) {
    let (_dir, config) = test_config("");
    let transport = Arc::new(transport);
    let driver = config.build_driver(transport.clone());
    (driver, transport)
}

#[derive(Clone, Debug)]
struct Script {
    stdout: Vec<String>,
    stderr: Vec<String>,
    // Applied after the output is printed.
    delay: Duration,
    end: ScriptEnd,
}

#[derive(Clone, Copy, Debug)]
enum ScriptEnd {
    Exit,
    Fail,
    Hang,
}

impl Script {
    fn new(stdout: &[&str], stderr: &[&str], end: ScriptEnd) -> Self {
        Self {
            stdout: to_lines(stdout),
            stderr: to_lines(stderr),
            delay: Duration::ZERO,
            end,
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    // Prefix -> responses. The longest matching prefix wins.
    scripts: Vec<(String, VecDeque<Script>)>,
    executed: Vec<RemoteCommand>,
    downloads: Vec<(RoleTarget, String)>,
}

/// A [`RemoteTransport`] answering commands from scripts matched by command prefix.
///
/// Registering several responses for the same prefix makes a sequence: each call consumes
/// one response, and the last one repeats. Unmatched commands succeed with no output.
/// Downloads write a small `.tar.gz` containing `<host>/<file>.log`.
#[derive(Debug, Default)]
pub(crate) struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    /// Commands starting with `prefix` succeed, printing `stdout`.
    pub(crate) fn respond(&self, prefix: &str, stdout: &[&str]) -> &Self {
        self.push(prefix, Script::new(stdout, &[], ScriptEnd::Exit))
    }

    /// Commands starting with `prefix` succeed, printing `stdout` and then `stderr`.
    pub(crate) fn respond_streams(&self, prefix: &str, stdout: &[&str], stderr: &[&str]) -> &Self {
        self.push(prefix, Script::new(stdout, stderr, ScriptEnd::Exit))
    }

    /// Commands starting with `prefix` exit with status 1, printing `stderr`.
    pub(crate) fn fail(&self, prefix: &str, stderr: &[&str]) -> &Self {
        self.fail_after(prefix, Duration::ZERO, stderr)
    }

    /// Like [`Self::fail`], but the command runs for `delay` before exiting.
    pub(crate) fn fail_after(&self, prefix: &str, delay: Duration, stderr: &[&str]) -> &Self {
        let mut script = Script::new(&[], stderr, ScriptEnd::Fail);
        script.delay = delay;
        self.push(prefix, script)
    }

    /// Commands starting with `prefix` print `stdout`, then never exit.
    pub(crate) fn hang(&self, prefix: &str, stdout: &[&str]) -> &Self {
        self.push(prefix, Script::new(stdout, &[], ScriptEnd::Hang))
    }

    /// Commands starting with `prefix` print `stdout` and then `stderr`, then never exit.
    pub(crate) fn hang_streams(&self, prefix: &str, stdout: &[&str], stderr: &[&str]) -> &Self {
        self.push(prefix, Script::new(stdout, stderr, ScriptEnd::Hang))
    }

    /// Every command run so far, streaming or not, in order.
    pub(crate) fn executed(&self) -> Vec<RemoteCommand> {
        self.lock().executed.clone()
    }

    /// Command lines run so far, in order.
    pub(crate) fn executed_lines(&self) -> Vec<String> {
        self.lock()
            .executed
            .iter()
            .map(|command| command.command().to_owned())
            .collect()
    }

    /// Every download so far, as `(target, remote path)`.
    pub(crate) fn downloads(&self) -> Vec<(RoleTarget, String)> {
        self.lock().downloads.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, prefix: &str, script: Script) -> &Self {
        let mut state = self.lock();
        match state.scripts.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, queue)) => queue.push_back(script),
            None => state
                .scripts
                .push((prefix.to_owned(), VecDeque::from([script]))),
        }
        drop(state);
        self
    }

    fn next_script(&self, command: &RemoteCommand) -> Option<Script> {
        let mut state = self.lock();
        state.executed.push(command.clone());
        let (_, queue) = state
            .scripts
            .iter_mut()
            .filter(|(prefix, _)| command.command().starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

fn to_lines(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| (*line).to_owned()).collect()
}

fn exit_error(command: &RemoteCommand, stderr: Vec<String>) -> CommandExecutionError {
    CommandExecutionError::new(
        command.to_string(),
        CommandExecutionErrorKind::ExitStatus {
            code: Some(1),
            stderr_tail: stderr,
        },
    )
}

impl RemoteTransport for FakeTransport {
    fn run<'a>(
        &'a self,
        command: &'a RemoteCommand,
    ) -> BoxFuture<'a, Result<CommandOutput, CommandExecutionError>> {
        Box::pin(async move {
            let Some(script) = self.next_script(command) else {
                return Ok(CommandOutput::default());
            };
            tokio::time::sleep(script.delay).await;
            match script.end {
                ScriptEnd::Exit => Ok(CommandOutput {
                    stdout: script.stdout,
                    stderr: script.stderr,
                }),
                ScriptEnd::Fail => Err(exit_error(command, script.stderr)),
                ScriptEnd::Hang => futures::future::pending().await,
            }
        })
    }

    fn run_streaming<'a>(
        &'a self,
        command: &'a RemoteCommand,
        mut on_line: LineCallback,
    ) -> BoxFuture<'a, Result<(), CommandExecutionError>> {
        Box::pin(async move {
            let Some(script) = self.next_script(command) else {
                return Ok(());
            };
            for line in &script.stdout {
                on_line(StreamKind::Stdout, line);
            }
            for line in &script.stderr {
                on_line(StreamKind::Stderr, line);
            }
            tokio::time::sleep(script.delay).await;
            match script.end {
                ScriptEnd::Exit => Ok(()),
                ScriptEnd::Fail => Err(exit_error(command, script.stderr)),
                ScriptEnd::Hang => futures::future::pending().await,
            }
        })
    }

    fn download<'a>(
        &'a self,
        target: &'a RoleTarget,
        remote_path: &'a str,
        local_path: &'a Utf8Path,
    ) -> BoxFuture<'a, Result<(), CommandExecutionError>> {
        Box::pin(async move {
            self.lock()
                .downloads
                .push((target.clone(), remote_path.to_owned()));
            let file_name = remote_path.rsplit('/').next().unwrap_or(remote_path);
            let stem = file_name.strip_suffix(".tar.gz").unwrap_or(file_name);
            let bytes = small_archive(&format!("{}/{stem}.log", target.host), "log line\n");
            fs::write(local_path, bytes).map_err(|error| {
                CommandExecutionError::new(remote_path, CommandExecutionErrorKind::Io(error))
            })
        })
    }
}

fn small_archive(entry: &str, contents: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, entry, contents.as_bytes())
        .expect("appending to an in-memory archive succeeds");
    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .expect("finishing an in-memory archive succeeds")
}

/// A [`BuildToolchain`] that records calls and "builds" artifacts by writing small files.
#[derive(Debug)]
pub(crate) struct FakeToolchain {
    source_root: Utf8PathBuf,
    branch: Option<String>,
    modules: IndexMap<String, Utf8PathBuf>,
    fail_patch: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeToolchain {
    pub(crate) fn new(source_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            branch: None,
            modules: IndexMap::new(),
            fail_patch: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_branch(mut self, branch: &str) -> Self {
        self.branch = Some(branch.to_owned());
        self
    }

    /// Adds a module whose artifact is at `artifact`, relative to the source root.
    pub(crate) fn with_module(mut self, module: &str, artifact: &str) -> Self {
        self.modules.insert(module.to_owned(), artifact.into());
        self
    }

    /// Makes `apply_patch` fail.
    pub(crate) fn with_failing_patch(mut self) -> Self {
        self.fail_patch = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn record(&self, call: String) {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call);
    }
}

impl BuildToolchain for FakeToolchain {
    fn source_root(&self) -> &Utf8Path {
        &self.source_root
    }

    fn current_branch(&self) -> Result<String, ToolchainError> {
        self.record("current-branch".to_owned());
        self.branch.clone().ok_or_else(|| ToolchainError::Run {
            operation: "current-branch",
            command: "current-branch".to_owned(),
            error: std::io::Error::other("not a repository"),
        })
    }

    fn switch_branch(&self, branch: &str) -> Result<(), ToolchainError> {
        self.record(format!("switch-branch {branch}"));
        Ok(())
    }

    fn apply_patch(&self, patch: &Utf8Path) -> Result<(), ToolchainError> {
        self.record(format!("apply-patch {patch}"));
        if self.fail_patch {
            return Err(ToolchainError::Run {
                operation: "apply-patch",
                command: format!("apply-patch {patch}"),
                error: std::io::Error::other("patch does not apply"),
            });
        }
        Ok(())
    }

    fn changed_modules(&self) -> Result<IndexMap<String, Utf8PathBuf>, ToolchainError> {
        self.record("changed-modules".to_owned());
        Ok(self.modules.clone())
    }

    fn compile_all(&self) -> Result<IndexMap<String, Utf8PathBuf>, ToolchainError> {
        self.record("compile-all".to_owned());
        for artifact in self.modules.values() {
            let path = self.source_root.join(artifact);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).expect("artifact dir created");
            }
            fs::write(&path, "built").expect("artifact written");
        }
        Ok(self.modules.clone())
    }
}
