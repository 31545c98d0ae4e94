// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    ClusterConfigApi, CommandOutput, ConfigDocType, ConfigUpdate, RemoteCommand, RemoteTransport,
    RoleTarget, RoleType, Selector, Topology, UpdateOptions,
};
use crate::{
    config::LogLevel,
    errors::{ClusterError, CommandExecutionError},
    helpers::render_template,
};
use camino::{Utf8Path, Utf8PathBuf};
use futures::future::{BoxFuture, join_all, try_join_all};
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use std::{collections::BTreeMap, sync::Arc, sync::LazyLock};
use tracing::{debug, info, warn};

static APP_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"application_\d+_\d+").expect("app ID regex is valid"));

static NODE_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\S+:\d+)\s").expect("node ID regex is valid"));

/// Command templates for every cluster operation.
///
/// Templates are rendered per target. Every template may use `{host}`, `{role}` and
/// `{http_port}`; the operations that need more document the extra placeholders.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommandTemplates {
    /// Restarts a role.
    pub restart: String,

    /// Restarts a role even if it doesn't stop cleanly.
    pub force_restart: String,

    /// Follows the role's log until killed.
    pub follow_logs: String,

    /// Sets the level of a logger at runtime: `{package}`, `{level}`.
    pub set_log_level: String,

    /// Queries the effective level of a logger: `{package}`. Must print `Effective Level: <LEVEL>`.
    pub get_log_level: String,

    /// Runs a workload: `{command}`.
    pub run_workload: String,

    /// Lists running applications, latest first.
    pub running_apps: String,

    /// Lists finished applications, latest first.
    pub finished_apps: String,

    /// Compresses an application's logs on the host: `{app_id}`.
    pub compress_app_logs: String,

    /// The remote path of the compressed application logs: `{app_id}`.
    pub app_log_archive: String,

    /// Compresses the role's daemon logs on the host.
    pub compress_daemon_logs: String,

    /// The remote path of the compressed daemon logs.
    pub daemon_log_archive: String,

    /// Lists cluster nodes. Lines starting with `<node-host>:<port>` are node IDs.
    pub node_list: String,

    /// Prints the status and health report of a node: `{node_id}`.
    pub node_status: String,

    /// Prints a configuration document: `{doc}`, `{doc_file}`.
    pub get_config: String,

    /// Backs up a configuration document before it's changed: `{doc}`, `{doc_file}`.
    pub backup_config: String,

    /// Sets one property in a configuration document: `{doc}`, `{doc_file}`, `{key}`, `{value}`.
    pub update_config: String,

    /// Prints the daemon's effective configuration as `key=value` lines.
    pub config_api: String,

    /// Creates a keystore or truststore: `{store_type}`, `{path}`, `{password}`, `{format}`.
    pub generate_keystore: String,
}

/// Selectors for the groups of roles regress addresses.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RoleSelectors {
    /// Every role taking part in the test.
    pub all: Selector,

    /// The roles whose behavior is under test, and where workloads run.
    pub workers: Selector,

    /// The role that coordinates the cluster and answers application queries.
    pub coordinator: Selector,
}

/// A keystore or truststore to create on worker hosts before a run.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct KeystoreSpec {
    /// `keystore` or `truststore`.
    pub store_type: String,

    /// The path of the store on the host.
    pub path: String,

    /// The store password.
    pub password: String,

    /// The store format, e.g. `jks`.
    pub format: String,
}

/// Drives the cluster through command templates and a [`RemoteTransport`].
#[derive(Clone, Debug)]
pub struct ClusterDriver {
    topology: Topology,
    roles: RoleSelectors,
    templates: CommandTemplates,
    http_ports: IndexMap<RoleType, u16>,
    transport: Arc<dyn RemoteTransport>,
}

impl ClusterDriver {
    /// Creates a new driver.
    pub fn new(
        topology: Topology,
        roles: RoleSelectors,
        templates: CommandTemplates,
        http_ports: IndexMap<RoleType, u16>,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        Self {
            topology,
            roles,
            templates,
            http_ports,
            transport,
        }
    }

    /// Returns the role selectors.
    pub fn roles(&self) -> &RoleSelectors {
        &self.roles
    }

    /// Returns the transport commands are run through.
    pub fn transport(&self) -> &Arc<dyn RemoteTransport> {
        &self.transport
    }

    /// Resolves a selector to its targets, in topology order.
    pub fn select(&self, selector: &Selector) -> Result<Vec<RoleTarget>, ClusterError> {
        self.topology.resolve(selector)
    }

    // ---
    // Command builders
    // ---

    /// Builds one restart command per target.
    pub fn restart_commands(&self, selector: &Selector) -> Result<Vec<RemoteCommand>, ClusterError> {
        self.per_target(selector, &self.templates.restart, &[])
    }

    /// Builds one forced restart command per target.
    pub fn force_restart_commands(
        &self,
        selector: &Selector,
    ) -> Result<Vec<RemoteCommand>, ClusterError> {
        self.per_target(selector, &self.templates.force_restart, &[])
    }

    /// Builds one log-follow command per target.
    pub fn follow_log_commands(
        &self,
        selector: &Selector,
    ) -> Result<Vec<RemoteCommand>, ClusterError> {
        self.per_target(selector, &self.templates.follow_logs, &[])
    }

    /// Builds one set-log-level command per target.
    pub fn set_log_level_commands(
        &self,
        selector: &Selector,
        package: &str,
        level: LogLevel,
    ) -> Result<Vec<RemoteCommand>, ClusterError> {
        self.per_target(
            selector,
            &self.templates.set_log_level,
            &[("package", package), ("level", level.as_str())],
        )
    }

    /// Builds one get-log-level command per target.
    pub fn get_log_level_commands(
        &self,
        selector: &Selector,
        package: &str,
    ) -> Result<Vec<RemoteCommand>, ClusterError> {
        self.per_target(
            selector,
            &self.templates.get_log_level,
            &[("package", package)],
        )
    }

    /// Builds the command that runs a workload on `target`.
    pub fn workload_command(&self, target: &RoleTarget, command_line: &str) -> RemoteCommand {
        self.render(
            target,
            &self.templates.run_workload,
            &[("command", command_line)],
        )
    }

    /// Builds the commands that create a keystore on every target.
    pub fn keystore_commands(
        &self,
        selector: &Selector,
        spec: &KeystoreSpec,
    ) -> Result<Vec<RemoteCommand>, ClusterError> {
        self.per_target(
            selector,
            &self.templates.generate_keystore,
            &[
                ("store_type", &spec.store_type),
                ("path", &spec.path),
                ("password", &spec.password),
                ("format", &spec.format),
            ],
        )
    }

    // ---
    // Operations
    // ---

    /// Runs all commands concurrently and waits for every one of them.
    ///
    /// Results are returned in the same order as `commands`.
    pub async fn run_all(
        &self,
        commands: &[RemoteCommand],
    ) -> Vec<Result<CommandOutput, CommandExecutionError>> {
        join_all(commands.iter().map(|command| {
            debug!("running `{}` on {}", command.command(), command.target());
            self.transport.run(command)
        }))
        .await
    }

    /// Returns the ID of the most recently started application that is still running.
    pub async fn latest_running_app(&self) -> Result<String, ClusterError> {
        self.latest_app(&self.templates.running_apps, "running")
            .await
    }

    /// Returns the ID of the most recently finished application.
    pub async fn latest_finished_app(&self) -> Result<String, ClusterError> {
        self.latest_app(&self.templates.finished_apps, "finished")
            .await
    }

    async fn latest_app(
        &self,
        template: &str,
        state: &'static str,
    ) -> Result<String, ClusterError> {
        let target = self.coordinator_target()?;
        let command = self.render(&target, template, &[]);
        let output = self.transport.run(&command).await?;
        // The topmost listed application is the latest one.
        let app_id = output
            .stdout
            .iter()
            .find_map(|line| APP_ID_REGEX.find(line))
            .map(|m| m.as_str().to_owned())
            .ok_or(ClusterError::NoApplication { state })?;
        info!("found {state} application: {app_id}");
        Ok(app_id)
    }

    /// Compresses the logs of `app_id` on every target and downloads the archives into `dest`.
    pub async fn download_app_logs(
        &self,
        selector: &Selector,
        app_id: &str,
        dest: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, ClusterError> {
        let vars = [("app_id", app_id)];
        self.compress_and_download(
            selector,
            &self.templates.compress_app_logs,
            &self.templates.app_log_archive,
            &vars,
            dest,
        )
        .await
    }

    /// Compresses the daemon logs of every target and downloads the archives into `dest`.
    pub async fn download_daemon_logs(
        &self,
        selector: &Selector,
        dest: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, ClusterError> {
        self.compress_and_download(
            selector,
            &self.templates.compress_daemon_logs,
            &self.templates.daemon_log_archive,
            &[],
            dest,
        )
        .await
    }

    async fn compress_and_download(
        &self,
        selector: &Selector,
        compress_template: &str,
        archive_template: &str,
        vars: &[(&str, &str)],
        dest: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, ClusterError> {
        let targets = self.select(selector)?;
        let mut files = Vec::with_capacity(targets.len());
        for target in &targets {
            let compress = self.render(target, compress_template, vars);
            self.transport.run(&compress).await?;

            let remote_path = self
                .render(target, archive_template, vars)
                .command()
                .to_owned();
            let file_name = remote_path
                .rsplit('/')
                .next()
                .filter(|name| !name.is_empty())
                .ok_or_else(|| {
                    ClusterError::unexpected_output(
                        remote_path.clone(),
                        "archive path has no file name",
                    )
                })?;
            let local_path = dest.join(file_name);
            debug!("downloading `{remote_path}` from {target} to `{local_path}`");
            self.transport
                .download(target, &remote_path, &local_path)
                .await?;
            files.push(local_path);
        }
        Ok(files)
    }

    /// Fetches the status and health report of every cluster node, keyed by node ID.
    pub async fn health_reports(&self) -> Result<IndexMap<String, Vec<String>>, ClusterError> {
        let target = self.coordinator_target()?;
        let list = self.render(&target, &self.templates.node_list, &[]);
        let output = self.transport.run(&list).await?;
        let node_ids: Vec<String> = output
            .stdout
            .iter()
            .filter_map(|line| NODE_ID_REGEX.captures(line))
            .map(|captures| captures[1].to_owned())
            .collect();

        let mut reports = IndexMap::with_capacity(node_ids.len());
        for node_id in node_ids {
            let status = self.render(
                &target,
                &self.templates.node_status,
                &[("node_id", &node_id)],
            );
            let output = self.transport.run(&status).await?;
            reports.insert(node_id, output.stdout);
        }
        Ok(reports)
    }

    // ---
    // Helper methods
    // ---

    fn coordinator_target(&self) -> Result<RoleTarget, ClusterError> {
        let mut targets = self.select(&self.roles.coordinator)?;
        // resolve() never returns an empty list.
        Ok(targets.swap_remove(0))
    }

    fn per_target(
        &self,
        selector: &Selector,
        template: &str,
        vars: &[(&str, &str)],
    ) -> Result<Vec<RemoteCommand>, ClusterError> {
        Ok(self
            .select(selector)?
            .iter()
            .map(|target| self.render(target, template, vars))
            .collect())
    }

    fn render(&self, target: &RoleTarget, template: &str, vars: &[(&str, &str)]) -> RemoteCommand {
        let http_port = self
            .http_ports
            .get(&target.role)
            .map(|port| port.to_string())
            .unwrap_or_default();
        let mut all_vars = vec![
            ("host", target.host.as_str()),
            ("role", target.role.as_str()),
            ("http_port", http_port.as_str()),
        ];
        all_vars.extend_from_slice(vars);
        RemoteCommand::new(target.clone(), render_template(template, &all_vars))
    }

    fn unique_hosts(&self, selector: &Selector) -> Result<Vec<RoleTarget>, ClusterError> {
        let mut targets = self.select(selector)?;
        let mut seen = std::collections::HashSet::new();
        targets.retain(|target| seen.insert(target.host.clone()));
        Ok(targets)
    }

    async fn update_target(
        &self,
        target: &RoleTarget,
        update: &ConfigUpdate,
        options: UpdateOptions,
    ) -> Result<(), ClusterError> {
        let doc_vars = [
            ("doc", update.doc.as_str()),
            ("doc_file", update.doc.file_name()),
        ];
        if options.backup {
            let backup = self.render(target, &self.templates.backup_config, &doc_vars);
            self.transport.run(&backup).await?;
        }
        for (key, value) in &update.properties {
            if value.is_empty() && !options.allow_empty {
                warn!(
                    "skipping empty value for `{key}` in {} on {}",
                    update.doc, target.host
                );
                continue;
            }
            let key = shell_words::quote(key);
            let value = shell_words::quote(value);
            let mut vars = doc_vars.to_vec();
            vars.push(("key", key.as_ref()));
            vars.push(("value", value.as_ref()));
            let command = self.render(target, &self.templates.update_config, &vars);
            self.transport.run(&command).await?;
        }
        Ok(())
    }
}

impl ClusterConfigApi for ClusterDriver {
    fn get_config<'a>(
        &'a self,
        selector: &'a Selector,
        doc: ConfigDocType,
    ) -> BoxFuture<'a, Result<BTreeMap<String, String>, ClusterError>> {
        Box::pin(async move {
            let targets = self.unique_hosts(selector)?;
            let vars = [("doc", doc.as_str()), ("doc_file", doc.file_name())];
            let commands: Vec<_> = targets
                .iter()
                .map(|target| self.render(target, &self.templates.get_config, &vars))
                .collect();
            let outputs = try_join_all(commands.iter().map(|c| self.transport.run(c))).await?;

            Ok(targets
                .into_iter()
                .zip(outputs)
                .map(|(target, output)| {
                    let mut text = output.stdout.join("\n");
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    (target.host.to_string(), text)
                })
                .collect())
        })
    }

    fn update_config<'a>(
        &'a self,
        selector: &'a Selector,
        update: &'a ConfigUpdate,
        options: UpdateOptions,
    ) -> BoxFuture<'a, Result<(), ClusterError>> {
        Box::pin(async move {
            let targets = self.unique_hosts(selector)?;
            debug!(
                "updating {} properties of {} on {} hosts",
                update.properties.len(),
                update.doc,
                targets.len()
            );
            try_join_all(
                targets
                    .iter()
                    .map(|target| self.update_target(target, update, options)),
            )
            .await?;
            Ok(())
        })
    }

    fn get_config_from_api<'a>(
        &'a self,
        selector: &'a Selector,
    ) -> BoxFuture<'a, Result<BTreeMap<String, BTreeMap<String, String>>, ClusterError>> {
        Box::pin(async move {
            let commands = self.per_target(selector, &self.templates.config_api, &[])?;
            let outputs = try_join_all(commands.iter().map(|c| self.transport.run(c))).await?;

            let mut configs = BTreeMap::new();
            for (command, output) in commands.iter().zip(outputs) {
                configs.insert(
                    command.target().host.to_string(),
                    parse_properties(command, &output.stdout)?,
                );
            }
            Ok(configs)
        })
    }
}

fn parse_properties(
    command: &RemoteCommand,
    lines: &[String],
) -> Result<BTreeMap<String, String>, ClusterError> {
    let mut properties = BTreeMap::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            ClusterError::unexpected_output(
                command.command(),
                format!("expected `key=value`, found `{line}`"),
            )
        })?;
        properties.insert(key.trim().to_owned(), value.trim().to_owned());
    }
    Ok(properties)
}
