// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ExecutionState, HaltReason, RunEvent};
use crate::{
    build_cache::{BuildCache, BuildCacheOptions, BuildToolchain},
    cluster::{
        ClusterConfigApi, ClusterDriver, CommandOutput, ConfigDocType, ConfigUpdate, KeystoreSpec,
        LineCallback, RemoteCommand, RoleTarget, Selector, StreamKind, UpdateOptions,
    },
    config::{ConfigDefaults, PropertyEntry, RegressConfig, RunConfig, validate_config_values},
    errors::{
        ClusterError, CommandTimeoutError, LogLevelMismatch, RunError, ToolchainError,
        VerificationError,
    },
    log_collector::{LogBuffer, LogCollector},
    output::{OutputCategory, OutputRegistry, OutputWriter},
    results::{ResultStore, TestcaseOutcome, TestcaseResult},
    testcase::{TestContext, Testcase},
};
use camino::Utf8PathBuf;
use regress_metadata::RunSummary;
use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::runtime::Runtime;
use tracing::{debug, info, instrument, warn};

/// The summary of a run, written to the work directory.
pub const SUMMARY_FILE: &str = "summary.json";

const RESTART_EPISODE: &str = "restart";
const DAEMON_EPISODE: &str = "daemon";
const EFFECTIVE_LEVEL_PREFIX: &str = "Effective Level:";

const UPDATE_OPTIONS: UpdateOptions = UpdateOptions {
    allow_empty: false,
    backup: true,
};

/// Orchestrator options.
#[derive(Debug, Default)]
pub struct OrchestratorBuilder {
    config_api: Option<Arc<dyn ClusterConfigApi>>,
}

impl OrchestratorBuilder {
    /// Reads and updates configuration documents through `config_api` instead of the cluster
    /// driver.
    pub fn set_config_api(&mut self, config_api: Arc<dyn ClusterConfigApi>) -> &mut Self {
        self.config_api = Some(config_api);
        self
    }

    /// Creates a new orchestrator that runs `testcases` under every context of `config`.
    pub fn build(
        self,
        config: &RegressConfig,
        testcases: Vec<Testcase>,
        driver: ClusterDriver,
        toolchain: Arc<dyn BuildToolchain>,
    ) -> Result<Orchestrator, RunError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("regress-worker")
            .build()
            .map_err(RunError::RuntimeCreate)?;
        let config_api = self
            .config_api
            .unwrap_or_else(|| Arc::new(driver.clone()));

        Ok(Orchestrator {
            inner: OrchestratorInner {
                contexts: config.contexts(),
                testcases,
                run: config.run().clone(),
                defaults: config.config_defaults(),
                verify_configs: config.verify_configs().to_vec(),
                keystores: config.keystores().to_vec(),
                workdir: config.workdir(),
                driver,
                config_api,
                toolchain,
            },
            runtime,
        })
    }
}

/// Runs a regression matrix against the cluster.
///
/// Created using [`OrchestratorBuilder::build`].
#[derive(Debug)]
pub struct Orchestrator {
    inner: OrchestratorInner,
    runtime: Runtime,
}

impl Orchestrator {
    /// Runs every testcase under every context, calling `callback` with progress events.
    ///
    /// A failed or timed out testcase is a normal outcome and doesn't make this return an error;
    /// depending on the halt policy it may stop the run, which is reflected in
    /// [`RunSummary::halted`]. Errors are returned for everything that makes results
    /// meaningless: failed remote steps, failed verifications, missing artifacts, and results
    /// that differ across contexts.
    pub fn execute<F>(self, mut callback: F) -> Result<RunSummary, RunError>
    where
        F: FnMut(RunEvent<'_>),
    {
        let result = self.runtime.block_on(self.inner.execute(&mut callback));
        // Don't wait for log followers that are still winding down.
        self.runtime.shutdown_background();
        result
    }
}

#[derive(Debug)]
struct OrchestratorInner {
    contexts: Vec<TestContext>,
    testcases: Vec<Testcase>,
    run: RunConfig,
    defaults: ConfigDefaults,
    verify_configs: Vec<PropertyEntry>,
    keystores: Vec<KeystoreSpec>,
    workdir: Utf8PathBuf,
    driver: ClusterDriver,
    config_api: Arc<dyn ClusterConfigApi>,
    toolchain: Arc<dyn BuildToolchain>,
}

/// Mutable state of a run.
#[derive(Debug)]
struct RunState {
    execution: ExecutionState,
    results: ResultStore,
    registry: OutputRegistry,
    writer: OutputWriter,
}

impl OrchestratorInner {
    async fn execute<F>(&self, callback: &mut F) -> Result<RunSummary, RunError>
    where
        F: FnMut(RunEvent<'_>),
    {
        callback(RunEvent::RunStarted {
            context_count: self.contexts.len(),
            testcase_count: self.testcases.len(),
        });

        let mut state = RunState {
            execution: ExecutionState::Running,
            results: ResultStore::new(),
            registry: OutputRegistry::new(),
            writer: OutputWriter::new(&self.workdir),
        };
        let build_cache = BuildCache::new(
            &self.workdir,
            self.toolchain.clone(),
            BuildCacheOptions {
                force_compile: self.run.force_compile,
                cache_artifacts: self.run.cache_artifacts,
            },
        );

        if self.run.setup_keystores {
            self.setup_keystores().await?;
        }

        for context in &self.contexts {
            if self.check_halt(&mut state, callback) {
                break;
            }
            self.start_context(&mut state, context)?;
            callback(RunEvent::ContextStarted { context });

            self.setup_branch_and_patch(context)?;
            let outcome = build_cache
                .compile(context)
                .map_err(|error| RunError::Build {
                    context: context.name().to_owned(),
                    error,
                })?;
            callback(RunEvent::CompileFinished {
                context,
                outcome: &outcome,
            });
            self.load_baseline_config().await?;

            for (index, testcase) in self.testcases.iter().enumerate() {
                if self.check_halt(&mut state, callback) {
                    break;
                }
                let index = index + 1;
                callback(RunEvent::TestcaseStarted {
                    context,
                    index,
                    testcase,
                });
                let result = self
                    .run_testcase(&mut state, context, index, testcase)
                    .await?;
                callback(RunEvent::TestcaseFinished {
                    context,
                    testcase,
                    result: &result,
                });
                state.results.record(testcase.full_name(), result);
            }

            if let Some(results) = state.results.results(context.name()) {
                callback(RunEvent::ContextFinished { context, results });
            }
            if state.execution == ExecutionState::Halted {
                break;
            }
        }

        state.registry.log_listing();
        let halted = state.execution == ExecutionState::Halted;
        let summary = state.results.to_summary(halted);
        self.write_summary(&summary)?;
        callback(RunEvent::RunFinished {
            results: &state.results,
            state: state.execution,
        });

        if halted {
            info!("run was halted, skipping result comparison");
        } else if self.run.testcase_limit.is_limited() {
            info!("testcase limit is set, skipping result comparison");
        } else if let Some(reference) = self.contexts.first() {
            state.results.compare(reference.name())?;
        }
        Ok(summary)
    }

    /// Moves the run to `Halted` if the previous testcase's outcome requires it. Returns true
    /// if the run is halted.
    fn check_halt<F>(&self, state: &mut RunState, callback: &mut F) -> bool
    where
        F: FnMut(RunEvent<'_>),
    {
        if state.execution == ExecutionState::Halted {
            return true;
        }
        let reason = if self.run.halt_on_failure && state.results.is_current_failed() {
            HaltReason::TestcaseFailed
        } else if self.run.halt_on_timeout && state.results.is_current_timed_out() {
            HaltReason::TestcaseTimedOut
        } else {
            return false;
        };
        warn!("halting run: {reason:?}");
        state.execution = ExecutionState::Halted;
        callback(RunEvent::Halted { reason });
        true
    }

    // ---
    // Per-context steps
    // ---

    fn start_context(&self, state: &mut RunState, context: &TestContext) -> Result<(), RunError> {
        info!("starting context `{context}`");
        state.results.start_context(context.name());
        state.writer.start_context(context)?;
        Ok(())
    }

    fn setup_branch_and_patch(&self, context: &TestContext) -> Result<(), RunError> {
        let source_setup = |error: ToolchainError| RunError::SourceSetup {
            context: context.name().to_owned(),
            error,
        };
        self.toolchain
            .switch_branch(context.base_branch())
            .map_err(source_setup)?;
        if let Some(patch) = context.patch_file() {
            info!("applying patch `{patch}`");
            self.toolchain.apply_patch(patch).map_err(source_setup)?;
        }
        Ok(())
    }

    /// Pushes the `yarn-site` defaults to the workers.
    async fn load_baseline_config(&self) -> Result<(), RunError> {
        let Some(yarn_site) = self.defaults.get(ConfigDocType::YarnSite) else {
            return Ok(());
        };
        validate_config_values(ConfigDocType::YarnSite, yarn_site)?;
        let update = ConfigUpdate {
            doc: ConfigDocType::YarnSite,
            properties: yarn_site.clone(),
        };
        self.config_api
            .update_config(&self.driver.roles().workers, &update, UPDATE_OPTIONS)
            .await?;
        Ok(())
    }

    async fn setup_keystores(&self) -> Result<(), RunError> {
        let workers = &self.driver.roles().workers;
        for spec in &self.keystores {
            info!("creating {} `{}` on `{workers}`", spec.store_type, spec.path);
            let commands = self.driver.keystore_commands(workers, spec)?;
            self.run_all_checked(&commands).await?;
        }
        Ok(())
    }

    // ---
    // Per-testcase steps
    // ---

    #[instrument(level = "debug", skip_all, fields(context = %context, testcase = %testcase))]
    async fn run_testcase(
        &self,
        state: &mut RunState,
        context: &TestContext,
        index: usize,
        testcase: &Testcase,
    ) -> Result<TestcaseResult, RunError> {
        let roles = self.driver.roles();
        let grace = self.run.log_flush_grace;

        self.init_testcase(state, context, index, testcase)?;
        self.restart(&roles.all, false).await?;
        self.apply_config(testcase).await?;
        self.write_config_dumps(state, OutputCategory::InitialConfig)
            .await?;
        if self.run.permanent_log_levels {
            self.set_permanent_log_levels().await?;
        }

        let restart_logs = LogCollector::collect(&self.driver, &roles.workers, RESTART_EPISODE)?;
        self.restart(&roles.workers, false).await?;
        let restart_buffer = restart_logs.finish(grace).await;
        state
            .writer
            .write_restart_logs(&mut state.registry, &restart_buffer)?;
        self.restart(&roles.coordinator, true).await?;

        if !self.run.permanent_log_levels {
            // Runtime levels don't survive a restart.
            self.set_transient_log_levels().await?;
        }
        self.verify_log_levels().await?;
        self.verify_configs().await?;

        let daemon_logs = LogCollector::collect(&self.driver, &roles.all, DAEMON_EPISODE)?;
        let result = self.run_workload(state, testcase).await?;
        let app_id = self.application_to_inspect(result.outcome).await?;
        let daemon_buffer = daemon_logs.finish(grace).await;
        self.run_verifications(context, &daemon_buffer)?;

        self.write_results(state, &daemon_buffer, app_id.as_deref(), result.outcome)
            .await?;
        restart_buffer.verify_no_empty_lines()?;
        daemon_buffer.verify_no_empty_lines()?;
        self.finalize(state, index, testcase)?;

        info!("testcase `{testcase}` finished: {result}");
        Ok(result)
    }

    /// Validates configuration, then creates the testcase directory and registers the patch.
    fn init_testcase(
        &self,
        state: &mut RunState,
        context: &TestContext,
        index: usize,
        testcase: &Testcase,
    ) -> Result<(), RunError> {
        for (doc, properties) in self.defaults.iter() {
            validate_config_values(doc, properties)?;
        }
        validate_config_values(ConfigDocType::MapredSite, testcase.config_changes())?;

        info!("starting testcase {index}: `{testcase}`");
        state.writer.start_testcase(index, testcase)?;
        state
            .registry
            .start_testcase(context.name(), testcase.full_name());
        if let Some(patch) = context.patch_file() {
            state.writer.write_patch_file(&mut state.registry, patch)?;
        }
        Ok(())
    }

    /// Restarts every target of `selector` concurrently and waits for all of them.
    async fn restart(&self, selector: &Selector, force: bool) -> Result<(), RunError> {
        let commands = if force {
            self.driver.force_restart_commands(selector)?
        } else {
            self.driver.restart_commands(selector)?
        };
        let total = commands.len();
        let failures: Vec<_> = self
            .driver
            .run_all(&commands)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();
        if !failures.is_empty() {
            return Err(RunError::RestartFailed { total, failures });
        }
        debug!("restarted {total} targets of `{selector}` (force: {force})");
        Ok(())
    }

    /// Pushes every default group, then the testcase's properties into `mapred-site` on the
    /// workers.
    async fn apply_config(&self, testcase: &Testcase) -> Result<(), RunError> {
        let roles = self.driver.roles();
        for (doc, properties) in self.defaults.iter() {
            let update = ConfigUpdate {
                doc,
                properties: properties.clone(),
            };
            self.config_api
                .update_config(&roles.all, &update, UPDATE_OPTIONS)
                .await?;
        }
        if !testcase.config_changes().is_empty() {
            let update = ConfigUpdate {
                doc: ConfigDocType::MapredSite,
                properties: testcase.config_changes().clone(),
            };
            self.config_api
                .update_config(&roles.workers, &update, UPDATE_OPTIONS)
                .await?;
        }
        Ok(())
    }

    async fn write_config_dumps(
        &self,
        state: &mut RunState,
        category: OutputCategory,
    ) -> Result<(), RunError> {
        let workers = &self.driver.roles().workers;
        for doc in ConfigDocType::ALL {
            let dumps = self.config_api.get_config(workers, doc).await?;
            state
                .writer
                .write_config_dumps(&mut state.registry, category, doc, &dumps)?;
        }
        Ok(())
    }

    async fn set_permanent_log_levels(&self) -> Result<(), RunError> {
        if self.run.log_levels.is_empty() {
            return Ok(());
        }
        let update = ConfigUpdate {
            doc: ConfigDocType::Log4jProperties,
            properties: self
                .run
                .log_levels
                .iter()
                .map(|entry| {
                    (
                        format!("log4j.logger.{}", entry.package),
                        entry.level.as_str().to_owned(),
                    )
                })
                .collect(),
        };
        self.config_api
            .update_config(&self.driver.roles().all, &update, UPDATE_OPTIONS)
            .await?;
        Ok(())
    }

    async fn set_transient_log_levels(&self) -> Result<(), RunError> {
        let all = &self.driver.roles().all;
        let mut commands = Vec::new();
        for entry in &self.run.log_levels {
            commands.extend(
                self.driver
                    .set_log_level_commands(all, &entry.package, entry.level)?,
            );
        }
        self.run_all_checked(&commands).await?;
        Ok(())
    }

    /// Queries every (daemon, package) pair concurrently and checks the effective levels.
    async fn verify_log_levels(&self) -> Result<(), RunError> {
        let all = &self.driver.roles().all;
        let mut expected = Vec::new();
        let mut commands = Vec::new();
        for entry in &self.run.log_levels {
            for command in self.driver.get_log_level_commands(all, &entry.package)? {
                expected.push(entry);
                commands.push(command);
            }
        }

        let outputs = self.driver.run_all(&commands).await;
        let mut mismatches = Vec::new();
        for ((entry, command), output) in expected.into_iter().zip(&commands).zip(outputs) {
            let output = output.map_err(ClusterError::from)?;
            let actual = parse_effective_level(command, &output)?;
            if !actual.eq_ignore_ascii_case(entry.level.as_str()) {
                mismatches.push(LogLevelMismatch {
                    host: command.target().host.to_string(),
                    package: entry.package.clone(),
                    expected: entry.level,
                    actual,
                });
            }
        }
        if !mismatches.is_empty() {
            return Err(VerificationError::LogLevelMismatch { mismatches }.into());
        }
        debug!("verified {} log level queries", commands.len());
        Ok(())
    }

    /// Checks through the config API that the verified keys have their expected values.
    async fn verify_configs(&self) -> Result<(), RunError> {
        if self.verify_configs.is_empty() {
            return Ok(());
        }
        let configs = self
            .config_api
            .get_config_from_api(&self.driver.roles().workers)
            .await?;
        for (host, values) in &configs {
            for entry in &self.verify_configs {
                let actual = values.get(&entry.key);
                if actual != Some(&entry.value) {
                    return Err(VerificationError::ConfigValueMismatch {
                        host: host.clone(),
                        key: entry.key.clone(),
                        expected: entry.value.clone(),
                        actual: actual.cloned(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Runs the workload up to its timeout and writes its output to the app log.
    async fn run_workload(
        &self,
        state: &mut RunState,
        testcase: &Testcase,
    ) -> Result<TestcaseResult, RunError> {
        let workload = testcase.workload();
        let timeout = workload.timeout();
        let target = self.workload_target()?;
        let command = self.driver.workload_command(&target, &workload.build());

        let lines = Arc::new(Mutex::new(Vec::new()));
        let on_line: LineCallback = {
            let lines = lines.clone();
            // The app log is the client's stderr, where YARN clients report progress.
            Box::new(move |kind: StreamKind, line: &str| {
                if kind == StreamKind::Stderr {
                    lines
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(line.to_owned());
                }
            })
        };

        info!("running workload `{}` on {target}", testcase.workload_name());
        let run = self.driver.transport().run_streaming(&command, on_line);
        let result = match tokio::time::timeout(timeout, run).await {
            Ok(Ok(())) => TestcaseResult::passed(command.clone()),
            Ok(Err(error)) => {
                warn!("workload `{}` failed: {error}", testcase.workload_name());
                TestcaseResult::failed(command.clone(), timeout)
            }
            Err(_) => {
                warn!("{}", CommandTimeoutError::new(command.to_string(), timeout));
                TestcaseResult::timed_out(command.clone(), timeout)
            }
        };

        let lines = std::mem::take(&mut *lines.lock().unwrap_or_else(PoisonError::into_inner));
        state
            .writer
            .write_app_log(&mut state.registry, testcase.workload_name(), &lines)?;
        Ok(result)
    }

    fn workload_target(&self) -> Result<RoleTarget, ClusterError> {
        let mut targets = self.driver.select(&self.driver.roles().workers)?;
        if let Some(node) = &self.run.workload_node {
            match targets
                .iter()
                .position(|target| target.host.as_str() == node.as_str())
            {
                Some(position) => return Ok(targets.swap_remove(position)),
                None => warn!("workload node `{node}` is not a worker, using the first worker"),
            }
        }
        // select() never returns an empty list.
        Ok(targets.swap_remove(0))
    }

    async fn application_to_inspect(
        &self,
        outcome: TestcaseOutcome,
    ) -> Result<Option<String>, RunError> {
        let app_id = match outcome {
            TestcaseOutcome::Passed => Some(self.driver.latest_finished_app().await?),
            TestcaseOutcome::Timeout => Some(self.driver.latest_running_app().await?),
            TestcaseOutcome::Failed => None,
        };
        Ok(app_id)
    }

    fn run_verifications(
        &self,
        context: &TestContext,
        buffer: &LogBuffer,
    ) -> Result<(), RunError> {
        for verification in context.verifications() {
            if let Err(error) = buffer.search_in_logs(verification) {
                if context.allow_verification_failure() {
                    warn!("ignoring failed log verification in context `{context}`: {error}");
                } else {
                    return Err(error.into());
                }
            }
        }
        Ok(())
    }

    /// Writes and downloads the testcase's result artifacts, then checks they are complete.
    async fn write_results(
        &self,
        state: &mut RunState,
        daemon_buffer: &LogBuffer,
        app_id: Option<&str>,
        outcome: TestcaseOutcome,
    ) -> Result<(), RunError> {
        let roles = self.driver.roles();
        let app = roles.all.service_name().to_uppercase();
        state
            .writer
            .write_daemon_logs(&mut state.registry, daemon_buffer, &app)?;

        if let Some(app_id) = app_id {
            let dir = state.writer.app_log_archive_dir()?;
            let files = self
                .driver
                .download_app_logs(&roles.workers, app_id, &dir)
                .await?;
            state
                .registry
                .register(OutputCategory::AppLogArchives, files, false)?;
        }
        let dir = state.writer.daemon_log_archive_dir()?;
        let files = self.driver.download_daemon_logs(&roles.all, &dir).await?;
        state
            .registry
            .register(OutputCategory::DaemonLogArchives, files, false)?;

        let reports = self.driver.health_reports().await?;
        state
            .writer
            .write_health_reports(&mut state.registry, &reports)?;
        self.write_config_dumps(state, OutputCategory::TestcaseConfig)
            .await?;

        state
            .registry
            .verify(outcome == TestcaseOutcome::Failed)?;
        Ok(())
    }

    fn finalize(&self, state: &mut RunState, index: usize, testcase: &Testcase) -> Result<(), RunError> {
        if self.run.decompress_app_logs {
            state
                .writer
                .extract_archives(&mut state.registry, OutputCategory::AppLogArchives)?;
        }
        if self.run.decompress_daemon_logs {
            state
                .writer
                .extract_archives(&mut state.registry, OutputCategory::DaemonLogArchives)?;
        }
        if self.run.compress_testcase_result {
            state.writer.compress_testcase(index, testcase)?;
        }
        Ok(())
    }

    // ---
    // Helper methods
    // ---

    async fn run_all_checked(&self, commands: &[RemoteCommand]) -> Result<(), ClusterError> {
        for result in self.driver.run_all(commands).await {
            result?;
        }
        Ok(())
    }

    fn write_summary(&self, summary: &RunSummary) -> Result<(), RunError> {
        let path = self.workdir.join(SUMMARY_FILE);
        let summary_write = |error: atomicwrites::Error<io::Error>| RunError::SummaryWrite {
            path: path.clone(),
            error,
        };
        std::fs::create_dir_all(&self.workdir)
            .map_err(|error| summary_write(atomicwrites::Error::Internal(error)))?;
        atomicwrites::AtomicFile::new(&path, atomicwrites::AllowOverwrite)
            .write(|file| serde_json::to_writer_pretty(file, summary).map_err(io::Error::from))
            .map_err(summary_write)?;
        debug!("wrote run summary to `{path}`");
        Ok(())
    }
}

/// Extracts the level from the single `Effective Level: <LEVEL>` line of a query's output.
fn parse_effective_level(
    command: &RemoteCommand,
    output: &CommandOutput,
) -> Result<String, VerificationError> {
    let levels: Vec<&str> = output
        .stdout
        .iter()
        .filter_map(|line| line.split_once(EFFECTIVE_LEVEL_PREFIX))
        .map(|(_, level)| level.trim())
        .collect();
    match levels.as_slice() {
        [level] => Ok((*level).to_owned()),
        _ => Err(VerificationError::LogLevelUnparseable {
            host: command.target().host.to_string(),
            command: command.command().to_owned(),
            output: output.stdout.join("\n"),
        }),
    }
}
