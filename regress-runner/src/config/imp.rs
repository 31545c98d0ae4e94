// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{ConfigDefaults, LogLevel, TestcaseLimit};
use crate::{
    cluster::{
        ClusterDriver, CommandTemplates, ConfigDocType, KeystoreSpec, RemoteTransport,
        RoleSelectors, RoleType, SshConfig, Topology,
    },
    errors::{ConfigParseError, ConfigParseErrorKind, GenerateError},
    testcase::{LogVerification, TestContext, Testcase, TestcaseGenerator, Workload, WorkloadKind},
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use indexmap::IndexMap;
use itertools::Itertools;
use serde::Deserialize;
use std::{
    collections::{BTreeSet, HashSet},
    sync::Arc,
    time::Duration,
};
use tracing::warn;

/// Overall configuration for regress.
#[derive(Clone, Debug)]
pub struct RegressConfig {
    root: Utf8PathBuf,
    config_file: Utf8PathBuf,
    inner: RegressConfigDeserialize,
    unknown_keys: BTreeSet<String>,
}

impl RegressConfig {
    /// The default location of the config within the repository root: `.config/regress.toml`.
    pub const CONFIG_PATH: &'static str = ".config/regress.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// Environment configuration uses this prefix, plus a _.
    pub const ENVIRONMENT_PREFIX: &'static str = "REGRESS";

    /// Reads the config from the given file, or if not specified from `.config/regress.toml` in
    /// `root`, then applies environment overrides.
    ///
    /// Relative paths in the config are resolved against `root`.
    pub fn from_sources(
        root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_impl(root.into(), config_file, std::env::vars())
    }

    pub(crate) fn from_sources_impl(
        root: Utf8PathBuf,
        config_file: Option<&Utf8Path>,
        env: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let builder = Self::add_env_overrides(builder, env).map_err(|error| {
            ConfigParseError::new(&config_file, ConfigParseErrorKind::BuildError(Box::new(error)))
        })?;
        let (inner, unknown_keys) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !unknown_keys.is_empty() {
            warn!(
                "ignoring unknown configuration keys in `{config_file}`: {}",
                unknown_keys.iter().join(", ")
            );
        }
        inner
            .validate()
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        Ok(Self {
            root,
            config_file,
            inner,
            unknown_keys,
        })
    }

    /// Returns the repository root the config was read for.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the path of the repository config file, whether or not it exists.
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }

    /// Returns keys that were present in the config but not understood.
    pub fn unknown_keys(&self) -> &BTreeSet<String> {
        &self.unknown_keys
    }

    /// Returns the run policy.
    pub fn run(&self) -> &RunConfig {
        &self.inner.run
    }

    /// Returns the local build toolchain settings.
    pub fn toolchain(&self) -> &ToolchainConfig {
        &self.inner.toolchain
    }

    /// Returns the cluster topology and command templates.
    pub fn cluster(&self) -> &ClusterConfig {
        &self.inner.cluster
    }

    /// Returns the configured workloads, by name.
    pub fn workloads(&self) -> &IndexMap<String, WorkloadConfig> {
        &self.inner.workloads
    }

    /// Returns the configuration keys checked through the config API after every restart.
    pub fn verify_configs(&self) -> &[PropertyEntry] {
        &self.inner.verify_configs
    }

    /// Returns the stores created on worker hosts when `run.setup-keystores` is set.
    pub fn keystores(&self) -> &[KeystoreSpec] {
        &self.inner.keystores
    }

    /// Returns the directory outputs and the build cache are written to.
    pub fn workdir(&self) -> Utf8PathBuf {
        self.root.join(&self.inner.run.workdir)
    }

    /// Returns the root of the source tree that is built.
    pub fn source_root(&self) -> Utf8PathBuf {
        self.root.join(&self.inner.toolchain.source_root)
    }

    /// Returns the contexts, in execution order.
    pub fn contexts(&self) -> Vec<TestContext> {
        let run = &self.inner.run;
        self.inner
            .contexts
            .iter()
            .map(|context| {
                let compile = run.force_compile || context.compile.unwrap_or(run.compile);
                let verifications = context
                    .verifications
                    .iter()
                    .map(|v| LogVerification {
                        role: v.role.clone(),
                        marker: v.text.clone(),
                        inverted: v.inverted,
                    })
                    .collect();
                let mut tc = TestContext::new(&context.name, &context.base_branch)
                    .with_verifications(verifications)
                    .with_compile(compile)
                    .with_allow_verification_failure(context.allow_verification_failure);
                if let Some(patch_file) = &context.patch_file {
                    tc = tc.with_patch_file(self.root.join(patch_file));
                }
                tc
            })
            .collect()
    }

    /// Expands every matrix group into testcases, then applies `only-testcase` and
    /// `testcase-limit`.
    pub fn testcases(&self) -> Result<Vec<Testcase>, GenerateError> {
        let run = &self.inner.run;
        let mut testcases = Vec::new();
        for group in &self.inner.matrix {
            let mut generator = TestcaseGenerator::new(&group.name);
            for candidates in &group.configs {
                generator = generator.with_configs(&candidates.key, &candidates.values);
            }
            let workloads = group
                .workloads
                .as_ref()
                .unwrap_or(&run.default_workloads)
                .iter()
                // Workload names were checked in validate().
                .filter_map(|name| Some((name.clone(), self.build_workload(name)?)));
            testcases.extend(generator.with_workloads(workloads).generate()?);
        }

        if let Some(only) = &run.only_testcase {
            testcases.retain(|tc| tc.simple_name() == only);
            if testcases.is_empty() {
                return Err(GenerateError::OnlyTestcaseNotFound {
                    name: only.clone(),
                    known: self.inner.matrix.iter().map(|g| g.name.clone()).collect(),
                });
            }
        }
        run.testcase_limit.apply(&mut testcases);
        Ok(testcases)
    }

    /// Returns the default configuration pushed before every testcase.
    pub fn config_defaults(&self) -> ConfigDefaults {
        let overrides: IndexMap<_, IndexMap<_, _>> = self
            .inner
            .defaults
            .iter()
            .map(|(doc, entries)| {
                let entries = entries
                    .iter()
                    .map(|entry| (entry.key.clone(), entry.value.clone()))
                    .collect();
                (*doc, entries)
            })
            .collect();
        let defaults = ConfigDefaults::builtin().with_overrides(&overrides);
        if self.inner.run.enable_ssl_debugging {
            defaults.with_ssl_debugging()
        } else {
            defaults
        }
    }

    /// Builds a cluster driver for the configured topology on top of `transport`.
    pub fn build_driver(&self, transport: Arc<dyn RemoteTransport>) -> ClusterDriver {
        let cluster = &self.inner.cluster;
        ClusterDriver::new(
            Topology::new(cluster.services.iter().map(|(service, roles)| {
                (
                    service,
                    roles
                        .iter()
                        .map(|(role, hosts)| (role.clone(), hosts.clone()))
                        .collect::<Vec<_>>(),
                )
            })),
            cluster.roles.clone(),
            cluster.commands.clone(),
            cluster.http_ports.clone(),
            transport,
        )
    }

    fn build_workload(&self, name: &str) -> Option<Workload> {
        let config = self.inner.workloads.get(name)?;
        let install_path = self.inner.cluster.install_path.clone();
        let workload = match config.kind.job() {
            None => Workload::Shell {
                install_path,
                args: config
                    .args
                    .clone()
                    .unwrap_or_else(|| Workload::DEFAULT_SHELL_ARGS.to_owned()),
                queue: config.queue.clone(),
                timeout: config.timeout,
            },
            Some(kind) => Workload::Job {
                kind,
                install_path,
                args: config.args.clone().unwrap_or_else(|| kind.default_args()),
                queue: config.queue.clone(),
                debug: self.inner.run.debug_workloads,
                timeout: config.timeout,
            },
        };
        Some(workload)
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// Applies `REGRESS_<SECTION>__<KEY>` variables as overrides, e.g.
    /// `REGRESS_RUN__HALT_ON_FAILURE=true` for `run.halt-on-failure`.
    ///
    /// Variables without a `__` separator, such as `REGRESS_LOG`, aren't configuration.
    fn add_env_overrides(
        mut builder: ConfigBuilder<DefaultState>,
        env: impl IntoIterator<Item = (String, String)>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let prefix = format!("{}_", Self::ENVIRONMENT_PREFIX);
        for (name, value) in env {
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            if !rest.contains("__") {
                continue;
            }
            let key = rest
                .split("__")
                .map(|segment| segment.to_ascii_lowercase().replace('_', "-"))
                .join(".");
            builder = builder.set_override(key, value)?;
        }
        Ok(builder)
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(RegressConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: RegressConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // The config crate also reports the key: drop it so the path is only shown once.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RegressConfigDeserialize {
    run: RunConfig,
    toolchain: ToolchainConfig,
    cluster: ClusterConfig,
    #[serde(default)]
    workloads: IndexMap<String, WorkloadConfig>,
    #[serde(default)]
    contexts: Vec<ContextConfig>,
    #[serde(default)]
    matrix: Vec<MatrixGroupConfig>,
    #[serde(default)]
    defaults: IndexMap<ConfigDocType, Vec<PropertyEntry>>,
    #[serde(default)]
    verify_configs: Vec<PropertyEntry>,
    #[serde(default)]
    keystores: Vec<KeystoreSpec>,
}

impl RegressConfigDeserialize {
    fn validate(&self) -> Result<(), ConfigParseErrorKind> {
        if self.contexts.is_empty() {
            return Err(ConfigParseErrorKind::NoContexts);
        }
        let mut seen = HashSet::new();
        for context in &self.contexts {
            if !seen.insert(context.name.as_str()) {
                return Err(ConfigParseErrorKind::DuplicateContext(context.name.clone()));
            }
        }

        let mut seen = HashSet::new();
        for group in &self.matrix {
            if !seen.insert(group.name.as_str()) {
                return Err(ConfigParseErrorKind::DuplicateGroup(group.name.clone()));
            }
            let workloads = group
                .workloads
                .as_ref()
                .unwrap_or(&self.run.default_workloads);
            if let Some(unknown) = workloads
                .iter()
                .find(|name| !self.workloads.contains_key(name.as_str()))
            {
                return Err(ConfigParseErrorKind::UnknownWorkload {
                    group: group.name.clone(),
                    workload: unknown.clone(),
                    known: self.workloads.keys().cloned().collect(),
                });
            }
        }
        Ok(())
    }
}

/// Run policy: the `[run]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunConfig {
    /// Where outputs and the build cache are written, relative to the repository root.
    pub workdir: Utf8PathBuf,

    /// Stop the run after a testcase fails.
    pub halt_on_failure: bool,

    /// Stop the run after a testcase times out.
    pub halt_on_timeout: bool,

    /// How many of the generated testcases to run.
    #[serde(default)]
    pub testcase_limit: TestcaseLimit,

    /// Only run testcases of this matrix group.
    #[serde(default)]
    pub only_testcase: Option<String>,

    /// Compile the source tree for every context that doesn't say otherwise.
    pub compile: bool,

    /// Compile even if cached artifacts are available. Implies `compile`.
    pub force_compile: bool,

    /// Copy compiled artifacts into the build cache.
    pub cache_artifacts: bool,

    /// Pack every testcase directory into a `.tar.gz` bundle.
    pub compress_testcase_result: bool,

    /// Extract downloaded application log archives.
    pub decompress_app_logs: bool,

    /// Extract downloaded daemon log archives.
    pub decompress_daemon_logs: bool,

    /// Logger levels set on every role before the workload runs.
    #[serde(default)]
    pub log_levels: Vec<LogLevelEntry>,

    /// Set logger levels through `log4j.properties` instead of at runtime.
    pub permanent_log_levels: bool,

    /// How long log followers keep running after the step they observe has finished.
    #[serde(with = "humantime_serde")]
    pub log_flush_grace: Duration,

    /// The worker host workloads are submitted from. Defaults to the first worker.
    #[serde(default)]
    pub workload_node: Option<String>,

    /// Workloads run by matrix groups that don't list their own.
    pub default_workloads: Vec<String>,

    /// Turn on debug logging inside compute jobs.
    pub debug_workloads: bool,

    /// Turn on SSL handshake debugging in reducers.
    pub enable_ssl_debugging: bool,

    /// Create the configured keystores on worker hosts before the first context.
    pub setup_keystores: bool,
}

/// A logger and the level it is set to.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct LogLevelEntry {
    /// The logger, usually a Java package or class name.
    pub package: String,

    /// The level.
    pub level: LogLevel,
}

/// A configuration property and its value.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct PropertyEntry {
    /// The property key.
    pub key: String,

    /// The property value.
    pub value: String,
}

/// Local build commands: the `[toolchain]` section.
///
/// Commands are split with shell quoting rules and run without a shell.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ToolchainConfig {
    /// The source tree, relative to the repository root.
    pub source_root: Utf8PathBuf,

    /// Prints the current branch name.
    pub current_branch: String,

    /// Switches to `{branch}`.
    pub switch_branch: String,

    /// Discards local changes before switching branches.
    pub reset: String,

    /// Applies the patch at `{patch}`.
    pub apply_patch: String,

    /// Prints `<module> <artifact path>` for every module changed relative to the base branch.
    pub changed_modules: String,

    /// Builds everything and prints `<module> <artifact path>` for every built module.
    pub compile_all: String,
}

/// The cluster under test: the `[cluster]` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// Hosts, by service and role.
    pub services: IndexMap<String, IndexMap<RoleType, Vec<String>>>,

    /// The role groups regress addresses.
    pub roles: RoleSelectors,

    /// Where the cluster software is installed on every host.
    pub install_path: String,

    /// HTTP ports of the role daemons, for templates that use `{http_port}`.
    #[serde(default)]
    pub http_ports: IndexMap<RoleType, u16>,

    /// Command templates for every cluster operation.
    pub commands: CommandTemplates,

    /// SSH transport options.
    pub ssh: SshConfig,
}

/// A named workload: a `[workloads.<name>]` table.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkloadConfig {
    /// What to run.
    pub kind: WorkloadKind,

    /// Arguments. Each kind has defaults.
    #[serde(default)]
    pub args: Option<String>,

    /// How long the workload may run.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// The queue to submit to.
    #[serde(default)]
    pub queue: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ContextConfig {
    name: String,
    #[serde(default = "default_base_branch")]
    base_branch: String,
    #[serde(default)]
    patch_file: Option<Utf8PathBuf>,
    #[serde(default)]
    compile: Option<bool>,
    #[serde(default)]
    allow_verification_failure: bool,
    #[serde(default)]
    verifications: Vec<VerificationConfig>,
}

fn default_base_branch() -> String {
    "origin/trunk".to_owned()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct VerificationConfig {
    role: RoleType,
    text: String,
    #[serde(default)]
    inverted: bool,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MatrixGroupConfig {
    name: String,
    #[serde(default)]
    workloads: Option<Vec<String>>,
    #[serde(default)]
    configs: Vec<PropertyCandidates>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct PropertyCandidates {
    key: String,
    values: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Selector;
    use camino_tempfile::Utf8TempDir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn load(contents: &str) -> Result<RegressConfig, ConfigParseError> {
        load_with_env(contents, [])
    }

    fn load_with_env<const N: usize>(
        contents: &str,
        env: [(&str, &str); N],
    ) -> Result<RegressConfig, ConfigParseError> {
        let dir = Utf8TempDir::new().expect("temp dir created");
        let config_dir = dir.path().join(".config");
        std::fs::create_dir_all(&config_dir).expect("config dir created");
        std::fs::write(config_dir.join("regress.toml"), contents).expect("config written");
        RegressConfig::from_sources_impl(
            dir.path().to_owned(),
            None,
            env.map(|(k, v)| (k.to_owned(), v.to_owned())),
        )
    }

    #[test]
    fn default_config_is_valid() {
        let config = load("").expect("default config parses");
        assert!(config.unknown_keys().is_empty());
        assert_eq!(config.contexts().len(), 1);

        let testcases = config.testcases().expect("default matrix expands");
        let names: Vec<_> = testcases.iter().map(|tc| tc.full_name()).collect();
        assert_eq!(
            &names[..4],
            [
                "shuffle_max_connections_1_sleep",
                "shuffle_max_connections_1_loadgen",
                "shuffle_max_connections_2_sleep",
                "shuffle_max_connections_2_loadgen",
            ]
        );
        assert_eq!(
            config.cluster().roles.workers,
            "Yarn/NodeManager".parse::<Selector>().unwrap()
        );
    }

    #[test]
    fn contexts_and_matrix_from_repository_file() {
        let config = load(indoc! {r#"
            [run]
            compile = true

            [workloads.quick-pi]
            kind = "pi"
            args = "1 10"
            timeout = "30s"
            queue = "adhoc"

            [[contexts]]
            name = "trunk"

            [[contexts]]
            name = "with patch"
            patch-file = "patches/fix.patch"
            compile = false
            allow-verification-failure = true

            [[contexts.verifications]]
            role = "NodeManager"
            text = "Shuffle port"

            [[matrix]]
            name = "threads"
            workloads = ["quick-pi"]
            configs = [
                { key = "mapreduce.shuffle.max.threads", values = ["3", "6"] },
            ]
        "#})
        .expect("config parses");

        let contexts = config.contexts();
        assert_eq!(contexts[0].name(), "trunk");
        assert_eq!(contexts[0].base_branch(), "origin/trunk");
        assert!(contexts[0].compile());
        assert!(!contexts[1].compile());
        assert!(contexts[1].allow_verification_failure());
        assert_eq!(
            contexts[1].patch_file(),
            Some(config.root().join("patches/fix.patch").as_path())
        );
        assert_eq!(
            contexts[1].verifications(),
            [LogVerification {
                role: RoleType::new("nodemanager"),
                marker: "Shuffle port".to_owned(),
                inverted: false,
            }]
        );

        let testcases = config.testcases().expect("matrix expands");
        let names: Vec<_> = testcases.iter().map(|tc| tc.full_name()).collect();
        assert_eq!(names, ["threads_1_quick-pi", "threads_2_quick-pi"]);
        assert_eq!(
            testcases[1].workload().build(),
            "yarn jar /opt/hadoop/share/hadoop/mapreduce/*hadoop-mapreduce-client-jobclient-*-tests.jar pi \
             -Dmapreduce.job.queuename=adhoc 1 10"
        );
        assert_eq!(testcases[1].workload().timeout(), Duration::from_secs(30));
    }

    #[test]
    fn only_testcase_and_limit() {
        let config = load_with_env(
            indoc! {r#"
                [[contexts]]
                name = "trunk"
            "#},
            [
                ("REGRESS_RUN__ONLY_TESTCASE", "keepalive"),
                ("REGRESS_RUN__TESTCASE_LIMIT", "3"),
                ("REGRESS_LOG", "debug"),
            ],
        )
        .expect("config parses");

        assert!(config.run().testcase_limit.is_limited());
        let testcases = config.testcases().expect("matrix expands");
        let names: Vec<_> = testcases.iter().map(|tc| tc.full_name()).collect();
        assert_eq!(
            names,
            ["keepalive_1_sleep", "keepalive_1_loadgen", "keepalive_2_sleep"]
        );
    }

    #[test]
    fn env_overrides_scalars() {
        let config = load_with_env(
            "",
            [
                ("REGRESS_RUN__HALT_ON_FAILURE", "false"),
                ("REGRESS_RUN__LOG_FLUSH_GRACE", "250ms"),
                ("OTHER_RUN__HALT_ON_TIMEOUT", "false"),
            ],
        )
        .expect("config parses");
        assert!(!config.run().halt_on_failure);
        assert!(config.run().halt_on_timeout);
        assert_eq!(config.run().log_flush_grace, Duration::from_millis(250));
    }

    #[test]
    fn unknown_only_testcase() {
        let config = load_with_env("", [("REGRESS_RUN__ONLY_TESTCASE", "nope")])
            .expect("config parses");
        let err = config.testcases().unwrap_err();
        assert!(
            matches!(&err, GenerateError::OnlyTestcaseNotFound { name, .. } if name == "nope"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn unknown_keys_are_collected() {
        let config = load(indoc! {r#"
            [run]
            halt-on-failure = true
            no-such-setting = 1
        "#})
        .expect("config parses");
        assert_eq!(
            config.unknown_keys().iter().collect::<Vec<_>>(),
            ["run.no-such-setting"]
        );
    }

    #[test]
    fn defaults_overrides_and_ssl_debugging() {
        let config = load(indoc! {r#"
            [run]
            enable-ssl-debugging = true

            [defaults]
            mapred-site = [
                { key = "mapreduce.shuffle.max.connections", value = "20" },
            ]
        "#})
        .expect("config parses");
        let defaults = config.config_defaults();
        let mapred = defaults.get(ConfigDocType::MapredSite).unwrap();
        assert_eq!(mapred["mapreduce.shuffle.max.connections"], "20");
        assert_eq!(mapred["mapred.reduce.child.java.opts"], "-Djavax.net.debug=all");
    }

    #[test]
    fn validation_errors() {
        let duplicate_context = load(indoc! {r#"
            [[contexts]]
            name = "a"
            [[contexts]]
            name = "a"
        "#})
        .unwrap_err();
        assert!(matches!(
            duplicate_context.kind(),
            ConfigParseErrorKind::DuplicateContext(name) if name == "a"
        ));

        let unknown_workload = load(indoc! {r#"
            [[matrix]]
            name = "g"
            workloads = ["missing"]
        "#})
        .unwrap_err();
        assert!(matches!(
            unknown_workload.kind(),
            ConfigParseErrorKind::UnknownWorkload { group, workload, .. }
                if group == "g" && workload == "missing"
        ));

        let bad_level = load(indoc! {r#"
            [run]
            log-levels = [{ package = "org.example", level = "LOUD" }]
        "#})
        .unwrap_err();
        let ConfigParseErrorKind::DeserializeError(error) = bad_level.kind() else {
            panic!("expected a deserialize error, found {:?}", bad_level.kind());
        };
        assert_eq!(error.path().to_string(), "run.log-levels[0].level");
    }
}
