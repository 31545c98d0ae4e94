// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by regress.

use crate::{
    cluster::{ConfigDocType, RoleTarget, RoleType, Selector},
    config::LogLevel,
    output::OutputCategory,
};
use camino::Utf8PathBuf;
use config::ConfigError;
use itertools::Itertools;
use std::{borrow::Cow, fmt, time::Duration};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse regress config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing the config.
///
/// Returned by [`ConfigParseError::kind`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// No contexts were defined.
    #[error("at least one context must be defined under [[contexts]]")]
    NoContexts,

    /// Two contexts share a name.
    #[error("context name `{0}` is defined more than once")]
    DuplicateContext(String),

    /// Two matrix groups share a name.
    #[error("matrix group `{0}` is defined more than once")]
    DuplicateGroup(String),

    /// A matrix group refers to a workload that isn't defined.
    #[error(
        "matrix group `{group}` refers to unknown workload `{workload}` (known workloads: {})",
        .known.join(", ")
    )]
    UnknownWorkload {
        /// The matrix group.
        group: String,

        /// The workload that wasn't found.
        workload: String,

        /// The workloads that are defined.
        known: Vec<String>,
    },
}

/// Error returned while parsing a [`TestcaseLimit`](crate::config::TestcaseLimit) value.
#[derive(Clone, Debug, Error)]
#[error("error parsing testcase limit: {message}")]
pub struct TestcaseLimitParseError {
    message: Cow<'static, str>,
}

impl TestcaseLimitParseError {
    pub(crate) fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error returned while parsing a [`LogLevel`] value from a string.
#[derive(Clone, Debug, Error)]
#[error(
    "unrecognized value for log level: {input}\n(known values: {})",
    LogLevel::variants().join(", "),
)]
pub struct LogLevelParseError {
    input: String,
}

impl LogLevelParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}

/// Error returned while parsing a [`Selector`] from a string.
#[derive(Clone, Debug, Error)]
#[error("invalid selector `{input}`: {message}\n(expected `<service>` or `<service>/<role>`)")]
pub struct SelectorParseError {
    input: String,
    message: &'static str,
}

impl SelectorParseError {
    pub(crate) fn new(input: impl Into<String>, message: &'static str) -> Self {
        Self {
            input: input.into(),
            message,
        }
    }
}

/// An error that occurs while expanding matrix groups into testcases.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum GenerateError {
    /// A generator was run without any workloads.
    #[error("no workloads defined for testcase group `{group}`")]
    NoWorkloads {
        /// The testcase group.
        group: String,
    },

    /// `only-testcase` was set, but no testcase group has that name.
    #[error(
        "cannot find any testcase matching name `{name}` (known groups: {})",
        .known.join(", ")
    )]
    OnlyTestcaseNotFound {
        /// The name that was requested.
        name: String,

        /// The testcase groups that exist.
        known: Vec<String>,
    },
}

/// Configuration values that must never be pushed to the cluster were found.
///
/// Raised before any remote mutation takes place.
#[derive(Clone, Debug, Error)]
#[error(
    "invalid configuration entries found for `{doc}`: {}",
    .invalid.iter().map(|(k, v)| format!("{k}={v}")).join(", ")
)]
pub struct ConfigValidationError {
    doc: ConfigDocType,
    invalid: Vec<(String, String)>,
}

impl ConfigValidationError {
    pub(crate) fn new(doc: ConfigDocType, invalid: Vec<(String, String)>) -> Self {
        Self { doc, invalid }
    }

    /// The document type the invalid entries were meant for.
    pub fn doc(&self) -> ConfigDocType {
        self.doc
    }

    /// The invalid `(key, value)` entries.
    pub fn invalid(&self) -> &[(String, String)] {
        &self.invalid
    }
}

/// A local or remote command failed to run to completion.
#[derive(Debug, Error)]
#[error("command `{command}` failed")]
pub struct CommandExecutionError {
    command: String,
    #[source]
    kind: CommandExecutionErrorKind,
}

impl CommandExecutionError {
    pub(crate) fn new(command: impl Into<String>, kind: CommandExecutionErrorKind) -> Self {
        Self {
            command: command.into(),
            kind,
        }
    }

    /// The command that failed.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The reason the command failed.
    pub fn kind(&self) -> &CommandExecutionErrorKind {
        &self.kind
    }
}

/// The reason a command failed.
///
/// Returned by [`CommandExecutionError::kind`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CommandExecutionErrorKind {
    /// The process could not be started.
    #[error("error spawning process")]
    Spawn(#[source] std::io::Error),

    /// An I/O error occurred while reading the process's output.
    #[error("error reading process output")]
    Io(#[source] std::io::Error),

    /// The process exited unsuccessfully.
    #[error("{}{}", DisplayExitCode(.code), DisplayStderrTail(.stderr_tail))]
    ExitStatus {
        /// The exit code, or `None` if the process was killed by a signal.
        code: Option<i32>,

        /// The last few lines of standard error.
        stderr_tail: Vec<String>,
    },
}

struct DisplayExitCode<'a>(&'a Option<i32>);

impl fmt::Display for DisplayExitCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(code) => write!(f, "process exited with code {code}"),
            None => write!(f, "process was terminated by a signal"),
        }
    }
}

struct DisplayStderrTail<'a>(&'a [String]);

impl fmt::Display for DisplayStderrTail<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        write!(f, "\nstderr:")?;
        for line in self.0 {
            write!(f, "\n  {line}")?;
        }
        Ok(())
    }
}

/// A command did not finish within its allotted time.
#[derive(Clone, Debug, Error)]
#[error("command `{command}` timed out after {} seconds", .timeout.as_secs())]
pub struct CommandTimeoutError {
    command: String,
    timeout: Duration,
}

impl CommandTimeoutError {
    pub(crate) fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// The timeout that was exceeded.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// An error produced by a bounded command run: either it failed or it ran out of time.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command failed.
    #[error(transparent)]
    Execution(#[from] CommandExecutionError),

    /// The command timed out.
    #[error(transparent)]
    Timeout(#[from] CommandTimeoutError),
}

/// An error that occurs while talking to the cluster.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClusterError {
    /// A selector doesn't match anything in the configured topology.
    #[error(
        "selector `{selector}` does not match the cluster topology (known: {})",
        .known.join(", ")
    )]
    UnknownSelector {
        /// The selector that was resolved.
        selector: Selector,

        /// Services or roles that are known at that level.
        known: Vec<String>,
    },

    /// A selector matched a role that has no hosts.
    #[error("selector `{selector}` resolved to no hosts")]
    NoTargets {
        /// The selector that was resolved.
        selector: Selector,
    },

    /// A remote command failed.
    #[error("remote command failed on the cluster")]
    Command(#[from] CommandExecutionError),

    /// A remote command produced output that couldn't be understood.
    #[error("unexpected output from `{command}`: {message}")]
    UnexpectedOutput {
        /// The command that was run.
        command: String,

        /// A description of the problem.
        message: Cow<'static, str>,
    },

    /// No application in the given state was found.
    #[error("expected at least one {state} application, found none")]
    NoApplication {
        /// The application state that was queried.
        state: &'static str,
    },
}

impl ClusterError {
    pub(crate) fn unexpected_output(
        command: impl Into<String>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::UnexpectedOutput {
            command: command.into(),
            message: message.into(),
        }
    }
}

/// A log-level query returned a level other than the expected one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogLevelMismatch {
    /// The host that was queried.
    pub host: String,

    /// The logger package.
    pub package: String,

    /// The level that was requested.
    pub expected: LogLevel,

    /// The effective level reported by the daemon.
    pub actual: String,
}

impl fmt::Display for LogLevelMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (expected {}, actual {})",
            self.host, self.package, self.expected, self.actual
        )
    }
}

/// An error that occurs while checking that the cluster behaves as configured.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VerificationError {
    /// A marker that must be present was not found in any log line of the role.
    #[error(
        "marker `{marker}` was not found in any `{role}` log line\n\
         all captured lines for `{role}`:\n{}",
        .lines.join("\n")
    )]
    MarkerNotFound {
        /// The role whose logs were searched.
        role: RoleType,

        /// The marker text.
        marker: String,

        /// Every line captured for the role.
        lines: Vec<String>,
    },

    /// A marker that must be absent was found.
    #[error("forbidden marker `{marker}` found in the log of `{target}`: {line}")]
    ForbiddenMarkerFound {
        /// The role target whose log contained the marker.
        target: RoleTarget,

        /// The marker text.
        marker: String,

        /// The offending line.
        line: String,
    },

    /// Log collection produced no lines for some targets.
    #[error(
        "no {episode} log lines were captured for: {}",
        .targets.iter().join(", ")
    )]
    EmptyLogs {
        /// The collection episode.
        episode: &'static str,

        /// Targets without any lines.
        targets: Vec<RoleTarget>,
    },

    /// One or more daemons report an unexpected log level.
    #[error("unexpected log levels:\n{}", .mismatches.iter().join("\n"))]
    LogLevelMismatch {
        /// The mismatches, in query order.
        mismatches: Vec<LogLevelMismatch>,
    },

    /// The output of a log-level query couldn't be parsed.
    #[error(
        "unexpected log level output on host `{host}`: \
         expected exactly one `Effective Level:` line\ncommand: {command}\noutput:\n{output}"
    )]
    LogLevelUnparseable {
        /// The host that was queried.
        host: String,

        /// The command that was run.
        command: String,

        /// The full output.
        output: String,
    },

    /// A configuration key is not applied on a host.
    #[error(
        "invalid config value on host `{host}`: key `{key}`, expected `{expected}`, actual {}",
        DisplayActualValue(.actual)
    )]
    ConfigValueMismatch {
        /// The host that was queried.
        host: String,

        /// The configuration key.
        key: String,

        /// The expected value.
        expected: String,

        /// The observed value, or `None` if the key is missing.
        actual: Option<String>,
    },
}

struct DisplayActualValue<'a>(&'a Option<String>);

impl fmt::Display for DisplayActualValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(actual) => write!(f, "`{actual}`"),
            None => write!(f, "not found"),
        }
    }
}

/// An output category was registered twice for the same testcase.
#[derive(Clone, Debug, Error)]
#[error("output category `{category}` is already registered for the current testcase")]
pub struct DuplicateOutputError {
    category: OutputCategory,
}

impl DuplicateOutputError {
    pub(crate) fn new(category: OutputCategory) -> Self {
        Self { category }
    }

    /// The category that was registered twice.
    pub fn category(&self) -> OutputCategory {
        self.category
    }
}

/// Required output artifacts are missing for the current testcase.
#[derive(Clone, Debug, Error)]
#[error(
    "expected non-empty outputs for testcase `{testcase}` ({}): missing {}",
    app_state_str(*.app_failed),
    .missing.iter().join(", ")
)]
pub struct OutputCompletenessError {
    testcase: String,
    app_failed: bool,
    missing: Vec<OutputCategory>,
}

fn app_state_str(app_failed: bool) -> &'static str {
    if app_failed {
        "app failed"
    } else {
        "app did not fail"
    }
}

impl OutputCompletenessError {
    pub(crate) fn new(
        testcase: impl Into<String>,
        app_failed: bool,
        missing: Vec<OutputCategory>,
    ) -> Self {
        Self {
            testcase: testcase.into(),
            app_failed,
            missing,
        }
    }

    /// The categories that were empty.
    pub fn missing(&self) -> &[OutputCategory] {
        &self.missing
    }
}

/// Two contexts produced different results.
#[derive(Clone, Debug, Error)]
#[error(
    "different results for contexts\n\
     context 1: `{reference}`, results: {reference_results}\n\
     context 2: `{other}`, results: {other_results}"
)]
pub struct ResultComparisonError {
    reference: String,
    reference_results: String,
    other: String,
    other_results: String,
}

impl ResultComparisonError {
    pub(crate) fn new(
        reference: impl Into<String>,
        reference_results: impl Into<String>,
        other: impl Into<String>,
        other_results: impl Into<String>,
    ) -> Self {
        Self {
            reference: reference.into(),
            reference_results: reference_results.into(),
            other: other.into(),
            other_results: other_results.into(),
        }
    }

    /// The name of the reference context.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// The name of the context that differed.
    pub fn other(&self) -> &str {
        &self.other
    }
}

/// An error that occurs while running the local build toolchain.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolchainError {
    /// A command template couldn't be split into arguments.
    #[error("invalid `{operation}` command `{command}`")]
    InvalidCommand {
        /// The toolchain operation.
        operation: &'static str,

        /// The rendered command.
        command: String,

        /// The underlying error.
        #[source]
        error: shell_words::ParseError,
    },

    /// A command template is empty.
    #[error("`{operation}` command is empty")]
    EmptyCommand {
        /// The toolchain operation.
        operation: &'static str,
    },

    /// Running a toolchain command failed.
    #[error("`{operation}` command `{command}` failed")]
    Run {
        /// The toolchain operation.
        operation: &'static str,

        /// The rendered command.
        command: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A toolchain command produced output that couldn't be parsed.
    #[error("`{operation}` produced an unparseable line: `{line}` (expected `<module> <path>`)")]
    UnparseableOutput {
        /// The toolchain operation.
        operation: &'static str,

        /// The offending line.
        line: String,
    },
}

/// An error that occurs while compiling or caching build artifacts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildCacheError {
    /// The build toolchain failed.
    #[error("build toolchain error")]
    Toolchain(#[from] ToolchainError),

    /// The build cache store couldn't be read.
    #[error("error reading build cache store at `{path}`")]
    StoreRead {
        /// The store path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// The build cache store couldn't be deserialized.
    #[error("error deserializing build cache store at `{path}`")]
    StoreDeserialize {
        /// The store path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// The build cache store couldn't be serialized.
    #[error("error serializing build cache store")]
    StoreSerialize(#[source] serde_json::Error),

    /// The build cache store couldn't be written.
    #[error("error writing build cache store to `{path}`")]
    StoreWrite {
        /// The store path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<std::io::Error>,
    },

    /// The build cache store was written by a newer version and won't be overwritten.
    #[error(
        "build cache store at `{path}` has format version {format_version}, \
         newer than supported version {supported}: refusing to overwrite it"
    )]
    StoreWriteDenied {
        /// The store path.
        path: Utf8PathBuf,

        /// The format version found on disk.
        format_version: u32,

        /// The newest supported format version.
        supported: u32,
    },

    /// A directory in the artifact cache couldn't be created.
    #[error("error creating cache directory `{path}`")]
    CreateDir {
        /// The directory.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A built artifact couldn't be copied into the cache.
    #[error("error copying artifact for module `{module}` from `{from}` to `{to}`")]
    CopyArtifact {
        /// The module the artifact belongs to.
        module: String,

        /// The source path.
        from: Utf8PathBuf,

        /// The destination path.
        to: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },
}

/// An error that occurs while writing an output artifact.
#[derive(Debug, Error)]
#[error("error writing `{path}`")]
pub struct ArtifactWriteError {
    path: Utf8PathBuf,
    #[source]
    error: std::io::Error,
}

impl ArtifactWriteError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, error: std::io::Error) -> Self {
        Self {
            path: path.into(),
            error,
        }
    }

    /// The path that couldn't be written.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

/// An error that occurs while creating or extracting a `.tar.gz` archive.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArchiveError {
    /// Creating an archive failed.
    #[error("error creating archive `{path}`")]
    Create {
        /// The archive path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Extracting an archive failed.
    #[error("error extracting archive `{path}`")]
    Extract {
        /// The archive path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// An archive contained an entry whose path isn't valid UTF-8.
    #[error("archive `{path}` contains a non-UTF-8 entry path")]
    NonUtf8Entry {
        /// The archive path.
        path: Utf8PathBuf,
    },
}

/// An error that occurs while producing the artifacts for a testcase.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OutputError {
    /// Writing a file failed.
    #[error(transparent)]
    Write(#[from] ArtifactWriteError),

    /// Creating or extracting an archive failed.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// An output category was registered twice.
    #[error(transparent)]
    Duplicate(#[from] DuplicateOutputError),

    /// Output was written before a testcase was started.
    #[error("no testcase is active")]
    NoActiveTestcase,
}

/// An error that aborts a regression run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// The async runtime couldn't be created.
    #[error("error creating async runtime")]
    RuntimeCreate(#[source] std::io::Error),

    /// Switching branches or applying a patch failed.
    #[error("error preparing the source tree for context `{context}`")]
    SourceSetup {
        /// The context being prepared.
        context: String,

        /// The underlying error.
        #[source]
        error: ToolchainError,
    },

    /// Compiling or caching artifacts failed.
    #[error("error compiling for context `{context}`")]
    Build {
        /// The context being compiled.
        context: String,

        /// The underlying error.
        #[source]
        error: BuildCacheError,
    },

    /// A configuration value was rejected before being pushed.
    #[error(transparent)]
    ConfigValidation(#[from] ConfigValidationError),

    /// Talking to the cluster failed.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Some role restarts failed.
    #[error(
        "{} of {total} restart commands failed:\n{}",
        .failures.len(),
        .failures.iter().map(|e| format!("  {e}: {}", e.kind())).join("\n")
    )]
    RestartFailed {
        /// The total number of restart commands.
        total: usize,

        /// The commands that failed.
        failures: Vec<CommandExecutionError>,
    },

    /// The cluster did not behave as configured.
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// Writing an artifact failed.
    #[error(transparent)]
    Output(#[from] OutputError),

    /// Required artifacts are missing.
    #[error(transparent)]
    OutputCompleteness(#[from] OutputCompletenessError),

    /// Results differ between contexts.
    #[error(transparent)]
    ResultComparison(#[from] ResultComparisonError),

    /// The run summary couldn't be written.
    #[error("error writing run summary to `{path}`")]
    SummaryWrite {
        /// The summary path.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: atomicwrites::Error<std::io::Error>,
    },
}

impl From<ArtifactWriteError> for RunError {
    fn from(error: ArtifactWriteError) -> Self {
        Self::Output(OutputError::Write(error))
    }
}
