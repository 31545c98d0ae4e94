// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    errors::Result,
    output::{OutputContext, OutputOpts, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use itertools::Itertools;
use owo_colors::{OwoColorize, Style};
use regress_metadata::{RegressExitCode, TestcaseListSummary, TestcaseSummary};
use regress_runner::{
    build_cache::ShellToolchain,
    cluster::SshTransport,
    config::RegressConfig,
    orchestrator::{OrchestratorBuilder, SUMMARY_FILE},
    reporter::Reporter,
    testcase::Testcase,
};
use std::{
    io::{BufWriter, Write},
    sync::Arc,
};
use supports_color::Stream;
use swrite::{SWrite, swrite};
use tracing::{info, warn};

/// Runs configuration-matrix regression tests against a live cluster.
///
/// Per-invocation settings can be overridden through `REGRESS_<SECTION>__<KEY>` environment
/// variables, e.g. `REGRESS_RUN__ONLY_TESTCASE=keepalive` or `REGRESS_RUN__TESTCASE_LIMIT=3`.
#[derive(Debug, Parser)]
#[command(version, styles = clap_styles::style())]
pub struct RegressApp {
    /// Repository root [default: current directory]
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<Utf8PathBuf>,

    #[command(flatten)]
    config_opts: ConfigOpts,

    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

impl RegressApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code on success.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let root = resolve_root(self.root)?;
        let config = self.config_opts.make_config(&root)?;

        match self.command {
            Command::List { message_format } => {
                let testcases = config.testcases()?;
                let mut stdout = BufWriter::new(std::io::stdout().lock());
                message_format
                    .write(&config, &testcases, output, &mut stdout)
                    .and_then(|()| stdout.flush())
                    .map_err(ExpectedError::write_output)?;
                Ok(RegressExitCode::OK)
            }
            Command::Run => exec_run(&config, output),
            Command::ShowConfig => {
                let mut out = String::new();
                write_config(&config, output, &mut out);
                let mut stdout = std::io::stdout().lock();
                stdout
                    .write_all(out.as_bytes())
                    .and_then(|()| stdout.flush())
                    .map_err(ExpectedError::write_output)?;
                Ok(RegressExitCode::OK)
            }
        }
    }
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: <root>/.config/regress.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn make_config(&self, root: &Utf8Path) -> Result<RegressConfig> {
        Ok(RegressConfig::from_sources(
            root.to_owned(),
            self.config_file.as_deref(),
        )?)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the testcases a run would execute
    ///
    /// Testcases are generated from the [[matrix]] groups of the config, then filtered by
    /// run.only-testcase and run.testcase-limit. Every testcase runs once per context.
    List {
        /// Output format
        #[arg(short = 'T', long, value_enum, default_value_t, value_name = "FMT")]
        message_format: MessageFormatOpts,
    },

    /// Run every testcase under every context and compare the results
    ///
    /// Outputs and a summary.json are written to run.workdir.
    Run,

    /// Show the effective configuration
    ShowConfig,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum MessageFormatOpts {
    #[default]
    Human,
    Json,
    JsonPretty,
}

impl MessageFormatOpts {
    fn write(
        self,
        config: &RegressConfig,
        testcases: &[Testcase],
        output: OutputContext,
        writer: &mut impl Write,
    ) -> std::io::Result<()> {
        match self {
            Self::Human => {
                let mut styles = ListStyles::default();
                if output.color.should_colorize(Stream::Stdout) {
                    styles.colorize();
                }
                let mut out = String::new();
                write_human_list(config, testcases, output.verbose, &styles, &mut out);
                writer.write_all(out.as_bytes())
            }
            Self::Json => {
                serde_json::to_writer(&mut *writer, &list_summary(config, testcases))?;
                writeln!(writer)
            }
            Self::JsonPretty => {
                serde_json::to_writer_pretty(&mut *writer, &list_summary(config, testcases))?;
                writeln!(writer)
            }
        }
    }
}

fn exec_run(config: &RegressConfig, output: OutputContext) -> Result<i32> {
    let testcases = config.testcases()?;
    if testcases.is_empty() {
        return Err(ExpectedError::NoTestcasesRun);
    }

    let transport = Arc::new(SshTransport::new(config.cluster().ssh.clone()));
    let driver = config.build_driver(transport);
    let toolchain = Arc::new(ShellToolchain::new(
        config.source_root(),
        config.toolchain().clone(),
    ));

    let mut reporter = Reporter::new();
    if output.color.should_colorize(Stream::Stderr) {
        reporter.colorize();
    }

    let orchestrator = OrchestratorBuilder::default().build(config, testcases, driver, toolchain)?;
    let summary = orchestrator.execute(|event| reporter.report_event(&event))?;
    info!("run summary written to `{}`", config.workdir().join(SUMMARY_FILE));

    let failed = summary.failed_count();
    if summary.halted {
        Err(ExpectedError::RunHalted { failed })
    } else if failed > 0 {
        Err(ExpectedError::TestcasesFailed { failed })
    } else {
        Ok(RegressExitCode::OK)
    }
}

fn resolve_root(root: Option<Utf8PathBuf>) -> Result<Utf8PathBuf> {
    let root = match root {
        Some(root) => root,
        None => {
            let cwd = std::env::current_dir()
                .map_err(|error| ExpectedError::CurrentDirFailed { error })?;
            Utf8PathBuf::try_from(cwd)
                .map_err(|error| ExpectedError::RootInvalidUtf8 {
                    root: error.into_path_buf(),
                })?
        }
    };
    if !root.is_dir() {
        return Err(ExpectedError::RootInvalid { root });
    }
    Ok(root)
}

fn list_summary(config: &RegressConfig, testcases: &[Testcase]) -> TestcaseListSummary {
    let mut summary = TestcaseListSummary::default();
    summary.testcase_count = testcases.len();
    summary.contexts = config
        .contexts()
        .iter()
        .map(|context| context.name().to_owned())
        .collect();
    summary.testcases = testcases
        .iter()
        .map(|testcase| TestcaseSummary {
            name: testcase.full_name().to_owned(),
            group: testcase.simple_name().to_owned(),
            workload: testcase.workload_name().to_owned(),
            config_changes: testcase
                .config_changes()
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        })
        .collect();
    summary
}

#[derive(Debug, Default)]
struct ListStyles {
    name: Style,
    count: Style,
    field: Style,
}

impl ListStyles {
    fn colorize(&mut self) {
        self.name = Style::new().bold();
        self.count = Style::new().bold();
        self.field = Style::new().cyan();
    }
}

fn write_human_list(
    config: &RegressConfig,
    testcases: &[Testcase],
    verbose: bool,
    styles: &ListStyles,
    out: &mut String,
) {
    let contexts = config.contexts();
    swrite!(
        out,
        "{} testcases x {} contexts ({})\n",
        testcases.len().style(styles.count),
        contexts.len().style(styles.count),
        contexts.iter().map(|context| context.name()).join(", "),
    );
    for testcase in testcases {
        swrite!(out, "    {}\n", testcase.full_name().style(styles.name));
        if verbose {
            for (key, value) in testcase.config_changes() {
                swrite!(out, "        {} = {value}\n", key.style(styles.field));
            }
            swrite!(
                out,
                "        {}: {}\n",
                "command".style(styles.field),
                testcase.workload().build()
            );
        }
    }
}

fn write_config(config: &RegressConfig, output: OutputContext, out: &mut String) {
    let mut styles = ListStyles::default();
    if output.color.should_colorize(Stream::Stdout) {
        styles.colorize();
    }
    if !config.unknown_keys().is_empty() {
        warn!(
            "config contains unknown keys: {}",
            config.unknown_keys().iter().join(", ")
        );
    }

    swrite!(out, "{}: {}\n", "config file".style(styles.field), config.config_file());
    swrite!(out, "{}: {}\n", "work directory".style(styles.field), config.workdir());
    swrite!(out, "{}: {}\n", "source root".style(styles.field), config.source_root());

    swrite!(out, "{}:\n", "contexts".style(styles.field));
    for context in config.contexts() {
        swrite!(
            out,
            "    {} (base {}",
            context.name().style(styles.name),
            context.base_branch()
        );
        if let Some(patch) = context.patch_file() {
            swrite!(out, ", patch {patch}");
        }
        if !context.compile() {
            out.push_str(", not compiled");
        }
        out.push_str(")\n");
    }

    swrite!(out, "{}:\n", "workloads".style(styles.field));
    for (name, workload) in config.workloads() {
        swrite!(
            out,
            "    {} ({:?}, timeout {:?})\n",
            name.style(styles.name),
            workload.kind,
            workload.timeout
        );
    }

    swrite!(out, "{}:\n", "configuration defaults".style(styles.field));
    for (doc, properties) in config.config_defaults().iter() {
        swrite!(out, "    {}:\n", doc.style(styles.name));
        for (key, value) in properties {
            swrite!(out, "        {key} = {value}\n");
        }
    }
}
