// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::Deserialize;
use std::{fmt, time::Duration};

const SHELL_CLIENT_CLASS: &str = "org.apache.hadoop.yarn.applications.distributedshell.Client";
const SHELL_JAR: &str = "*hadoop-yarn-applications-distributedshell*.jar";
const JOBCLIENT_TESTS_JAR: &str = "*hadoop-mapreduce-client-jobclient-*-tests.jar";

const DEBUG_JVM_SWITCHES: &[&str] = &[
    "-Dmapreduce.reduce.log.level=DEBUG",
    "-Dmapreduce.mapper.log.level=DEBUG",
    "-Dyarn.app.mapreduce.am.log.level=DEBUG",
];

/// The input directory shared by the sort workloads.
pub const SORT_INPUT_DIR: &str = "/user/systest/sortInputDir";

/// The output directory of the sort verification workload.
pub const SORT_OUTPUT_DIR: &str = "/user/systest/sortOutputDir";

/// The kind of a workload, as written in `[workloads.<name>]` tables.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadKind {
    /// A distributed-shell application.
    Shell,

    /// A sleep job.
    Sleep,

    /// A pi estimation job.
    Pi,

    /// A load generation job.
    Loadgen,

    /// A random-writer job producing sort input.
    SortGenerate,

    /// A sort validation job.
    SortVerify,
}

impl WorkloadKind {
    /// Returns the job kind, or `None` for a distributed-shell workload.
    pub fn job(self) -> Option<JobKind> {
        match self {
            Self::Shell => None,
            Self::Sleep => Some(JobKind::Sleep),
            Self::Pi => Some(JobKind::Pi),
            Self::Loadgen => Some(JobKind::Loadgen),
            Self::SortGenerate => Some(JobKind::SortGenerate),
            Self::SortVerify => Some(JobKind::SortVerify),
        }
    }
}

/// The kind of a compute job.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JobKind {
    /// Sleeps in mappers and reducers.
    Sleep,

    /// Estimates pi.
    Pi,

    /// Generates load through mappers and reducers.
    Loadgen,

    /// Writes random data as input for a sort (`randomwriter`).
    SortGenerate,

    /// Sorts the generated data and verifies the result (`testmapredsort`).
    SortVerify,
}

impl JobKind {
    /// The program name passed to the job client jar.
    pub fn program(self) -> &'static str {
        match self {
            Self::Sleep => "sleep",
            Self::Pi => "pi",
            Self::Loadgen => "loadgen",
            Self::SortGenerate => "randomwriter",
            Self::SortVerify => "testmapredsort",
        }
    }

    /// The arguments used when a workload doesn't specify any.
    pub fn default_args(self) -> String {
        match self {
            Self::Sleep => "-m 1 -r 1 -mt 10 -rt 10".to_owned(),
            Self::Pi => "1 1000".to_owned(),
            Self::Loadgen => {
                "-m 4 -r 3 -outKey org.apache.hadoop.io.Text -outValue org.apache.hadoop.io.Text"
                    .to_owned()
            }
            Self::SortGenerate => SORT_INPUT_DIR.to_owned(),
            Self::SortVerify => {
                format!("-sortInput {SORT_INPUT_DIR} -sortOutput {SORT_OUTPUT_DIR}")
            }
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// A command run on the cluster as the subject of a testcase.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Workload {
    /// A distributed-shell application.
    Shell {
        /// Where the cluster's jars are installed.
        install_path: String,

        /// Client arguments, e.g. `-shell_command "sleep 100"`.
        args: String,

        /// The queue to submit to.
        queue: Option<String>,

        /// How long the application may run.
        timeout: Duration,
    },

    /// A compute job from the job client test jar.
    Job {
        /// The job to run.
        kind: JobKind,

        /// Where the cluster's jars are installed.
        install_path: String,

        /// Job arguments.
        args: String,

        /// The queue to submit to.
        queue: Option<String>,

        /// Turns on debug logging in tasks and the application master.
        debug: bool,

        /// How long the job may run.
        timeout: Duration,
    },
}

impl Workload {
    /// The default arguments of a distributed-shell workload.
    pub const DEFAULT_SHELL_ARGS: &'static str = "-shell_command \"sleep 100\"";

    /// Renders the command line that runs this workload.
    pub fn build(&self) -> String {
        match self {
            Self::Shell {
                install_path,
                args,
                queue,
                ..
            } => {
                let mut cmd = format!("yarn {SHELL_CLIENT_CLASS} -jar {install_path}/{SHELL_JAR}");
                push_arg(&mut cmd, args);
                if let Some(queue) = queue {
                    push_arg(&mut cmd, &format!("-queue {queue}"));
                }
                cmd
            }
            Self::Job {
                kind,
                install_path,
                args,
                queue,
                debug,
                ..
            } => {
                let mut cmd = format!(
                    "yarn jar {install_path}/{JOBCLIENT_TESTS_JAR} {}",
                    kind.program()
                );
                if *debug {
                    for switch in DEBUG_JVM_SWITCHES {
                        push_arg(&mut cmd, switch);
                    }
                }
                if let Some(queue) = queue {
                    push_arg(&mut cmd, &format!("-Dmapreduce.job.queuename={queue}"));
                }
                push_arg(&mut cmd, args);
                cmd
            }
        }
    }

    /// How long this workload may run before it counts as timed out.
    pub fn timeout(&self) -> Duration {
        match self {
            Self::Shell { timeout, .. } | Self::Job { timeout, .. } => *timeout,
        }
    }
}

fn push_arg(cmd: &mut String, arg: &str) {
    if !arg.is_empty() {
        cmd.push(' ');
        cmd.push_str(arg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn job(kind: JobKind, queue: Option<&str>, debug: bool) -> Workload {
        Workload::Job {
            kind,
            install_path: "/opt/hadoop".to_owned(),
            args: kind.default_args(),
            queue: queue.map(str::to_owned),
            debug,
            timeout: Duration::from_secs(120),
        }
    }

    #[test_case(
        job(JobKind::Sleep, None, false),
        "yarn jar /opt/hadoop/*hadoop-mapreduce-client-jobclient-*-tests.jar sleep -m 1 -r 1 -mt 10 -rt 10"
        ; "sleep"
    )]
    #[test_case(
        job(JobKind::Pi, Some("prod"), false),
        "yarn jar /opt/hadoop/*hadoop-mapreduce-client-jobclient-*-tests.jar pi \
         -Dmapreduce.job.queuename=prod 1 1000"
        ; "pi with queue"
    )]
    #[test_case(
        job(JobKind::SortVerify, None, true),
        "yarn jar /opt/hadoop/*hadoop-mapreduce-client-jobclient-*-tests.jar testmapredsort \
         -Dmapreduce.reduce.log.level=DEBUG -Dmapreduce.mapper.log.level=DEBUG \
         -Dyarn.app.mapreduce.am.log.level=DEBUG \
         -sortInput /user/systest/sortInputDir -sortOutput /user/systest/sortOutputDir"
        ; "sort verify with debug"
    )]
    #[test_case(
        Workload::Shell {
            install_path: "/opt/hadoop".to_owned(),
            args: Workload::DEFAULT_SHELL_ARGS.to_owned(),
            queue: Some("adhoc".to_owned()),
            timeout: Duration::from_secs(60),
        },
        "yarn org.apache.hadoop.yarn.applications.distributedshell.Client \
         -jar /opt/hadoop/*hadoop-yarn-applications-distributedshell*.jar \
         -shell_command \"sleep 100\" -queue adhoc"
        ; "shell with queue"
    )]
    fn build(workload: Workload, expected: &str) {
        assert_eq!(workload.build(), expected);
    }

    #[test]
    fn kind_deserializes_from_kebab_case() {
        #[derive(Deserialize)]
        struct Helper {
            kind: WorkloadKind,
        }

        let parse = |s: &str| -> WorkloadKind {
            serde_json::from_str::<Helper>(&format!(r#"{{"kind": "{s}"}}"#))
                .unwrap()
                .kind
        };
        assert_eq!(parse("shell").job(), None);
        assert_eq!(parse("sort-generate").job(), Some(JobKind::SortGenerate));
        assert_eq!(parse("loadgen").job(), Some(JobKind::Loadgen));
    }
}
