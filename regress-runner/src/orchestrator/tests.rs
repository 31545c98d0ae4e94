// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::*;
use crate::{
    errors::{RunError, VerificationError},
    test_helpers::{FakeToolchain, FakeTransport, test_config},
};
use camino::Utf8Path;
use camino_tempfile::Utf8TempDir;
use indoc::indoc;
use pretty_assertions::assert_eq;
use regress_metadata::{RunSummary, TestcaseOutcomeSummary};
use std::{sync::Arc, time::Duration};

const TWO_CONTEXTS: &str = indoc! {r#"
    [run]
    log-flush-grace = "50ms"
    halt-on-failure = false
    cache-artifacts = false
    log-levels = [{ package = "org.example.Shuffle", level = "DEBUG" }]

    [workloads.quick]
    kind = "shell"
    timeout = "5s"

    [[contexts]]
    name = "trunk"

    [[contexts]]
    name = "patched"
    patch-file = "fix.patch"

    [[matrix]]
    name = "threads"
    workloads = ["quick"]
    configs = [{ key = "mapreduce.shuffle.max.threads", values = ["3", "6"] }]
"#};

/// A cluster that reports `level` for every logger and has no workload script.
fn base_cluster(level: &str) -> FakeTransport {
    let transport = FakeTransport::default();
    transport
        .respond(
            "getlevel",
            &["Connecting to nm1:8042", &format!("Effective Level: {level}")],
        )
        .respond(
            "conf-dump",
            &["yarn.nodemanager.disk-health-checker.max-disk-utilization-per-disk-percentage=99.5"],
        )
        .hang("follow", &["daemon started", "Shuffle port 13562"])
        .respond("list-finished", &["application_1700000000000_0002 quick FINISHED"])
        .respond("list-running", &["application_1700000000000_0003 quick RUNNING"])
        .respond("node-list", &["Total Nodes:2", "  nm1:8041  RUNNING", "  nm2:8041  RUNNING"]);
    transport
}

/// A cluster where every step succeeds.
fn healthy_cluster() -> FakeTransport {
    let transport = base_cluster("DEBUG");
    transport.respond_streams(
        "run ",
        &["job finished"],
        &["INFO client: Submitted application application_1700000000000_0002"],
    );
    transport
}

struct Fixture {
    dir: Utf8TempDir,
    transport: Arc<FakeTransport>,
    toolchain: Arc<FakeToolchain>,
    events: Vec<String>,
}

impl Fixture {
    fn workdir(&self) -> camino::Utf8PathBuf {
        self.dir.path().join("target/regress")
    }
}

fn run(
    extra: &str,
    transport: FakeTransport,
    toolchain: impl FnOnce(&Utf8Path) -> FakeToolchain,
) -> (Fixture, Result<RunSummary, RunError>) {
    let (dir, config) = test_config(extra);
    std::fs::write(dir.path().join("fix.patch"), "--- a\n+++ b\n").expect("patch written");

    let transport = Arc::new(transport);
    let toolchain = Arc::new(toolchain(&dir.path().join("src")));
    let testcases = config.testcases().expect("matrix expands");
    let orchestrator = OrchestratorBuilder::default()
        .build(
            &config,
            testcases,
            config.build_driver(transport.clone()),
            toolchain.clone(),
        )
        .expect("orchestrator built");

    let mut events = Vec::new();
    let result = orchestrator.execute(|event| events.push(describe(&event)));
    (
        Fixture {
            dir,
            transport,
            toolchain,
            events,
        },
        result,
    )
}

fn describe(event: &RunEvent<'_>) -> String {
    match event {
        RunEvent::RunStarted {
            context_count,
            testcase_count,
        } => format!("run-started {context_count}x{testcase_count}"),
        RunEvent::ContextStarted { context } => format!("context-started {context}"),
        RunEvent::CompileFinished { outcome, .. } => format!("compiled {outcome:?}"),
        RunEvent::TestcaseStarted { index, testcase, .. } => {
            format!("testcase-started {index} {testcase}")
        }
        RunEvent::TestcaseFinished { result, .. } => format!("testcase-finished {}", result.outcome),
        RunEvent::ContextFinished { context, results } => {
            format!("context-finished {context} {}", results.len())
        }
        RunEvent::Halted { reason } => format!("halted {reason:?}"),
        RunEvent::RunFinished { state, .. } => format!("run-finished {state:?}"),
    }
}

fn workload_runs(transport: &FakeTransport) -> usize {
    transport
        .executed_lines()
        .iter()
        .filter(|line| line.starts_with("run "))
        .count()
}

#[test]
fn full_matrix_passes() {
    let (fixture, result) = run(TWO_CONTEXTS, healthy_cluster(), |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });
    let summary = result.expect("run succeeds");

    assert!(!summary.halted);
    let names: Vec<_> = summary.contexts.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["trunk", "patched"]);
    for context in &summary.contexts {
        assert_eq!(context.results.len(), 2);
        for result in context.results.values() {
            assert_eq!(result.outcome, TestcaseOutcomeSummary::Passed);
            assert_eq!(result.host, "nm1");
        }
    }
    assert_eq!(
        fixture.events,
        [
            "run-started 2x2",
            "context-started trunk",
            "compiled Compiled { cache_key: \"trunk_without_patch\", module_count: 0 }",
            "testcase-started 1 threads_1_quick",
            "testcase-finished passed",
            "testcase-started 2 threads_2_quick",
            "testcase-finished passed",
            "context-finished trunk 2",
            "context-started patched",
            "compiled Compiled { cache_key: \"trunk_fix.patch\", module_count: 0 }",
            "testcase-started 1 threads_1_quick",
            "testcase-finished passed",
            "testcase-started 2 threads_2_quick",
            "testcase-finished passed",
            "context-finished patched 2",
            "run-finished Running",
        ]
    );
    assert_eq!(workload_runs(&fixture.transport), 4);

    let workdir = fixture.workdir();
    assert!(workdir.join(SUMMARY_FILE).is_file());
    let tc_dir = workdir.join("ctx_patched/tc2_threads_2_quick");
    for file in [
        "app_quick.log",
        "restart_nm1_nodemanager.log",
        "nm2_nodemanager_YARN.log",
        "rm1_resourcemanager_YARN.log",
        "healthreport_nm1_8041.txt",
        "initial_config/nm1_mapred-site.xml",
        "testcase_config/nm2_log4j.properties",
        "daemon_log_archives/nodemanager_nm1_daemon.tar.gz",
        "daemon_log_archives/resourcemanager_rm1_daemon.tar.gz",
        "daemon_log_archives/nodemanager_nm1_daemon_extracted/nm1/nodemanager_nm1_daemon.log",
        "app_log_archives/application_1700000000000_0002_nm2.tar.gz",
    ] {
        assert!(tc_dir.join(file).is_file(), "missing `{file}`");
    }
    assert!(workdir.join("ctx_patched/fix.patch").is_file());
    let daemon_log =
        std::fs::read_to_string(tc_dir.join("nm1_nodemanager_YARN.log")).expect("daemon log read");
    assert!(daemon_log.contains("Shuffle port 13562"), "{daemon_log}");
    // Only the client's stderr goes into the app log.
    let app_log = std::fs::read_to_string(tc_dir.join("app_quick.log")).expect("app log read");
    assert_eq!(
        app_log,
        "INFO client: Submitted application application_1700000000000_0002\n"
    );

    let calls = fixture.toolchain.calls();
    assert!(
        calls.iter().any(|call| call.starts_with("apply-patch ") && call.ends_with("fix.patch")),
        "{calls:?}"
    );
}

#[test]
fn testcase_changes_reach_workers_after_defaults() {
    let (fixture, result) = run(TWO_CONTEXTS, healthy_cluster(), |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });
    result.expect("run succeeds");

    let executed = fixture.transport.executed();
    let overlay: Vec<_> = executed
        .iter()
        .filter(|command| command.command().contains("mapreduce.shuffle.max.threads"))
        .map(|command| format!("{} {}", command.target().host, command.command()))
        .collect();
    // Each testcase sets the default first, then its own value on both workers.
    assert_eq!(
        &overlay[..4],
        [
            "rm1 set-conf mapred-site.xml mapreduce.shuffle.max.threads 0",
            "nm1 set-conf mapred-site.xml mapreduce.shuffle.max.threads 0",
            "nm2 set-conf mapred-site.xml mapreduce.shuffle.max.threads 0",
            "nm1 set-conf mapred-site.xml mapreduce.shuffle.max.threads 3",
        ]
    );

    let lines = fixture.transport.executed_lines();
    let first_restart = lines
        .iter()
        .position(|line| line == "restart nodemanager")
        .expect("workers restarted");
    let first_setlevel = lines
        .iter()
        .position(|line| line.starts_with("setlevel "))
        .expect("log levels set");
    assert!(first_restart < first_setlevel);
    assert!(lines.contains(&"force-restart resourcemanager".to_owned()));
}

#[test]
fn failure_halts_the_run() {
    let transport = base_cluster("DEBUG");
    transport.fail("run ", &["job failed"]);
    let extra = TWO_CONTEXTS.replace("halt-on-failure = false", "halt-on-failure = true");
    let (fixture, result) = run(&extra, transport, |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });
    let summary = result.expect("a failed testcase is not a run error");

    assert!(summary.halted);
    assert_eq!(summary.contexts.len(), 1);
    let results = &summary.contexts[0].results;
    assert_eq!(results.len(), 1);
    let result = &results["threads_1_quick"];
    assert_eq!(result.outcome, TestcaseOutcomeSummary::Failed);
    assert_eq!(result.details.as_deref(), Some("Error after 5 seconds"));
    assert_eq!(workload_runs(&fixture.transport), 1);
    assert_eq!(
        &fixture.events[fixture.events.len() - 3..],
        [
            "halted TestcaseFailed",
            "context-finished trunk 1",
            "run-finished Halted",
        ]
    );
    // Failed workloads don't leave an application to inspect.
    assert!(
        !fixture
            .transport
            .executed_lines()
            .iter()
            .any(|line| line.starts_with("list-"))
    );
}

#[test]
fn timeout_halts_the_run() {
    let transport = base_cluster("DEBUG");
    transport.hang_streams("run ", &["progress: map 0%"], &["job submitted"]);
    let extra = TWO_CONTEXTS.replace(r#"timeout = "5s""#, r#"timeout = "100ms""#);
    let (fixture, result) = run(&extra, transport, |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });
    let summary = result.expect("a timed out testcase is not a run error");

    assert!(summary.halted);
    let result = &summary.contexts[0].results["threads_1_quick"];
    assert_eq!(result.outcome, TestcaseOutcomeSummary::Timeout);
    assert_eq!(result.details.as_deref(), Some("Timed out after 0 seconds"));
    assert_eq!(workload_runs(&fixture.transport), 1);

    // The still running application's logs are collected.
    let app_log = fixture
        .workdir()
        .join("ctx_trunk/tc1_threads_1_quick/app_log_archives/application_1700000000000_0003_nm1.tar.gz");
    assert!(app_log.is_file(), "missing `{app_log}`");
    let output = std::fs::read_to_string(
        fixture
            .workdir()
            .join("ctx_trunk/tc1_threads_1_quick/app_quick.log"),
    )
    .expect("app log read");
    assert_eq!(output, "job submitted\n");
}

#[test]
fn differing_contexts_fail_comparison() {
    let transport = base_cluster("DEBUG");
    // Both trunk runs pass, then every patched run fails.
    transport
        .respond("run ", &["ok"])
        .respond("run ", &["ok"])
        .fail("run ", &["broken by patch"]);
    let (fixture, result) = run(TWO_CONTEXTS, transport, |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });

    let err = result.expect_err("results differ");
    assert!(
        matches!(err, RunError::ResultComparison(_)),
        "unexpected error: {err}"
    );
    // The summary is written before the comparison.
    let summary = std::fs::read_to_string(fixture.workdir().join(SUMMARY_FILE))
        .expect("summary written");
    assert!(summary.contains("\"patched\""), "{summary}");
}

#[test]
fn failures_at_different_times_compare_equal() {
    let transport = base_cluster("DEBUG");
    // The trunk run fails at once, the patched run a second later.
    transport
        .fail("run ", &["broken"])
        .fail_after("run ", Duration::from_millis(1100), &["broken"]);
    let extra = TWO_CONTEXTS.replace(r#"values = ["3", "6"]"#, r#"values = ["3"]"#);
    let (_fixture, result) = run(&extra, transport, |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });

    let summary = result.expect("identical failures compare equal");
    for context in &summary.contexts {
        let result = &context.results["threads_1_quick"];
        assert_eq!(result.outcome, TestcaseOutcomeSummary::Failed);
        assert_eq!(result.details.as_deref(), Some("Error after 5 seconds"));
    }
}

#[test]
fn limited_runs_skip_comparison() {
    let transport = base_cluster("DEBUG");
    transport.respond("run ", &["ok"]).fail("run ", &["broken"]);
    let extra = TWO_CONTEXTS.replace("[run]", "[run]\ntestcase-limit = \"1\"");
    let (_fixture, result) = run(&extra, transport, |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });

    let summary = result.expect("comparison is skipped");
    assert_eq!(summary.contexts.len(), 2);
    assert_eq!(
        summary.contexts[1].results["threads_1_quick"].outcome,
        TestcaseOutcomeSummary::Failed
    );
}

#[test]
fn patch_failure_stops_the_run() {
    let (fixture, result) = run(TWO_CONTEXTS, healthy_cluster(), |root| {
        FakeToolchain::new(root)
            .with_branch("trunk")
            .with_failing_patch()
    });

    let err = result.expect_err("patch doesn't apply");
    assert!(
        matches!(&err, RunError::SourceSetup { context, .. } if context == "patched"),
        "unexpected error: {err}"
    );
    // The first context ran completely.
    assert_eq!(workload_runs(&fixture.transport), 2);
    assert!(!fixture.workdir().join(SUMMARY_FILE).exists());
}

const WITH_VERIFICATION: &str = indoc! {r#"
    [run]
    log-flush-grace = "50ms"
    cache-artifacts = false

    [workloads.quick]
    kind = "shell"
    timeout = "5s"

    [[contexts]]
    name = "trunk"
    allow-verification-failure = ALLOW

    [[contexts.verifications]]
    role = "NodeManager"
    text = "SSL handshake done"

    [[matrix]]
    name = "threads"
    workloads = ["quick"]
    configs = [{ key = "mapreduce.shuffle.max.threads", values = ["3"] }]
"#};

#[test]
fn missing_marker_is_fatal() {
    let extra = WITH_VERIFICATION.replace("ALLOW", "false");
    let (_fixture, result) = run(&extra, healthy_cluster(), |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });

    let err = result.expect_err("marker is missing");
    assert!(
        matches!(
            &err,
            RunError::Verification(VerificationError::MarkerNotFound { marker, .. })
                if marker == "SSL handshake done"
        ),
        "unexpected error: {err}"
    );
}

#[test]
fn missing_marker_can_be_allowed() {
    let extra = WITH_VERIFICATION.replace("ALLOW", "true");
    let (_fixture, result) = run(&extra, healthy_cluster(), |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });

    let summary = result.expect("verification failure is allowed");
    assert_eq!(
        summary.contexts[0].results["threads_1_quick"].outcome,
        TestcaseOutcomeSummary::Passed
    );
}

#[test]
fn coordinator_logs_are_verified() {
    let extra = WITH_VERIFICATION
        .replace("ALLOW", "false")
        .replace(r#"role = "NodeManager""#, r#"role = "ResourceManager""#)
        .replace("SSL handshake done", "daemon started");
    let (fixture, result) = run(&extra, healthy_cluster(), |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });

    result.expect("the resource manager log contains the marker");
    let mut follows: Vec<_> = fixture
        .transport
        .executed()
        .iter()
        .filter(|command| command.command().starts_with("follow "))
        .map(|command| command.target().to_string())
        .collect();
    follows.sort();
    // The restart episode follows the workers, the daemon episode follows every role.
    assert_eq!(
        follows,
        [
            "nodemanager@nm1",
            "nodemanager@nm1",
            "nodemanager@nm2",
            "nodemanager@nm2",
            "resourcemanager@rm1",
        ]
    );
}

#[test]
fn log_level_mismatch_is_reported_per_host() {
    let (fixture, result) = run(TWO_CONTEXTS, base_cluster("INFO"), |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });

    let err = result.expect_err("levels don't match");
    let RunError::Verification(VerificationError::LogLevelMismatch { mismatches }) = &err else {
        panic!("unexpected error: {err}");
    };
    let hosts: Vec<_> = mismatches.iter().map(|m| m.host.as_str()).collect();
    assert_eq!(hosts, ["rm1", "nm1", "nm2"]);
    assert_eq!(mismatches[0].actual, "INFO");
    assert_eq!(workload_runs(&fixture.transport), 0);
}

#[test]
fn config_value_mismatch_stops_before_the_workload() {
    let transport = FakeTransport::default();
    transport
        .respond("getlevel", &["Effective Level: DEBUG"])
        .respond("conf-dump", &["yarn.nodemanager.delete.debug-delay-sec=0"])
        .hang("follow", &["daemon started"]);
    let (fixture, result) = run(TWO_CONTEXTS, transport, |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });

    let err = result.expect_err("verified key is missing");
    assert!(
        matches!(
            &err,
            RunError::Verification(VerificationError::ConfigValueMismatch { host, actual: None, .. })
                if host == "nm1"
        ),
        "unexpected error: {err}"
    );
    assert_eq!(workload_runs(&fixture.transport), 0);
}

#[test]
fn invalid_default_is_rejected_before_any_change() {
    let extra = format!(
        "{TWO_CONTEXTS}\n{}",
        indoc! {r#"
            [defaults]
            core-site = [{ key = "hadoop.ssl.hostname.verifier", value = "INVALID" }]
        "#}
    );
    let (fixture, result) = run(&extra, healthy_cluster(), |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });

    let err = result.expect_err("invalid value");
    assert!(
        matches!(err, RunError::ConfigValidation(_)),
        "unexpected error: {err}"
    );
    assert!(
        !fixture
            .transport
            .executed_lines()
            .iter()
            .any(|line| line.starts_with("restart ")),
    );
}

#[test]
fn restart_failures_are_collected() {
    let transport = healthy_cluster();
    transport.fail("restart nodemanager", &["unit not found"]);
    let (_fixture, result) = run(TWO_CONTEXTS, transport, |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });

    let err = result.expect_err("restart fails");
    assert!(
        matches!(&err, RunError::RestartFailed { total: 3, failures } if failures.len() == 2),
        "unexpected error: {err}"
    );
}

#[test]
fn keystores_are_created_on_workers_first() {
    let extra = TWO_CONTEXTS.replace("[run]", "[run]\nsetup-keystores = true");
    let (fixture, result) = run(&extra, healthy_cluster(), |root| {
        FakeToolchain::new(root).with_branch("trunk")
    });
    result.expect("run succeeds");

    let lines = fixture.transport.executed_lines();
    assert_eq!(
        &lines[..2],
        [
            "keystore truststore /home/systest/keystores/truststore.jks",
            "keystore truststore /home/systest/keystores/truststore.jks",
        ]
    );
    assert_eq!(
        lines
            .iter()
            .filter(|line| line.starts_with("keystore "))
            .count(),
        6
    );
}
