// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{OutputCategory, OutputRegistry, archive};
use crate::{
    cluster::ConfigDocType,
    errors::{ArtifactWriteError, OutputError},
    helpers::{plural, sanitize_node_id},
    log_collector::LogBuffer,
    testcase::{TestContext, Testcase},
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::{collections::BTreeMap, fs};
use tracing::{debug, info};

const INITIAL_CONFIG_DIR: &str = "initial_config";
const TESTCASE_CONFIG_DIR: &str = "testcase_config";
const APP_LOG_ARCHIVE_DIR: &str = "app_log_archives";
const DAEMON_LOG_ARCHIVE_DIR: &str = "daemon_log_archives";
const RESTART_LOG_PREFIX: &str = "restart";

/// Writes the artifacts of a run below the work directory, and records them in an
/// [`OutputRegistry`].
///
/// The layout is:
///
/// ```text
/// <workdir>/ctx_<context>/<patch file>
/// <workdir>/ctx_<context>/tc<N>_<testcase>/...
/// <workdir>/ctx_<context>/testcase_<NN>_<testcase>.tar.gz
/// ```
#[derive(Clone, Debug)]
pub struct OutputWriter {
    workdir: Utf8PathBuf,
    context_dir: Utf8PathBuf,
    testcase_dir: Utf8PathBuf,
}

impl OutputWriter {
    /// Creates a writer for `workdir`.
    pub fn new(workdir: impl Into<Utf8PathBuf>) -> Self {
        let workdir = workdir.into();
        Self {
            context_dir: workdir.clone(),
            testcase_dir: workdir.clone(),
            workdir,
        }
    }

    /// The directory of the current context.
    pub fn context_dir(&self) -> &Utf8Path {
        &self.context_dir
    }

    /// The directory of the current testcase.
    pub fn testcase_dir(&self) -> &Utf8Path {
        &self.testcase_dir
    }

    /// Creates the directory of `context` and makes it current.
    pub fn start_context(&mut self, context: &TestContext) -> Result<(), ArtifactWriteError> {
        self.context_dir = self.workdir.join(context.dir_name());
        create_dir(&self.context_dir)
    }

    /// Creates the directory `tc<index>_<testcase>` in the context directory and makes it
    /// current.
    pub fn start_testcase(
        &mut self,
        index: usize,
        testcase: &Testcase,
    ) -> Result<(), ArtifactWriteError> {
        self.testcase_dir = self
            .context_dir
            .join(format!("tc{index}_{}", testcase.full_name()));
        create_dir(&self.testcase_dir)
    }

    /// Copies the patch file into the context directory.
    pub fn write_patch_file(
        &self,
        registry: &mut OutputRegistry,
        patch_file: &Utf8Path,
    ) -> Result<(), OutputError> {
        let file_name = patch_file.file_name().unwrap_or("patch");
        let dest = self.context_dir.join(file_name);
        fs::copy(patch_file, &dest).map_err(|error| ArtifactWriteError::new(&dest, error))?;
        registry.register(OutputCategory::PatchFile, vec![dest], false)
    }

    /// Writes one dump of `doc` per host.
    ///
    /// `category` must be [`OutputCategory::InitialConfig`] or
    /// [`OutputCategory::TestcaseConfig`]; each document is registered separately.
    pub fn write_config_dumps(
        &self,
        registry: &mut OutputRegistry,
        category: OutputCategory,
        doc: ConfigDocType,
        dumps: &BTreeMap<String, String>,
    ) -> Result<(), OutputError> {
        let dir = match category {
            OutputCategory::InitialConfig => self.testcase_dir.join(INITIAL_CONFIG_DIR),
            _ => self.testcase_dir.join(TESTCASE_CONFIG_DIR),
        };
        create_dir(&dir)?;
        let mut files = Vec::with_capacity(dumps.len());
        for (host, text) in dumps {
            let path = dir.join(doc.dump_file_name(host));
            write_file(&path, text)?;
            files.push(path);
        }
        registry.register(category, files, true)
    }

    /// Writes the lines of a daemon-log episode to `<host>_<role>_<app>.log`, one file per
    /// target.
    pub fn write_daemon_logs(
        &self,
        registry: &mut OutputRegistry,
        buffer: &LogBuffer,
        app: &str,
    ) -> Result<(), OutputError> {
        let files = self.write_buffer(buffer, |host, role| format!("{host}_{role}_{app}.log"))?;
        registry.register(OutputCategory::DaemonLogs, files, false)
    }

    /// Writes the lines of a restart episode to `restart_<host>_<role>.log`, one file per
    /// target.
    pub fn write_restart_logs(
        &self,
        registry: &mut OutputRegistry,
        buffer: &LogBuffer,
    ) -> Result<(), OutputError> {
        let files = self.write_buffer(buffer, |host, role| {
            format!("{RESTART_LOG_PREFIX}_{host}_{role}.log")
        })?;
        registry.register(OutputCategory::RestartLogs, files, false)
    }

    /// Writes the workload's output to `app_<name>.log`.
    pub fn write_app_log(
        &self,
        registry: &mut OutputRegistry,
        name: &str,
        lines: &[String],
    ) -> Result<(), OutputError> {
        let path = self.testcase_dir.join(format!("app_{name}.log"));
        debug!("writing app log `{path}`");
        write_file(&path, &join_lines(lines))?;
        registry.register(OutputCategory::AppLog, vec![path], false)
    }

    /// Writes one `healthreport_<node>.txt` per node.
    pub fn write_health_reports(
        &self,
        registry: &mut OutputRegistry,
        reports: &IndexMap<String, Vec<String>>,
    ) -> Result<(), OutputError> {
        let mut files = Vec::with_capacity(reports.len());
        for (node_id, lines) in reports {
            let path = self
                .testcase_dir
                .join(format!("healthreport_{}.txt", sanitize_node_id(node_id)));
            write_file(&path, &join_lines(lines))?;
            files.push(path);
        }
        registry.register(OutputCategory::HealthReports, files, false)
    }

    /// Creates and returns the directory application log archives are downloaded to.
    pub fn app_log_archive_dir(&self) -> Result<Utf8PathBuf, ArtifactWriteError> {
        let dir = self.testcase_dir.join(APP_LOG_ARCHIVE_DIR);
        create_dir(&dir)?;
        Ok(dir)
    }

    /// Creates and returns the directory daemon log archives are downloaded to.
    pub fn daemon_log_archive_dir(&self) -> Result<Utf8PathBuf, ArtifactWriteError> {
        let dir = self.testcase_dir.join(DAEMON_LOG_ARCHIVE_DIR);
        create_dir(&dir)?;
        Ok(dir)
    }

    /// Extracts every archive registered under `category` into a directory next to it named
    /// after the archive.
    pub fn extract_archives(
        &self,
        registry: &mut OutputRegistry,
        category: OutputCategory,
    ) -> Result<(), OutputError> {
        let mut extracted = Vec::new();
        for archive_path in registry.get(category) {
            let file_name = archive_path.file_name().unwrap_or("archive");
            let stem = file_name
                .strip_suffix(".tar.gz")
                .or_else(|| file_name.strip_suffix(".tgz"))
                .unwrap_or(file_name);
            let dest = archive_path.with_file_name(format!("{stem}_extracted"));
            debug!("extracting `{archive_path}` to `{dest}`");
            extracted.extend(archive::extract_tar_gz(archive_path, &dest)?);
        }
        debug!(
            "extracted {} {} from {category}",
            extracted.len(),
            plural::files_str(extracted.len())
        );
        registry.register(OutputCategory::ExtractedLogs, extracted, true)
    }

    /// Packs the current testcase directory into `testcase_<NN>_<name>.tar.gz` in the context
    /// directory, and returns the bundle path.
    pub fn compress_testcase(
        &self,
        index: usize,
        testcase: &Testcase,
    ) -> Result<Utf8PathBuf, OutputError> {
        let bundle = self
            .context_dir
            .join(format!("testcase_{index:02}_{}.tar.gz", testcase.full_name()));
        let base_name = self.testcase_dir.file_name().unwrap_or("testcase");
        archive::create_tar_gz(&self.testcase_dir, base_name, &bundle)?;
        info!("testcase outputs packed into `{bundle}`");
        Ok(bundle)
    }

    fn write_buffer(
        &self,
        buffer: &LogBuffer,
        file_name: impl Fn(&str, &str) -> String,
    ) -> Result<Vec<Utf8PathBuf>, ArtifactWriteError> {
        let mut files = Vec::new();
        for (command, lines) in buffer.iter() {
            let target = command.target();
            let path = self
                .testcase_dir
                .join(file_name(target.host.as_str(), target.role.as_str()));
            write_file(&path, &join_lines(lines))?;
            files.push(path);
        }
        Ok(files)
    }
}

fn create_dir(dir: &Utf8Path) -> Result<(), ArtifactWriteError> {
    fs::create_dir_all(dir).map_err(|error| ArtifactWriteError::new(dir, error))
}

fn write_file(path: &Utf8Path, contents: &str) -> Result<(), ArtifactWriteError> {
    fs::write(path, contents).map_err(|error| ArtifactWriteError::new(path, error))
}

fn join_lines(lines: &[String]) -> String {
    let mut out = String::with_capacity(lines.iter().map(|line| line.len() + 1).sum());
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cluster::{RemoteCommand, RoleTarget, RoleType},
        testcase::{JobKind, TestcaseGenerator, Workload},
    };
    use camino_tempfile::Utf8TempDir;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn testcase() -> Testcase {
        let sleep = Workload::Job {
            kind: JobKind::Sleep,
            install_path: "/opt/hadoop".to_owned(),
            args: JobKind::Sleep.default_args(),
            queue: None,
            debug: false,
            timeout: Duration::from_secs(60),
        };
        TestcaseGenerator::new("keepalive")
            .with_workloads([("sleep", sleep)])
            .generate()
            .unwrap()
            .remove(0)
    }

    fn rel_names(dir: &Utf8Path, files: &[Utf8PathBuf]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.strip_prefix(dir).unwrap().to_string())
            .collect()
    }

    #[test]
    fn layout_and_names() {
        let workdir = Utf8TempDir::new().unwrap();
        let mut writer = OutputWriter::new(workdir.path());
        let mut registry = OutputRegistry::new();
        let context = TestContext::new("with patch", "origin/trunk");
        let testcase = testcase();

        writer.start_context(&context).unwrap();
        writer.start_testcase(3, &testcase).unwrap();
        registry.start_testcase(context.name(), testcase.full_name());
        assert_eq!(
            writer.testcase_dir(),
            workdir.path().join("ctx_with_patch/tc3_keepalive_1_sleep")
        );

        let dumps = btreemap! {
            "nm1".to_owned() => "<configuration/>\n".to_owned(),
            "nm2".to_owned() => "<configuration/>\n".to_owned(),
        };
        writer
            .write_config_dumps(&mut registry, OutputCategory::InitialConfig, ConfigDocType::MapredSite, &dumps)
            .unwrap();
        writer
            .write_config_dumps(&mut registry, OutputCategory::InitialConfig, ConfigDocType::Log4jProperties, &dumps)
            .unwrap();
        assert_eq!(
            rel_names(writer.testcase_dir(), registry.get(OutputCategory::InitialConfig)),
            [
                "initial_config/nm1_mapred-site.xml",
                "initial_config/nm2_mapred-site.xml",
                "initial_config/nm1_log4j.properties",
                "initial_config/nm2_log4j.properties",
            ]
        );

        let nm = RoleType::new("nodemanager");
        let buffer = LogBuffer::new(
            "daemon",
            [(
                RemoteCommand::new(RoleTarget::new("nm1", nm), "follow"),
                vec!["nm1 - a".to_owned(), "nm1 - b".to_owned()],
            )]
            .into_iter()
            .collect(),
        );
        writer.write_daemon_logs(&mut registry, &buffer, "YARN").unwrap();
        writer.write_restart_logs(&mut registry, &buffer).unwrap();
        writer
            .write_app_log(&mut registry, "sleep", &["Running job".to_owned()])
            .unwrap();
        let reports: IndexMap<_, _> =
            [("nm-1.example.com:8041".to_owned(), vec!["Health-Report : ok".to_owned()])]
                .into_iter()
                .collect();
        writer.write_health_reports(&mut registry, &reports).unwrap();

        let dir = writer.testcase_dir();
        assert_eq!(
            rel_names(dir, registry.get(OutputCategory::DaemonLogs)),
            ["nm1_nodemanager_YARN.log"]
        );
        assert_eq!(
            rel_names(dir, registry.get(OutputCategory::RestartLogs)),
            ["restart_nm1_nodemanager.log"]
        );
        assert_eq!(
            rel_names(dir, registry.get(OutputCategory::HealthReports)),
            ["healthreport_nm_1_example_com_8041.txt"]
        );
        assert_eq!(
            fs::read_to_string(dir.join("nm1_nodemanager_YARN.log")).unwrap(),
            "nm1 - a\nnm1 - b\n"
        );
        assert_eq!(
            fs::read_to_string(dir.join("app_sleep.log")).unwrap(),
            "Running job\n"
        );

        let bundle = writer.compress_testcase(3, &testcase).unwrap();
        assert_eq!(
            bundle,
            workdir.path().join("ctx_with_patch/testcase_03_keepalive_1_sleep.tar.gz")
        );
        assert!(bundle.exists());
    }

    #[test]
    fn patch_and_archives() {
        let workdir = Utf8TempDir::new().unwrap();
        let mut writer = OutputWriter::new(workdir.path());
        let mut registry = OutputRegistry::new();
        let context = TestContext::new("trunk", "origin/trunk");
        let testcase = testcase();
        writer.start_context(&context).unwrap();
        writer.start_testcase(1, &testcase).unwrap();
        registry.start_testcase(context.name(), testcase.full_name());

        let patch = workdir.path().join("fix.patch");
        fs::write(&patch, "diff --git a/x b/x\n").unwrap();
        writer.write_patch_file(&mut registry, &patch).unwrap();
        assert_eq!(
            registry.get(OutputCategory::PatchFile),
            [workdir.path().join("ctx_trunk/fix.patch")]
        );

        // Build a small log archive, as downloaded from a worker.
        let src = workdir.path().join("userlogs");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("syslog"), "container log\n").unwrap();
        let archive_dir = writer.app_log_archive_dir().unwrap();
        let downloaded = archive_dir.join("application_1_0001_nm1.tar.gz");
        archive::create_tar_gz(&src, "application_1_0001", &downloaded).unwrap();
        registry
            .register(OutputCategory::AppLogArchives, vec![downloaded], false)
            .unwrap();

        writer
            .extract_archives(&mut registry, OutputCategory::AppLogArchives)
            .unwrap();
        assert_eq!(
            registry.get(OutputCategory::ExtractedLogs),
            [archive_dir.join("application_1_0001_nm1_extracted/application_1_0001/syslog")]
        );
    }
}
