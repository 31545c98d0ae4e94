// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Concurrent collection of daemon logs.
//!
//! A [`LogCollector`] starts one follow command per target and keeps it running in the
//! background until [`LogCollector::finish`] is called. Every line is tagged with the host it
//! came from and appended to the list owned by the command that produced it. Once finished,
//! the lines are frozen in a [`LogBuffer`], which is what verifications and output files are
//! built from.

use crate::{
    cluster::{ClusterDriver, LineCallback, RemoteCommand, RoleTarget, RoleType, Selector, StreamKind},
    errors::{ClusterError, VerificationError},
    testcase::LogVerification,
};
use indexmap::IndexMap;
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Log lines are stored as `<host> - <line>`.
fn tag_line(host: &str, line: &str) -> String {
    format!("{host} - {line}")
}

/// A collection episode in progress.
#[derive(Debug)]
pub struct LogCollector {
    episode: &'static str,
    lines: IndexMap<RemoteCommand, Arc<Mutex<Vec<String>>>>,
    followers: Vec<JoinHandle<()>>,
}

impl LogCollector {
    /// Starts following the logs of every target matched by `selector`.
    ///
    /// Must be called from within a tokio runtime. Followers run until [`Self::finish`] is
    /// called; a follower whose command exits early just stops contributing lines.
    pub fn collect(
        driver: &ClusterDriver,
        selector: &Selector,
        episode: &'static str,
    ) -> Result<Self, ClusterError> {
        let commands = driver.follow_log_commands(selector)?;
        debug!(
            "{episode}: following logs of {} targets for `{selector}`",
            commands.len()
        );

        let mut lines = IndexMap::with_capacity(commands.len());
        let mut followers = Vec::with_capacity(commands.len());
        for command in commands {
            let buffer = Arc::new(Mutex::new(Vec::new()));
            lines.insert(command.clone(), buffer.clone());

            let transport = driver.transport().clone();
            followers.push(tokio::spawn(async move {
                let host = command.target().host.clone();
                let on_line: LineCallback = Box::new(move |_: StreamKind, line: &str| {
                    buffer
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(tag_line(&host, line));
                });
                if let Err(error) = transport.run_streaming(&command, on_line).await {
                    warn!("{episode}: log follower for {} exited: {error}", command.target());
                }
            }));
        }

        Ok(Self {
            episode,
            lines,
            followers,
        })
    }

    /// Waits for `grace` so in-flight lines arrive, then stops every follower and freezes the
    /// captured lines.
    pub async fn finish(mut self, grace: Duration) -> LogBuffer {
        tokio::time::sleep(grace).await;
        let followers = std::mem::take(&mut self.followers);
        for follower in &followers {
            follower.abort();
        }
        for follower in followers {
            // Cancellation is the expected outcome.
            if let Err(error) = follower.await {
                if error.is_panic() {
                    warn!("{}: log follower panicked", self.episode);
                }
            }
        }

        let lines = std::mem::take(&mut self.lines)
            .into_iter()
            .map(|(command, buffer)| {
                let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
                (command, std::mem::take(&mut *buffer))
            })
            .collect();
        LogBuffer::new(self.episode, lines)
    }
}

impl Drop for LogCollector {
    fn drop(&mut self) {
        // Followers still running here belong to a step that failed.
        for follower in &self.followers {
            follower.abort();
        }
    }
}

/// Frozen log lines of one collection episode, keyed by the follow command that captured them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LogBuffer {
    episode: &'static str,
    lines: IndexMap<RemoteCommand, Vec<String>>,
}

impl LogBuffer {
    /// Creates a buffer from already captured lines.
    pub fn new(episode: &'static str, lines: IndexMap<RemoteCommand, Vec<String>>) -> Self {
        Self { episode, lines }
    }

    /// The name of the collection episode.
    pub fn episode(&self) -> &'static str {
        self.episode
    }

    /// Iterates over `(command, lines)` pairs in target order.
    pub fn iter(&self) -> impl Iterator<Item = (&RemoteCommand, &[String])> {
        self.lines
            .iter()
            .map(|(command, lines)| (command, lines.as_slice()))
    }

    /// Returns every line captured from targets of `role`.
    pub fn lines_for_role<'a>(&'a self, role: &'a RoleType) -> impl Iterator<Item = &'a String> {
        self.lines
            .iter()
            .filter(move |(command, _)| &command.target().role == role)
            .flat_map(|(_, lines)| lines)
    }

    /// Runs a log verification against the captured lines.
    ///
    /// In normal mode the marker must appear in at least one line of the role. In inverted mode
    /// it must not appear in any.
    pub fn search_in_logs(&self, verification: &LogVerification) -> Result<(), VerificationError> {
        let role = &verification.role;
        let marker = &verification.marker;

        if verification.inverted {
            for (command, lines) in self.lines.iter().filter(|(c, _)| &c.target().role == role) {
                if let Some(line) = lines.iter().find(|line| line.contains(marker.as_str())) {
                    return Err(VerificationError::ForbiddenMarkerFound {
                        target: command.target().clone(),
                        marker: marker.clone(),
                        line: line.clone(),
                    });
                }
            }
            debug!("{}: `{marker}` absent from `{role}` logs, as expected", self.episode);
            Ok(())
        } else if self
            .lines_for_role(role)
            .any(|line| line.contains(marker.as_str()))
        {
            debug!("{}: found `{marker}` in `{role}` logs", self.episode);
            Ok(())
        } else {
            Err(VerificationError::MarkerNotFound {
                role: role.clone(),
                marker: marker.clone(),
                lines: self.lines_for_role(role).cloned().collect(),
            })
        }
    }

    /// Fails if any target produced no lines at all.
    pub fn verify_no_empty_lines(&self) -> Result<(), VerificationError> {
        let targets: Vec<RoleTarget> = self
            .lines
            .iter()
            .filter(|(_, lines)| lines.is_empty())
            .map(|(command, _)| command.target().clone())
            .collect();
        if targets.is_empty() {
            Ok(())
        } else {
            Err(VerificationError::EmptyLogs {
                episode: self.episode,
                targets,
            })
        }
    }
}
