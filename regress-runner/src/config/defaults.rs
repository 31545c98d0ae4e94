// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{cluster::ConfigDocType, errors::ConfigValidationError};
use indexmap::IndexMap;

/// A value that must never be pushed to the cluster.
pub const INVALID_CONFIG_VALUE: &str = "INVALID";

/// The property that enables SSL debugging in reducers.
const SSL_DEBUG_KEY: &str = "mapred.reduce.child.java.opts";
const SSL_DEBUG_VALUE: &str = "-Djavax.net.debug=all";

static MAPRED_SITE: &[(&str, &str)] = &[
    ("mapreduce.shuffle.manage.os.cache", "true"),
    ("mapreduce.shuffle.readahead.bytes", "4194304"),
    ("mapreduce.shuffle.max.connections", "0"),
    ("mapreduce.shuffle.max.threads", "0"),
    ("mapreduce.shuffle.transfer.buffer.size", "131072"),
    ("mapreduce.shuffle.transferTo.allowed", "true"),
    ("mapreduce.shuffle.max.session-open-files", "3"),
    ("mapreduce.shuffle.listen.queue.size", "128"),
    ("mapreduce.shuffle.port", "13562"),
    ("mapreduce.shuffle.ssl.file.buffer.size", "61440"),
    ("mapreduce.shuffle.connection-keep-alive.enable", "false"),
    ("mapreduce.shuffle.connection-keep-alive.timeout", "5"),
    ("mapreduce.shuffle.mapoutput-info.meta.cache.size", "1000"),
    ("mapreduce.shuffle.ssl.enabled", "false"),
    ("mapreduce.shuffle.pathcache.expire-after-access-minutes", "5"),
    ("mapreduce.shuffle.pathcache.concurrency-level", "16"),
    ("mapreduce.shuffle.pathcache.max-weight", "10485760"),
    ("yarn.app.mapreduce.shuffle.log.separate", "true"),
    ("yarn.app.mapreduce.shuffle.log.limit.kb", "0"),
    ("yarn.app.mapreduce.shuffle.log.backups", "0"),
];

static YARN_SITE: &[(&str, &str)] = &[
    ("yarn.nodemanager.delete.debug-delay-sec", "99999999"),
    // Keeps nodes healthy on small disks.
    (
        "yarn.nodemanager.disk-health-checker.max-disk-utilization-per-disk-percentage",
        "99.5",
    ),
];

static CORE_SITE: &[(&str, &str)] = &[
    ("hadoop.ssl.require.client.cert", "false"),
    ("hadoop.ssl.hostname.verifier", "DEFAULT"),
    (
        "hadoop.ssl.keystores.factory.class",
        "org.apache.hadoop.security.ssl.FileBasedKeyStoresFactory",
    ),
    ("hadoop.ssl.server.conf", "ssl-server.xml"),
    ("hadoop.ssl.client.conf", "ssl-client.xml"),
];

static SSL_SERVER: &[(&str, &str)] = &[
    ("ssl.server.keystore.type", "jks"),
    (
        "ssl.server.keystore.location",
        "/home/systest/keystores/server-keystore.jks",
    ),
    ("ssl.server.keystore.password", "ssl_server_ks_pass"),
    ("ssl.server.truststore.type", "jks"),
    (
        "ssl.server.truststore.location",
        "/home/systest/keystores/truststore.jks",
    ),
    ("ssl.server.truststore.password", "ssl_server_ts_pass"),
    ("ssl.server.truststore.reload.interval", "10000"),
];

static SSL_CLIENT: &[(&str, &str)] = &[
    ("ssl.client.keystore.type", "jks"),
    (
        "ssl.client.keystore.location",
        "/home/systest/keystores/client-keystore.jks",
    ),
    ("ssl.client.keystore.password", "ssl_client_ks_pass"),
    ("ssl.client.truststore.type", "jks"),
    (
        "ssl.client.truststore.location",
        "/home/systest/keystores/truststore.jks",
    ),
    ("ssl.client.truststore.password", "ssl_client_ts_pass"),
    ("ssl.client.truststore.reload.interval", "10000"),
];

/// Default property values pushed to the cluster before every testcase, grouped by document.
///
/// Starts from a built-in set of shuffle handler, SSL and NodeManager defaults. Entries from the
/// `[defaults.<doc>]` tables of the config file are layered on top: they override built-in keys
/// in place and append new keys at the end.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigDefaults {
    groups: IndexMap<ConfigDocType, IndexMap<String, String>>,
}

impl ConfigDefaults {
    /// Returns the built-in defaults.
    pub fn builtin() -> Self {
        let groups = [
            (ConfigDocType::MapredSite, MAPRED_SITE),
            (ConfigDocType::YarnSite, YARN_SITE),
            (ConfigDocType::CoreSite, CORE_SITE),
            (ConfigDocType::SslServer, SSL_SERVER),
            (ConfigDocType::SslClient, SSL_CLIENT),
        ]
        .into_iter()
        .map(|(doc, entries)| {
            let entries = entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect();
            (doc, entries)
        })
        .collect();
        Self { groups }
    }

    /// Layers `overrides` on top of these defaults.
    pub fn with_overrides(
        mut self,
        overrides: &IndexMap<ConfigDocType, IndexMap<String, String>>,
    ) -> Self {
        for (doc, entries) in overrides {
            let group = self.groups.entry(*doc).or_default();
            for (key, value) in entries {
                group.insert(key.clone(), value.clone());
            }
        }
        self
    }

    /// Adds the reducer JVM option that turns on SSL handshake debugging.
    pub fn with_ssl_debugging(mut self) -> Self {
        self.groups
            .entry(ConfigDocType::MapredSite)
            .or_default()
            .insert(SSL_DEBUG_KEY.to_owned(), SSL_DEBUG_VALUE.to_owned());
        self
    }

    /// Returns the defaults for a document, if any are defined.
    pub fn get(&self, doc: ConfigDocType) -> Option<&IndexMap<String, String>> {
        self.groups.get(&doc)
    }

    /// Iterates over all groups in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (ConfigDocType, &IndexMap<String, String>)> {
        self.groups.iter().map(|(doc, entries)| (*doc, entries))
    }
}

/// Rejects any property whose value is the [`INVALID_CONFIG_VALUE`] sentinel.
pub fn validate_config_values(
    doc: ConfigDocType,
    properties: &IndexMap<String, String>,
) -> Result<(), ConfigValidationError> {
    let invalid: Vec<_> = properties
        .iter()
        .filter(|(_, value)| value.as_str() == INVALID_CONFIG_VALUE)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if invalid.is_empty() {
        Ok(())
    } else {
        Err(ConfigValidationError::new(doc, invalid))
    }
}
