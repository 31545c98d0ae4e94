// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::Selector;
use crate::errors::ClusterError;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::Deserialize;
use std::{collections::BTreeMap, fmt};

/// A configuration document of a cluster role.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigDocType {
    /// `mapred-site.xml`.
    MapredSite,

    /// `yarn-site.xml`.
    YarnSite,

    /// `core-site.xml`.
    CoreSite,

    /// `ssl-server.xml`.
    SslServer,

    /// `ssl-client.xml`.
    SslClient,

    /// `log4j.properties`.
    #[serde(rename = "log4j")]
    Log4jProperties,
}

impl ConfigDocType {
    /// All document types, in dump order.
    pub const ALL: [Self; 6] = [
        Self::MapredSite,
        Self::YarnSite,
        Self::CoreSite,
        Self::SslServer,
        Self::SslClient,
        Self::Log4jProperties,
    ];

    /// The short name of the document, as used in config files and output file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MapredSite => "mapred-site",
            Self::YarnSite => "yarn-site",
            Self::CoreSite => "core-site",
            Self::SslServer => "ssl-server",
            Self::SslClient => "ssl-client",
            Self::Log4jProperties => "log4j",
        }
    }

    /// The file name of the document on cluster hosts.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::MapredSite => "mapred-site.xml",
            Self::YarnSite => "yarn-site.xml",
            Self::CoreSite => "core-site.xml",
            Self::SslServer => "ssl-server.xml",
            Self::SslClient => "ssl-client.xml",
            Self::Log4jProperties => "log4j.properties",
        }
    }

    /// The name a dump of this document taken from `host` is written to.
    pub fn dump_file_name(self, host: &str) -> String {
        let extension = match self {
            Self::Log4jProperties => "properties",
            _ => "xml",
        };
        format!("{host}_{}.{extension}", self.as_str())
    }
}

impl fmt::Display for ConfigDocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of properties to push into one configuration document.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigUpdate {
    /// The document to update.
    pub doc: ConfigDocType,

    /// Properties to set, applied in order.
    pub properties: IndexMap<String, String>,
}

/// Options for [`ClusterConfigApi::update_config`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UpdateOptions {
    /// Permit pushing properties whose value is empty.
    pub allow_empty: bool,

    /// Keep a backup of the document on the host before changing it.
    pub backup: bool,
}

/// Reads and updates configuration documents of cluster roles.
///
/// Results are keyed by host name.
pub trait ClusterConfigApi: fmt::Debug + Send + Sync {
    /// Returns the verbatim text of `doc` on every host matched by `selector`.
    fn get_config<'a>(
        &'a self,
        selector: &'a Selector,
        doc: ConfigDocType,
    ) -> BoxFuture<'a, Result<BTreeMap<String, String>, ClusterError>>;

    /// Applies `update` on every host matched by `selector`.
    fn update_config<'a>(
        &'a self,
        selector: &'a Selector,
        update: &'a ConfigUpdate,
        options: UpdateOptions,
    ) -> BoxFuture<'a, Result<(), ClusterError>>;

    /// Returns the effective configuration reported by the running daemons, as flat key/value
    /// maps.
    fn get_config_from_api<'a>(
        &'a self,
        selector: &'a Selector,
    ) -> BoxFuture<'a, Result<BTreeMap<String, BTreeMap<String, String>>, ClusterError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(ConfigDocType::MapredSite, "nm1_mapred-site.xml" ; "mapred site")]
    #[test_case(ConfigDocType::SslClient, "nm1_ssl-client.xml" ; "ssl client")]
    #[test_case(ConfigDocType::Log4jProperties, "nm1_log4j.properties" ; "log4j")]
    fn dump_file_name(doc: ConfigDocType, expected: &str) {
        assert_eq!(doc.dump_file_name("nm1"), expected);
    }
}
