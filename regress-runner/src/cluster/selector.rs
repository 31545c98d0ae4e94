// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{ClusterError, SelectorParseError};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use smol_str::SmolStr;
use std::{fmt, str::FromStr};

/// The kind of daemon running on a cluster host, e.g. `nodemanager` or `resourcemanager`.
///
/// Role names are case-insensitive and are stored lowercased.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RoleType(SmolStr);

impl RoleType {
    /// Creates a new role type, lowercasing the input.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(SmolStr::new(name.as_ref().to_ascii_lowercase()))
    }

    /// Returns the role name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RoleType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(s))
    }
}

/// A single daemon on a single host: the unit that remote commands are addressed to.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RoleTarget {
    /// The host name.
    pub host: SmolStr,

    /// The role running on the host.
    pub role: RoleType,
}

impl RoleTarget {
    /// Creates a new target.
    pub fn new(host: impl Into<SmolStr>, role: RoleType) -> Self {
        Self {
            host: host.into(),
            role,
        }
    }
}

impl fmt::Display for RoleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.role, self.host)
    }
}

/// A query identifying a subset of cluster roles.
///
/// Selectors are written as `<service>` (every role of the service) or `<service>/<role>`, for
/// example `Yarn` or `Yarn/NodeManager`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Selector {
    service: SmolStr,
    role: Option<RoleType>,
}

impl Selector {
    /// Creates a selector for every role of a service.
    pub fn service(service: impl AsRef<str>) -> Self {
        Self {
            service: SmolStr::new(service.as_ref().to_ascii_lowercase()),
            role: None,
        }
    }

    /// Creates a selector for a single role of a service.
    pub fn role(service: impl AsRef<str>, role: RoleType) -> Self {
        Self {
            service: SmolStr::new(service.as_ref().to_ascii_lowercase()),
            role: Some(role),
        }
    }

    /// Returns the service name.
    pub fn service_name(&self) -> &str {
        &self.service
    }

    /// Returns the role this selector is narrowed to, if any.
    pub fn role_type(&self) -> Option<&RoleType> {
        self.role.as_ref()
    }
}

impl FromStr for Selector {
    type Err = SelectorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (service, role) = match s.split_once('/') {
            Some((service, role)) => (service, Some(role)),
            None => (s, None),
        };
        if service.is_empty() {
            return Err(SelectorParseError::new(s, "service name is empty"));
        }
        match role {
            Some("") => Err(SelectorParseError::new(s, "role name is empty")),
            Some(role) if role.contains('/') => Err(SelectorParseError::new(
                s,
                "expected at most one `/` separator",
            )),
            Some(role) => Ok(Self::role(service, RoleType::new(role))),
            None => Ok(Self::service(service)),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.role {
            Some(role) => write!(f, "{}/{}", self.service, role),
            None => write!(f, "{}", self.service),
        }
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The hosts of a cluster, grouped by service and role.
///
/// Resolution preserves the order the topology was declared in, so that commands fan out (and
/// log files are written) in a stable order.
#[derive(Clone, Debug, Default)]
pub struct Topology {
    services: IndexMap<SmolStr, IndexMap<RoleType, Vec<SmolStr>>>,
}

impl Topology {
    /// Creates a topology from `service -> role -> hosts`.
    pub fn new<S, R, H>(services: impl IntoIterator<Item = (S, R)>) -> Self
    where
        S: AsRef<str>,
        R: IntoIterator<Item = (RoleType, H)>,
        H: IntoIterator<Item = String>,
    {
        let services = services
            .into_iter()
            .map(|(service, roles)| {
                let roles = roles
                    .into_iter()
                    .map(|(role, hosts)| (role, hosts.into_iter().map(SmolStr::from).collect()))
                    .collect();
                (SmolStr::new(service.as_ref().to_ascii_lowercase()), roles)
            })
            .collect();
        Self { services }
    }

    /// Resolves a selector to the targets it refers to.
    ///
    /// Returns an error if the selector names an unknown service or role, or if it resolves to
    /// no hosts at all.
    pub fn resolve(&self, selector: &Selector) -> Result<Vec<RoleTarget>, ClusterError> {
        let roles = self.services.get(selector.service_name()).ok_or_else(|| {
            ClusterError::UnknownSelector {
                selector: selector.clone(),
                known: self.services.keys().map(|s| s.to_string()).collect(),
            }
        })?;

        let targets: Vec<_> = match selector.role_type() {
            Some(role) => {
                let hosts = roles
                    .get(role)
                    .ok_or_else(|| ClusterError::UnknownSelector {
                        selector: selector.clone(),
                        known: roles
                            .keys()
                            .map(|role| format!("{}/{role}", selector.service_name()))
                            .collect(),
                    })?;
                hosts
                    .iter()
                    .map(|host| RoleTarget::new(host.clone(), role.clone()))
                    .collect()
            }
            None => roles
                .iter()
                .flat_map(|(role, hosts)| {
                    hosts
                        .iter()
                        .map(move |host| RoleTarget::new(host.clone(), role.clone()))
                })
                .collect(),
        };

        if targets.is_empty() {
            return Err(ClusterError::NoTargets {
                selector: selector.clone(),
            });
        }
        Ok(targets)
    }
}
