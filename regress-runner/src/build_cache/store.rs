// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::BuildCacheError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, io, io::Write};
use tracing::{debug, warn};

/// The newest build cache store format this version of regress reads and writes.
pub const BUILD_CACHE_FORMAT_VERSION: u32 = 1;

/// The artifacts cached for one cache key.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuildCacheEntry {
    /// The patch the artifacts were built with, if any.
    pub patch: Option<String>,

    /// The cache key: `<branch>_<patch or "without_patch">`.
    pub cache_key: String,

    /// Cached artifact paths, by module name.
    pub modules: BTreeMap<String, Utf8PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
struct BuildCacheDocument {
    format_version: u32,
    #[serde(default)]
    entries: BTreeMap<String, BuildCacheEntry>,
}

/// The persisted map from cache key to [`BuildCacheEntry`], stored as JSON.
#[derive(Debug)]
pub struct BuildCacheStore {
    path: Utf8PathBuf,
    file_version: u32,
    entries: BTreeMap<String, BuildCacheEntry>,
}

impl BuildCacheStore {
    /// Reads the store at `path`. A missing file is an empty store.
    pub fn load(path: impl Into<Utf8PathBuf>) -> Result<Self, BuildCacheError> {
        let path = path.into();
        let document = match fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str::<BuildCacheDocument>(&json).map_err(|error| {
                BuildCacheError::StoreDeserialize {
                    path: path.clone(),
                    error,
                }
            })?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => BuildCacheDocument {
                format_version: BUILD_CACHE_FORMAT_VERSION,
                entries: BTreeMap::new(),
            },
            Err(error) => return Err(BuildCacheError::StoreRead { path, error }),
        };
        if document.format_version > BUILD_CACHE_FORMAT_VERSION {
            warn!(
                "build cache store `{path}` has format version {}, newer than {}: \
                 it will be read but not updated",
                document.format_version, BUILD_CACHE_FORMAT_VERSION,
            );
        }
        debug!("loaded {} build cache entries from `{path}`", document.entries.len());
        Ok(Self {
            path,
            file_version: document.format_version,
            entries: document.entries,
        })
    }

    /// The path of the store.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the entry for `cache_key`.
    pub fn get(&self, cache_key: &str) -> Option<&BuildCacheEntry> {
        self.entries.get(cache_key)
    }

    /// Inserts or replaces the entry for its cache key.
    pub fn insert(&mut self, entry: BuildCacheEntry) {
        self.entries.insert(entry.cache_key.clone(), entry);
    }

    /// Writes the store back to disk atomically.
    ///
    /// Fails without writing if the file on disk has a newer format version.
    pub fn persist(&self) -> Result<(), BuildCacheError> {
        if self.file_version > BUILD_CACHE_FORMAT_VERSION {
            return Err(BuildCacheError::StoreWriteDenied {
                path: self.path.clone(),
                format_version: self.file_version,
                supported: BUILD_CACHE_FORMAT_VERSION,
            });
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|error| BuildCacheError::CreateDir {
                path: parent.to_owned(),
                error,
            })?;
        }

        let document = BuildCacheDocument {
            format_version: BUILD_CACHE_FORMAT_VERSION,
            entries: self.entries.clone(),
        };
        let json =
            serde_json::to_string_pretty(&document).map_err(BuildCacheError::StoreSerialize)?;
        atomicwrites::AtomicFile::new(&self.path, atomicwrites::AllowOverwrite)
            .write(|file| file.write_all(json.as_bytes()))
            .map_err(|error| BuildCacheError::StoreWrite {
                path: self.path.clone(),
                error,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    fn entry() -> BuildCacheEntry {
        BuildCacheEntry {
            patch: Some("fix.patch".to_owned()),
            cache_key: "trunk_fix.patch".to_owned(),
            modules: btreemap! {
                "shuffle".to_owned() => Utf8PathBuf::from("/cache/trunk_fix.patch/shuffle.jar"),
            },
        }
    }

    #[test]
    fn missing_file_is_empty_and_persists() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("db/build-cache.json");

        let mut store = BuildCacheStore::load(&path).unwrap();
        assert!(store.get("trunk_fix.patch").is_none());
        store.insert(entry());
        store.persist().unwrap();

        let reloaded = BuildCacheStore::load(&path).unwrap();
        assert_eq!(reloaded.get("trunk_fix.patch"), Some(&entry()));
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["format-version"], BUILD_CACHE_FORMAT_VERSION);
    }

    #[test]
    fn newer_format_is_read_but_not_written() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("build-cache.json");
        let original = r#"{
            "format-version": 99,
            "entries": {
                "trunk_fix.patch": {
                    "patch": "fix.patch",
                    "cache-key": "trunk_fix.patch",
                    "modules": { "shuffle": "/cache/trunk_fix.patch/shuffle.jar" }
                }
            }
        }"#;
        fs::write(&path, original).unwrap();

        let mut store = BuildCacheStore::load(&path).unwrap();
        assert_eq!(store.get("trunk_fix.patch"), Some(&entry()));
        store.insert(BuildCacheEntry {
            patch: None,
            cache_key: "trunk_without_patch".to_owned(),
            modules: BTreeMap::new(),
        });
        let err = store.persist().unwrap_err();
        assert!(
            matches!(err, BuildCacheError::StoreWriteDenied { format_version: 99, .. }),
            "unexpected error: {err}"
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("build-cache.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            BuildCacheStore::load(&path),
            Err(BuildCacheError::StoreDeserialize { .. })
        ));
    }
}
