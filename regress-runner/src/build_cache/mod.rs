// Copyright (c) The regress Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Compiling the source tree once per context, and caching the artifacts.
//!
//! Artifacts are copied to `<workdir>/jarcache/<cache key>/`, where the cache key is
//! `<branch>_<patch file name>` (or `<branch>_without_patch`). The map from cache key to
//! cached artifacts is persisted in `<workdir>/db/build-cache.json`. A context can skip
//! compilation if every module changed on its branch already has an artifact in the cache.

mod store;
mod toolchain;

pub use store::*;
pub use toolchain::*;

use crate::{errors::BuildCacheError, testcase::TestContext};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::{fs, sync::Arc};
use tracing::{debug, info, warn};

/// The branch assumed when the current branch can't be determined.
pub const FALLBACK_BRANCH: &str = "trunk";

const WITHOUT_PATCH: &str = "without_patch";
const CACHE_DIR: &str = "jarcache";
const STORE_PATH: &str = "db/build-cache.json";

/// Options for [`BuildCache`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BuildCacheOptions {
    /// Compile even if every changed module is cached.
    pub force_compile: bool,

    /// Copy compiled artifacts into the cache and persist the store.
    pub cache_artifacts: bool,
}

/// What [`BuildCache::compile`] did.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CompileOutcome {
    /// The context doesn't request compilation.
    Skipped,

    /// Every changed module was already cached.
    CacheHit {
        /// The cache key that was hit.
        cache_key: String,
    },

    /// The source tree was compiled.
    Compiled {
        /// The cache key artifacts were stored under.
        cache_key: String,

        /// The number of modules built.
        module_count: usize,
    },
}

/// Compiles contexts through a [`BuildToolchain`], skipping the build on cache hits.
#[derive(Debug)]
pub struct BuildCache {
    toolchain: Arc<dyn BuildToolchain>,
    cache_root: Utf8PathBuf,
    store_path: Utf8PathBuf,
    options: BuildCacheOptions,
}

impl BuildCache {
    /// Creates a build cache below `workdir`.
    pub fn new(
        workdir: &Utf8Path,
        toolchain: Arc<dyn BuildToolchain>,
        options: BuildCacheOptions,
    ) -> Self {
        Self {
            toolchain,
            cache_root: workdir.join(CACHE_DIR),
            store_path: workdir.join(STORE_PATH),
            options,
        }
    }

    /// The directory artifacts are cached in.
    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    /// Returns the cache key for `context` on `branch`.
    pub fn cache_key(branch: &str, context: &TestContext) -> String {
        format!(
            "{}_{}",
            branch.replace('/', "_"),
            context.patch_identity().unwrap_or(WITHOUT_PATCH)
        )
    }

    /// Returns where the artifact at `artifact` is cached under `cache_key`.
    ///
    /// Paths inside the source root keep their relative layout; other paths keep only their
    /// file name.
    pub fn cached_path(&self, cache_key: &str, artifact: &Utf8Path) -> Utf8PathBuf {
        let source_root = self.toolchain.source_root();
        let relative = if artifact.is_relative() {
            artifact
        } else if let Ok(relative) = artifact.strip_prefix(source_root) {
            relative
        } else {
            artifact
                .file_name()
                .map(Utf8Path::new)
                .unwrap_or(artifact)
        };
        self.cache_root.join(cache_key).join(relative)
    }

    /// Returns true if every module in `modules` has its artifact in the cache.
    pub fn is_hit(&self, cache_key: &str, modules: &IndexMap<String, Utf8PathBuf>) -> bool {
        modules.iter().all(|(module, artifact)| {
            let cached = self.cached_path(cache_key, artifact);
            let exists = cached.exists();
            if !exists {
                debug!("cache miss for module `{module}`: `{cached}` doesn't exist");
            }
            exists
        })
    }

    /// Compiles the source tree for `context`, unless it doesn't ask for compilation or the
    /// cache already has every changed module.
    pub fn compile(&self, context: &TestContext) -> Result<CompileOutcome, BuildCacheError> {
        if !context.compile() {
            debug!("context `{context}` doesn't request compilation");
            return Ok(CompileOutcome::Skipped);
        }

        let branch = match self.toolchain.current_branch() {
            Ok(branch) if !branch.is_empty() => branch,
            Ok(_) => FALLBACK_BRANCH.to_owned(),
            Err(error) => {
                warn!("couldn't determine the current branch, assuming `{FALLBACK_BRANCH}`: {error}");
                FALLBACK_BRANCH.to_owned()
            }
        };
        let cache_key = Self::cache_key(&branch, context);

        if !self.options.force_compile && self.options.cache_artifacts {
            let changed = self.toolchain.changed_modules()?;
            if self.is_hit(&cache_key, &changed) {
                info!(
                    "build cache hit for `{cache_key}` ({} changed modules), skipping compilation",
                    changed.len()
                );
                return Ok(CompileOutcome::CacheHit { cache_key });
            }
        }

        info!("compiling context `{context}` on branch `{branch}`");
        let built = self.toolchain.compile_all()?;
        if self.options.cache_artifacts {
            self.store(&cache_key, context, &built)?;
        }
        Ok(CompileOutcome::Compiled {
            cache_key,
            module_count: built.len(),
        })
    }

    fn store(
        &self,
        cache_key: &str,
        context: &TestContext,
        built: &IndexMap<String, Utf8PathBuf>,
    ) -> Result<(), BuildCacheError> {
        let source_root = self.toolchain.source_root();
        let mut modules = std::collections::BTreeMap::new();
        for (module, artifact) in built {
            let from = source_root.join(artifact);
            let to = self.cached_path(cache_key, artifact);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(|error| BuildCacheError::CreateDir {
                    path: parent.to_owned(),
                    error,
                })?;
            }
            fs::copy(&from, &to).map_err(|error| BuildCacheError::CopyArtifact {
                module: module.clone(),
                from: from.clone(),
                to: to.clone(),
                error,
            })?;
            debug!("cached `{from}` as `{to}`");
            modules.insert(module.clone(), to);
        }

        let mut store = BuildCacheStore::load(&self.store_path)?;
        store.insert(BuildCacheEntry {
            patch: context.patch_identity().map(str::to_owned),
            cache_key: cache_key.to_owned(),
            modules,
        });
        store.persist()
    }
}
