//! Revision → consumer reconciliation
//!
//! Walks the instance pool one level deep (`{pool}/{instance}/{file}`),
//! asks the resolver for each file's backing reference and matches
//! `{version}/{name}` against `{revision}/{file}` for every known revision.
//! Every discovered file ends up either consuming exactly one revision or
//! detached.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{StoreError, StoreResult};
use crate::resolver::{BackingFileResolver, ImageIntrospector, split_reference};
use crate::revision::{RevisionId, RevisionSet};

/// Terminal state of one candidate image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Resolution {
    Resolved {
        revision: RevisionId,
        /// `{revision}/{file}` that matched.
        backing_file: PathBuf,
    },
    Detached,
}

/// A file found in the pool, after introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateImage {
    pub path: PathBuf,
    /// Raw reference reported by the introspection tool.
    pub backing_reference: Option<String>,
    pub resolution: Resolution,
}

/// An image consuming a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Consumer {
    pub image: PathBuf,
    pub backing_file: PathBuf,
}

/// All consumers of one revision, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerGroup {
    pub revision: RevisionId,
    pub consumers: Vec<Consumer>,
}

/// Outcome of one pool scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    /// Groups in the order their first consumer was discovered.
    groups: Vec<ConsumerGroup>,
    detached: Vec<PathBuf>,
}

impl ReconciliationResult {
    /// Group classified candidates by revision.
    pub fn from_candidates(candidates: impl IntoIterator<Item = CandidateImage>) -> Self {
        let mut result = Self::default();
        for candidate in candidates {
            match candidate.resolution {
                Resolution::Resolved {
                    revision,
                    backing_file,
                } => {
                    let consumer = Consumer {
                        image: candidate.path,
                        backing_file,
                    };
                    match result.groups.iter_mut().find(|g| g.revision == revision) {
                        Some(group) => group.consumers.push(consumer),
                        None => result.groups.push(ConsumerGroup {
                            revision,
                            consumers: vec![consumer],
                        }),
                    }
                }
                Resolution::Detached => result.detached.push(candidate.path),
            }
        }
        result
    }

    pub fn groups(&self) -> &[ConsumerGroup] {
        &self.groups
    }

    /// Consumers of `revision`; empty if it has none.
    pub fn consumers_of(&self, revision: &RevisionId) -> &[Consumer] {
        self.groups
            .iter()
            .find(|g| g.revision == *revision)
            .map_or(&[], |g| g.consumers.as_slice())
    }

    pub fn detached(&self) -> &[PathBuf] {
        &self.detached
    }

    /// Number of images classified, consumers and detached together.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.consumers.len()).sum::<usize>() + self.detached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Matches pool images against known revisions. Read-only: never touches
/// the pool or the revision store.
pub struct ConsumerReconciler<'a, I> {
    resolver: &'a BackingFileResolver<I>,
    excluded: Vec<PathBuf>,
}

impl<'a, I: ImageIntrospector> ConsumerReconciler<'a, I> {
    pub fn new(resolver: &'a BackingFileResolver<I>) -> Self {
        Self {
            resolver,
            excluded: Vec::new(),
        }
    }

    /// Skip the files of an instance-level directory, e.g. the revision
    /// store when it lives inside the pool.
    pub fn exclude(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded.push(dir.into());
        self
    }

    /// Candidate images in discovery order: regular files exactly one
    /// directory below `pool_root`, sorted by path.
    /// Paths are canonical; excluded directories are compared after
    /// canonicalization too.
    pub fn discover(&self, pool_root: &Path) -> StoreResult<Vec<PathBuf>> {
        if !pool_root.is_dir() {
            return Ok(Vec::new());
        }
        let pool_root = fs::canonicalize(pool_root).map_err(StoreError::io(pool_root))?;
        let excluded: Vec<PathBuf> = self
            .excluded
            .iter()
            .map(|dir| fs::canonicalize(dir).unwrap_or_else(|_| dir.clone()))
            .collect();

        let root = glob::Pattern::escape(&pool_root.to_string_lossy());
        let pattern = format!("{root}/*/*");
        let paths = glob::glob(&pattern).map_err(|e| StoreError::Io {
            path: pool_root.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
        })?;

        let mut candidates = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    log::warn!("skipping unreadable pool entry: {e}");
                    continue;
                }
            };
            if path
                .parent()
                .is_some_and(|parent| excluded.iter().any(|ex| ex == parent))
            {
                continue;
            }
            if fs::symlink_metadata(&path).is_ok_and(|m| m.is_file()) {
                candidates.push(path);
            }
        }
        Ok(candidates)
    }

    /// Introspect one image and classify it.
    pub fn examine(&self, image: &Path, revisions: &RevisionSet) -> StoreResult<CandidateImage> {
        let backing_reference = self.resolver.get_backing_reference(image)?;
        let resolution = classify(image, backing_reference.as_deref(), revisions)?;
        match &resolution {
            Resolution::Resolved { revision, .. } => {
                log::debug!("{} consumes revision {revision}", image.display());
            }
            Resolution::Detached => {
                log::debug!(
                    "{} is detached (backing reference: {})",
                    image.display(),
                    backing_reference.as_deref().unwrap_or("none")
                );
            }
        }
        Ok(CandidateImage {
            path: image.to_path_buf(),
            backing_reference,
            resolution,
        })
    }

    /// Scan `pool_root` and reconcile it against `revisions`.
    ///
    /// Fails as a whole on `IntrospectionFailed` or `DuplicateConsumer`; no
    /// partial result is returned.
    pub fn reconcile(
        &self,
        pool_root: &Path,
        revisions: &RevisionSet,
    ) -> StoreResult<ReconciliationResult> {
        let candidates = self
            .discover(pool_root)?
            .iter()
            .map(|image| self.examine(image, revisions))
            .collect::<StoreResult<Vec<_>>>()?;

        let result = ReconciliationResult::from_candidates(candidates);
        log::info!(
            "scanned {} image(s) in {}: {} consuming {} revision(s), {} detached",
            result.len(),
            pool_root.display(),
            result.len() - result.detached().len(),
            result.groups().len(),
            result.detached().len()
        );
        Ok(result)
    }
}

/// Match a backing reference against every revision's files.
///
/// Version components compare numerically, file names component-wise. A
/// second match anywhere is a `DuplicateConsumer` fault.
pub fn classify(
    image: &Path,
    reference: Option<&str>,
    revisions: &RevisionSet,
) -> StoreResult<Resolution> {
    let Some((version, name)) = reference.and_then(split_reference) else {
        return Ok(Resolution::Detached);
    };

    let mut found: Option<(RevisionId, PathBuf)> = None;
    for revision in revisions.values() {
        if !revision.id.matches_component(&version) {
            continue;
        }
        for file in &revision.files {
            if Path::new(file) != Path::new(&name) {
                continue;
            }
            let backing_file = Path::new(revision.id.as_str()).join(file);
            if let Some((_, first)) = &found {
                return Err(StoreError::DuplicateConsumer {
                    image: image.to_path_buf(),
                    first: first.display().to_string(),
                    second: backing_file.display().to_string(),
                });
            }
            found = Some((revision.id.clone(), backing_file));
        }
    }

    Ok(match found {
        Some((revision, backing_file)) => Resolution::Resolved {
            revision,
            backing_file,
        },
        None => Resolution::Detached,
    })
}
