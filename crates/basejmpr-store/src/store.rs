//! Filesystem-backed catalog of base image revisions
//!
//! Directory layout:
//! ```text
//! {root}/                      # usually {pool}/backing_files
//! ├── .lock                    # held while a revision is being created
//! └── {revision}/              # 1, 2, 3, ...
//!     ├── meta/
//!     │   ├── SHA256SUMS       # checksum manifest, drives linking
//!     │   ├── manifest         # informational
//!     │   └── revision.json    # provenance, written last
//!     ├── targets/
//!     │   └── *.img            # raw downloaded artifacts
//!     └── {name} -> targets/{name}
//! ```
//!
//! A revision is immutable once created. Creation is all-or-nothing: any
//! failure removes the whole revision directory before the error is
//! returned.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use basejmpr_core::Fetcher;
use fs4::FileExt;
use serde::Serialize;

use crate::checksums::{parse_checksums, sha256_file};
use crate::error::{StoreError, StoreResult};
use crate::revision::{ArtifactSpec, Revision, RevisionId, RevisionMeta, RevisionSet};

pub const META_DIR: &str = "meta";
pub const TARGETS_DIR: &str = "targets";
pub const CHECKSUMS_FILE: &str = "SHA256SUMS";
pub const REVISION_META_FILE: &str = "revision.json";
const LOCK_FILE: &str = ".lock";

/// Verification result for a single linked file.
#[derive(Debug, Serialize)]
pub struct VerifyResult {
    pub file: String,
    pub expected: String,
    pub actual: String,
    pub ok: bool,
}

/// Revision catalog rooted at a directory that may not exist yet.
pub struct RevisionStore {
    root: PathBuf,
    keep_failed: bool,
}

impl RevisionStore {
    /// Open the catalog at `root`. Nothing is created until the first
    /// revision is.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            keep_failed: false,
        }
    }

    /// Keep the directory of a failed creation for debugging instead of
    /// rolling it back.
    pub fn keep_failed(mut self, keep: bool) -> Self {
        self.keep_failed = keep;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn revision_dir(&self, id: &RevisionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Scan the catalog. With `filter`, only that revision (if it exists).
    ///
    /// A missing or empty root is not an error: it just has no revisions yet.
    pub fn list_revisions(&self, filter: Option<&RevisionId>) -> StoreResult<RevisionSet> {
        let mut revisions = BTreeMap::new();
        if !self.root.is_dir() {
            return Ok(revisions);
        }

        for entry in fs::read_dir(&self.root).map_err(StoreError::io(&self.root))? {
            let entry = entry.map_err(StoreError::io(&self.root))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = RevisionId::parse(&name) else {
                log::warn!("ignoring non-revision directory {}", entry.path().display());
                continue;
            };
            if filter.is_some_and(|f| *f != id) {
                continue;
            }
            let revision = self.read_revision(&id)?;
            revisions.insert(id, revision);
        }

        Ok(revisions)
    }

    /// Read one revision's links and targets.
    pub fn read_revision(&self, id: &RevisionId) -> StoreResult<Revision> {
        let dir = self.revision_dir(id);
        if !dir.is_dir() {
            return Err(StoreError::NotFound(id.clone()));
        }

        let mut files = BTreeSet::new();
        for entry in fs::read_dir(&dir).map_err(StoreError::io(&dir))? {
            let entry = entry.map_err(StoreError::io(&dir))?;
            let file_type = entry.file_type().map_err(StoreError::io(entry.path()))?;
            if file_type.is_symlink() {
                files.insert(entry.file_name().to_string_lossy().into_owned());
            }
        }

        let targets_dir = dir.join(TARGETS_DIR);
        let mut targets = BTreeSet::new();
        match fs::read_dir(&targets_dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry.map_err(StoreError::io(&targets_dir))?;
                    targets.insert(entry.file_name().to_string_lossy().into_owned());
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!("revision {id} has no {TARGETS_DIR}/ directory");
            }
            Err(e) => return Err(StoreError::io(&targets_dir)(e)),
        }

        Ok(Revision {
            id: id.clone(),
            files,
            targets,
        })
    }

    /// Highest existing revision, if any.
    pub fn latest(&self) -> StoreResult<Option<RevisionId>> {
        Ok(self.list_revisions(None)?.into_keys().next_back())
    }

    /// `max(existing) + 1`, or `1` for an empty catalog.
    pub fn next_revision_id(&self) -> StoreResult<RevisionId> {
        match self.latest()? {
            None => Ok(RevisionId::first()),
            Some(latest) => latest.next().ok_or(StoreError::Exhausted(latest)),
        }
    }

    /// Create revision `id` from `artifacts`.
    ///
    /// Fails with `AlreadyExists` if the directory is already there. Any
    /// later failure (fetch, missing manifest, zero links) removes the
    /// partially built directory before returning.
    pub fn create_revision(
        &self,
        id: &RevisionId,
        artifacts: &[ArtifactSpec],
        fetcher: &dyn Fetcher,
    ) -> StoreResult<Revision> {
        let _lock = self.lock()?;
        self.create_locked(id, artifacts, fetcher)
    }

    /// Create the next revision (`max + 1`, or `1`), choosing the id while
    /// holding the catalog lock.
    pub fn create_next_revision(
        &self,
        artifacts: &[ArtifactSpec],
        fetcher: &dyn Fetcher,
    ) -> StoreResult<Revision> {
        let _lock = self.lock()?;
        let id = self.next_revision_id()?;
        self.create_locked(&id, artifacts, fetcher)
    }

    /// Follow `{root}/{id}/{file}` to its real absolute path.
    pub fn resolve_link(&self, id: &RevisionId, file: &str) -> StoreResult<PathBuf> {
        let link = self.revision_dir(id).join(file);
        fs::canonicalize(&link).map_err(StoreError::io(link))
    }

    /// Backing file path a new instance should use: the first linked file
    /// of `id`, or of the latest revision when `id` is `None`.
    ///
    /// Returns the link path, not its resolved target, so copy-on-write
    /// images keep pointing through `{revision}/{file}` and can be matched
    /// back to their revision.
    pub fn backing_file(&self, id: Option<&RevisionId>) -> StoreResult<PathBuf> {
        let revision = match id {
            Some(id) => self.read_revision(id)?,
            None => self
                .list_revisions(None)?
                .into_values()
                .next_back()
                .ok_or(StoreError::NoRevisions)?,
        };
        let file = revision
            .files
            .iter()
            .next()
            .ok_or_else(|| StoreError::EmptyRevision(revision.id.clone()))?;
        Ok(self.revision_dir(&revision.id).join(file))
    }

    /// Provenance record, if the revision has one.
    pub fn read_meta(&self, id: &RevisionId) -> StoreResult<Option<RevisionMeta>> {
        let path = self.revision_dir(id).join(META_DIR).join(REVISION_META_FILE);
        match fs::read_to_string(&path) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path)(e)),
        }
    }

    /// Recompute SHA-256 of every linked file and compare with the manifest.
    pub fn verify_revision(&self, id: &RevisionId) -> StoreResult<Vec<VerifyResult>> {
        let revision = self.read_revision(id)?;
        let dir = self.revision_dir(id);
        let manifest = dir.join(META_DIR).join(CHECKSUMS_FILE);
        let content = fs::read_to_string(&manifest).map_err(StoreError::io(&manifest))?;
        let expected: BTreeMap<String, String> = parse_checksums(&content)
            .into_iter()
            .map(|e| (e.file_name, e.digest))
            .collect();

        let mut results = Vec::new();
        for file in &revision.files {
            let Some(digest) = expected.get(file) else {
                log::warn!("revision {id}: {file} has no checksum entry");
                continue;
            };
            let path = dir.join(file);
            let (actual, ok) = if path.exists() {
                match sha256_file(&path) {
                    Ok(hex) => {
                        let ok = hex == *digest;
                        (hex, ok)
                    }
                    Err(e) => (format!("error: {e}"), false),
                }
            } else {
                ("MISSING".to_string(), false)
            };
            results.push(VerifyResult {
                file: file.clone(),
                expected: digest.clone(),
                actual,
                ok,
            });
        }

        Ok(results)
    }

    /// Exclusive lock over the catalog. Released when the file is dropped.
    fn lock(&self) -> StoreResult<File> {
        fs::create_dir_all(&self.root).map_err(StoreError::io(&self.root))?;
        let path = self.root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(StoreError::io(&path))?;
        file.lock_exclusive().map_err(StoreError::io(&path))?;
        Ok(file)
    }

    fn create_locked(
        &self,
        id: &RevisionId,
        artifacts: &[ArtifactSpec],
        fetcher: &dyn Fetcher,
    ) -> StoreResult<Revision> {
        for artifact in artifacts {
            validate_local_name(&artifact.local_name)?;
        }

        let dir = self.revision_dir(id);
        if let Err(e) = fs::create_dir(&dir) {
            return Err(if e.kind() == ErrorKind::AlreadyExists {
                StoreError::AlreadyExists(id.clone())
            } else {
                StoreError::io(dir)(e)
            });
        }
        log::info!("creating base revision {id} in {}", dir.display());

        match self.populate(id, &dir, artifacts, fetcher) {
            Ok(revision) => {
                log::info!(
                    "base revision {id} created with {} linked file(s)",
                    revision.files.len()
                );
                Ok(revision)
            }
            Err(e) => {
                if self.keep_failed {
                    log::warn!("revision {id} create unsuccessful: keeping {}", dir.display());
                } else {
                    log::warn!("revision {id} create unsuccessful: deleting {}", dir.display());
                    if let Err(cleanup) = fs::remove_dir_all(&dir) {
                        log::error!("failed to remove {}: {cleanup}", dir.display());
                    }
                }
                Err(e)
            }
        }
    }

    fn populate(
        &self,
        id: &RevisionId,
        dir: &Path,
        artifacts: &[ArtifactSpec],
        fetcher: &dyn Fetcher,
    ) -> StoreResult<Revision> {
        let meta_dir = dir.join(META_DIR);
        let targets_dir = dir.join(TARGETS_DIR);
        fs::create_dir(&meta_dir).map_err(StoreError::io(&meta_dir))?;
        fs::create_dir(&targets_dir).map_err(StoreError::io(&targets_dir))?;

        for artifact in artifacts {
            let dest = if artifact.is_manifest {
                meta_dir.join(&artifact.local_name)
            } else {
                targets_dir.join(&artifact.local_name)
            };
            let bytes = fetcher
                .fetch(&artifact.url, &dest)
                .map_err(|source| StoreError::FetchFailed {
                    url: artifact.url.clone(),
                    source,
                })?;
            log::debug!("fetched {} ({bytes} bytes)", dest.display());
        }

        let linked = link_targets(dir)?;
        if linked == 0 {
            return Err(StoreError::LinkCreationFailed {
                revision: id.clone(),
                manifest: meta_dir.join(CHECKSUMS_FILE),
            });
        }

        let meta = RevisionMeta {
            id: id.to_string(),
            created_at: chrono::Utc::now(),
            artifacts: artifacts.to_vec(),
        };
        let meta_path = meta_dir.join(REVISION_META_FILE);
        fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)
            .map_err(StoreError::io(&meta_path))?;

        self.read_revision(id)
    }
}

/// Link every target named by a manifest line: `{dir}/{name} -> targets/{name}`.
/// Returns the number of links created.
fn link_targets(dir: &Path) -> StoreResult<usize> {
    let targets_dir = dir.join(TARGETS_DIR);
    let targets: BTreeSet<String> = fs::read_dir(&targets_dir)
        .map_err(StoreError::io(&targets_dir))?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();

    let manifest = dir.join(META_DIR).join(CHECKSUMS_FILE);
    let content = fs::read_to_string(&manifest).map_err(StoreError::io(&manifest))?;

    let mut linked = 0;
    for entry in parse_checksums(&content) {
        if !targets.contains(&entry.file_name) {
            continue;
        }
        let link = dir.join(&entry.file_name);
        // Manifests may list the same file twice
        if link.symlink_metadata().is_ok() {
            continue;
        }
        let target = Path::new(TARGETS_DIR).join(&entry.file_name);
        std::os::unix::fs::symlink(&target, &link).map_err(StoreError::io(&link))?;
        log::debug!("linked {} -> {}", link.display(), target.display());
        linked += 1;
    }

    Ok(linked)
}

/// Artifact names land directly in `meta/` or `targets/`.
fn validate_local_name(name: &str) -> StoreResult<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(StoreError::InvalidArtifactName(name.to_string())),
    }
}
