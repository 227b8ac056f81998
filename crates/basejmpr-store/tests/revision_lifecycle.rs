//! Create a revision from a local mirror, reconcile a pool against it and
//! verify its checksums.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use basejmpr_core::{HttpConfig, HttpFetcher, ProgressContext};
use basejmpr_store::{
    ArtifactSpec, BackingFileResolver, ConsumerReconciler, ImageIntrospector, RevisionId,
    RevisionStore, StoreError, StoreResult, sha256_file,
};

/// Introspection output keyed by image path; unknown files are not images.
#[derive(Default)]
struct Images(HashMap<PathBuf, PathBuf>);

impl ImageIntrospector for Images {
    fn introspect(&self, image: &Path) -> StoreResult<Option<String>> {
        Ok(self.0.get(image).map(|backing| {
            format!(
                "image: {}\nfile format: qcow2\nbacking file: {}\nbacking file format: qcow2\n",
                image.display(),
                backing.display()
            )
        }))
    }
}

const IMAGE: &str = "jammy-server-cloudimg-amd64.img";

/// Publish a fake cloud image and its manifests under `mirror`.
fn publish(mirror: &Path, content: &[u8]) -> Vec<ArtifactSpec> {
    fs::create_dir_all(mirror).unwrap();
    let image = mirror.join(IMAGE);
    fs::write(&image, content).unwrap();
    let digest = sha256_file(&image).unwrap();
    fs::write(
        mirror.join("SHA256SUMS"),
        format!("{digest} *{IMAGE}\n0000 *jammy-server-cloudimg-arm64.img\n"),
    )
    .unwrap();
    fs::write(mirror.join("jammy.manifest"), "openssh-server\t1:8.9\n").unwrap();

    let url = |name: &str| format!("file://{}", mirror.join(name).display());
    vec![
        ArtifactSpec::manifest(url("SHA256SUMS"), "SHA256SUMS"),
        ArtifactSpec::manifest(url("jammy.manifest"), "manifest"),
        ArtifactSpec::target(url(IMAGE), IMAGE),
    ]
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(HttpConfig::default(), Arc::new(ProgressContext::hidden()))
}

fn vm(pool: &Path, name: &str) -> PathBuf {
    let dir = pool.join(name);
    fs::create_dir_all(&dir).unwrap();
    let image = dir.join(format!("{name}.img"));
    fs::write(&image, b"overlay").unwrap();
    fs::canonicalize(image).unwrap()
}

#[test]
fn create_reconcile_verify() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = tmp.path().join("images");
    let artifacts = publish(&tmp.path().join("mirror"), b"base image v1");
    let store = RevisionStore::new(pool.join("backing_files"));
    let fetcher = fetcher();

    let first = store.create_next_revision(&artifacts, &fetcher).unwrap();
    let second = store.create_next_revision(&artifacts, &fetcher).unwrap();
    assert_eq!(first.id.as_str(), "1");
    assert_eq!(second.id.as_str(), "2");
    assert!(first.files.contains(IMAGE));

    let mut images = Images::default();
    let on_latest = vm(&pool, "web");
    images.0.insert(on_latest.clone(), store.backing_file(None).unwrap());
    let on_first = vm(&pool, "db");
    images
        .0
        .insert(on_first.clone(), store.backing_file(Some(&first.id)).unwrap());
    let standalone = vm(&pool, "scratch");

    let revisions = store.list_revisions(None).unwrap();
    let resolver = BackingFileResolver::new(images);
    let result = ConsumerReconciler::new(&resolver)
        .exclude(store.root())
        .reconcile(&pool, &revisions)
        .unwrap();

    assert_eq!(result.len(), 3);
    assert_eq!(result.consumers_of(&first.id)[0].image, on_first);
    assert_eq!(result.consumers_of(&second.id)[0].image, on_latest);
    assert_eq!(result.detached(), [standalone]);

    let results = store.verify_revision(&second.id).unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].ok);

    let meta = store.read_meta(&second.id).unwrap().unwrap();
    assert_eq!(meta.artifacts, artifacts);
    assert_eq!(
        fs::read_to_string(store.revision_dir(&second.id).join("meta/manifest")).unwrap(),
        "openssh-server\t1:8.9\n"
    );
}

#[test]
fn missing_mirror_file_leaves_no_revision() {
    let tmp = tempfile::tempdir().unwrap();
    let mirror = tmp.path().join("mirror");
    let mut artifacts = publish(&mirror, b"base image");
    fs::remove_file(mirror.join(IMAGE)).unwrap();
    artifacts.retain(|a| !a.is_manifest || a.local_name == "SHA256SUMS");

    let store = RevisionStore::new(tmp.path().join("backing_files"));
    let err = store
        .create_next_revision(&artifacts, &fetcher())
        .unwrap_err();

    assert!(matches!(err, StoreError::FetchFailed { .. }));
    assert!(store.list_revisions(None).unwrap().is_empty());
    assert!(!store.revision_dir(&RevisionId::first()).exists());
}
