//! Ubuntu cloud image artifacts for a new revision
//!
//! Layout of `{base_url}/{series}/current/`:
//! `SHA256SUMS`, `{series}-server-cloudimg-{arch}.manifest` and the disk
//! image itself.

use basejmpr_store::ArtifactSpec;

/// Series published with the `-disk1.img` suffix.
const LEGACY_SERIES: &[&str] = &["trusty", "xenial"];

/// Disk image file name for `series`/`arch`.
pub fn image_name(series: &str, arch: &str) -> String {
    let suffix = if LEGACY_SERIES.contains(&series) {
        "-disk1"
    } else {
        ""
    };
    format!("{series}-server-cloudimg-{arch}{suffix}.img")
}

/// Checksum manifest, package manifest and disk image, in download order.
pub fn artifacts(base_url: &str, series: &str, arch: &str) -> Vec<ArtifactSpec> {
    let base = format!("{}/{series}/current", base_url.trim_end_matches('/'));
    let image = image_name(series, arch);

    vec![
        ArtifactSpec::manifest(format!("{base}/SHA256SUMS"), "SHA256SUMS"),
        ArtifactSpec::manifest(
            format!("{base}/{series}-server-cloudimg-{arch}.manifest"),
            "manifest",
        ),
        ArtifactSpec::target(format!("{base}/{image}"), image),
    ]
}
