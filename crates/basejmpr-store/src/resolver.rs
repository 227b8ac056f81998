//! Backing file discovery for a single disk image
//!
//! The introspection tool (`qemu-img info`) prints a line such as
//!
//! ```text
//! backing file: ../backing_files/1/disk1.img (actual path: /var/lib/libvirt/images/backing_files/1/disk1.img)
//! ```
//!
//! Only that line matters here. When the parenthesized actual path is
//! present it wins over the raw reference, which may be relative.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use basejmpr_core::run_with_timeout;

use crate::error::{StoreError, StoreResult};

const BACKING_LABEL: &str = "backing file:";
const ACTUAL_PATH_LABEL: &str = "(actual path:";

/// `qemu-img` diagnostics meaning "this file is not an image I can read".
/// Any other non-zero exit is a broken environment, not a fact about the file.
const NOT_AN_IMAGE: &[&str] = &[
    "No such file or directory",
    "Is a directory",
    "Unknown driver",
    "Unknown file format",
    "Could not determine image format",
    "is not in qcow2 format",
];

/// Produces raw textual metadata for a disk image.
pub trait ImageIntrospector {
    /// `Ok(None)` when the tool ran but reported the file is not an image.
    /// `Err(IntrospectionFailed)` when the tool could not run to completion or
    /// failed for any other reason.
    fn introspect(&self, image: &Path) -> StoreResult<Option<String>>;
}

/// `qemu-img info` with a per-call timeout.
#[derive(Debug, Clone)]
pub struct QemuImg {
    program: String,
    timeout: Duration,
    force_share: bool,
}

impl QemuImg {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            force_share: true,
        }
    }

    /// Pass `-U` so images locked by a running VM can still be inspected.
    pub fn force_share(mut self, enabled: bool) -> Self {
        self.force_share = enabled;
        self
    }

    fn args(&self, image: &Path) -> Vec<OsString> {
        let mut args = vec![OsString::from("info")];
        if self.force_share {
            args.push(OsString::from("-U"));
        }
        args.push(image.as_os_str().to_owned());
        args
    }
}

impl Default for QemuImg {
    fn default() -> Self {
        Self::new("qemu-img", Duration::from_secs(30))
    }
}

impl ImageIntrospector for QemuImg {
    fn introspect(&self, image: &Path) -> StoreResult<Option<String>> {
        let out = run_with_timeout(&self.program, &self.args(image), None, self.timeout).map_err(
            |source| StoreError::IntrospectionFailed {
                image: image.to_path_buf(),
                source,
            },
        )?;

        if !out.success && is_not_an_image(&out.output) {
            log::debug!(
                "{} info {}: exit {:?}, treating as no backing file: {}",
                self.program,
                image.display(),
                out.code,
                out.output.trim()
            );
            return Ok(None);
        }

        let out = out
            .check(&self.program)
            .map_err(|source| StoreError::IntrospectionFailed {
                image: image.to_path_buf(),
                source,
            })?;
        Ok(Some(out.output))
    }
}

fn is_not_an_image(output: &str) -> bool {
    NOT_AN_IMAGE.iter().any(|diag| output.contains(diag))
}

/// Extract the backing file reference from introspection output.
pub fn parse_backing_reference(output: &str) -> Option<String> {
    output.lines().find_map(parse_backing_line)
}

fn parse_backing_line(line: &str) -> Option<String> {
    let rest = line.strip_prefix(BACKING_LABEL)?.trim();

    if let Some(start) = rest.find(ACTUAL_PATH_LABEL) {
        let actual = &rest[start + ACTUAL_PATH_LABEL.len()..];
        let actual = actual.strip_suffix(')').unwrap_or(actual).trim();
        if !actual.is_empty() {
            return Some(actual.to_string());
        }
    }

    rest.split_whitespace().next().map(str::to_string)
}

/// Asks an introspector for an image's backing file reference.
pub struct BackingFileResolver<I> {
    introspector: I,
}

impl<I: ImageIntrospector> BackingFileResolver<I> {
    pub fn new(introspector: I) -> Self {
        Self { introspector }
    }

    /// Backing file reference of `image`, or `None` if it has none or is not
    /// a recognised image.
    pub fn get_backing_reference(&self, image: &Path) -> StoreResult<Option<String>> {
        Ok(self
            .introspector
            .introspect(image)?
            .as_deref()
            .and_then(parse_backing_reference))
    }
}

/// Split a backing reference into `(version, name)`: the directory directly
/// above the file, and the file name.
pub fn split_reference(reference: &str) -> Option<(String, String)> {
    let path = PathBuf::from(reference);
    let name = path.file_name()?.to_string_lossy().into_owned();
    let version = path.parent()?.file_name()?.to_string_lossy().into_owned();
    Some((version, name))
}
