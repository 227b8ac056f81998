//! SHA256SUMS parsing and SHA-256 file hashing

use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// One line of a checksum manifest: `<sha256>  <filename>` or the binary
/// mode form `<sha256> *<filename>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumEntry {
    pub digest: String,
    pub file_name: String,
}

/// Parse one manifest line. Blank lines, comments and lines without a file
/// name yield `None`.
pub fn parse_line(line: &str) -> Option<ChecksumEntry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (digest, rest) = line.split_once(char::is_whitespace)?;
    let file_name = rest.trim_start();
    let file_name = file_name.strip_prefix('*').unwrap_or(file_name).trim_end();
    if file_name.is_empty() {
        return None;
    }
    Some(ChecksumEntry {
        digest: digest.to_ascii_lowercase(),
        file_name: file_name.to_string(),
    })
}

/// Parse a whole manifest, skipping lines that are not entries.
pub fn parse_checksums(content: &str) -> Vec<ChecksumEntry> {
    content.lines().filter_map(parse_line).collect()
}

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_mode_line() {
        let e = parse_line("abc123  disk1.img").unwrap();
        assert_eq!(e.digest, "abc123");
        assert_eq!(e.file_name, "disk1.img");
    }

    #[test]
    fn binary_mode_line() {
        let e = parse_line("ABC123 *jammy-server-cloudimg-amd64.img").unwrap();
        assert_eq!(e.digest, "abc123");
        assert_eq!(e.file_name, "jammy-server-cloudimg-amd64.img");
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let entries = parse_checksums("\n# generated\nabc  a.img\n   \ndef *b.img\n");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].file_name, "a.img");
        assert_eq!(entries[1].file_name, "b.img");
    }

    #[test]
    fn digest_without_name_is_not_an_entry() {
        assert!(parse_line("abc123").is_none());
        assert!(parse_line("abc123   ").is_none());
    }

    #[test]
    fn sha256_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
