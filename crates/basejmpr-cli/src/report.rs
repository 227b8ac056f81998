//! Human and JSON rendering of revisions and their consumers

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use serde::Serialize;

use basejmpr_store::{
    ConsumerGroup, ReconciliationResult, RevisionId, RevisionSet, RevisionStore, StoreResult,
    VerifyResult,
};

/// A revision link and where it points.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEntry {
    pub file: String,
    /// `None` when the link is dangling.
    pub resolved: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevisionEntry {
    pub id: RevisionId,
    pub files: Vec<LinkEntry>,
    pub targets: Vec<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Resolve links and read provenance for every revision, in numeric order.
pub fn revision_entries(
    store: &RevisionStore,
    revisions: &RevisionSet,
) -> StoreResult<Vec<RevisionEntry>> {
    let mut entries = Vec::with_capacity(revisions.len());
    for revision in revisions.values() {
        let files = revision
            .files
            .iter()
            .map(|file| {
                let resolved = match store.resolve_link(&revision.id, file) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        log::warn!("{e}");
                        None
                    }
                };
                LinkEntry {
                    file: file.clone(),
                    resolved,
                }
            })
            .collect();
        let created_at = store.read_meta(&revision.id)?.map(|m| m.created_at);
        entries.push(RevisionEntry {
            id: revision.id.clone(),
            files,
            targets: revision.targets.iter().cloned().collect(),
            created_at,
        });
    }
    Ok(entries)
}

/// Output of `basejmpr info`.
#[derive(Debug, Serialize)]
pub struct InfoReport {
    pub revisions: Vec<RevisionEntry>,
    pub consumers: Vec<ConsumerGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detached: Option<Vec<PathBuf>>,
}

impl InfoReport {
    /// With `filter`, only that revision and its consumers are kept.
    pub fn new(
        revisions: Vec<RevisionEntry>,
        result: &ReconciliationResult,
        filter: Option<&RevisionId>,
        show_detached: bool,
    ) -> Self {
        let keep = |id: &RevisionId| filter.is_none_or(|f| f == id);
        Self {
            revisions: revisions.into_iter().filter(|r| keep(&r.id)).collect(),
            consumers: result
                .groups()
                .iter()
                .filter(|g| keep(&g.revision))
                .cloned()
                .collect(),
            detached: show_detached.then(|| result.detached().to_vec()),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("Available revisions:");
        if self.revisions.is_empty() {
            out.push_str(" -\n");
        } else {
            out.push_str(&format!("\n{}\n", revisions_table(&self.revisions)));
        }

        out.push_str("\nConsumers:");
        if self.consumers.is_empty() {
            out.push_str(" -\n");
        } else {
            out.push_str(&format!("\n{}\n", consumers_table(&self.consumers)));
        }

        if let Some(detached) = &self.detached {
            out.push_str("\nDetached:");
            if detached.is_empty() {
                out.push_str(" -\n");
            } else {
                out.push('\n');
                for image in detached {
                    out.push_str(&format!("  {}\n", image.display()));
                }
            }
        }
        out
    }
}

fn header(table: &mut Table, columns: &[&str]) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(
            columns
                .iter()
                .map(|c| Cell::new(c).fg(Color::Cyan))
                .collect::<Vec<_>>(),
        );
}

/// `file <- resolved target`, or a dangling marker.
pub fn link_label(link: &LinkEntry) -> String {
    match &link.resolved {
        Some(path) => format!("{} <- {}", link.file, path.display()),
        None => format!("{} <- (dangling)", link.file),
    }
}

pub fn revisions_table(entries: &[RevisionEntry]) -> Table {
    let mut table = Table::new();
    header(&mut table, &["Revision", "Files", "Created"]);

    for entry in entries {
        let files = entry
            .files
            .iter()
            .map(link_label)
            .collect::<Vec<_>>()
            .join("\n");
        let created = entry
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let files_cell = if entry.files.iter().any(|f| f.resolved.is_none()) {
            Cell::new(files).fg(Color::Red)
        } else {
            Cell::new(files)
        };
        table.add_row(vec![
            Cell::new(&entry.id),
            files_cell,
            Cell::new(created).fg(Color::DarkGrey),
        ]);
    }
    table
}

pub fn consumers_table(groups: &[ConsumerGroup]) -> Table {
    let mut table = Table::new();
    header(&mut table, &["Revision", "Image", "Backing file"]);

    for group in groups {
        for consumer in &group.consumers {
            table.add_row(vec![
                Cell::new(&group.revision),
                Cell::new(consumer.image.display()),
                Cell::new(consumer.backing_file.display()),
            ]);
        }
    }
    table
}

/// First 12 characters.
fn short(hash: &str) -> &str {
    match hash.char_indices().nth(12) {
        Some((end, _)) => &hash[..end],
        None => hash,
    }
}

pub fn verify_table(results: &[VerifyResult]) -> Table {
    let mut table = Table::new();
    header(&mut table, &["File", "Expected", "Actual", "Status"]);

    for r in results {
        let status = if r.ok {
            Cell::new("OK").fg(Color::Green)
        } else if r.actual == "MISSING" {
            Cell::new("MISSING").fg(Color::Yellow)
        } else {
            Cell::new("FAIL").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(&r.file),
            Cell::new(short(&r.expected)),
            Cell::new(short(&r.actual)),
            status,
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use basejmpr_store::{CandidateImage, Resolution};

    fn id(s: &str) -> RevisionId {
        RevisionId::parse(s).unwrap()
    }

    fn entry(r: &str) -> RevisionEntry {
        RevisionEntry {
            id: id(r),
            files: vec![LinkEntry {
                file: "disk1.img".to_string(),
                resolved: Some(PathBuf::from(format!("/pool/backing_files/{r}/targets/disk1.img"))),
            }],
            targets: vec!["disk1.img".to_string()],
            created_at: None,
        }
    }

    fn resolved(image: &str, r: &str) -> CandidateImage {
        CandidateImage {
            path: PathBuf::from(image),
            backing_reference: Some(format!("{r}/disk1.img")),
            resolution: Resolution::Resolved {
                revision: id(r),
                backing_file: PathBuf::from(format!("{r}/disk1.img")),
            },
        }
    }

    fn result() -> ReconciliationResult {
        ReconciliationResult::from_candidates(vec![
            resolved("/pool/a/a.img", "2"),
            resolved("/pool/b/b.img", "1"),
            CandidateImage {
                path: PathBuf::from("/pool/c/c.img"),
                backing_reference: None,
                resolution: Resolution::Detached,
            },
        ])
    }

    #[test]
    fn link_label_shows_resolved_target() {
        assert_eq!(
            link_label(&entry("1").files[0]),
            "disk1.img <- /pool/backing_files/1/targets/disk1.img"
        );
        let dangling = LinkEntry {
            file: "x.img".to_string(),
            resolved: None,
        };
        assert_eq!(link_label(&dangling), "x.img <- (dangling)");
    }

    #[test]
    fn unfiltered_report_keeps_everything() {
        let report = InfoReport::new(vec![entry("1"), entry("2")], &result(), None, false);
        assert_eq!(report.revisions.len(), 2);
        let order: Vec<_> = report.consumers.iter().map(|g| g.revision.as_str()).collect();
        assert_eq!(order, ["2", "1"]);
        assert!(report.detached.is_none());
    }

    #[test]
    fn filter_restricts_revisions_and_consumers() {
        let report = InfoReport::new(vec![entry("1"), entry("2")], &result(), Some(&id("1")), true);
        assert_eq!(report.revisions.len(), 1);
        assert_eq!(report.consumers.len(), 1);
        assert_eq!(report.consumers[0].consumers[0].image, PathBuf::from("/pool/b/b.img"));
        assert_eq!(report.detached, Some(vec![PathBuf::from("/pool/c/c.img")]));
    }

    #[test]
    fn render_sections() {
        let report = InfoReport::new(vec![entry("1")], &result(), None, true);
        let text = report.render();
        assert!(text.starts_with("Available revisions:\n"));
        assert!(text.contains("disk1.img <- /pool/backing_files/1/targets/disk1.img"));
        assert!(text.contains("/pool/a/a.img"));
        assert!(text.contains("Detached:\n  /pool/c/c.img"));
    }

    #[test]
    fn render_empty_sections_as_dash() {
        let report = InfoReport::new(Vec::new(), &ReconciliationResult::default(), None, true);
        assert_eq!(
            report.render(),
            "Available revisions: -\n\nConsumers: -\n\nDetached: -\n"
        );
    }

    #[test]
    fn json_omits_detached_unless_requested() {
        let report = InfoReport::new(vec![entry("1")], &result(), None, false);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["revisions"][0]["id"], "1");
        assert_eq!(json["consumers"][0]["revision"], "2");
        assert_eq!(json["consumers"][0]["consumers"][0]["backing_file"], "2/disk1.img");
        assert!(json.get("detached").is_none());
    }

    #[test]
    fn short_digest_respects_char_boundaries() {
        assert_eq!(short("0123456789abcdef"), "0123456789ab");
        assert_eq!(short("abc"), "abc");
        assert_eq!(short("ééééééééééééé"), "éééééééééééé");
    }

    #[test]
    fn verify_statuses() {
        let results = vec![
            VerifyResult {
                file: "a.img".to_string(),
                expected: "abc".to_string(),
                actual: "abc".to_string(),
                ok: true,
            },
            VerifyResult {
                file: "b.img".to_string(),
                expected: "abc".to_string(),
                actual: "MISSING".to_string(),
                ok: false,
            },
        ];
        let rendered = verify_table(&results).to_string();
        assert!(rendered.contains("OK"));
        assert!(rendered.contains("MISSING"));
    }
}
