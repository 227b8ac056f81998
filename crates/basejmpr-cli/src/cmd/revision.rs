//! `basejmpr revision` - create, list and check base image revisions

use anyhow::{Result, bail};
use clap::{Args, Subcommand};

use basejmpr_core::{HttpFetcher, SharedProgress};
use basejmpr_store::{RevisionId, RevisionStore, StoreError};

use crate::cloud_images;
use crate::config::Config;
use crate::report::{revision_entries, revisions_table, verify_table};

#[derive(Args, Debug)]
pub struct RevisionArgs {
    #[command(subcommand)]
    pub action: RevisionAction,
}

#[derive(Subcommand, Debug)]
pub enum RevisionAction {
    /// List available revisions
    List {
        /// Only this revision
        #[arg(short, long)]
        revision: Option<RevisionId>,
    },
    /// Download a cloud image into a new revision
    Create {
        /// Revision to create (default: latest + 1)
        #[arg(short, long)]
        revision: Option<RevisionId>,

        /// Ubuntu series (default from config)
        #[arg(long)]
        series: Option<String>,

        /// Image architecture (default from config)
        #[arg(long)]
        arch: Option<String>,

        /// Keep the revision directory if creation fails
        #[arg(long)]
        no_cleanup: bool,
    },
    /// Check linked images against SHA256SUMS
    Verify {
        /// Revision to verify (default: latest)
        #[arg(short, long)]
        revision: Option<RevisionId>,
    },
    /// Print the backing file path for new instances
    Path {
        /// Revision to use (default: latest)
        #[arg(short, long)]
        revision: Option<RevisionId>,
    },
}

pub fn run(args: RevisionArgs, config: &Config, progress: &SharedProgress) -> Result<()> {
    let store = RevisionStore::new(config.store_root());
    match args.action {
        RevisionAction::List { revision } => list(&store, revision.as_ref()),
        RevisionAction::Create {
            revision,
            series,
            arch,
            no_cleanup,
        } => {
            let series = series.unwrap_or_else(|| config.images.series.clone());
            let arch = arch.unwrap_or_else(|| config.images.arch.clone());
            create(
                &store.keep_failed(no_cleanup),
                revision.as_ref(),
                &series,
                &arch,
                config,
                progress,
            )
        }
        RevisionAction::Verify { revision } => verify(&store, revision),
        RevisionAction::Path { revision } => {
            println!("{}", store.backing_file(revision.as_ref())?.display());
            Ok(())
        }
    }
}

fn list(store: &RevisionStore, revision: Option<&RevisionId>) -> Result<()> {
    let revisions = store.list_revisions(revision)?;
    if let Some(id) = revision {
        if revisions.is_empty() {
            return Err(StoreError::NotFound(id.clone()).into());
        }
    }
    if revisions.is_empty() {
        eprintln!("No revisions in {}.", store.root().display());
        return Ok(());
    }

    let entries = revision_entries(store, &revisions)?;
    eprintln!("\n{}", revisions_table(&entries));
    eprintln!("{} revision(s) total", entries.len());
    Ok(())
}

fn create(
    store: &RevisionStore,
    revision: Option<&RevisionId>,
    series: &str,
    arch: &str,
    config: &Config,
    progress: &SharedProgress,
) -> Result<()> {
    basejmpr_core::install_signal_handlers();

    let artifacts = cloud_images::artifacts(&config.images.base_url, series, arch);
    let fetcher = HttpFetcher::new(config.http_config(), progress.clone());

    let created = match revision {
        Some(id) => store.create_revision(id, &artifacts, &fetcher)?,
        None => store.create_next_revision(&artifacts, &fetcher)?,
    };

    progress.println(format!(
        "Created base revision {} ({series}/{arch}) in {}",
        created.id,
        store.revision_dir(&created.id).display()
    ));
    for file in &created.files {
        progress.println(format!("  {file}"));
    }
    Ok(())
}

fn verify(store: &RevisionStore, revision: Option<RevisionId>) -> Result<()> {
    let id = match revision {
        Some(id) => id,
        None => store.latest()?.ok_or(StoreError::NoRevisions)?,
    };

    let results = store.verify_revision(&id)?;
    if results.is_empty() {
        bail!("revision {id} has no files listed in SHA256SUMS");
    }

    eprintln!("\nRevision {id}:");
    eprintln!("{}", verify_table(&results));

    let failed = results.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        bail!("{failed} file(s) in revision {id} failed verification");
    }
    eprintln!("All files verified OK.");
    Ok(())
}
