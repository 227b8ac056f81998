//! `basejmpr info` - revisions and the images consuming them

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use basejmpr_store::{
    BackingFileResolver, ConsumerReconciler, RevisionId, RevisionStore, StoreError,
};

use crate::config::Config;
use crate::report::{InfoReport, revision_entries};

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Only show this revision and its consumers
    #[arg(short, long)]
    pub revision: Option<RevisionId>,

    /// Also list images that do not consume any revision
    #[arg(long)]
    pub show_detached: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: Format,
}

#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum Format {
    Table,
    Json,
}

pub fn run(args: InfoArgs, config: &Config) -> Result<()> {
    let pool = &config.paths.root;
    let store = RevisionStore::new(config.store_root());

    // Match against every revision; --revision only narrows the output
    let revisions = store.list_revisions(None)?;
    if let Some(id) = &args.revision {
        if !revisions.contains_key(id) {
            return Err(StoreError::NotFound(id.clone()).into());
        }
    }

    let resolver = BackingFileResolver::new(config.introspector());
    let result = ConsumerReconciler::new(&resolver)
        .exclude(store.root())
        .reconcile(pool, &revisions)
        .with_context(|| format!("Failed to scan {}", pool.display()))?;

    let entries = revision_entries(&store, &revisions)?;
    let report = InfoReport::new(
        entries,
        &result,
        args.revision.as_ref(),
        args.show_detached,
    );

    match args.format {
        Format::Table => print!("{}", report.render()),
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}
