//! basejmpr - QEMU base image management
//!
//! Keeps numbered revisions of cloud images under `{root}/backing_files`
//! and reports which VM disk images in `{root}` use them as backing files.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cloud_images;
mod cmd;
mod config;
mod report;

use config::Config;

#[derive(Parser)]
#[command(name = "basejmpr")]
#[command(about = "QEMU base image management")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./basejmpr.toml or ~/.config/basejmpr/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Instance pool root (revisions live in <path>/backing_files)
    #[arg(short, long, global = true)]
    path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Show revisions and the images consuming them
    Info(cmd::info::InfoArgs),
    /// Manage base image revisions
    Revision(cmd::revision::RevisionArgs),
    /// Show current configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = Arc::new(basejmpr_core::ProgressContext::new());

    // Logging:
    //   TTY:     quiet (warn) unless --debug
    //   non-TTY: info unless --debug
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    basejmpr_core::init_logging(quiet, cli.debug, multi);

    let mut config = if let Some(path) = cli.config {
        Config::from_file(&path)?
    } else {
        Config::load()?
    };
    if let Some(path) = cli.path {
        config.paths.root = path;
    }

    match cli.command {
        Command::Info(args) => cmd::info::run(args, &config),
        Command::Revision(args) => cmd::revision::run(args, &config, &progress),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec![
                "Pool root",
                &config.paths.root.display().to_string(),
            ]);
            table.add_row(vec![
                "Revisions",
                &config.store_root().display().to_string(),
            ]);
            table.add_row(vec!["Image base URL", &config.images.base_url]);
            table.add_row(vec![
                "Image",
                &cloud_images::image_name(&config.images.series, &config.images.arch),
            ]);
            table.add_row(vec![
                "Introspection",
                &format!(
                    "{} info{} ({}s timeout)",
                    config.introspect.command,
                    if config.introspect.force_share { " -U" } else { "" },
                    config.introspect.timeout_secs
                ),
            ]);
            table.add_row(vec![
                "Read timeout",
                &format!("{}s", config.http.read_timeout),
            ]);
            table.add_row(vec!["Max retries", &config.http.max_retries.to_string()]);

            eprintln!("\n{table}");
            Ok(())
        }
    }
}
