//! log_verify - consistency check for a tagger event log
//!
//! Checks that every entry parses, timestamps are RFC 3339 and ordered,
//! coordinates are complete and in range, and image references are unique,
//! follow the pot<N>.jpg naming and (optionally) exist on disk.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use pothole_tagger::verify::{verify_log_file, VerifyOptions};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "log_verify", about = "Verify a tagger event log")]
struct Args {
    /// Event log to check
    #[arg(long, default_value = "pothole_data.json")]
    log: PathBuf,

    /// Skip the image existence check
    #[arg(long)]
    skip_images: bool,

    /// Base directory for relative image paths
    #[arg(long, value_name = "DIR")]
    image_base: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// UI mode for stderr progress
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto)]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(args.ui);

    println!("log_verify: checking {}", args.log.display());

    let options = VerifyOptions {
        check_images: !args.skip_images,
        image_base: args.image_base.clone(),
    };
    let report = {
        let _stage = ui.stage("Verify event log");
        verify_log_file(&args.log, &options)?
    };

    println!(
        "{} entries, {} with coordinates, {} without",
        report.entries,
        report.located,
        report.entries - report.located
    );
    if report.is_clean() {
        println!("OK");
        return Ok(());
    }
    let shown = if args.verbose { report.issues.len() } else { 20 };
    for issue in report.issues.iter().take(shown) {
        println!("  {}", issue);
    }
    if report.issues.len() > shown {
        println!("  ... {} more (use --verbose)", report.issues.len() - shown);
    }
    Err(anyhow!("{} issue(s) found", report.issues.len()))
}
