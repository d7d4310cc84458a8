//! CLI entry point: parse a `.torrent` file and download it to disk.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use rstc::orchestrator::Orchestrator;
use rstc::progress::ProgressSink;
use rstc::torrent::metainfo::Torrent;

/// A leech-only BitTorrent client: downloads a single torrent and exits.
#[derive(Debug, Parser)]
#[command(name = "rstc", version, about)]
struct Args {
    /// Path to the `.torrent` metainfo file.
    torrent_file: PathBuf,

    /// Directory to write the downloaded file(s) into.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Increase log verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

struct IndicatifSink(ProgressBar);

impl ProgressSink for IndicatifSink {
    fn update(&self, value: u8) {
        self.0.set_position(value as u64);
        if value >= 100 {
            self.0.finish_with_message("done");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let data = std::fs::read(&args.torrent_file)
        .with_context(|| format!("reading torrent file {}", args.torrent_file.display()))?;
    let torrent = Torrent::parse(&data).context("parsing metainfo file")?;

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len}% {msg}")
            .expect("static template is valid"),
    );
    let sink: Arc<dyn ProgressSink> = Arc::new(IndicatifSink(bar));

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating output directory {}", args.output_dir.display()))?;

    let orchestrator = Orchestrator::new(&torrent, args.output_dir.clone(), sink);
    orchestrator.run().await.context("downloading torrent")?;

    println!("downloaded {} to {}", torrent.layout.name(), args.output_dir.display());
    Ok(())
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
