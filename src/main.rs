use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use remora::metainfo::Metainfo;
use remora::storage::{FileLayout, PieceStore};
use remora::swarm::Swarm;
use remora::tracker::Tracker;

#[derive(Parser, Debug)]
#[command(author, version, about = "A leech-only BitTorrent client")]
struct Args {
    /// Path to the .torrent file
    torrent: PathBuf,

    /// Directory the downloaded files are placed under
    #[arg(short, long, default_value = "./downloads")]
    output: PathBuf,

    /// Extra tracker URLs, one per line; a missing file is fine
    #[arg(long, default_value = "./externalTrackerList.txt")]
    trackers: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let data = std::fs::read(&args.torrent)
        .with_context(|| format!("could not read torrent file {}", args.torrent.display()))?;
    let meta = Metainfo::from_bytes(&data).context("could not parse torrent file")?;

    info!(
        name = %meta.info.name,
        pieces = meta.info.pieces.len(),
        bytes = meta.info.total_length,
        "loaded torrent"
    );

    let trackers = gather_trackers(&meta, &args.trackers);
    if trackers.is_empty() {
        warn!("no usable trackers; running without peer discovery");
    }

    let layout = FileLayout::new(args.output, meta.info.files.clone())
        .context("invalid file layout")?;
    let store = PieceStore::new(layout, meta.info.piece_length, meta.info.pieces.clone());

    store.allocate().await.context("could not create output files")?;
    store.verify_existing().await;

    let mut swarm = Swarm::new(Arc::new(meta), store, trackers);
    swarm.run().await;

    Ok(())
}

/// Merges the metainfo's announce list with the optional local tracker
/// file, skipping URLs we cannot speak to (anything not plain HTTP).
fn gather_trackers(meta: &Metainfo, extra_file: &PathBuf) -> Vec<Tracker> {
    let mut urls = meta.trackers();

    if let Ok(contents) = std::fs::read_to_string(extra_file) {
        for line in contents.lines() {
            let url = line.trim();
            if !url.is_empty() && !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        }
    }

    urls.into_iter()
        .filter_map(|url| match Tracker::new(&url) {
            Ok(tracker) => Some(tracker),
            Err(e) => {
                warn!(%url, error = %e, "skipping tracker");
                None
            }
        })
        .collect()
}
