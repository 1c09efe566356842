//! clip-reader: read the clipboard aloud through a local text-to-speech server.
//!
//! Space fetches speech for the clipboard text and plays it; pressing it again pauses or
//! resumes. `s` stops, `q` quits.

use anyhow::Result;
use clap::Parser;
use clip_reader::cli::Args;
use clip_reader::config::{self, FileConfig, ReaderConfig};
use clip_reader::runtime;
use clip_reader::term::CrlfWriter;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,clip_reader=info")),
        )
        .with_writer(|| CrlfWriter::new(std::io::stderr()))
        .init();

    let file = match &args.config {
        Some(path) => config::load_file(path)?,
        None => FileConfig::default(),
    };
    let config = ReaderConfig::resolve(&args, file)?;

    if args.list_devices {
        return runtime::list_devices(&config);
    }
    runtime::run(config, args.choose_device)
}
