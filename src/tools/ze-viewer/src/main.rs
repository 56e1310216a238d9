use crate::config::ViewerConfig;
use crate::viewer::Viewer;
use clap::Parser;
use mimalloc::MiMalloc;
use std::path::PathBuf;
use ze_core::logger::StdoutSink;
use ze_core::{logger, thread, ze_fatal, ze_info};

mod config;
mod demo;
mod viewer;

#[global_allocator]
static GLOBAL_ALLOCATOR: MiMalloc = MiMalloc;

/// Renders the demo scene off-screen for a number of frames
#[derive(Parser)]
#[clap(name = "ze-viewer", version)]
struct Args {
    /// Configuration file. Defaults apply when omitted
    #[clap(long, value_parser)]
    config: Option<PathBuf>,

    /// Overrides `[viewer] frame_count`
    #[clap(long, value_parser)]
    frames: Option<u64>,
}

fn main() {
    thread::set_thread_name(std::thread::current().id(), "Main Thread".to_string());
    logger::register_sink(StdoutSink::new());

    #[cfg(feature = "profiling")]
    puffin::set_scopes_on(true);

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ViewerConfig::load(path).unwrap_or_else(|error| ze_fatal!("{}", error)),
        None => ViewerConfig::default(),
    };
    if let Some(frames) = args.frames {
        config.viewer.frame_count = frames;
    }
    logger::set_min_severity(config.viewer.log_level);

    let viewer = Viewer::new(config).unwrap_or_else(|error| ze_fatal!("{}", error));
    match viewer.run() {
        Ok(frame_count) => ze_info!("Exiting after {} frames", frame_count),
        Err(error) => ze_fatal!("{}", error),
    }
}
