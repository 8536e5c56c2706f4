//! Headless demo driver
//!
//! `mmviz [settings.json | preset] [ticks]` builds the tree, runs the given
//! number of ticks against the in-memory scene graph and prints a JSON
//! snapshot. Without arguments it runs the attention preset.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::path::Path;
use std::process::ExitCode;

use log::{error, info, warn};

use mmviz_core::{presets, Settings};
use mmviz_visualization::{SceneGraph, VizError, Visualizer};

const DEFAULT_PRESET: &str = "attention";
const DEFAULT_TICKS: usize = 64;

fn load(source: &str) -> Result<Settings, VizError> {
    if let Some(root) = presets::by_name(source) {
        info!("using preset {:?}", source);
        return Ok(Settings { root, ..Settings::default() });
    }
    info!("loading settings from {}", source);
    Ok(Settings::load(Path::new(source))?)
}

fn run(source: &str, ticks: usize) -> Result<(), VizError> {
    let settings = load(source)?;
    let mut viz = Visualizer::new(SceneGraph::new(), settings);
    let cycles = viz.run(ticks);

    let snapshot = viz.snapshot();
    for diagnostic in &snapshot.diagnostics {
        warn!("{}: {}", diagnostic.source, diagnostic.message);
    }
    let stats = viz.renderer().stats();
    info!(
        "{} ticks, {} cycles, {} live objects ({} created, {} disposed)",
        ticks,
        cycles,
        viz.renderer().live_objects(),
        stats.created,
        stats.disposed
    );
    println!("{}", snapshot.to_json()?);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let source = args.next().unwrap_or_else(|| DEFAULT_PRESET.to_owned());
    let ticks = match args.next().map(|t| t.parse::<usize>()) {
        None => DEFAULT_TICKS,
        Some(Ok(n)) => n,
        Some(Err(e)) => {
            error!("invalid tick count: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&source, ticks) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
