//! tagger - roadway defect geotagging daemon
//!
//! Reads frames, runs the configured detector, and for every recordable
//! detection writes `pot<N>.jpg` plus an entry in the JSON event log.
//! Type `q` + Enter or press Ctrl-C to stop.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use pothole_tagger::{
    detect::{build_detector, load_labels},
    geo::build_provider,
    ingest::open_source,
    pipeline::{build_display, CtrlCStop, PipelineState, StdinStop, StopSignal},
    EventRecordStore, GeoLocationProvider, JsonFileLogStorage, PipelineOrchestrator, TaggerConfig,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "tagger", about = "Geotag roadway defects from a detection stream")]
struct Args {
    /// Config file (.toml, otherwise JSON)
    #[arg(long, env = "POTHOLE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Frame source: stub://<name> or a directory of images
    #[arg(long)]
    source: Option<String>,

    /// Stop a synthetic source after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Replay detections from a JSON file
    #[arg(long, value_name = "PATH")]
    replay: Option<PathBuf>,

    /// Directory for event images
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Event log path
    #[arg(long, value_name = "PATH")]
    log_path: Option<PathBuf>,

    /// Location provider (device|serial|http|static)
    #[arg(long)]
    geo: Option<String>,

    /// Write the latest annotated frame here
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,

    /// Ignore commands on stdin (Ctrl-C still stops)
    #[arg(long)]
    no_stdin: bool,

    /// UI mode for stderr progress
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto)]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(args.ui);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = TaggerConfig::load_from(args.config.as_deref())?;
        apply_args(&mut cfg, &args)?;
        cfg.validate()?;
        cfg
    };

    let source = {
        let _stage = ui.stage("Open frame source");
        open_source(&cfg.source)?
    };
    let detector = {
        let _stage = ui.stage("Load detector");
        build_detector(&cfg.detector)?
    };
    let labels = cfg
        .detector
        .labels_path
        .as_deref()
        .map(load_labels)
        .unwrap_or_default();
    let provider = {
        let _stage = ui.stage("Start location provider");
        build_provider(&cfg.geo)?
    };

    std::fs::create_dir_all(&cfg.output.image_dir).with_context(|| {
        format!("create image directory {}", cfg.output.image_dir.display())
    })?;
    if let Some(parent) = cfg.output.log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create log directory {}", parent.display()))?;
        }
    }
    let store = EventRecordStore::new(JsonFileLogStorage::new(
        &cfg.output.log_path,
        cfg.output.log_mode,
    ));

    let mut stops: Vec<Box<dyn StopSignal>> = vec![Box::new(CtrlCStop::install()?)];
    if !args.no_stdin {
        stops.push(Box::new(StdinStop::spawn()));
    }

    log::info!(
        "tagger running: source={} provider={} log={} images={}",
        cfg.source.uri,
        provider.kind(),
        cfg.output.log_path.display(),
        cfg.output.image_dir.display()
    );

    let mut pipeline = PipelineOrchestrator::new(
        source,
        detector,
        provider,
        store,
        cfg.output.image_dir.clone(),
    )
    .with_filter(cfg.filter)
    .with_display(build_display(&cfg.display))
    .with_stop_signal(Box::new(stops))
    .with_labels(labels);

    {
        let mut stage = ui.stage("Process frames");
        while pipeline.step() == PipelineState::Running {
            let summary = pipeline.summary();
            stage.set_detail(&format!(
                "{} frames, {} events, {:.1} fps",
                summary.frames,
                summary.events_recorded,
                pipeline.metrics().fps()
            ));
        }
    }

    let summary = pipeline.summary();
    log::info!(
        "run finished: frames={} detections={} recordable={} events={} absent_fixes={}",
        summary.frames,
        summary.detections,
        summary.recordable,
        summary.events_recorded,
        summary.absent_fixes
    );
    if summary.flush_failures + summary.image_failures + summary.detector_failures > 0 {
        log::warn!(
            "failures: flush={} image={} detector={} source={}",
            summary.flush_failures,
            summary.image_failures,
            summary.detector_failures,
            summary.source_failures
        );
    }
    if pipeline.store().pending() > 0 {
        log::error!(
            "{} event(s) never reached {}",
            pipeline.store().pending(),
            cfg.output.log_path.display()
        );
    }
    Ok(())
}

fn apply_args(cfg: &mut TaggerConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        cfg.source.uri = source.clone();
    }
    if args.frames.is_some() {
        cfg.source.frames = args.frames;
    }
    if let Some(replay) = &args.replay {
        cfg.detector.replay_path = Some(replay.clone());
    }
    if let Some(dir) = &args.output_dir {
        cfg.output.image_dir = dir.clone();
    }
    if let Some(path) = &args.log_path {
        cfg.output.log_path = path.clone();
    }
    if let Some(geo) = &args.geo {
        cfg.geo.provider = geo.parse()?;
    }
    if let Some(path) = &args.snapshot {
        cfg.display.snapshot_path = Some(path.clone());
    }
    Ok(())
}
