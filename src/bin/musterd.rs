//! musterd - crew muster station
//!
//! Runs one attendance check:
//! 1. Verifies the crew member against the crew directory
//! 2. Loads the detection model
//! 3. Watches the configured source, showing live helmet/vest status
//! 4. On Ctrl-C or after `--duration-secs`, stops the camera and records the check

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use muster::detect::parse_detections;
use muster::{
    display_channel, error_kind, CaptureLoop, CrewId, Detector, FrameUpdate, MusterConfig,
    ScriptedBackend, SourceSpec, SqliteAttendanceStore, Station,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Crew member to check in.
    #[arg(long)]
    crew_id: CrewId,
    /// Officer PIN.
    #[arg(long, env = "MUSTER_PIN", hide_env_values = true)]
    pin: Option<String>,
    /// Frame source: camera index, /dev/video*, stub://name or an image path.
    #[arg(long)]
    source: Option<String>,
    /// Detection model path.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Replay fixed detections instead of running a model,
    /// e.g. "Hard Hat:0.95@40,20,80,60;Vest:0.8@30,90,120,150".
    #[arg(long, value_name = "DETECTIONS")]
    demo_detections: Option<String>,
    /// Stop and record after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    duration_secs: Option<u64>,
    /// Write the last annotated frame here. Label text needs a font
    /// (annotate.font_path or MUSTER_FONT_PATH); without one only boxes and
    /// empty label tabs are drawn.
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = MusterConfig::load()?;
    if let Some(source) = &args.source {
        cfg.source = SourceSpec::parse(source)?;
    }
    if let Some(model) = &args.model {
        cfg.model_path = model.clone();
    }

    let stop_requested = Arc::new(AtomicBool::new(false));
    {
        let stop_requested = Arc::clone(&stop_requested);
        ctrlc::set_handler(move || {
            stop_requested.store(true, Ordering::SeqCst);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let store = {
        let _stage = ui.stage("Open attendance store");
        SqliteAttendanceStore::open(&cfg.db_path)?
    };
    let (sink, updates) = display_channel(2);
    let capture = CaptureLoop::new(cfg.source_factory(), Arc::new(sink))
        .with_annotator(cfg.annotator()?)
        .with_classifier(cfg.classifier())
        .with_settings(cfg.capture);
    let mut station = Station::new(store, capture);

    {
        let _stage = ui.stage("Load detector");
        match &args.demo_detections {
            Some(raw) => {
                let detections = parse_detections(raw)?;
                let detector = Detector::with_backend(ScriptedBackend::repeating(detections));
                station.attach_detector(detector.into_shared());
            }
            None => {
                if let Err(err) = station.load_detector(&cfg.model_path, &cfg.detector) {
                    log::error!("detection unavailable: {:#}", err);
                }
            }
        }
    }

    {
        let _stage = ui.stage("Verify crew");
        let crew = station.verify_crew(args.crew_id)?;
        log::info!("welcome, {} ({})", crew.name, crew.role);
    }

    station.start_camera()?;
    log::info!("watching {}; press Ctrl-C to record the check", cfg.source);

    let deadline = args
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut live = ui.live("equipment:");
    let mut last_update: Option<FrameUpdate> = None;
    loop {
        if stop_requested.load(Ordering::SeqCst) {
            break;
        }
        if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
            break;
        }
        match updates.recv_timeout(Duration::from_millis(100)) {
            Ok(update) => {
                live.update(&update.equipment.summary());
                last_update = Some(update);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
        if !station.capture_loop().is_running() {
            log::info!("source finished");
            break;
        }
    }
    drop(live);

    let recorded = {
        let _stage = ui.stage("Record attendance check");
        station.capture_and_analyze(args.pin.as_deref())
    };
    // Updates presented before the worker was joined.
    while let Ok(update) = updates.try_recv() {
        last_update = Some(update);
    }

    if let (Some(path), Some(update)) = (&args.snapshot, &last_update) {
        update
            .annotated
            .save(path)
            .with_context(|| format!("failed to write snapshot {}", path.display()))?;
        log::info!("snapshot written to {}", path.display());
    }

    match recorded {
        Ok(check) => {
            let event = &check.event;
            println!(
                "check {} recorded for crew {} at {}: {}{}",
                check.record_id,
                event.crew_id,
                event.captured_at_utc.to_rfc3339(),
                event.equipment().summary(),
                if event.is_compliant() { "" } else { " (NOT COMPLIANT)" }
            );
            if let Some(note) = &event.verification.note {
                println!("verification: {note}");
            }
            Ok(())
        }
        Err(err) => {
            let code = error_kind(&err).map(|kind| kind.code()).unwrap_or("ERROR");
            Err(anyhow!("{code}: attendance was NOT recorded: {:#}", err))
        }
    }
}
