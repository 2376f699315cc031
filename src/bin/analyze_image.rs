//! analyze_image - run detection on one image and write an annotated copy

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use muster::detect::parse_detections;
use muster::ingest::ImageFileSource;
use muster::{Detector, FrameSource, MusterConfig, ScriptedBackend};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to analyze (.png, .jpg, .jpeg).
    image: PathBuf,
    /// Where to write the annotated PNG. Label text needs a font
    /// (annotate.font_path or MUSTER_FONT_PATH).
    #[arg(long, default_value = "annotated.png")]
    output: PathBuf,
    /// Detection model path.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Use fixed detections instead of a model.
    #[arg(long, value_name = "DETECTIONS")]
    demo_detections: Option<String>,
    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
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
    if let Some(model) = &args.model {
        cfg.model_path = model.clone();
    }

    let mut detector = {
        let _stage = ui.stage("Load detector");
        match &args.demo_detections {
            Some(raw) => Detector::with_backend(ScriptedBackend::repeating(parse_detections(raw)?)),
            None => Detector::initialize(&cfg.model_path, &cfg.detector)?,
        }
    };

    let frame = {
        let _stage = ui.stage("Decode image");
        let mut source = ImageFileSource::new(args.image.clone());
        source.connect()?;
        let frame = source.next_frame()?;
        source.close();
        frame
    };

    let detections = {
        let _stage = ui.stage("Detect");
        detector.infer(&frame)?
    };
    let equipment = cfg.classifier().classify(&detections);

    {
        let _stage = ui.stage("Write annotated image");
        let annotated = cfg.annotator()?.draw(&frame, &detections);
        annotated
            .save(&args.output)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
    }

    if args.json {
        let report = serde_json::json!({
            "image": args.image,
            "output": args.output,
            "equipment": equipment,
            "compliant": equipment.is_compliant(),
            "detections": detections
                .iter()
                .map(|d| {
                    let bbox = d.bounding_box();
                    serde_json::json!({
                        "label": d.label(),
                        "confidence": d.confidence(),
                        "box": [bbox.left, bbox.top, bbox.width, bbox.height],
                    })
                })
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for detection in &detections {
            println!("{}", muster::annotate::label_text(detection));
        }
        println!("{}", equipment.summary());
        println!("annotated image written to {}", args.output.display());
    }
    Ok(())
}
