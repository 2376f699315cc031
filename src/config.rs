use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotate::Annotator;
use crate::capture::CaptureSettings;
use crate::classify::Classifier;
use crate::detect::DetectorSettings;
use crate::ingest::{SourceSettings, SourceSpec, SpecSourceFactory};

const DEFAULT_DB_PATH: &str = "muster.db";
const DEFAULT_MODEL_PATH: &str = "models/best.onnx";
const DEFAULT_SOURCE: &str = "0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_FRAME_INTERVAL_MS: u64 = 33;
const DEFAULT_TEARDOWN_DELAY_MS: u64 = 200;
const DEFAULT_FONT_SCALE: f32 = 16.0;

#[derive(Debug, Deserialize, Default)]
struct MusterConfigFile {
    db_path: Option<String>,
    model: Option<ModelConfigFile>,
    source: Option<SourceConfigFile>,
    capture: Option<CaptureConfigFile>,
    annotate: Option<AnnotateConfigFile>,
    classifier: Option<ClassifierConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    confidence: Option<f32>,
    iou_threshold: Option<f32>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    spec: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    frame_interval_ms: Option<u64>,
    teardown_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotateConfigFile {
    font_path: Option<PathBuf>,
    scale: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    min_confidence: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct MusterConfig {
    pub db_path: String,
    pub model_path: PathBuf,
    pub detector: DetectorSettings,
    pub source: SourceSpec,
    pub source_settings: SourceSettings,
    pub capture: CaptureSettings,
    pub font_path: Option<PathBuf>,
    pub font_scale: f32,
    pub min_confidence: Option<f32>,
}

impl MusterConfig {
    /// Load from `MUSTER_CONFIG` (if set), then apply `MUSTER_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MUSTER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MusterConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let model = file.model.unwrap_or_default();
        let defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            model_confidence: model.confidence.unwrap_or(defaults.model_confidence),
            iou_threshold: model.iou_threshold.unwrap_or(defaults.iou_threshold),
            input_size: model.input_size.unwrap_or(defaults.input_size),
            labels_path: model.labels_path,
        };
        let model_path = model
            .path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH));

        let source_file = file.source.unwrap_or_default();
        let source = SourceSpec::parse(source_file.spec.as_deref().unwrap_or(DEFAULT_SOURCE))?;
        let source_settings = SourceSettings {
            width: source_file.width.unwrap_or(DEFAULT_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_HEIGHT),
            target_fps: source_file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
        };

        let capture = CaptureSettings {
            frame_interval: Duration::from_millis(
                file.capture
                    .as_ref()
                    .and_then(|capture| capture.frame_interval_ms)
                    .unwrap_or(DEFAULT_FRAME_INTERVAL_MS),
            ),
            teardown_delay: Duration::from_millis(
                file.capture
                    .as_ref()
                    .and_then(|capture| capture.teardown_delay_ms)
                    .unwrap_or(DEFAULT_TEARDOWN_DELAY_MS),
            ),
        };

        let font_path = file
            .annotate
            .as_ref()
            .and_then(|annotate| annotate.font_path.clone());
        let font_scale = file
            .annotate
            .and_then(|annotate| annotate.scale)
            .unwrap_or(DEFAULT_FONT_SCALE);
        let min_confidence = file
            .classifier
            .and_then(|classifier| classifier.min_confidence);

        Ok(Self {
            db_path,
            model_path,
            detector,
            source,
            source_settings,
            capture,
            font_path,
            font_scale,
            min_confidence,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("MUSTER_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(path) = std::env::var("MUSTER_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model_path = PathBuf::from(path);
            }
        }
        if let Ok(source) = std::env::var("MUSTER_SOURCE") {
            if !source.trim().is_empty() {
                self.source = SourceSpec::parse(&source)?;
            }
        }
        if let Ok(path) = std::env::var("MUSTER_FONT_PATH") {
            if !path.trim().is_empty() {
                self.font_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(interval) = std::env::var("MUSTER_FRAME_INTERVAL_MS") {
            let millis: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("MUSTER_FRAME_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.capture.frame_interval = Duration::from_millis(millis);
        }
        if let Ok(floor) = std::env::var("MUSTER_MIN_CONFIDENCE") {
            let floor = floor.trim();
            self.min_confidence = if floor.is_empty() {
                None
            } else {
                Some(floor.parse().map_err(|_| {
                    anyhow!("MUSTER_MIN_CONFIDENCE must be a number between 0 and 1")
                })?)
            };
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.source_settings.width == 0 || self.source_settings.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if self.source_settings.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if self.capture.frame_interval.is_zero() {
            return Err(anyhow!("frame_interval_ms must be greater than zero"));
        }
        check_unit("model confidence", self.detector.model_confidence)?;
        check_unit("iou_threshold", self.detector.iou_threshold)?;
        if let Some(floor) = self.min_confidence {
            check_unit("classifier min_confidence", floor)?;
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!("model input_size must be a positive multiple of 32"));
        }
        if !(self.font_scale > 0.0) {
            return Err(anyhow!("annotate scale must be positive"));
        }
        Ok(())
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new().with_min_confidence(self.min_confidence)
    }

    pub fn source_factory(&self) -> SpecSourceFactory {
        SpecSourceFactory::new(self.source.clone(), self.source_settings.clone())
    }

    /// Build the annotator, loading the configured font if any.
    ///
    /// Without a font, labels are drawn as empty tabs.
    pub fn annotator(&self) -> Result<Annotator> {
        let annotator = Annotator::new().with_scale(self.font_scale);
        match &self.font_path {
            Some(path) => annotator.with_font_file(path),
            None => {
                log::warn!(
                    "config: no annotate.font_path or MUSTER_FONT_PATH set, label text will not be drawn"
                );
                Ok(annotator)
            }
        }
    }
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be between 0 and 1, got {}", name, value));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<MusterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
