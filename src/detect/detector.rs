use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};

use super::backend::DetectorBackend;
use super::result::Detection;
use crate::frame::Frame;
use crate::{ErrorKind, MusterError};

/// Detector shared between the station and its capture worker.
///
/// The mutex serializes inference; the backend is not assumed to be safe for
/// concurrent calls.
pub type SharedDetector = Arc<Mutex<Detector>>;

/// Model loading and post-processing parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    /// Scores below this are discarded by the model decoder.
    pub model_confidence: f32,
    /// Overlap above which same-label boxes are merged.
    pub iou_threshold: f32,
    /// Square model input edge in pixels.
    pub input_size: u32,
    /// Class names, one per line. Defaults to `<model>.labels`.
    pub labels_path: Option<PathBuf>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            model_confidence: 0.25,
            iou_threshold: 0.45,
            input_size: 640,
            labels_path: None,
        }
    }
}

/// A loaded detection model.
pub struct Detector {
    backend: Box<dyn DetectorBackend>,
    inferences: u64,
}

impl Detector {
    /// Load the model at `model_path`.
    ///
    /// Fails with `ModelNotFound` when the file is missing and `ModelLoad` when
    /// it cannot be parsed or the inference backend is not compiled in.
    pub fn initialize(model_path: &Path, settings: &DetectorSettings) -> Result<Self> {
        if !model_path.is_file() {
            return Err(MusterError::new(
                ErrorKind::ModelNotFound,
                format!("model file {} not found", model_path.display()),
            )
            .into());
        }
        let load_failed = || {
            MusterError::new(
                ErrorKind::ModelLoad,
                format!("cannot load model {}", model_path.display()),
            )
        };
        let mut backend = load_backend(model_path, settings).context(load_failed())?;
        backend.warm_up().context(load_failed())?;
        log::info!(
            "Detector: loaded {} with {} backend",
            model_path.display(),
            backend.name()
        );
        Ok(Self {
            backend,
            inferences: 0,
        })
    }

    pub fn with_backend<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self {
            backend: Box::new(backend),
            inferences: 0,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run the model on one frame. Failures carry `ErrorKind::Inference`.
    pub fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.inferences += 1;
        self.backend.detect(frame).with_context(|| {
            MusterError::new(
                ErrorKind::Inference,
                format!("inference failed on frame {}", frame.index()),
            )
        })
    }

    /// Number of inference calls made, including failed ones.
    pub fn inferences(&self) -> u64 {
        self.inferences
    }

    pub fn into_shared(self) -> SharedDetector {
        Arc::new(Mutex::new(self))
    }
}

#[cfg(feature = "backend-tract")]
fn load_backend(model_path: &Path, settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let labels = load_labels(model_path, settings.labels_path.as_deref())?;
    let backend = super::backends::TractBackend::new(model_path, labels, settings)?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_backend(_model_path: &Path, _settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("ONNX inference requires the backend-tract feature"))
}

/// Read class names for a model.
///
/// An explicit `labels_path` must exist. Otherwise `<model>.labels` is used
/// when present; with no labels file, classes are reported as `class_<id>`.
pub fn load_labels(model_path: &Path, labels_path: Option<&Path>) -> Result<Vec<String>> {
    let path = match labels_path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = model_path.with_extension("labels");
            if !default.is_file() {
                log::warn!(
                    "Detector: no labels file at {}; classes will be numbered",
                    default.display()
                );
                return Ok(Vec::new());
            }
            default
        }
    };
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read labels file {}: {}", path.display(), e))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedBackend;
    use crate::detect::result::BoundingBox;
    use crate::is_kind;

    #[test]
    fn missing_model_is_model_not_found() {
        let err = Detector::initialize(
            Path::new("/nonexistent/best.onnx"),
            &DetectorSettings::default(),
        )
        .err()
        .unwrap();
        assert!(is_kind(&err, ErrorKind::ModelNotFound));
    }

    #[test]
    fn unreadable_model_is_model_load_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("best.onnx");
        std::fs::write(&path, b"not an onnx model")?;
        let err = Detector::initialize(&path, &DetectorSettings::default())
            .err()
            .unwrap();
        assert!(is_kind(&err, ErrorKind::ModelLoad));
        Ok(())
    }

    #[test]
    fn inference_failures_are_tagged() {
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2, 7).unwrap();
        let mut detector = Detector::with_backend(ScriptedBackend::new().then_fail("bad tensor"));
        let err = detector.infer(&frame).unwrap_err();
        assert!(is_kind(&err, ErrorKind::Inference));
        assert_eq!(detector.inferences(), 1);
    }

    #[test]
    fn infer_passes_detections_through() {
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2, 1).unwrap();
        let vest = Detection::new("vest", 0.8, BoundingBox::new(0, 0, 2, 2));
        let mut detector = Detector::with_backend(ScriptedBackend::repeating(vec![vest.clone()]));
        assert_eq!(detector.infer(&frame).unwrap(), vec![vest]);
        assert_eq!(detector.backend_name(), "scripted");
    }

    #[test]
    fn labels_default_to_sibling_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let model = dir.path().join("best.onnx");
        assert!(load_labels(&model, None)?.is_empty());

        std::fs::write(dir.path().join("best.labels"), "helmet\n\nvest\nperson\n")?;
        assert_eq!(load_labels(&model, None)?, vec!["helmet", "vest", "person"]);

        assert!(load_labels(&model, Some(&dir.path().join("missing.txt"))).is_err());
        Ok(())
    }
}
