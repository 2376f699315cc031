#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{non_max_suppression, BoundingBox, Detection};
use crate::detect::DetectorSettings;
use crate::frame::Frame;

/// Tract-based backend for YOLOv8-style ONNX detection models.
///
/// The model takes a `1x3xSxS` RGB tensor in `[0, 1]` and produces
/// `1x(4+C)xN`: center x, center y, width, height in input pixels followed by
/// one score per class for each of the N anchors.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    labels: Vec<String>,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new(model_path: &Path, labels: Vec<String>, settings: &DetectorSettings) -> Result<Self> {
        let size = settings.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size: settings.input_size,
            labels,
            confidence_threshold: settings.model_confidence,
            iou_threshold: settings.iou_threshold,
        })
    }

    fn build_input(&self, frame: &Frame) -> Tensor {
        let size = self.input_size;
        let resized = image::imageops::resize(frame.image(), size, size, FilterType::Triangle);
        let size = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        });
        input.into_tensor()
    }

    fn label_for(&self, class_id: usize) -> String {
        self.labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }

    fn decode(&self, outputs: TVec<TValue>, frame_width: u32, frame_height: u32) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output must be rank 3")?;
        let (_, rows, anchors) = view.dim();
        if rows <= 4 {
            return Err(anyhow!("model output has {} rows, expected 4 + classes", rows));
        }

        let scale_x = frame_width as f32 / self.input_size as f32;
        let scale_y = frame_height as f32 / self.input_size as f32;
        let mut detections = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (4..rows)
                .map(|row| (row - 4, view[[0, row, anchor]]))
                .fold((0, f32::NEG_INFINITY), |best, candidate| {
                    if candidate.1 > best.1 {
                        candidate
                    } else {
                        best
                    }
                });
            if !(score >= self.confidence_threshold) {
                continue;
            }
            let cx = view[[0, 0, anchor]] * scale_x;
            let cy = view[[0, 1, anchor]] * scale_y;
            let w = view[[0, 2, anchor]] * scale_x;
            let h = view[[0, 3, anchor]] * scale_y;
            let bbox = BoundingBox::from_corners(
                (cx - w / 2.0).clamp(0.0, frame_width as f32),
                (cy - h / 2.0).clamp(0.0, frame_height as f32),
                (cx + w / 2.0).clamp(0.0, frame_width as f32),
                (cy + h / 2.0).clamp(0.0, frame_height as f32),
            );
            detections.push(Detection::new(self.label_for(class_id), score, bbox));
        }

        non_max_suppression(&mut detections, self.iou_threshold);
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame.width(), frame.height())
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.input_size as usize;
        let blank = Tensor::zero::<f32>(&[1, 3, size, size])?;
        self.model
            .run(tvec!(blank.into()))
            .context("ONNX warm-up run failed")?;
        Ok(())
    }
}
