use std::collections::VecDeque;

use anyhow::{anyhow, Context, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

enum Step {
    Detections(Vec<Detection>),
    Failure(String),
}

/// Backend that replays pre-programmed results, for tests and demos.
///
/// Each call consumes the next scripted step. Once the script is exhausted the
/// last successful result repeats.
#[derive(Default)]
pub struct ScriptedBackend {
    script: VecDeque<Step>,
    last: Vec<Detection>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always return the same detections.
    pub fn repeating(detections: Vec<Detection>) -> Self {
        Self::new().then(detections)
    }

    pub fn then(mut self, detections: Vec<Detection>) -> Self {
        self.script.push_back(Step::Detections(detections));
        self
    }

    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.script.push_back(Step::Failure(message.into()));
        self
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        match self.script.pop_front() {
            Some(Step::Detections(detections)) => {
                self.last = detections.clone();
                Ok(detections)
            }
            Some(Step::Failure(message)) => Err(anyhow!(message)),
            None => Ok(self.last.clone()),
        }
    }
}

/// Parse a detection list such as `"Hard Hat:0.95@40,20,80,60;Vest:0.8@30,90,120,150"`.
///
/// Each entry is `label:confidence`, optionally followed by
/// `@left,top,width,height`. Entries without a box get a zero-sized box at the
/// origin.
pub fn parse_detections(raw: &str) -> Result<Vec<Detection>> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_entry)
        .collect()
}

fn parse_entry(entry: &str) -> Result<Detection> {
    let (head, bbox) = match entry.split_once('@') {
        Some((head, bbox)) => (head, Some(bbox)),
        None => (entry, None),
    };
    let (label, confidence) = head
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("detection '{}' must be label:confidence", entry))?;
    let confidence: f32 = confidence
        .trim()
        .parse()
        .with_context(|| format!("invalid confidence in '{}'", entry))?;
    let bbox = match bbox {
        Some(raw) => {
            let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
            let [left, top, width, height] = parts.as_slice() else {
                return Err(anyhow!("box in '{}' must be left,top,width,height", entry));
            };
            BoundingBox::new(
                left.parse().with_context(|| format!("invalid left in '{}'", entry))?,
                top.parse().with_context(|| format!("invalid top in '{}'", entry))?,
                width.parse().with_context(|| format!("invalid width in '{}'", entry))?,
                height.parse().with_context(|| format!("invalid height in '{}'", entry))?,
            )
        }
        None => BoundingBox::default(),
    };
    Ok(Detection::new(label.trim(), confidence, bbox))
}
