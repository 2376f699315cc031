use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps one loaded model. It is called from a single worker at a
/// time (the capture loop serializes access through [`super::SharedDetector`]),
/// so implementations may keep per-call scratch state behind `&mut self`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    ///
    /// Returns boxes in the frame's pixel coordinates, possibly none.
    /// Implementations must treat the frame as read-only.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
