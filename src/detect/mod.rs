mod backend;
mod backends;
mod detector;
mod result;

pub use backend::DetectorBackend;
pub use backends::{parse_detections, ScriptedBackend};
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use detector::{Detector, DetectorSettings, SharedDetector};
pub use result::{non_max_suppression, BoundingBox, Detection};
