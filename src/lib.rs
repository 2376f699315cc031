//! Crew muster station kernel.
//!
//! This crate implements the camera side of a shipboard attendance station:
//! a crew member verifies their id, the station watches them through a camera,
//! a detection model looks for a helmet and a safety vest, and the result is
//! written to the attendance store as a single check event.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource -> Detector -> Classifier -> Annotator -> DisplaySink
//!                                  |
//!                                  v
//!                           EquipmentState --(capture)--> AttendanceCheckEvent -> AttendanceRecorder
//! ```
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (camera devices, static images, synthetic cameras)
//! - `detect`: Detector wrapper and model backends
//! - `classify`: Helmet/vest derivation from detection labels
//! - `annotate`: Box and label drawing for display
//! - `capture`: The cancelable capture loop and its display hand-off
//! - `station`: Session context tying crew identity, detector, loop and store together
//! - `storage`: Crew directory and attendance recorder implementations
//! - `crew`, `attendance`: Crew identities, roles and check events
//! - `config`: JSON file plus `MUSTER_*` environment configuration

use std::fmt;

pub mod annotate;
pub mod attendance;
pub mod capture;
pub mod classify;
pub mod config;
pub mod crew;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod station;
pub mod storage;

pub use annotate::Annotator;
pub use attendance::{AttendanceCheckEvent, CheckRecord, RecordId, RecordedCheck};
pub use capture::{
    display_channel, CaptureLoop, CaptureSettings, ChannelSink, DisplaySink, FrameUpdate,
    LoopState, LoopStats, NullSink, StartOutcome,
};
pub use classify::{classify, Classifier, EquipmentCategory, EquipmentState};
pub use config::MusterConfig;
pub use crew::{CrewId, CrewIdentity, CrewRole, Verification};
pub use detect::{
    BoundingBox, Detection, Detector, DetectorBackend, DetectorSettings, ScriptedBackend,
    SharedDetector,
};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceFactory, SourceSettings, SourceSpec};
pub use station::Station;
pub use storage::{
    AttendanceRecorder, AttendanceReports, CrewDirectory, InMemoryAttendanceStore,
    SqliteAttendanceStore,
};

// -------------------- Errors --------------------

/// Failure classes the station distinguishes.
///
/// Errors travel as `anyhow::Error`; callers classify them with
/// [`error_kind`] or `downcast_ref::<MusterError>()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The camera or image could not be opened. Fatal to starting a session.
    DeviceUnavailable,
    /// The source has no more frames (static images after their single frame).
    EndOfStream,
    /// A single frame could not be read. The loop skips it.
    TransientRead,
    /// The model file does not exist.
    ModelNotFound,
    /// The model file exists but could not be loaded.
    ModelLoad,
    /// Inference failed for a single frame.
    Inference,
    /// The attendance store rejected a check event.
    Persistence,
    /// A request was made without its preconditions (no verified crew, no detector).
    Validation,
    /// A crew id or record id is unknown.
    NotFound,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::DeviceUnavailable => "DEVICE_UNAVAILABLE",
            ErrorKind::EndOfStream => "END_OF_STREAM",
            ErrorKind::TransientRead => "TRANSIENT_READ",
            ErrorKind::ModelNotFound => "MODEL_NOT_FOUND",
            ErrorKind::ModelLoad => "MODEL_LOAD",
            ErrorKind::Inference => "INFERENCE",
            ErrorKind::Persistence => "PERSISTENCE",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
        }
    }
}

#[derive(Clone, Debug)]
pub struct MusterError {
    pub kind: ErrorKind,
    pub message: String,
}

impl MusterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for MusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for MusterError {}

/// Returns the kind of a station error, looking through any added context.
pub fn error_kind(err: &anyhow::Error) -> Option<ErrorKind> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<MusterError>())
        .map(|e| e.kind)
        .or_else(|| err.downcast_ref::<MusterError>().map(|e| e.kind))
}

/// True when `err` carries the given kind.
pub fn is_kind(err: &anyhow::Error, kind: ErrorKind) -> bool {
    error_kind(err) == Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn error_kind_survives_context() {
        let err: anyhow::Error = MusterError::new(ErrorKind::DeviceUnavailable, "no camera").into();
        let err = err.context("start capture");
        assert_eq!(error_kind(&err), Some(ErrorKind::DeviceUnavailable));
    }

    #[test]
    fn error_kind_found_when_used_as_context() {
        let result: anyhow::Result<()> = Err(anyhow::anyhow!("disk full"));
        let err = result
            .context(MusterError::new(ErrorKind::Persistence, "check not saved"))
            .unwrap_err();
        assert!(is_kind(&err, ErrorKind::Persistence));
        assert!(err.to_string().starts_with("PERSISTENCE"));
    }

    #[test]
    fn plain_errors_have_no_kind() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(error_kind(&err), None);
    }
}
