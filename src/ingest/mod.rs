//! Frame ingestion sources.
//!
//! This module provides the sources the capture loop reads from:
//! - Camera devices (feature: ingest-v4l2), addressed by index or device path
//! - Static image files (one frame, then end-of-stream)
//! - Synthetic cameras (`stub://` specs, for tests and demos)
//!
//! All sources produce `Frame` instances. A source is opened once per capture
//! session and released when the session stops. Opening failures surface as
//! `ErrorKind::DeviceUnavailable`; per-frame failures are `TransientRead` and
//! exhausted sources report `EndOfStream`.

pub mod camera;
pub mod image_file;
#[cfg(feature = "ingest-v4l2")]
mod normalize;

use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::str::FromStr;

use crate::frame::Frame;
use crate::{error_kind, ErrorKind, MusterError};

pub use camera::{CameraConfig, CameraSource};
pub use image_file::ImageFileSource;

/// A producer of frames for one capture session.
pub trait FrameSource: Send {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Acquire the underlying device or file.
    fn connect(&mut self) -> Result<()>;

    /// Read the next frame.
    ///
    /// Live sources block until a frame arrives or a short hardware timeout
    /// elapses (`TransientRead`). Finite sources return `EndOfStream` once
    /// exhausted.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Release the device. Safe to call more than once.
    fn close(&mut self);

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Where frames come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    /// Camera device node (e.g. "/dev/video0").
    Camera(String),
    /// Synthetic camera (`stub://name`).
    Synthetic(String),
    /// Static image file.
    ImageFile(PathBuf),
}

impl SourceSpec {
    /// Parse a source string.
    ///
    /// - `"0"`, `"1"`, ... select a camera by index
    /// - `/dev/video*` selects a camera by path
    /// - `stub://name` selects a synthetic camera
    /// - anything else is a local image path
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        if let Some(name) = raw.strip_prefix("stub://") {
            return Ok(SourceSpec::Synthetic(name.to_string()));
        }
        if raw.contains("://") {
            return Err(anyhow!(
                "source '{}' uses a URL scheme; only local cameras and files are supported",
                raw
            ));
        }
        if let Ok(index) = raw.parse::<u32>() {
            return Ok(SourceSpec::Camera(format!("/dev/video{index}")));
        }
        if raw.starts_with("/dev/video") {
            return Ok(SourceSpec::Camera(raw.to_string()));
        }
        Ok(SourceSpec::ImageFile(PathBuf::from(raw)))
    }

    pub fn is_live(&self) -> bool {
        !matches!(self, SourceSpec::ImageFile(_))
    }
}

impl FromStr for SourceSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceSpec::Camera(device) => write!(f, "{device}"),
            SourceSpec::Synthetic(name) => write!(f, "stub://{name}"),
            SourceSpec::ImageFile(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Capture geometry and rate requested from live sources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            target_fps: 30,
        }
    }
}

/// Open and connect a source. Every failure is reported as `DeviceUnavailable`.
pub fn open_source(spec: &SourceSpec, settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let camera = |device: String| -> Result<Box<dyn FrameSource>> {
        let config = CameraConfig {
            device,
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
        };
        let source = CameraSource::new(config).map_err(|e| device_unavailable(spec, e))?;
        Ok(Box::new(source))
    };
    let mut source: Box<dyn FrameSource> = match spec {
        SourceSpec::Camera(device) => camera(device.clone())?,
        SourceSpec::Synthetic(name) => camera(format!("stub://{name}"))?,
        SourceSpec::ImageFile(path) => Box::new(ImageFileSource::new(path.clone())),
    };
    source.connect().map_err(|e| device_unavailable(spec, e))?;
    Ok(source)
}

fn device_unavailable(spec: &SourceSpec, err: anyhow::Error) -> anyhow::Error {
    if error_kind(&err) == Some(ErrorKind::DeviceUnavailable) {
        return err;
    }
    err.context(MusterError::new(
        ErrorKind::DeviceUnavailable,
        format!("cannot open {spec}"),
    ))
}

/// Opens a fresh source for each capture session.
pub trait SourceFactory: Send {
    fn open(&mut self) -> Result<Box<dyn FrameSource>>;
}

impl<F> SourceFactory for F
where
    F: FnMut() -> Result<Box<dyn FrameSource>> + Send,
{
    fn open(&mut self) -> Result<Box<dyn FrameSource>> {
        self()
    }
}

/// Factory backed by a parsed [`SourceSpec`].
#[derive(Clone, Debug)]
pub struct SpecSourceFactory {
    spec: SourceSpec,
    settings: SourceSettings,
}

impl SpecSourceFactory {
    pub fn new(spec: SourceSpec, settings: SourceSettings) -> Self {
        Self { spec, settings }
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }
}

impl SourceFactory for SpecSourceFactory {
    fn open(&mut self) -> Result<Box<dyn FrameSource>> {
        open_source(&self.spec, &self.settings)
    }
}
