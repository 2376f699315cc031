//! Camera frame source.
//!
//! `CameraSource` reads frames from a local camera. Device nodes
//! (`/dev/video0`) are captured through libv4l when the `ingest-v4l2` feature
//! is enabled; `stub://` devices produce synthetic frames for tests and demos.
//!
//! Reads block for at most a short timeout derived from the target frame rate.
//! A timeout is reported as `ErrorKind::TransientRead` so the capture loop can
//! carry on with the next cycle.

use anyhow::{anyhow, Result};
use rand::Rng;
#[cfg(feature = "ingest-v4l2")]
use std::time::Instant;
use std::time::Duration;

use super::{FrameSource, SourceStats};
use crate::frame::Frame;
#[cfg(not(feature = "ingest-v4l2"))]
use crate::{ErrorKind, MusterError};

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0") or `stub://name`.
    pub device: String,
    /// Frame rate requested from the device.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

impl CameraConfig {
    /// How long a single read may block before it counts as a transient failure.
    pub fn read_timeout(&self) -> Duration {
        let fps = self.target_fps.max(1) as u64;
        Duration::from_millis((4_000 / fps).max(250))
    }
}

/// Camera frame source.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceCamera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("camera frame size must be non-zero"));
        }
        if config.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            });
        }
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(DeviceCamera::new(config)),
            })
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(MusterError::new(
                ErrorKind::DeviceUnavailable,
                format!(
                    "camera {} requires the ingest-v4l2 feature",
                    config.device
                ),
            )
            .into())
        }
    }
}

impl FrameSource for CameraSource {
    fn describe(&self) -> String {
        match &self.backend {
            CameraBackend::Synthetic(source) => format!("{} (synthetic)", source.config.device),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.config.device.clone(),
        }
    }

    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.close(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.connected,
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => SourceStats {
                frames_captured: source.frame_count,
                source: source.config.device.clone(),
            },
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => SourceStats {
                frames_captured: source.frame_count,
                source: source.config.device.clone(),
            },
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: CameraConfig,
    frame_count: u64,
    connected: bool,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            connected: false,
        }
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("CameraSource: connected to {} (synthetic)", self.config.device);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("camera {} is not connected", self.config.device));
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::from_rgb(pixels, self.config.width, self.config.height, self.frame_count)
    }

    /// Diagonal gradient that drifts one step per frame, with light sensor noise.
    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let mut rng = rand::thread_rng();
        let mut pixels = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                let base = (x + y + self.frame_count as usize) % 256;
                let noise: i16 = rng.gen_range(-3..=3);
                let value = (base as i16 + noise).clamp(0, 255) as u8;
                pixels.extend_from_slice(&[value, value / 2, 255 - value]);
            }
        }
        pixels
    }

    fn close(&mut self) {
        if self.connected {
            log::info!("CameraSource: released {} (synthetic)", self.config.device);
        }
        self.connected = false;
    }
}

// ----------------------------------------------------------------------------
// Camera device via libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct DeviceCamera {
    config: CameraConfig,
    state: Option<DeviceState>,
    format: super::normalize::PixelFormat,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[cfg(feature = "ingest-v4l2")]
#[ouroboros::self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: super::normalize::PixelFormat::Yuyv,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    fn connect(&mut self) -> Result<()> {
        use anyhow::Context;
        use v4l::buffer::Type;
        use v4l::video::Capture;

        use super::normalize::PixelFormat;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open camera {}", self.config.device))?;
        let mut format = device.format().context("read camera format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"YUYV");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraSource: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read camera format after set failure")?
            }
        };
        self.format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "camera {} delivers unsupported pixel format {}",
                self.config.device,
                format.fourcc
            )
        })?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CameraSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let timeout = self.config.read_timeout();
        let mut state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create camera buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        state.with_mut(|fields| fields.stream.set_timeout(timeout));
        self.state = Some(state);

        log::info!(
            "CameraSource: connected to {} ({}x{}, {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        use crate::{ErrorKind, MusterError};

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("camera {} is not connected", self.config.device))?;
        let pixels = state.with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()));
        let pixels = match pixels {
            Ok(pixels) => pixels,
            Err(err) => {
                self.last_error = Some(err.to_string());
                let kind = if err.kind() == std::io::ErrorKind::TimedOut {
                    "camera read timed out"
                } else {
                    "camera read failed"
                };
                return Err(anyhow::Error::new(err)
                    .context(MusterError::new(ErrorKind::TransientRead, kind)));
            }
        };

        let rgb = super::normalize::normalize_to_rgb(
            &pixels,
            self.active_width,
            self.active_height,
            self.format,
        )
        .map_err(|err| err.context(MusterError::new(ErrorKind::TransientRead, "bad camera frame")))?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        self.last_error = None;
        Frame::from_rgb(rgb, self.active_width, self.active_height, self.frame_count)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("CameraSource: released {}", self.config.device);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.state.is_none() || self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.config.read_timeout().saturating_mul(4)
    }
}

#[cfg(feature = "ingest-v4l2")]
impl Drop for DeviceCamera {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
