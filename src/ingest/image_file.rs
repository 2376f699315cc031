//! Static image frame source.
//!
//! `ImageFileSource` decodes a local image file (PNG or JPEG) and delivers it
//! as a single frame. The next read reports `ErrorKind::EndOfStream`, which
//! ends a capture session on its own.

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;
use crate::{ErrorKind, MusterError};

pub struct ImageFileSource {
    path: PathBuf,
    image: Option<RgbImage>,
    delivered: bool,
}

impl ImageFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            image: None,
            delivered: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for ImageFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn connect(&mut self) -> Result<()> {
        if !is_local_file_path(&self.path) {
            return Err(anyhow!(
                "image sources only support local paths (no URL schemes)"
            ));
        }
        let image = image::open(&self.path)
            .with_context(|| format!("decode image {}", self.path.display()))?
            .to_rgb8();
        log::info!(
            "ImageFileSource: loaded {} ({}x{})",
            self.path.display(),
            image.width(),
            image.height()
        );
        self.image = Some(image);
        self.delivered = false;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| anyhow!("image {} is not loaded", self.path.display()))?;
        if self.delivered {
            return Err(MusterError::new(
                ErrorKind::EndOfStream,
                format!("{} has no more frames", self.path.display()),
            )
            .into());
        }
        self.delivered = true;
        Ok(Frame::new(image.clone(), 1))
    }

    fn close(&mut self) {
        self.image = None;
    }

    fn is_healthy(&self) -> bool {
        self.image.is_some()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: u64::from(self.delivered),
            source: self.describe(),
        }
    }
}

fn is_local_file_path(path: &Path) -> bool {
    let raw = path.to_string_lossy();
    !raw.trim().is_empty() && !raw.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_kind;
    use image::Rgb;

    fn write_png(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("crew.png");
        let image = RgbImage::from_pixel(8, 6, Rgb([10, 20, 30]));
        image.save(&path).expect("write png");
        path
    }

    #[test]
    fn delivers_one_frame_then_end_of_stream() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = ImageFileSource::new(write_png(&dir));
        source.connect()?;

        let frame = source.next_frame()?;
        assert_eq!((frame.width(), frame.height()), (8, 6));
        assert_eq!(frame.image().get_pixel(0, 0), &Rgb([10, 20, 30]));

        let err = source.next_frame().unwrap_err();
        assert!(is_kind(&err, ErrorKind::EndOfStream));
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn reconnect_rewinds() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = ImageFileSource::new(write_png(&dir));
        source.connect()?;
        source.next_frame()?;
        source.close();
        assert!(!source.is_healthy());
        source.connect()?;
        assert!(source.next_frame().is_ok());
        Ok(())
    }

    #[test]
    fn rejects_url_paths() {
        let mut source = ImageFileSource::new("http://example.com/crew.png");
        assert!(source.connect().is_err());
    }
}
