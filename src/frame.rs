//! Captured frames.
//!
//! A `Frame` is an RGB pixel buffer plus the capture sequence number assigned
//! by its source. Frames are produced by the ingest layer, borrowed by the
//! detector and annotator, and dropped at the end of each capture cycle.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct Frame {
    image: RgbImage,
    index: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64) -> Self {
        Self {
            image,
            index,
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from tightly packed RGB24 bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("pixel buffer does not fit {}x{}", width, height))?;
        Ok(Self::new(image, index))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Sequence number within the source, starting at 1.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

impl std::fmt::Debug for Frame {
    // Never print pixel content.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_validates_length() {
        assert!(Frame::from_rgb(vec![0u8; 11], 2, 2, 1).is_err());
        let frame = Frame::from_rgb(vec![7u8; 12], 2, 2, 1).unwrap();
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.pixels().len(), 12);
    }

    #[test]
    fn debug_output_omits_pixels() {
        let frame = Frame::from_rgb(vec![9u8; 12], 2, 2, 3).unwrap();
        let rendered = format!("{frame:?}");
        assert!(rendered.contains("index: 3"));
        assert!(!rendered.contains("9, 9"));
    }
}
