//! Raw RGBA frames and subtitle-region cropping

use std::fmt;
use std::io::Cursor;

use image::buffer::ConvertBuffer;
use image::codecs::pnm::{PnmSubtype, SampleEncoding};
use image::{imageops, DynamicImage, ImageOutputFormat, RgbImage, RgbaImage};

use crate::error::{Error, Result};

/// Bytes per RGBA pixel
pub const BYTES_PER_PIXEL: usize = 4;

/// Fraction of the frame height, from the bottom, where subtitles render
pub const DEFAULT_REGION_FRACTION: f32 = 0.25;

/// One captured frame, RGBA8
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    image: RgbaImage,
}

impl Frame {
    /// Wrap raw pixels
    ///
    /// # Arguments
    /// * `width`, `height` - Frame size in pixels
    /// * `pixels` - `width * height * 4` bytes, row-major RGBA
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = Self::byte_len(width, height);
        if pixels.len() != expected {
            return Err(Error::Crop(format!(
                "{}x{} frame needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }

        let image = RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| Error::Crop(format!("{}x{} frame does not fit its buffer", width, height)))?;
        Ok(Self { image })
    }

    /// Bytes needed for a `width` x `height` frame
    pub fn byte_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Raw RGBA bytes
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Copy out the bottom `fraction` of the frame, full width
    pub fn crop_bottom(&self, fraction: f32) -> Result<Frame> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(Error::Crop(format!("region fraction {} outside (0, 1]", fraction)));
        }

        let (width, height) = self.image.dimensions();
        let region_height = (height as f32 * fraction) as u32;
        if region_height == 0 || width == 0 {
            return Err(Error::Crop(format!(
                "{}x{} frame too small for a {} region",
                width, height, fraction
            )));
        }

        let top = height - region_height;
        let image = imageops::crop_imm(&self.image, 0, top, width, region_height).to_image();
        Ok(Frame { image })
    }

    /// Encode as binary PPM (P6), alpha dropped
    pub fn to_ppm(&self) -> Result<Vec<u8>> {
        let rgb: RgbImage = self.image.convert();
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(rgb).write_to(
            &mut out,
            ImageOutputFormat::Pnm(PnmSubtype::Pixmap(SampleEncoding::Binary)),
        )?;
        Ok(out.into_inner())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}
