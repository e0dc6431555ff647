//! Captured images and their pixel layout

use std::fmt;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{RegressionError, RegressionResult};
use crate::store::Role;

/// Pixel dimensions of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Encoded image as produced by a capture driver (PNG)
#[derive(Clone)]
pub struct RawImage {
    pub bytes: Vec<u8>,
}

impl RawImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl fmt::Debug for RawImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawImage")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// One target captured under one viewport profile.
///
/// Pixels are always RGBA8, row-major, `width * height * 4` bytes.
#[derive(Clone)]
pub struct CaptureRecord {
    pub role: Role,
    pub profile: String,
    pub identifier: String,
    pub path: PathBuf,
    pub pixels: RgbaImage,
}

impl CaptureRecord {
    /// Decode encoded image bytes into a record.
    pub fn decode(
        role: Role,
        profile: &str,
        identifier: &str,
        path: &Path,
        bytes: &[u8],
    ) -> RegressionResult<Self> {
        let pixels = image::load_from_memory(bytes)
            .map_err(|e| RegressionError::CorruptImage {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
            .to_rgba8();

        Ok(Self {
            role,
            profile: profile.to_string(),
            identifier: identifier.to_string(),
            path: path.to_path_buf(),
            pixels,
        })
    }

    pub fn from_pixels(
        role: Role,
        profile: &str,
        identifier: &str,
        path: &Path,
        pixels: RgbaImage,
    ) -> Self {
        Self {
            role,
            profile: profile.to_string(),
            identifier: identifier.to_string(),
            path: path.to_path_buf(),
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width(), self.height())
    }

    /// Raw RGBA bytes
    pub fn rgba(&self) -> &[u8] {
        self.pixels.as_raw()
    }
}

impl fmt::Debug for CaptureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureRecord")
            .field("role", &self.role)
            .field("profile", &self.profile)
            .field("identifier", &self.identifier)
            .field("path", &self.path)
            .field("dimensions", &self.dimensions())
            .finish()
    }
}

/// Encode pixels as PNG bytes
pub fn encode_png(pixels: &RgbaImage) -> RegressionResult<Vec<u8>> {
    let mut out = std::io::Cursor::new(Vec::new());
    pixels.write_to(&mut out, image::ImageOutputFormat::Png)?;
    Ok(out.into_inner())
}
