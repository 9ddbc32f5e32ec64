//! Output image encodings
//!
//! The browser captures PNG or JPEG natively. WebP output is produced by
//! capturing lossless PNG and re-encoding it with the `image` crate.

use crate::{Error, Result};
use image::{DynamicImage, ImageFormat};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

/// Encoding requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageEncoding {
    #[default]
    Png,
    Jpeg,
    Webp,
}

/// Encoding the capture primitive is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    Png,
    Jpeg,
}

impl ImageEncoding {
    pub fn extension(self) -> &'static str {
        match self {
            ImageEncoding::Png => "png",
            ImageEncoding::Jpeg => "jpeg",
            ImageEncoding::Webp => "webp",
        }
    }

    pub fn capture_format(self) -> CaptureFormat {
        match self {
            ImageEncoding::Jpeg => CaptureFormat::Jpeg,
            ImageEncoding::Png | ImageEncoding::Webp => CaptureFormat::Png,
        }
    }

    /// Turn captured bytes into the requested encoding.
    pub fn finish(self, captured: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            ImageEncoding::Png | ImageEncoding::Jpeg => Ok(captured),
            ImageEncoding::Webp => reencode_webp(&captured),
        }
    }
}

impl fmt::Display for ImageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ImageEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(ImageEncoding::Png),
            "jpeg" | "jpg" => Ok(ImageEncoding::Jpeg),
            "webp" => Ok(ImageEncoding::Webp),
            other => Err(Error::ConfigError(format!("Unsupported output format: {}", other))),
        }
    }
}

fn reencode_webp(png: &[u8]) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory_with_format(png, ImageFormat::Png)
        .map_err(|e| Error::CaptureFailure(format!("Failed to decode captured PNG: {}", e)))?;
    let rgba = DynamicImage::ImageRgba8(decoded.to_rgba8());

    let mut out = Cursor::new(Vec::new());
    rgba.write_to(&mut out, ImageFormat::WebP)
        .map_err(|e| Error::CaptureFailure(format!("Failed to encode WebP: {}", e)))?;
    Ok(out.into_inner())
}
