//! ScreenItShot
//!
//! Converts documents (PDF, EPUB, office files, markup, code, geodata) and
//! web pages into exactly-sized raster images. Each input is rendered by an
//! HTML template in headless Chrome; the template reports the size of what
//! it drew and the capture surface is resized and cropped to match.
//!
//! # Pipeline
//!
//! - [`format`] resolves an extension, magic bytes, slug or MIME type to a [`FormatId`]
//! - [`templates`] maps the format to a template file (or direct navigation for URLs)
//! - [`payload`] base64-encodes the input into an init script
//! - [`capture`] drives one browser session through load, measure, resize and capture
//!
//! # Example
//!
//! ```no_run
//! use screenitshot::{Payload, RenderOptions, Renderer, RendererConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let renderer = Renderer::new(RendererConfig::default())?;
//! let bytes = std::fs::read("report.pdf")?;
//! let result = renderer
//!     .render_declared(Payload::Bytes(bytes), "application/pdf", RenderOptions::default())
//!     .await?;
//! println!("{}x{} via {}", result.width, result.height, result.format);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

pub mod error;
pub use error::{Error, Result};

pub mod capture;
pub mod encoding;
pub mod format;
pub mod payload;
pub mod templates;

// Chrome DevTools Protocol backend
#[cfg(feature = "cdp")]
pub mod cdp;

// Async facade: one worker thread per request
pub mod async_api;

// File in, file out
pub mod output;

pub use async_api::Renderer;
#[cfg(feature = "cdp")]
pub use async_api::render;
pub use capture::{CaptureBackend, CaptureController, CaptureSession, ClipRect, RenderMetadata};
pub use encoding::ImageEncoding;
pub use format::FormatId;
pub use templates::{RenderingStrategy, TemplateRegistry, TemplateRoots};

/// Fixed multiplier from logical CSS pixels to output pixels.
pub const DEVICE_SCALE_FACTOR: u32 = 2;

/// Initial viewport for template-rendered formats.
pub const DOCUMENT_VIEWPORT: Viewport = Viewport {
    width: 800,
    height: 600,
};

/// Initial (and final) viewport for the url format.
pub const WEB_VIEWPORT: Viewport = Viewport {
    width: 1280,
    height: 800,
};

/// Configuration for a [`Renderer`]
///
/// Defaults:
/// - templates come from `render/dist` beside the crate when present,
///   otherwise from `templates/` beside the executable
/// - each request gets 60 seconds end to end
/// - at most one concurrent browser session per CPU
///
/// # Examples
///
/// ```
/// let cfg = screenitshot::RendererConfig::default();
/// assert_eq!(cfg.settle_delay_ms, 100);
/// ```
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Candidate template directories
    pub template_roots: TemplateRoots,
    /// Deadline for a whole request in milliseconds
    pub timeout_ms: u64,
    /// Pause after resizing the viewport, before capturing
    pub settle_delay_ms: u64,
    /// Maximum number of browser sessions alive at once
    pub max_sessions: usize,
    /// Chrome binary to launch instead of auto-detection
    pub chrome_path: Option<PathBuf>,
    /// Whether to keep Chrome's sandbox enabled
    pub sandbox: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            template_roots: TemplateRoots::default(),
            timeout_ms: 60_000,
            settle_delay_ms: 100,
            max_sessions: num_cpus::get().max(1),
            chrome_path: None,
            sandbox: true,
        }
    }
}

/// Viewport dimensions in logical pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Starting viewport for a format, with caller overrides applied per axis.
    pub fn initial_for(format: FormatId, width: Option<u32>, height: Option<u32>) -> Self {
        let base = if format == FormatId::Url {
            WEB_VIEWPORT
        } else {
            DOCUMENT_VIEWPORT
        };
        Self {
            width: width.unwrap_or(base.width),
            height: height.unwrap_or(base.height),
        }
    }
}

/// Input to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// File contents; text is passed as its UTF-8 bytes
    Bytes(Vec<u8>),
    /// Address for the url format
    Url(String),
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Bytes(text.into_bytes())
    }
}

/// Per-request options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub encoding: ImageEncoding,
    /// Override for the initial viewport width
    pub width: Option<u32>,
    /// Override for the initial viewport height
    pub height: Option<u32>,
    /// 1-based page for multi-page inputs
    pub page: u32,
    /// Original file name; only used inside templates for language detection
    pub file_name: Option<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            encoding: ImageEncoding::Png,
            width: None,
            height: None,
            page: 1,
            file_name: None,
        }
    }
}

/// A fully resolved, immutable render request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub payload: Payload,
    pub format: FormatId,
    pub options: RenderOptions,
}

impl RenderRequest {
    /// Build a request, checking that payload and format agree.
    pub fn new(payload: Payload, format: FormatId, options: RenderOptions) -> Result<Self> {
        if format.is_unknown() {
            return Err(Error::UnrecognizedFormat(
                options.file_name.clone().unwrap_or_else(|| "<bytes>".to_string()),
            ));
        }
        match (&payload, format) {
            (Payload::Bytes(_), FormatId::Url) => {
                return Err(Error::ConfigError("url format requires a URL payload".into()));
            }
            (Payload::Url(_), other) if other != FormatId::Url => {
                return Err(Error::ConfigError(format!("{} format requires a byte payload", other)));
            }
            _ => {}
        }
        if options.page == 0 {
            return Err(Error::ConfigError("page numbers start at 1".into()));
        }
        if options.width == Some(0) || options.height == Some(0) {
            return Err(Error::ConfigError("viewport dimensions must be positive".into()));
        }
        Ok(Self {
            payload,
            format,
            options,
        })
    }

    /// Build a request from a caller-declared slug or MIME type.
    pub fn from_declared(payload: Payload, declared: &str, options: RenderOptions) -> Result<Self> {
        let format = format::resolve_format_str(declared)?;
        Self::new(payload, format, options)
    }

    pub fn initial_viewport(&self) -> Viewport {
        Viewport::initial_for(self.format, self.options.width, self.options.height)
    }
}

/// Rendered image and its dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub bytes: Vec<u8>,
    /// Encoding of `bytes`
    pub encoding: ImageEncoding,
    /// Pixel width (logical width times the device scale factor)
    pub width: u32,
    /// Pixel height (logical height times the device scale factor)
    pub height: u32,
    /// Format whose renderer produced the image
    pub format: FormatId,
}
