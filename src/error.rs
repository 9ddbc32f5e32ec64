//! Error types for the screenshot pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while turning an input into an image
#[derive(Error, Debug)]
pub enum Error {
    /// The input file (or byte source) is not available
    #[error("Input file not found: {0}")]
    InputNotFound(String),

    /// Extension and magic-byte sniffing both failed
    #[error("Unsupported file format: {0}")]
    UnrecognizedFormat(String),

    /// A caller-declared format string matched neither a slug nor a MIME type
    #[error("Unknown format: {0}")]
    UnknownFormatString(String),

    /// A non-url format has no template on disk (packaging defect)
    #[error("Template not found: {}. Ensure templates are installed with the package.", .0.display())]
    TemplateMissing(PathBuf),

    /// The loaded template never exposed or resolved `renderComplete`
    #[error("Render signal missing: {0}")]
    RenderSignalMissing(String),

    /// The browser engine failed while navigating, resizing or capturing
    #[error("Capture failed: {0}")]
    CaptureFailure(String),

    /// The request exceeded its deadline
    #[error("Render timed out after {0}ms")]
    RenderTimeout(u64),

    /// The renderer was shut down while the request was in flight
    #[error("Render cancelled")]
    Cancelled,

    /// The browser could not be launched
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    /// Invalid configuration or request options
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
