//! File-oriented entry point: path or URL in, image file out.

use crate::capture::CaptureBackend;
use crate::encoding::ImageEncoding;
use crate::format::{self, FormatId};
use crate::{Error, Payload, RenderOptions, RenderRequest, RenderResult, Renderer, Result};
use log::info;
use std::io::Write;
use std::path::{Path, PathBuf};

/// A rendered image that has been written to disk
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub path: PathBuf,
    pub result: RenderResult,
}

/// Where the image goes when the caller does not say.
///
/// Files keep their stem and take the encoding's extension. URLs become
/// `<host>.<ext>` in the current directory.
pub fn default_output_path(input: &str, format: FormatId, encoding: ImageEncoding) -> PathBuf {
    if format == FormatId::Url {
        let host = url::Url::parse(input)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "screenshot".to_string());
        return PathBuf::from(format!("{}.{}", host, encoding.extension()));
    }
    Path::new(input).with_extension(encoding.extension())
}

/// Build a request from a CLI-style input.
///
/// Missing files and unresolvable formats fail here, before any browser
/// session exists.
pub fn request_for_input(input: &str, mut options: RenderOptions) -> Result<RenderRequest> {
    let format = format::resolve_input(input);
    if format == FormatId::Url {
        return RenderRequest::new(Payload::Url(input.to_string()), FormatId::Url, options);
    }

    let path = Path::new(input);
    if !path.is_file() {
        return Err(Error::InputNotFound(input.to_string()));
    }
    if format.is_unknown() {
        return Err(Error::UnrecognizedFormat(input.to_string()));
    }

    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::InputNotFound(input.to_string()),
        _ => Error::Io(e),
    })?;

    if options.file_name.is_none() {
        options.file_name = path.file_name().and_then(|n| n.to_str()).map(|n| n.to_string());
    }
    RenderRequest::new(Payload::Bytes(bytes), format, options)
}

/// Render `input` and write the image to `output` (or the default path).
///
/// The file is written to a temporary sibling and renamed into place only
/// after a successful render.
pub async fn screenshot_file<B: CaptureBackend + 'static>(
    renderer: &Renderer<B>,
    input: &str,
    output: Option<&Path>,
    options: RenderOptions,
) -> Result<Screenshot> {
    let encoding = options.encoding;
    let request = request_for_input(input, options)?;
    let path = match output {
        Some(p) => p.to_path_buf(),
        None => default_output_path(input, request.format, encoding),
    };

    let result = renderer.render(request).await?;
    write_atomic(&path, &result.bytes)?;
    info!("wrote {} ({} bytes)", path.display(), result.bytes.len());

    Ok(Screenshot { path, result })
}

/// Blocking form of [`screenshot_file`] for callers outside an async runtime.
///
/// Drives the render on a private current-thread runtime, so it must not be
/// called from within one.
pub fn screenshot_blocking<B: CaptureBackend + 'static>(
    renderer: &Renderer<B>,
    input: &str,
    output: Option<&Path>,
    options: RenderOptions,
) -> Result<Screenshot> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::InitializationError(format!("Failed to start runtime: {}", e)))?;
    runtime.block_on(screenshot_file(renderer, input, output, options))
}

/// Screenshot a file or URL with headless Chrome and the default configuration.
#[cfg(feature = "cdp")]
pub fn screenshot(input: &str, output: Option<&Path>, options: RenderOptions) -> Result<Screenshot> {
    let renderer = Renderer::new(crate::RendererConfig::default())?;
    screenshot_blocking(&renderer, input, output, options)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut builder = tempfile::Builder::new();
    builder.prefix(".screenitshot");
    // Temp files default to 0600; the output should look like any other file.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = match std::fs::metadata(path) {
            Ok(meta) => meta.permissions(),
            Err(_) => std::fs::Permissions::from_mode(0o666),
        };
        builder.permissions(permissions);
    }
    let mut tmp = builder.tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
