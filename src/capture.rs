//! Capture controller
//!
//! Drives one capture session per request through a fixed sequence:
//!
//! ```text
//! Idle -> SessionOpen -> PayloadInjected -> SurfaceLoaded -> AwaitingRenderSignal
//!      -> Measured -> Captured -> Closed
//! ```
//!
//! The url format goes `SessionOpen -> SurfaceLoaded -> Captured`. Any step may
//! move to `Failed`; the session is closed on every path by a drop guard.

use crate::encoding::CaptureFormat;
use crate::payload::InitPayload;
use crate::templates::{RenderingStrategy, TemplateRegistry};
use crate::{Error, Payload, RenderRequest, RenderResult, Result, Viewport, DEVICE_SCALE_FACTOR};
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Settings applied when a session is opened
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub viewport: Viewport,
    pub device_scale_factor: u32,
    /// Upper bound for any single browser step
    pub step_timeout: Duration,
}

/// Rectangle to capture, in logical pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// What a template reports through `renderComplete`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderMetadata {
    /// Content width in logical pixels
    pub width: u32,
    /// Content height in logical pixels
    pub height: u32,
    /// Where content starts when the template draws at an offset
    pub clip: Option<(u32, u32)>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    width: f64,
    height: f64,
    #[serde(default)]
    clip_x: Option<f64>,
    #[serde(default)]
    clip_y: Option<f64>,
}

impl RenderMetadata {
    /// Parse the JSON a template resolved `renderComplete` with.
    ///
    /// Fractional sizes round up and clip origins round down, so content is
    /// never cut off on either edge.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawMetadata = serde_json::from_str(json)
            .map_err(|e| Error::RenderSignalMissing(format!("Malformed render metadata: {}", e)))?;

        let width = logical_px(raw.width, "width")?.ceil() as u32;
        let height = logical_px(raw.height, "height")?.ceil() as u32;
        if width == 0 || height == 0 {
            return Err(Error::RenderSignalMissing(format!(
                "Template reported an empty content box ({}x{})",
                width, height
            )));
        }

        let clip = match (raw.clip_x, raw.clip_y) {
            (None, None) => None,
            (x, y) => Some((
                logical_px(x.unwrap_or(0.0), "clipX")?.floor() as u32,
                logical_px(y.unwrap_or(0.0), "clipY")?.floor() as u32,
            )),
        };

        Ok(Self { width, height, clip })
    }
}

fn logical_px(value: f64, field: &str) -> Result<f64> {
    if !value.is_finite() || value < 0.0 || value > u32::MAX as f64 {
        return Err(Error::RenderSignalMissing(format!(
            "Render metadata field {} is out of range: {}",
            field, value
        )));
    }
    Ok(value)
}

/// One browser page with a fixed device scale factor.
///
/// Calls arrive in a strict order from a single thread; implementations do
/// not need to be `Send`.
pub trait CaptureSession {
    /// Register a script that runs before any page script on the next load
    fn add_init_script(&mut self, script: &str) -> Result<()>;

    /// Navigate and block until the load event.
    ///
    /// Web pages get a fixed settle pause after load in place of a
    /// network-idle wait; `file://` templates signal readiness themselves.
    fn navigate(&mut self, url: &str) -> Result<()>;

    /// Await `globalThis.renderComplete` and return its metadata.
    ///
    /// Fails with [`Error::RenderSignalMissing`] when the page never exposes it.
    fn await_render_signal(&mut self) -> Result<RenderMetadata>;

    /// Resize the layout viewport, keeping the device scale factor
    fn set_viewport(&mut self, viewport: Viewport) -> Result<()>;

    /// Capture the visible surface, or only `clip` when given
    fn capture(&mut self, format: CaptureFormat, clip: Option<ClipRect>) -> Result<Vec<u8>>;

    /// Release the page and its browser process
    fn close(self) -> Result<()>;
}

/// Opens fresh capture sessions
pub trait CaptureBackend: Send + Sync {
    type Session: CaptureSession;

    fn open(&self, config: &SessionConfig) -> Result<Self::Session>;
}

/// Controller states. `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    SessionOpen,
    PayloadInjected,
    SurfaceLoaded,
    AwaitingRenderSignal,
    Measured,
    Captured,
    Closed,
    Failed,
}

/// Owns a session and closes it exactly once.
struct SessionGuard<S: CaptureSession> {
    session: Option<S>,
}

impl<S: CaptureSession> SessionGuard<S> {
    fn new(session: S) -> Self {
        Self {
            session: Some(session),
        }
    }

    fn session(&mut self) -> Result<&mut S> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::CaptureFailure("Capture session already closed".into()))
    }

    fn release(mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.close(),
            None => Ok(()),
        }
    }
}

impl<S: CaptureSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close() {
                warn!("Failed to close capture session: {}", e);
            }
        }
    }
}

struct Run<'a> {
    state: CaptureState,
    deadline: Option<(Instant, u64)>,
    cancelled: &'a AtomicBool,
}

impl<'a> Run<'a> {
    fn new(timeout: Option<Duration>, cancelled: &'a AtomicBool) -> Self {
        Self {
            state: CaptureState::Idle,
            deadline: timeout.map(|t| (Instant::now() + t, t.as_millis() as u64)),
            cancelled,
        }
    }

    fn advance(&mut self, next: CaptureState) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        if let Some((deadline, ms)) = self.deadline {
            if Instant::now() > deadline {
                return Err(Error::RenderTimeout(ms));
            }
        }
        debug!("capture {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn fail(&mut self, err: &Error) {
        debug!("capture {:?} -> Failed: {}", self.state, err);
        self.state = CaptureState::Failed;
    }
}

/// Runs render requests against a [`CaptureBackend`]
pub struct CaptureController<B: CaptureBackend> {
    backend: B,
    registry: Arc<TemplateRegistry>,
    settle_delay: Duration,
    timeout: Option<Duration>,
    cancelled: AtomicBool,
}

impl<B: CaptureBackend> CaptureController<B> {
    pub fn new(backend: B, registry: Arc<TemplateRegistry>) -> Self {
        Self {
            backend,
            registry,
            settle_delay: Duration::from_millis(100),
            timeout: None,
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Fail with [`Error::RenderTimeout`] once a step finishes past this budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Make every in-flight and future capture stop at its next step.
    ///
    /// Sessions are still closed; the interrupted captures fail with
    /// [`Error::Cancelled`].
    pub fn cancel_all(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Render one request.
    ///
    /// Template lookup happens before a session is opened, so packaging
    /// defects never cost a browser launch.
    pub fn capture(&self, request: &RenderRequest) -> Result<RenderResult> {
        let strategy = self.registry.locate(request.format)?;
        let template_url = strategy.template_url()?;
        let initial = request.initial_viewport();

        let mut run = Run::new(self.timeout, &self.cancelled);
        let session_config = SessionConfig {
            viewport: initial,
            device_scale_factor: DEVICE_SCALE_FACTOR,
            step_timeout: self.timeout.unwrap_or(Duration::from_secs(60)),
        };

        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        let session = self.backend.open(&session_config)?;
        let mut guard = SessionGuard::new(session);
        info!("opened capture session for {} ({}x{})", request.format, initial.width, initial.height);

        let captured = match &strategy {
            RenderingStrategy::DirectNavigation => self.capture_url(&mut run, &mut guard, request, initial),
            RenderingStrategy::TemplateAt(_) => {
                let url = template_url.ok_or_else(|| Error::TemplateMissing(self.registry.base().to_path_buf()))?;
                self.capture_template(&mut run, &mut guard, request, &url, initial)
            }
        };

        let (bytes, width, height) = match captured {
            Ok(c) => c,
            Err(e) => {
                run.fail(&e);
                drop(guard);
                debug!("capture Failed -> Closed");
                return Err(e);
            }
        };

        if let Err(e) = guard.release() {
            warn!("Failed to close capture session: {}", e);
        }
        debug!("capture {:?} -> {:?}", run.state, CaptureState::Closed);

        let encoding = request.options.encoding;
        let bytes = encoding.finish(bytes)?;
        info!("rendered {} as {} {}x{}", request.format, encoding, width, height);

        Ok(RenderResult {
            bytes,
            encoding,
            width,
            height,
            format: request.format,
        })
    }

    fn capture_url(
        &self,
        run: &mut Run<'_>,
        guard: &mut SessionGuard<B::Session>,
        request: &RenderRequest,
        viewport: Viewport,
    ) -> Result<(Vec<u8>, u32, u32)> {
        let address = match &request.payload {
            Payload::Url(url) => url.as_str(),
            Payload::Bytes(_) => {
                return Err(Error::ConfigError("url format requires a URL payload".into()));
            }
        };
        run.advance(CaptureState::SessionOpen)?;

        let session = guard.session()?;
        session.navigate(address)?;
        run.advance(CaptureState::SurfaceLoaded)?;

        let bytes = session.capture(request.options.encoding.capture_format(), None)?;
        run.advance(CaptureState::Captured)?;

        Ok((
            bytes,
            viewport.width.saturating_mul(DEVICE_SCALE_FACTOR),
            viewport.height.saturating_mul(DEVICE_SCALE_FACTOR),
        ))
    }

    fn capture_template(
        &self,
        run: &mut Run<'_>,
        guard: &mut SessionGuard<B::Session>,
        request: &RenderRequest,
        template_url: &str,
        initial: Viewport,
    ) -> Result<(Vec<u8>, u32, u32)> {
        let bytes = match &request.payload {
            Payload::Bytes(bytes) => bytes.as_slice(),
            Payload::Url(_) => {
                return Err(Error::ConfigError(format!(
                    "{} format requires a byte payload",
                    request.format
                )));
            }
        };
        run.advance(CaptureState::SessionOpen)?;

        let payload = InitPayload::new(bytes, request.options.page, request.options.file_name.as_deref());
        let session = guard.session()?;
        session.add_init_script(&payload.init_script())?;
        run.advance(CaptureState::PayloadInjected)?;

        session.navigate(template_url)?;
        run.advance(CaptureState::SurfaceLoaded)?;

        run.advance(CaptureState::AwaitingRenderSignal)?;
        let metadata = session.await_render_signal()?;
        run.advance(CaptureState::Measured)?;
        debug!("render metadata: {:?}", metadata);

        let (viewport, clip) = plan_capture(&metadata, initial);
        session.set_viewport(viewport)?;
        std::thread::sleep(self.settle_delay);

        let image = session.capture(request.options.encoding.capture_format(), clip)?;
        run.advance(CaptureState::Captured)?;

        Ok((
            image,
            metadata.width.saturating_mul(DEVICE_SCALE_FACTOR),
            metadata.height.saturating_mul(DEVICE_SCALE_FACTOR),
        ))
    }
}

/// Viewport to resize to and rectangle to capture for measured content.
///
/// Without a clip origin the viewport is exactly the content box. With one,
/// the viewport grows to contain the offset content but never shrinks below
/// the initial viewport, and only the content rectangle is captured.
pub fn plan_capture(metadata: &RenderMetadata, initial: Viewport) -> (Viewport, Option<ClipRect>) {
    match metadata.clip {
        None => (
            Viewport {
                width: metadata.width,
                height: metadata.height,
            },
            None,
        ),
        Some((x, y)) => (
            Viewport {
                width: x.saturating_add(metadata.width).max(initial.width),
                height: y.saturating_add(metadata.height).max(initial.height),
            },
            Some(ClipRect {
                x,
                y,
                width: metadata.width,
                height: metadata.height,
            }),
        ),
    }
}
