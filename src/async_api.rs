use crate::capture::{CaptureBackend, CaptureController};
use crate::templates::TemplateRegistry;
use crate::{Error, Payload, RenderOptions, RenderRequest, RenderResult, RendererConfig, Result};
use log::debug;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};

#[cfg(feature = "cdp")]
use crate::cdp::CdpBackend;

/// An async-friendly renderer backed by one worker thread per request.
///
/// Each worker opens, drives and closes its own capture session, so browser
/// handles never cross threads. A semaphore bounds how many sessions are
/// alive at once; the permit travels with the worker, so a request that
/// timed out on the caller's side still counts until its session is closed.
pub struct Renderer<B: CaptureBackend + 'static> {
    controller: Arc<CaptureController<B>>,
    sessions: Arc<Semaphore>,
    max_sessions: usize,
    timeout: Duration,
}

#[cfg(feature = "cdp")]
impl Renderer<CdpBackend> {
    /// Create a renderer that launches headless Chrome per request.
    pub fn new(config: RendererConfig) -> Result<Self> {
        let backend = CdpBackend::new(&config);
        Self::with_backend(backend, config)
    }
}

impl<B: CaptureBackend + 'static> Renderer<B> {
    /// Create a renderer over any capture backend.
    ///
    /// The template directory is resolved here, once, and shared read-only by
    /// every request.
    pub fn with_backend(backend: B, config: RendererConfig) -> Result<Self> {
        if config.max_sessions == 0 {
            return Err(Error::ConfigError("max_sessions must be at least 1".into()));
        }
        if config.timeout_ms == 0 {
            return Err(Error::ConfigError("timeout_ms must be positive".into()));
        }

        let registry = Arc::new(TemplateRegistry::resolve(&config.template_roots));
        let timeout = Duration::from_millis(config.timeout_ms);
        let controller = CaptureController::new(backend, registry)
            .with_settle_delay(Duration::from_millis(config.settle_delay_ms))
            .with_timeout(timeout);

        Ok(Self {
            controller: Arc::new(controller),
            sessions: Arc::new(Semaphore::new(config.max_sessions)),
            max_sessions: config.max_sessions,
            timeout,
        })
    }

    /// Render a resolved request.
    pub async fn render(&self, request: RenderRequest) -> Result<RenderResult> {
        let permit = self
            .sessions
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Cancelled)?;

        let (tx, rx) = oneshot::channel();
        let controller = self.controller.clone();
        thread::Builder::new()
            .name("screenitshot-capture".into())
            .spawn(move || {
                let _permit = permit;
                let res = controller.capture(&request);
                // The caller may have given up; the session is already closed either way.
                let _ = tx.send(res);
            })?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => Err(Error::CaptureFailure(format!("Render worker canceled: {}", e))),
            Err(_) => {
                debug!("request exceeded {}ms; worker will clean up on its own", self.timeout.as_millis());
                Err(Error::RenderTimeout(self.timeout.as_millis() as u64))
            }
        }
    }

    /// Cancel in-flight requests and wait up to `grace` for their sessions to close.
    ///
    /// Returns `true` when every session was released in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.controller.cancel_all();
        let all = u32::try_from(self.max_sessions).unwrap_or(u32::MAX);
        match tokio::time::timeout(grace, self.sessions.acquire_many(all)).await {
            Ok(Ok(permits)) => {
                permits.forget();
                self.sessions.close();
                true
            }
            _ => false,
        }
    }

    /// Render a payload with a caller-declared slug or MIME type.
    pub async fn render_declared(
        &self,
        payload: Payload,
        declared_format: &str,
        options: RenderOptions,
    ) -> Result<RenderResult> {
        let request = RenderRequest::from_declared(payload, declared_format, options)?;
        self.render(request).await
    }
}

/// One-shot render with the default configuration and headless Chrome.
#[cfg(feature = "cdp")]
pub async fn render(payload: Payload, declared_format: &str, options: RenderOptions) -> Result<RenderResult> {
    Renderer::new(RendererConfig::default())?
        .render_declared(payload, declared_format, options)
        .await
}
