//! Chrome DevTools Protocol capture backend

use crate::capture::{CaptureBackend, CaptureSession, ClipRect, RenderMetadata, SessionConfig};
use crate::encoding::CaptureFormat;
use crate::{Error, RendererConfig, Result, Viewport};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::{Emulation, Page};
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// Resolves to the JSON-encoded metadata, or null when the template has no signal.
const AWAIT_RENDER_COMPLETE: &str = r#"(async function() {
    const renderComplete = globalThis.renderComplete;
    if (!renderComplete) {
        return null;
    }
    const metadata = await renderComplete;
    return JSON.stringify(metadata);
})()"#;

// Extra wait after load for pages that keep fetching (no network-idle event here).
const URL_IDLE_WAIT: Duration = Duration::from_millis(500);

/// Launches a fresh headless Chrome for every session (no pooling).
#[derive(Debug, Clone, Default)]
pub struct CdpBackend {
    chrome_path: Option<PathBuf>,
    sandbox: bool,
}

impl CdpBackend {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            chrome_path: config.chrome_path.clone(),
            sandbox: config.sandbox,
        }
    }
}

impl CaptureBackend for CdpBackend {
    type Session = CdpSession;

    fn open(&self, config: &SessionConfig) -> Result<CdpSession> {
        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(self.sandbox)
            .path(self.chrome_path.clone())
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .idle_browser_timeout(config.step_timeout)
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(config.step_timeout);

        let mut session = CdpSession {
            browser,
            tab,
            device_scale_factor: config.device_scale_factor,
            step_timeout: config.step_timeout,
        };
        session.set_viewport(config.viewport)?;
        info!("launched headless Chrome session");
        Ok(session)
    }
}

/// One Chrome process with a single tab.
pub struct CdpSession {
    browser: Browser,
    tab: Arc<Tab>,
    device_scale_factor: u32,
    step_timeout: Duration,
}

impl CaptureSession for CdpSession {
    fn add_init_script(&mut self, script: &str) -> Result<()> {
        self.tab
            .call_method(Page::AddScriptToEvaluateOnNewDocument {
                source: script.to_string(),
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })
            .map_err(|e| Error::CaptureFailure(format!("Failed to inject payload: {}", e)))?;
        Ok(())
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        debug!("navigating to {}", truncate_for_log(url));
        self.tab
            .navigate_to(url)
            .map_err(|e| Error::CaptureFailure(format!("Navigation failed: {}", e)))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| map_wait_error(e, self.step_timeout, "Wait for navigation failed"))?;

        if let Some(pause) = settle_after_load(url) {
            std::thread::sleep(pause);
        }
        Ok(())
    }

    fn await_render_signal(&mut self) -> Result<RenderMetadata> {
        let eval = self
            .tab
            .evaluate(AWAIT_RENDER_COMPLETE, true)
            .map_err(|e| Error::RenderSignalMissing(format!("renderComplete did not resolve: {}", e)))?;

        match eval.value {
            Some(serde_json::Value::String(json)) => RenderMetadata::from_json(&json),
            Some(serde_json::Value::Null) | None => Err(Error::RenderSignalMissing(
                "globalThis.renderComplete not found".into(),
            )),
            Some(other) => Err(Error::RenderSignalMissing(format!(
                "Unexpected renderComplete value: {}",
                other
            ))),
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        // Built from JSON so optional protocol fields default to absent.
        let params = serde_json::json!({
            "width": viewport.width,
            "height": viewport.height,
            "deviceScaleFactor": self.device_scale_factor,
            "mobile": false,
        });
        let method: Emulation::SetDeviceMetricsOverride = serde_json::from_value(params)
            .map_err(|e| Error::CaptureFailure(format!("Failed to build viewport override: {}", e)))?;

        self.tab
            .call_method(method)
            .map_err(|e| Error::CaptureFailure(format!("Failed to resize viewport: {}", e)))?;
        debug!("viewport set to {}x{}", viewport.width, viewport.height);
        Ok(())
    }

    fn capture(&mut self, format: CaptureFormat, clip: Option<ClipRect>) -> Result<Vec<u8>> {
        let format = match format {
            CaptureFormat::Png => Page::CaptureScreenshotFormatOption::Png,
            CaptureFormat::Jpeg => Page::CaptureScreenshotFormatOption::Jpeg,
        };
        let clip = clip.map(|c| Page::Viewport {
            x: c.x as f64,
            y: c.y as f64,
            width: c.width as f64,
            height: c.height as f64,
            scale: 1.0,
        });

        self.tab
            .capture_screenshot(format, None, clip, true)
            .map_err(|e| Error::CaptureFailure(format!("Screenshot failed: {}", e)))
    }

    fn close(self) -> Result<()> {
        // Dropping the browser terminates the child process.
        drop(self.tab);
        drop(self.browser);
        info!("closed headless Chrome session");
        Ok(())
    }
}

fn map_wait_error(err: anyhow::Error, timeout: Duration, context: &str) -> Error {
    let msg = err.to_string();
    if msg.to_ascii_lowercase().contains("timeout") || msg.to_ascii_lowercase().contains("timed out") {
        Error::RenderTimeout(timeout.as_millis() as u64)
    } else {
        Error::CaptureFailure(format!("{}: {}", context, msg))
    }
}

/// Pause after the load event; templates under `file://` need none.
fn settle_after_load(url: &str) -> Option<Duration> {
    if url.starts_with("file:") {
        None
    } else {
        Some(URL_IDLE_WAIT)
    }
}

fn truncate_for_log(url: &str) -> &str {
    match url.char_indices().nth(120) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}
