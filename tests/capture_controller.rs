//! Capture pipeline tests against an instrumented fake browser

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
use screenitshot::capture::SessionConfig;
use screenitshot::encoding::CaptureFormat;
use screenitshot::output::{request_for_input, screenshot_blocking, screenshot_file};
use screenitshot::{
    CaptureBackend, CaptureSession, ClipRect, Error, FormatId, ImageEncoding, Payload, RenderMetadata, RenderOptions,
    RenderRequest, Renderer, RendererConfig, Result, TemplateRoots, Viewport,
};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Open(Viewport, u32),
    InitScript(String),
    Navigate(String),
    AwaitSignal,
    SetViewport(Viewport),
    Capture(CaptureFormat, Option<ClipRect>),
    Close,
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl Recorder {
    fn push(&self, e: Event) {
        self.events.lock().unwrap().push(e);
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[derive(Clone)]
struct FakeBackend {
    rec: Arc<Recorder>,
    metadata: Option<RenderMetadata>,
    fail_capture: bool,
    signal_delay: Duration,
}

impl FakeBackend {
    fn new(metadata: Option<RenderMetadata>) -> Self {
        Self {
            rec: Arc::new(Recorder::default()),
            metadata,
            fail_capture: false,
            signal_delay: Duration::ZERO,
        }
    }
}

struct FakeSession {
    rec: Arc<Recorder>,
    viewport: Viewport,
    metadata: Option<RenderMetadata>,
    fail_capture: bool,
    signal_delay: Duration,
}

impl CaptureBackend for FakeBackend {
    type Session = FakeSession;

    fn open(&self, config: &SessionConfig) -> Result<FakeSession> {
        self.rec.opens.fetch_add(1, Ordering::SeqCst);
        self.rec.push(Event::Open(config.viewport, config.device_scale_factor));
        Ok(FakeSession {
            rec: self.rec.clone(),
            viewport: config.viewport,
            metadata: self.metadata,
            fail_capture: self.fail_capture,
            signal_delay: self.signal_delay,
        })
    }
}

impl CaptureSession for FakeSession {
    fn add_init_script(&mut self, script: &str) -> Result<()> {
        self.rec.push(Event::InitScript(script.to_string()));
        Ok(())
    }

    fn navigate(&mut self, url: &str) -> Result<()> {
        self.rec.push(Event::Navigate(url.to_string()));
        Ok(())
    }

    fn await_render_signal(&mut self) -> Result<RenderMetadata> {
        self.rec.push(Event::AwaitSignal);
        std::thread::sleep(self.signal_delay);
        self.metadata
            .ok_or_else(|| Error::RenderSignalMissing("globalThis.renderComplete not found".into()))
    }

    fn set_viewport(&mut self, viewport: Viewport) -> Result<()> {
        self.rec.push(Event::SetViewport(viewport));
        self.viewport = viewport;
        Ok(())
    }

    fn capture(&mut self, format: CaptureFormat, clip: Option<ClipRect>) -> Result<Vec<u8>> {
        self.rec.push(Event::Capture(format, clip));
        if self.fail_capture {
            return Err(Error::CaptureFailure("tab crashed".into()));
        }
        let (w, h) = match clip {
            Some(c) => (c.width, c.height),
            None => (self.viewport.width, self.viewport.height),
        };
        Ok(png(w * 2, h * 2))
    }

    fn close(self) -> Result<()> {
        self.rec.closes.fetch_add(1, Ordering::SeqCst);
        self.rec.push(Event::Close);
        Ok(())
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgba([255u8, 255, 255, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img).write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

fn template_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for slug in ["code", "pdf"] {
        std::fs::write(dir.path().join(format!("{}.html", slug)), "<html></html>").unwrap();
    }
    dir
}

fn renderer(backend: FakeBackend, templates: &std::path::Path) -> Renderer<FakeBackend> {
    let config = RendererConfig {
        template_roots: TemplateRoots::single(templates),
        settle_delay_ms: 0,
        timeout_ms: 5_000,
        max_sessions: 2,
        ..Default::default()
    };
    Renderer::with_backend(backend, config).unwrap()
}

fn code_request(page: u32) -> RenderRequest {
    let options = RenderOptions {
        page,
        file_name: Some("hello.txt".into()),
        ..Default::default()
    };
    RenderRequest::new(Payload::from("hello world\n".to_string()), FormatId::Code, options).unwrap()
}

fn metadata(width: u32, height: u32, clip: Option<(u32, u32)>) -> Option<RenderMetadata> {
    Some(RenderMetadata { width, height, clip })
}

#[tokio::test]
async fn test_template_render_follows_state_order() {
    let templates = template_dir();
    let backend = FakeBackend::new(metadata(320, 240, None));
    let rec = backend.rec.clone();
    let r = renderer(backend, templates.path());

    let result = r.render(code_request(2)).await.unwrap();
    assert_eq!((result.width, result.height), (640, 480));
    assert_eq!(result.format, FormatId::Code);
    assert_eq!(result.encoding, ImageEncoding::Png);

    let events = rec.events();
    assert_eq!(events.len(), 7, "{:?}", events);
    assert_eq!(events[0], Event::Open(Viewport { width: 800, height: 600 }, 2));
    match &events[1] {
        Event::InitScript(script) => {
            assert!(script.contains("globalThis.fileBase64 = \"aGVsbG8gd29ybGQK\";"));
            assert!(script.contains("globalThis.pageNumber = 2;"));
            assert!(script.contains("globalThis.fileName = \"hello.txt\";"));
        }
        other => panic!("expected init script before navigation, got {:?}", other),
    }
    match &events[2] {
        Event::Navigate(url) => {
            assert!(url.starts_with("file://"));
            assert!(url.ends_with("/code.html"));
        }
        other => panic!("expected navigation, got {:?}", other),
    }
    assert_eq!(events[3], Event::AwaitSignal);
    assert_eq!(events[4], Event::SetViewport(Viewport { width: 320, height: 240 }));
    assert_eq!(events[5], Event::Capture(CaptureFormat::Png, None));
    assert_eq!(events[6], Event::Close);

    let decoded = image::load_from_memory(&result.bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (640, 480));
}

#[tokio::test]
async fn test_clip_origin_captures_exact_content_box() {
    let templates = template_dir();
    let backend = FakeBackend::new(metadata(300, 200, Some((40, 30))));
    let rec = backend.rec.clone();
    let r = renderer(backend, templates.path());

    let result = r.render(code_request(1)).await.unwrap();
    assert_eq!((result.width, result.height), (600, 400));

    let events = rec.events();
    assert!(events.contains(&Event::SetViewport(Viewport { width: 800, height: 600 })));
    assert!(events.contains(&Event::Capture(
        CaptureFormat::Png,
        Some(ClipRect { x: 40, y: 30, width: 300, height: 200 })
    )));

    let decoded = image::load_from_memory(&result.bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (600, 400));
}

#[tokio::test]
async fn test_clip_origin_grows_viewport_past_initial() {
    let templates = template_dir();
    let backend = FakeBackend::new(metadata(1000, 700, Some((24, 24))));
    let rec = backend.rec.clone();
    let r = renderer(backend, templates.path());

    let result = r.render(code_request(1)).await.unwrap();
    assert_eq!((result.width, result.height), (2000, 1400));
    assert!(rec
        .events()
        .contains(&Event::SetViewport(Viewport { width: 1024, height: 724 })));
}

#[tokio::test]
async fn test_url_uses_web_viewport() {
    let templates = template_dir();
    let backend = FakeBackend::new(None);
    let rec = backend.rec.clone();
    let r = renderer(backend, templates.path());

    let request = RenderRequest::new(
        Payload::Url("https://example.com".into()),
        FormatId::Url,
        RenderOptions::default(),
    )
    .unwrap();
    let result = r.render(request).await.unwrap();
    assert_eq!((result.width, result.height), (2560, 1600));
    assert_eq!(result.format, FormatId::Url);

    assert_eq!(
        rec.events(),
        vec![
            Event::Open(Viewport { width: 1280, height: 800 }, 2),
            Event::Navigate("https://example.com".into()),
            Event::Capture(CaptureFormat::Png, None),
            Event::Close,
        ]
    );
}

#[tokio::test]
async fn test_webp_request_reencodes_png_capture() {
    let templates = template_dir();
    let backend = FakeBackend::new(metadata(50, 40, None));
    let rec = backend.rec.clone();
    let r = renderer(backend, templates.path());

    let mut request = code_request(1);
    request.options.encoding = ImageEncoding::Webp;
    let result = r.render(request).await.unwrap();

    assert_eq!(result.encoding, ImageEncoding::Webp);
    assert_eq!(&result.bytes[0..4], b"RIFF");
    assert_eq!(&result.bytes[8..12], b"WEBP");
    assert!(rec.events().contains(&Event::Capture(CaptureFormat::Png, None)));
}

#[tokio::test]
async fn test_dimensions_are_deterministic() {
    let templates = template_dir();
    let r = renderer(FakeBackend::new(metadata(413, 97, None)), templates.path());

    let first = r.render(code_request(1)).await.unwrap();
    let second = r.render(code_request(1)).await.unwrap();
    assert_eq!((first.width, first.height), (second.width, second.height));
}

#[tokio::test]
async fn test_missing_render_signal_closes_session_once() {
    let templates = template_dir();
    let backend = FakeBackend::new(None);
    let rec = backend.rec.clone();
    let r = renderer(backend, templates.path());

    let err = r.render(code_request(1)).await.unwrap_err();
    assert!(matches!(err, Error::RenderSignalMissing(_)), "{:?}", err);
    assert_eq!(rec.opens.load(Ordering::SeqCst), 1);
    assert_eq!(rec.closes.load(Ordering::SeqCst), 1);
    assert!(!rec.events().iter().any(|e| matches!(e, Event::Capture(..))));
}

#[tokio::test]
async fn test_capture_failure_closes_session_once() {
    let templates = template_dir();
    let mut backend = FakeBackend::new(metadata(10, 10, None));
    backend.fail_capture = true;
    let rec = backend.rec.clone();
    let r = renderer(backend, templates.path());

    let err = r.render(code_request(1)).await.unwrap_err();
    assert!(matches!(err, Error::CaptureFailure(_)));
    assert_eq!(rec.closes.load(Ordering::SeqCst), 1);
    assert_eq!(rec.events().last(), Some(&Event::Close));
}

#[tokio::test]
async fn test_missing_template_never_opens_session() {
    let templates = template_dir();
    let backend = FakeBackend::new(metadata(10, 10, None));
    let rec = backend.rec.clone();
    let r = renderer(backend, templates.path());

    let request = RenderRequest::new(Payload::Bytes(vec![1, 2, 3]), FormatId::Gpx, RenderOptions::default()).unwrap();
    let err = r.render(request).await.unwrap_err();
    assert!(matches!(err, Error::TemplateMissing(p) if p.ends_with("gpx.html")));
    assert_eq!(rec.opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unrecognized_input_never_opens_session() {
    let templates = template_dir();
    let backend = FakeBackend::new(metadata(10, 10, None));
    let rec = backend.rec.clone();
    let r = renderer(backend, templates.path());

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("notes.unknownext");
    std::fs::write(&input, b"0123456789").unwrap();
    let input = input.to_str().unwrap();

    assert!(matches!(
        request_for_input(input, RenderOptions::default()),
        Err(Error::UnrecognizedFormat(_))
    ));
    let err = screenshot_file(&r, input, None, RenderOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::UnrecognizedFormat(_)));

    let missing = dir.path().join("missing.pdf");
    let err = screenshot_file(&r, missing.to_str().unwrap(), None, RenderOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InputNotFound(_)));

    assert_eq!(rec.opens.load(Ordering::SeqCst), 0);
    assert!(!dir.path().join("notes.png").exists());
}

#[tokio::test]
async fn test_screenshot_file_writes_output() {
    let templates = template_dir();
    let r = renderer(FakeBackend::new(metadata(64, 32, None)), templates.path());

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("main.rs");
    std::fs::write(&input, b"fn main() {}\n").unwrap();

    let shot = screenshot_file(&r, input.to_str().unwrap(), None, RenderOptions::default())
        .await
        .unwrap();
    assert_eq!(shot.path, dir.path().join("main.png"));
    assert_eq!(std::fs::read(&shot.path).unwrap(), shot.result.bytes);
    assert_eq!((shot.result.width, shot.result.height), (128, 64));
}

#[test]
fn test_blocking_screenshot_outside_runtime() {
    let templates = template_dir();
    let r = renderer(FakeBackend::new(metadata(50, 20, None)), templates.path());

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("notes.txt");
    std::fs::write(&input, b"plain text\n").unwrap();
    let output = dir.path().join("shot.jpg");
    let options = RenderOptions {
        encoding: ImageEncoding::Jpeg,
        ..Default::default()
    };

    let shot = screenshot_blocking(&r, input.to_str().unwrap(), Some(&output), options).unwrap();
    assert_eq!(shot.path, output);
    assert_eq!((shot.result.width, shot.result.height), (100, 40));
    assert!(output.exists());
}

#[tokio::test]
async fn test_session_limit_serializes_captures() {
    let templates = template_dir();
    let mut backend = FakeBackend::new(metadata(10, 10, None));
    backend.signal_delay = Duration::from_millis(50);
    let rec = backend.rec.clone();
    let config = RendererConfig {
        template_roots: TemplateRoots::single(templates.path()),
        settle_delay_ms: 0,
        timeout_ms: 5_000,
        max_sessions: 1,
        ..Default::default()
    };
    let r = Renderer::with_backend(backend, config).unwrap();

    let (first, second) = tokio::join!(r.render(code_request(1)), r.render(code_request(2)));
    assert!(first.is_ok(), "{:?}", first);
    assert!(second.is_ok(), "{:?}", second);

    let mut live = 0;
    for event in rec.events() {
        match event {
            Event::Open(..) => {
                live += 1;
                assert_eq!(live, 1, "second session opened before the first closed");
            }
            Event::Close => live -= 1,
            _ => {}
        }
    }
    assert_eq!(live, 0);
    assert_eq!(rec.opens.load(Ordering::SeqCst), 2);
    assert_eq!(rec.closes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_render_leaves_no_output_file() {
    let templates = template_dir();
    let r = renderer(FakeBackend::new(None), templates.path());

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("main.rs");
    std::fs::write(&input, b"fn main() {}\n").unwrap();
    let output = dir.path().join("out.png");

    let err = screenshot_file(&r, input.to_str().unwrap(), Some(&output), RenderOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RenderSignalMissing(_)));
    assert!(!output.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_deadline_expiry_still_closes_session() {
    let templates = template_dir();
    let mut backend = FakeBackend::new(metadata(10, 10, None));
    backend.signal_delay = Duration::from_millis(300);
    let rec = backend.rec.clone();
    let config = RendererConfig {
        template_roots: TemplateRoots::single(templates.path()),
        settle_delay_ms: 0,
        timeout_ms: 50,
        ..Default::default()
    };
    let r = Renderer::with_backend(backend, config).unwrap();

    let err = r.render(code_request(1)).await.unwrap_err();
    assert!(matches!(err, Error::RenderTimeout(50)), "{:?}", err);

    // The worker notices the expired deadline after the slow step and closes.
    for _ in 0..50 {
        if rec.closes.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(rec.closes.load(Ordering::SeqCst), 1);
    assert!(!rec.events().iter().any(|e| matches!(e, Event::Capture(..))));
}

#[tokio::test]
async fn test_shutdown_cancels_and_drains() {
    let templates = template_dir();
    let mut backend = FakeBackend::new(metadata(10, 10, None));
    backend.signal_delay = Duration::from_millis(100);
    let rec = backend.rec.clone();
    let r = Arc::new(renderer(backend, templates.path()));

    let in_flight = {
        let r = r.clone();
        tokio::spawn(async move { r.render(code_request(1)).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(r.shutdown(Duration::from_secs(2)).await);
    let res = in_flight.await.unwrap();
    assert!(matches!(res, Err(Error::Cancelled)), "{:?}", res);
    assert_eq!(rec.opens.load(Ordering::SeqCst), rec.closes.load(Ordering::SeqCst));

    assert!(matches!(r.render(code_request(1)).await, Err(Error::Cancelled)));
    assert_eq!(rec.opens.load(Ordering::SeqCst), 1);
}
