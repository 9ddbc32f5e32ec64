use clap::Parser;
use screenitshot::output::screenshot_file;
use screenitshot::{ImageEncoding, RenderOptions, Renderer, RendererConfig, TemplateRoots};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::path::PathBuf;
use std::time::Duration;

// How long an interrupted run waits for browser sessions to close.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Convert various file formats to high-quality screenshots
#[derive(Parser, Debug)]
#[command(name = "screenitshot", version, disable_version_flag = true)]
struct Cli {
    /// Input file path or http(s) URL
    input: String,

    /// Output image path (defaults to the input with a new extension)
    output: Option<PathBuf>,

    /// Output image format
    #[arg(short = 'f', long = "format", default_value = "png", value_parser = ["png", "jpeg", "webp"])]
    format: String,

    /// Initial viewport width (default: 800, or 1280 for URLs)
    #[arg(short = 'w', long)]
    width: Option<u32>,

    /// Initial viewport height (default: 600, or 800 for URLs)
    #[arg(short = 'H', long)]
    height: Option<u32>,

    /// Page number for multi-page documents
    #[arg(short = 'p', long, default_value_t = 1)]
    page: u32,

    /// Per-request deadline in milliseconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Directory containing the rendering templates
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Log pipeline steps to stderr
    #[arg(long)]
    verbose: bool,

    /// Print version
    #[allow(dead_code)]
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}

fn init_logging(verbose: bool) {
    let level = if verbose || std::env::var_os("DEBUG").is_some() {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto);
}

async fn run(cli: Cli) -> i32 {
    let mut config = RendererConfig::default();
    if let Some(ms) = cli.timeout {
        config.timeout_ms = ms;
    }
    if let Some(dir) = &cli.templates {
        config.template_roots = TemplateRoots::single(dir);
    }

    let encoding = match cli.format.parse::<ImageEncoding>() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let options = RenderOptions {
        encoding,
        width: cli.width,
        height: cli.height,
        page: cli.page,
        file_name: None,
    };

    let renderer = match Renderer::new(config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    println!("Converting {}...", cli.input);
    let outcome = tokio::select! {
        res = screenshot_file(&renderer, &cli.input, cli.output.as_deref(), options) => res,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nAborted");
            if !renderer.shutdown(SHUTDOWN_GRACE).await {
                log::warn!("browser sessions still open after {:?}", SHUTDOWN_GRACE);
            }
            return 130;
        }
    };

    match outcome {
        Ok(shot) => {
            println!("✓ Screenshot saved to {}", shot.path.display());
            println!("  Renderer: {}", shot.result.format);
            println!("  Format: {}", shot.result.encoding);
            println!("  Size: {}x{}", shot.result.width, shot.result.height);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            if std::env::var_os("DEBUG").is_some() {
                eprintln!("{:?}", e);
            }
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(run(cli));
    std::process::exit(code);
}
