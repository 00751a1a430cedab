//! Yomiscan - Japanese text recognition for screen content
//!
//! Treats a screenshot file as the screen and runs one recognition request
//! against it, printing the ranked candidates as JSON.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use yomiscan::config::{self, AppConfig, EngineKind};
use yomiscan::storage;
use yomiscan::{Conductor, Point, RecognitionRequest, RecognizerEvent, Rectangle, StillImagePlatform};

/// Yomiscan - OCR for Japanese text on screen
#[derive(Parser, Debug)]
#[command(name = "yomiscan")]
#[command(about = "Find and recognize Japanese text blocks in screenshots")]
struct Args {
    /// Screenshot to treat as the screen
    #[arg(short, long)]
    image: PathBuf,

    /// Point at text (x,y) and detect the block around it
    #[arg(long, value_parser = parse_point, conflicts_with = "region")]
    point: Option<Point>,

    /// Recognize a fixed area (x,y,width,height)
    #[arg(long, value_parser = parse_region)]
    region: Option<Rectangle>,

    /// Narrow the region to the text block at its center
    #[arg(long, requires = "region")]
    narrow: bool,

    /// Override the configured OCR backend
    #[arg(short, long)]
    backend: Option<Backend>,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write block detection overlays to this directory (defaults to the
    /// user data directory when `debug.submit_images` is set)
    #[arg(long)]
    debug_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Tesseract,
    MangaOcr,
    Remote,
}

impl From<Backend> for EngineKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Tesseract => EngineKind::Tesseract,
            Backend::MangaOcr => EngineKind::MangaOcr,
            Backend::Remote => EngineKind::Remote,
        }
    }
}

fn parse_numbers(s: &str, count: usize) -> Result<Vec<u32>, String> {
    let numbers = s
        .split(',')
        .map(|part| part.trim().parse::<u32>().map_err(|e| format!("{part:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    if numbers.len() != count {
        return Err(format!("expected {count} comma-separated numbers, got {}", numbers.len()));
    }
    Ok(numbers)
}

fn parse_point(s: &str) -> Result<Point, String> {
    let n = parse_numbers(s, 2)?;
    Ok(Point::new(n[0], n[1]))
}

fn parse_region(s: &str) -> Result<Rectangle, String> {
    let n = parse_numbers(s, 4)?;
    Rectangle::from_xywh(n[0], n[1], n[2], n[3]).ok_or_else(|| "region must not be empty".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut config = load_or_create_config(args.config.as_deref());
    if let Some(backend) = args.backend {
        config.recognizer.engine = backend.into();
    }
    let debug_dir = resolve_debug_dir(args.debug_dir.clone(), config.debug.submit_images);
    config.debug.submit_images = debug_dir.is_some();

    let screen = image::open(&args.image)
        .with_context(|| format!("Failed to open {}", args.image.display()))?
        .to_rgb8();
    info!("Loaded {} ({}x{})", args.image.display(), screen.width(), screen.height());

    let (platform, request) = match (args.point, args.region) {
        (Some(point), _) => (
            StillImagePlatform::new(screen).with_point(point),
            RecognitionRequest::AutoBlock,
        ),
        (None, Some(area)) => (
            StillImagePlatform::new(screen),
            RecognitionRequest::Region {
                area,
                auto_narrow: args.narrow,
            },
        ),
        (None, None) => (
            StillImagePlatform::new(screen.clone()),
            RecognitionRequest::ProvidedImage(screen),
        ),
    };

    let client = reqwest::Client::new();
    let (mut conductor, channels) = Conductor::new(platform, &config, client)
        .await
        .context("Invalid replace rule in configuration")?;

    let result = conductor.recognize(request).await;

    for notification in channels.notifications.try_iter() {
        eprintln!("{notification}");
    }
    for event in channels.events.try_iter() {
        if let RecognizerEvent::DebugImageSubmitted(overlay) = event {
            if let Some(dir) = &debug_dir {
                match storage::save_debug_image(dir, &overlay) {
                    Ok(path) => info!("Saved debug overlay to {}", path.display()),
                    Err(e) => warn!("{:#}", e),
                }
            }
        }
    }

    let chunks = result?;
    println!("{}", serde_json::to_string_pretty(&chunks)?);
    Ok(())
}

/// Where debug overlays go: the explicit directory, else the default one when enabled
fn resolve_debug_dir(explicit: Option<PathBuf>, enabled_in_config: bool) -> Option<PathBuf> {
    match explicit {
        Some(dir) => Some(dir),
        None if enabled_in_config => match storage::default_debug_dir() {
            Ok(dir) => Some(dir),
            Err(e) => {
                warn!("No data directory for debug overlays: {:#}", e);
                None
            }
        },
        None => None,
    }
}

/// Load configuration from file or create default
fn load_or_create_config(explicit: Option<&Path>) -> AppConfig {
    let config_path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => storage::default_config_path().ok(),
    };
    if let Some(config_path) = config_path {
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return config;
                }
                Err(e) => warn!("Ignoring unreadable configuration {:?}: {}", config_path, e),
            }
        } else if explicit.is_none() {
            let config = AppConfig::default();
            match config::save_config(&config, &config_path) {
                Ok(()) => info!("Wrote default configuration to {:?}", config_path),
                Err(e) => warn!("Could not write default configuration: {}", e),
            }
            return config;
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point_and_region() {
        assert_eq!(parse_point("12, 34").unwrap(), Point::new(12, 34));
        assert!(parse_point("12").is_err());
        assert!(parse_point("a,b").is_err());

        let area = parse_region("10,20,30,40").unwrap();
        assert_eq!((area.left(), area.top(), area.width(), area.height()), (10, 20, 30, 40));
        assert!(parse_region("10,20,0,40").is_err());
    }

    #[test]
    fn test_explicit_debug_dir_wins() {
        let dir = PathBuf::from("/tmp/overlays");
        assert_eq!(resolve_debug_dir(Some(dir.clone()), false), Some(dir.clone()));
        assert_eq!(resolve_debug_dir(Some(dir.clone()), true), Some(dir));
        assert_eq!(resolve_debug_dir(None, false), None);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["yomiscan", "-i", "shot.png", "--region", "0,0,50,50", "--narrow"]).unwrap();
        assert!(args.narrow);
        assert!(args.region.is_some());

        assert!(Args::try_parse_from(["yomiscan", "-i", "shot.png", "--narrow"]).is_err());
        assert!(Args::try_parse_from(["yomiscan", "-i", "s.png", "--point", "1,2", "--region", "0,0,5,5"]).is_err());
    }
}
