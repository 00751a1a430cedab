//! Multi-variant Tesseract runner
//!
//! The same crop is preprocessed several ways and each version goes through
//! its own `tesseract` process. Variants run concurrently on a bounded pool
//! and are joined before the results are handed on; one failing variant
//! never sinks the batch.

use futures_util::future::join_all;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{OcrError, RawVariant};
use crate::config::TesseractConfig;
use crate::imaging::primitives::{
    add_border, binarize, blur, encode_png, flood_fill, gray_values, has_busy_edges, is_dark_dominated,
    is_mostly_colorless, negate, otsu_threshold, scale, sharpen, threshold, to_grayscale, WHITE,
};

/// Border added by the bordered variant
const BORDER_SIZE: u32 = 10;
/// Brightness delta accepted by the background flood fill
const BACKGROUND_FILL_DELTA: u8 = 35;
/// Seeds per image edge for the background flood fill
const SEEDS_PER_EDGE: u32 = 6;

/// Preprocessing applied before one Tesseract invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TesseractVariant {
    Original,
    AlternateModel,
    Inverted,
    Bordered,
    Downscaled,
    ThinLines,
    Blurred,
    Sharpened,
}

impl TesseractVariant {
    pub const ALL: [TesseractVariant; 8] = [
        Self::Original,
        Self::AlternateModel,
        Self::Inverted,
        Self::Bordered,
        Self::Downscaled,
        Self::ThinLines,
        Self::Blurred,
        Self::Sharpened,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::AlternateModel => "alt-model",
            Self::Inverted => "inverted",
            Self::Bordered => "bordered",
            Self::Downscaled => "downscaled",
            Self::ThinLines => "thin-lines",
            Self::Blurred => "blurred",
            Self::Sharpened => "sharpened",
        }
    }

    /// Produce this variant's image, or `None` when it does not apply
    fn prepare(&self, base: &RgbImage) -> Option<RgbImage> {
        match self {
            Self::Original | Self::AlternateModel => Some(base.clone()),
            Self::Inverted => {
                if !is_dark_dominated(base, None) {
                    return None;
                }
                let mut img = base.clone();
                negate(&mut img);
                Some(img)
            }
            Self::Bordered => Some(add_border(base, BORDER_SIZE, WHITE)),
            Self::Downscaled => Some(scale(base, 0.75)),
            Self::ThinLines => {
                let mut img = base.clone();
                to_grayscale(&mut img);
                let level = otsu_threshold(&gray_values(&img));
                threshold(&mut img, 0, level / 2);
                Some(img)
            }
            Self::Blurred => Some(blur(base, 0.5)),
            Self::Sharpened => {
                let mut img = base.clone();
                sharpen(&mut img, 1.5, 10, 0.5);
                Some(img)
            }
        }
    }
}

/// Aggregate result of one batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Every variant produced output
    Complete(Vec<RawVariant>),
    /// Some variants failed; the rest are usable
    PartialSuccess {
        outputs: Vec<RawVariant>,
        failures: Vec<(String, OcrError)>,
    },
    /// Nothing usable
    AllFailed(Vec<(String, OcrError)>),
}

/// Split per-variant results into a batch outcome, keeping variant order
pub fn aggregate_batch(results: Vec<(String, Result<String, OcrError>)>) -> BatchOutcome {
    let mut outputs = Vec::new();
    let mut failures = Vec::new();
    for (label, result) in results {
        match result {
            Ok(hocr) => outputs.push(RawVariant::hocr(label, hocr)),
            Err(e) => failures.push((label, e)),
        }
    }
    match (outputs.is_empty(), failures.is_empty()) {
        (true, _) => BatchOutcome::AllFailed(failures),
        (false, true) => BatchOutcome::Complete(outputs),
        (false, false) => BatchOutcome::PartialSuccess { outputs, failures },
    }
}

/// Settings for one invocation
#[derive(Debug, Clone)]
struct Invocation {
    language: String,
    psm: u32,
}

/// Tesseract engine
pub struct TesseractAdapter {
    executable: PathBuf,
    primary: Invocation,
    alternate: Option<Invocation>,
    timeout: Duration,
    pool: Arc<Semaphore>,
}

impl TesseractAdapter {
    /// Check that Tesseract and its models are installed
    pub async fn start(config: &TesseractConfig) -> Result<Self, OcrError> {
        let languages = list_languages(&config.executable, config.timeout()).await?;
        if !languages.iter().any(|l| *l == config.language) {
            return Err(OcrError::BackendError(format!(
                "Tesseract language model '{}' is not installed",
                config.language
            )));
        }

        let alternate = match &config.alternate_language {
            Some(lang) if languages.contains(lang) => Some(Invocation {
                language: lang.clone(),
                psm: config.alternate_psm,
            }),
            Some(lang) => {
                warn!("Tesseract model '{}' not installed, skipping its variant", lang);
                None
            }
            None => None,
        };

        info!(
            "Tesseract ready ({} models installed, primary '{}')",
            languages.len(),
            config.language
        );
        Ok(Self {
            executable: config.executable.clone(),
            primary: Invocation {
                language: config.language.clone(),
                psm: config.psm,
            },
            alternate,
            timeout: config.timeout(),
            pool: Arc::new(Semaphore::new(config.max_parallel.max(1))),
        })
    }

    /// Run every applicable variant and collect the successful hOCR outputs
    pub async fn recognize(&self, image: &RgbImage) -> Result<Vec<RawVariant>, OcrError> {
        let mut base = image.clone();
        clean_background(&mut base);

        let mut jobs = Vec::new();
        for variant in TesseractVariant::ALL {
            let invocation = match variant {
                TesseractVariant::AlternateModel => match &self.alternate {
                    Some(alt) => alt,
                    None => continue,
                },
                _ => &self.primary,
            };
            let Some(prepared) = variant.prepare(&base) else {
                continue;
            };
            let png = encode_png(&prepared).map_err(|e| OcrError::ExecutionFailed(format!("PNG encoding failed: {e}")))?;
            jobs.push(self.run_variant(variant, invocation, png));
        }

        let dispatched = jobs.len();
        match aggregate_batch(join_all(jobs).await) {
            BatchOutcome::Complete(outputs) => {
                debug!("All {} Tesseract variants succeeded", dispatched);
                Ok(outputs)
            }
            BatchOutcome::PartialSuccess { outputs, failures } => {
                for (label, e) in &failures {
                    debug!("Tesseract variant '{}' failed: {}", label, e);
                }
                debug!("{} of {} Tesseract variants succeeded", outputs.len(), dispatched);
                Ok(outputs)
            }
            BatchOutcome::AllFailed(failures) => {
                if !failures.is_empty() && failures.iter().all(|(_, e)| *e == OcrError::TimedOut) {
                    return Err(OcrError::TimedOut);
                }
                let first = failures
                    .first()
                    .map(|(label, e)| format!("{label}: {e}"))
                    .unwrap_or_else(|| "no variant dispatched".to_string());
                Err(OcrError::ExecutionFailed(format!(
                    "all {} Tesseract variants failed ({})",
                    dispatched, first
                )))
            }
        }
    }

    async fn run_variant(
        &self,
        variant: TesseractVariant,
        invocation: &Invocation,
        png: Vec<u8>,
    ) -> (String, Result<String, OcrError>) {
        let label = variant.label().to_string();
        let result = match self.pool.acquire().await {
            Ok(_permit) => {
                let args = [
                    "stdin".to_string(),
                    "stdout".to_string(),
                    "-l".to_string(),
                    invocation.language.clone(),
                    "--psm".to_string(),
                    invocation.psm.to_string(),
                    "hocr".to_string(),
                ];
                run_with_timeout(&self.executable, &args, Some(&png), self.timeout).await
            }
            Err(e) => Err(OcrError::ExecutionFailed(format!("worker pool closed: {e}"))),
        };
        (label, result)
    }
}

/// Flood the background white from the image edges, then binarize.
///
/// Applied only to colorful images or ones with cluttered borders.
pub fn clean_background(img: &mut RgbImage) {
    if is_mostly_colorless(img) && !has_busy_edges(img) {
        return;
    }
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }

    let mut seeds = Vec::new();
    for i in 0..SEEDS_PER_EDGE {
        let x = (w - 1) * i / (SEEDS_PER_EDGE - 1);
        let y = (h - 1) * i / (SEEDS_PER_EDGE - 1);
        seeds.extend([(x, 0), (x, h - 1), (0, y), (w - 1, y)]);
    }
    let mut filled = 0;
    for (x, y) in seeds {
        if img.get_pixel(x, y) != &Rgb([255, 255, 255]) {
            filled += flood_fill(img, x, y, WHITE, BACKGROUND_FILL_DELTA);
        }
    }
    debug!("Background cleanup filled {} pixels", filled);

    to_grayscale(img);
    let level = otsu_threshold(&gray_values(img));
    binarize(img, level);
}

/// Installed language models, from `tesseract --list-langs`
async fn list_languages(executable: &Path, timeout: Duration) -> Result<Vec<String>, OcrError> {
    let listing = run_with_timeout(executable, &["--list-langs".to_string()], None, timeout).await?;
    Ok(parse_language_list(&listing))
}

fn parse_language_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .filter(|line| !line.starts_with("List of available languages"))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Run a process with optional stdin bytes, returning stdout on success
async fn run_with_timeout(
    executable: &Path,
    args: &[String],
    input: Option<&[u8]>,
    timeout: Duration,
) -> Result<String, OcrError> {
    let run = async {
        let mut child = Command::new(executable)
            .args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OcrError::ExecutionFailed(format!("could not start {}: {e}", executable.display())))?;

        if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin
                .write_all(bytes)
                .await
                .map_err(|e| OcrError::ExecutionFailed(format!("writing image failed: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OcrError::ExecutionFailed(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::ExecutionFailed(format!(
                "{} exited with {}: {}",
                executable.display(),
                output.status,
                stderr.trim()
            )));
        }
        // --list-langs prints to stderr on older releases
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if text.trim().is_empty() {
            text = String::from_utf8_lossy(&output.stderr).into_owned();
        }
        Ok(text)
    };

    tokio::time::timeout(timeout, run).await.map_err(|_| OcrError::TimedOut)?
}
