//! Turn a scanned PDF into a correctly oriented, searchable PDF.
//!
//! The [`Controller`] checks the document first and leaves it alone if it's
//! already fine. Otherwise it repeatedly rotates the current working file,
//! OCRs the rotation, and checks the result, until a result passes or we run
//! out of attempts. Failures of individual tools are logged and absorbed; the
//! controller always returns an [`Outcome`].
//!
//! File lifecycle: exactly one file is left on disk, the returned path.
//! That is the original if no OCR output ever replaced it.

use std::sync::{Arc, LazyLock};

use clap::Args;
use regex::Regex;

use crate::{
    detect::PdfInspector,
    fs_utils::remove_if_exists,
    prelude::*,
    tools::{ToolOpts, ocrmypdf::OcrMyPdfEngine, rotate::Angle},
};

use self::rotation::{AppliedRotation, RotationApplier};

pub mod rotation;

/// Quality checks the controller relies on.
#[async_trait]
pub trait Inspector: Send + Sync + 'static {
    /// Does the file exist, open as a PDF, and have at least one page?
    async fn is_valid_pdf(&self, path: &Path) -> bool;

    /// Does the PDF already contain extracted text?
    async fn has_text(&self, path: &Path) -> bool;

    /// Is the text the right way up? Must return false for PDFs without text.
    async fn orientation_ok(&self, path: &Path) -> bool;

    /// Which way should we try rotating first, if we have any idea?
    async fn suggested_rotation(&self, _path: &Path) -> Option<Angle> {
        None
    }
}

/// Interface for a full-document OCR engine.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// OCR `input`, writing a searchable PDF to `output`.
    async fn ocr(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Options for making PDFs searchable.
#[derive(Args, Clone, Debug)]
pub struct SearchableOpts {
    /// How many rotate-and-OCR attempts to make before giving up.
    #[clap(long, default_value = "4")]
    pub max_attempts: usize,

    /// Minimum non-whitespace characters a page needs to count as having
    /// text.
    #[clap(long, default_value = "20")]
    pub min_text_per_page: usize,

    /// Use tesseract's orientation detection to pick which rotation to try
    /// first.
    #[clap(long)]
    pub osd_hint: bool,

    #[clap(flatten)]
    pub tools: ToolOpts,
}

impl Default for SearchableOpts {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            min_text_per_page: 20,
            osd_hint: false,
            tools: ToolOpts::default(),
        }
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The returned path passed every check.
    Accepted,
    /// We ran out of attempts. The returned path is our best effort.
    Exhausted,
}

/// What happened in one attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptResult {
    Accepted,
    /// OCR produced a valid PDF that failed the quality checks.
    Rejected,
    RotationFailed,
    /// OCR failed, or wrote something that isn't a valid PDF.
    OcrFailed,
}

/// A record of one loop iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: usize,
    pub angle: Option<Angle>,
    /// The rotation tool that succeeded, if any.
    pub tool: Option<String>,
    /// The OCR output we produced, if it survived.
    pub output: Option<PathBuf>,
    pub result: AttemptResult,
}

/// The result of [`Controller::make_searchable`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// The current document. Always exists.
    pub path: PathBuf,
    pub resolution: Resolution,
    pub attempts: Vec<Attempt>,
}

impl Outcome {
    fn accepted(path: PathBuf, attempts: Vec<Attempt>) -> Self {
        Self {
            path,
            resolution: Resolution::Accepted,
            attempts,
        }
    }

    fn exhausted(path: PathBuf, attempts: Vec<Attempt>) -> Self {
        Self {
            path,
            resolution: Resolution::Exhausted,
            attempts,
        }
    }
}

/// Matches file stems that are already the output of a rotation.
static ROTATED_STEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-rot(?:ated|\d+)$").expect("failed to compile regex")
});

/// Is this file already a rotated intermediate, e.g. `scan-rotated.pdf` or
/// `scan-rot2.pdf`?
pub fn is_rotated_intermediate(path: &Path) -> bool {
    path.file_stem()
        .map(|stem| ROTATED_STEM.is_match(&stem.to_string_lossy()))
        .unwrap_or(false)
}

/// Build a sibling of `path` named `<stem><suffix>.pdf`.
fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}{suffix}.pdf"))
}

/// The rotated and OCRed paths for attempt `number`.
fn attempt_paths(current: &Path, number: usize) -> (PathBuf, PathBuf) {
    (
        sibling_with_suffix(current, &format!("-rot{number}")),
        sibling_with_suffix(current, &format!("-rot{number}-ocr")),
    )
}

/// The rotate-OCR-check state machine.
pub struct Controller {
    inspector: Arc<dyn Inspector>,
    rotation: RotationApplier,
    ocr: Arc<dyn OcrEngine>,
    max_attempts: usize,
}

impl Controller {
    /// Create a controller from its parts.
    pub fn new(
        inspector: Arc<dyn Inspector>,
        rotation: RotationApplier,
        ocr: Arc<dyn OcrEngine>,
        max_attempts: usize,
    ) -> Self {
        Self {
            inspector,
            rotation,
            ocr,
            max_attempts,
        }
    }

    /// Create a controller using the real external tools.
    pub fn from_opts(opts: &SearchableOpts) -> Self {
        let inspector: Arc<dyn Inspector> = Arc::new(PdfInspector::new(
            opts.min_text_per_page,
            opts.osd_hint,
            opts.tools.clone(),
        ));
        let rotators = opts
            .tools
            .rotation_tools
            .iter()
            .map(|kind| kind.build(&opts.tools))
            .collect();
        let rotation = RotationApplier::new(rotators, inspector.clone());
        let ocr = Arc::new(OcrMyPdfEngine::new(opts.tools.ocr_timeout()));
        Self::new(inspector, rotation, ocr, opts.max_attempts)
    }

    /// Does this PDF have text, the right way up?
    async fn passes_checks(&self, path: &Path) -> bool {
        self.inspector.has_text(path).await && self.inspector.orientation_ok(path).await
    }

    /// Make `path` searchable and correctly oriented, if we can.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn make_searchable(&self, path: &Path) -> Outcome {
        if is_rotated_intermediate(path) {
            return self.ocr_rotated_intermediate(path).await;
        }

        if self.passes_checks(path).await {
            info!("PDF already has correctly oriented text");
            return Outcome::accepted(path.to_owned(), vec![]);
        }

        let original = path.to_owned();
        let mut current = original.clone();
        let mut attempts = Vec::with_capacity(self.max_attempts);
        for number in 1..=self.max_attempts {
            let hint = self.inspector.suggested_rotation(&current).await;
            let (rotated, ocr_output) = attempt_paths(&current, number);

            let Some(AppliedRotation { angle, tool }) = self
                .rotation
                .apply_first(&current, &Angle::candidates(hint), &rotated)
                .await
            else {
                warn!(attempt = number, "No rotation tool succeeded at any angle");
                attempts.push(Attempt {
                    number,
                    angle: None,
                    tool: None,
                    output: None,
                    result: AttemptResult::RotationFailed,
                });
                continue;
            };

            let ocr_result = self.ocr.ocr(&rotated, &ocr_output).await;
            remove_if_exists(&rotated);

            let mut attempt = Attempt {
                number,
                angle: Some(angle),
                tool: Some(tool),
                output: None,
                result: AttemptResult::OcrFailed,
            };
            if let Err(err) = ocr_result {
                warn!(attempt = number, "OCR failed: {:?}", err);
                remove_if_exists(&ocr_output);
            } else if !self.inspector.is_valid_pdf(&ocr_output).await {
                warn!(attempt = number, "OCR produced an invalid PDF");
                remove_if_exists(&ocr_output);
            } else if self.passes_checks(&ocr_output).await {
                info!(attempt = number, %angle, output = %ocr_output.display(), "Accepted OCR output");
                if current != original {
                    remove_if_exists(&current);
                }
                remove_if_exists(&original);
                attempt.output = Some(ocr_output.clone());
                attempt.result = AttemptResult::Accepted;
                attempts.push(attempt);
                return Outcome::accepted(ocr_output, attempts);
            } else {
                info!(attempt = number, %angle, "OCR output failed checks, keeping it as the working file");
                if current != original {
                    remove_if_exists(&current);
                }
                current = ocr_output.clone();
                attempt.output = Some(ocr_output);
                attempt.result = AttemptResult::Rejected;
            }
            attempts.push(attempt);
        }

        warn!(
            attempts = self.max_attempts,
            path = %current.display(),
            "Could not produce a correctly oriented PDF"
        );
        // The promoted OCR output supersedes the original, so only one of
        // them may stay on disk.
        if current != original {
            remove_if_exists(&original);
        }
        Outcome::exhausted(current, attempts)
    }

    /// Something already rotated this file, so it only needs OCR.
    async fn ocr_rotated_intermediate(&self, path: &Path) -> Outcome {
        let output = sibling_with_suffix(path, "-ocr");
        let mut attempt = Attempt {
            number: 1,
            angle: None,
            tool: None,
            output: None,
            result: AttemptResult::OcrFailed,
        };
        if let Err(err) = self.ocr.ocr(path, &output).await {
            warn!("OCR of rotated PDF failed: {:?}", err);
        } else if !self.inspector.is_valid_pdf(&output).await {
            warn!("OCR of rotated PDF produced an invalid PDF");
        } else if self.passes_checks(&output).await {
            info!(output = %output.display(), "Accepted OCR of rotated PDF");
            remove_if_exists(path);
            attempt.output = Some(output.clone());
            attempt.result = AttemptResult::Accepted;
            return Outcome::accepted(output, vec![attempt]);
        } else {
            info!("OCR of rotated PDF failed checks");
            attempt.result = AttemptResult::Rejected;
        }
        remove_if_exists(&output);
        Outcome::exhausted(path.to_owned(), vec![attempt])
    }
}
