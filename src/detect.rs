//! Heuristics for "does this PDF already have usable text?" and "is that text
//! the right way up?".
//!
//! Each strategy returns a [`Verdict`] instead of a boolean, and the callers
//! below decide how verdicts combine. Tool failures never escape this module:
//! they become [`Verdict::Indeterminate`] and the conservative answer wins.

use std::{collections::HashSet, fmt, time::Duration};

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    pdf,
    prelude::*,
    searchable::Inspector,
    tools::{
        ToolOpts,
        poppler::{self, non_whitespace_len},
        rotate::Angle,
        tesseract,
    },
};

/// Number of leading pages the structured text check looks at.
const STRUCTURED_CHECK_PAGES: usize = 5;

/// Last page `pdftotext` reads when scoring orientation.
const ORIENTATION_TEXT_LAST_PAGE: usize = 3;

/// With this much text and no common words, the text is probably sideways.
const SUBSTANTIAL_TEXT_LEN: usize = 500;

/// Below this much recognized text, there's too little signal to judge.
const MIN_RECOGNIZED_TEXT_LEN: usize = 50;

/// Tesseract page segmentation mode: fully automatic, without OSD.
const PSM_AUTO: u8 = 3;

/// Short English words that show up in almost any correctly-oriented text.
pub const COMMON_WORDS: [&str; 10] = [
    "the", "and", "for", "that", "with", "this", "from", "have", "are", "not",
];

/// The answer from a single detection strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Yes,
    No,
    /// The strategy failed or the evidence was too thin.
    Indeterminate,
}

impl Verdict {
    /// Log a strategy's result, mapping errors to [`Verdict::Indeterminate`].
    fn from_result(strategy: impl fmt::Display, result: Result<Verdict>) -> Verdict {
        match result {
            Ok(verdict) => {
                debug!(%strategy, ?verdict, "Detection strategy finished");
                verdict
            }
            Err(err) => {
                warn!(%strategy, "Detection strategy failed: {:?}", err);
                Verdict::Indeterminate
            }
        }
    }
}

/// How many distinct [`COMMON_WORDS`] appear as whole words in `text`?
pub fn count_common_words(text: &str) -> usize {
    let words = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<HashSet<_>>();
    COMMON_WORDS
        .iter()
        .filter(|&&word| words.contains(word))
        .count()
}

/// Score text pulled out of an existing text layer.
pub fn score_extracted_text(text: &str) -> Verdict {
    let text = text.trim();
    let words_found = count_common_words(text);
    let len = text.chars().count();
    debug!(words_found, len, "Scored extracted text");
    if words_found >= 2 {
        Verdict::Yes
    } else if len > SUBSTANTIAL_TEXT_LEN {
        Verdict::No
    } else {
        Verdict::Indeterminate
    }
}

/// Score text recognized from a freshly rendered page image.
pub fn score_recognized_text(text: &str) -> Verdict {
    let text = text.trim();
    let words_found = count_common_words(text);
    let len = text.chars().count();
    debug!(words_found, len, "Scored recognized text");
    if words_found > 1 || len < MIN_RECOGNIZED_TEXT_LEN {
        Verdict::Yes
    } else {
        Verdict::No
    }
}

/// The text-presence strategies, in the order we try them.
#[derive(Clone, Copy, Debug)]
enum TextStrategy {
    Structured,
    PdfToText,
    RawMarkers,
}

impl TextStrategy {
    const ALL: [TextStrategy; 3] = [
        TextStrategy::Structured,
        TextStrategy::PdfToText,
        TextStrategy::RawMarkers,
    ];
}

impl fmt::Display for TextStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextStrategy::Structured => write!(f, "structured extraction"),
            TextStrategy::PdfToText => write!(f, "pdftotext"),
            TextStrategy::RawMarkers => write!(f, "raw /Text scan"),
        }
    }
}

/// Decides whether a PDF already contains extracted text.
#[derive(Clone, Debug)]
pub struct TextDetector {
    min_text_per_page: usize,
    timeout: Duration,
}

impl TextDetector {
    /// Create a detector requiring `min_text_per_page` non-whitespace
    /// characters on some page.
    pub fn new(min_text_per_page: usize, timeout: Duration) -> Self {
        Self {
            min_text_per_page,
            timeout,
        }
    }

    /// Does this PDF have text? The first strategy that says yes wins. If none
    /// does, we assume OCR is needed.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn has_text(&self, path: &Path) -> bool {
        for strategy in TextStrategy::ALL {
            let verdict = Verdict::from_result(strategy, self.run(strategy, path).await);
            if verdict == Verdict::Yes {
                debug!(%strategy, "PDF already has text");
                return true;
            }
        }
        debug!("No text detection strategy found text, assuming PDF needs OCR");
        false
    }

    async fn run(&self, strategy: TextStrategy, path: &Path) -> Result<Verdict> {
        match strategy {
            TextStrategy::Structured => self.check_structured(path).await,
            TextStrategy::PdfToText => self.check_pdftotext(path).await,
            TextStrategy::RawMarkers => check_raw_markers(path).await,
        }
    }

    /// Parse the PDF ourselves and look at the first few pages.
    async fn check_structured(&self, path: &Path) -> Result<Verdict> {
        let owned_path = path.to_owned();
        let texts = spawn_blocking_propagating_panics(move || {
            pdf::page_texts(&owned_path, STRUCTURED_CHECK_PAGES)
        })
        .await??;
        Ok(self.any_page_has_text(&texts))
    }

    /// Verdict over a set of page texts.
    fn any_page_has_text(&self, texts: &[String]) -> Verdict {
        for (idx, text) in texts.iter().enumerate() {
            let len = non_whitespace_len(text);
            trace!(page = idx + 1, len, "Page text length");
            if len >= self.min_text_per_page {
                return Verdict::Yes;
            }
        }
        Verdict::No
    }

    /// Ask `pdftotext` about page 1.
    async fn check_pdftotext(&self, path: &Path) -> Result<Verdict> {
        let text = poppler::extract_text(path, Some(1), Some(1), self.timeout).await?;
        let len = non_whitespace_len(&text);
        debug!(len, "pdftotext extracted characters");
        Ok(if len >= self.min_text_per_page {
            Verdict::Yes
        } else {
            Verdict::No
        })
    }
}

/// Scan the raw bytes for text objects.
async fn check_raw_markers(path: &Path) -> Result<Verdict> {
    let owned_path = path.to_owned();
    let bytes = spawn_blocking_propagating_panics(move || pdf::read_bytes(&owned_path))
        .await??;
    Ok(if pdf::contains_text_marker(&bytes) {
        Verdict::Yes
    } else {
        Verdict::No
    })
}

/// Decides whether the text in a PDF is correctly oriented.
#[derive(Clone, Debug)]
pub struct OrientationChecker {
    detector: TextDetector,
    tools: ToolOpts,
}

impl OrientationChecker {
    /// Create a new orientation checker.
    pub fn new(detector: TextDetector, tools: ToolOpts) -> Self {
        Self { detector, tools }
    }

    /// Is the orientation acceptable? A PDF without text always needs OCR, so
    /// it never counts as acceptable.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn orientation_ok(&self, path: &Path) -> bool {
        if !self.detector.has_text(path).await {
            debug!("No text detected, OCR needed regardless of orientation");
            return false;
        }

        let verdict = match self.text_verdict(path).await {
            Verdict::Indeterminate => self.image_verdict(path).await,
            decisive => decisive,
        };
        match verdict {
            Verdict::Yes => true,
            Verdict::No => {
                info!(path = %path.display(), "Text appears to be misoriented");
                false
            }
            Verdict::Indeterminate => {
                debug!("Orientation check inconclusive, assuming PDF needs OCR");
                false
            }
        }
    }

    /// Score the existing text layer of the first few pages.
    async fn text_verdict(&self, path: &Path) -> Verdict {
        let result = poppler::extract_text(
            path,
            Some(1),
            Some(ORIENTATION_TEXT_LAST_PAGE),
            self.tools.tool_timeout(),
        )
        .await
        .map(|text| score_extracted_text(&text));
        Verdict::from_result("text orientation", result)
    }

    /// Render page 1 and see what tesseract makes of it.
    async fn image_verdict(&self, path: &Path) -> Verdict {
        let result = async {
            let tmpdir = tempfile::TempDir::with_prefix("orientation")?;
            let image = poppler::rasterize_page(
                path,
                1,
                self.tools.dpi,
                tmpdir.path(),
                self.tools.tool_timeout(),
            )
            .await?;
            let text = tesseract::recognize(
                &image,
                PSM_AUTO,
                &self.tools.lang,
                self.tools.tool_timeout(),
            )
            .await?;
            Ok::<_, anyhow::Error>(score_recognized_text(&text))
        }
        .await;
        Verdict::from_result("image orientation", result)
    }

    /// Ask tesseract's orientation detection which way page 1 is turned.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn detect_rotation(&self, path: &Path) -> Option<Angle> {
        let result = async {
            let tmpdir = tempfile::TempDir::with_prefix("osd")?;
            let image = poppler::rasterize_page(
                path,
                1,
                self.tools.dpi,
                tmpdir.path(),
                self.tools.tool_timeout(),
            )
            .await?;
            tesseract::detect_orientation(&image, self.tools.tool_timeout()).await
        }
        .await;
        match result {
            Ok(degrees) => {
                debug!(degrees, "Detected page orientation");
                Angle::from_degrees(degrees)
            }
            Err(err) => {
                warn!("Orientation detection failed: {:?}", err);
                None
            }
        }
    }
}

/// The production [`Inspector`], backed by `lopdf`, poppler and tesseract.
#[derive(Clone, Debug)]
pub struct PdfInspector {
    detector: TextDetector,
    orientation: OrientationChecker,
    osd_hint: bool,
}

impl PdfInspector {
    /// Create a new inspector.
    pub fn new(min_text_per_page: usize, osd_hint: bool, tools: ToolOpts) -> Self {
        let detector = TextDetector::new(min_text_per_page, tools.tool_timeout());
        let orientation = OrientationChecker::new(detector.clone(), tools);
        Self {
            detector,
            orientation,
            osd_hint,
        }
    }
}

#[async_trait]
impl Inspector for PdfInspector {
    async fn is_valid_pdf(&self, path: &Path) -> bool {
        let owned_path = path.to_owned();
        spawn_blocking_propagating_panics(move || pdf::is_valid_pdf(&owned_path))
            .await
            .unwrap_or(false)
    }

    async fn has_text(&self, path: &Path) -> bool {
        self.detector.has_text(path).await
    }

    async fn orientation_ok(&self, path: &Path) -> bool {
        self.orientation.orientation_ok(path).await
    }

    async fn suggested_rotation(&self, path: &Path) -> Option<Angle> {
        if self.osd_hint {
            self.orientation.detect_rotation(path).await
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::pdf::fixtures::write_text_pdf;

    const UPRIGHT: &str = "This is the invoice for services rendered and delivered with care.";

    fn detector() -> TextDetector {
        TextDetector::new(20, Duration::from_secs(30))
    }

    #[test]
    fn counts_whole_words_once() {
        assert_eq!(count_common_words("The cat and the dog"), 2);
        assert_eq!(count_common_words("THE AND FOR"), 3);
        // "other" and "band" contain dictionary words, but not as whole words.
        assert_eq!(count_common_words("other band fortune"), 0);
        assert_eq!(count_common_words("the,and;for"), 3);
        assert_eq!(count_common_words(""), 0);
    }

    #[test]
    fn extracted_text_scoring() {
        assert_eq!(score_extracted_text(UPRIGHT), Verdict::Yes);
        let sideways = "ʇxǝʇ ".repeat(200);
        assert_eq!(score_extracted_text(&sideways), Verdict::No);
        assert_eq!(score_extracted_text("ACME 2024"), Verdict::Indeterminate);
    }

    #[test]
    fn recognized_text_scoring() {
        assert_eq!(score_recognized_text(UPRIGHT), Verdict::Yes);
        assert_eq!(score_recognized_text("x"), Verdict::Yes);
        let gibberish = "lkjsd qwpeoi zmxnv ".repeat(10);
        assert_eq!(score_recognized_text(&gibberish), Verdict::No);
    }

    #[test]
    fn page_threshold_is_inclusive() {
        let detector = detector();
        let exactly = vec!["a".repeat(20)];
        let short = vec!["a b c".to_owned(), "a".repeat(19)];
        assert_eq!(detector.any_page_has_text(&exactly), Verdict::Yes);
        assert_eq!(detector.any_page_has_text(&short), Verdict::No);
        assert_eq!(detector.any_page_has_text(&[]), Verdict::No);
    }

    #[tokio::test]
    async fn detects_text_on_later_pages() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("text.pdf");
        write_text_pdf(&path, &["", "", "Quarterly statement for account 12345"])?;
        assert!(detector().has_text(&path).await);
        Ok(())
    }

    #[tokio::test]
    async fn blank_pdf_has_no_text() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("blank.pdf");
        write_text_pdf(&path, &["", ""])?;
        assert!(!detector().has_text(&path).await);
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_file_has_no_text() {
        assert!(!detector().has_text(Path::new("no/such/file.pdf")).await);
    }

    #[tokio::test]
    async fn raw_marker_scan_rescues_unparseable_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4 garbage << /ProcSet [/PDF /Text] >>")?;
        assert_eq!(check_raw_markers(&path).await?, Verdict::Yes);
        assert!(detector().has_text(&path).await);
        Ok(())
    }

    #[tokio::test]
    async fn blank_pdf_is_never_correctly_oriented() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("blank.pdf");
        write_text_pdf(&path, &[""])?;
        let checker = OrientationChecker::new(detector(), ToolOpts::default());
        assert!(!checker.orientation_ok(&path).await);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn upright_text_is_correctly_oriented() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("upright.pdf");
        write_text_pdf(&path, &[UPRIGHT])?;
        let checker = OrientationChecker::new(detector(), ToolOpts::default());
        assert!(checker.orientation_ok(&path).await);
        Ok(())
    }
}
