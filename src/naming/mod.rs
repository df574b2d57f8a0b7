//! Choosing descriptive file names for documents.

use std::{
    sync::{Arc, LazyLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use clap::Args;
use regex::Regex;

use crate::{prelude::*, tools::poppler};

use self::{cache::NameCache, openai::OpenAiSuggester};

pub mod cache;
pub mod openai;

/// Longest name we'll produce, in characters.
const MAX_NAME_LEN: usize = 100;

/// How much document text we send to the model, in characters.
const MAX_PROMPT_TEXT_LEN: usize = 8000;

/// Default cache file name, placed in the processed directory. The leading dot
/// keeps the batch processor from treating it as a document.
pub const DEFAULT_CACHE_FILE_NAME: &str = ".name_cache.json";

/// Options for AI name suggestions.
#[derive(Args, Clone, Debug)]
pub struct NamingOpts {
    /// The model to ask for names.
    #[clap(long, default_value = "gpt-4o-mini")]
    pub model: String,

    /// An upper limit on the number of completion tokens to generate.
    #[clap(long, default_value = "50")]
    pub max_completion_tokens: u32,

    /// The temperature to use for sampling, between 0.0 and 2.0.
    #[clap(long, default_value = "0.7")]
    pub temperature: f32,

    /// A timeout, in seconds, for each naming request.
    #[clap(long, default_value = "60")]
    pub timeout: u64,
}

impl NamingOpts {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for NamingOpts {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_owned(),
            max_completion_tokens: 50,
            temperature: 0.7,
            timeout: 60,
        }
    }
}

/// Interface for anything that can suggest a name for some document text.
#[async_trait]
pub trait NameSuggester: Send + Sync + 'static {
    /// Suggest a file name (without extension) for a document containing
    /// `text`.
    async fn suggest_name(&self, text: &str) -> Result<String>;
}

static DISALLOWED_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_]+").expect("failed to compile regex"));

/// Reduce a suggested name to `[A-Za-z0-9_]`, collapsing runs of anything else
/// into a single `_`.
pub fn sanitize_name(name: &str) -> String {
    let name = name.trim();
    // Models like to add a file extension anyway.
    let name = name.strip_suffix(".pdf").unwrap_or(name);
    let replaced = DISALLOWED_RUN.replace_all(name, "_");
    let trimmed = replaced.trim_matches('_');
    trimmed.chars().take(MAX_NAME_LEN).collect::<String>()
}

/// A timestamp-based name for when we have nothing better.
pub fn fallback_name() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    format!("file_{secs}")
}

/// Truncate `text` to at most `max` characters.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Names files by content, with a cache keyed by content hash.
pub struct Namer {
    suggester: Arc<dyn NameSuggester>,
    cache: NameCache,
    tool_timeout: Duration,
}

impl Namer {
    /// Create a namer from its parts.
    pub fn new(
        suggester: Arc<dyn NameSuggester>,
        cache: NameCache,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            suggester,
            cache,
            tool_timeout,
        }
    }

    /// Create a namer using the OpenAI API, with an optional on-disk cache.
    pub fn from_opts(
        opts: &NamingOpts,
        cache_path: Option<&Path>,
        tool_timeout: Duration,
    ) -> Result<Self> {
        let cache = match cache_path {
            Some(path) => NameCache::load(path)?,
            None => NameCache::in_memory(),
        };
        Ok(Self::new(
            Arc::new(OpenAiSuggester::new(opts.clone())),
            cache,
            tool_timeout,
        ))
    }

    /// Choose a name (without extension) for the PDF at `path`.
    ///
    /// Only failing to read the file is an error. If we can't get a name out
    /// of the text, we fall back to [`fallback_name`], which isn't cached.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn name_file(&mut self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("cannot read {:?}", path.display()))?;
        let digest = format!("{:x}", md5::compute(&bytes));
        if let Some(name) = self.cache.get(&digest) {
            info!(%name, "Using cached name");
            return Ok(name.to_owned());
        }

        let text = match poppler::extract_text(path, None, None, self.tool_timeout).await {
            Ok(text) => text,
            Err(err) => {
                warn!("Could not extract text for naming: {:?}", err);
                String::new()
            }
        };
        let Some(name) = self.name_from_text(&text).await else {
            let name = fallback_name();
            info!(%name, "Using fallback name");
            return Ok(name);
        };

        if let Err(err) = self.cache.insert(digest, name.clone()) {
            warn!("Could not update name cache: {:?}", err);
        }
        info!(%name, "Generated name");
        Ok(name)
    }

    /// Ask the suggester for a sanitized name for `text`. Returns `None` if
    /// there's no text, the suggester fails, or nothing survives sanitizing.
    pub async fn name_from_text(&self, text: &str) -> Option<String> {
        let text = truncate_chars(text.trim(), MAX_PROMPT_TEXT_LEN);
        if text.is_empty() {
            debug!("No text to name from");
            return None;
        }
        match self.suggester.suggest_name(text).await {
            Ok(raw) => Some(sanitize_name(&raw)).filter(|name| !name.is_empty()),
            Err(err) => {
                warn!("Name suggestion failed: {:?}", err);
                None
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        fs,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::pdf::fixtures::write_text_pdf;

    /// A suggester that returns a fixed answer and counts calls.
    pub struct FakeSuggester {
        pub answer: Result<String, String>,
        pub calls: AtomicUsize,
    }

    impl FakeSuggester {
        pub fn answering(answer: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: Ok(answer.to_owned()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl NameSuggester for FakeSuggester {
        async fn suggest_name(&self, _text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone().map_err(|err| anyhow!(err))
        }
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_name("Electric Bill - March 2024"), "Electric_Bill_March_2024");
        assert_eq!(sanitize_name("  \"Tax_Return\".pdf "), "Tax_Return");
        assert_eq!(sanitize_name("café/menu"), "caf_menu");
        assert_eq!(sanitize_name("!!!"), "");
        assert_eq!(sanitize_name(&"a".repeat(150)).len(), MAX_NAME_LEN);
    }

    #[test]
    fn fallback_names_are_timestamps() {
        let name = fallback_name();
        let secs = name.strip_prefix("file_").expect("should have prefix");
        assert!(secs.parse::<u64>().is_ok());
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[tokio::test]
    async fn name_from_text_handles_failures() {
        let failing = Arc::new(FakeSuggester {
            answer: Err("API down".to_owned()),
            calls: AtomicUsize::new(0),
        });
        let namer = Namer::new(failing, NameCache::in_memory(), Duration::from_secs(5));
        assert_eq!(namer.name_from_text("some text").await, None);
        assert_eq!(namer.name_from_text("   ").await, None);

        let junk = FakeSuggester::answering("???");
        let namer = Namer::new(junk, NameCache::in_memory(), Duration::from_secs(5));
        assert_eq!(namer.name_from_text("some text").await, None);
    }

    #[tokio::test]
    async fn unreadable_text_gets_an_uncached_fallback() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("blank.pdf");
        write_text_pdf(&path, &[""])?;
        let cache_path = dir.path().join("cache.json");

        let suggester = FakeSuggester::answering("Never_Used");
        let mut namer = Namer::new(
            suggester.clone(),
            NameCache::load(&cache_path)?,
            Duration::from_secs(30),
        );
        let name = namer.name_file(&path).await?;
        assert!(name.starts_with("file_"));
        assert_eq!(suggester.calls.load(Ordering::SeqCst), 0);
        assert!(!cache_path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn cached_names_skip_the_suggester() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("doc.pdf");
        fs::write(&path, b"same bytes")?;
        let cache_path = dir.path().join("cache.json");
        let digest = format!("{:x}", md5::compute(b"same bytes"));
        NameCache::load(&cache_path)?.insert(digest, "Known_Name".to_owned())?;

        let suggester = FakeSuggester::answering("Other");
        let mut namer = Namer::new(
            suggester.clone(),
            NameCache::load(&cache_path)?,
            Duration::from_secs(30),
        );
        assert_eq!(namer.name_file(&path).await?, "Known_Name");
        assert_eq!(suggester.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn names_are_written_through_to_the_cache() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("doc.pdf");
        write_text_pdf(&path, &["Water bill for the month of June"])?;
        let cache_path = dir.path().join("cache.json");

        let suggester = FakeSuggester::answering("Water Bill June");
        let mut namer = Namer::new(
            suggester.clone(),
            NameCache::load(&cache_path)?,
            Duration::from_secs(30),
        );
        assert_eq!(namer.name_file(&path).await?, "Water_Bill_June");
        assert_eq!(namer.name_file(&path).await?, "Water_Bill_June");
        assert_eq!(suggester.calls.load(Ordering::SeqCst), 1);
        assert!(fs::read_to_string(&cache_path)?.contains("Water_Bill_June"));
        Ok(())
    }
}
