//! State for interactively reviewing and renaming documents.

use std::{fs, time::SystemTime};

use chrono::{DateTime, Utc};

use crate::prelude::*;

/// Default number of words in the text-based name suggestion.
pub const HEAD_WORDS: usize = 14;

/// An ordered list of documents with a cursor.
#[derive(Debug)]
pub struct Session {
    documents: Vec<PathBuf>,
    cursor: usize,
}

#[allow(clippy::len_without_is_empty)]
impl Session {
    /// Create a session over the given documents, which must not be empty.
    pub fn new(documents: Vec<PathBuf>) -> Result<Self> {
        if documents.is_empty() {
            return Err(anyhow!("no PDF documents to review"));
        }
        Ok(Self {
            documents,
            cursor: 0,
        })
    }

    /// Create a session over every PDF in `folders`, recursively, sorted.
    pub fn from_folders(folders: &[PathBuf]) -> Result<Self> {
        let mut documents = vec![];
        for folder in folders {
            collect_pdfs(folder, &mut documents)?;
        }
        documents.sort();
        documents.dedup();
        Self::new(documents)
            .with_context(|| format!("no PDF documents found in {:?}", folders))
    }

    /// The document under the cursor.
    pub fn current(&self) -> &Path {
        &self.documents[self.cursor]
    }

    /// Move forward, stopping at the last document.
    pub fn next(&mut self) -> &Path {
        self.cursor = (self.cursor + 1).min(self.documents.len() - 1);
        self.current()
    }

    /// Move back, stopping at the first document.
    pub fn back(&mut self) -> &Path {
        self.cursor = self.cursor.saturating_sub(1);
        self.current()
    }

    /// Replace the current entry, e.g. after renaming or OCR.
    pub fn replace_current(&mut self, path: PathBuf) {
        self.documents[self.cursor] = path;
    }

    /// 1-based position of the cursor.
    pub fn position(&self) -> usize {
        self.cursor + 1
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }
}

fn collect_pdfs(dir: &Path, documents: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("cannot read directory {:?}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_pdfs(&path, documents)?;
        } else if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        {
            documents.push(path);
        }
    }
    Ok(())
}

/// The first `count` words of `text`, joined by `_`.
///
/// Whitespace-separated tokens that still contain a tab or newline are
/// skipped, as are empty ones.
pub fn head_in_snake_case(text: &str, count: usize) -> String {
    text.split(' ')
        .filter(|word| !word.is_empty() && !word.contains(['\t', '\n', '\r', '\u{c}']))
        .take(count)
        .collect::<Vec<_>>()
        .join("_")
}

/// Format a timestamp as a `_YYYY-MM-DDTHHMMSS` suffix, in UTC.
pub fn date_suffix(time: SystemTime) -> String {
    let time: DateTime<Utc> = time.into();
    time.format("_%Y-%m-%dT%H%M%S").to_string()
}

/// The date suffix for a file's modification time.
pub fn date_suffix_for(path: &Path) -> Result<String> {
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .with_context(|| format!("cannot read modification time of {:?}", path.display()))?;
    Ok(date_suffix(modified))
}

/// The name being edited in the "save as" field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveAs {
    pub name: String,
    date_suffix: String,
    with_date: bool,
}

impl SaveAs {
    /// Start editing with `name`. `date_suffix` is appended when toggled on.
    pub fn new(name: String, date_suffix: String) -> Self {
        Self {
            name,
            date_suffix,
            with_date: false,
        }
    }

    /// Add or remove the date suffix.
    pub fn toggle_date(&mut self) {
        self.with_date = !self.with_date;
    }

    /// The base name to save under, without extension.
    pub fn base_name(&self) -> String {
        if self.with_date {
            format!("{}{}", self.name, self.date_suffix)
        } else {
            self.name.clone()
        }
    }
}

/// A command typed at the review prompt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReviewCommand {
    Next,
    Back,
    /// Make the current document searchable.
    Ocr,
    /// Use suggestion N (1-based).
    Choose(usize),
    ToggleDate,
    /// Type a name directly.
    SetName(String),
    /// Save (rename) the current document.
    Write,
    Quit,
    Help,
}

impl ReviewCommand {
    /// Parse a line of input. Returns `None` for anything we don't recognize.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match (cmd, rest) {
            ("n", "") => Some(Self::Next),
            ("b", "") => Some(Self::Back),
            ("o", "") => Some(Self::Ocr),
            ("d", "") => Some(Self::ToggleDate),
            ("w", "") => Some(Self::Write),
            ("q", "") => Some(Self::Quit),
            ("?", "") => Some(Self::Help),
            ("s", name) if !name.is_empty() => Some(Self::SetName(name.to_owned())),
            (n, "") => match n.parse::<usize>() {
                Ok(n @ 1..=3) => Some(Self::Choose(n)),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Help text for the review prompt.
pub const REVIEW_HELP: &str = "\
Commands:
  n        next document
  b        previous document
  o        make the current document searchable
  1, 2, 3  use a suggested name
  s NAME   type a name
  d        toggle the date suffix
  w        save (rename) the current document
  q        quit
  ?        show this help";
