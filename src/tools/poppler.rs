//! `pdftotext` and `pdftoppm`, from `poppler-utils`.

use std::time::Duration;

use tokio::{fs, process::Command};

use crate::prelude::*;

use super::run_tool_checked;

/// Extract text from a range of pages using `pdftotext`. Page numbers are
/// 1-based and inclusive. `None` means "from the start" or "to the end".
#[instrument(level = "debug", skip_all, fields(path = %path.display(), ?first_page, ?last_page))]
pub async fn extract_text(
    path: &Path,
    first_page: Option<usize>,
    last_page: Option<usize>,
    timeout: Duration,
) -> Result<String> {
    let mut cmd = Command::new("pdftotext");
    if let Some(first_page) = first_page {
        cmd.arg("-f").arg(first_page.to_string());
    }
    if let Some(last_page) = last_page {
        cmd.arg("-l").arg(last_page.to_string());
    }
    cmd.arg(path).arg("-");
    let output = run_tool_checked("pdftotext", &mut cmd, timeout).await?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Render a single page to a PNG file in `out_dir` using `pdftoppm`, and
/// return the path of the image.
#[instrument(level = "debug", skip_all, fields(path = %path.display(), page, dpi))]
pub async fn rasterize_page(
    path: &Path,
    page: usize,
    dpi: u32,
    out_dir: &Path,
    timeout: Duration,
) -> Result<PathBuf> {
    let prefix = out_dir.join("page");
    let mut cmd = Command::new("pdftoppm");
    cmd.arg("-png")
        .arg("-f")
        .arg(page.to_string())
        .arg("-l")
        .arg(page.to_string())
        .arg("-r")
        .arg(dpi.to_string())
        .arg(path)
        .arg(&prefix);
    run_tool_checked("pdftoppm", &mut cmd, timeout).await?;

    // pdftoppm pads the page number depending on the page count, so we can't
    // predict the exact filename.
    let mut entries = fs::read_dir(out_dir).await.with_context(|| {
        format!("failed to read temporary directory {:?}", out_dir.display())
    })?;
    let mut images = vec![];
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if name.to_string_lossy().starts_with("page") {
            images.push(entry.path());
        }
    }
    images.sort();
    images
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("pdftoppm produced no image for {:?}", path.display()))
}

/// Count non-whitespace characters.
pub fn non_whitespace_len(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}
