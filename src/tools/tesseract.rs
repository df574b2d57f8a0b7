//! The `tesseract` CLI, used only for orientation checks. Full-document OCR
//! goes through `ocrmypdf`.

use std::{sync::LazyLock, time::Duration};

use regex::Regex;
use tokio::process::Command;

use crate::prelude::*;

use super::{run_tool, run_tool_checked};

/// Matches the orientation line of `tesseract --psm 0` output.
static ORIENTATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Orientation in degrees:\s*(\d+)")
        .expect("failed to compile regex")
});

/// Recognize the text in an image with the given page segmentation mode.
///
/// The exit status is ignored: tesseract often exits non-zero on pages it
/// finds hard, but whatever it printed is still useful as a signal.
#[instrument(level = "debug", skip_all, fields(image = %image.display(), psm))]
pub async fn recognize(
    image: &Path,
    psm: u8,
    lang: &str,
    timeout: Duration,
) -> Result<String> {
    let mut cmd = Command::new("tesseract");
    cmd.arg(image)
        .arg("stdout")
        .arg("--psm")
        .arg(psm.to_string())
        .arg("-l")
        .arg(lang);
    let output = run_tool("tesseract", &mut cmd, timeout).await?;
    if !output.status.success() {
        debug!(
            stderr = %String::from_utf8_lossy(&output.stderr),
            "tesseract exited unsuccessfully, using its output anyway"
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Ask tesseract's orientation and script detection which way the page is
/// turned. Returns the reported angle in degrees.
#[instrument(level = "debug", skip_all, fields(image = %image.display()))]
pub async fn detect_orientation(image: &Path, timeout: Duration) -> Result<u32> {
    let mut cmd = Command::new("tesseract");
    cmd.arg(image).arg("stdout").arg("--psm").arg("0");
    let output = run_tool_checked("tesseract", &mut cmd, timeout).await?;

    // Diagnostics land on stderr on most builds, but some versions print
    // them to stdout.
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_orientation(&stderr)
        .or_else(|| parse_orientation(&stdout))
        .ok_or_else(|| anyhow!("tesseract did not report an orientation"))
}

/// Parse `Orientation in degrees: N` out of tesseract's OSD output.
pub fn parse_orientation(output: &str) -> Option<u32> {
    ORIENTATION_REGEX
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_osd_output() {
        let output = "\
Page number: 0
Orientation in degrees: 270
Rotate: 90
Orientation confidence: 7.62
Script: Latin
Script confidence: 3.33
";
        assert_eq!(parse_orientation(output), Some(270));
    }

    #[test]
    fn ignores_output_without_orientation() {
        assert_eq!(parse_orientation("Too few characters. Skipping this page"), None);
        assert_eq!(parse_orientation("Orientation in degrees: ???"), None);
    }
}
