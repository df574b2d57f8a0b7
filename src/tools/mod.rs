//! Wrappers around the external command-line tools we shell out to.
//!
//! Every external process goes through [`run_tool`], which enforces a timeout
//! and kills the child if we stop waiting for it. A hung `ocrmypdf` would
//! otherwise hang the whole batch.

use std::{process::Stdio, time::Duration};

use clap::Args;
use tokio::{process::Command, time};

use crate::prelude::*;

use self::rotate::RotationToolKind;

pub mod ocrmypdf;
pub mod poppler;
pub mod rotate;
pub mod tesseract;

/// Options shared by all external tool invocations.
#[derive(Args, Clone, Debug)]
pub struct ToolOpts {
    /// Resolution used when rasterizing a page for orientation checks.
    #[clap(long, default_value = "150")]
    pub dpi: u32,

    /// Tesseract language used for orientation checks.
    #[clap(long, default_value = "eng")]
    pub lang: String,

    /// Timeout, in seconds, for quick tools like `pdftotext`, `pdftk` and
    /// `tesseract`.
    #[clap(long, default_value = "120")]
    pub tool_timeout: u64,

    /// Timeout, in seconds, for a full-document `ocrmypdf` run.
    #[clap(long, default_value = "1800")]
    pub ocr_timeout: u64,

    /// Rotation tools to try, in order.
    #[clap(
        long,
        value_enum,
        value_delimiter = ',',
        default_value = "pdftk,qpdf,ocrmypdf"
    )]
    pub rotation_tools: Vec<RotationToolKind>,
}

impl ToolOpts {
    /// Timeout for quick tools.
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout)
    }

    /// Timeout for full-document OCR.
    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout)
    }
}

impl Default for ToolOpts {
    fn default() -> Self {
        Self {
            dpi: 150,
            lang: "eng".to_owned(),
            tool_timeout: 120,
            ocr_timeout: 1800,
            rotation_tools: RotationToolKind::default_chain(),
        }
    }
}

/// Run an external command, waiting at most `timeout` for it to finish.
///
/// A timeout is reported as an ordinary error, so callers can treat it like
/// any other tool failure. The exit status is *not* checked here; see
/// [`check_for_command_failure`].
#[instrument(level = "trace", skip(cmd))]
pub async fn run_tool(
    command_name: &str,
    cmd: &mut Command,
    timeout: Duration,
) -> Result<std::process::Output> {
    cmd.kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    trace!(command_name, ?cmd, "Running command");
    time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            anyhow!("{} timed out after {}s", command_name, timeout.as_secs())
        })?
        .with_context(|| format!("cannot run {}", command_name))
}

/// Run an external command and fail unless it exits successfully.
pub async fn run_tool_checked(
    command_name: &str,
    cmd: &mut Command,
    timeout: Duration,
) -> Result<std::process::Output> {
    let output = run_tool(command_name, cmd, timeout).await?;
    check_for_command_failure(command_name, &output)?;
    Ok(output)
}

/// Report any command failures, and include any error output.
///
/// Standard output is logged at debug level. Standard error is logged at
/// debug level on success, and as a warning on failure.
pub fn check_for_command_failure(
    command_name: &str,
    output: &std::process::Output,
) -> Result<()> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(
        command_name = command_name,
        output = %stdout,
        "Standard output from command"
    );

    if output.status.success() {
        debug!(
            command_name = command_name,
            output = %stderr,
            "Standard error from command",
        );
        Ok(())
    } else if let Some(exit_code) = output.status.code() {
        warn!(
            command_name = command_name,
            exit_code,
            output = %stderr,
            "Command failed",
        );
        Err(anyhow!(
            "{} failed with exit code {} and error output:\n{}",
            command_name,
            exit_code,
            stderr,
        ))
    } else {
        warn!(
            command_name = command_name,
            output = %stderr,
            "Command was terminated by a signal",
        );
        Err(anyhow!(
            "{} failed with error output:\n{}",
            command_name,
            stderr,
        ))
    }
}
