//! Full-document OCR with `ocrmypdf`.

use std::{ffi::OsString, time::Duration};

use tokio::process::Command;

use crate::{fs_utils::copy_modified_time, prelude::*, searchable::OcrEngine};

use super::run_tool_checked;

/// OCR engine wrapping the `ocrmypdf` CLI tool.
///
/// Runs with `--deskew --force-ocr --jobs 1`. There's no retry here; retrying
/// is the controller's job.
#[non_exhaustive]
pub struct OcrMyPdfEngine {
    program: OsString,
    timeout: Duration,
}

impl OcrMyPdfEngine {
    /// Create a new `ocrmypdf` engine.
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("ocrmypdf", timeout)
    }

    /// Run `program` in place of `ocrmypdf` from `PATH`.
    pub fn with_program(program: impl Into<OsString>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl OcrEngine for OcrMyPdfEngine {
    #[instrument(level = "debug", skip_all, fields(input = %input.display()))]
    async fn ocr(&self, input: &Path, output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--deskew")
            .arg("--force-ocr")
            .arg("--jobs")
            .arg("1")
            .arg("--output-type")
            .arg("pdf")
            .arg("--skip-big")
            .arg("0")
            .arg(input)
            .arg(output);
        run_tool_checked("ocrmypdf", &mut cmd, self.timeout).await?;

        if !output.exists() {
            return Err(anyhow!(
                "ocrmypdf exited successfully but did not write {:?}",
                output.display()
            ));
        }
        copy_modified_time(input, output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{
        fs,
        os::unix::fs::PermissionsExt as _,
        time::{Duration, SystemTime},
    };

    use super::*;

    /// Write an executable shell script standing in for `ocrmypdf`.
    fn stub(dir: &Path, body: &str) -> Result<PathBuf> {
        let path = dir.join("ocrmypdf-stub");
        fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    fn engine(program: PathBuf) -> OcrMyPdfEngine {
        OcrMyPdfEngine::with_program(program, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn copies_modified_time_to_output() -> Result<()> {
        let dir = tempfile::tempdir()?;
        // The output path is the last argument.
        let program = stub(dir.path(), r#"for last; do :; done; echo PDF > "$last""#)?;
        let input = dir.path().join("scan.pdf");
        let output = dir.path().join("scan-ocr.pdf");
        fs::write(&input, "PDF")?;
        let old = SystemTime::now() - Duration::from_secs(30 * 24 * 60 * 60);
        fs::File::options().write(true).open(&input)?.set_modified(old)?;

        engine(program).ocr(&input, &output).await?;
        assert_eq!(fs::read_to_string(&output)?, "PDF\n");
        assert_eq!(fs::metadata(&output)?.modified()?, old);
        Ok(())
    }

    #[tokio::test]
    async fn missing_output_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let program = stub(dir.path(), "exit 0")?;
        let input = dir.path().join("scan.pdf");
        fs::write(&input, "PDF")?;

        let err = engine(program)
            .ocr(&input, &dir.path().join("scan-ocr.pdf"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not write"), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let program = stub(dir.path(), "echo 'PriorOcrFoundError' >&2; exit 6")?;
        let input = dir.path().join("scan.pdf");
        fs::write(&input, "PDF")?;

        let result = engine(program)
            .ocr(&input, &dir.path().join("scan-ocr.pdf"))
            .await;
        assert!(result.is_err());
        Ok(())
    }
}
