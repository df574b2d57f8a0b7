//! Apply a rotation with whichever tool in the chain manages it.

use std::sync::Arc;

use crate::{
    fs_utils::{copy_modified_time, remove_if_exists},
    prelude::*,
    tools::rotate::{Angle, Rotator},
};

use super::Inspector;

/// A rotation that produced a valid PDF.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedRotation {
    pub angle: Angle,
    pub tool: String,
}

/// An ordered chain of [`Rotator`]s. Each tool is tried in turn until one
/// writes a valid PDF.
pub struct RotationApplier {
    tools: Vec<Arc<dyn Rotator>>,
    inspector: Arc<dyn Inspector>,
}

impl RotationApplier {
    /// Create a new applier. `inspector` validates each tool's output.
    pub fn new(tools: Vec<Arc<dyn Rotator>>, inspector: Arc<dyn Inspector>) -> Self {
        Self { tools, inspector }
    }

    /// Rotate `input` by `angle` into `output`, returning the name of the tool
    /// that succeeded.
    ///
    /// On failure, `output` does not exist.
    #[instrument(level = "debug", skip_all, fields(input = %input.display(), %angle))]
    pub async fn apply(&self, input: &Path, angle: Angle, output: &Path) -> Result<String> {
        for tool in &self.tools {
            let name = tool.name();
            if let Err(err) = tool.rotate(input, angle, output).await {
                warn!(tool = name, %angle, "Rotation failed: {:?}", err);
                remove_if_exists(output);
                continue;
            }
            if !self.inspector.is_valid_pdf(output).await {
                warn!(tool = name, %angle, "Rotation produced an invalid PDF");
                remove_if_exists(output);
                continue;
            }
            if let Err(err) = copy_modified_time(input, output) {
                warn!(tool = name, "Could not preserve modification time: {:?}", err);
            }
            info!(tool = name, %angle, output = %output.display(), "Rotated PDF");
            return Ok(name.to_owned());
        }
        Err(anyhow!(
            "all {} rotation tools failed to rotate {:?} by {}",
            self.tools.len(),
            input.display(),
            angle,
        ))
    }

    /// Try each of `angles` in order, stopping at the first success.
    pub async fn apply_first(
        &self,
        input: &Path,
        angles: &[Angle],
        output: &Path,
    ) -> Option<AppliedRotation> {
        for &angle in angles {
            match self.apply(input, angle, output).await {
                Ok(tool) => return Some(AppliedRotation { angle, tool }),
                Err(err) => debug!("{:?}", err),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::searchable::tests::{FakeInspector, FakeRotator, RotatorBehavior};

    fn applier(tools: Vec<Arc<dyn Rotator>>) -> RotationApplier {
        RotationApplier::new(tools, Arc::new(FakeInspector::accepting("never")))
    }

    #[tokio::test]
    async fn falls_through_to_the_next_tool() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("scan.pdf");
        let output = dir.path().join("scan-rot1.pdf");
        fs::write(&input, "PDF page")?;

        let calls = Arc::new(AtomicUsize::new(0));
        let applier = applier(vec![
            FakeRotator::shared("broken", RotatorBehavior::FailAfterPartialWrite, &calls),
            FakeRotator::shared("mangler", RotatorBehavior::WriteGarbage, &calls),
            FakeRotator::shared("good", RotatorBehavior::Rotate, &calls),
        ]);
        let tool = applier.apply(&input, Angle::Deg180, &output).await?;

        assert_eq!(tool, "good");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(fs::read_to_string(&output)?, "PDF page rot180");
        Ok(())
    }

    #[tokio::test]
    async fn total_failure_leaves_no_output() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("scan.pdf");
        let output = dir.path().join("scan-rot1.pdf");
        fs::write(&input, "PDF page")?;

        let calls = Arc::new(AtomicUsize::new(0));
        let applier = applier(vec![
            FakeRotator::shared("a", RotatorBehavior::FailAfterPartialWrite, &calls),
            FakeRotator::shared("b", RotatorBehavior::WriteGarbage, &calls),
        ]);
        assert!(applier.apply(&input, Angle::Deg90, &output).await.is_err());
        assert!(!output.exists());

        let applied = applier.apply_first(&input, &Angle::ALL, &output).await;
        assert_eq!(applied, None);
        // Two tools times three angles, plus the first call.
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        Ok(())
    }

    #[tokio::test]
    async fn preserves_modification_time() -> Result<()> {
        use std::time::{Duration, SystemTime};

        let dir = tempfile::tempdir()?;
        let input = dir.path().join("scan.pdf");
        let output = dir.path().join("scan-rot1.pdf");
        fs::write(&input, "PDF page")?;
        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_500_000_000);
        fs::File::options().write(true).open(&input)?.set_modified(old)?;

        let calls = Arc::new(AtomicUsize::new(0));
        let applier = applier(vec![FakeRotator::shared(
            "good",
            RotatorBehavior::Rotate,
            &calls,
        )]);
        let applied = applier.apply_first(&input, &Angle::ALL, &output).await;
        assert_eq!(
            applied,
            Some(AppliedRotation {
                angle: Angle::Deg90,
                tool: "good".to_owned()
            })
        );
        assert_eq!(fs::metadata(&output)?.modified()?, old);
        Ok(())
    }
}
