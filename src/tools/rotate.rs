//! PDF rotation tools.
//!
//! All of these do the same job with different failure modes, so we keep them
//! behind one [`Rotator`] interface and try them in order.

use std::{fmt, sync::Arc, time::Duration};

use clap::ValueEnum;
use tokio::process::Command;

use crate::prelude::*;

use super::{ToolOpts, run_tool_checked};

/// A clockwise quarter-turn multiple we can rotate a document by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Angle {
    Deg90,
    Deg180,
    Deg270,
}

impl Angle {
    /// The order in which candidate angles are tried.
    pub const ALL: [Angle; 3] = [Angle::Deg90, Angle::Deg180, Angle::Deg270];

    /// The angle in degrees.
    pub fn degrees(self) -> u32 {
        match self {
            Angle::Deg90 => 90,
            Angle::Deg180 => 180,
            Angle::Deg270 => 270,
        }
    }

    /// Map a number of degrees to an angle. Zero and anything that isn't a
    /// quarter turn map to `None`.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            90 => Some(Angle::Deg90),
            180 => Some(Angle::Deg180),
            270 => Some(Angle::Deg270),
            _ => None,
        }
    }

    /// `pdftk`'s compass-style name for this rotation.
    pub fn pdftk_direction(self) -> &'static str {
        match self {
            Angle::Deg90 => "east",
            Angle::Deg180 => "south",
            Angle::Deg270 => "west",
        }
    }

    /// Candidate angles, with `hint` (if any) moved to the front.
    pub fn candidates(hint: Option<Angle>) -> Vec<Angle> {
        let mut angles = Self::ALL.to_vec();
        if let Some(hint) = hint {
            angles.retain(|&angle| angle != hint);
            angles.insert(0, hint);
        }
        angles
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Interface for anything that can write a rotated copy of a PDF.
#[async_trait]
pub trait Rotator: Send + Sync + 'static {
    /// A short name for logs.
    fn name(&self) -> &str;

    /// Write a copy of `input` rotated by `angle` to `output`.
    async fn rotate(&self, input: &Path, angle: Angle, output: &Path) -> Result<()>;
}

/// The rotation tools we know how to drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum RotationToolKind {
    Pdftk,
    Qpdf,
    Ocrmypdf,
}

impl RotationToolKind {
    /// The default fallback chain.
    pub fn default_chain() -> Vec<Self> {
        vec![Self::Pdftk, Self::Qpdf, Self::Ocrmypdf]
    }

    /// Instantiate the tool.
    pub fn build(self, opts: &ToolOpts) -> Arc<dyn Rotator> {
        let timeout = opts.tool_timeout();
        match self {
            Self::Pdftk => Arc::new(PdftkRotator { timeout }),
            Self::Qpdf => Arc::new(QpdfRotator { timeout }),
            // ocrmypdf rasterizes every page, so give it the OCR budget.
            Self::Ocrmypdf => Arc::new(OcrMyPdfRotator {
                timeout: opts.ocr_timeout(),
            }),
        }
    }
}

/// Rotation with `pdftk ... cat 1-endeast output ...`.
pub struct PdftkRotator {
    timeout: Duration,
}

#[async_trait]
impl Rotator for PdftkRotator {
    fn name(&self) -> &str {
        "pdftk"
    }

    async fn rotate(&self, input: &Path, angle: Angle, output: &Path) -> Result<()> {
        let mut cmd = Command::new("pdftk");
        cmd.arg(input)
            .arg("cat")
            .arg(format!("1-end{}", angle.pdftk_direction()))
            .arg("output")
            .arg(output);
        run_tool_checked("pdftk", &mut cmd, self.timeout).await?;
        Ok(())
    }
}

/// Rotation with `qpdf --rotate=+N`.
pub struct QpdfRotator {
    timeout: Duration,
}

#[async_trait]
impl Rotator for QpdfRotator {
    fn name(&self) -> &str {
        "qpdf"
    }

    async fn rotate(&self, input: &Path, angle: Angle, output: &Path) -> Result<()> {
        let mut cmd = Command::new("qpdf");
        cmd.arg(format!("--rotate=+{}", angle.degrees()))
            .arg(input)
            .arg(output);
        run_tool_checked("qpdf", &mut cmd, self.timeout).await?;
        Ok(())
    }
}

/// Last resort: let `ocrmypdf` pick the rotation itself, without OCRing.
/// The requested angle is ignored.
pub struct OcrMyPdfRotator {
    timeout: Duration,
}

#[async_trait]
impl Rotator for OcrMyPdfRotator {
    fn name(&self) -> &str {
        "ocrmypdf"
    }

    async fn rotate(&self, input: &Path, angle: Angle, output: &Path) -> Result<()> {
        debug!(%angle, "ocrmypdf chooses its own rotation");
        let mut cmd = Command::new("ocrmypdf");
        cmd.arg("--rotate-pages")
            .arg("--skip-text")
            .arg("--jobs")
            .arg("1")
            .arg(input)
            .arg(output);
        run_tool_checked("ocrmypdf", &mut cmd, self.timeout).await?;
        Ok(())
    }
}
