//! Process every document in a scanner's output directory.
//!
//! Each file is converted to PDF if it's an image, made searchable, and
//! renamed after its contents. A lock file keeps two runs from working on the
//! same directory at once.

use std::{fs, io};

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    fs_utils::{copy_modified_time, make_world_read_write, remove_if_exists, unique_target},
    naming::Namer,
    pdf,
    prelude::*,
    searchable::{Controller, Resolution},
    ui::{ProgressConfig, Ui},
};

/// Name of the lock file created in the processed directory.
pub const LOCK_FILE_NAME: &str = "script.lock";

/// Exclusive claim on a directory, released on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Try to lock `dir`. Returns `None` if another run holds the lock.
    pub fn acquire(dir: &Path) -> Result<Option<LockFile>> {
        let path = dir.join(LOCK_FILE_NAME);
        match fs::File::options().write(true).create_new(true).open(&path) {
            Ok(_) => {
                debug!(path = %path.display(), "Acquired lock");
                Ok(Some(LockFile { path }))
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("cannot create lock file {:?}", path.display())),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        remove_if_exists(&self.path);
    }
}

/// Does `dir` contain a file like `Scan….pdf`?
pub fn has_trigger_file(dir: &Path, prefix: &str) -> Result<bool> {
    for entry in read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if entry.file_type()?.is_file() && name.starts_with(prefix) && name.ends_with(".pdf")
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Regular files in `dir` we should process, sorted by name. Hidden files and
/// lock files are skipped.
pub fn candidate_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    for entry in read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !entry.file_type()?.is_file() || name.starts_with('.') || name.ends_with(".lock") {
            trace!(%name, "Not a candidate");
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

fn read_dir(dir: &Path) -> Result<fs::ReadDir> {
    fs::read_dir(dir).with_context(|| format!("cannot read directory {:?}", dir.display()))
}

/// What sort of file is this, as far as we're concerned?
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Image,
    /// Anything else, with its MIME type if we could guess one.
    Other(String),
}

impl FileKind {
    fn from_mime_type(mime_type: &str) -> Self {
        match mime_type {
            "application/pdf" => FileKind::Pdf,
            "image/jpeg" | "image/png" => FileKind::Image,
            other => FileKind::Other(other.to_owned()),
        }
    }
}

/// Sniff the file's contents, falling back to its extension.
pub fn sniff_kind(path: &Path) -> Result<FileKind> {
    let sniffed = infer::get_from_path(path)
        .with_context(|| format!("cannot read {:?}", path.display()))?;
    if let Some(kind) = sniffed {
        return Ok(FileKind::from_mime_type(kind.mime_type()));
    }
    let guessed = mime_guess::from_path(path).first_raw().unwrap_or("unknown");
    Ok(FileKind::from_mime_type(guessed))
}

/// Convert a JPEG or PNG into a one-page PDF next to it, then delete the
/// image. Returns the new PDF's path.
pub async fn convert_image(image: &Path) -> Result<PathBuf> {
    let dir = image.parent().unwrap_or(Path::new("."));
    let stem = image
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_owned());
    let pdf_path = unique_target(dir, &stem, "pdf", image);

    let (owned_image, owned_pdf) = (image.to_owned(), pdf_path.clone());
    spawn_blocking_propagating_panics(move || pdf::image_to_pdf(&owned_image, &owned_pdf))
        .await??;
    if let Err(err) = copy_modified_time(image, &pdf_path) {
        warn!("Could not preserve modification time: {:?}", err);
    }
    tokio::fs::remove_file(image)
        .await
        .with_context(|| format!("cannot remove {:?}", image.display()))?;
    info!(pdf = %pdf_path.display(), "Converted image to PDF");
    Ok(pdf_path)
}

/// Rename `path` to `<name>.pdf` in the same directory, avoiding collisions.
pub async fn rename_within_dir(path: &Path, name: &str) -> Result<PathBuf> {
    if !is_plain_file_name(name) {
        return Err(anyhow!("{name:?} is not a plain file name"));
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let target = unique_target(dir, name, "pdf", path);
    if target == path {
        debug!(path = %path.display(), "Already named correctly");
        return Ok(target);
    }
    tokio::fs::rename(path, &target).await.with_context(|| {
        format!("cannot rename {:?} to {:?}", path.display(), target.display())
    })?;
    info!(from = %path.display(), to = %target.display(), "Renamed file");
    Ok(target)
}

/// Can `name` be used as a file name without leaving the directory?
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// What happened to a single file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileResult {
    Renamed(PathBuf),
    Skipped,
}

/// Counts for a completed run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub renamed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// How a run over a directory ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunStatus {
    AlreadyRunning,
    NotTriggered,
    Completed(BatchSummary),
}

/// Processes directories of scans, one file at a time.
pub struct BatchProcessor {
    controller: Controller,
    namer: Namer,
    ui: Ui,
    /// Only run if a file starts with this prefix. `None` always runs.
    trigger_prefix: Option<String>,
}

impl BatchProcessor {
    /// Create a new processor.
    pub fn new(
        controller: Controller,
        namer: Namer,
        ui: Ui,
        trigger_prefix: Option<String>,
    ) -> Self {
        Self {
            controller,
            namer,
            ui,
            trigger_prefix,
        }
    }

    /// Process every candidate file in `dir`.
    #[instrument(level = "info", skip_all, fields(dir = %dir.display()))]
    pub async fn run(&mut self, dir: &Path) -> Result<RunStatus> {
        let Some(_lock) = LockFile::acquire(dir)? else {
            info!(
                "Another run is already processing this directory, or {} was left behind",
                LOCK_FILE_NAME
            );
            return Ok(RunStatus::AlreadyRunning);
        };

        if let Some(prefix) = &self.trigger_prefix {
            if !has_trigger_file(dir, prefix)? {
                info!("No {}….pdf file found, doing nothing", prefix);
                return Ok(RunStatus::NotTriggered);
            }
        }

        let files = candidate_files(dir)?;
        let pb = self.ui.new_progress_bar(
            &ProgressConfig {
                emoji: "📄",
                msg: "Processing scans",
                done_msg: "Processed scans",
            },
            files.len() as u64,
        );
        let mut summary = BatchSummary::default();
        for path in &files {
            match self.process_file(path).await {
                Ok(FileResult::Renamed(_)) => summary.renamed += 1,
                Ok(FileResult::Skipped) => summary.skipped += 1,
                Err(err) => {
                    error!(path = %path.display(), "Failed to process file: {:?}", err);
                    summary.failed += 1;
                }
            }
            pb.inc(1);
        }
        pb.finish_using_style();
        info!(?summary, "Finished directory");
        Ok(RunStatus::Completed(summary))
    }

    /// Convert, OCR and rename a single file.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub async fn process_file(&mut self, path: &Path) -> Result<FileResult> {
        let pdf_path = match sniff_kind(path)? {
            FileKind::Pdf => path.to_owned(),
            FileKind::Image => convert_image(path).await?,
            FileKind::Other(mime_type) => {
                info!(%mime_type, "Skipping unsupported file");
                return Ok(FileResult::Skipped);
            }
        };

        let outcome = self.controller.make_searchable(&pdf_path).await;
        if outcome.resolution == Resolution::Exhausted {
            warn!(
                result = %outcome.path.display(),
                "Could not verify orientation, naming best effort"
            );
        }
        make_world_read_write(&outcome.path)?;
        let name = self.namer.name_file(&outcome.path).await?;
        let renamed = rename_within_dir(&outcome.path, &name).await?;
        Ok(FileResult::Renamed(renamed))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, atomic::AtomicUsize},
        time::Duration,
    };

    use image::{Rgb, RgbImage};

    use super::*;
    use crate::{
        naming::{cache::NameCache, tests::FakeSuggester},
        searchable::tests::{FakeInspector, FakeOcr, FakeRotator, RotatorBehavior},
        searchable::{Inspector, rotation::RotationApplier},
    };

    fn file_names(dir: &Path) -> Result<Vec<String>> {
        let mut names = fs::read_dir(dir)?
            .map(|entry| Ok(entry?.file_name().to_string_lossy().into_owned()))
            .collect::<Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    fn processor(trigger_prefix: Option<&str>) -> BatchProcessor {
        processor_accepting("upright", trigger_prefix)
    }

    /// A processor whose inspector only accepts files containing `marker`.
    fn processor_accepting(marker: &str, trigger_prefix: Option<&str>) -> BatchProcessor {
        let inspector: Arc<dyn Inspector> = Arc::new(FakeInspector::accepting(marker));
        let calls = Arc::new(AtomicUsize::new(0));
        let rotation = RotationApplier::new(
            vec![FakeRotator::shared("fake", RotatorBehavior::Rotate, &calls)],
            inspector.clone(),
        );
        let controller = Controller::new(inspector, rotation, Arc::new(FakeOcr::recognizing()), 4);
        let namer = Namer::new(
            FakeSuggester::answering("unused"),
            NameCache::in_memory(),
            Duration::from_secs(5),
        );
        BatchProcessor::new(
            controller,
            namer,
            Ui::init_for_tests(),
            trigger_prefix.map(str::to_owned),
        )
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let lock = LockFile::acquire(dir.path())?;
        assert!(lock.is_some());
        assert!(LockFile::acquire(dir.path())?.is_none());
        drop(lock);
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
        assert!(LockFile::acquire(dir.path())?.is_some());
        Ok(())
    }

    #[test]
    fn finds_trigger_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("Scanned.txt"), "")?;
        fs::create_dir(dir.path().join("Scan_dir.pdf"))?;
        assert!(!has_trigger_file(dir.path(), "Scan")?);
        fs::write(dir.path().join("Scan2024-01-01.pdf"), "")?;
        assert!(has_trigger_file(dir.path(), "Scan")?);
        Ok(())
    }

    #[test]
    fn lists_candidates_in_name_order() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["b.pdf", "a.jpg", ".hidden.pdf", "other.lock", "c.txt"] {
            fs::write(dir.path().join(name), "")?;
        }
        fs::create_dir(dir.path().join("subdir"))?;
        let names = candidate_files(dir.path())?
            .iter()
            .map(|path| path.file_name().unwrap_or_default().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(names, ["a.jpg", "b.pdf", "c.txt"]);
        Ok(())
    }

    #[test]
    fn sniffs_content_before_extension() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let disguised = dir.path().join("photo.pdf");
        RgbImage::new(4, 4).save_with_format(&disguised, image::ImageFormat::Png)?;
        assert_eq!(sniff_kind(&disguised)?, FileKind::Image);

        let notes = dir.path().join("notes.txt");
        fs::write(&notes, "hello")?;
        assert_eq!(sniff_kind(&notes)?, FileKind::Other("text/plain".to_owned()));

        let pdf = dir.path().join("fake.pdf");
        fs::write(&pdf, "not really")?;
        assert_eq!(sniff_kind(&pdf)?, FileKind::Pdf);
        Ok(())
    }

    #[tokio::test]
    async fn converts_images_and_removes_them() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("receipt.jpg");
        RgbImage::from_pixel(10, 20, Rgb([200, 200, 200])).save(&image)?;
        fs::write(dir.path().join("receipt.pdf"), "taken")?;

        let pdf_path = convert_image(&image).await?;
        assert_eq!(pdf_path, dir.path().join("receipt_2.pdf"));
        assert!(!image.exists());
        assert_eq!(pdf::page_count(&pdf_path)?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn renames_without_clobbering() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let first = dir.path().join("Scan1.pdf");
        let second = dir.path().join("Scan2.pdf");
        fs::write(&first, "1")?;
        fs::write(&second, "2")?;

        let renamed = rename_within_dir(&first, "Bill").await?;
        assert_eq!(renamed, dir.path().join("Bill.pdf"));
        let renamed = rename_within_dir(&second, "Bill").await?;
        assert_eq!(renamed, dir.path().join("Bill_2.pdf"));
        // Renaming a file to its own name is a no-op.
        let renamed = rename_within_dir(&renamed, "Bill_2").await?;
        assert_eq!(renamed, dir.path().join("Bill_2.pdf"));
        assert_eq!(file_names(dir.path())?, ["Bill.pdf", "Bill_2.pdf"]);
        Ok(())
    }

    #[tokio::test]
    async fn does_nothing_while_locked() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("Scan1.pdf"), "PDF TEXT upright")?;
        fs::write(dir.path().join(LOCK_FILE_NAME), "")?;

        let status = processor(Some("Scan")).run(dir.path()).await?;
        assert_eq!(status, RunStatus::AlreadyRunning);
        assert_eq!(file_names(dir.path())?, ["Scan1.pdf", LOCK_FILE_NAME]);
        Ok(())
    }

    #[tokio::test]
    async fn does_nothing_without_a_trigger() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("bill.pdf"), "PDF TEXT upright")?;

        let status = processor(Some("Scan")).run(dir.path()).await?;
        assert_eq!(status, RunStatus::NotTriggered);
        assert_eq!(file_names(dir.path())?, ["bill.pdf"]);
        Ok(())
    }

    #[tokio::test]
    async fn processes_every_candidate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("Scan1.pdf"), "PDF TEXT upright")?;
        fs::write(dir.path().join("Scan2.pdf"), "PDF TEXT upright again")?;
        fs::write(dir.path().join("notes.txt"), "hello")?;
        fs::write(dir.path().join(".DS_Store"), "")?;

        let status = processor(None).run(dir.path()).await?;
        assert_eq!(
            status,
            RunStatus::Completed(BatchSummary {
                renamed: 2,
                skipped: 1,
                failed: 0,
            })
        );

        // These files aren't real PDFs, so naming falls back to timestamps.
        let names = file_names(dir.path())?;
        assert_eq!(names.len(), 4);
        assert!(names.contains(&"notes.txt".to_owned()));
        assert!(!names.contains(&LOCK_FILE_NAME.to_owned()));
        let renamed = names.iter().filter(|name| name.starts_with("file_")).count();
        assert_eq!(renamed, 2);
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_scans_leave_a_single_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("Scan1.pdf"), "PDF sideways")?;

        let status = processor_accepting("never", Some("Scan"))
            .run(dir.path())
            .await?;
        assert_eq!(
            status,
            RunStatus::Completed(BatchSummary {
                renamed: 1,
                skipped: 0,
                failed: 0,
            })
        );
        let names = file_names(dir.path())?;
        assert_eq!(names.len(), 1, "{names:?}");
        assert!(names[0].starts_with("file_"));

        // The scan is gone, so the trigger no longer fires.
        let status = processor_accepting("never", Some("Scan"))
            .run(dir.path())
            .await?;
        assert_eq!(status, RunStatus::NotTriggered);
        assert_eq!(file_names(dir.path())?, names);

        // Forcing another run reprocesses the one file without duplicating it.
        let status = processor_accepting("never", None).run(dir.path()).await?;
        assert_eq!(
            status,
            RunStatus::Completed(BatchSummary {
                renamed: 1,
                skipped: 0,
                failed: 0,
            })
        );
        assert_eq!(file_names(dir.path())?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn renames_stay_inside_the_directory() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sub = dir.path().join("inbox");
        fs::create_dir(&sub)?;
        let path = sub.join("Scan1.pdf");
        fs::write(&path, "PDF")?;

        for name in ["../escaped", "a/b", "a\\b", "..", ".", ""] {
            assert!(rename_within_dir(&path, name).await.is_err(), "{name:?}");
        }
        assert_eq!(file_names(&sub)?, ["Scan1.pdf"]);
        assert_eq!(file_names(dir.path())?, ["inbox"]);

        let renamed = rename_within_dir(&path, "Water-Bill").await?;
        assert_eq!(renamed, sub.join("Water-Bill.pdf"));
        Ok(())
    }
}
