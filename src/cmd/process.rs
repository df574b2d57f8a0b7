//! The `process` subcommand.

use std::time::Duration;

use clap::Args;
use tokio::{signal, time};

use crate::{
    batch::BatchProcessor,
    naming::{DEFAULT_CACHE_FILE_NAME, Namer, NamingOpts},
    prelude::*,
    searchable::{Controller, SearchableOpts},
    ui::Ui,
};

/// Options for the `process` subcommand.
#[derive(Args, Clone, Debug)]
pub struct ProcessOpts {
    /// The directory of scans to process.
    pub dir: PathBuf,

    /// Process the directory again every SECONDS, until interrupted.
    #[clap(long, value_name = "SECONDS")]
    pub watch: Option<u64>,

    /// Process the directory even if no trigger file is present.
    #[clap(long)]
    pub always: bool,

    /// Only process the directory if it contains a `<PREFIX>….pdf` file.
    #[clap(long, value_name = "PREFIX", default_value = "Scan")]
    pub trigger_prefix: String,

    /// A JSON file caching names by content hash. Defaults to
    /// `.name_cache.json` in the processed directory.
    #[clap(long)]
    pub cache: Option<PathBuf>,

    #[clap(flatten)]
    pub naming: NamingOpts,

    #[clap(flatten)]
    pub searchable: SearchableOpts,
}

/// The `process` subcommand.
#[instrument(level = "debug", skip_all, fields(dir = %opts.dir.display()))]
pub async fn cmd_process(ui: Ui, opts: &ProcessOpts) -> Result<()> {
    if !opts.dir.is_dir() {
        return Err(anyhow!("{:?} is not a directory", opts.dir.display()));
    }

    let cache_path = opts
        .cache
        .clone()
        .unwrap_or_else(|| opts.dir.join(DEFAULT_CACHE_FILE_NAME));
    let namer = Namer::from_opts(
        &opts.naming,
        Some(&cache_path),
        opts.searchable.tools.tool_timeout(),
    )?;
    let controller = Controller::from_opts(&opts.searchable);
    let trigger_prefix = (!opts.always).then(|| opts.trigger_prefix.clone());
    let mut processor = BatchProcessor::new(controller, namer, ui, trigger_prefix);

    let Some(interval) = opts.watch else {
        processor.run(&opts.dir).await?;
        return Ok(());
    };

    info!(interval, "Watching directory, press Ctrl-C to stop");
    loop {
        // Keep watching after a failed run.
        if let Err(err) = processor.run(&opts.dir).await {
            error!("Run failed: {:?}", err);
        }
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            _ = time::sleep(Duration::from_secs(interval)) => {}
        }
    }
    Ok(())
}
