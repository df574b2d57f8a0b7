//! The `searchable` subcommand.

use clap::Args;

use crate::{
    prelude::*,
    searchable::{Controller, Resolution, SearchableOpts},
};

/// Options for the `searchable` subcommand.
#[derive(Args, Clone, Debug)]
pub struct SearchableCmdOpts {
    /// The PDF to make searchable.
    pub file: PathBuf,

    #[clap(flatten)]
    pub searchable: SearchableOpts,
}

/// The `searchable` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_searchable(opts: &SearchableCmdOpts) -> Result<()> {
    if !opts.file.is_file() {
        return Err(anyhow!("{:?} is not a file", opts.file.display()));
    }

    let controller = Controller::from_opts(&opts.searchable);
    let outcome = controller.make_searchable(&opts.file).await;
    if outcome.resolution == Resolution::Exhausted {
        warn!(
            attempts = outcome.attempts.len(),
            "Could not verify orientation, returning best effort"
        );
    }
    println!("{}", outcome.path.display());
    Ok(())
}
