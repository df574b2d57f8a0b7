//! The `suggest` subcommand.

use std::time::Duration;

use clap::Args;

use crate::{
    naming::{Namer, NamingOpts},
    prelude::*,
};

/// Options for the `suggest` subcommand.
#[derive(Args, Clone, Debug)]
pub struct SuggestOpts {
    /// The PDF to name.
    pub file: PathBuf,

    /// A JSON file caching names by content hash. Without this, nothing is
    /// cached.
    #[clap(long)]
    pub cache: Option<PathBuf>,

    /// Timeout, in seconds, for extracting text with `pdftotext`.
    #[clap(long, default_value = "120")]
    pub tool_timeout: u64,

    #[clap(flatten)]
    pub naming: NamingOpts,
}

/// The `suggest` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_suggest(opts: &SuggestOpts) -> Result<()> {
    let mut namer = Namer::from_opts(
        &opts.naming,
        opts.cache.as_deref(),
        Duration::from_secs(opts.tool_timeout),
    )?;
    let name = namer.name_file(&opts.file).await?;
    println!("{name}");
    Ok(())
}
