use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod batch;
mod cmd;
mod detect;
mod fs_utils;
mod naming;
mod pdf;
mod prelude;
mod retry;
mod searchable;
mod session;
mod tools;
mod ui;

/// OCR, straighten and rename scanned documents.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - OPENAI_API_BASE (optional): Override the server URL.
  - OPENAI_API_KEY: The OpenAI key to use for name suggestions.
  - RUST_LOG (optional): Log filter, e.g. "scan_namer=debug".

  These variables may be set in a standard `.env` file.

External Tools:
  pdftotext and pdftoppm (poppler-utils), tesseract, ocrmypdf, and at least
  one of pdftk or qpdf.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Make every scan in a directory searchable and name it after its
    /// contents.
    Process(cmd::process::ProcessOpts),
    /// Make a single PDF searchable and correctly oriented, printing the
    /// resulting path.
    Searchable(cmd::searchable::SearchableCmdOpts),
    /// Print an AI-suggested name for a PDF.
    Suggest(cmd::suggest::SuggestOpts),
    /// Interactively review and rename the PDFs in one or more folders.
    Review(cmd::review::ReviewOpts),
}

impl Cmd {
    /// Are we using stdout for output or prompts?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Process(_) => false,
            Cmd::Searchable(_) | Cmd::Suggest(_) | Cmd::Review(_) => true,
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main(ui).await
}

/// Our real entry point, once logging is set up.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Process(opts) => cmd::process::cmd_process(ui, opts).await,
        Cmd::Searchable(opts) => cmd::searchable::cmd_searchable(opts).await,
        Cmd::Suggest(opts) => cmd::suggest::cmd_suggest(opts).await,
        Cmd::Review(opts) => cmd::review::cmd_review(ui, opts).await,
    }
}
