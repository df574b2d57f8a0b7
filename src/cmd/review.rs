//! The `review` subcommand: step through documents and rename them by hand.

use std::{io::Write as _, time::Duration};

use clap::Args;
use tokio::io::{AsyncBufReadExt as _, BufReader};

use crate::{
    batch::rename_within_dir,
    naming::{DEFAULT_CACHE_FILE_NAME, Namer, NamingOpts},
    prelude::*,
    searchable::{Controller, SearchableOpts},
    session::{
        HEAD_WORDS, REVIEW_HELP, ReviewCommand, SaveAs, Session, date_suffix_for,
        head_in_snake_case,
    },
    tools::poppler,
    ui::{ProgressConfig, Ui},
};

/// Options for the `review` subcommand.
#[derive(Args, Clone, Debug)]
pub struct ReviewOpts {
    /// Folders to review. PDFs are found recursively.
    #[clap(required = true)]
    pub dirs: Vec<PathBuf>,

    /// Include an AI-generated name in the suggestions.
    #[clap(long)]
    pub ai: bool,

    /// A JSON file caching AI names by content hash. Defaults to
    /// `.name_cache.json` in the first folder.
    #[clap(long)]
    pub cache: Option<PathBuf>,

    #[clap(flatten)]
    pub naming: NamingOpts,

    #[clap(flatten)]
    pub searchable: SearchableOpts,
}

/// What we show for the current document.
struct DocumentView {
    suggestions: Vec<String>,
    save_as: SaveAs,
}

impl DocumentView {
    /// Build suggestions for `path`.
    async fn load(path: &Path, namer: Option<&mut Namer>, timeout: Duration) -> Self {
        let text = poppler::extract_text(path, Some(1), Some(1), timeout)
            .await
            .unwrap_or_else(|err| {
                warn!("Could not extract text: {:?}", err);
                String::new()
            });
        let base_name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut suggestions = vec![];
        let head = head_in_snake_case(&text, HEAD_WORDS);
        if !head.is_empty() {
            suggestions.push(head);
        }
        if let Some(namer) = namer {
            match namer.name_file(path).await {
                Ok(name) => suggestions.push(name),
                Err(err) => warn!("Could not suggest a name: {:?}", err),
            }
        }
        suggestions.push(base_name.clone());

        let date_suffix = date_suffix_for(path).unwrap_or_else(|err| {
            warn!("{:?}", err);
            String::new()
        });
        Self {
            suggestions,
            save_as: SaveAs::new(base_name, date_suffix),
        }
    }

    fn print(&self, session: &Session) {
        println!();
        println!(
            "[{}/{}] {}",
            session.position(),
            session.len(),
            session.current().display()
        );
        for (idx, suggestion) in self.suggestions.iter().enumerate() {
            println!("  {}. {}", idx + 1, suggestion);
        }
        println!("  save as: {}.pdf", self.save_as.base_name());
        print!("> ");
        // The prompt is cosmetic.
        std::io::stdout().flush().ok();
    }
}

/// The `review` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_review(ui: Ui, opts: &ReviewOpts) -> Result<()> {
    let mut session = Session::from_folders(&opts.dirs)?;
    let controller = Controller::from_opts(&opts.searchable);
    let timeout = opts.searchable.tools.tool_timeout();
    let mut namer = if opts.ai {
        let cache_path = opts
            .cache
            .clone()
            .unwrap_or_else(|| opts.dirs[0].join(DEFAULT_CACHE_FILE_NAME));
        Some(Namer::from_opts(&opts.naming, Some(&cache_path), timeout)?)
    } else {
        None
    };

    let mut view = DocumentView::load(session.current(), namer.as_mut(), timeout).await;
    view.print(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(command) = ReviewCommand::parse(&line) else {
            println!("Unknown command, type ? for help");
            view.print(&session);
            continue;
        };
        debug!(?command, "Review command");

        let mut reload = false;
        match command {
            ReviewCommand::Next => {
                session.next();
                reload = true;
            }
            ReviewCommand::Back => {
                session.back();
                reload = true;
            }
            ReviewCommand::Ocr => {
                let spinner = ui.new_spinner(&ProgressConfig {
                    emoji: "🔍",
                    msg: "Making searchable",
                    done_msg: "Made searchable",
                });
                let outcome = controller.make_searchable(session.current()).await;
                spinner.finish_using_style();
                session.replace_current(outcome.path);
                reload = true;
            }
            ReviewCommand::Choose(n) => match view.suggestions.get(n - 1) {
                Some(suggestion) => view.save_as.name = suggestion.clone(),
                None => println!("No suggestion {n}"),
            },
            ReviewCommand::ToggleDate => view.save_as.toggle_date(),
            ReviewCommand::SetName(name) => view.save_as.name = name,
            ReviewCommand::Write => {
                match rename_within_dir(session.current(), &view.save_as.base_name()).await
                {
                    Ok(renamed) => {
                        println!("Saved as {}", renamed.display());
                        session.replace_current(renamed);
                        reload = true;
                    }
                    Err(err) => error!("Could not save: {:?}", err),
                }
            }
            ReviewCommand::Quit => break,
            ReviewCommand::Help => println!("{REVIEW_HELP}"),
        }

        if reload {
            view = DocumentView::load(session.current(), namer.as_mut(), timeout).await;
        }
        view.print(&session);
    }
    println!();
    Ok(())
}
