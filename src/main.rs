use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use namesake::config::Config;
use namesake::model::{NameType, NewNovel, Resolution, ResolutionAction};
use namesake::state_machine::ChapterStatus;
use namesake::translate::glossary::NameDictionary;
use namesake::translate::normalize::{language_mismatch, normalize_source};
use namesake::{init_tracing, AppContext};

#[derive(Parser)]
#[command(
    name = "namesake",
    version,
    about = "Translate novels chapter by chapter with consistent character names"
)]
struct Cli {
    /// SQLite database path (overrides NAMESAKE_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage novels
    #[command(subcommand)]
    Novel(NovelCommand),
    /// Manage chapters
    #[command(subcommand)]
    Chapter(ChapterCommand),
    /// Translate a chapter (stored source, or --file)
    Translate {
        novel_id: String,
        chapter_id: String,
        /// Translate this text instead of the stored source
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Manage the name dictionary and detected names
    #[command(subcommand)]
    Names(NamesCommand),
}

#[derive(Subcommand)]
enum NovelCommand {
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        /// ko, ja, or auto
        #[arg(long, default_value = "ko")]
        source_lang: String,
        #[arg(long, default_value = "en")]
        target_lang: String,
        #[arg(long)]
        description: Option<String>,
    },
    List,
    Show {
        novel_id: String,
    },
}

#[derive(Subcommand)]
enum ChapterCommand {
    Add {
        novel_id: String,
        #[arg(long)]
        number: u32,
        #[arg(long, default_value = "")]
        title: String,
        /// Source text file
        #[arg(long)]
        file: PathBuf,
    },
    List {
        novel_id: String,
    },
    Show {
        chapter_id: String,
    },
    /// Replace a chapter's source text; the chapter returns to pending
    Edit {
        chapter_id: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Mark a translated chapter completed
    Complete {
        novel_id: String,
        chapter_id: String,
    },
}

#[derive(Subcommand)]
enum NamesCommand {
    /// Print a novel's dictionary
    List {
        novel_id: String,
    },
    Add {
        novel_id: String,
        original: String,
        translated: String,
        #[arg(long = "type", default_value = "character")]
        name_type: NameType,
    },
    Update {
        mapping_id: String,
        #[arg(long)]
        translated: Option<String>,
        #[arg(long = "type")]
        name_type: Option<NameType>,
    },
    Remove {
        mapping_id: String,
    },
    /// Detect names in a text file without translating it
    Detect {
        novel_id: String,
        #[arg(long)]
        file: PathBuf,
        /// Defaults to the novel's source language
        #[arg(long)]
        language: Option<String>,
    },
    /// Detected names awaiting review
    Pending {
        novel_id: String,
        chapter_id: String,
    },
    /// Accept or ignore detected names
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct ResolveArgs {
    novel_id: String,
    chapter_id: String,
    /// Accept a detected name: ID or ID=TRANSLATION
    #[arg(long = "add", value_name = "ID[=TRANSLATION]")]
    add: Vec<String>,
    /// Ignore a detected name
    #[arg(long = "ignore", value_name = "ID")]
    ignore: Vec<String>,
    /// JSON array of {detectedNameId, action, translatedName?, type?}
    #[arg(long)]
    json: Option<PathBuf>,
}

impl ResolveArgs {
    fn resolutions(&self) -> Result<Vec<Resolution>> {
        let mut out: Vec<Resolution> = match &self.json {
            Some(path) => serde_json::from_str(&read_text(path)?)
                .with_context(|| format!("parsing resolutions in {}", path.display()))?,
            None => Vec::new(),
        };
        for spec in &self.add {
            let (id, translated) = match spec.split_once('=') {
                Some((id, t)) => (id, Some(t.to_string())),
                None => (spec.as_str(), None),
            };
            out.push(Resolution {
                detected_name_id: id.to_string(),
                action: ResolutionAction::Add,
                translated_name: translated,
                name_type: None,
            });
        }
        for id in &self.ignore {
            out.push(Resolution {
                detected_name_id: id.clone(),
                action: ResolutionAction::Ignore,
                translated_name: None,
                name_type: None,
            });
        }
        if out.is_empty() {
            bail!("nothing to resolve: pass --add, --ignore or --json");
        }
        Ok(out)
    }
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn warn_on_language_mismatch(app: &AppContext, novel_id: &str, text: &str) -> Result<()> {
    if let Some(novel) = app.store.novel(novel_id)? {
        if let Some(detected) = language_mismatch(&novel.source_language, text) {
            warn!(
                novel_id,
                declared = %novel.source_language,
                detected = %detected,
                "chapter text does not look like the novel's source language"
            );
        }
    }
    Ok(())
}

fn require_model(app: &AppContext) -> Result<()> {
    if !app.model_available {
        bail!("no language model configured: set NAMESAKE_API_KEY (or DEEPSEEK_API_KEY)");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    init_tracing(config.json_logs);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling model calls");
            on_signal.cancel();
        }
    });

    let app = AppContext::new(&config, cancel)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;

    match cli.command {
        Command::Novel(cmd) => run_novel(&app, cmd),
        Command::Chapter(cmd) => run_chapter(&app, cmd),
        Command::Translate {
            novel_id,
            chapter_id,
            file,
        } => {
            require_model(&app)?;
            let result = match file {
                Some(path) => {
                    let text = normalize_source(&read_text(&path)?);
                    app.orchestrator
                        .translate_chapter(&novel_id, &chapter_id, &text)
                        .await?
                }
                None => {
                    app.orchestrator
                        .translate_stored_chapter(&novel_id, &chapter_id)
                        .await?
                }
            };
            print_json(&result)?;
            info!(metrics = %serde_json::to_string(&app.metrics.summary())?, "pipeline timings");
            Ok(())
        }
        Command::Names(cmd) => run_names(&app, cmd).await,
    }
}

fn run_novel(app: &AppContext, cmd: NovelCommand) -> Result<()> {
    match cmd {
        NovelCommand::Add {
            title,
            author,
            source_lang,
            target_lang,
            description,
        } => {
            let novel = app.store.create_novel(NewNovel {
                title,
                author,
                source_language: source_lang,
                target_language: target_lang,
                description,
            })?;
            print_json(&novel)
        }
        NovelCommand::List => print_json(&app.store.list_novels()?),
        NovelCommand::Show { novel_id } => match app.store.novel(&novel_id)? {
            Some(novel) => print_json(&novel),
            None => bail!("novel not found: {novel_id}"),
        },
    }
}

fn run_chapter(app: &AppContext, cmd: ChapterCommand) -> Result<()> {
    match cmd {
        ChapterCommand::Add {
            novel_id,
            number,
            title,
            file,
        } => {
            let text = normalize_source(&read_text(&file)?);
            warn_on_language_mismatch(app, &novel_id, &text)?;
            print_json(&app.store.add_chapter(&novel_id, number, &title, &text)?)
        }
        ChapterCommand::List { novel_id } => print_json(&app.store.list_chapters(&novel_id)?),
        ChapterCommand::Show { chapter_id } => match app.store.chapter(&chapter_id)? {
            Some(chapter) => print_json(&chapter),
            None => bail!("chapter not found: {chapter_id}"),
        },
        ChapterCommand::Edit { chapter_id, file } => {
            let Some(chapter) = app.store.chapter(&chapter_id)? else {
                bail!("chapter not found: {chapter_id}");
            };
            // A pending chapter only has its source replaced.
            if chapter.status != ChapterStatus::Pending {
                chapter.status.transition(ChapterStatus::Pending)?;
            }
            let text = normalize_source(&read_text(&file)?);
            warn_on_language_mismatch(app, &chapter.novel_id, &text)?;
            app.store.update_chapter_source(&chapter_id, &text)?;
            match app.store.chapter(&chapter_id)? {
                Some(chapter) => print_json(&chapter),
                None => bail!("chapter not found: {chapter_id}"),
            }
        }
        ChapterCommand::Complete {
            novel_id,
            chapter_id,
        } => print_json(&app.review.complete_chapter(&novel_id, &chapter_id)?),
    }
}

async fn run_names(app: &AppContext, cmd: NamesCommand) -> Result<()> {
    match cmd {
        NamesCommand::List { novel_id } => print_json(&app.store.name_mappings(&novel_id)?),
        NamesCommand::Add {
            novel_id,
            original,
            translated,
            name_type,
        } => {
            if app.store.novel(&novel_id)?.is_none() {
                bail!("novel not found: {novel_id}");
            }
            let mut dictionary = NameDictionary::new(Arc::clone(&app.store));
            print_json(&dictionary.insert(&novel_id, &original, &translated, name_type)?)
        }
        NamesCommand::Update {
            mapping_id,
            translated,
            name_type,
        } => {
            if translated.is_none() && name_type.is_none() {
                bail!("nothing to update: pass --translated and/or --type");
            }
            print_json(&app.store.update_name_mapping(
                &mapping_id,
                translated.as_deref(),
                name_type,
            )?)
        }
        NamesCommand::Remove { mapping_id } => {
            app.store.delete_name_mapping(&mapping_id)?;
            print_json(&serde_json::json!({ "removed": mapping_id }))
        }
        NamesCommand::Detect {
            novel_id,
            file,
            language,
        } => {
            let Some(novel) = app.store.novel(&novel_id)? else {
                bail!("novel not found: {novel_id}");
            };
            let text = normalize_source(&read_text(&file)?);
            let language = language.unwrap_or(novel.source_language);
            let found = app
                .orchestrator
                .detection()
                .detect_names(&text, &novel_id, &language)
                .await?;
            print_json(&found)
        }
        NamesCommand::Pending {
            novel_id,
            chapter_id,
        } => print_json(&app.store.pending_detected_names(&novel_id, &chapter_id)?),
        NamesCommand::Resolve(args) => {
            let resolutions = args.resolutions()?;
            print_json(&app.review.resolve_names(
                &args.novel_id,
                &args.chapter_id,
                &resolutions,
            )?)
        }
    }
}
