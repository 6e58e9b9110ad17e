//! Application entry point: page-reader.
//!
//! # Startup sequence
//!
//! 1. Parse the command line.
//! 2. Initialise logging.
//! 3. Load [`AppConfig`] from disk (default on first run).
//! 4. Build the recognizer, speech output and document repository.
//! 5. Build a [`SessionController`] and run the requested subcommand.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use page_reader::{
    config::{AppConfig, AppPaths},
    playback::{ConsoleSpeech, ToggleOutcome},
    recognition::ApiRecognizer,
    session::{PathPicker, PickSource, SessionController},
    storage::{DocumentId, DocumentRepository, FileStore},
};

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "page-reader")]
#[command(about = "Photograph pages, recognise their text and read it aloud")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Recognise images and save them as a new document
    Scan {
        /// Document name
        #[arg(short, long)]
        name: String,

        /// Page images, in reading order
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// List saved documents
    List,

    /// Print the pages of a saved document
    Show { id: String },

    /// Read a saved document aloud from a page onwards
    Read {
        id: String,

        /// Page to start from (1-based)
        #[arg(short, long, default_value_t = 1)]
        page: usize,

        /// Speech language tag, e.g. th-TH or en-US
        #[arg(short, long)]
        language: Option<String>,
    },

    /// Delete a saved document
    Delete { id: String },
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = cli
        .config
        .clone()
        .unwrap_or_else(|| AppPaths::new().settings_file);
    let config = AppConfig::load_from(&settings)
        .with_context(|| format!("loading settings from {}", settings.display()))?;
    log::debug!("settings: {}", settings.display());

    let picker_paths = match &cli.command {
        Command::Scan { images, .. } => images.clone(),
        _ => Vec::new(),
    };
    let image_count = picker_paths.len();

    let mut session = build_session(&config, picker_paths);

    match cli.command {
        Command::Scan { name, .. } => scan(&mut session, &name, image_count).await,
        Command::List => list(&session).await,
        Command::Show { id } => show(&mut session, &id).await,
        Command::Read { id, page, language } => {
            read(&mut session, &id, page, language).await
        }
        Command::Delete { id } => delete(&mut session, &id).await,
    }
}

fn build_session(config: &AppConfig, images: Vec<PathBuf>) -> SessionController {
    let store_dir = config.storage.resolved_dir();
    log::debug!("document store: {}", store_dir.display());

    let repository = Arc::new(DocumentRepository::new(
        Arc::new(FileStore::new(store_dir)),
        config.storage.collection_key.clone(),
    ));

    SessionController::new(
        config,
        Arc::new(ApiRecognizer::from_config(&config.recognition)),
        Arc::new(ConsoleSpeech::from_config(&config.speech)),
        repository,
        Arc::new(PathPicker::new(images)),
    )
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn scan(session: &mut SessionController, name: &str, image_count: usize) -> Result<()> {
    session.new_document();

    let mut added = 0;
    while added < image_count {
        let ids = session.acquire(PickSource::Gallery).await?;
        if ids.is_empty() {
            break;
        }
        added += ids.len();
    }

    session.wait_idle().await;
    for report in session.batch_reports() {
        log::info!(
            "batch: {} pages, {} ready, {} failed",
            report.total,
            report.ready,
            report.failed
        );
    }

    let doc = session.save(name).await?;
    println!("{}  {}  ({} pages)", doc.id, doc.name, doc.pages.len());
    Ok(())
}

async fn list(session: &SessionController) -> Result<()> {
    let documents = session.list().await;
    if documents.is_empty() {
        println!("No saved documents.");
        return Ok(());
    }
    for doc in documents {
        println!(
            "{}  {}  {} pages  {}",
            doc.id,
            doc.name,
            doc.page_count,
            doc.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

async fn show(session: &mut SessionController, id: &str) -> Result<()> {
    let doc = session.open(&DocumentId::from(id)).await?;
    println!("{}  ({})", doc.name, doc.created_at.format("%Y-%m-%d %H:%M"));
    for (i, page) in doc.pages.iter().enumerate() {
        println!();
        println!("--- page {} [{:?}] {}", i + 1, page.status, page.image);
        if !page.text.is_empty() {
            println!("{}", page.text);
        }
    }
    Ok(())
}

async fn read(
    session: &mut SessionController,
    id: &str,
    page: usize,
    language: Option<String>,
) -> Result<()> {
    let doc = session.open(&DocumentId::from(id)).await?;
    if page == 0 || !session.go_to_page(page - 1) {
        bail!("\"{}\" has no page {page} ({} pages)", doc.name, doc.pages.len());
    }
    if let Some(language) = language {
        session.set_language(language);
    }

    match session.toggle_playback() {
        ToggleOutcome::Started { .. } => {}
        _ => bail!("page {page} has no recognised text"),
    }
    while session.playback_state().is_speaking() {
        session.pump_speech().await;
    }
    Ok(())
}

async fn delete(session: &mut SessionController, id: &str) -> Result<()> {
    if session.delete(&DocumentId::from(id)).await? {
        println!("Deleted {id}");
    } else {
        println!("No document with id {id}");
    }
    Ok(())
}
