//! plan-cli: headless access to a directory-backed plan document store.
//!
//! `convert` runs documents through the codec, `put` applies an edit through
//! a full session (debounced save and all), and `watch` follows a document's
//! remote changes until interrupted.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use plan_cli::FileStore;
use plan_core::{DocKey, DocumentSession, SessionConfig, SessionEvent, markdown};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "plan-cli")]
#[command(about = "Headless tools for the plan document store")]
struct Args {
    /// Root directory of the document store
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a document between markdown, tree JSON, and plain text
    Convert {
        /// Input file (stdin when omitted); markdown or tree JSON
        input: Option<PathBuf>,

        /// Output form
        #[arg(long, value_enum, default_value = "tree")]
        to: Form,
    },

    /// Apply an edit to a stored document and wait for the save
    Put {
        #[arg(long)]
        user: u64,

        #[arg(long)]
        thread: String,

        /// Section id; omit to address the whole-plan document
        #[arg(long)]
        section: Option<String>,

        /// Input file (stdin when omitted); markdown or tree JSON
        input: Option<PathBuf>,
    },

    /// Follow a stored document, printing updates as they arrive
    Watch {
        #[arg(long)]
        user: u64,

        #[arg(long)]
        thread: String,

        /// Section id; omit to address the whole-plan document
        #[arg(long)]
        section: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Form {
    /// Editor tree JSON
    Tree,
    /// Markdown
    Markdown,
    /// Plain text (search field form)
    Text,
}

fn doc_key(user: u64, thread: String, section: Option<String>) -> DocKey {
    match section {
        Some(section) => DocKey::section(user, thread, section),
        None => DocKey::plan(user, thread),
    }
}

fn read_input(input: Option<PathBuf>) -> Result<String> {
    match input {
        Some(path) => {
            std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))
        }
        None => std::io::read_to_string(std::io::stdin()).context("reading stdin"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match args.command {
        Command::Convert { input, to } => convert(input, to),
        Command::Put {
            user,
            thread,
            section,
            input,
        } => put(args.root, doc_key(user, thread, section), input).await,
        Command::Watch {
            user,
            thread,
            section,
        } => watch(args.root, doc_key(user, thread, section)).await,
    }
}

fn convert(input: Option<PathBuf>, to: Form) -> Result<()> {
    let source = read_input(input)?;
    let tree = markdown::parse(&source);

    let output = match to {
        Form::Tree => serde_json::to_string_pretty(&tree.to_json())?,
        Form::Markdown => markdown::serialize(&tree),
        Form::Text => tree.plain_text(),
    };
    println!("{output}");
    Ok(())
}

async fn put(root: PathBuf, key: DocKey, input: Option<PathBuf>) -> Result<()> {
    let source = read_input(input)?;
    let tree = markdown::parse(&source);

    let store = Arc::new(FileStore::open(root)?);
    let config = SessionConfig::default();
    let debounce = config.debounce;
    let session = DocumentSession::open(store, key.clone(), config).await?;
    if session.is_new() {
        info!(key = %key, "document not generated yet; creating it");
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = session.events().subscribe(move |event| {
        let _ = tx.send(event);
    });

    session.apply_local_edit(tree);

    // The save fires one debounce interval after the edit; leave headroom
    // for the write itself.
    let deadline = debounce + Duration::from_secs(5);
    loop {
        match tokio::time::timeout(deadline, rx.recv()).await {
            Ok(Some(SessionEvent::Saved { updated_at })) => {
                info!(key = %key, %updated_at, "saved");
                return Ok(());
            }
            Ok(Some(SessionEvent::SaveFailed { message })) => {
                bail!("save failed: {message}");
            }
            Ok(Some(_)) => continue,
            Ok(None) => bail!("session closed before the save settled"),
            Err(_) => {
                // No event inside the window: the edit matched the stored
                // content and the save was skipped.
                info!(key = %key, "no changes to save");
                return Ok(());
            }
        }
    }
}

async fn watch(root: PathBuf, key: DocKey) -> Result<()> {
    let store = Arc::new(FileStore::open(root)?);
    let session = DocumentSession::open(store, key.clone(), SessionConfig::default()).await?;

    if session.is_new() {
        info!(key = %key, "document not generated yet; waiting for content");
    } else {
        println!("{}", markdown::serialize(&session.document()));
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = session.events().subscribe(move |event| {
        let _ = tx.send(event);
    });

    info!(key = %key, "watching; press ctrl-c to stop");
    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                if let SessionEvent::RemoteApplied { updated_at } = event {
                    info!(key = %key, %updated_at, "update received");
                    println!("---");
                    println!("{}", markdown::serialize(&session.document()));
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("stopping");
                break;
            }
        }
    }

    session.close();
    Ok(())
}
