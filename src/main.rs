//! # Doc Chat CLI (`docchat`)
//!
//! The `docchat` binary is the primary interface for Doc Chat. It provides
//! commands for inspecting the ingestion pipeline, asking one-shot grounded
//! questions, running an interactive chat session, and starting the HTTP
//! server for browser UIs.
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat ingest <paths…>` | Extract and chunk documents, print a report |
//! | `docchat ask "<question>"` | Ask one question, optionally grounded in files |
//! | `docchat chat` | Interactive chat session on stdin |
//! | `docchat serve` | Start the HTTP API server |
//!
//! ## Examples
//!
//! ```bash
//! # Inspect chunking over a directory of manuals
//! docchat ingest ./manuals
//!
//! # Validate the embedding backend too
//! docchat ingest ./manuals --embed
//!
//! # One-shot grounded question
//! docchat ask "What is OpenRoad?" --file openroad-manual.pdf
//!
//! # Interactive session against the local completion server
//! docchat chat --file manual.pdf
//! ```

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use doc_chat::config::{self, Config};
use doc_chat::extract::content_type_for_path;
use doc_chat::ingest::{self, DocumentInput, DocumentOutcome};
use doc_chat::server;
use doc_chat::session::Session;

/// Doc Chat CLI — a retrieval-augmented document chat assistant.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; defaults are used when the file does not exist. See
/// `config/docchat.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "Doc Chat — a retrieval-augmented document chat assistant",
    version,
    long_about = "Doc Chat ingests PDF documents, indexes them for similarity search, \
    and answers questions grounded in the most relevant passages, streaming responses \
    from a hosted or local chat-completion backend."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Extract and chunk documents, printing a per-file report.
    ///
    /// Accepts files and directories (directories are walked for supported
    /// extensions: .pdf, .txt, .md). Extraction failures are reported per
    /// file and never abort the batch. With `--embed`, the chunks are also
    /// embedded and indexed to validate the configured backend end to end.
    Ingest {
        /// Files or directories to ingest.
        paths: Vec<PathBuf>,

        /// Also embed the chunks and build an index (requires an embedding
        /// provider to be configured).
        #[arg(long)]
        embed: bool,
    },

    /// Ask a single question and stream the answer to stdout.
    ///
    /// With `--file`, the given documents are ingested first and the answer
    /// is grounded in the retrieved passages; otherwise the question is
    /// sent to the completion backend as-is.
    Ask {
        /// The question to ask.
        question: String,

        /// Document(s) to ground the answer in (repeatable).
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },

    /// Start an interactive chat session reading questions from stdin.
    ///
    /// `/reset` clears the conversation and index; `/quit` (or EOF) exits.
    Chat {
        /// Document(s) to ground answers in (repeatable).
        #[arg(long = "file")]
        files: Vec<PathBuf>,
    },

    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// JSON + SSE endpoints for browser UIs.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Ingest { paths, embed } => {
            run_ingest(&cfg, &paths, embed).await?;
        }
        Commands::Ask { question, files } => {
            run_ask(&cfg, &question, &files).await?;
        }
        Commands::Chat { files } => {
            run_chat(&cfg, &files).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

/// Collect document inputs from files and directories.
fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<DocumentInput>> {
    let mut inputs = Vec::new();

    for path in paths {
        if path.is_dir() {
            for entry in walkdir::WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                if let Some(content_type) = content_type_for_path(entry.path()) {
                    inputs.push(read_input(entry.path(), content_type)?);
                }
            }
        } else {
            let content_type = content_type_for_path(path).ok_or_else(|| {
                anyhow::anyhow!(
                    "unsupported file type: {} (expected .pdf, .txt, or .md)",
                    path.display()
                )
            })?;
            inputs.push(read_input(path, content_type)?);
        }
    }

    if inputs.is_empty() {
        bail!("no supported documents found");
    }

    Ok(inputs)
}

fn read_input(path: &Path, content_type: &str) -> Result<DocumentInput> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    Ok(DocumentInput {
        name: path.display().to_string(),
        content_type: content_type.to_string(),
        bytes,
    })
}

fn print_outcomes(outcomes: &[DocumentOutcome]) {
    for outcome in outcomes {
        match &outcome.error {
            Some(error) => println!("  {} — skipped: {}", outcome.name, error),
            None => println!("  {} — {} chunks", outcome.name, outcome.chunks),
        }
    }
}

async fn run_ingest(cfg: &Config, paths: &[PathBuf], embed: bool) -> Result<()> {
    let inputs = collect_inputs(paths)?;

    if !embed {
        let prepared = ingest::extract_and_chunk(cfg, &inputs);
        let skipped = prepared
            .outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .count();
        println!("ingest");
        print_outcomes(&prepared.outcomes);
        println!("  documents: {}", prepared.documents.len());
        println!("  extraction skipped: {}", skipped);
        println!("  chunks: {}", prepared.chunks.len());
        println!("ok");
        return Ok(());
    }

    let mut session = Session::new(cfg.clone())
        .map_err(|e| anyhow::anyhow!("failed to create session: {}", e))?;
    let report = session
        .rebuild_index(&inputs)
        .await
        .map_err(|e| anyhow::anyhow!("ingestion failed: {}", e))?;

    let skipped = report.documents.iter().filter(|o| o.error.is_some()).count();
    println!("ingest --embed");
    print_outcomes(&report.documents);
    println!("  extraction skipped: {}", skipped);
    println!("  chunks: {}", report.chunks);
    println!("  embedded: {}", report.embedded);
    println!("  index dims: {}", report.dims);
    println!("ok");
    Ok(())
}

/// Run one turn against the session, streaming fragments to stdout.
async fn stream_turn(
    session: &mut Session,
    question: &str,
) -> std::result::Result<String, doc_chat::session::SessionError> {
    let mut stdout = std::io::stdout();
    let result = session
        .chat_turn(question, &mut |delta| {
            print!("{}", delta);
            stdout.flush().is_ok()
        })
        .await;

    println!();
    result
}

async fn run_ask(cfg: &Config, question: &str, files: &[PathBuf]) -> Result<()> {
    let mut session = Session::new(cfg.clone())
        .map_err(|e| anyhow::anyhow!("failed to create session: {}", e))?;

    if !files.is_empty() {
        let inputs = collect_inputs(files)?;
        let report = session
            .rebuild_index(&inputs)
            .await
            .map_err(|e| anyhow::anyhow!("ingestion failed: {}", e))?;
        let failed: Vec<&DocumentOutcome> = report
            .documents
            .iter()
            .filter(|o| o.error.is_some())
            .collect();
        for outcome in failed {
            eprintln!(
                "warning: {} skipped: {}",
                outcome.name,
                outcome.error.as_deref().unwrap_or("unknown")
            );
        }
        log::info!(
            "indexed {} chunks ({} dims) from {} file(s)",
            report.chunks,
            report.dims,
            files.len()
        );
    }

    stream_turn(&mut session, question)
        .await
        .map(|_| ())
        .map_err(|e| anyhow::anyhow!("{}", e))
}

async fn run_chat(cfg: &Config, files: &[PathBuf]) -> Result<()> {
    let mut session = Session::new(cfg.clone())
        .map_err(|e| anyhow::anyhow!("failed to create session: {}", e))?;

    if !files.is_empty() {
        let inputs = collect_inputs(files)?;
        let report = session
            .rebuild_index(&inputs)
            .await
            .map_err(|e| anyhow::anyhow!("ingestion failed: {}", e))?;
        println!(
            "indexed {} chunks from {} file(s); /reset clears, /quit exits",
            report.chunks,
            files.len()
        );
    } else {
        println!("no documents loaded; answers are ungrounded. /quit exits");
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }
        let question = line.trim();

        match question {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset();
                println!("session reset");
                continue;
            }
            _ => {}
        }

        // The session already recorded whatever the user saw; surface the
        // error and keep the loop alive.
        if let Err(e) = stream_turn(&mut session, question).await {
            eprintln!("error: {}", e);
        }
    }

    Ok(())
}
