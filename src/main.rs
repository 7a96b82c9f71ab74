//! # notes-rag CLI (`rag`)
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag normalize` | Convert the vault (`.md`, `.markdown`, `.pdf`, `.txt`) into the text mirror |
//! | `rag ingest` | Chunk, embed, and index the normalized notes |
//! | `rag search "<question>"` | Show the chunks closest to a question |
//! | `rag ask "<question>"` | Answer a question from the notes |
//! | `rag serve` | Start the HTTP server |
//!
//! The config file is optional; every setting has a default and can be
//! overridden from the environment (see `config/rag.example.toml`). A `.env`
//! file in the working directory is loaded first, without overriding
//! variables that are already set.

use clap::{Parser, Subcommand};
use notes_rag::config;
use notes_rag::pipeline::RagPipeline;
use notes_rag::server;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Ask questions about your notes.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "Retrieval-augmented question answering over a personal notes vault",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert source notes to plain text.
    Normalize,

    /// Chunk, embed, and index the normalized notes.
    Ingest {
        /// Normalize the vault first.
        #[arg(long)]
        normalize: bool,

        /// Keep existing entries instead of replacing the namespace.
        #[arg(long)]
        append: bool,
    },

    /// Show the chunks most similar to a question.
    Search {
        question: String,

        /// Number of chunks to return (defaults to `retrieval.k`).
        #[arg(long)]
        k: Option<i64>,
    },

    /// Answer a question from the notes.
    Ask { question: String },

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A `.env` in the working directory fills in unset variables
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("notes_rag=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Normalize => {
            let pipeline = RagPipeline::from_config(&cfg)?;
            let report = pipeline.normalize().await?;
            print_normalize_report(&report);
        }
        Commands::Ingest { normalize, append } => {
            if append {
                cfg.ingest.rebuild = false;
            }
            let pipeline = RagPipeline::from_config(&cfg)?;
            if normalize {
                let report = pipeline.normalize().await?;
                print_normalize_report(&report);
            }
            let report = pipeline.ingest().await?;
            println!("Ingestion complete:");
            println!("  documents: {}", report.documents);
            println!("  chunks: {}", report.chunks);
            println!("  entries: {}", report.entries);
            println!("  cleared: {}", report.cleared);
        }
        Commands::Search { question, k } => {
            let pipeline = RagPipeline::from_config(&cfg)?;
            let k = k.unwrap_or(cfg.retrieval.k);
            let results = pipeline.retrieve(&question, k).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (i, r) in results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} #{}",
                    i + 1,
                    r.similarity_score,
                    r.metadata.owner_document,
                    r.metadata.sequence_index
                );
                println!("    {}", snippet(&r.chunk_text, 200));
            }
        }
        Commands::Ask { question } => {
            let pipeline = RagPipeline::from_config(&cfg)?;
            let result = pipeline.ask(&question).await?;
            println!("{}", result.answer);
            if !result.source_chunks.is_empty() {
                println!();
                println!("Sources:");
                for r in &result.source_chunks {
                    println!(
                        "  - {} #{} ({:.3})",
                        r.metadata.owner_document, r.metadata.sequence_index, r.similarity_score
                    );
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn print_normalize_report(report: &notes_rag::normalize::NormalizeReport) {
    println!("Normalization complete:");
    println!("  files converted: {}", report.files_converted);
    println!("  markdown: {}", report.markdown);
    println!("  pdf: {}", report.pdf);
    println!("  text: {}", report.text);
    println!("  failed: {}", report.failures.len());
    for failure in &report.failures {
        println!("    {}", failure);
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
