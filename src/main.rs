//! # QA Harness CLI (`qa`)
//!
//! Ingest product documentation, retrieve evidence, and generate grounded
//! test cases and Selenium scripts from it.
//!
//! ## Usage
//!
//! ```bash
//! qa --config ./config/qa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `qa init` | Create the SQLite database and run schema migrations |
//! | `qa ingest <paths>` | Parse, chunk and embed files or directories |
//! | `qa query "<text>"` | Show the chunks retrieved for a question |
//! | `qa generate "<request>"` | Generate grounded test cases |
//! | `qa script --cases <file> --id <TC-xxx>` | Generate a Selenium script for one case |
//! | `qa stats` | Knowledge-base counters |
//! | `qa rebuild` | Clear the configured namespace |
//! | `qa serve` | Start the JSON HTTP server |
//!
//! Logs go to stderr and are controlled with `RUST_LOG` (default `warn`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use qa_harness::{cases, config, db, ingest, migrate, query, server, stats};

#[derive(Parser)]
#[command(
    name = "qa",
    about = "QA Harness: documentation-grounded test case and Selenium script generation",
    version,
    long_about = "QA Harness ingests product documentation (Markdown, text, JSON, PDF, HTML, DOCX) \
    into a local vector index, retrieves evidence for a request, and asks a language model for \
    test cases and Selenium scripts that are checked against that evidence and the target page."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/qa.toml`. See `config/qa.example.toml`.
    #[arg(long, global = true, default_value = "./config/qa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest files or directories into the knowledge base.
    ///
    /// Directories are walked recursively for md, txt, json, pdf, html,
    /// htm and docx files. Re-ingesting a file replaces its previous version.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Retrieve the chunks most similar to a question.
    Query {
        text: String,

        /// Number of chunks to return (1-50). Defaults to `[retrieval].default_k`.
        #[arg(long)]
        k: Option<usize>,
    },

    /// Generate test cases grounded in the retrieved documentation.
    Generate {
        /// What to test, e.g. "discount code validation".
        request: String,

        /// Number of chunks to retrieve as evidence.
        #[arg(long)]
        chunks: Option<usize>,

        /// Write the result as JSON instead of printing the cases.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Generate a Selenium script for one test case.
    Script {
        /// JSON file written by `qa generate --out`.
        #[arg(long)]
        cases: PathBuf,

        /// Test case id, e.g. TC-001.
        #[arg(long)]
        id: String,

        /// Target page. Defaults to the most recently ingested HTML document.
        #[arg(long)]
        html: Option<PathBuf>,

        /// Write the script here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show knowledge-base counters.
    Stats,

    /// Discard every document, chunk and vector in the namespace.
    Rebuild,

    /// Start the JSON HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { paths } => {
            ingest::run_ingest(&cfg, &paths).await?;
        }
        Commands::Query { text, k } => {
            query::run_query(&cfg, &text, k).await?;
        }
        Commands::Generate {
            request,
            chunks,
            out,
        } => {
            cases::run_generate(&cfg, &request, chunks, out.as_deref()).await?;
        }
        Commands::Script {
            cases: cases_path,
            id,
            html,
            out,
        } => {
            cases::run_script(&cfg, &cases_path, &id, html.as_deref(), out.as_deref()).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Rebuild => {
            ingest::run_rebuild(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
