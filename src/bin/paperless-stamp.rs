//! CLI binary for paperless-stamp.
//!
//! A thin shim over the library crate: maps flags and environment onto
//! `WorkerConfig` and runs the worker or one of the local tools.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use paperless_stamp::client::uploader_for;
use paperless_stamp::pipeline::{merge, render};
use paperless_stamp::worker::{build_stamp_specs, extract_stamp_types};
use paperless_stamp::{
    run_until, stamp_pdf, DocumentStore, PageSize, PaperlessClient, StampSpec, StampWorker, WorkerConfig,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the worker (polls every STAMP_POLL_INTERVAL seconds)
  PAPERLESS_URL=http://paperless:8000 PAPERLESS_TOKEN=... paperless-stamp run

  # One cycle, then exit
  paperless-stamp run --once

  # Check connectivity and list what would be stamped
  paperless-stamp check

  # Dry run for one document
  paperless-stamp inspect 42

  # Stamp a local file
  paperless-stamp stamp invoice.pdf invoice-stamped.pdf --text PAID --date 2024-03-15

  # PAID + RECEIVED stacked on a generated sample
  paperless-stamp sample sample.pdf --page-size letter
  paperless-stamp stamp sample.pdf demo.pdf --demo --doc-id 42

TAGS:
  stamp:<type>     trigger, e.g. stamp:paid, stamp:received
  stamped:<type>   added after a successful stamp
  stamp:error      added when stamping fails (a note explains why)

ENVIRONMENT VARIABLES:
  PAPERLESS_URL                  Paperless-ngx base URL (required)
  PAPERLESS_TOKEN                API token (required)
  PAPERLESS_TIMEOUT              HTTP timeout in seconds (default 30)
  PAPERLESS_VERSION_ENDPOINT     Upload endpoint template with {id}
  STAMP_POLL_INTERVAL            Seconds between polls (default 60)
  STAMP_DEFAULT_COLOR            Fallback stamp color (default #003399)
  STAMP_COLOR_<TYPE>             Per-type color, e.g. STAMP_COLOR_PAID
  STAMP_TEXT_<TYPE>              Per-type text
  STAMP_DATE_FIELD_<TYPE>        Custom field holding the stamp date
  STAMP_RECEIVED_DATE_FALLBACK   "created" (default) or anything else to disable
  RUST_LOG                       Overrides --verbose / --quiet
"#;

/// Tag-driven PAID / RECEIVED stamps for Paperless-ngx.
#[derive(Parser, Debug)]
#[command(
    name = "paperless-stamp",
    version,
    about = "Apply ink-style stamps to Paperless-ngx documents, driven by tags",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "STAMP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "STAMP_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the store and stamp tagged documents.
    Run {
        #[command(flatten)]
        store: StoreArgs,

        /// Run a single poll cycle and exit.
        #[arg(long)]
        once: bool,
    },

    /// Verify connectivity and report what the next cycle would see.
    Check {
        #[command(flatten)]
        store: StoreArgs,
    },

    /// Show the stamps a document would get, without changing it.
    Inspect {
        #[command(flatten)]
        store: StoreArgs,

        /// Document id.
        document_id: u64,
    },

    /// Stamp a local PDF file.
    Stamp {
        input: PathBuf,
        output: PathBuf,

        /// Stamp text (upper-cased).
        #[arg(long, default_value = "PAID")]
        text: String,

        /// Date line under the text.
        #[arg(long)]
        date: Option<String>,

        /// Hex stamp color.
        #[arg(long, default_value = "#003399")]
        color: String,

        /// Document id seeding tilt and jitter.
        #[arg(long, default_value_t = 1)]
        doc_id: u64,

        /// Stack a dated PAID and a red RECEIVED stamp.
        #[arg(long)]
        demo: bool,
    },

    /// Write a plain sample PDF to stamp.
    Sample {
        output: PathBuf,

        #[arg(long, value_enum, default_value = "a4")]
        page_size: PageSizeArg,

        /// Number of pages.
        #[arg(long, default_value_t = 1)]
        pages: usize,
    },
}

/// Store connection options. Anything not given falls back to the environment.
#[derive(Args, Debug)]
struct StoreArgs {
    /// Paperless-ngx base URL.
    #[arg(long, env = "PAPERLESS_URL")]
    url: Option<String>,

    /// API token.
    #[arg(long, env = "PAPERLESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Seconds between poll cycles.
    #[arg(long, env = "STAMP_POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// HTTP timeout in seconds.
    #[arg(long, env = "PAPERLESS_TIMEOUT")]
    timeout: Option<u64>,
}

impl StoreArgs {
    fn load_config(&self) -> Result<WorkerConfig> {
        let mut overrides: HashMap<&str, String> = HashMap::new();
        if let Some(ref url) = self.url {
            overrides.insert("PAPERLESS_URL", url.clone());
        }
        if let Some(ref token) = self.token {
            overrides.insert("PAPERLESS_TOKEN", token.clone());
        }
        if let Some(secs) = self.poll_interval {
            overrides.insert("STAMP_POLL_INTERVAL", secs.to_string());
        }
        if let Some(secs) = self.timeout {
            overrides.insert("PAPERLESS_TIMEOUT", secs.to_string());
        }

        WorkerConfig::from_lookup(|key| overrides.get(key).cloned().or_else(|| std::env::var(key).ok()))
            .context("Configuration error")
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PageSizeArg {
    A4,
    Letter,
}

impl From<PageSizeArg> for PageSize {
    fn from(v: PageSizeArg) -> Self {
        match v {
            PageSizeArg::A4 => PageSize::A4,
            PageSizeArg::Letter => PageSize::Letter,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Run { store, once } => run(&store, once).await,
        Command::Check { store } => check(&store).await,
        Command::Inspect { store, document_id } => inspect(&store, document_id).await,
        Command::Stamp {
            input,
            output,
            text,
            date,
            color,
            doc_id,
            demo,
        } => {
            let stamps = if demo {
                vec![
                    StampSpec::new("PAID", doc_id).with_date("2024-03-15").with_color("#003399"),
                    StampSpec::new("RECEIVED", doc_id).with_color("#990000"),
                ]
            } else {
                vec![StampSpec::new(&text, doc_id).with_optional_date(date).with_color(color)]
            };
            stamp_file(&input, &output, &stamps).await
        }
        Command::Sample {
            output,
            page_size,
            pages,
        } => {
            let (width, height) = PageSize::from(page_size).dimensions();
            let bytes = render::sample_document(width, height, pages).context("Failed to build sample PDF")?;
            tokio::fs::write(&output, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", output.display()))?;
            println!("Sample: {} ({:.0} x {:.0} pt, {} page(s))", output.display(), width, height, pages);
            Ok(())
        }
    }
}

async fn run(args: &StoreArgs, once: bool) -> Result<()> {
    let config = args.load_config()?;
    let client = PaperlessClient::from_config(&config).context("Failed to create Paperless client")?;
    let uploader = uploader_for(&config, &client);
    if config.version_endpoint.is_none() {
        warn!("PAPERLESS_VERSION_ENDPOINT is not set; every upload will fail and mark documents stamp:error");
    }
    let store: Arc<dyn DocumentStore> = Arc::new(client);

    if once {
        let mut worker = StampWorker::new(config, store, uploader);
        let results = worker.poll_once().await.context("Poll cycle failed")?;
        for r in &results {
            match r.error_message {
                None => println!("✓ {} [{}] {}", r.document_id, r.stamp_type, r.document_title),
                Some(ref e) => println!("✗ {} [{}] {}: {}", r.document_id, r.stamp_type, r.document_title, e),
            }
        }
        return Ok(());
    }

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested, finishing current cycle"),
            Err(e) => {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    run_until(config, store, uploader, shutdown).await;
    Ok(())
}

async fn check(args: &StoreArgs) -> Result<()> {
    let config = args.load_config()?;
    let client = PaperlessClient::from_config(&config).context("Failed to create Paperless client")?;

    println!("Paperless:    {}", client.base_url());
    let tags = client.tags().await.context("Failed to list tags")?;
    println!("Tags:         {}", tags.len());
    for tag in tags.iter().filter(|t| t.name.to_lowercase().starts_with("stamp")) {
        println!("  {:>6}  {}", tag.id, tag.name);
    }
    let fields = client.custom_fields().await.context("Failed to list custom fields")?;
    println!("Fields:       {}", fields.len());
    for field in &fields {
        println!(
            "  {:>6}  {} ({})",
            field.id,
            field.name,
            field.data_type.as_deref().unwrap_or("?")
        );
    }
    let documents = client
        .stampable_documents()
        .await
        .context("Failed to discover documents")?;
    println!("Stampable:    {}", documents.len());
    for doc in &documents {
        println!("  {:>6}  {}", doc.id, doc.display_title());
    }
    Ok(())
}

async fn inspect(args: &StoreArgs, document_id: u64) -> Result<()> {
    let config = args.load_config()?;
    let client = PaperlessClient::from_config(&config).context("Failed to create Paperless client")?;
    let store: Arc<dyn DocumentStore> = Arc::new(client.clone());
    let uploader = uploader_for(&config, &client);

    let mut worker = StampWorker::new(config, store.clone(), uploader);
    worker.refresh().await.context("Failed to load tags and custom fields")?;
    let document = store
        .document(document_id)
        .await
        .with_context(|| format!("Failed to fetch document {document_id}"))?;

    println!("Document:     {} ({})", document.id, document.display_title());
    let types = extract_stamp_types(&document, worker.tag_resolver());
    if types.is_empty() {
        println!("Stamps:       none (no stamp:<type> tags)");
        return Ok(());
    }
    let specs = build_stamp_specs(&document, &types, worker.config(), worker.field_resolver());
    for (stamp_type, spec) in types.iter().zip(&specs) {
        println!(
            "  {:<10} text={} color={} date={}",
            stamp_type,
            spec.text(),
            spec.color(),
            spec.date().unwrap_or("-")
        );
    }
    Ok(())
}

async fn stamp_file(input: &Path, output: &Path, stamps: &[StampSpec]) -> Result<()> {
    if !input.exists() {
        bail!("{} not found", input.display());
    }
    let original = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let (width, height) = merge::page1_dimensions(&original).context("Cannot read page 1")?;
    println!("Input:  {} ({:.0} x {:.0} pt)", input.display(), width, height);
    for s in stamps {
        println!(
            "Stamp:  text={}, color={}{}, doc_id={}",
            s.text(),
            s.color(),
            s.date().map(|d| format!(", date={d}")).unwrap_or_default(),
            s.document_id()
        );
    }

    let owned = stamps.to_vec();
    let stamped = tokio::task::spawn_blocking(move || stamp_pdf(&original, &owned))
        .await
        .context("Stamping task failed")?
        .context("Stamping failed")?;
    tokio::fs::write(output, &stamped)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Output: {} ({} bytes)", output.display(), stamped.len());
    Ok(())
}
