//! CLI binary for receipt-scan.
//!
//! A thin shim over the library crate: `serve` runs the HTTP service,
//! `scan` processes one image and prints the merged JSON record.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use receipt_scan::pipeline::input::resolve_input;
use receipt_scan::{server, ReceiptProcessor, ServiceConfig};
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the web service on the default address (127.0.0.1:8000)
  receipt-scan serve

  # Listen on all interfaces with a 5 MB upload limit
  receipt-scan serve --bind 0.0.0.0:8080 --max-upload-size 5242880

  # Extract one receipt and print the JSON record
  receipt-scan scan receipt.jpg

  # Extract from a URL with a specific model
  receipt-scan scan --provider anthropic --model claude-sonnet-4-20250514 https://example.com/r.png

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY                 OpenAI API key
  ANTHROPIC_API_KEY              Anthropic API key
  GEMINI_API_KEY                 Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER         Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL                Override model ID
  RECEIPT_SCAN_BIND              Listen address for `serve`
  RECEIPT_SCAN_MEDIA_ROOT        Directory for staged uploads, barcodes and downloads
  RECEIPT_SCAN_MAX_UPLOAD_SIZE   Upload limit in bytes
  RUST_LOG                       Log filter (default: receipt_scan=info,tower_http=info)
"#;

/// Extract structured data and barcodes from receipt photos using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "receipt-scan",
    version,
    about = "Extract structured data and barcodes from receipt photos using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Suppress all logs except warnings and errors.
    #[arg(short, long, global = true, env = "RECEIPT_SCAN_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Process a single receipt image (local path or HTTP/HTTPS URL).
    Scan(ScanArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "RECEIPT_SCAN_BIND", default_value = "127.0.0.1:8000")]
    bind: SocketAddr,

    /// Public URL prefix of the media root.
    #[arg(long, default_value = "/media")]
    media_url: String,

    /// Maximum upload size in bytes.
    #[arg(long, env = "RECEIPT_SCAN_MAX_UPLOAD_SIZE", default_value_t = 10 * 1024 * 1024)]
    max_upload_size: usize,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Local image path or HTTP/HTTPS URL.
    input: String,

    /// Write the JSON record to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    model: ModelArgs,
}

/// Options shared by both subcommands.
#[derive(Args, Debug)]
struct ModelArgs {
    /// Directory for staged uploads, regenerated barcodes and saved records.
    #[arg(long, env = "RECEIPT_SCAN_MEDIA_ROOT", default_value = "media")]
    media_root: PathBuf,

    /// LLM model ID (e.g. gpt-4o, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Timeout in seconds for each of the extraction and barcode tasks.
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// LLM temperature (0.0–2.0).
    #[arg(long, default_value_t = 0.1)]
    temperature: f32,

    /// Max LLM output tokens.
    #[arg(long, default_value_t = 2048)]
    max_tokens: usize,

    /// Do not request a JSON object response from the provider.
    #[arg(long)]
    no_json_mode: bool,

    /// Path to a text file replacing the built-in extraction prompt.
    #[arg(long)]
    prompt_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "warn"
    } else {
        "receipt_scan=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Scan(args) => run_scan(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let builder = ServiceConfig::builder()
        .bind(args.bind)
        .media_url(args.media_url)
        .max_upload_size(args.max_upload_size);
    let config = apply_model_args(builder, &args.model).await?;

    server::serve(config).await.context("Server failed")
}

async fn run_scan(args: ScanArgs) -> Result<()> {
    let config = apply_model_args(ServiceConfig::builder(), &args.model).await?;
    let download_timeout = config.task_timeout_secs;
    let processor = ReceiptProcessor::from_config(config).context("Could not set up the model")?;

    let input = resolve_input(&args.input, download_timeout)
        .await
        .with_context(|| format!("Could not read {}", args.input))?;
    let processed = processor
        .process_file(input.path())
        .await
        .context("Receipt processing failed")?;

    let json = serde_json::to_string_pretty(&processed)?;
    match args.output {
        Some(path) => {
            tokio::fs::write(&path, format!("{json}\n"))
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }
    }
    Ok(())
}

/// Map the shared model flags onto the builder and validate.
async fn apply_model_args(
    builder: receipt_scan::ServiceConfigBuilder,
    args: &ModelArgs,
) -> Result<ServiceConfig> {
    let mut builder = builder
        .media_root(args.media_root.clone())
        .task_timeout_secs(args.timeout)
        .temperature(args.temperature)
        .max_tokens(args.max_tokens)
        .json_mode(!args.no_json_mode);

    if let Some(ref model) = args.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref path) = args.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}
