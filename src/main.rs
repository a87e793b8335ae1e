use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use clap::Parser;

use screen_translator_rust::server::{ServerState, run_server};
use screen_translator_rust::{Cancellation, Config, build_pipeline, settings};

#[derive(Parser, Debug)]
#[command(
    name = "screen-translator-rust",
    version,
    about = "Translate the text in screenshots and paint the translation over the original"
)]
struct Cli {
    /// Image file to translate
    #[arg(short = 'd', long = "data")]
    data: Option<String>,

    /// Output path (default: <stem>.translated.<ext>)
    #[arg(short = 'o', long = "out")]
    out: Option<String>,

    /// Start the HTTP server on this address (e.g. 127.0.0.1:5000)
    #[arg(long = "server", num_args = 0..=1, default_missing_value = "")]
    server: Option<String>,

    /// Target language (default: en)
    #[arg(short = 'l', long = "lang", default_value = "en")]
    lang: String,

    /// Source language. Use "auto" to detect.
    #[arg(short = 'L', long = "source-lang", default_value = "auto")]
    source_lang: String,

    /// Model name or provider:model (e.g. openai:MODEL_ID)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Minimum recognition confidence, 0 to 1
    #[arg(long = "min-confidence")]
    min_confidence: Option<f32>,

    /// Keep low-confidence text elements
    #[arg(long = "no-confidence-filter")]
    no_confidence_filter: bool,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    screen_translator_rust::logging::init(cli.verbose)?;

    if let Some(addr) = cli.server.as_deref() {
        return serve(&cli, addr).await;
    }

    let data = cli
        .data
        .as_deref()
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("--data <image> or --server is required"))?;

    let config = Config {
        lang: cli.lang,
        source_lang: Some(cli.source_lang),
        model: cli.model,
        key: cli.key,
        min_confidence: cli.min_confidence,
        no_confidence_filter: cli.no_confidence_filter,
        settings_path: cli.read_settings,
    };

    let (handle, cancel) = Cancellation::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling...");
            handle.cancel();
        }
    });

    let output =
        screen_translator_rust::run(config, &data, cli.out.map(PathBuf::from), &cancel).await?;
    println!("{}", output);
    Ok(())
}

async fn serve(cli: &Cli, addr: &str) -> Result<()> {
    let settings_path = cli.read_settings.as_deref().map(Path::new);
    let settings = settings::load_settings(settings_path)?;
    let pipeline = build_pipeline(&settings, cli.model.as_deref(), cli.key.as_deref())?;
    let addr = if addr.trim().is_empty() {
        settings.server_addr.clone()
    } else {
        addr.trim().to_string()
    };
    let state = ServerState::new(pipeline, settings.pipeline.clone())
        .with_body_limit(settings.max_body_bytes);
    run_server(state, addr).await
}
