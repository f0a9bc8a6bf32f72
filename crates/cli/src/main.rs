use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use generation::{
    catalog, ClientConfig, GenerationClient, GenerationKind, GenerationParams, HttpBackend,
    RequestEvent, RequestStatus,
};
use history::HistoryDb;
use settings::{Settings, SettingsStore};

#[derive(Parser)]
#[command(name = "velqis")]
#[command(about = "Velqis AI Creative Tools - generate videos, images and music from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a video from a text prompt
    #[command(visible_alias = "gv")]
    GenerateVideo {
        /// Video generation prompt
        #[arg(short, long)]
        prompt: String,

        /// Input image for image-to-video generation
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Video duration in seconds (3, 5, 10, 15, 30)
        #[arg(short, long)]
        duration: Option<u32>,

        /// AI model to use
        #[arg(short, long)]
        model: Option<String>,

        /// Resolution preset (720p, 1080p, 4K)
        #[arg(short, long)]
        resolution: Option<String>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate images from a text prompt
    #[command(visible_alias = "gi")]
    GenerateImage {
        /// Image generation prompt
        #[arg(short, long)]
        prompt: String,

        /// Number of image variations (1-4)
        #[arg(short = 'n', long)]
        variations: Option<u32>,

        /// AI model to use
        #[arg(short, long)]
        model: Option<String>,

        /// Resolution preset (Square, Portrait, Landscape, Wide)
        #[arg(short, long)]
        resolution: Option<String>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate music from a text prompt
    #[command(visible_alias = "gm")]
    GenerateMusic {
        /// Music generation prompt
        #[arg(short, long)]
        prompt: String,

        /// Music duration in seconds (10-180)
        #[arg(short, long)]
        duration: Option<u32>,

        /// AI model to use
        #[arg(short, long)]
        model: Option<String>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show generation history
    History {
        /// Filter by type (video, image, music)
        #[arg(short = 't', long = "type")]
        kind: Option<String>,

        /// Limit results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show remote API availability
    Status,

    /// Manage configuration settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Initial setup: store the API key and endpoint
    Setup {
        /// Velqis API key
        #[arg(long)]
        api_key: String,

        /// API endpoint override
        #[arg(long)]
        endpoint: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current configuration
    Show,

    /// Set a configuration key (value parsed as JSON, else stored as text)
    Set { key: String, value: String },

    /// Print the settings file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::GenerateVideo {
            prompt,
            image,
            duration,
            model,
            resolution,
            output,
        } => {
            let mut params = GenerationParams::new();
            params.duration_secs = duration;
            params.model = model;
            params.resolution = resolution;
            params.source_image = image;
            generate_command(GenerationKind::Video, prompt, params, output).await
        }
        Commands::GenerateImage {
            prompt,
            variations,
            model,
            resolution,
            output,
        } => {
            if let Some(n) = variations {
                if n == 0 || n > catalog::MAX_IMAGE_VARIATIONS {
                    bail!(
                        "variations must be between 1 and {}",
                        catalog::MAX_IMAGE_VARIATIONS
                    );
                }
            }
            let mut params = GenerationParams::new();
            params.variations = variations;
            params.model = model;
            params.resolution = resolution;
            generate_command(GenerationKind::Image, prompt, params, output).await
        }
        Commands::GenerateMusic {
            prompt,
            duration,
            model,
            output,
        } => {
            let mut params = GenerationParams::new();
            params.duration_secs = duration;
            params.model = model;
            generate_command(GenerationKind::Music, prompt, params, output).await
        }
        Commands::History { kind, limit } => history_command(kind, limit).await,
        Commands::Status => status_command().await,
        Commands::Config { action } => config_command(action),
        Commands::Setup { api_key, endpoint } => setup_command(api_key, endpoint),
    }
}

/// Fill unset parameters from the settings store and catalog defaults.
fn apply_defaults(kind: GenerationKind, params: &mut GenerationParams, settings: &Settings) {
    if params.model.is_none() {
        params.model = Some(match kind {
            GenerationKind::Video => settings.default_models.video.clone(),
            GenerationKind::Image => settings.default_models.image.clone(),
            GenerationKind::Music => settings.default_models.music.clone(),
        });
    }
    if params.resolution.is_none() {
        params.resolution = match kind {
            GenerationKind::Video => Some(settings.default_resolutions.video.clone()),
            GenerationKind::Image => Some(settings.default_resolutions.image.clone()),
            GenerationKind::Music => None,
        };
    }
    if params.duration_secs.is_none() {
        params.duration_secs = match kind {
            GenerationKind::Video => Some(5),
            GenerationKind::Music => Some(30),
            GenerationKind::Image => None,
        };
    }

    if let Some(duration) = params.duration_secs {
        let presets: &[u32] = match kind {
            GenerationKind::Video => catalog::VIDEO_DURATIONS,
            GenerationKind::Music => catalog::MUSIC_DURATIONS,
            GenerationKind::Image => &[],
        };
        if !presets.is_empty() && !presets.contains(&duration) {
            warn!(
                "non-standard {} duration: {}s (presets: {:?})",
                kind, duration, presets
            );
        }
    }
}

async fn generate_command(
    kind: GenerationKind,
    prompt: String,
    mut params: GenerationParams,
    output: Option<PathBuf>,
) -> Result<()> {
    let store = SettingsStore::open_default()?;
    let settings = store.settings();
    apply_defaults(kind, &mut params, &settings);

    let model = params.model.clone().unwrap_or_default();
    match catalog::model_display_name(kind, &model) {
        Some(name) => info!("Generating {} with {}", kind, name),
        None => info!("Generating {} with model '{}'", kind, model),
    }
    if let Some(name) = &params.resolution {
        if let Some(res) = catalog::resolution(kind, name) {
            info!("Resolution: {} ({}x{})", name, res.width, res.height);
        }
    }

    let backend = Arc::new(HttpBackend::new(&settings.api_endpoint, &settings.api_key));
    let config = ClientConfig::default().with_max_concurrent(settings.max_concurrent);
    let client = GenerationClient::new(config, backend.clone());

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<RequestEvent>();
    let _subscription = client.subscribe(move |event| {
        let _ = tx.send(event.clone());
    });

    let request = client
        .submit_request(kind, &prompt, params)
        .map_err(|e| anyhow!("{}", e))?;
    info!("Submitted {} request {}", kind, request.id);

    let history_db = if settings.save_history {
        let db = HistoryDb::open_or_create(&history::default_history_path())?;
        db.record(&request)?;
        Some(db)
    } else {
        None
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("waiting for the remote service...");

    let terminal = loop {
        let event = rx
            .recv()
            .await
            .ok_or_else(|| anyhow!("event stream closed before completion"))?;
        if event.id != request.id {
            continue;
        }
        spinner.set_message(format!("status: {}", event.status));
        if event.status.is_terminal() {
            break event;
        }
    };
    spinner.finish_and_clear();

    if let Some(db) = &history_db {
        db.finish(&terminal.request)?;
    }

    match terminal.status {
        RequestStatus::Succeeded => {
            let result_ref = terminal.request.result_ref.clone().unwrap_or_default();
            let output_dir = output.unwrap_or(settings.output_dir.clone());
            if result_ref.starts_with("http://") || result_ref.starts_with("https://") {
                let dest = artifact_path(&output_dir, kind, &request.id.to_string(), &result_ref);
                backend
                    .download(&result_ref, &dest)
                    .await
                    .map_err(|e| anyhow!("download failed: {}", e))?;
                info!("Saved to {}", dest.display());
                println!("{}", dest.display());
            } else {
                println!("{}", result_ref);
            }
            Ok(())
        }
        RequestStatus::Cancelled => Err(anyhow!("generation was cancelled")),
        _ => {
            let detail = terminal
                .request
                .error_detail
                .as_ref()
                .map(|d| d.message.clone())
                .unwrap_or_else(|| "unknown error".to_string());
            Err(anyhow!("generation failed: {}", detail))
        }
    }
}

/// Local artifact path: output dir, kind, short request id, and the
/// extension carried by the result URL (or the kind's default).
fn artifact_path(output_dir: &Path, kind: GenerationKind, id: &str, url: &str) -> PathBuf {
    let short_id: String = id.chars().take(8).collect();
    let ext = url_extension(url).unwrap_or_else(|| catalog::default_extension(kind).to_string());
    output_dir.join(format!("{}-{}.{}", kind, short_id, ext))
}

fn url_extension(url: &str) -> Option<String> {
    let file = url.split('?').next()?.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    if !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext.to_ascii_lowercase())
    } else {
        None
    }
}

async fn history_command(kind: Option<String>, limit: usize) -> Result<()> {
    let kind = match kind {
        Some(raw) => Some(raw.parse::<GenerationKind>().map_err(|e| anyhow!("{}", e))?),
        None => None,
    };

    let db = HistoryDb::open_or_create(&history::default_history_path())?;
    let rows = db.list(kind, limit)?;
    if rows.is_empty() {
        println!("No generation history yet.");
        return Ok(());
    }

    for row in rows {
        let when = chrono::DateTime::from_timestamp(row.created_at, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let mut line = format!("{}  {:<6} {:<9} {}", when, row.kind, row.status, row.prompt);
        if let Some(result) = &row.result_ref {
            line.push_str(&format!("  -> {}", result));
        }
        if let Some(error) = &row.error {
            line.push_str(&format!("  ({})", error));
        }
        println!("{}", line);
    }
    Ok(())
}

async fn status_command() -> Result<()> {
    use generation::GenerationBackend;

    let store = SettingsStore::open_default()?;
    let settings = store.settings();
    let backend = HttpBackend::new(&settings.api_endpoint, &settings.api_key);

    if backend.is_available().await {
        println!("{}: {} is reachable", backend.name(), settings.api_endpoint);
        Ok(())
    } else {
        Err(anyhow!(
            "{} is not reachable (check endpoint and API key with 'velqis config show')",
            settings.api_endpoint
        ))
    }
}

fn config_command(action: ConfigAction) -> Result<()> {
    let store = SettingsStore::open_default()?;
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(&store.settings())?);
        }
        ConfigAction::Set { key, value } => {
            let parsed: serde_json::Value =
                serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            store.set(&key, parsed)?;
            info!("Updated {}", key);
        }
        ConfigAction::Path => {
            println!("{}", store.path().display());
        }
    }
    Ok(())
}

fn setup_command(api_key: String, endpoint: Option<String>) -> Result<()> {
    let store = SettingsStore::open_default()?;
    store.set("api_key", api_key)?;
    if let Some(endpoint) = endpoint {
        store.set("api_endpoint", endpoint)?;
    }
    info!("Configuration saved to {}", store.path().display());
    println!("Setup complete. Try: velqis generate-image -p \"a watercolor lighthouse\"");
    Ok(())
}
