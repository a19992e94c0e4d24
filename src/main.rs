use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tab_audio_recorder::panel::PermissionOutcome;
use tab_audio_recorder::platform::TabAudio;
use tab_audio_recorder::{create_router, App, AppState, AudioFile, Config, PanelAction};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tab-audio-recorder", version, about = "Record a tab's audio, optionally mixed with the microphone")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(long, default_value = "config/tab-audio-recorder")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control server
    Serve,
    /// Record one tab for a fixed duration
    Record {
        /// URL of the tab to open and record
        #[arg(long, default_value = "https://example.com")]
        url: String,
        /// Play this WAV file in the tab instead of a test tone
        #[arg(long)]
        tab_file: Option<PathBuf>,
        /// Mix in the microphone (requires a stored grant)
        #[arg(long)]
        microphone: bool,
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// Grant microphone permission through the settings surface
    GrantMicrophone,
    /// Print the format and duration of a recorded WAV file
    Inspect { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Tab Audio Recorder v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Serve => serve(&cfg).await,
        Command::Record {
            url,
            tab_file,
            microphone,
            seconds,
        } => record(&cfg, url, tab_file, microphone, seconds).await,
        Command::GrantMicrophone => grant_microphone(&cfg).await,
        Command::Inspect { path } => inspect(&path),
    }
}

async fn serve(cfg: &Config) -> Result<()> {
    let app = App::build(cfg).await?;
    let state = AppState::new(app.coordinator.clone(), app.browser.clone(), app.settings());
    let router = create_router(state);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    Ok(())
}

async fn record(
    cfg: &Config,
    url: String,
    tab_file: Option<PathBuf>,
    microphone: bool,
    seconds: u64,
) -> Result<()> {
    let app = App::build(cfg).await?;

    let tab = match tab_file {
        Some(path) => {
            let file = AudioFile::open(&path)?;
            app.browser.open_tab_with_audio(url, TabAudio::File(Arc::new(file)))
        }
        None => app.browser.open_tab(url),
    };

    let mut panel = app.panel().await;
    if panel.toggle_microphone(microphone).await == PanelAction::OpenSettings {
        bail!("Microphone permission not granted. Run `grant-microphone` first.");
    }

    match panel.click_start(app.browser.tab(&tab)).await {
        Some(response) if response.success => info!("{}", panel.view().status_text),
        _ => bail!("Could not start recording: {}", panel.view().status_text),
    }

    tokio::time::sleep(Duration::from_secs(seconds)).await;

    if panel.click_stop().await.is_none() {
        warn!("Recording ended before stop: {}", panel.view().status_text);
    }

    // Wait for the worker to finish saving
    while panel.view().busy {
        if panel.next_update().await.is_none() {
            break;
        }
    }
    info!("{}", panel.view().status_text);

    drop(panel);
    app.shutdown().await
}

async fn grant_microphone(cfg: &Config) -> Result<()> {
    let app = App::build(cfg).await?;

    match app.settings().request_microphone().await {
        PermissionOutcome::Granted => info!("Microphone permission granted"),
        PermissionOutcome::Denied { message } => warn!("{}", message),
    }

    app.shutdown().await
}

fn inspect(path: &Path) -> Result<()> {
    let audio = AudioFile::open(path)?;

    info!("Duration: {:.1} seconds", audio.duration_seconds);
    info!("Sample rate: {} Hz", audio.sample_rate);
    info!("Channels: {}", audio.channels);
    Ok(())
}
