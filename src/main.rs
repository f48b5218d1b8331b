//! Family Cinema - IPTV viewer
//! Xtream/M3U source resolution, channel lists and live playback from the command line

// Use mimalloc for faster memory allocation (Linux, macOS)
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod catalog;
mod cli;
mod config;
mod coordinator;
mod error;
mod fetcher;
mod logging;
mod m3u_parser;
mod models;
mod player;
mod resolver;

#[cfg(test)]
mod test_server;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use config::{ConfigService, JsonFileStore, StreamSourceConfig};
use coordinator::{Command, Coordinator, CoordinatorEvent};
use fetcher::{FetchConfig, PlaylistFetcher};
use models::{default_channels, Channel};
use player::{InternalEngine, PlaybackState};
use std::time::{Duration, Instant};

fn open_config() -> ConfigService {
    let path = JsonFileStore::default_path();
    tracing::debug!(path = %path.display(), "Opening settings");
    ConfigService::new(Box::new(JsonFileStore::open(path)))
}

fn configure(service: &mut ConfigService, config: StreamSourceConfig) -> Result<()> {
    service
        .save(config)
        .context("Failed to save configuration")?;
    println!("{}", service.config().summary());
    Ok(())
}

fn show(service: &ConfigService) {
    if let Some(error) = service.last_error() {
        eprintln!("Warning: {}", error);
    }
    if !service.config().is_configured() {
        println!("No stream source configured, using the built-in channels");
        return;
    }
    println!("{}", service.config().summary());
    if service.config().config_changed {
        println!("(playlist not downloaded yet)");
    }
}

fn probe(service: &ConfigService) -> Result<()> {
    let config = service.config();
    if !config.is_configured() {
        bail!("No stream source configured. Run `iptv-viewer configure --host ...` first");
    }

    let url = resolver::resolve(config).probe_url;
    let mut fetcher = PlaylistFetcher::default();
    if fetcher.probe(&url) {
        println!("OK: {} is reachable", config.host_dns);
        Ok(())
    } else {
        bail!(
            "{} is not reachable: {}",
            config.host_dns,
            fetcher.last_error().unwrap_or("unknown error")
        )
    }
}

fn download(config: &StreamSourceConfig) -> Vec<Channel> {
    if !config.is_configured() {
        return default_channels();
    }

    let fetcher = PlaylistFetcher::default();
    let mut result = fetcher.download_channels(&resolver::resolve(config).playlist_url);
    if result.is_err() {
        if let Some(alt) = resolver::resolve_alternative(config) {
            result = fetcher.download_channels(&alt.playlist_url);
        }
    }

    result.unwrap_or_else(|e| {
        eprintln!("Warning: {}. Showing the built-in channels.", e);
        default_channels()
    })
}

fn list_channels(service: &ConfigService) {
    let channels = download(service.config());
    for channel in &channels {
        println!(
            "{:>4}  {:<40}  {:<16}  {}",
            channel.id(),
            channel.name(),
            channel.category(),
            channel.url()
        );
    }
    println!("{} channels", channels.len());
}

fn play(channel: Option<u32>, seconds: u64) -> Result<()> {
    let store = JsonFileStore::open(JsonFileStore::default_path());
    let engine = InternalEngine::new(FetchConfig::default().user_agent);
    let mut coordinator = Coordinator::new(Box::new(store), engine);
    let events = coordinator.subscribe();

    let configured = coordinator.config().is_configured();
    coordinator.start();
    if configured && !coordinator.is_busy() {
        coordinator.send(Command::Refresh);
    }

    // pick the requested channel once the catalog has settled
    let mut pending_select = channel;
    if !configured {
        if let Some(id) = pending_select.take() {
            coordinator.send(Command::Select(id));
        }
    }

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut frames = 0u64;
    while Instant::now() < deadline {
        coordinator.tick();

        for event in events.try_iter() {
            match event {
                CoordinatorEvent::CatalogReplaced { count } => {
                    println!("Loaded {} channels", count);
                    if let Some(id) = pending_select.take() {
                        coordinator.send(Command::Select(id));
                    }
                }
                CoordinatorEvent::RefreshFailed(message) => {
                    eprintln!("Playlist refresh failed: {}", message);
                    if let Some(id) = pending_select.take() {
                        coordinator.send(Command::Select(id));
                    }
                }
                CoordinatorEvent::Playback(state) => {
                    let name = coordinator
                        .session()
                        .current_channel()
                        .map(|c| c.name().to_string())
                        .unwrap_or_default();
                    println!("[{}] {}", name, state);
                }
                CoordinatorEvent::ConfigSaved { .. } | CoordinatorEvent::ProbeFinished { .. } => {}
            }
        }

        if let Some(frame) = coordinator.session().engine().and_then(|e| e.take_frame()) {
            frames += 1;
            tracing::trace!(width = frame.width, height = frame.height, pts = frame.pts, "Frame");
        }

        std::thread::sleep(Duration::from_millis(50));
    }

    if let Some(error) = coordinator.last_error() {
        eprintln!("Last error: {}", error);
    }
    let failed = matches!(coordinator.playback_state(), PlaybackState::Error(_));
    tracing::info!(frames, "Playback finished");
    coordinator.shutdown();

    if failed {
        bail!("Playback ended in an error state");
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose);

    match cli.command {
        Commands::Configure {
            host,
            username,
            password,
            port,
            format,
            alt_dns,
            update_interval,
            no_auto_reconnect,
            no_hw_accel,
        } => {
            let mut service = open_config();
            let config = StreamSourceConfig {
                host_dns: host,
                username,
                password,
                port,
                alternative_dns: alt_dns,
                playlist_format: format,
                update_interval,
                auto_reconnect: !no_auto_reconnect,
                hardware_acceleration: !no_hw_accel,
                ..Default::default()
            };
            configure(&mut service, config)
        }
        Commands::Show => {
            show(&open_config());
            Ok(())
        }
        Commands::Clear => {
            open_config()
                .clear()
                .context("Failed to clear configuration")?;
            println!("Configuration cleared");
            Ok(())
        }
        Commands::Probe => probe(&open_config()),
        Commands::Channels => {
            list_channels(&open_config());
            Ok(())
        }
        Commands::Play { channel, seconds } => play(channel, seconds),
    }
}
