//! Coordination loop tying config, playlist download, catalog and playback together
//!
//! All state lives on the thread that calls [`Coordinator::tick`]. Network work
//! runs on spawned threads and comes back as [`TaskResult`]s; front ends talk
//! to the loop through [`Command`]s.

use crate::catalog::ChannelCatalog;
use crate::config::{ConfigEvent, ConfigService, ConfigStore, StreamSourceConfig};
use crate::error::PipelineError;
use crate::fetcher::{FetchConfig, PlaylistFetcher};
use crate::models::Channel;
use crate::player::{is_valid_stream_url, MediaEngine, PlaybackSession, PlaybackState};
use crate::resolver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Requests a front end can queue for the coordination loop
#[derive(Debug, Clone)]
pub enum Command {
    SaveConfig(StreamSourceConfig),
    Refresh,
    Select(u32),
    Next,
    TogglePlayPause,
    ToggleMute,
    Stop,
    Probe,
}

/// Cloneable handle for queueing commands from other threads
#[derive(Clone)]
pub struct CommandSender(Sender<Command>);

impl CommandSender {
    /// False once the coordinator is gone
    pub fn send(&self, command: Command) -> bool {
        self.0.send(command).is_ok()
    }
}

/// Results sent back from background threads
enum TaskResult {
    PlaylistLoaded {
        revision: u64,
        result: Result<Vec<Channel>, PipelineError>,
    },
    ProbeFinished {
        ok: bool,
        error: Option<String>,
    },
}

/// Notifications for front ends, sent after each committed change
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    ConfigSaved { revision: u64 },
    CatalogReplaced { count: usize },
    RefreshFailed(String),
    Playback(PlaybackState),
    ProbeFinished { ok: bool, error: Option<String> },
}

/// Download in-flight flag
#[derive(Debug, Clone, Default)]
pub struct BusyFlag(Arc<AtomicBool>);

impl BusyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another guard is alive
    pub fn try_acquire(&self) -> Option<BusyGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(Arc::clone(&self.0)))
    }

    pub fn is_busy(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Clears the flag on drop, including on panic unwind
#[derive(Debug)]
pub struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Tunables for the coordination loop
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub fetch: FetchConfig,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    /// Length of one `update_interval` unit
    pub refresh_unit: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: 3,
            refresh_unit: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct Reconnect {
    attempts: u32,
    due: Option<Instant>,
}

pub struct Coordinator<E: MediaEngine> {
    config: ConfigService,
    config_events: Receiver<ConfigEvent>,
    catalog: ChannelCatalog,
    session: PlaybackSession<E>,
    playback_events: Receiver<PlaybackState>,
    observed_state: PlaybackState,
    fetcher: PlaylistFetcher,
    options: CoordinatorOptions,

    command_sender: Sender<Command>,
    command_receiver: Receiver<Command>,
    task_sender: Sender<TaskResult>,
    task_receiver: Receiver<TaskResult>,

    busy: BusyFlag,
    refresh_pending: bool,
    next_refresh: Option<Instant>,
    reconnect: Reconnect,
    last_error: Option<String>,
    last_probe: Option<bool>,
    observers: Vec<Sender<CoordinatorEvent>>,
}

impl<E: MediaEngine> Coordinator<E> {
    pub fn new(store: Box<dyn ConfigStore>, engine: E) -> Self {
        Self::with_options(store, engine, CoordinatorOptions::default())
    }

    pub fn with_options(store: Box<dyn ConfigStore>, engine: E, options: CoordinatorOptions) -> Self {
        let mut config = ConfigService::new(store);
        let config_events = config.subscribe();
        let mut session = PlaybackSession::new(engine);
        let playback_events = session.subscribe();
        let (command_sender, command_receiver) = channel();
        let (task_sender, task_receiver) = channel();

        Self {
            config,
            config_events,
            catalog: ChannelCatalog::new(),
            session,
            playback_events,
            observed_state: PlaybackState::Idle,
            fetcher: PlaylistFetcher::new(options.fetch.clone()),
            options,
            command_sender,
            command_receiver,
            task_sender,
            task_receiver,
            busy: BusyFlag::new(),
            refresh_pending: false,
            next_refresh: None,
            reconnect: Reconnect::default(),
            last_error: None,
            last_probe: None,
            observers: Vec::new(),
        }
    }

    pub fn command_sender(&self) -> CommandSender {
        CommandSender(self.command_sender.clone())
    }

    /// Queue a command for the next tick
    pub fn send(&self, command: Command) {
        let _ = self.command_sender.send(command);
    }

    pub fn subscribe(&mut self) -> Receiver<CoordinatorEvent> {
        let (tx, rx) = channel();
        self.observers.push(tx);
        rx
    }

    pub fn config(&self) -> &StreamSourceConfig {
        self.config.config()
    }

    pub fn config_service(&self) -> &ConfigService {
        &self.config
    }

    pub fn catalog(&self) -> &ChannelCatalog {
        &self.catalog
    }

    pub fn session(&self) -> &PlaybackSession<E> {
        &self.session
    }

    pub fn playback_state(&self) -> &PlaybackState {
        self.session.state()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_probe(&self) -> Option<bool> {
        self.last_probe
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_busy()
    }

    pub fn next_refresh(&self) -> Option<Instant> {
        self.next_refresh
    }

    /// Load the first channel and pick up a saved config that was never ingested
    pub fn start(&mut self) {
        let first = self.catalog.first().id();
        self.play_channel(first);

        if let Some(event) = self.config.pending_change() {
            tracing::info!(revision = event.revision(), "Replaying unprocessed configuration change");
            self.on_config_event(event);
        } else {
            self.schedule_refresh();
        }
    }

    /// Run one pass of the loop: commands, config events, task results,
    /// engine events, then timers
    pub fn tick(&mut self) {
        let mut save = None;
        while let Ok(command) = self.command_receiver.try_recv() {
            self.handle_command(command, &mut save);
        }
        if let Some(config) = save {
            self.save_config(config);
        }

        while let Ok(event) = self.config_events.try_recv() {
            self.on_config_event(event);
        }

        while let Ok(result) = self.task_receiver.try_recv() {
            self.on_task_result(result);
        }

        self.session.pump();
        while let Ok(state) = self.playback_events.try_recv() {
            self.on_playback_state(state);
        }

        self.run_timers(Instant::now());
    }

    /// Tick until `duration` has passed
    pub fn run_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            self.tick();
            thread::sleep(Duration::from_millis(50));
        }
    }

    /// Release the engine. The coordinator stays usable for config work.
    pub fn shutdown(&mut self) {
        self.reconnect = Reconnect::default();
        self.session.cleanup();
    }

    fn handle_command(&mut self, command: Command, save: &mut Option<StreamSourceConfig>) {
        tracing::debug!(?command, "Command");
        match command {
            // only the last save queued in one pass is kept
            Command::SaveConfig(config) => *save = Some(config),
            Command::Refresh => self.start_refresh(self.config.revision()),
            Command::Select(id) => {
                if self.catalog.get(id).is_some() {
                    self.play_channel(id);
                } else {
                    tracing::warn!(id, "Unknown channel");
                    self.last_error = Some(format!("Unknown channel {}", id));
                }
            }
            Command::Next => {
                let next = match self.catalog.selected() {
                    Some(current) => self.catalog.next(current.id()).id(),
                    None => self.catalog.first().id(),
                };
                self.play_channel(next);
            }
            Command::TogglePlayPause => self.session.toggle_play_pause(),
            Command::ToggleMute => self.session.toggle_mute(),
            Command::Stop => {
                self.reconnect.due = None;
                self.session.stop();
            }
            Command::Probe => self.start_probe(),
        }
    }

    fn save_config(&mut self, config: StreamSourceConfig) {
        match self.config.save(config) {
            Ok(revision) => self.notify(CoordinatorEvent::ConfigSaved { revision }),
            Err(e) => self.last_error = Some(format!("Failed to save configuration: {}", e)),
        }
    }

    fn on_config_event(&mut self, event: ConfigEvent) {
        tracing::info!(event = event.name(), revision = event.revision(), "Configuration event");
        let ConfigEvent::ConfigurationChanged { revision, .. } = event;
        self.schedule_refresh();
        self.start_refresh(revision);
    }

    fn start_refresh(&mut self, revision: u64) {
        let Some(guard) = self.busy.try_acquire() else {
            tracing::debug!(revision, "Download in flight, refresh queued");
            self.refresh_pending = true;
            return;
        };
        self.refresh_pending = false;

        let config = self.config.config();
        let primary = resolver::resolve(config).playlist_url;
        let alternative = resolver::resolve_alternative(config).map(|r| r.playlist_url);
        let fetcher = self.fetcher.clone();
        let sender = self.task_sender.clone();

        tracing::info!(revision, url = %primary, "Downloading playlist");
        thread::spawn(move || {
            let mut result = fetcher.download_channels(&primary);
            if let Err(ref e) = result {
                if let Some(alt) = alternative {
                    tracing::warn!(error = %e, url = %alt, "Primary host failed, trying alternative");
                    result = fetcher.download_channels(&alt);
                }
            }
            drop(guard);
            let _ = sender.send(TaskResult::PlaylistLoaded { revision, result });
        });
    }

    fn start_probe(&mut self) {
        let url = resolver::resolve(self.config.config()).probe_url;
        let mut fetcher = self.fetcher.clone();
        let sender = self.task_sender.clone();

        thread::spawn(move || {
            let ok = fetcher.probe(&url);
            let error = fetcher.last_error().map(String::from);
            let _ = sender.send(TaskResult::ProbeFinished { ok, error });
        });
    }

    fn on_task_result(&mut self, result: TaskResult) {
        match result {
            TaskResult::PlaylistLoaded { revision, result } => {
                self.schedule_refresh();
                if revision < self.config.revision() {
                    tracing::info!(
                        revision,
                        current = self.config.revision(),
                        "Discarding playlist for an outdated configuration"
                    );
                    return;
                }

                match result {
                    Ok(channels) => self.apply_channels(revision, channels),
                    Err(e) => {
                        tracing::warn!(error = %e, kept = self.catalog.len(), "Playlist refresh failed");
                        let message = e.to_string();
                        self.last_error = Some(message.clone());
                        self.notify(CoordinatorEvent::RefreshFailed(message));
                    }
                }
            }
            TaskResult::ProbeFinished { ok, error } => {
                self.last_probe = Some(ok);
                if !ok {
                    self.last_error = error.clone();
                }
                self.notify(CoordinatorEvent::ProbeFinished { ok, error });
            }
        }
    }

    fn apply_channels(&mut self, revision: u64, channels: Vec<Channel>) {
        if !self.catalog.replace(channels) {
            return;
        }
        self.last_error = None;
        self.notify(CoordinatorEvent::CatalogReplaced {
            count: self.catalog.len(),
        });

        let first = self.catalog.first().id();
        self.play_channel(first);
        self.config.acknowledge(revision);
    }

    fn play_channel(&mut self, id: u32) {
        let Some(channel) = self.catalog.select(id).cloned() else {
            return;
        };
        self.reconnect = Reconnect::default();
        self.session.load(&channel);
    }

    fn on_playback_state(&mut self, state: PlaybackState) {
        let previous = std::mem::replace(&mut self.observed_state, state.clone());
        let was_active = matches!(
            previous,
            PlaybackState::Loading | PlaybackState::Ready | PlaybackState::Playing | PlaybackState::Paused
        );

        if state.is_error() && was_active {
            self.maybe_schedule_reconnect();
        }
        self.notify(CoordinatorEvent::Playback(state));
    }

    fn maybe_schedule_reconnect(&mut self) {
        if !self.config.config().auto_reconnect {
            return;
        }
        let Some(channel) = self.session.current_channel() else {
            return;
        };
        if !is_valid_stream_url(channel.url()) {
            return;
        }
        if self.reconnect.attempts >= self.options.max_reconnect_attempts {
            tracing::warn!(channel = channel.name(), "Giving up on reconnecting");
            return;
        }

        self.reconnect.attempts += 1;
        self.reconnect.due = Some(Instant::now() + self.options.reconnect_delay);
        tracing::info!(
            channel = channel.name(),
            attempt = self.reconnect.attempts,
            "Reconnect scheduled"
        );
    }

    fn run_timers(&mut self, now: Instant) {
        if self.reconnect.due.is_some_and(|due| now >= due) {
            self.reconnect.due = None;
            if self.session.state().is_error() {
                if let Some(channel) = self.session.current_channel().cloned() {
                    self.session.load(&channel);
                }
            }
        }

        if self.refresh_pending && !self.busy.is_busy() {
            self.start_refresh(self.config.revision());
        }

        if self.next_refresh.is_some_and(|at| now >= at) {
            tracing::info!("Periodic playlist refresh");
            self.next_refresh = None;
            self.start_refresh(self.config.revision());
        }
    }

    fn schedule_refresh(&mut self) {
        let config = self.config.config();
        self.next_refresh = match config.update_interval_minutes() {
            Some(minutes) if config.is_configured() => {
                let units = u32::try_from(minutes).unwrap_or(u32::MAX);
                Some(Instant::now() + self.options.refresh_unit.saturating_mul(units))
            }
            _ => None,
        };
    }

    fn notify(&mut self, event: CoordinatorEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
