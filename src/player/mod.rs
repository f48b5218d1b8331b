//! Playback session state machine
//!
//! Wraps a [`MediaEngine`] and folds its asynchronous events into a small set
//! of [`PlaybackState`]s. The session never retries on its own; leaving the
//! `Error` state takes an explicit `load` or `stop`.

pub mod engine;
mod ffmpeg;

pub use engine::{EngineEvent, EventHub, MediaEngine, Subscription, TimeControl};
pub use ffmpeg::InternalEngine;

use crate::models::Channel;
use std::fmt;
use std::sync::mpsc::{channel, Receiver, Sender};

/// Observable playback state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Error(String),
}

impl PlaybackState {
    pub fn is_error(&self) -> bool {
        matches!(self, PlaybackState::Error(_))
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Idle => f.write_str("Idle"),
            PlaybackState::Loading => f.write_str("Loading"),
            PlaybackState::Ready => f.write_str("Ready"),
            PlaybackState::Playing => f.write_str("Live"),
            PlaybackState::Paused => f.write_str("Paused"),
            PlaybackState::Error(message) => write!(f, "Error: {}", message),
        }
    }
}

/// Heuristic check that a URL points at a live stream the engine can open
pub fn is_valid_stream_url(url: &str) -> bool {
    const STREAM_MARKERS: [&str; 3] = [".m3u8", "playlist", "hls"];

    url.starts_with("http")
        && url.chars().count() > 10
        && STREAM_MARKERS.iter().any(|marker| url.contains(marker))
}

pub struct PlaybackSession<E: MediaEngine> {
    engine: Option<E>,
    state: PlaybackState,
    is_playing: bool,
    is_muted: bool,
    current: Option<Channel>,
    player_events: Option<Subscription>,
    item_events: Option<Subscription>,
    observers: Vec<Sender<PlaybackState>>,
}

impl<E: MediaEngine> PlaybackSession<E> {
    pub fn new(mut engine: E) -> Self {
        let player_events = engine.subscribe();
        let is_muted = engine.is_muted();
        Self {
            engine: Some(engine),
            state: PlaybackState::Idle,
            is_playing: false,
            is_muted,
            current: None,
            player_events: Some(player_events),
            item_events: None,
            observers: Vec::new(),
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn current_channel(&self) -> Option<&Channel> {
        self.current.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.engine.is_none()
    }

    pub fn engine(&self) -> Option<&E> {
        self.engine.as_ref()
    }

    /// Receive every committed state transition
    pub fn subscribe(&mut self) -> Receiver<PlaybackState> {
        let (tx, rx) = channel();
        self.observers.push(tx);
        rx
    }

    /// Load `channel` into the engine. Invalid URLs go straight to `Error`
    /// without touching the engine. Returns whether the engine was started.
    pub fn load(&mut self, channel: &Channel) -> bool {
        tracing::info!(channel = channel.name(), url = channel.url(), "Loading channel");
        self.current = Some(channel.clone());

        if !is_valid_stream_url(channel.url()) {
            tracing::warn!(url = channel.url(), "Rejected stream URL");
            self.is_playing = false;
            self.transition(PlaybackState::Error(format!("invalid URL: {}", channel.url())));
            return false;
        }

        if self.engine.is_none() {
            self.transition(PlaybackState::Error("player released".to_string()));
            return false;
        }

        self.release_item();

        let Some(engine) = self.engine.as_mut() else {
            return false;
        };
        self.item_events = Some(engine.load_item(channel.url()));
        engine.play();

        self.transition(PlaybackState::Loading);
        true
    }

    /// Apply everything the engine has published since the last call.
    /// Returns the number of events processed.
    pub fn pump(&mut self) -> usize {
        let mut events: Vec<(u64, EngineEvent)> = Vec::new();
        for subscription in [&self.player_events, &self.item_events].into_iter().flatten() {
            events.extend(subscription.drain());
        }
        events.sort_by_key(|(seq, _)| *seq);

        let count = events.len();
        for (_, event) in events {
            self.handle_event(event);
        }
        count
    }

    /// Fold one engine event into the session state
    pub fn handle_event(&mut self, event: EngineEvent) {
        tracing::debug!(?event, state = %self.state, "Engine event");

        if let EngineEvent::MuteChanged(muted) = event {
            self.is_muted = muted;
            return;
        }

        // Only load/stop leave these states
        if matches!(self.state, PlaybackState::Idle | PlaybackState::Error(_)) {
            return;
        }

        match event {
            EngineEvent::Buffering => self.transition(PlaybackState::Loading),
            EngineEvent::Playing => {
                self.is_playing = true;
                self.transition(PlaybackState::Playing);
            }
            EngineEvent::Paused => {
                self.is_playing = false;
                // the engine reports a pause before the first frame arrives
                if self.state != PlaybackState::Loading {
                    self.transition(PlaybackState::Paused);
                }
            }
            EngineEvent::ItemReady => self.transition(PlaybackState::Ready),
            EngineEvent::ItemFailed(message) => {
                self.is_playing = false;
                self.transition(PlaybackState::Error(format!("Playback failed: {}", message)));
            }
            EngineEvent::PlaybackInterrupted(message) => {
                self.is_playing = false;
                self.transition(PlaybackState::Error(format!(
                    "Playback interrupted: {}",
                    message
                )));
            }
            EngineEvent::MuteChanged(_) => {}
        }
    }

    /// Play or pause based on what the engine reports, not the cached state
    pub fn toggle_play_pause(&mut self) {
        if self.item_events.is_none() {
            return;
        }
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        if engine.time_control() == TimeControl::Playing {
            tracing::debug!("Pausing");
            engine.pause();
        } else {
            tracing::debug!("Resuming");
            engine.play();
        }
    }

    /// Flip the engine mute flag and mirror what the engine reports back
    pub fn toggle_mute(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        engine.set_muted(!engine.is_muted());
        self.is_muted = engine.is_muted();
        tracing::debug!(muted = self.is_muted, "Mute toggled");
    }

    /// Release the current item and return to `Idle`
    pub fn stop(&mut self) {
        self.release_item();
        self.is_playing = false;
        self.transition(PlaybackState::Idle);
    }

    /// Stop, detach every engine subscription and release the engine.
    /// Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.engine.is_none() {
            return;
        }

        self.stop();
        self.player_events = None;
        self.item_events = None;
        if let Some(mut engine) = self.engine.take() {
            engine.shutdown();
        }
        self.observers.clear();
        tracing::info!("Playback session released");
    }

    fn release_item(&mut self) {
        if let Some(subscription) = self.item_events.take() {
            subscription.cancel();
            if let Some(engine) = self.engine.as_mut() {
                engine.pause();
                engine.release_item();
            }
        }
    }

    fn transition(&mut self, next: PlaybackState) {
        if self.state == next {
            return;
        }
        tracing::info!(from = %self.state, to = %next, "Playback state changed");
        self.state = next;
        let state = self.state.clone();
        self.observers.retain(|tx| tx.send(state.clone()).is_ok());
    }
}

impl<E: MediaEngine> Drop for PlaybackSession<E> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
