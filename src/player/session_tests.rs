//! Tests for the playback session state machine

use super::*;
use std::sync::{Arc, Mutex};

/// Engine double that records every call and lets the test publish events
struct FakeEngine {
    hub: EventHub,
    calls: Arc<Mutex<Vec<String>>>,
    time_control: Arc<Mutex<TimeControl>>,
    muted: bool,
    current_item: u64,
}

struct FakeHandle {
    hub: EventHub,
    calls: Arc<Mutex<Vec<String>>>,
    time_control: Arc<Mutex<TimeControl>>,
}

impl FakeHandle {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn item_event(&self, event: EngineEvent) {
        self.hub.publish_item(self.hub.current_item(), event);
    }

    fn player_event(&self, event: EngineEvent) {
        self.hub.publish(event);
    }

    fn set_time_control(&self, tc: TimeControl) {
        *self.time_control.lock().unwrap() = tc;
    }
}

fn fake_engine() -> (FakeEngine, FakeHandle) {
    let hub = EventHub::new();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let time_control = Arc::new(Mutex::new(TimeControl::Paused));
    let engine = FakeEngine {
        hub: hub.clone(),
        calls: Arc::clone(&calls),
        time_control: Arc::clone(&time_control),
        muted: false,
        current_item: 0,
    };
    (
        engine,
        FakeHandle {
            hub,
            calls,
            time_control,
        },
    )
}

impl FakeEngine {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl MediaEngine for FakeEngine {
    fn subscribe(&mut self) -> Subscription {
        self.record("subscribe");
        self.hub.subscribe()
    }

    fn load_item(&mut self, url: &str) -> Subscription {
        self.record(format!("load:{}", url));
        let (generation, subscription) = self.hub.begin_item();
        self.current_item = generation;
        subscription
    }

    fn release_item(&mut self) {
        self.record("release");
        self.hub.end_item();
    }

    fn play(&mut self) {
        self.record("play");
    }

    fn pause(&mut self) {
        self.record("pause");
    }

    fn time_control(&self) -> TimeControl {
        *self.time_control.lock().unwrap()
    }

    fn set_muted(&mut self, muted: bool) {
        self.record(format!("mute:{}", muted));
        self.muted = muted;
        self.hub.publish(EngineEvent::MuteChanged(muted));
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn shutdown(&mut self) {
        self.record("shutdown");
        self.hub.close();
    }
}

fn stream(id: u32, url: &str) -> Channel {
    Channel::new(id, format!("Channel {}", id), "General channel", url, "General")
}

fn hls(id: u32) -> Channel {
    stream(id, &format!("https://cdn.example.com/live/{}/index.m3u8", id))
}

#[test]
fn test_stream_url_heuristic() {
    assert!(is_valid_stream_url("https://x.example/live.m3u8"));
    assert!(is_valid_stream_url("http://example.com/playlist/1"));
    assert!(is_valid_stream_url("http://example.com/hls/1"));
    assert!(!is_valid_stream_url("rtmp://example.com/live.m3u8"));
    assert!(is_valid_stream_url("http://a.m3u8"));
    // length must exceed ten characters
    assert!(!is_valid_stream_url("http://hls"));
    assert!(is_valid_stream_url("http://hls/"));
    assert!(!is_valid_stream_url("http://example.com/live/1.ts"));
    assert!(!is_valid_stream_url(""));
}

#[test]
fn test_new_session_is_idle_and_subscribed() {
    let (engine, handle) = fake_engine();
    let session = PlaybackSession::new(engine);
    assert_eq!(session.state(), &PlaybackState::Idle);
    assert!(!session.is_playing());
    assert_eq!(handle.calls(), vec!["subscribe"]);
    assert_eq!(handle.hub.active_subscriptions(), 1);
}

#[test]
fn test_invalid_url_errors_without_engine_interaction() {
    let (engine, handle) = fake_engine();
    let mut session = PlaybackSession::new(engine);

    assert!(!session.load(&stream(1, "udp://@233.50.230.1:5000")));
    assert!(matches!(session.state(), PlaybackState::Error(m) if m.starts_with("invalid URL")));
    assert_eq!(handle.calls(), vec!["subscribe"]);
    assert_eq!(session.current_channel().map(|c| c.id()), Some(1));
}

#[test]
fn test_load_hands_url_to_engine() {
    let (engine, handle) = fake_engine();
    let mut session = PlaybackSession::new(engine);

    assert!(session.load(&hls(1)));
    assert_eq!(session.state(), &PlaybackState::Loading);
    assert_eq!(
        handle.calls(),
        vec![
            "subscribe",
            "load:https://cdn.example.com/live/1/index.m3u8",
            "play"
        ]
    );
}

#[test]
fn test_event_driven_transitions() {
    let (engine, handle) = fake_engine();
    let mut session = PlaybackSession::new(engine);
    session.load(&hls(1));

    handle.item_event(EngineEvent::ItemReady);
    session.pump();
    assert_eq!(session.state(), &PlaybackState::Ready);

    handle.player_event(EngineEvent::Playing);
    session.pump();
    assert_eq!(session.state(), &PlaybackState::Playing);
    assert!(session.is_playing());

    handle.player_event(EngineEvent::Paused);
    session.pump();
    assert_eq!(session.state(), &PlaybackState::Paused);
    assert!(!session.is_playing());

    handle.player_event(EngineEvent::Buffering);
    session.pump();
    assert_eq!(session.state(), &PlaybackState::Loading);
}

#[test]
fn test_pause_while_loading_is_ignored() {
    let (engine, handle) = fake_engine();
    let mut session = PlaybackSession::new(engine);
    session.load(&hls(1));

    handle.player_event(EngineEvent::Paused);
    session.pump();
    assert_eq!(session.state(), &PlaybackState::Loading);
}

#[test]
fn test_events_are_applied_in_publish_order() {
    let (engine, handle) = fake_engine();
    let mut session = PlaybackSession::new(engine);
    session.load(&hls(1));

    handle.item_event(EngineEvent::ItemReady);
    handle.player_event(EngineEvent::Playing);
    assert_eq!(session.pump(), 2);
    assert_eq!(session.state(), &PlaybackState::Playing);
}

#[test]
fn test_item_failure_is_sticky() {
    let (engine, handle) = fake_engine();
    let mut session = PlaybackSession::new(engine);
    session.load(&hls(1));

    handle.item_event(EngineEvent::ItemFailed("403 Forbidden".into()));
    handle.player_event(EngineEvent::Playing);
    session.pump();
    assert_eq!(
        session.state(),
        &PlaybackState::Error("Playback failed: 403 Forbidden".into())
    );
    assert!(!session.is_playing());

    handle.player_event(EngineEvent::Buffering);
    session.pump();
    assert!(session.state().is_error());

    session.load(&hls(2));
    assert_eq!(session.state(), &PlaybackState::Loading);
}

#[test]
fn test_interruption_maps_to_error() {
    let (engine, handle) = fake_engine();
    let mut session = PlaybackSession::new(engine);
    session.load(&hls(1));
    handle.player_event(EngineEvent::Playing);
    handle.item_event(EngineEvent::PlaybackInterrupted("connection reset".into()));
    session.pump();
    assert_eq!(
        session.state(),
        &PlaybackState::Error("Playback interrupted: connection reset".into())
    );
}

#[test]
fn test_new_load_releases_previous_item() {
    let (engine, handle) = fake_engine();
    let mut session = PlaybackSession::new(engine);
    session.load(&hls(1));
    assert_eq!(handle.hub.active_subscriptions(), 2);

    session.load(&hls(2));
    assert_eq!(handle.hub.active_subscriptions(), 2);
    let calls = handle.calls();
    assert!(calls.contains(&"release".to_string()));

    // a late event for the first item cannot reach the session
    assert!(!handle.hub.publish_item(1, EngineEvent::ItemFailed("stale".into())));
    session.pump();
    assert_eq!(session.state(), &PlaybackState::Loading);
}

#[test]
fn test_toggle_play_pause_follows_engine_status() {
    let (engine, handle) = fake_engine();
    let mut session = PlaybackSession::new(engine);

    // nothing loaded yet
    session.toggle_play_pause();
    assert_eq!(handle.calls(), vec!["subscribe"]);

    session.load(&hls(1));
    handle.set_time_control(TimeControl::Playing);
    session.toggle_play_pause();
    assert_eq!(handle.calls().last().map(String::as_str), Some("pause"));

    handle.set_time_control(TimeControl::Waiting);
    session.toggle_play_pause();
    assert_eq!(handle.calls().last().map(String::as_str), Some("play"));
}

#[test]
fn test_toggle_mute_mirrors_engine() {
    let (engine, handle) = fake_engine();
    let mut session = PlaybackSession::new(engine);

    session.toggle_mute();
    assert!(session.is_muted());
    session.toggle_mute();
    assert!(!session.is_muted());
    assert!(handle.calls().contains(&"mute:true".to_string()));

    // echoes from the engine are applied even when idle
    handle.player_event(EngineEvent::MuteChanged(true));
    session.pump();
    assert!(session.is_muted());
}

#[test]
fn test_stop_resets_to_idle_and_releases_item() {
    let (engine, handle) = fake_engine();
    let mut session = PlaybackSession::new(engine);
    session.load(&hls(1));
    handle.player_event(EngineEvent::Playing);
    session.pump();

    session.stop();
    assert_eq!(session.state(), &PlaybackState::Idle);
    assert!(!session.is_playing());
    assert_eq!(handle.hub.active_subscriptions(), 1);

    handle.player_event(EngineEvent::Playing);
    session.pump();
    assert_eq!(session.state(), &PlaybackState::Idle);
}

#[test]
fn test_cleanup_is_idempotent_and_detaches_everything() {
    let (engine, handle) = fake_engine();
    let mut session = PlaybackSession::new(engine);
    session.load(&hls(1));

    session.cleanup();
    session.cleanup();
    assert!(session.is_released());
    assert_eq!(handle.hub.active_subscriptions(), 0);
    assert_eq!(
        handle.calls().iter().filter(|c| c.as_str() == "shutdown").count(),
        1
    );

    assert!(!session.load(&hls(2)));
    assert_eq!(session.state(), &PlaybackState::Error("player released".into()));
}

#[test]
fn test_drop_releases_engine() {
    let (engine, handle) = fake_engine();
    {
        let mut session = PlaybackSession::new(engine);
        session.load(&hls(1));
    }
    assert_eq!(handle.hub.active_subscriptions(), 0);
    assert!(handle.calls().contains(&"shutdown".to_string()));
}

#[test]
fn test_observers_see_each_transition_once() {
    let (engine, handle) = fake_engine();
    let mut session = PlaybackSession::new(engine);
    let transitions = session.subscribe();

    session.load(&hls(1));
    handle.player_event(EngineEvent::Buffering);
    handle.item_event(EngineEvent::ItemReady);
    handle.player_event(EngineEvent::Playing);
    session.pump();
    session.stop();

    let seen: Vec<PlaybackState> = transitions.try_iter().collect();
    assert_eq!(
        seen,
        vec![
            PlaybackState::Loading,
            PlaybackState::Ready,
            PlaybackState::Playing,
            PlaybackState::Idle,
        ]
    );
}
