//! Media engine seam and its event plumbing
//!
//! Engines publish [`EngineEvent`]s through an [`EventHub`]. Consumers hold
//! [`Subscription`]s; dropping one detaches it from the hub.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};

/// Status notifications emitted by a media engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Waiting for data
    Buffering,
    Playing,
    Paused,
    /// The loaded item can start rendering
    ItemReady,
    /// The loaded item could not be opened or decoded
    ItemFailed(String),
    /// Playback stopped unexpectedly after it had started
    PlaybackInterrupted(String),
    MuteChanged(bool),
}

impl EngineEvent {
    /// Events that belong to the currently loaded item rather than the player
    pub fn is_item_event(&self) -> bool {
        matches!(
            self,
            EngineEvent::ItemReady | EngineEvent::ItemFailed(_) | EngineEvent::PlaybackInterrupted(_)
        )
    }
}

/// What the engine is doing right now, as reported by the engine itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeControl {
    Playing,
    Paused,
    Waiting,
}

/// An opaque renderer. Owned by exactly one `PlaybackSession`.
pub trait MediaEngine: Send {
    /// Player-level events (time control, mute)
    fn subscribe(&mut self) -> Subscription;
    /// Start loading `url`, replacing any current item. Returns the
    /// subscription for that item's events.
    fn load_item(&mut self, url: &str) -> Subscription;
    fn release_item(&mut self);
    fn play(&mut self);
    fn pause(&mut self);
    fn time_control(&self) -> TimeControl;
    fn set_muted(&mut self, muted: bool);
    fn is_muted(&self) -> bool;
    /// Stop everything and drop all subscriptions
    fn shutdown(&mut self);
}

/// Event with the hub-wide sequence number it was published under
pub type SequencedEvent = (u64, EngineEvent);

/// Receiving half of an engine subscription
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<SequencedEvent>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub fn try_next(&self) -> Option<SequencedEvent> {
        if !self.is_active() {
            return None;
        }
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Everything queued so far
    pub fn drain(&self) -> Vec<SequencedEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug, Clone)]
struct EventSink {
    tx: Sender<SequencedEvent>,
    active: Arc<AtomicBool>,
}

impl EventSink {
    fn pair() -> (EventSink, Subscription) {
        let (tx, rx) = channel();
        let active = Arc::new(AtomicBool::new(true));
        (
            EventSink {
                tx,
                active: Arc::clone(&active),
            },
            Subscription { rx, active },
        )
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn send(&self, event: SequencedEvent) -> bool {
        self.is_active() && self.tx.send(event).is_ok()
    }
}

#[derive(Debug, Default)]
struct HubInner {
    player: Vec<EventSink>,
    item: Vec<EventSink>,
    item_generation: u64,
}

/// Fan-out of engine events to subscriptions. Clones share state, so an
/// engine can hand one to its worker threads.
#[derive(Debug, Clone, Default)]
pub struct EventHub {
    inner: Arc<Mutex<HubInner>>,
    sequence: Arc<AtomicU64>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (sink, subscription) = EventSink::pair();
        self.lock().player.push(sink);
        subscription
    }

    /// Start a new item generation. Sinks of the previous item are dropped.
    pub fn begin_item(&self) -> (u64, Subscription) {
        let (sink, subscription) = EventSink::pair();
        let mut inner = self.lock();
        inner.item_generation += 1;
        for old in inner.item.drain(..) {
            old.active.store(false, Ordering::Release);
        }
        inner.item.push(sink);
        (inner.item_generation, subscription)
    }

    pub fn end_item(&self) {
        let mut inner = self.lock();
        inner.item_generation += 1;
        for old in inner.item.drain(..) {
            old.active.store(false, Ordering::Release);
        }
    }

    pub fn current_item(&self) -> u64 {
        self.lock().item_generation
    }

    /// Broadcast a player-level event
    pub fn publish(&self, event: EngineEvent) {
        let seq = self.sequence.fetch_add(1, Ordering::AcqRel);
        let mut inner = self.lock();
        inner.player.retain(|sink| sink.send((seq, event.clone())));
    }

    /// Deliver an event for item `generation`. Events of replaced items are dropped.
    pub fn publish_item(&self, generation: u64, event: EngineEvent) -> bool {
        let seq = self.sequence.fetch_add(1, Ordering::AcqRel);
        let mut inner = self.lock();
        if inner.item_generation != generation {
            return false;
        }
        inner.item.retain(|sink| sink.send((seq, event.clone())));
        !inner.item.is_empty()
    }

    /// Run `apply` only while `generation` is still the loaded item. The hub
    /// lock is held throughout, so a concurrent `begin_item` waits for it.
    pub fn if_current<R>(&self, generation: u64, apply: impl FnOnce() -> R) -> Option<R> {
        let inner = self.lock();
        (inner.item_generation == generation).then(apply)
    }

    /// Player-level counterpart of `publish_item`: `apply` runs and `event`
    /// is broadcast only while `generation` is current
    pub fn publish_for_item(&self, generation: u64, event: EngineEvent, apply: impl FnOnce()) -> bool {
        let seq = self.sequence.fetch_add(1, Ordering::AcqRel);
        let mut inner = self.lock();
        if inner.item_generation != generation {
            return false;
        }
        apply();
        inner.player.retain(|sink| sink.send((seq, event.clone())));
        true
    }

    /// Subscriptions that have not been dropped or cancelled
    pub fn active_subscriptions(&self) -> usize {
        let inner = self.lock();
        inner
            .player
            .iter()
            .chain(inner.item.iter())
            .filter(|sink| sink.is_active())
            .count()
    }

    pub fn close(&self) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.item_generation += 1;
        for sink in inner.player.drain(..).chain(inner.item.drain(..)) {
            sink.active.store(false, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_events_reach_subscribers() {
        let hub = EventHub::new();
        let sub = hub.subscribe();
        hub.publish(EngineEvent::Playing);
        hub.publish(EngineEvent::Paused);
        let events: Vec<EngineEvent> = sub.drain().into_iter().map(|(_, e)| e).collect();
        assert_eq!(events, vec![EngineEvent::Playing, EngineEvent::Paused]);
    }

    #[test]
    fn test_dropped_subscription_is_detached() {
        let hub = EventHub::new();
        let sub = hub.subscribe();
        assert_eq!(hub.active_subscriptions(), 1);
        drop(sub);
        assert_eq!(hub.active_subscriptions(), 0);
        hub.publish(EngineEvent::Buffering);
        assert!(hub.lock().player.is_empty());
    }

    #[test]
    fn test_stale_item_events_are_dropped() {
        let hub = EventHub::new();
        let (first, first_sub) = hub.begin_item();
        let (second, second_sub) = hub.begin_item();

        assert!(!first_sub.is_active());
        assert!(!hub.publish_item(first, EngineEvent::ItemFailed("old".into())));
        assert!(hub.publish_item(second, EngineEvent::ItemReady));
        assert_eq!(second_sub.drain().len(), 1);
    }

    #[test]
    fn test_writes_for_replaced_item_are_skipped() {
        let hub = EventHub::new();
        let player = hub.subscribe();
        let (old, _) = hub.begin_item();
        let mut state = "initial";

        assert_eq!(hub.if_current(old, || 1), Some(1));
        let (current, _) = hub.begin_item();
        assert_eq!(hub.if_current(old, || 2), None);

        assert!(!hub.publish_for_item(old, EngineEvent::Paused, || state = "stale"));
        assert_eq!(state, "initial");
        assert!(player.drain().is_empty());

        assert!(hub.publish_for_item(current, EngineEvent::Playing, || state = "live"));
        assert_eq!(state, "live");
        assert_eq!(player.drain().len(), 1);

        hub.end_item();
        assert_eq!(hub.if_current(current, || 3), None);
    }

    #[test]
    fn test_sequence_orders_across_subscriptions() {
        let hub = EventHub::new();
        let player = hub.subscribe();
        let (item, item_sub) = hub.begin_item();
        hub.publish_item(item, EngineEvent::ItemReady);
        hub.publish(EngineEvent::Playing);

        let (ready_seq, _) = item_sub.try_next().unwrap();
        let (playing_seq, _) = player.try_next().unwrap();
        assert!(ready_seq < playing_seq);
    }

    #[test]
    fn test_close_detaches_everything() {
        let hub = EventHub::new();
        let a = hub.subscribe();
        let (_, b) = hub.begin_item();
        hub.close();
        assert!(!a.is_active());
        assert!(!b.is_active());
        assert_eq!(hub.active_subscriptions(), 0);
    }

    #[test]
    fn test_item_event_classification() {
        assert!(EngineEvent::ItemReady.is_item_event());
        assert!(EngineEvent::PlaybackInterrupted("x".into()).is_item_event());
        assert!(!EngineEvent::Playing.is_item_event());
        assert!(!EngineEvent::MuteChanged(true).is_item_event());
    }
}
