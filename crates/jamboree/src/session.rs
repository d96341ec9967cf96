//! Remote session boundary
//!
//! The generation service is an external collaborator: the player only sees
//! a handle with transport operations and a stream of push events. Concrete
//! transports implement [`SessionConnector`] (dial) and [`MusicSession`]
//! (operations on a live session); the player never touches wire details.
//!
//! `MockConnector`/`MockSession` are in-memory implementations for tests
//! and demos: the mock records every call and lets tests push events and
//! inject failures.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::decode::AudioChunk;
use crate::prompts::WeightedPrompt;

/// Lifecycle of the cached connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session and no attempt in flight
    Disconnected,
    /// A single connect attempt is pending; concurrent callers share it
    Connecting,
    /// Session handle is live
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Push events delivered by the transport in arrival order
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Session setup acknowledged; clears any prior connection error
    SetupComplete,
    /// Marker bounding the upcoming musical phrase
    Phrase { duration_secs: f64 },
    /// The service rejected a prompt text
    FilteredPrompt { text: String },
    /// Generated audio payloads, playback order
    AudioChunks(Vec<AudioChunk>),
    /// Transport-level failure; the session is unusable
    Error { message: String },
    /// Remote closed the session
    Closed,
}

/// Operations on a live session
///
/// Transport calls are fire-and-forget except the two that the service can
/// reject per-call (weights and looping), which surface their failure so the
/// player can unwind optimistic state.
pub trait MusicSession: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn stop(&self);
    fn set_weighted_prompts(&self, prompts: &[WeightedPrompt]) -> Result<()>;
    fn set_looping(&self, looping: bool) -> Result<()>;
}

/// Dials the generation service
///
/// `connect` wires push events into the supplied channel and resolves to a
/// session handle. The player caches one pending attempt at a time, so
/// implementations never see concurrent dials from a single player.
pub trait SessionConnector: Send + Sync + 'static {
    fn connect(
        &self,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> BoxFuture<'static, Result<Box<dyn MusicSession>>>;
}

/// What a [`MockSession`] was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCall {
    Play,
    Pause,
    Stop,
    SetWeightedPrompts(Vec<WeightedPrompt>),
    SetLooping(bool),
}

/// In-memory session for testing
///
/// Records every call; clones share the same log, so the copy handed to the
/// player and the copy held by the test observe each other.
#[derive(Debug, Clone, Default)]
pub struct MockSession {
    calls: Arc<Mutex<Vec<SessionCall>>>,
    fail_next_looping: Arc<AtomicBool>,
    fail_weight_updates: Arc<AtomicBool>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every call so far, in order
    pub fn calls(&self) -> Vec<SessionCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Payloads of every weights update, in order
    pub fn weight_updates(&self) -> Vec<Vec<WeightedPrompt>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SessionCall::SetWeightedPrompts(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    /// Make the next `set_looping` call fail (one-shot)
    pub fn fail_next_set_looping(&self) {
        self.fail_next_looping.store(true, Ordering::Relaxed);
    }

    /// Make every `set_weighted_prompts` call fail until turned off
    pub fn set_fail_weight_updates(&self, fail: bool) {
        self.fail_weight_updates.store(fail, Ordering::Relaxed);
    }

    fn record(&self, call: SessionCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl MusicSession for MockSession {
    fn play(&self) {
        self.record(SessionCall::Play);
    }

    fn pause(&self) {
        self.record(SessionCall::Pause);
    }

    fn stop(&self) {
        self.record(SessionCall::Stop);
    }

    fn set_weighted_prompts(&self, prompts: &[WeightedPrompt]) -> Result<()> {
        if self.fail_weight_updates.load(Ordering::Relaxed) {
            bail!("mock weights update refused");
        }
        self.record(SessionCall::SetWeightedPrompts(prompts.to_vec()));
        Ok(())
    }

    fn set_looping(&self, looping: bool) -> Result<()> {
        if self.fail_next_looping.swap(false, Ordering::Relaxed) {
            bail!("mock set_looping refused");
        }
        self.record(SessionCall::SetLooping(looping));
        Ok(())
    }
}

/// In-memory connector for testing
///
/// Hands out clones of one [`MockSession`] and keeps the event channel from
/// the latest connect so tests can push [`SessionEvent`]s into the player.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    session: MockSession,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>>,
    connect_count: Arc<AtomicUsize>,
    refuse: Arc<AtomicBool>,
    connect_delay: Arc<Mutex<Duration>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session handed to the player (shared call log)
    pub fn session(&self) -> MockSession {
        self.session.clone()
    }

    /// How many connect attempts have been made
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::Relaxed)
    }

    /// Refuse all future connect attempts
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Relaxed);
    }

    /// Delay each connect resolution (for pending-connection tests)
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    /// Push an event into the player, as the transport would
    ///
    /// Returns false if no connect has happened yet or the player is gone.
    pub fn push(&self, event: SessionEvent) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

impl SessionConnector for MockConnector {
    fn connect(
        &self,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> BoxFuture<'static, Result<Box<dyn MusicSession>>> {
        let session = self.session.clone();
        let slot = Arc::clone(&self.events);
        let count = Arc::clone(&self.connect_count);
        let refuse = Arc::clone(&self.refuse);
        let delay = *self.connect_delay.lock().unwrap();

        Box::pin(async move {
            count.fetch_add(1, Ordering::Relaxed);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if refuse.load(Ordering::Relaxed) {
                bail!("mock connector refused the connection");
            }
            *slot.lock().unwrap() = Some(events);
            Ok(Box::new(session) as Box<dyn MusicSession>)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_strings() {
        assert_eq!(ConnectionState::Disconnected.as_str(), "disconnected");
        assert_eq!(ConnectionState::Connecting.as_str(), "connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
    }

    #[test]
    fn test_mock_session_records_calls_in_order() {
        let session = MockSession::new();
        session.play();
        session.set_looping(true).unwrap();
        session.pause();

        assert_eq!(
            session.calls(),
            vec![
                SessionCall::Play,
                SessionCall::SetLooping(true),
                SessionCall::Pause
            ]
        );
    }

    #[test]
    fn test_mock_session_clones_share_log() {
        let session = MockSession::new();
        let clone = session.clone();
        clone.stop();

        assert_eq!(session.calls(), vec![SessionCall::Stop]);
    }

    #[test]
    fn test_fail_next_set_looping_is_one_shot() {
        let session = MockSession::new();
        session.fail_next_set_looping();

        assert!(session.set_looping(true).is_err());
        assert!(session.set_looping(true).is_ok());
        assert_eq!(session.calls(), vec![SessionCall::SetLooping(true)]);
    }

    #[test]
    fn test_weight_updates_extraction() {
        let session = MockSession::new();
        let prompts = vec![WeightedPrompt::new("p1", "piano", 1.0)];
        session.play();
        session.set_weighted_prompts(&prompts).unwrap();

        assert_eq!(session.weight_updates(), vec![prompts]);
    }

    #[test]
    fn test_push_before_connect_fails() {
        let connector = MockConnector::new();
        assert!(!connector.push(SessionEvent::SetupComplete));
    }

    #[tokio::test]
    async fn test_connector_hands_out_shared_session() {
        let connector = MockConnector::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let handle = connector.connect(tx).await.unwrap();
        handle.play();

        assert_eq!(connector.connect_count(), 1);
        assert_eq!(connector.session().calls(), vec![SessionCall::Play]);
    }

    #[tokio::test]
    async fn test_connector_refusal() {
        let connector = MockConnector::new();
        connector.refuse_connections(true);
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(connector.connect(tx).await.is_err());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_push_reaches_receiver_after_connect() {
        let connector = MockConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        connector.connect(tx).await.unwrap();

        assert!(connector.push(SessionEvent::Phrase { duration_secs: 8.0 }));
        match rx.recv().await {
            Some(SessionEvent::Phrase { duration_secs }) => assert_eq!(duration_secs, 8.0),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
