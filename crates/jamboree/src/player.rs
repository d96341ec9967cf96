//! Generated-music player
//!
//! Ties the whole pipeline together: session lifecycle, chunk decoding and
//! scheduling, the stopped/loading/playing/paused state machine, phrase
//! progress, freeze and recording.
//!
//! Architecture: reactor pattern, single task owns all mutable state
//! - Commands from the [`Player`] handle flow through an mpsc channel
//! - Push events from the transport arrive on a per-connection channel
//! - Completions of spawned work (connects, export assembly) come back on
//!   an internal channel
//! - Timers (pre-roll, prompt debounce, frame cadence) are deadlines the
//!   loop re-arms each iteration, so cancelling one is just clearing it
//!
//! Subscribers observe the player through a broadcast bus; every state
//! transition is notified, including re-entrant ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

use crate::clock::{AudioClock, WallClock};
use crate::decode::{decode_chunk, AudioChunk, SERVICE_CHANNELS, SERVICE_SAMPLE_RATE};
use crate::graph::{shared_graph, SharedGraph};
use crate::phrase::PhraseWindow;
use crate::prompts::{active_prompts, FilteredPromptSet, PromptMap, WeightedPrompt};
use crate::recorder::{Recorder, Recording};
use crate::scheduler::{PlaybackScheduler, ScheduleOutcome};
use crate::session::{ConnectionState, MusicSession, SessionConnector, SessionEvent};

/// Broadcast bus depth; slow subscribers lag rather than block the reactor
const EVENT_CAPACITY: usize = 256;

const MSG_CONNECTION_ERROR: &str = "Connection error, please restart audio.";
const MSG_NEED_ACTIVE_PROMPT: &str = "There needs to be one active prompt to play.";
const MSG_RECORDING_NEEDS_PLAYBACK: &str = "Recording requires active playback.";
const MSG_EXPORT_FAILED: &str = "Failed to export recording.";

/// Playback states visible to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// Idle, no session held
    Stopped,
    /// Waiting for the look-ahead to fill
    Loading,
    /// Audible, chunks chaining gap-free
    Playing,
    /// Silenced but session kept for a quick resume
    Paused,
}

impl PlayerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerState::Stopped => "stopped",
            PlayerState::Loading => "loading",
            PlayerState::Playing => "playing",
            PlayerState::Paused => "paused",
        }
    }
}

impl std::fmt::Display for PlayerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications broadcast to subscribers
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// The state machine moved; re-entrant transitions are notified too
    PlaybackStateChanged { state: PlayerState },
    /// Fraction of the current phrase elapsed, in [0, 1]
    PhraseProgressChanged { progress: f64 },
    /// The service rejected this prompt text
    FilteredPrompt { text: String },
    /// Freeze (loop-current-phrase) toggled, possibly reverted
    FreezeStateChanged { frozen: bool },
    /// Recording started or stopped
    RecordingStateChanged { recording: bool },
    /// A finished recording is ready for the host
    AudioExported { recording: Arc<Recording> },
    /// Operator-facing failure message
    Error { message: String },
}

/// Synchronous failures surfaced by handle operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlayerError {
    #[error("recording requires active playback")]
    NotPlaying,
    #[error("player has shut down")]
    Closed,
}

/// Tuning knobs for the player
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Output sample rate, Hz
    pub sample_rate: u32,
    /// Output channel count
    pub channels: u8,
    /// Look-ahead primed before playback turns audible, seconds
    pub buffer_delay_secs: f64,
    /// Gain transition length for play/pause/stop, seconds
    pub gain_ramp_secs: f64,
    /// Window for coalescing outbound prompt updates
    pub prompt_debounce: Duration,
    /// Cadence of phrase progress emissions
    pub frame_interval: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sample_rate: SERVICE_SAMPLE_RATE,
            channels: SERVICE_CHANNELS,
            buffer_delay_secs: 2.0,
            gain_ramp_secs: 0.1,
            prompt_debounce: Duration::from_millis(200),
            frame_interval: Duration::from_millis(16),
        }
    }
}

impl PlayerConfig {
    pub fn with_buffer_delay(mut self, secs: f64) -> Self {
        self.buffer_delay_secs = secs;
        self
    }

    pub fn with_prompt_debounce(mut self, window: Duration) -> Self {
        self.prompt_debounce = window;
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }
}

/// Pipeline counters, relaxed ordering throughout
#[derive(Debug, Default)]
pub struct PlayerStats {
    pub chunks_received: AtomicU64,
    pub chunks_scheduled: AtomicU64,
    pub chunks_discarded: AtomicU64,
    pub decode_failures: AtomicU64,
    pub underruns: AtomicU64,
    pub prompt_updates_sent: AtomicU64,
    pub recordings_completed: AtomicU64,
}

/// Command sent to the reactor task
enum PlayerCommand {
    Play,
    Pause,
    Stop,
    PlayPause,
    ToggleFreeze,
    ToggleRecording {
        reply: oneshot::Sender<Result<bool, PlayerError>>,
    },
    SetWeightedPrompts {
        prompts: PromptMap,
    },
    State {
        reply: oneshot::Sender<PlayerState>,
    },
    ActivePrompts {
        reply: oneshot::Sender<Vec<WeightedPrompt>>,
    },
    Connection {
        reply: oneshot::Sender<ConnectionState>,
    },
    Shutdown,
}

/// Completion of work the reactor farmed out
enum InternalEvent {
    ConnectFinished {
        generation: u64,
        result: Result<Box<dyn MusicSession>>,
    },
    RecordingFinished {
        result: Result<Recording>,
    },
}

/// One cached connection attempt at a time; generations fence stale results
enum Connection {
    Idle,
    Pending { generation: u64 },
    Ready { session: Box<dyn MusicSession> },
}

/// Handle to a running player reactor
///
/// Cheap operations are fire-and-forget; queries and recording round-trip
/// through the reactor. Dropping the last handle stops the reactor.
pub struct Player {
    cmd_tx: mpsc::UnboundedSender<PlayerCommand>,
    events_tx: broadcast::Sender<PlayerEvent>,
    graph: SharedGraph,
    clock: Arc<dyn AudioClock>,
    stats: Arc<PlayerStats>,
}

impl Player {
    /// Player with default config on the wall clock
    pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
        Self::with_config(connector, PlayerConfig::default())
    }

    pub fn with_config(connector: Arc<dyn SessionConnector>, config: PlayerConfig) -> Self {
        Self::with_clock(connector, config, Arc::new(WallClock::new()))
    }

    /// Full constructor; tests inject a [`ManualClock`](crate::clock::ManualClock)
    pub fn with_clock(
        connector: Arc<dyn SessionConnector>,
        config: PlayerConfig,
        clock: Arc<dyn AudioClock>,
    ) -> Self {
        let graph = shared_graph(config.sample_rate, config.channels);
        let scheduler = PlaybackScheduler::new(
            Arc::clone(&clock),
            Arc::clone(&graph),
            config.buffer_delay_secs,
            config.gain_ramp_secs,
        );

        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(PlayerStats::default());

        let reactor = Reactor {
            config,
            clock: Arc::clone(&clock),
            graph: Arc::clone(&graph),
            scheduler,
            connector,
            stats: Arc::clone(&stats),
            events_tx: events_tx.clone(),
            internal_tx,
            state: PlayerState::Stopped,
            connection: Connection::Idle,
            connect_generation: 0,
            connection_error: false,
            pending_play: false,
            session_events: None,
            prompts: PromptMap::new(),
            filtered: FilteredPromptSet::new(),
            frozen: false,
            phrase: None,
            recorder: None,
            preroll_deadline: None,
            debounce_deadline: None,
            frame_deadline: None,
        };
        tokio::spawn(reactor.run(cmd_rx, internal_rx));

        Self {
            cmd_tx,
            events_tx,
            graph,
            clock,
            stats,
        }
    }

    /// Begin playback; transitions to `loading` immediately
    pub fn play(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::Play);
    }

    /// Silence output but keep the session for a quick resume
    pub fn pause(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::Pause);
    }

    /// Halt output and release the session; the next play reconnects
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::Stop);
    }

    /// playing pauses, paused/stopped plays, loading cancels to stopped
    pub fn play_pause(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::PlayPause);
    }

    /// Flip loop-current-phrase; reverted if the session rejects it
    pub fn toggle_freeze(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::ToggleFreeze);
    }

    /// Start or stop capturing the rendered output
    ///
    /// Returns the new recording flag, or [`PlayerError::NotPlaying`] when
    /// starting is refused because playback is not active.
    pub async fn toggle_recording(&self) -> Result<bool, PlayerError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(PlayerCommand::ToggleRecording { reply })
            .map_err(|_| PlayerError::Closed)?;
        rx.await.map_err(|_| PlayerError::Closed)?
    }

    /// Replace the prompt mapping; pushed to the session after a debounce
    pub fn set_weighted_prompts(&self, prompts: PromptMap) {
        let _ = self.cmd_tx.send(PlayerCommand::SetWeightedPrompts { prompts });
    }

    /// Current state; a shut-down player reads as stopped
    pub async fn state(&self) -> PlayerState {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(PlayerCommand::State { reply }).is_err() {
            return PlayerState::Stopped;
        }
        rx.await.unwrap_or(PlayerState::Stopped)
    }

    /// Prompts that drive generation: non-zero weight and not filtered
    pub async fn active_prompts(&self) -> Vec<WeightedPrompt> {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(PlayerCommand::ActivePrompts { reply })
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Session lifecycle as seen by the reactor
    pub async fn connection_state(&self) -> ConnectionState {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(PlayerCommand::Connection { reply }).is_err() {
            return ConnectionState::Disconnected;
        }
        rx.await.unwrap_or(ConnectionState::Disconnected)
    }

    /// Subscribe to player notifications
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events_tx.subscribe()
    }

    /// Notifications as a stream; lagged entries surface as errors
    pub fn events(&self) -> BroadcastStream<PlayerEvent> {
        BroadcastStream::new(self.subscribe())
    }

    /// Shared output graph, for wiring a render pump or device callback
    pub fn graph(&self) -> SharedGraph {
        Arc::clone(&self.graph)
    }

    /// The audio clock scheduling runs on
    pub fn clock(&self) -> Arc<dyn AudioClock> {
        Arc::clone(&self.clock)
    }

    pub fn stats(&self) -> Arc<PlayerStats> {
        Arc::clone(&self.stats)
    }

    /// Stop playback and end the reactor task
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(PlayerCommand::Shutdown);
    }
}

/// The reactor task: owns every piece of mutable player state
struct Reactor {
    config: PlayerConfig,
    clock: Arc<dyn AudioClock>,
    graph: SharedGraph,
    scheduler: PlaybackScheduler,
    connector: Arc<dyn SessionConnector>,
    stats: Arc<PlayerStats>,
    events_tx: broadcast::Sender<PlayerEvent>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,

    state: PlayerState,
    connection: Connection,
    connect_generation: u64,
    /// Set on transport failure, cleared by setup-complete; gates the
    /// one-per-failure error notification
    connection_error: bool,
    /// A play is waiting for the pending connect to resolve
    pending_play: bool,
    session_events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    prompts: PromptMap,
    filtered: FilteredPromptSet,
    frozen: bool,
    phrase: Option<PhraseWindow>,
    recorder: Option<Recorder>,

    /// When the look-ahead is full and playback turns audible
    preroll_deadline: Option<Instant>,
    /// When the coalesced prompt update goes out
    debounce_deadline: Option<Instant>,
    /// Next phrase progress emission
    frame_deadline: Option<Instant>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_session_event(
    rx: &mut Option<mpsc::UnboundedReceiver<SessionEvent>>,
) -> Option<SessionEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Reactor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<PlayerCommand>,
        mut internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    ) {
        debug!("player reactor started");

        loop {
            tokio::select! {
                // Bias towards commands so control stays responsive under
                // chunk floods
                biased;

                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        // all handles dropped
                        self.handle_stop();
                        break;
                    };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }

                // Completions of spawned work
                Some(event) = internal_rx.recv() => self.handle_internal(event),

                // Push events from the live transport
                event = next_session_event(&mut self.session_events) => {
                    match event {
                        Some(event) => self.handle_session_event(event),
                        None => self.on_events_channel_dropped(),
                    }
                }

                // Pre-roll expiry: look-ahead full, playback turns audible
                _ = sleep_until_opt(self.preroll_deadline) => self.on_preroll_fired(),

                // Debounce window closed: push the coalesced prompt update
                _ = sleep_until_opt(self.debounce_deadline) => self.on_debounce_fired(),

                // Display-frame cadence for phrase progress
                _ = sleep_until_opt(self.frame_deadline) => self.on_frame_fired(),
            }
        }

        debug!("player reactor exiting");
    }

    /// Returns false when the reactor should exit
    fn handle_command(&mut self, cmd: PlayerCommand) -> bool {
        match cmd {
            PlayerCommand::Play => self.handle_play(),
            PlayerCommand::Pause => self.handle_pause(),
            PlayerCommand::Stop => self.handle_stop(),
            PlayerCommand::PlayPause => match self.state {
                PlayerState::Playing => self.handle_pause(),
                PlayerState::Paused | PlayerState::Stopped => self.handle_play(),
                PlayerState::Loading => self.handle_stop(),
            },
            PlayerCommand::ToggleFreeze => self.handle_toggle_freeze(),
            PlayerCommand::ToggleRecording { reply } => {
                let _ = reply.send(self.handle_toggle_recording());
            }
            PlayerCommand::SetWeightedPrompts { prompts } => self.handle_set_prompts(prompts),
            PlayerCommand::State { reply } => {
                let _ = reply.send(self.state);
            }
            PlayerCommand::ActivePrompts { reply } => {
                let _ = reply.send(active_prompts(&self.prompts, &self.filtered));
            }
            PlayerCommand::Connection { reply } => {
                let _ = reply.send(match self.connection {
                    Connection::Idle => ConnectionState::Disconnected,
                    Connection::Pending { .. } => ConnectionState::Connecting,
                    Connection::Ready { .. } => ConnectionState::Connected,
                });
            }
            PlayerCommand::Shutdown => {
                self.handle_stop();
                return false;
            }
        }
        true
    }

    // === state machine ===

    fn handle_play(&mut self) {
        self.state = PlayerState::Loading;
        // audible from the moment play was requested, ramped over ramp_secs
        self.scheduler.ramp_up();

        let connected = matches!(self.connection, Connection::Ready { .. });
        if !connected {
            self.pending_play = true;
            if matches!(self.connection, Connection::Idle) {
                self.begin_connect();
            } else {
                debug!("connect already pending, play deferred");
            }
        }

        self.notify_state();

        if connected {
            self.run_play_sequence();
        }
    }

    /// Push current weights and ask the session to play; requires `Ready`
    fn run_play_sequence(&mut self) {
        let active = active_prompts(&self.prompts, &self.filtered);
        if active.is_empty() {
            warn!("refusing to play with no active prompts");
            self.emit_error(MSG_NEED_ACTIVE_PROMPT);
            self.handle_pause();
            return;
        }

        let Connection::Ready { session } = &self.connection else {
            return;
        };
        if let Err(e) = session.set_weighted_prompts(&active) {
            warn!(error = %e, "prompt push on play failed");
            let message = e.to_string();
            self.emit_error(message);
            self.handle_pause();
            return;
        }
        self.stats.prompt_updates_sent.fetch_add(1, Ordering::Relaxed);
        session.play();
        debug!(prompts = active.len(), "session told to play");
    }

    fn handle_pause(&mut self) {
        self.state = PlayerState::Paused;
        if let Connection::Ready { session } = &self.connection {
            session.pause();
        }
        // ramp down and orphan anything already scheduled; the session is
        // kept so resuming skips the reconnect
        self.scheduler.ramp_down_and_detach();
        self.preroll_deadline = None;
        // a connect still in flight caches its session but no longer owes a
        // play; resuming issues it
        self.pending_play = false;
        self.clear_phrase();
        self.notify_state();
        self.emit(PlayerEvent::PhraseProgressChanged { progress: 0.0 });
    }

    fn handle_stop(&mut self) {
        self.state = PlayerState::Stopped;
        self.release_session();
        self.scheduler.halt();
        self.preroll_deadline = None;
        self.clear_phrase();
        self.notify_state();
        self.emit(PlayerEvent::PhraseProgressChanged { progress: 0.0 });
    }

    fn release_session(&mut self) {
        if let Connection::Ready { session } = &self.connection {
            session.stop();
        }
        self.connection = Connection::Idle;
        self.session_events = None;
        self.pending_play = false;
    }

    fn clear_phrase(&mut self) {
        self.phrase = None;
        self.frame_deadline = None;
    }

    // === session lifecycle ===

    fn begin_connect(&mut self) {
        self.connect_generation += 1;
        let generation = self.connect_generation;
        // the error flag dedupes one connection's failure pair, not later
        // attempts: each fresh dial reports its own failure
        self.connection_error = false;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.session_events = Some(events_rx);
        self.connection = Connection::Pending { generation };
        info!(generation, "connecting to generation service");

        let connect = self.connector.connect(events_tx);
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = connect.await;
            let _ = internal.send(InternalEvent::ConnectFinished { generation, result });
        });
    }

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::ConnectFinished { generation, result } => {
                self.on_connect_finished(generation, result)
            }
            InternalEvent::RecordingFinished { result } => self.on_recording_finished(result),
        }
    }

    fn on_connect_finished(&mut self, generation: u64, result: Result<Box<dyn MusicSession>>) {
        let expected = matches!(
            self.connection,
            Connection::Pending { generation: current } if current == generation
        );
        if !expected {
            // a stop or a newer attempt superseded this connect
            debug!(generation, "discarding stale connect result");
            return;
        }

        match result {
            Ok(session) => {
                info!("session connected");
                self.connection = Connection::Ready { session };
                if std::mem::take(&mut self.pending_play) {
                    self.run_play_sequence();
                }
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
                self.session_events = None;
                self.on_transport_failure();
            }
        }
    }

    fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::SetupComplete => {
                debug!("session setup complete");
                self.connection_error = false;
            }
            SessionEvent::Phrase { duration_secs } => self.on_phrase_marker(duration_secs),
            SessionEvent::FilteredPrompt { text } => {
                if self.filtered.insert(text.clone()) {
                    debug!(text = %text, "prompt filtered by service");
                }
                self.emit(PlayerEvent::FilteredPrompt { text });
            }
            SessionEvent::AudioChunks(chunks) => self.handle_audio_chunks(chunks),
            SessionEvent::Error { message } => {
                warn!(message = %message, "session transport error");
                self.on_transport_failure();
            }
            SessionEvent::Closed => {
                info!("session closed by remote");
                self.on_transport_failure();
            }
        }
    }

    /// Transport dropped its event channel without a close message
    fn on_events_channel_dropped(&mut self) {
        self.session_events = None;
        if !matches!(self.connection, Connection::Idle) {
            warn!("session event channel dropped");
            self.on_transport_failure();
        }
    }

    fn on_transport_failure(&mut self) {
        if !self.connection_error {
            self.connection_error = true;
            self.emit_error(MSG_CONNECTION_ERROR);
        }
        self.handle_stop();
    }

    // === chunk pipeline ===

    fn handle_audio_chunks(&mut self, chunks: Vec<AudioChunk>) {
        for chunk in chunks {
            self.stats.chunks_received.fetch_add(1, Ordering::Relaxed);

            // no buffering across pause or stop: late chunks are dropped
            if matches!(self.state, PlayerState::Paused | PlayerState::Stopped) {
                self.stats.chunks_discarded.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let pcm = match decode_chunk(&chunk) {
                Ok(pcm) => pcm,
                Err(e) => {
                    warn!(error = %e, "dropping undecodable chunk");
                    self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            match self.scheduler.on_chunk(pcm) {
                ScheduleOutcome::Primed { start_time, ready_in } => {
                    self.stats.chunks_scheduled.fetch_add(1, Ordering::Relaxed);
                    debug!(start_time, "pre-roll armed");
                    self.preroll_deadline = Some(Instant::now() + ready_in);
                }
                ScheduleOutcome::Scheduled { .. } => {
                    self.stats.chunks_scheduled.fetch_add(1, Ordering::Relaxed);
                }
                ScheduleOutcome::Underrun => {
                    self.stats.underruns.fetch_add(1, Ordering::Relaxed);
                    self.stats.chunks_discarded.fetch_add(1, Ordering::Relaxed);
                    self.state = PlayerState::Loading;
                    self.notify_state();
                }
            }
        }
    }

    fn on_preroll_fired(&mut self) {
        self.preroll_deadline = None;
        if self.state != PlayerState::Loading {
            debug!(state = self.state.as_str(), "pre-roll fired outside loading");
            return;
        }
        self.state = PlayerState::Playing;
        info!("pre-roll complete, playback audible");
        self.notify_state();
        if self.phrase.is_some() && self.frame_deadline.is_none() {
            self.frame_deadline = Some(Instant::now() + self.config.frame_interval);
        }
    }

    // === phrase progress ===

    fn on_phrase_marker(&mut self, duration_secs: f64) {
        if duration_secs <= 0.0 {
            debug!(duration_secs, "ignoring phrase marker without duration");
            return;
        }
        let window = PhraseWindow::new(self.clock.now(), duration_secs);
        debug!(duration_secs, "phrase window installed");
        self.phrase = Some(window);
        // restart the progress loop; overwriting the deadline replaces any
        // prior arm, so there is never more than one loop
        self.frame_deadline = Some(Instant::now() + self.config.frame_interval);
    }

    fn on_frame_fired(&mut self) {
        self.frame_deadline = None;

        let window = match self.phrase {
            Some(window) if self.state == PlayerState::Playing => window,
            // no window, or not playing: report zero and stop polling
            _ => {
                self.emit(PlayerEvent::PhraseProgressChanged { progress: 0.0 });
                return;
            }
        };

        let now = self.clock.now();
        self.emit(PlayerEvent::PhraseProgressChanged {
            progress: window.progress_at(now),
        });
        // at 1 the value freezes until the next marker
        if !window.complete_at(now) {
            self.frame_deadline = Some(Instant::now() + self.config.frame_interval);
        }
    }

    // === prompts ===

    fn handle_set_prompts(&mut self, prompts: PromptMap) {
        self.prompts = prompts;
        // one outbound update per window, carrying whatever is latest when
        // the window closes
        if self.debounce_deadline.is_none() {
            self.debounce_deadline = Some(Instant::now() + self.config.prompt_debounce);
        }
    }

    fn on_debounce_fired(&mut self) {
        self.debounce_deadline = None;

        let active = active_prompts(&self.prompts, &self.filtered);
        if active.is_empty() {
            warn!("active prompt set is empty, pausing");
            self.emit_error(MSG_NEED_ACTIVE_PROMPT);
            self.handle_pause();
            return;
        }

        let Connection::Ready { session } = &self.connection else {
            debug!("no session, prompt update stays local");
            return;
        };
        match session.set_weighted_prompts(&active) {
            Ok(()) => {
                self.stats.prompt_updates_sent.fetch_add(1, Ordering::Relaxed);
                debug!(prompts = active.len(), "prompt weights pushed");
            }
            Err(e) => {
                warn!(error = %e, "prompt update rejected");
                let message = e.to_string();
                self.emit_error(message);
                self.handle_pause();
            }
        }
    }

    // === freeze ===

    fn handle_toggle_freeze(&mut self) {
        // optimistic flip, reverted if the session refuses
        let next = !self.frozen;
        self.frozen = next;
        self.emit(PlayerEvent::FreezeStateChanged { frozen: next });

        if let Connection::Ready { session } = &self.connection {
            if let Err(e) = session.set_looping(next) {
                warn!(error = %e, "freeze toggle rejected, reverting");
                self.frozen = !next;
                self.emit(PlayerEvent::FreezeStateChanged { frozen: !next });
            }
        }
    }

    // === recording ===

    fn handle_toggle_recording(&mut self) -> Result<bool, PlayerError> {
        if let Some(recorder) = self.recorder.take() {
            self.graph.lock().unwrap().take_record_tap();
            let internal = self.internal_tx.clone();
            tokio::spawn(async move {
                let result = recorder.finish().await;
                let _ = internal.send(InternalEvent::RecordingFinished { result });
            });
            info!("recording stopped, assembling export");
            self.emit(PlayerEvent::RecordingStateChanged { recording: false });
            return Ok(false);
        }

        if self.state != PlayerState::Playing {
            warn!(state = self.state.as_str(), "recording refused");
            self.emit_error(MSG_RECORDING_NEEDS_PLAYBACK);
            return Err(PlayerError::NotPlaying);
        }

        let (tap_tx, tap_rx) = mpsc::unbounded_channel();
        self.graph.lock().unwrap().install_record_tap(tap_tx);
        self.recorder = Some(Recorder::start(
            tap_rx,
            self.config.sample_rate,
            self.config.channels,
        ));
        info!("recording started");
        self.emit(PlayerEvent::RecordingStateChanged { recording: true });
        Ok(true)
    }

    fn on_recording_finished(&mut self, result: Result<Recording>) {
        match result {
            Ok(recording) => {
                self.stats
                    .recordings_completed
                    .fetch_add(1, Ordering::Relaxed);
                info!(
                    file = %recording.suggested_filename,
                    seconds = recording.duration_seconds,
                    "recording exported"
                );
                self.emit(PlayerEvent::AudioExported {
                    recording: Arc::new(recording),
                });
            }
            Err(e) => {
                warn!(error = %e, "recording assembly failed");
                self.emit_error(MSG_EXPORT_FAILED);
            }
        }
    }

    // === notifications ===

    fn notify_state(&self) {
        info!(state = self.state.as_str(), "playback state");
        self.emit(PlayerEvent::PlaybackStateChanged { state: self.state });
    }

    fn emit_error(&self, message: impl Into<String>) {
        self.emit(PlayerEvent::Error {
            message: message.into(),
        });
    }

    fn emit(&self, event: PlayerEvent) {
        // no subscribers is fine
        let _ = self.events_tx.send(event);
    }
}
