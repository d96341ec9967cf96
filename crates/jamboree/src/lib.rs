//! Jamboree: Streaming Generated-Music Playback
//!
//! Client-side playback core for a remote music generation service. The
//! service pushes irregular encoded audio chunks over a live session;
//! jamboree decodes them, chains them gap-free on a shared audio clock, and
//! exposes transport controls with the semantics hosts expect:
//!
//! - **Player**: stopped/loading/playing/paused state machine driven by a
//!   single reactor task; every transition is broadcast
//! - **Scheduler**: look-ahead chaining with a fixed pre-roll and underrun
//!   recovery
//! - **Session**: connector/session traits over the transport, with a
//!   cached single-flight connect
//! - **Output**: shared gain graph rendered by a paced pump into a
//!   lock-free ring for the host's device callback
//! - **Recorder**: taps the rendered output and assembles a WAV export

pub mod clock;
pub mod decode;
pub mod graph;
pub mod output;
pub mod phrase;
pub mod player;
pub mod prompts;
pub mod recorder;
pub mod scheduler;
pub mod session;

pub use clock::{AudioClock, ManualClock, WallClock};
pub use decode::{
    decode_chunk, AudioChunk, DecodeError, PcmBuffer, SERVICE_CHANNELS, SERVICE_SAMPLE_RATE,
};
pub use graph::{shared_graph, GainRamp, OutputGraph, SharedGraph};
pub use output::{RenderPump, RenderPumpConfig, RenderPumpStats};
pub use phrase::PhraseWindow;
pub use player::{Player, PlayerConfig, PlayerError, PlayerEvent, PlayerState, PlayerStats};
pub use prompts::{active_prompts, FilteredPromptSet, PromptMap, WeightedPrompt};
pub use recorder::{extension_for, Recorder, Recording, WAV_MEDIA_TYPE};
pub use scheduler::{PlaybackScheduler, ScheduleOutcome};
pub use session::{
    ConnectionState, MockConnector, MockSession, MusicSession, SessionCall, SessionConnector,
    SessionEvent,
};
