//! Drives the player end to end against the in-memory mock transport
//!
//! A sine wave stands in for the generation service: half-second PCM16
//! chunks are pushed on a timer, the render pump pulls the mixed output
//! into a ring, and a drain task plays the part of a device callback.
//!
//! Run with: cargo run -p jamboree --example mock_session

use std::f32::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jamboree::{
    AudioChunk, MockConnector, Player, PlayerEvent, RenderPump, RenderPumpConfig,
    SessionConnector, SessionEvent, WeightedPrompt,
};

/// Half a second of service-rate audio per chunk
const CHUNK_FRAMES: usize = 24_000;

fn sine_chunk(phase: &mut f32) -> AudioChunk {
    let phase_inc = 2.0 * PI * 220.0 / 48_000.0;
    let mut bytes = Vec::with_capacity(CHUNK_FRAMES * 4);
    for _ in 0..CHUNK_FRAMES {
        let sample = (phase.sin() * 0.4 * 32767.0) as i16;
        let le = sample.to_le_bytes();
        bytes.extend_from_slice(&le); // Left
        bytes.extend_from_slice(&le); // Right
        *phase += phase_inc;
        if *phase >= 2.0 * PI {
            *phase -= 2.0 * PI;
        }
    }
    AudioChunk::pcm16(bytes)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Starting mock session demo...");

    let connector = Arc::new(MockConnector::new());
    let player = Player::new(Arc::clone(&connector) as Arc<dyn SessionConnector>);

    // Pump the shared graph into a ring and drain it like a device would
    let (mut pump, mut ring) =
        RenderPump::spawn(player.graph(), player.clock(), RenderPumpConfig::default());
    let drained = Arc::new(AtomicU64::new(0));
    let drain_counter = Arc::clone(&drained);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(5));
        loop {
            interval.tick().await;
            while ring.pop().is_ok() {
                drain_counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    // Print every notification as it happens
    let mut events = player.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                PlayerEvent::PlaybackStateChanged { state } => {
                    println!("event: playback-state-changed {state}");
                }
                PlayerEvent::PhraseProgressChanged { progress } => {
                    println!("event: phrase-progress {progress:.2}");
                }
                PlayerEvent::FilteredPrompt { text } => {
                    println!("event: filtered-prompt {text:?}");
                }
                PlayerEvent::FreezeStateChanged { frozen } => {
                    println!("event: freeze {frozen}");
                }
                PlayerEvent::RecordingStateChanged { recording } => {
                    println!("event: recording {recording}");
                }
                PlayerEvent::AudioExported { recording } => {
                    println!(
                        "event: audio-exported {} ({:.2}s)",
                        recording.suggested_filename, recording.duration_seconds
                    );
                }
                PlayerEvent::Error { message } => {
                    println!("event: error {message}");
                }
            }
        }
    });

    let mut prompts = jamboree::PromptMap::new();
    prompts.insert(
        "p1".to_string(),
        WeightedPrompt::new("p1", "warm analog pads", 1.0),
    );
    prompts.insert(
        "p2".to_string(),
        WeightedPrompt::new("p2", "slow dub delay", 0.6),
    );
    player.set_weighted_prompts(prompts);
    player.play();
    tokio::time::sleep(Duration::from_millis(100)).await;
    connector.push(SessionEvent::SetupComplete);

    // Stream slightly faster than real time so the buffer stays ahead
    println!("Streaming synthesized chunks for ~6 seconds...");
    let mut phase = 0.0f32;
    for i in 0..12 {
        connector.push(SessionEvent::AudioChunks(vec![sine_chunk(&mut phase)]));
        if i == 4 {
            connector.push(SessionEvent::Phrase { duration_secs: 4.0 });
        }
        tokio::time::sleep(Duration::from_millis(450)).await;
    }

    player.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;
    pump.stop();

    let stats = player.stats();
    let pump_stats = pump.stats();
    println!();
    println!("Stats:");
    println!(
        "  Chunks received:  {}",
        stats.chunks_received.load(Ordering::Relaxed)
    );
    println!(
        "  Chunks scheduled: {}",
        stats.chunks_scheduled.load(Ordering::Relaxed)
    );
    println!(
        "  Underruns:        {}",
        stats.underruns.load(Ordering::Relaxed)
    );
    println!(
        "  Blocks rendered:  {}",
        pump_stats.blocks_rendered.load(Ordering::Relaxed)
    );
    println!(
        "  Ring overruns:    {}",
        pump_stats.ring_overruns.load(Ordering::Relaxed)
    );
    println!("  Samples drained:  {}", drained.load(Ordering::Relaxed));

    player.shutdown();
    Ok(())
}
