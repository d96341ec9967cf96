//! Realtime output handoff
//!
//! Renders the shared graph into a lock-free SPSC ring at a steady block
//! cadence. The consumer half goes to whatever drives the speakers (a
//! PipeWire or CPAL callback on the host side); the pump keeps the ring
//! topped up so the realtime callback only ever copies samples out.
//!
//! The pump tracks its own render head and advances it one block at a time,
//! resyncing to the shared clock if it drifts too far (device stall, long
//! suspend). The graph lock is held only for the duration of one rendered
//! block.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::AudioClock;
use crate::graph::SharedGraph;

/// Drift beyond which the render head snaps back to the clock, seconds
const RESYNC_THRESHOLD: f64 = 0.25;

/// Sizing for the render pump
#[derive(Debug, Clone)]
pub struct RenderPumpConfig {
    /// Frames rendered per block
    pub block_frames: usize,
    /// Ring capacity in frames
    pub ring_frames: usize,
}

impl Default for RenderPumpConfig {
    fn default() -> Self {
        Self {
            block_frames: 256,
            ring_frames: 8192,
        }
    }
}

/// Counters for the pump, relaxed ordering throughout
#[derive(Debug, Default)]
pub struct RenderPumpStats {
    /// Blocks rendered and pushed into the ring
    pub blocks_rendered: AtomicU64,
    /// Blocks skipped because the ring had no room
    pub ring_overruns: AtomicU64,
}

/// Paced task rendering the shared graph into an rtrb ring
pub struct RenderPump {
    running: Arc<AtomicBool>,
    stats: Arc<RenderPumpStats>,
    task: Option<JoinHandle<()>>,
}

impl RenderPump {
    /// Spawn the pump; returns the consumer half for the device callback
    pub fn spawn(
        graph: SharedGraph,
        clock: Arc<dyn AudioClock>,
        config: RenderPumpConfig,
    ) -> (Self, rtrb::Consumer<f32>) {
        let (sample_rate, channels) = {
            let g = graph.lock().unwrap();
            (g.sample_rate(), g.channels() as usize)
        };

        let (producer, consumer) = rtrb::RingBuffer::new(config.ring_frames * channels);
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(RenderPumpStats::default());

        let task = tokio::spawn(run_render_loop(
            graph,
            clock,
            producer,
            Arc::clone(&running),
            Arc::clone(&stats),
            config,
            sample_rate,
            channels,
        ));

        (
            Self {
                running,
                stats,
                task: Some(task),
            },
            consumer,
        )
    }

    /// Whether the pump task is still live
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Pump counters
    pub fn stats(&self) -> Arc<RenderPumpStats> {
        Arc::clone(&self.stats)
    }

    /// Stop rendering; idempotent
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for RenderPump {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_render_loop(
    graph: SharedGraph,
    clock: Arc<dyn AudioClock>,
    mut producer: rtrb::Producer<f32>,
    running: Arc<AtomicBool>,
    stats: Arc<RenderPumpStats>,
    config: RenderPumpConfig,
    sample_rate: u32,
    channels: usize,
) {
    let block_secs = config.block_frames as f64 / sample_rate as f64;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(block_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut head = clock.now();
    let mut block = vec![0.0f32; config.block_frames * channels];

    tracing::debug!(
        block_frames = config.block_frames,
        ring_frames = config.ring_frames,
        "render pump started"
    );

    while running.load(Ordering::Relaxed) {
        ticker.tick().await;

        let now = clock.now();
        if (now - head).abs() > RESYNC_THRESHOLD {
            tracing::debug!(head, now, "render head resynced to clock");
            head = now;
        }

        if producer.slots() < block.len() {
            stats.ring_overruns.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        graph.lock().unwrap().render(head, &mut block);
        for &sample in &block {
            // Room was checked above; a full ring here means the consumer
            // vanished mid-block, which the next overrun check absorbs
            if producer.push(sample).is_err() {
                break;
            }
        }

        head += block_secs;
        stats.blocks_rendered.fetch_add(1, Ordering::Relaxed);
    }

    tracing::debug!("render pump stopped");
}
