//! Shared output graph
//!
//! Models the playback output as a chain of scheduled PCM sources feeding a
//! shared output node with a linear gain envelope. The node is replaced
//! wholesale on pause so buffers scheduled against the old node are orphaned:
//! they drain silently through the ramped-down envelope and are pruned,
//! guaranteeing nothing stale sounds after a resume.
//!
//! Rendering is pure math over `[now, now + block)` against the shared audio
//! clock: mix every overlapping source, apply the per-generation envelope and
//! master gain, then feed the destination plus the optional monitor and
//! recording taps.

use std::sync::{Arc, Mutex};

use portable_atomic::AtomicF32;
use std::sync::atomic::Ordering;
use tokio::sync::mpsc;

use crate::decode::PcmBuffer;

/// Output graph shared between the player reactor and the render side
pub type SharedGraph = Arc<Mutex<OutputGraph>>;

/// Linear gain segment on the audio clock
///
/// Holds `from` before `start`, interpolates linearly to `to` across
/// `[start, end]`, then holds `to`. A constant gain is a zero-length ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainRamp {
    from: f32,
    to: f32,
    start: f64,
    end: f64,
}

impl GainRamp {
    /// Fixed gain with no transition
    pub fn constant(value: f32) -> Self {
        Self {
            from: value,
            to: value,
            start: 0.0,
            end: 0.0,
        }
    }

    /// Linear transition between two gains
    pub fn linear(from: f32, to: f32, start: f64, end: f64) -> Self {
        Self {
            from,
            to,
            start,
            end,
        }
    }

    /// Gain at a clock reading
    pub fn value_at(&self, t: f64) -> f32 {
        if t >= self.end || self.end <= self.start {
            self.to
        } else if t <= self.start {
            self.from
        } else {
            let frac = ((t - self.start) / (self.end - self.start)) as f32;
            self.from + (self.to - self.from) * frac
        }
    }

    /// True once the ramp has settled at zero
    fn silent_at(&self, t: f64) -> bool {
        self.to == 0.0 && t >= self.end
    }
}

/// One PCM buffer scheduled at an absolute clock time
#[derive(Debug)]
struct ScheduledSource {
    start_time: f64,
    pcm: PcmBuffer,
}

impl ScheduledSource {
    fn end_time(&self) -> f64 {
        self.start_time + self.pcm.duration_seconds()
    }
}

/// The shared output node: envelope plus the sources wired into it
#[derive(Debug)]
struct OutputNode {
    envelope: GainRamp,
    sources: Vec<ScheduledSource>,
}

impl OutputNode {
    fn new() -> Self {
        Self {
            // A fresh node passes signal at unity until a ramp is issued
            envelope: GainRamp::constant(1.0),
            sources: Vec::new(),
        }
    }
}

/// Scheduled-buffer graph with generation-based node replacement
///
/// The last generation is the live output node; earlier generations are
/// detached nodes still draining their ramp-down. Scheduling, ramps, and
/// node replacement always target the live node.
#[derive(Debug)]
pub struct OutputGraph {
    sample_rate: u32,
    channels: u8,
    generations: Vec<OutputNode>,
    /// Master gain shared with external controls (relaxed ordering)
    master_gain: Arc<AtomicF32>,
    monitor_tap: Option<mpsc::UnboundedSender<Vec<f32>>>,
    record_tap: Option<mpsc::UnboundedSender<Vec<f32>>>,
}

impl OutputGraph {
    /// Empty graph with one live output node at unity gain
    pub fn new(sample_rate: u32, channels: u8) -> Self {
        Self {
            sample_rate,
            channels,
            generations: vec![OutputNode::new()],
            master_gain: Arc::new(AtomicF32::new(1.0)),
            monitor_tap: None,
            record_tap: None,
        }
    }

    /// Output sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output channel count
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Handle to the master gain control
    pub fn master_gain(&self) -> Arc<AtomicF32> {
        Arc::clone(&self.master_gain)
    }

    /// Wire a buffer into the live node at an absolute start time
    pub fn schedule(&mut self, pcm: PcmBuffer, start_time: f64) {
        debug_assert_eq!(pcm.channels, self.channels);
        tracing::debug!(
            start_time,
            frames = pcm.frames(),
            "buffer scheduled"
        );
        self.live_node().sources.push(ScheduledSource {
            start_time,
            pcm,
        });
    }

    /// Ramp the live node between two explicit gains
    pub fn ramp(&mut self, from: f32, to: f32, now: f64, duration: f64) {
        self.live_node().envelope = GainRamp::linear(from, to, now, now + duration);
    }

    /// Ramp the live node from its current gain to a target
    pub fn ramp_to(&mut self, to: f32, now: f64, duration: f64) {
        let from = self.live_node().envelope.value_at(now);
        self.ramp(from, to, now, duration);
    }

    /// Replace the live output node with a fresh one
    ///
    /// Sources wired to the old node are orphaned: they keep draining
    /// through its (typically ramped-down) envelope until pruned. Taps and
    /// master gain carry over to the new node.
    pub fn replace_output(&mut self) {
        let orphaned: usize = self
            .generations
            .last()
            .map(|g| g.sources.len())
            .unwrap_or(0);
        tracing::debug!(orphaned, "output node replaced");
        self.generations.push(OutputNode::new());
    }

    /// Drop every scheduled source on every node immediately
    pub fn halt(&mut self) {
        let dropped: usize = self.generations.iter().map(|g| g.sources.len()).sum();
        if dropped > 0 {
            tracing::debug!(dropped, "scheduled sources halted");
        }
        self.generations = vec![OutputNode::new()];
    }

    /// Attach the optional extra output sink
    pub fn install_monitor_tap(&mut self, tx: mpsc::UnboundedSender<Vec<f32>>) {
        self.monitor_tap = Some(tx);
    }

    /// Attach the recording tap
    pub fn install_record_tap(&mut self, tx: mpsc::UnboundedSender<Vec<f32>>) {
        self.record_tap = Some(tx);
    }

    /// Detach the recording tap, if any
    pub fn take_record_tap(&mut self) -> Option<mpsc::UnboundedSender<Vec<f32>>> {
        self.record_tap.take()
    }

    /// Number of scheduled sources across all nodes
    pub fn scheduled_source_count(&self) -> usize {
        self.generations.iter().map(|g| g.sources.len()).sum()
    }

    /// Start times of every scheduled source, sorted
    pub fn scheduled_starts(&self) -> Vec<f64> {
        let mut starts: Vec<f64> = self
            .generations
            .iter()
            .flat_map(|g| g.sources.iter().map(|s| s.start_time))
            .collect();
        starts.sort_by(|a, b| a.partial_cmp(b).unwrap());
        starts
    }

    /// Gain of the live node at a clock reading
    pub fn gain_at(&self, now: f64) -> f32 {
        self.generations
            .last()
            .map(|g| g.envelope.value_at(now))
            .unwrap_or(0.0)
    }

    /// Render one block starting at `now` into an interleaved buffer
    ///
    /// Sums every overlapping source through its node's envelope and the
    /// master gain, then feeds the monitor and recording taps with a copy.
    /// Finished sources and fully drained stale nodes are pruned here.
    pub fn render(&mut self, now: f64, out: &mut [f32]) {
        out.fill(0.0);

        let channels = self.channels as usize;
        let frames = out.len() / channels;
        let sr = self.sample_rate as f64;
        let block_end = now + frames as f64 / sr;
        let master = self.master_gain.load(Ordering::Relaxed);

        for node in &self.generations {
            for source in &node.sources {
                if source.start_time >= block_end || source.end_time() <= now {
                    continue;
                }

                let src_frames = source.pcm.frames() as i64;
                // Source frame index corresponding to the first output frame
                let base = ((now - source.start_time) * sr).round() as i64;

                for i in 0..frames as i64 {
                    let sf = base + i;
                    if sf < 0 || sf >= src_frames {
                        continue;
                    }
                    let t = now + i as f64 / sr;
                    let gain = node.envelope.value_at(t) * master;
                    for ch in 0..channels {
                        let src_idx = (sf as usize) * channels + ch;
                        let dst_idx = (i as usize) * channels + ch;
                        out[dst_idx] += source.pcm.samples[src_idx] * gain;
                    }
                }
            }
        }

        self.prune(block_end);
        self.feed_taps(out);
    }

    fn live_node(&mut self) -> &mut OutputNode {
        if self.generations.is_empty() {
            self.generations.push(OutputNode::new());
        }
        self.generations.last_mut().expect("live output node")
    }

    /// Drop finished sources, then drop stale nodes with nothing left to say
    fn prune(&mut self, block_end: f64) {
        for node in &mut self.generations {
            node.sources.retain(|s| s.end_time() > block_end + 1e-9);
        }

        let live = self.generations.len().saturating_sub(1);
        let mut idx = 0;
        self.generations.retain(|g| {
            let stale = idx != live;
            idx += 1;
            !(stale && (g.sources.is_empty() || g.envelope.silent_at(block_end)))
        });
    }

    fn feed_taps(&mut self, block: &[f32]) {
        if let Some(tx) = &self.monitor_tap {
            if tx.send(block.to_vec()).is_err() {
                self.monitor_tap = None;
            }
        }
        if let Some(tx) = &self.record_tap {
            if tx.send(block.to_vec()).is_err() {
                self.record_tap = None;
            }
        }
    }
}

/// Convenience constructor for the shared form
pub fn shared_graph(sample_rate: u32, channels: u8) -> SharedGraph {
    Arc::new(Mutex::new(OutputGraph::new(sample_rate, channels)))
}
