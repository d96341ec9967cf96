//! Look-ahead playback scheduling
//!
//! Chunks arrive from the network at irregular intervals; the scheduler
//! turns them into a continuous, click-free signal by chaining decoded
//! buffers back-to-back on the shared audio clock:
//!
//! - The first chunk after a reset primes a fixed pre-roll: playback becomes
//!   audible `buffer_delay` seconds later, absorbing initial jitter.
//! - Each subsequent chunk is scheduled at `next_start_time`, which advances
//!   by exactly the buffer's duration, so the chain has no gaps or overlaps.
//! - A chunk arriving after `next_start_time` has already passed means the
//!   look-ahead was exhausted (underrun): the chunk is discarded, the chain
//!   resets, and the next arrival re-primes pre-roll from scratch.
//!
//! The caller maps outcomes onto state transitions: `Primed` arms the
//! pre-roll timer toward `playing`, `Underrun` drops back to `loading`.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::AudioClock;
use crate::decode::PcmBuffer;
use crate::graph::SharedGraph;

/// What happened to a chunk handed to the scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleOutcome {
    /// First chunk after a reset: pre-roll primed, audible after `ready_in`
    Primed { start_time: f64, ready_in: Duration },
    /// Appended to the gap-free chain at `start_time`
    Scheduled { start_time: f64 },
    /// Look-ahead exhausted: chunk discarded, chain reset
    Underrun,
}

/// Chunk-to-buffer scheduler with a fixed pre-roll
pub struct PlaybackScheduler {
    clock: Arc<dyn AudioClock>,
    graph: SharedGraph,
    /// Pre-roll between first chunk arrival and audible playback, seconds
    buffer_delay: f64,
    /// Gain transition length for play/pause/stop, seconds
    ramp_secs: f64,
    /// Start of the next buffer in the chain; None = chain unset
    next_start_time: Option<f64>,
}

impl PlaybackScheduler {
    pub fn new(
        clock: Arc<dyn AudioClock>,
        graph: SharedGraph,
        buffer_delay: f64,
        ramp_secs: f64,
    ) -> Self {
        Self {
            clock,
            graph,
            buffer_delay,
            ramp_secs,
            next_start_time: None,
        }
    }

    /// Start of the next buffer in the chain, if primed
    pub fn next_start_time(&self) -> Option<f64> {
        self.next_start_time
    }

    /// Schedule one decoded chunk against the audio clock
    pub fn on_chunk(&mut self, pcm: PcmBuffer) -> ScheduleOutcome {
        let now = self.clock.now();
        let duration = pcm.duration_seconds();

        match self.next_start_time {
            Some(next) if next < now => {
                tracing::warn!(
                    next_start_time = next,
                    now,
                    "buffer underrun, discarding chunk and resetting chain"
                );
                self.next_start_time = None;
                ScheduleOutcome::Underrun
            }
            Some(next) => {
                self.graph.lock().unwrap().schedule(pcm, next);
                self.next_start_time = Some(next + duration);
                ScheduleOutcome::Scheduled { start_time: next }
            }
            None => {
                let start_time = now + self.buffer_delay;
                tracing::debug!(start_time, "pre-roll primed");
                self.graph.lock().unwrap().schedule(pcm, start_time);
                self.next_start_time = Some(start_time + duration);
                ScheduleOutcome::Primed {
                    start_time,
                    ready_in: Duration::from_secs_f64(self.buffer_delay),
                }
            }
        }
    }

    /// Play requested: ramp gain up from silence to unity
    pub fn ramp_up(&mut self) {
        let now = self.clock.now();
        self.graph.lock().unwrap().ramp(0.0, 1.0, now, self.ramp_secs);
    }

    /// Pause: ramp down, then swap in a fresh output node
    ///
    /// Buffers already scheduled stay wired to the old node and drain
    /// silently; the chain resets so resume re-primes pre-roll.
    pub fn ramp_down_and_detach(&mut self) {
        let now = self.clock.now();
        let mut graph = self.graph.lock().unwrap();
        graph.ramp_to(0.0, now, self.ramp_secs);
        graph.replace_output();
        drop(graph);
        self.next_start_time = None;
    }

    /// Stop: drop every scheduled source immediately
    ///
    /// Gain is cut to zero and ramped back to unity so the next play starts
    /// from a settled envelope.
    pub fn halt(&mut self) {
        let now = self.clock.now();
        let mut graph = self.graph.lock().unwrap();
        graph.halt();
        graph.ramp(0.0, 1.0, now, self.ramp_secs);
        drop(graph);
        self.next_start_time = None;
    }

    /// Number of sources currently wired into the graph
    pub fn scheduled_source_count(&self) -> usize {
        self.graph.lock().unwrap().scheduled_source_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::graph::shared_graph;

    const SR: u32 = 48_000;

    /// Stereo chunk of the given duration
    fn chunk(duration_secs: f64) -> PcmBuffer {
        let frames = (duration_secs * SR as f64) as usize;
        PcmBuffer {
            samples: vec![0.1; frames * 2],
            sample_rate: SR,
            channels: 2,
        }
    }

    fn scheduler_at(now: f64) -> (PlaybackScheduler, Arc<ManualClock>, SharedGraph) {
        let clock = Arc::new(ManualClock::new(now));
        let graph = shared_graph(SR, 2);
        let scheduler = PlaybackScheduler::new(
            Arc::clone(&clock) as Arc<dyn AudioClock>,
            Arc::clone(&graph),
            2.0,
            0.1,
        );
        (scheduler, clock, graph)
    }

    #[test]
    fn test_first_chunk_primes_preroll() {
        let (mut scheduler, _clock, graph) = scheduler_at(100.0);

        let outcome = scheduler.on_chunk(chunk(0.5));
        match outcome {
            ScheduleOutcome::Primed {
                start_time,
                ready_in,
            } => {
                assert_eq!(start_time, 102.0);
                assert_eq!(ready_in, Duration::from_secs(2));
            }
            other => panic!("expected Primed, got {:?}", other),
        }

        assert_eq!(graph.lock().unwrap().scheduled_starts(), vec![102.0]);
        assert_eq!(scheduler.next_start_time(), Some(102.5));
    }

    #[test]
    fn test_chunks_chain_without_gaps() {
        let (mut scheduler, _clock, graph) = scheduler_at(100.0);

        scheduler.on_chunk(chunk(0.5));
        let second = scheduler.on_chunk(chunk(0.5));
        let third = scheduler.on_chunk(chunk(0.25));

        assert_eq!(second, ScheduleOutcome::Scheduled { start_time: 102.5 });
        assert_eq!(third, ScheduleOutcome::Scheduled { start_time: 103.0 });
        assert_eq!(
            graph.lock().unwrap().scheduled_starts(),
            vec![102.0, 102.5, 103.0]
        );
        assert_eq!(scheduler.next_start_time(), Some(103.25));
    }

    #[test]
    fn test_underrun_discards_chunk_and_resets() {
        let (mut scheduler, clock, graph) = scheduler_at(100.0);
        scheduler.on_chunk(chunk(0.5)); // next = 102.5

        // The clock overtakes the chain before the next chunk lands
        clock.set(103.0);
        let outcome = scheduler.on_chunk(chunk(0.5));

        assert_eq!(outcome, ScheduleOutcome::Underrun);
        assert_eq!(scheduler.next_start_time(), None);
        // The discarded chunk was never wired in
        assert_eq!(graph.lock().unwrap().scheduled_starts(), vec![102.0]);
    }

    #[test]
    fn test_chunk_after_underrun_reprimes() {
        let (mut scheduler, clock, _graph) = scheduler_at(100.0);
        scheduler.on_chunk(chunk(0.5));
        clock.set(103.0);
        scheduler.on_chunk(chunk(0.5));

        let outcome = scheduler.on_chunk(chunk(0.5));
        assert!(matches!(
            outcome,
            ScheduleOutcome::Primed { start_time, .. } if start_time == 105.0
        ));
    }

    #[test]
    fn test_exact_boundary_is_not_underrun() {
        let (mut scheduler, clock, _graph) = scheduler_at(100.0);
        scheduler.on_chunk(chunk(0.5)); // next = 102.5

        clock.set(102.5);
        let outcome = scheduler.on_chunk(chunk(0.5));
        assert_eq!(outcome, ScheduleOutcome::Scheduled { start_time: 102.5 });
    }

    #[test]
    fn test_halt_clears_chain_and_settles_gain() {
        let (mut scheduler, clock, graph) = scheduler_at(100.0);
        scheduler.on_chunk(chunk(0.5));
        scheduler.on_chunk(chunk(0.5));

        scheduler.halt();

        assert_eq!(scheduler.next_start_time(), None);
        assert_eq!(scheduler.scheduled_source_count(), 0);
        // Compensating ramp leaves the envelope at unity for the next play
        clock.advance(0.2);
        assert_eq!(graph.lock().unwrap().gain_at(clock.now()), 1.0);
    }

    #[test]
    fn test_ramp_down_and_detach_orphans_chain() {
        let (mut scheduler, _clock, graph) = scheduler_at(100.0);
        scheduler.on_chunk(chunk(0.5));

        scheduler.ramp_down_and_detach();

        assert_eq!(scheduler.next_start_time(), None);
        // Source still exists, wired to the detached node
        assert_eq!(scheduler.scheduled_source_count(), 1);
        // The live node is a fresh one at unity
        assert_eq!(graph.lock().unwrap().gain_at(100.0), 1.0);
    }

    #[test]
    fn test_ramp_up_starts_from_silence() {
        let (mut scheduler, clock, graph) = scheduler_at(100.0);
        scheduler.ramp_up();

        let graph = graph.lock().unwrap();
        assert_eq!(graph.gain_at(100.0), 0.0);
        assert!((graph.gain_at(100.05) - 0.5).abs() < 0.001);
        clock.advance(0.1);
        assert_eq!(graph.gain_at(clock.now()), 1.0);
    }
}
