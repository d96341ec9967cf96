//! Phrase progress telemetry
//!
//! The generation service brackets musical phrases with markers carrying a
//! duration. The player samples progress through the current phrase once
//! per display frame while playing and reports it as a fraction in [0, 1].
//! Progress freezes at 1 when the phrase ends and stays there until the
//! next marker installs a fresh window.

/// Bounds of the current phrase on the audio clock
///
/// Installed by a phrase marker; the duration is always positive (the
/// session layer drops non-positive markers).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhraseWindow {
    /// Clock reading when the phrase began
    pub started_at: f64,
    /// Phrase length in seconds
    pub duration_secs: f64,
}

impl PhraseWindow {
    /// Window starting at the given clock reading
    pub fn new(started_at: f64, duration_secs: f64) -> Self {
        Self {
            started_at,
            duration_secs,
        }
    }

    /// Elapsed fraction of the phrase at a clock reading, clamped to [0, 1]
    pub fn progress_at(&self, now: f64) -> f64 {
        ((now - self.started_at) / self.duration_secs).clamp(0.0, 1.0)
    }

    /// True once the phrase end has been reached
    pub fn complete_at(&self, now: f64) -> bool {
        self.progress_at(now) >= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_at_start_is_zero() {
        let window = PhraseWindow::new(10.0, 4.0);
        assert_eq!(window.progress_at(10.0), 0.0);
    }

    #[test]
    fn test_progress_at_midpoint() {
        let window = PhraseWindow::new(10.0, 4.0);
        assert!((window.progress_at(12.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_progress_reaches_one_at_end() {
        let window = PhraseWindow::new(10.0, 4.0);
        assert_eq!(window.progress_at(14.0), 1.0);
        assert!(window.complete_at(14.0));
    }

    #[test]
    fn test_progress_frozen_past_end() {
        let window = PhraseWindow::new(10.0, 4.0);
        assert_eq!(window.progress_at(15.0), 1.0);
        assert_eq!(window.progress_at(100.0), 1.0);
    }

    #[test]
    fn test_progress_clamps_before_start() {
        // A marker can land while the clock reads slightly behind it
        let window = PhraseWindow::new(10.0, 4.0);
        assert_eq!(window.progress_at(9.5), 0.0);
        assert!(!window.complete_at(9.5));
    }
}
