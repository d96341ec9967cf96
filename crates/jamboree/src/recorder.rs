//! Output capture and export
//!
//! The recorder taps the shared output node while playing, accumulates
//! rendered blocks, and assembles them into a WAV container once stopped.
//! Assembly happens off the player loop; the finished artifact comes back
//! asynchronously and is announced with an `audio-exported` notification.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Media type of the container this recorder produces
pub const WAV_MEDIA_TYPE: &str = "audio/wav";

/// A finished capture, ready to hand to the caller
#[derive(Debug, Clone)]
pub struct Recording {
    pub id: Uuid,
    /// Complete container bytes
    pub data: Vec<u8>,
    /// Container media type, e.g. `audio/wav`
    pub media_type: String,
    /// Timestamped filename carrying the media type's extension
    pub suggested_filename: String,
    /// Captured length in seconds
    pub duration_seconds: f64,
    /// When capture started
    pub started_at: DateTime<Utc>,
}

impl Recording {
    /// Write the artifact into a directory under its suggested filename
    pub fn save_to(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let path = dir.as_ref().join(&self.suggested_filename);
        std::fs::write(&path, &self.data)
            .with_context(|| format!("failed to write recording to {}", path.display()))?;
        Ok(path)
    }
}

/// File extension for a media type, defaulting to `webm` when unresolvable
pub fn extension_for(media_type: &str) -> &'static str {
    let base = media_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match base.as_str() {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/webm" | "video/webm" => "webm",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        "audio/flac" => "flac",
        _ => "webm",
    }
}

/// An in-progress capture of the output stream
///
/// Capture runs on its own task so rendered blocks keep draining no matter
/// what the player loop is doing. `finish()` signals the task and resolves
/// once the container is assembled.
pub struct Recorder {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<Recording>>,
}

impl Recorder {
    /// Begin capturing blocks from a freshly installed record tap
    pub fn start(
        tap: mpsc::UnboundedReceiver<Vec<f32>>,
        sample_rate: u32,
        channels: u8,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let started_at = Utc::now();
        let task = tokio::spawn(capture_task(tap, stop_rx, sample_rate, channels, started_at));
        Self { stop_tx, task }
    }

    /// Stop capturing and assemble the container
    pub async fn finish(self) -> Result<Recording> {
        let _ = self.stop_tx.send(());
        self.task.await.context("recorder task panicked")?
    }
}

async fn capture_task(
    mut tap: mpsc::UnboundedReceiver<Vec<f32>>,
    mut stop_rx: oneshot::Receiver<()>,
    sample_rate: u32,
    channels: u8,
    started_at: DateTime<Utc>,
) -> Result<Recording> {
    let mut samples: Vec<f32> = Vec::new();

    loop {
        tokio::select! {
            block = tap.recv() => match block {
                Some(b) => samples.extend_from_slice(&b),
                None => break, // tap detached from the graph
            },
            _ = &mut stop_rx => break,
        }
    }

    // Catch blocks rendered before the tap came out
    while let Ok(b) = tap.try_recv() {
        samples.extend_from_slice(&b);
    }

    let frames = samples.len() / channels.max(1) as usize;
    tracing::debug!(frames, "assembling recording");

    let recording = tokio::task::spawn_blocking(move || {
        assemble_wav(&samples, sample_rate, channels, started_at)
    })
    .await
    .context("recording assembly panicked")??;

    Ok(recording)
}

/// Encode captured samples into an in-memory WAV container
fn assemble_wav(
    samples: &[f32],
    sample_rate: u32,
    channels: u8,
    started_at: DateTime<Utc>,
) -> Result<Recording> {
    let spec = hound::WavSpec {
        channels: channels as u16,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("failed to create WAV writer")?;
        for sample in samples {
            let value = (sample * 32767.0).clamp(-32767.0, 32767.0) as i16;
            writer
                .write_sample(value)
                .context("failed to write sample")?;
        }
        writer.finalize().context("failed to finalize WAV")?;
    }

    let frames = samples.len() / channels.max(1) as usize;
    let duration_seconds = frames as f64 / sample_rate as f64;
    let extension = extension_for(WAV_MEDIA_TYPE);
    let suggested_filename = format!(
        "jamboree-{}.{}",
        started_at.format("%Y%m%d-%H%M%S"),
        extension
    );

    Ok(Recording {
        id: Uuid::new_v4(),
        data: cursor.into_inner(),
        media_type: WAV_MEDIA_TYPE.to_string(),
        suggested_filename,
        duration_seconds,
        started_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_for_known_types() {
        assert_eq!(extension_for("audio/wav"), "wav");
        assert_eq!(extension_for("audio/x-wav"), "wav");
        assert_eq!(extension_for("audio/webm;codecs=opus"), "webm");
        assert_eq!(extension_for("audio/ogg"), "ogg");
        assert_eq!(extension_for("audio/mpeg"), "mp3");
        assert_eq!(extension_for("audio/flac"), "flac");
    }

    #[test]
    fn test_extension_falls_back_to_webm() {
        assert_eq!(extension_for("application/octet-stream"), "webm");
        assert_eq!(extension_for(""), "webm");
        assert_eq!(extension_for("audio/whatever"), "webm");
    }

    #[tokio::test]
    async fn test_capture_assembles_wav() {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Recorder::start(rx, 48_000, 2);

        // Three blocks of 128 stereo frames
        for _ in 0..3 {
            tx.send(vec![0.25f32; 256]).unwrap();
        }

        let recording = recorder.finish().await.unwrap();

        assert_eq!(recording.media_type, "audio/wav");
        assert!(recording.suggested_filename.starts_with("jamboree-"));
        assert!(recording.suggested_filename.ends_with(".wav"));

        let reader = hound::WavReader::new(Cursor::new(&recording.data)).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 48_000);
        assert_eq!(reader.len(), 3 * 256);

        let expected = 3.0 * 128.0 / 48_000.0;
        assert!((recording.duration_seconds - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_capture_picks_up_blocks_sent_before_finish() {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Recorder::start(rx, 48_000, 2);

        tx.send(vec![0.1f32; 64]).unwrap();
        tx.send(vec![0.2f32; 64]).unwrap();

        let recording = recorder.finish().await.unwrap();
        let reader = hound::WavReader::new(Cursor::new(&recording.data)).unwrap();
        assert_eq!(reader.len(), 128);
    }

    #[tokio::test]
    async fn test_capture_ends_when_tap_detached() {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Recorder::start(rx, 48_000, 2);

        tx.send(vec![0.5f32; 32]).unwrap();
        drop(tx);

        let recording = recorder.finish().await.unwrap();
        let reader = hound::WavReader::new(Cursor::new(&recording.data)).unwrap();
        assert_eq!(reader.len(), 32);
    }

    #[tokio::test]
    async fn test_empty_capture_is_valid_container() {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Recorder::start(rx, 48_000, 2);
        drop(tx);

        let recording = recorder.finish().await.unwrap();
        assert_eq!(recording.duration_seconds, 0.0);

        let reader = hound::WavReader::new(Cursor::new(&recording.data)).unwrap();
        assert_eq!(reader.len(), 0);
    }

    #[tokio::test]
    async fn test_save_to_writes_suggested_filename() {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Recorder::start(rx, 48_000, 2);
        tx.send(vec![0.0f32; 64]).unwrap();
        drop(tx);

        let recording = recorder.finish().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = recording.save_to(dir.path()).unwrap();

        assert!(path.exists());
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            recording.suggested_filename
        );
    }
}
