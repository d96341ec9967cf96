//! Audio chunk decoding
//!
//! Turns opaque encoded chunks pushed by the generation service into PCM
//! ready for scheduling. The service's native wire format is raw 16-bit
//! little-endian interleaved PCM at the session sample rate; WAV-wrapped
//! chunks decode via hound (always available) and compressed containers via
//! symphonia when the `symphonia-decode` feature is enabled.
//!
//! Decode failures drop the chunk, never the session. Callers count and log
//! them; playback continues with whatever arrives next.

use std::io::Cursor;

use bytes::Bytes;

/// Output sample rate the generation service delivers
pub const SERVICE_SAMPLE_RATE: u32 = 48_000;

/// Output channel count after normalization
pub const SERVICE_CHANNELS: u8 = 2;

/// One unit of encoded audio pushed by the remote session
///
/// Chunks are transient: decoded immediately in arrival order, then
/// discarded. The optional media type comes from the transport layer; when
/// absent the payload is treated as raw PCM16.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Encoded payload
    pub data: Bytes,
    /// Declared media type, e.g. `audio/L16;rate=48000`
    pub mime_type: Option<String>,
}

impl AudioChunk {
    /// Chunk with an explicit media type
    pub fn new(data: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: Some(mime_type.into()),
        }
    }

    /// Raw PCM16 chunk with no declared type (the common case)
    pub fn pcm16(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            mime_type: None,
        }
    }
}

/// Decoded interleaved PCM
///
/// Samples are interleaved (L, R, L, R, ...) floats in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    /// Interleaved samples
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (1 = mono, 2 = stereo)
    pub channels: u8,
}

impl PcmBuffer {
    /// Total number of frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Duplicate mono up to stereo; stereo passes through unchanged
    fn into_stereo(self) -> Self {
        if self.channels != 1 {
            return self;
        }
        let mut samples = Vec::with_capacity(self.samples.len() * 2);
        for s in &self.samples {
            samples.push(*s);
            samples.push(*s);
        }
        Self {
            samples,
            sample_rate: self.sample_rate,
            channels: 2,
        }
    }
}

/// Why a chunk could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("empty chunk")]
    Empty,

    #[error("PCM16 payload truncated: {bytes} bytes is not a whole stereo frame")]
    Truncated { bytes: usize },

    #[error("sample rate {got} Hz does not match session rate {want} Hz")]
    SampleRateMismatch { got: u32, want: u32 },

    #[error("unsupported channel count {0}")]
    UnsupportedChannels(u8),

    #[error("failed to parse WAV chunk: {0}")]
    Wav(#[from] hound::Error),

    #[cfg(feature = "symphonia-decode")]
    #[error("symphonia decode failed: {0}")]
    Symphonia(#[from] symphonia::core::errors::Error),

    #[error("unsupported media type {0:?} (enable symphonia-decode for compressed chunks)")]
    UnsupportedFormat(Option<String>),
}

/// Decode raw 16-bit little-endian interleaved stereo PCM
///
/// No header to consult, so the service contract fixes rate and channel
/// count. A payload that does not divide into whole stereo frames is
/// rejected rather than silently dropping the tail.
pub fn decode_pcm16(data: &[u8]) -> Result<PcmBuffer, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }
    let frame_bytes = 2 * SERVICE_CHANNELS as usize;
    if data.len() % frame_bytes != 0 {
        return Err(DecodeError::Truncated { bytes: data.len() });
    }

    let mut samples = Vec::with_capacity(data.len() / 2);
    for pair in data.chunks_exact(2) {
        let v = i16::from_le_bytes([pair[0], pair[1]]);
        samples.push(v as f32 / 32768.0);
    }

    Ok(PcmBuffer {
        samples,
        sample_rate: SERVICE_SAMPLE_RATE,
        channels: SERVICE_CHANNELS,
    })
}

/// Decode a WAV-wrapped chunk via hound
pub fn decode_wav(data: &[u8]) -> Result<PcmBuffer, DecodeError> {
    let cursor = Cursor::new(data);
    let reader = hound::WavReader::new(cursor)?;

    let spec = reader.spec();
    let channels = spec.channels as u8;
    let sample_rate = spec.sample_rate;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample;
            let max_val = (1i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(PcmBuffer {
        samples,
        sample_rate,
        channels,
    })
}

/// Decode a compressed chunk via symphonia (MP3, FLAC, OGG, ...)
#[cfg(feature = "symphonia-decode")]
pub fn decode_compressed(data: &[u8]) -> Result<PcmBuffer, DecodeError> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let cursor = Cursor::new(data.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe().format(
        &Hint::new(),
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| SymphoniaError::Unsupported("no audio track"))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| SymphoniaError::Unsupported("no sample rate"))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u8)
        .unwrap_or(SERVICE_CHANNELS);

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let track_id = track.id;
    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        let spec = *decoded.spec();
        let duration = decoded.capacity();

        let mut sample_buf = SampleBuffer::<f32>::new(duration as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend(sample_buf.samples());
    }

    Ok(PcmBuffer {
        samples,
        sample_rate,
        channels,
    })
}

/// Decode a chunk into the fixed session format (48 kHz stereo)
///
/// Dispatch order: declared PCM16 types and untyped payloads take the raw
/// path unless the bytes carry a RIFF header; WAV types go through hound;
/// anything else needs symphonia. Mono results are duplicated to stereo and
/// a mismatched sample rate is a decode error, since resampling is not this
/// layer's job.
pub fn decode_chunk(chunk: &AudioChunk) -> Result<PcmBuffer, DecodeError> {
    let is_riff = chunk.data.len() >= 4 && &chunk.data[0..4] == b"RIFF";

    let decoded = match chunk.mime_type.as_deref() {
        Some(t) if is_pcm16_type(t) => decode_pcm16(&chunk.data)?,
        Some(t) if is_wav_type(t) => decode_wav(&chunk.data)?,
        None if is_riff => decode_wav(&chunk.data)?,
        None => decode_pcm16(&chunk.data)?,
        Some(_other) => {
            if is_riff {
                decode_wav(&chunk.data)?
            } else {
                #[cfg(feature = "symphonia-decode")]
                {
                    decode_compressed(&chunk.data)?
                }
                #[cfg(not(feature = "symphonia-decode"))]
                {
                    return Err(DecodeError::UnsupportedFormat(chunk.mime_type.clone()));
                }
            }
        }
    };

    if decoded.sample_rate != SERVICE_SAMPLE_RATE {
        return Err(DecodeError::SampleRateMismatch {
            got: decoded.sample_rate,
            want: SERVICE_SAMPLE_RATE,
        });
    }
    match decoded.channels {
        1 | 2 => Ok(decoded.into_stereo()),
        other => Err(DecodeError::UnsupportedChannels(other)),
    }
}

fn is_pcm16_type(mime: &str) -> bool {
    let lower = mime.to_ascii_lowercase();
    lower.starts_with("audio/l16") || lower.starts_with("audio/pcm")
}

fn is_wav_type(mime: &str) -> bool {
    let lower = mime.to_ascii_lowercase();
    lower.starts_with("audio/wav") || lower.starts_with("audio/x-wav")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode interleaved f32 samples as raw PCM16-LE bytes
    fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
        let mut out = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            let v = (s * 32767.0).clamp(-32768.0, 32767.0) as i16;
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Generate an in-memory WAV file
    fn generate_test_wav(channels: u16, sample_rate: u32, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let t = i as f32 / sample_rate as f32;
                let sample = (2.0 * std::f32::consts::PI * 440.0 * t).sin();
                for _ in 0..channels {
                    writer.write_sample(sample).unwrap();
                }
            }
            writer.finalize().unwrap();
        }

        cursor.into_inner()
    }

    #[test]
    fn test_decode_pcm16_values() {
        let bytes = pcm16_bytes(&[0.0, 0.0, 0.5, -0.5]);
        let pcm = decode_pcm16(&bytes).unwrap();

        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.sample_rate, 48_000);
        assert_eq!(pcm.frames(), 2);
        assert!((pcm.samples[2] - 0.5).abs() < 0.001);
        assert!((pcm.samples[3] + 0.5).abs() < 0.001);
    }

    #[test]
    fn test_decode_pcm16_full_scale() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&i16::MIN.to_le_bytes());
        bytes.extend_from_slice(&i16::MAX.to_le_bytes());
        let pcm = decode_pcm16(&bytes).unwrap();

        assert_eq!(pcm.samples[0], -1.0);
        assert!((pcm.samples[1] - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_decode_pcm16_rejects_empty() {
        assert!(matches!(decode_pcm16(&[]), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_pcm16_rejects_partial_frame() {
        // 6 bytes = 3 samples = 1.5 stereo frames
        let err = decode_pcm16(&[0u8; 6]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { bytes: 6 }));
    }

    #[test]
    fn test_decode_chunk_untyped_is_pcm16() {
        let bytes = pcm16_bytes(&[0.25; 8]);
        let chunk = AudioChunk::pcm16(bytes);
        let pcm = decode_chunk(&chunk).unwrap();

        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.frames(), 4);
    }

    #[test]
    fn test_decode_chunk_l16_mime() {
        let bytes = pcm16_bytes(&[0.1, 0.2, 0.3, 0.4]);
        let chunk = AudioChunk::new(bytes, "audio/L16;rate=48000");
        let pcm = decode_chunk(&chunk).unwrap();

        assert_eq!(pcm.frames(), 2);
    }

    #[test]
    fn test_decode_chunk_detects_riff() {
        let wav = generate_test_wav(2, 48_000, 480);
        let chunk = AudioChunk::pcm16(wav);
        let pcm = decode_chunk(&chunk).unwrap();

        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.frames(), 480);
    }

    #[test]
    fn test_decode_chunk_mono_duplicated_to_stereo() {
        let wav = generate_test_wav(1, 48_000, 100);
        let chunk = AudioChunk::new(wav, "audio/wav");
        let pcm = decode_chunk(&chunk).unwrap();

        assert_eq!(pcm.channels, 2);
        assert_eq!(pcm.frames(), 100);
        // L and R carry the same signal
        assert_eq!(pcm.samples[10], pcm.samples[11]);
    }

    #[test]
    fn test_decode_chunk_rejects_wrong_rate() {
        let wav = generate_test_wav(2, 44_100, 100);
        let chunk = AudioChunk::new(wav, "audio/wav");
        let err = decode_chunk(&chunk).unwrap_err();

        assert!(matches!(
            err,
            DecodeError::SampleRateMismatch {
                got: 44_100,
                want: 48_000
            }
        ));
    }

    #[cfg(not(feature = "symphonia-decode"))]
    #[test]
    fn test_decode_chunk_unknown_type_unsupported() {
        let chunk = AudioChunk::new(vec![1u8, 2, 3, 4], "audio/ogg");
        let err = decode_chunk(&chunk).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_duration_seconds() {
        let bytes = pcm16_bytes(&[0.0; 96_000 * 2]);
        let pcm = decode_pcm16(&bytes).unwrap();

        assert_eq!(pcm.frames(), 96_000);
        assert!((pcm.duration_seconds() - 2.0).abs() < 0.001);
    }
}
