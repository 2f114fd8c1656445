//! Sound data attached to playing layers

use std::cell::UnsafeCell;

use em_core::AudioBuffer;
use em_dsp::align_frames;
use em_spatial::Attenuation;

/// Frames held in a streaming source's refill chunk
pub const STREAM_CHUNK_FRAMES: usize = 512;

/// Sample format of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// How a source is positioned in the world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Spatialization {
    /// No spatial processing, plain stereo playback
    #[default]
    None,
    /// Panned by position relative to the listener
    Position,
    /// Panned by position and source orientation
    PositionOrientation,
    /// Full HRTF binaural rendering
    Hrtf,
}

/// Supplies frames for streaming sources.
///
/// Called from the audio thread under the audio mutex; implementations must
/// not block on I/O — buffer ahead on a loader thread instead.
pub trait SoundStreamer: Send {
    /// Refill `chunk` with up to `frames` frames starting at source frame
    /// `offset`. Returns the number of frames provided; fewer than requested
    /// means end-of-source.
    fn stream(&mut self, chunk: &mut AudioBuffer, offset: u64, frames: u64) -> u64;
}

/// Audio payload of one playing sound instance.
///
/// For in-memory sounds `chunk` holds the fully decoded data; for streaming
/// sounds it is a refill window written by the [`SoundStreamer`].
pub struct SoundData {
    format: SoundFormat,
    /// Total length in frames, aligned to the SIMD block size
    length: u64,
    inner: UnsafeCell<SoundDataInner>,
    streaming: bool,
}

pub(crate) struct SoundDataInner {
    pub chunk: AudioBuffer,
    pub streamer: Option<Box<dyn SoundStreamer>>,
}

// SAFETY: `inner` is only touched by the audio thread while it holds the
// mixer's audio mutex; all other fields are immutable after construction.
unsafe impl Send for SoundData {}
unsafe impl Sync for SoundData {}

impl SoundData {
    /// Create an in-memory sound from planar data.
    ///
    /// Data shorter than the aligned length is zero-padded. Returns `None`
    /// for empty data or unsupported channel counts.
    pub fn from_buffer(data: AudioBuffer, format: SoundFormat) -> Option<Self> {
        if data.frames() == 0 || !(1..=2).contains(&format.channels) {
            return None;
        }

        let length = align_frames(data.frames());
        let mut chunk = AudioBuffer::new(length, format.channels as usize);
        chunk.copy_from(0, &data, 0, data.frames());

        Some(Self {
            format,
            length: length as u64,
            inner: UnsafeCell::new(SoundDataInner { chunk, streamer: None }),
            streaming: false,
        })
    }

    /// Create a streaming sound of `length` frames backed by a streamer.
    pub fn from_streamer(
        streamer: Box<dyn SoundStreamer>,
        length: u64,
        format: SoundFormat,
    ) -> Option<Self> {
        if length == 0 || !(1..=2).contains(&format.channels) {
            return None;
        }

        Some(Self {
            format,
            length: align_frames(length as usize) as u64,
            inner: UnsafeCell::new(SoundDataInner {
                chunk: AudioBuffer::new(STREAM_CHUNK_FRAMES, format.channels as usize),
                streamer: Some(streamer),
            }),
            streaming: true,
        })
    }

    pub fn format(&self) -> SoundFormat {
        self.format
    }

    /// Length in frames, always a multiple of the SIMD block size
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Access the chunk and streamer.
    ///
    /// # Safety
    /// The caller must hold the mixer's audio mutex.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn inner(&self) -> &mut SoundDataInner {
        unsafe { &mut *self.inner.get() }
    }
}

/// Per-play settings the channel layer attaches to a layer
#[derive(Debug, Clone, Default)]
pub struct SoundInstanceSettings {
    pub spatialization: Spatialization,
    pub attenuation: Attenuation,
    /// Total number of times the sound should play; 0 = loop forever
    pub loop_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_is_aligned() {
        let mut data = AudioBuffer::new(5, 1);
        data.channel_mut(0).copy_from_slice(&[1.0; 5]);
        let sound = SoundData::from_buffer(data, SoundFormat { sample_rate: 48000, channels: 1 }).unwrap();
        assert_eq!(sound.length(), 8);
    }

    #[test]
    fn test_invalid_sounds_rejected() {
        let data = AudioBuffer::new(0, 1);
        assert!(SoundData::from_buffer(data, SoundFormat { sample_rate: 48000, channels: 1 }).is_none());

        let data = AudioBuffer::new(8, 4);
        assert!(SoundData::from_buffer(data, SoundFormat { sample_rate: 48000, channels: 4 }).is_none());
    }
}
