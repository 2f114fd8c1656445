//! Mixer layer slots
//!
//! A layer is one fixed-index entry in the mixer's lock-free table. The
//! game thread and audio thread coordinate exclusively through the atomic
//! fields; non-atomic data behind `shared` is written while the slot flag
//! is `Min` and published by the release-store of the flag.

use std::cell::UnsafeCell;
use std::sync::Arc;

use portable_atomic::{AtomicU8, AtomicU16, AtomicU32, AtomicU64, Ordering};

use em_core::{AtomicF32, AtomicGainPair};
use em_dsp::Resampler;
use em_spatial::{Attenuation, Orientation, Position3D};

use crate::nodes::NodeState;
use crate::sound::{SoundData, Spatialization};

/// Play state of a layer slot.
///
/// Lifetime: `Min` (free) → `Play`/`Loop` (active) ↔ `Halt` (paused) →
/// `Stop` → `Min`. All transitions between active states are CAS operations
/// on the layer flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PlayState {
    /// Slot is free
    Min = 0,
    /// Stopping, about to be reclaimed
    Stop = 1,
    /// Paused, resumable
    Halt = 2,
    /// Playing once through
    Play = 3,
    /// Playing with looping
    Loop = 4,
    /// Upper bound, not a valid state
    Max = 5,
}

impl PlayState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => PlayState::Stop,
            2 => PlayState::Halt,
            3 => PlayState::Play,
            4 => PlayState::Loop,
            5 => PlayState::Max,
            _ => PlayState::Min,
        }
    }
}

/// World-space parameters the game thread refreshes every frame.
///
/// Read by the pipeline nodes during mixing; both sides run under the
/// audio mutex.
#[derive(Debug, Clone)]
pub struct SpatialParams {
    pub location: Position3D,
    pub listener_position: Position3D,
    pub listener_orientation: Orientation,
    pub spatialization: Spatialization,
    pub attenuation: Attenuation,
    /// Smallest containing room's reverb send, 0 when outside all rooms
    pub room_reverb_gain: f32,
    /// Stereo pan in [-1, 1] for non-HRTF position spatialization
    pub pan: f32,
}

impl Default for SpatialParams {
    fn default() -> Self {
        Self {
            location: Position3D::origin(),
            listener_position: Position3D::origin(),
            listener_orientation: Orientation::identity(),
            spatialization: Spatialization::None,
            attenuation: Attenuation::default(),
            room_reverb_gain: 0.0,
            pan: 0.0,
        }
    }
}

/// Non-atomic layer data, guarded by the publication protocol above.
#[derive(Default)]
pub struct LayerShared {
    pub sound: Option<Arc<SoundData>>,
    pub converter: Option<Resampler>,
    pub spatial: SpatialParams,
    pub node_states: Vec<NodeState>,
}

/// One slot in the mixer's layer table.
pub struct Layer {
    pub(crate) id: AtomicU32,
    pub(crate) flag: AtomicU8,
    pub(crate) cursor: AtomicU64,
    pub(crate) gain: AtomicGainPair,
    pub(crate) pitch: AtomicF32,
    pub(crate) user_play_speed: AtomicF32,
    /// Smoothed play speed, audio thread only
    pub(crate) play_speed: AtomicF32,
    pub(crate) target_play_speed: AtomicF32,
    pub(crate) base_sample_rate_ratio: AtomicF32,
    pub(crate) sample_rate_ratio: AtomicF32,
    pub(crate) obstruction: AtomicF32,
    pub(crate) occlusion: AtomicF32,
    pub(crate) start: AtomicU64,
    pub(crate) end: AtomicU64,
    pub(crate) channels: AtomicU16,
    pub(crate) shared: UnsafeCell<LayerShared>,
}

// SAFETY: `shared` is only accessed while holding the mixer's audio mutex
// (play/destroy on the game thread, mixing on the audio thread); everything
// else is atomic.
unsafe impl Send for Layer {}
unsafe impl Sync for Layer {}

impl Default for Layer {
    fn default() -> Self {
        Self {
            id: AtomicU32::new(0),
            flag: AtomicU8::new(PlayState::Min as u8),
            cursor: AtomicU64::new(0),
            gain: AtomicGainPair::new(0.0, 0.0),
            pitch: AtomicF32::new(1.0),
            user_play_speed: AtomicF32::new(1.0),
            play_speed: AtomicF32::new(1.0),
            target_play_speed: AtomicF32::new(1.0),
            base_sample_rate_ratio: AtomicF32::new(1.0),
            sample_rate_ratio: AtomicF32::new(1.0),
            obstruction: AtomicF32::new(0.0),
            occlusion: AtomicF32::new(0.0),
            start: AtomicU64::new(0),
            end: AtomicU64::new(0),
            channels: AtomicU16::new(0),
            shared: UnsafeCell::new(LayerShared::default()),
        }
    }
}

impl Layer {
    #[inline]
    pub fn state(&self) -> PlayState {
        PlayState::from_u8(self.flag.load(Ordering::Acquire))
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id.load(Ordering::Acquire)
    }

    #[inline]
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.start.load(Ordering::Acquire)
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.end.load(Ordering::Acquire)
    }

    #[inline]
    pub fn gain(&self) -> (f32, f32) {
        self.gain.load(Ordering::Acquire)
    }

    #[inline]
    pub fn obstruction(&self) -> f32 {
        self.obstruction.load(Ordering::Acquire)
    }

    #[inline]
    pub fn occlusion(&self) -> f32 {
        self.occlusion.load(Ordering::Acquire)
    }

    #[inline]
    pub fn play_speed(&self) -> f32 {
        self.play_speed.load(Ordering::Acquire)
    }

    /// Access non-atomic layer data.
    ///
    /// # Safety
    /// The caller must hold the mixer's audio mutex.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn shared(&self) -> &mut LayerShared {
        unsafe { &mut *self.shared.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_state_from_u8() {
        assert_eq!(PlayState::from_u8(0), PlayState::Min);
        assert_eq!(PlayState::from_u8(3), PlayState::Play);
        assert_eq!(PlayState::from_u8(4), PlayState::Loop);
        assert_eq!(PlayState::from_u8(200), PlayState::Min);
    }

    #[test]
    fn test_state_ordering() {
        assert!(PlayState::Play > PlayState::Halt);
        assert!(PlayState::Halt > PlayState::Stop);
        assert!(PlayState::Stop > PlayState::Min);
    }

    #[test]
    fn test_default_layer_is_free() {
        let layer = Layer::default();
        assert_eq!(layer.state(), PlayState::Min);
        assert_eq!(layer.id(), 0);
    }
}
