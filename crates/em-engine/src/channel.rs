//! Channels
//!
//! A channel is the game-visible handle to one playback instance. Not
//! every channel is backed by a mixer layer: when real slots run out,
//! low-priority channels are virtualized — tracked for priority and
//! timing but producing no audio.

use smallvec::SmallVec;

use crate::collection::CollectionSelector;
use crate::fader::{FadeCurve, Fader};
use crate::sources::SourceRef;
use em_core::ObjectId;
use em_mixer::LayerHandle;
use em_spatial::Position3D;

/// Playback state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelPlaybackState {
    #[default]
    Stopped,
    Playing,
    FadingIn,
    FadingOut,
    Paused,
    /// Crossing over to a new switch state's sounds
    SwitchingState,
}

/// Game-visible channel handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Channel {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl Channel {
    pub const INVALID: Self = Self { index: u32::MAX, generation: 0 };

    pub fn valid(&self) -> bool {
        self.index != u32::MAX && self.generation != 0
    }
}

/// Internal state of one channel slot
pub struct ChannelState {
    /// Bumped every time the slot is reused
    pub generation: u32,
    pub playback: ChannelPlaybackState,
    pub fader: Fader,
    /// State entered when the running fade completes
    pub fade_target: ChannelPlaybackState,
    pub source: Option<SourceRef>,
    pub entity: Option<ObjectId>,
    pub listener: Option<ObjectId>,
    pub location: Position3D,
    pub user_gain: f32,
    /// Effective gain last pushed to the mixer
    pub gain: f32,
    pub pan: f32,
    pub pitch: f32,
    /// gain × source priority, drives scheduling
    pub priority: f32,
    /// Mixer slot index backing this channel; None while virtual
    pub real_slot: Option<u32>,
    pub layer: LayerHandle,
    /// Playback progress in source frames while virtual
    pub virtual_cursor: f64,
    /// Collection members already played (PlayAll/LoopAll)
    pub played_sounds: SmallVec<[ObjectId; 8]>,
    pub selector: CollectionSelector,
    /// The member sound currently playing
    pub current_sound: Option<ObjectId>,
    /// Extra layers for switch containers playing children in parallel
    pub extra_layers: SmallVec<[LayerHandle; 4]>,
    pub doppler: f32,
    pub obstruction: f32,
    pub occlusion: f32,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            generation: 0,
            playback: ChannelPlaybackState::Stopped,
            fader: Fader::default(),
            fade_target: ChannelPlaybackState::Stopped,
            source: None,
            entity: None,
            listener: None,
            location: Position3D::origin(),
            user_gain: 1.0,
            gain: 0.0,
            pan: 0.0,
            pitch: 1.0,
            priority: 0.0,
            real_slot: None,
            layer: LayerHandle::INVALID,
            virtual_cursor: 0.0,
            played_sounds: SmallVec::new(),
            selector: CollectionSelector::default(),
            current_sound: None,
            extra_layers: SmallVec::new(),
            doppler: 1.0,
            obstruction: 0.0,
            occlusion: 0.0,
        }
    }
}

impl ChannelState {
    pub fn playing(&self) -> bool {
        !matches!(self.playback, ChannelPlaybackState::Stopped)
    }

    pub fn is_real(&self) -> bool {
        self.real_slot.is_some()
    }

    /// Begin a fade-in toward full fade gain.
    pub fn begin_fade_in(&mut self, duration: f32, curve: FadeCurve) {
        if duration <= 0.0 {
            self.fader.set(1.0);
            self.playback = ChannelPlaybackState::Playing;
        } else {
            self.fader.set(0.0);
            self.fader.start(1.0, duration, curve);
            self.playback = ChannelPlaybackState::FadingIn;
        }
        self.fade_target = ChannelPlaybackState::Playing;
    }

    /// Begin a fade-out ending in `target` (Paused or Stopped).
    pub fn begin_fade_out(&mut self, duration: f32, target: ChannelPlaybackState, curve: FadeCurve) {
        self.fade_target = target;
        if duration <= 0.0 {
            self.fader.set(0.0);
            self.playback = target;
        } else {
            self.fader.start(0.0, duration, curve);
            self.playback = ChannelPlaybackState::FadingOut;
        }
    }

    /// Reset for reuse from the free list.
    pub fn reset(&mut self) {
        let generation = self.generation;
        let selector = self.selector.clone();
        *self = Self::default();
        self.generation = generation;
        self.selector = selector;
    }

    /// Mark a collection member as played; returns true if every entry
    /// has now played.
    pub fn mark_played(&mut self, sound: ObjectId, total_entries: usize) -> bool {
        if !self.played_sounds.contains(&sound) {
            self.played_sounds.push(sound);
        }
        self.played_sounds.len() >= total_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_channel() {
        assert!(!Channel::INVALID.valid());
        assert!(!Channel::default().valid());
        assert!(Channel { index: 0, generation: 1 }.valid());
    }

    #[test]
    fn test_fade_in_zero_duration_is_playing() {
        let mut state = ChannelState::default();
        state.begin_fade_in(0.0, FadeCurve::Linear);
        assert_eq!(state.playback, ChannelPlaybackState::Playing);
        assert_eq!(state.fader.current(), 1.0);
    }

    #[test]
    fn test_fade_out_to_paused() {
        let mut state = ChannelState::default();
        state.begin_fade_in(0.0, FadeCurve::Linear);
        state.begin_fade_out(0.5, ChannelPlaybackState::Paused, FadeCurve::Linear);
        assert_eq!(state.playback, ChannelPlaybackState::FadingOut);

        state.fader.update(0.6);
        assert!(state.fader.finished());
        assert_eq!(state.fade_target, ChannelPlaybackState::Paused);
    }

    #[test]
    fn test_mark_played_tracks_completion() {
        let mut state = ChannelState::default();
        assert!(!state.mark_played(1, 3));
        assert!(!state.mark_played(2, 3));
        assert!(!state.mark_played(2, 3)); // Duplicate ignored
        assert!(state.mark_played(3, 3));
    }
}
