//! Channel scheduling lists
//!
//! The scheduler owns three lists: the priority-ordered playing list
//! (ascending, head is the next eviction candidate), the free channel
//! slots, and the pool of real mixer slots. Real slot indices are tokens:
//! a channel holding one is real; the rest are virtual.

/// Scheduling lists for channel states stored in the engine's arena
pub struct Scheduler {
    /// Channel indices ordered by ascending priority
    playing: Vec<usize>,
    free_channels: Vec<usize>,
    /// Mixer layer slot indices available for real playback (1-based)
    free_real_slots: Vec<u32>,
    total_real: usize,
}

impl Scheduler {
    /// `total_channels` = active + virtual; real slots are mixer layer
    /// indices 1..=active.
    pub fn new(total_channels: usize, active_channels: usize) -> Self {
        Self {
            playing: Vec::with_capacity(total_channels),
            free_channels: (0..total_channels).rev().collect(),
            free_real_slots: (1..=active_channels as u32).rev().collect(),
            total_real: active_channels,
        }
    }

    pub fn active_channel_count(&self) -> usize {
        self.total_real
    }

    pub fn playing(&self) -> &[usize] {
        &self.playing
    }

    pub fn acquire_channel(&mut self) -> Option<usize> {
        self.free_channels.pop()
    }

    pub fn release_channel(&mut self, index: usize) {
        self.free_channels.push(index);
    }

    pub fn acquire_real_slot(&mut self) -> Option<u32> {
        self.free_real_slots.pop()
    }

    pub fn release_real_slot(&mut self, slot: u32) {
        self.free_real_slots.push(slot);
    }

    pub fn has_free_channel(&self) -> bool {
        !self.free_channels.is_empty()
    }

    pub fn real_slots_in_use(&self) -> usize {
        self.total_real - self.free_real_slots.len()
    }

    /// Lowest-priority playing channel, the eviction candidate
    pub fn lowest(&self) -> Option<usize> {
        self.playing.first().copied()
    }

    /// Insert into the playing list keeping ascending priority order.
    pub fn insert_playing(&mut self, index: usize, priority: f32, priority_of: impl Fn(usize) -> f32) {
        let position = self
            .playing
            .partition_point(|&existing| priority_of(existing) <= priority);
        self.playing.insert(position, index);
    }

    pub fn remove_playing(&mut self, index: usize) {
        self.playing.retain(|&existing| existing != index);
    }

    /// Re-sort after per-frame priority updates.
    pub fn sort_playing(&mut self, priority_of: impl Fn(usize) -> f32) {
        self.playing.sort_by(|&a, &b| priority_of(a).total_cmp(&priority_of(b)));
    }

    /// Verify ascending order, for debug assertions and tests.
    pub fn is_sorted(&self, priority_of: impl Fn(usize) -> f32) -> bool {
        self.playing.windows(2).all(|w| priority_of(w[0]) <= priority_of(w[1]))
    }
}
