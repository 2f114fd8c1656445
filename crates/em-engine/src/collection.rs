//! Collection member selection
//!
//! Weighted random selection with optional no-repeat, plus the ordered
//! walk used by the PlayAll/LoopAll modes. The RNG is a XorShift64 so
//! selection never touches the allocator or the OS on the play path.

use serde::{Deserialize, Serialize};

use em_core::ObjectId;

/// How a collection dispatches its members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionPlayMode {
    /// Weighted random pick per play request
    #[default]
    Random,
    /// Rotate through every member once, then stop
    PlayAll,
    /// Rotate through every member, restarting when exhausted
    LoopAll,
}

/// One weighted member of a collection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub sound: ObjectId,
    pub weight: f32,
}

/// Per-channel selection state
#[derive(Debug, Clone)]
pub struct CollectionSelector {
    rng_state: u64,
    last_selected: Option<ObjectId>,
}

impl Default for CollectionSelector {
    fn default() -> Self {
        Self { rng_state: 0x853c49e6748fea9b, last_selected: None }
    }
}

impl CollectionSelector {
    pub fn seeded(seed: u64) -> Self {
        Self { rng_state: seed.max(1), last_selected: None }
    }

    /// Next random number in [0, 1) (XorShift64)
    #[inline]
    fn next_random(&mut self) -> f32 {
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        (x >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Weighted random pick, avoiding the previous pick when requested.
    pub fn select_random(
        &mut self,
        entries: &[CollectionEntry],
        avoid_repeat: bool,
    ) -> Option<ObjectId> {
        let total_weight: f32 = entries.iter().map(|e| e.weight.max(0.0)).sum();
        if total_weight <= 0.0 {
            return None;
        }

        const MAX_ATTEMPTS: usize = 10;
        for attempt in 0..MAX_ATTEMPTS {
            let r = self.next_random() * total_weight;
            let mut cumulative = 0.0;
            for entry in entries {
                cumulative += entry.weight.max(0.0);
                if r < cumulative {
                    let repeat = avoid_repeat && Some(entry.sound) == self.last_selected;
                    if repeat && entries.len() > 1 && attempt + 1 < MAX_ATTEMPTS {
                        break; // Try again
                    }
                    self.last_selected = Some(entry.sound);
                    return Some(entry.sound);
                }
            }
        }

        entries.first().map(|e| {
            self.last_selected = Some(e.sound);
            e.sound
        })
    }

    /// First member not yet in `played`, in declaration order.
    pub fn select_unplayed(
        &mut self,
        entries: &[CollectionEntry],
        played: &[ObjectId],
    ) -> Option<ObjectId> {
        let next = entries.iter().find(|e| !played.contains(&e.sound))?;
        self.last_selected = Some(next.sound);
        Some(next.sound)
    }
}
