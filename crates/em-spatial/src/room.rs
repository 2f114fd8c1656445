//! Rooms: bounded zones with reverb energy
//!
//! The engine keeps rooms sorted by volume descending so that when several
//! contain a source, the smallest containing room wins.

use serde::{Deserialize, Serialize};

use crate::position::Position3D;
use crate::shape::Zone;

/// A bounded acoustic space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub zone: Zone,
    /// Late reverb send gain while inside
    pub reverb_gain: f32,
    /// Early reflections send gain while inside
    pub reflections_gain: f32,
    /// Reverb decay time in seconds
    pub decay_time: f32,
}

impl Room {
    pub fn new(zone: Zone) -> Self {
        Self { zone, reverb_gain: 1.0, reflections_gain: 1.0, decay_time: 1.0 }
    }

    /// Interior volume of the outer shell
    pub fn volume(&self) -> f32 {
        self.zone.outer.volume()
    }

    pub fn contains(&self, point: &Position3D) -> bool {
        self.zone.contains(point)
    }

    /// Blend factor for the room's effect at the point
    pub fn factor(&self, point: &Position3D) -> f32 {
        self.zone.factor(point)
    }
}

/// Pick the smallest room containing the point from a volume-descending list.
pub fn best_room<'a>(rooms_by_volume_desc: &'a [Room], point: &Position3D) -> Option<&'a Room> {
    rooms_by_volume_desc.iter().rev().find(|room| room.contains(point))
}
