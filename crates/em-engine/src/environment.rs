//! Environments and rooms

use em_core::ObjectId;
use em_spatial::{Position3D, Room, Zone};

/// A zone with an attached effect, applied while its factor is non-zero
#[derive(Debug, Clone)]
pub struct EnvironmentState {
    pub id: ObjectId,
    pub zone: Zone,
    /// Effect handle applied to sounds inside the zone
    pub effect: ObjectId,
}

impl EnvironmentState {
    pub fn new(id: ObjectId, zone: Zone) -> Self {
        Self { id, zone, effect: 0 }
    }

    /// Environment amount at the point: 1 inside the inner shell, 0
    /// outside the outer, interpolated between.
    pub fn factor(&self, point: &Position3D) -> f32 {
        self.zone.factor(point)
    }
}

/// A registered room
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: ObjectId,
    pub room: Room,
}

impl RoomState {
    pub fn new(id: ObjectId, room: Room) -> Self {
        Self { id, room }
    }

    pub fn volume(&self) -> f32 {
        self.room.volume()
    }
}
