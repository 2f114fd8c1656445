//! Listeners and listener selection

use crate::config::ListenerFetchMode;
use em_core::ObjectId;
use em_spatial::{Orientation, Position3D};

/// One registered listener
#[derive(Debug, Clone)]
pub struct ListenerState {
    pub id: ObjectId,
    pub position: Position3D,
    pub orientation: Orientation,
    pub velocity: Position3D,
    /// Registration order, drives First/Last fetch modes
    pub sequence: u64,
}

impl ListenerState {
    pub fn new(id: ObjectId, sequence: u64) -> Self {
        Self {
            id,
            position: Position3D::origin(),
            orientation: Orientation::identity(),
            velocity: Position3D::origin(),
            sequence,
        }
    }

    /// Transform a world-space point into listener space
    pub fn world_to_listener(&self, point: &Position3D) -> Position3D {
        self.orientation.world_to_local(&point.sub(&self.position))
    }

    pub fn distance_squared_to(&self, point: &Position3D) -> f32 {
        let local = self.world_to_listener(point);
        local.dot(&local)
    }
}

/// Pick the listener a channel should spatialize against.
///
/// `First`/`Last` select by registration order; the fetched listener's
/// transform is applied later by the spatialization path, never here.
pub fn find_best_listener<'a, I>(
    listeners: I,
    location: &Position3D,
    mode: ListenerFetchMode,
    default_listener: Option<ObjectId>,
) -> Option<&'a ListenerState>
where
    I: Iterator<Item = &'a ListenerState> + Clone,
{
    match mode {
        ListenerFetchMode::None => None,
        ListenerFetchMode::Nearest => listeners.min_by(|a, b| {
            a.distance_squared_to(location).total_cmp(&b.distance_squared_to(location))
        }),
        ListenerFetchMode::Farthest => listeners.max_by(|a, b| {
            a.distance_squared_to(location).total_cmp(&b.distance_squared_to(location))
        }),
        ListenerFetchMode::First => listeners.min_by_key(|l| l.sequence),
        ListenerFetchMode::Last => listeners.max_by_key(|l| l.sequence),
        ListenerFetchMode::Default => {
            let id = default_listener?;
            listeners.clone().find(|l| l.id == id)
        }
    }
}

/// Pitch multiplier from source/listener kinematics.
///
/// Velocities project onto the line between listener and source; the
/// result is clamped so extreme relative speeds stay audible.
pub fn doppler_pitch_factor(
    listener: &ListenerState,
    source_position: &Position3D,
    source_velocity: &Position3D,
    sound_speed: f32,
    doppler_factor: f32,
) -> f32 {
    if doppler_factor <= 0.0 || sound_speed <= 0.0 {
        return 1.0;
    }

    let offset = source_position.sub(&listener.position);
    let distance = offset.magnitude();
    if distance < 1e-4 {
        return 1.0;
    }
    let direction = offset.scale(1.0 / distance);

    // Positive = approaching
    let listener_toward = listener.velocity.dot(&direction);
    let source_toward = -source_velocity.dot(&direction);

    let numerator = sound_speed + doppler_factor * listener_toward;
    let denominator = sound_speed - doppler_factor * source_toward;
    if denominator.abs() < 1e-4 {
        return 4.0;
    }

    (numerator / denominator).clamp(0.25, 4.0)
}
