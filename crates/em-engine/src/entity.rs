//! Entities: positioned game objects that emit sounds

use std::collections::HashMap;

use em_core::ObjectId;
use em_spatial::{Orientation, Position3D};

/// One registered entity
#[derive(Debug, Clone)]
pub struct EntityState {
    pub id: ObjectId,
    pub position: Position3D,
    pub orientation: Orientation,
    pub velocity: Position3D,
    /// Environment id → amount in [0, 1]
    pub environment_factors: HashMap<ObjectId, f32>,
}

impl EntityState {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            position: Position3D::origin(),
            orientation: Orientation::identity(),
            velocity: Position3D::origin(),
            environment_factors: HashMap::new(),
        }
    }

    pub fn set_environment_factor(&mut self, environment: ObjectId, factor: f32) {
        self.environment_factors.insert(environment, factor.clamp(0.0, 1.0));
    }

    pub fn environment_factor(&self, environment: ObjectId) -> f32 {
        self.environment_factors.get(&environment).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_factors() {
        let mut entity = EntityState::new(1);
        entity.set_environment_factor(5, 0.75);
        entity.set_environment_factor(6, 2.0);

        assert_eq!(entity.environment_factor(5), 0.75);
        assert_eq!(entity.environment_factor(6), 1.0);
        assert_eq!(entity.environment_factor(7), 0.0);
    }
}
