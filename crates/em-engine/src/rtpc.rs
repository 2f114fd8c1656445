//! Real-time parameter control
//!
//! Named floating-point values the game mutates, with optional smoothing
//! and curves mapping the normalized value onto sound parameters.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::fader::FadeCurve;
use em_core::ObjectId;

/// One registered RTPC
#[derive(Debug, Clone)]
pub struct Rtpc {
    pub id: ObjectId,
    pub name: String,
    pub min: f32,
    pub max: f32,
    value: f32,
    target: f32,
    /// Seconds to reach a new target; 0 = instant
    pub smooth_duration: f32,
}

impl Rtpc {
    pub fn new(id: ObjectId, name: impl Into<String>, min: f32, max: f32) -> Self {
        Self { id, name: name.into(), min, max, value: min, target: min, smooth_duration: 0.0 }
    }

    pub fn set_value(&mut self, value: f32) {
        self.target = value.clamp(self.min, self.max);
        if self.smooth_duration <= 0.0 {
            self.value = self.target;
        }
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    /// Normalized value in [0, 1]
    pub fn normalized(&self) -> f32 {
        let range = self.max - self.min;
        if range <= 0.0 { 0.0 } else { (self.value - self.min) / range }
    }

    pub fn update(&mut self, delta: f32) {
        if self.value == self.target {
            return;
        }
        if self.smooth_duration <= 0.0 {
            self.value = self.target;
            return;
        }
        let step = (self.max - self.min) * delta / self.smooth_duration;
        if (self.target - self.value).abs() <= step {
            self.value = self.target;
        } else if self.target > self.value {
            self.value += step;
        } else {
            self.value -= step;
        }
    }
}

/// Table of registered RTPCs
#[derive(Debug, Default)]
pub struct RtpcRegistry {
    by_id: HashMap<ObjectId, Rtpc>,
    names: HashMap<String, ObjectId>,
}

impl RtpcRegistry {
    pub fn register(&mut self, rtpc: Rtpc) {
        self.names.insert(rtpc.name.clone(), rtpc.id);
        self.by_id.insert(rtpc.id, rtpc);
    }

    pub fn get(&self, id: ObjectId) -> Option<&Rtpc> {
        self.by_id.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Rtpc> {
        self.by_id.get_mut(&id)
    }

    pub fn id_of(&self, name: &str) -> Option<ObjectId> {
        self.names.get(name).copied()
    }

    pub fn update(&mut self, delta: f32) {
        for rtpc in self.by_id.values_mut() {
            rtpc.update(delta);
        }
    }
}

/// Mapping from an RTPC's normalized value onto a parameter range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpcBinding {
    pub rtpc: ObjectId,
    pub min_value: f32,
    pub max_value: f32,
    #[serde(default)]
    pub curve: FadeCurve,
}

/// A sound parameter that is either constant or RTPC-driven
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpcValue {
    pub base: f32,
    #[serde(default)]
    pub binding: Option<RtpcBinding>,
}

impl RtpcValue {
    pub fn constant(base: f32) -> Self {
        Self { base, binding: None }
    }

    pub fn value(&self, registry: &RtpcRegistry) -> f32 {
        match &self.binding {
            None => self.base,
            Some(binding) => match registry.get(binding.rtpc) {
                None => self.base,
                Some(rtpc) => {
                    let t = binding.curve.apply(rtpc.normalized());
                    binding.min_value + t * (binding.max_value - binding.min_value)
                }
            },
        }
    }
}

impl Default for RtpcValue {
    fn default() -> Self {
        Self::constant(1.0)
    }
}
