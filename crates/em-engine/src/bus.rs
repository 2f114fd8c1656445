//! Bus tree and ducking
//!
//! Buses form a tree rooted at the master bus. Each frame the engine
//! resets duck drive, evaluates duck rules against bus input levels, then
//! walks the tree computing `final = parent_final × fade × duck ×
//! user_gain` breadth-first from master.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::fader::{FadeCurve, Fader};
use em_core::{EngineError, EngineResult, ObjectId};

/// Conventional master bus id
pub const MASTER_BUS_ID: ObjectId = 1;

/// Conventional master bus name
pub const MASTER_BUS_NAME: &str = "master";

fn default_gain() -> f32 {
    1.0
}

fn default_threshold() -> f32 {
    0.5
}

/// A bus to duck when this bus's input level crosses the threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuckBusDefinition {
    /// Bus to attenuate
    pub id: ObjectId,
    /// Gain the ducked bus settles at while triggered
    pub target_gain: f32,
    /// Input level that triggers the duck
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Seconds to reach the ducked gain
    pub attack: f32,
    /// Seconds to restore after the trigger clears
    pub release: f32,
}

/// One bus entry in the buses file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusDefinition {
    pub id: ObjectId,
    pub name: String,
    #[serde(default = "default_gain")]
    pub gain: f32,
    #[serde(default)]
    pub child_buses: Vec<ObjectId>,
    #[serde(default)]
    pub duck_buses: Vec<DuckBusDefinition>,
}

impl BusDefinition {
    pub fn master() -> Self {
        Self {
            id: MASTER_BUS_ID,
            name: MASTER_BUS_NAME.into(),
            gain: 1.0,
            child_buses: Vec::new(),
            duck_buses: Vec::new(),
        }
    }
}

/// Runtime state of one bus
#[derive(Debug)]
struct BusState {
    definition: BusDefinition,
    user_gain: f32,
    fader: Fader,
    duck_gain: f32,
    /// Where the duck gain is being driven this frame
    duck_goal: f32,
    final_gain: f32,
    /// Loudest channel gain routed here this frame
    input_level: f32,
}

impl BusState {
    fn new(definition: BusDefinition) -> Self {
        let mut fader = Fader::default();
        fader.set(1.0);
        Self {
            user_gain: definition.gain,
            definition,
            fader,
            duck_gain: 1.0,
            duck_goal: 1.0,
            final_gain: 1.0,
            input_level: 0.0,
        }
    }
}

/// The immutable-shape bus tree; only gains and fades mutate after build.
pub struct BusTree {
    buses: Vec<BusState>,
    by_id: HashMap<ObjectId, usize>,
    by_name: HashMap<String, usize>,
    /// (bus, parent) pairs in BFS order from master
    order: Vec<(usize, Option<usize>)>,
}

impl BusTree {
    pub fn from_definitions(definitions: Vec<BusDefinition>) -> EngineResult<Self> {
        if definitions.is_empty() {
            return Err(EngineError::ConfigInvalid("buses file defines no buses".into()));
        }

        let mut by_id = HashMap::new();
        let mut by_name = HashMap::new();
        for (index, def) in definitions.iter().enumerate() {
            if by_id.insert(def.id, index).is_some() {
                return Err(EngineError::ConfigInvalid(format!("duplicate bus id {}", def.id)));
            }
            by_name.insert(def.name.clone(), index);
        }

        let master = by_id
            .get(&MASTER_BUS_ID)
            .or_else(|| by_name.get(MASTER_BUS_NAME))
            .copied()
            .ok_or_else(|| EngineError::ConfigInvalid("no master bus defined".into()))?;

        for def in &definitions {
            for child in &def.child_buses {
                if !by_id.contains_key(child) {
                    return Err(EngineError::ConfigInvalid(format!(
                        "bus {} lists unknown child {child}",
                        def.id
                    )));
                }
            }
            for duck in &def.duck_buses {
                if !by_id.contains_key(&duck.id) {
                    return Err(EngineError::ConfigInvalid(format!(
                        "bus {} ducks unknown bus {}",
                        def.id, duck.id
                    )));
                }
            }
        }

        // BFS from master; revisiting a bus means a cycle or a diamond
        let mut order = Vec::with_capacity(definitions.len());
        let mut visited = vec![false; definitions.len()];
        let mut queue = std::collections::VecDeque::new();
        queue.push_back((master, None));
        visited[master] = true;

        while let Some((index, parent)) = queue.pop_front() {
            order.push((index, parent));
            for child in &definitions[index].child_buses {
                let child_index = by_id[child];
                if visited[child_index] {
                    return Err(EngineError::ConfigInvalid(format!(
                        "bus {child} appears in more than one place in the tree"
                    )));
                }
                visited[child_index] = true;
                queue.push_back((child_index, Some(index)));
            }
        }

        // Buses outside the master tree still advance, parented to nothing
        for index in 0..definitions.len() {
            if !visited[index] {
                order.push((index, None));
            }
        }

        Ok(Self {
            buses: definitions.into_iter().map(BusState::new).collect(),
            by_id,
            by_name,
            order,
        })
    }

    pub fn find(&self, id: ObjectId) -> Option<ObjectId> {
        self.by_id.contains_key(&id).then_some(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<ObjectId> {
        self.by_name.get(name).map(|&index| self.buses[index].definition.id)
    }

    pub fn set_gain(&mut self, id: ObjectId, gain: f32) -> bool {
        let Some(&index) = self.by_id.get(&id) else { return false };
        self.buses[index].user_gain = gain;
        true
    }

    pub fn fade_gain(&mut self, id: ObjectId, to: f32, duration: f32, curve: FadeCurve) -> bool {
        let Some(&index) = self.by_id.get(&id) else { return false };
        self.buses[index].fader.start(to, duration, curve);
        true
    }

    pub fn user_gain(&self, id: ObjectId) -> Option<f32> {
        self.by_id.get(&id).map(|&index| self.buses[index].user_gain)
    }

    pub fn final_gain(&self, id: ObjectId) -> f32 {
        self.by_id.get(&id).map(|&index| self.buses[index].final_gain).unwrap_or(0.0)
    }

    /// Clear per-frame input levels before channels report theirs.
    pub fn reset_input_levels(&mut self) {
        for bus in &mut self.buses {
            bus.input_level = 0.0;
        }
    }

    /// Report a playing channel's gain into its bus.
    pub fn bump_input_level(&mut self, id: ObjectId, gain: f32) {
        if let Some(&index) = self.by_id.get(&id) {
            let bus = &mut self.buses[index];
            bus.input_level = bus.input_level.max(gain);
        }
    }

    /// Advance fades and ducking, then recompute final gains.
    pub fn advance_frame(&mut self, delta: f32, master_gain: f32) {
        // Reset duck goals, then let every duck rule drive its target
        for bus in &mut self.buses {
            bus.duck_goal = 1.0;
        }

        for index in 0..self.buses.len() {
            let (level, ducks) = {
                let bus = &self.buses[index];
                (bus.input_level, bus.definition.duck_buses.clone())
            };
            for duck in ducks {
                if level > duck.threshold {
                    let target_index = self.by_id[&duck.id];
                    let target = &mut self.buses[target_index];
                    target.duck_goal = target.duck_goal.min(duck.target_gain);
                }
            }
        }

        // Move duck gains toward their goals over attack/release times
        for index in 0..self.buses.len() {
            let goal = self.buses[index].duck_goal;
            let (attack, release) = self.duck_times_for(index);
            let bus = &mut self.buses[index];

            let time = if goal < bus.duck_gain { attack } else { release };
            if time <= 0.0 {
                bus.duck_gain = goal;
            } else {
                let step = delta / time;
                if (goal - bus.duck_gain).abs() <= step {
                    bus.duck_gain = goal;
                } else if goal < bus.duck_gain {
                    bus.duck_gain -= step;
                } else {
                    bus.duck_gain += step;
                }
            }

            bus.fader.update(delta);
        }

        for &(index, parent) in &self.order {
            let parent_final = match parent {
                Some(parent) => self.buses[parent].final_gain,
                None => master_gain,
            };
            let bus = &mut self.buses[index];
            bus.final_gain = parent_final * bus.fader.current() * bus.duck_gain * bus.user_gain;
        }
    }

    /// Attack/release applied to a bus come from whichever rule ducks it.
    fn duck_times_for(&self, target: usize) -> (f32, f32) {
        let target_id = self.buses[target].definition.id;
        for bus in &self.buses {
            for duck in &bus.definition.duck_buses {
                if duck.id == target_id {
                    return (duck.attack, duck.release);
                }
            }
        }
        (0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_bus_tree() -> BusTree {
        let mut master = BusDefinition::master();
        master.child_buses = vec![2, 3];
        let music = BusDefinition { id: 2, name: "music".into(), gain: 1.0, child_buses: vec![], duck_buses: vec![] };
        let voice = BusDefinition {
            id: 3,
            name: "voice".into(),
            gain: 1.0,
            child_buses: vec![],
            duck_buses: vec![DuckBusDefinition {
                id: 2,
                target_gain: 0.25,
                threshold: 0.5,
                attack: 0.1,
                release: 0.2,
            }],
        };
        BusTree::from_definitions(vec![master, music, voice]).unwrap()
    }

    #[test]
    fn test_missing_master_rejected() {
        let defs = vec![BusDefinition { id: 9, name: "fx".into(), gain: 1.0, child_buses: vec![], duck_buses: vec![] }];
        assert!(matches!(BusTree::from_definitions(defs), Err(EngineError::ConfigInvalid(_))));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let defs = vec![BusDefinition::master(), BusDefinition::master()];
        assert!(BusTree::from_definitions(defs).is_err());
    }

    #[test]
    fn test_final_gain_law() {
        let mut tree = two_bus_tree();
        tree.set_gain(2, 0.5);
        tree.advance_frame(1.0 / 60.0, 0.8);

        // final = master_final (0.8) × fade (1) × duck (1) × user (0.5)
        assert!((tree.final_gain(2) - 0.4).abs() < 1e-6);
        assert!((tree.final_gain(MASTER_BUS_ID) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_duck_engages_and_releases() {
        let mut tree = two_bus_tree();
        let delta = 1.0 / 60.0;

        // Voice active above threshold: music ducks to 0.25 within attack
        for _ in 0..30 {
            tree.reset_input_levels();
            tree.bump_input_level(3, 1.0);
            tree.advance_frame(delta, 1.0);
        }
        assert!((tree.final_gain(2) - 0.25).abs() < 1e-4, "ducked {}", tree.final_gain(2));

        // Voice stops: music restores within release
        for _ in 0..60 {
            tree.reset_input_levels();
            tree.advance_frame(delta, 1.0);
        }
        assert!((tree.final_gain(2) - 1.0).abs() < 1e-4, "released {}", tree.final_gain(2));
    }

    #[test]
    fn test_fade_gain_over_time() {
        let mut tree = two_bus_tree();
        tree.fade_gain(2, 0.0, 0.5, FadeCurve::Linear);
        tree.advance_frame(0.25, 1.0);
        let mid = tree.final_gain(2);
        assert!(mid > 0.2 && mid < 0.8, "mid {mid}");

        tree.advance_frame(0.5, 1.0);
        assert!(tree.final_gain(2) < 1e-6);
    }

    #[test]
    fn test_find_by_name() {
        let tree = two_bus_tree();
        assert_eq!(tree.find_by_name("music"), Some(2));
        assert_eq!(tree.find_by_name("missing"), None);
    }
}
