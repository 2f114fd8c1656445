//! Sound sources and the asset registry
//!
//! Sound-bank file parsing lives outside the engine; hosts decode their
//! assets and register them here as sounds, collections, and switch
//! containers. Registered PCM buffers are shared with playing layers
//! through `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::collection::{CollectionEntry, CollectionPlayMode};
use crate::rtpc::RtpcValue;
use em_core::ObjectId;
use em_mixer::{SoundData, Spatialization};
use em_spatial::Attenuation;

use crate::bus::MASTER_BUS_ID;

/// A single playable sound
pub struct SoundDefinition {
    pub id: ObjectId,
    pub name: String,
    pub bus: ObjectId,
    pub gain: RtpcValue,
    pub pitch: RtpcValue,
    pub priority: RtpcValue,
    /// Whether the sound loops at all
    pub loop_enabled: bool,
    /// Total plays before a looping sound stops; 0 = forever
    pub loop_count: u32,
    pub spatialization: Spatialization,
    pub attenuation: Attenuation,
    pub data: Arc<SoundData>,
}

impl SoundDefinition {
    pub fn new(id: ObjectId, name: impl Into<String>, data: Arc<SoundData>) -> Self {
        Self {
            id,
            name: name.into(),
            bus: MASTER_BUS_ID,
            gain: RtpcValue::constant(1.0),
            pitch: RtpcValue::constant(1.0),
            priority: RtpcValue::constant(1.0),
            loop_enabled: false,
            loop_count: 0,
            spatialization: Spatialization::None,
            attenuation: Attenuation::default(),
            data,
        }
    }
}

/// A weighted set of sounds with a play mode
pub struct CollectionDefinition {
    pub id: ObjectId,
    pub name: String,
    pub bus: ObjectId,
    pub gain: RtpcValue,
    pub pitch: RtpcValue,
    pub priority: RtpcValue,
    pub play_mode: CollectionPlayMode,
    /// Disallow repeating the previous pick in Random mode
    pub avoid_repeat: bool,
    pub entries: Vec<CollectionEntry>,
    pub spatialization: Spatialization,
    pub attenuation: Attenuation,
}

impl CollectionDefinition {
    pub fn new(id: ObjectId, name: impl Into<String>, entries: Vec<CollectionEntry>) -> Self {
        Self {
            id,
            name: name.into(),
            bus: MASTER_BUS_ID,
            gain: RtpcValue::constant(1.0),
            pitch: RtpcValue::constant(1.0),
            priority: RtpcValue::constant(1.0),
            play_mode: CollectionPlayMode::Random,
            avoid_repeat: true,
            entries,
            spatialization: Spatialization::None,
            attenuation: Attenuation::default(),
        }
    }
}

/// Sounds played while a given switch state is active
#[derive(Debug, Clone)]
pub struct SwitchItem {
    pub state: ObjectId,
    pub sounds: Vec<ObjectId>,
}

/// A source whose children are selected by a discrete switch state.
///
/// Entity-scoped: playback requires a valid entity.
pub struct SwitchContainerDefinition {
    pub id: ObjectId,
    pub name: String,
    pub bus: ObjectId,
    pub gain: RtpcValue,
    pub pitch: RtpcValue,
    pub priority: RtpcValue,
    pub switch_group: ObjectId,
    pub items: Vec<SwitchItem>,
    pub spatialization: Spatialization,
    pub attenuation: Attenuation,
}

impl SwitchContainerDefinition {
    pub fn new(
        id: ObjectId,
        name: impl Into<String>,
        switch_group: ObjectId,
        items: Vec<SwitchItem>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            bus: MASTER_BUS_ID,
            gain: RtpcValue::constant(1.0),
            pitch: RtpcValue::constant(1.0),
            priority: RtpcValue::constant(1.0),
            switch_group,
            items,
            spatialization: Spatialization::None,
            attenuation: Attenuation::default(),
        }
    }
}

/// Reference to any playable source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceRef {
    Sound(ObjectId),
    Collection(ObjectId),
    SwitchContainer(ObjectId),
}

/// Registry of loaded sources, indexed by id and name
#[derive(Default)]
pub struct AssetRegistry {
    sounds: HashMap<ObjectId, Arc<SoundDefinition>>,
    collections: HashMap<ObjectId, Arc<CollectionDefinition>>,
    switch_containers: HashMap<ObjectId, Arc<SwitchContainerDefinition>>,
    names: HashMap<String, SourceRef>,
    /// Sounds grouped by the bank they arrived in
    banks: HashMap<ObjectId, Vec<SourceRef>>,
}

impl AssetRegistry {
    pub fn register_sound(&mut self, definition: SoundDefinition) -> SourceRef {
        let reference = SourceRef::Sound(definition.id);
        self.names.insert(definition.name.clone(), reference);
        self.sounds.insert(definition.id, Arc::new(definition));
        reference
    }

    pub fn register_collection(&mut self, definition: CollectionDefinition) -> SourceRef {
        let reference = SourceRef::Collection(definition.id);
        self.names.insert(definition.name.clone(), reference);
        self.collections.insert(definition.id, Arc::new(definition));
        reference
    }

    pub fn register_switch_container(&mut self, definition: SwitchContainerDefinition) -> SourceRef {
        let reference = SourceRef::SwitchContainer(definition.id);
        self.names.insert(definition.name.clone(), reference);
        self.switch_containers.insert(definition.id, Arc::new(definition));
        reference
    }

    /// Attribute a source to a bank so unloading the bank removes it.
    pub fn assign_to_bank(&mut self, bank: ObjectId, reference: SourceRef) {
        self.banks.entry(bank).or_default().push(reference);
    }

    /// Remove every source registered under the bank.
    pub fn unload_bank(&mut self, bank: ObjectId) {
        let Some(references) = self.banks.remove(&bank) else { return };
        for reference in references {
            match reference {
                SourceRef::Sound(id) => {
                    if let Some(def) = self.sounds.remove(&id) {
                        self.names.remove(&def.name);
                    }
                }
                SourceRef::Collection(id) => {
                    if let Some(def) = self.collections.remove(&id) {
                        self.names.remove(&def.name);
                    }
                }
                SourceRef::SwitchContainer(id) => {
                    if let Some(def) = self.switch_containers.remove(&id) {
                        self.names.remove(&def.name);
                    }
                }
            }
        }
    }

    pub fn find_by_name(&self, name: &str) -> Option<SourceRef> {
        self.names.get(name).copied()
    }

    pub fn sound(&self, id: ObjectId) -> Option<&Arc<SoundDefinition>> {
        self.sounds.get(&id)
    }

    pub fn collection(&self, id: ObjectId) -> Option<&Arc<CollectionDefinition>> {
        self.collections.get(&id)
    }

    pub fn switch_container(&self, id: ObjectId) -> Option<&Arc<SwitchContainerDefinition>> {
        self.switch_containers.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use em_core::AudioBuffer;
    use em_mixer::SoundFormat;

    fn test_sound(id: ObjectId, name: &str) -> SoundDefinition {
        let mut data = AudioBuffer::new(16, 1);
        data.channel_mut(0).fill(0.5);
        let data =
            Arc::new(SoundData::from_buffer(data, SoundFormat { sample_rate: 48000, channels: 1 }).unwrap());
        SoundDefinition::new(id, name, data)
    }

    #[test]
    fn test_lookup_by_name() {
        let mut registry = AssetRegistry::default();
        registry.register_sound(test_sound(1, "footstep"));

        assert_eq!(registry.find_by_name("footstep"), Some(SourceRef::Sound(1)));
        assert!(registry.sound(1).is_some());
        assert_eq!(registry.find_by_name("missing"), None);
    }

    #[test]
    fn test_unload_bank_removes_sources() {
        let mut registry = AssetRegistry::default();
        let reference = registry.register_sound(test_sound(1, "shot"));
        registry.assign_to_bank(100, reference);

        registry.unload_bank(100);
        assert!(registry.sound(1).is_none());
        assert_eq!(registry.find_by_name("shot"), None);
    }
}
