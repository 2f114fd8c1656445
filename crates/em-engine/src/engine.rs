//! The engine context
//!
//! One explicit `Engine` value owns everything: the mixer, the asset
//! registry, the bus tree, the scheduler lists, and the game-object
//! arenas. The audio thread calls `Mixer::mix` through the shared mixer
//! handle; the game thread drives everything else through `advance_frame`
//! and the control API.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use portable_atomic::{AtomicU32, Ordering};
use rtrb::RingBuffer;

use em_core::{EngineError, EngineResult, ObjectId};
use em_dsp::truncate_frames;
use em_mixer::{
    LAYER_COUNT, LayerEventSink, LayerHandle, Mixer, MixerConfig, NodeKind, NodeSpec, Pipeline,
    PlayState, SoundInstanceSettings, Spatialization,
};
use em_spatial::{HrirSphere, Position3D, Room};

use crate::arena::Arena;
use crate::bus::{BusTree, MASTER_BUS_ID};
use crate::channel::{Channel, ChannelPlaybackState, ChannelState};
use crate::collection::CollectionPlayMode;
use crate::config::{EngineConfig, PanningMode};
use crate::entity::EntityState;
use crate::environment::{EnvironmentState, RoomState};
use crate::event::{EventCanceler, EventDefinition, EventInstance};
use crate::fader::FadeCurve;
use crate::listener::{ListenerState, doppler_pitch_factor, find_best_listener};
use crate::rtpc::{Rtpc, RtpcRegistry, RtpcValue};
use crate::scheduler::Scheduler;
use crate::sources::{AssetRegistry, SourceRef};

/// Per-layer loop bookkeeping shared with the audio thread
struct SlotLoopState {
    loops: AtomicU32,
    max_loops: AtomicU32,
}

/// The mixer's event sink: loop accounting on the audio thread, ended
/// notifications pushed over an SPSC ring drained by `advance_frame`.
struct EngineShared {
    slots: Box<[SlotLoopState]>,
    ended_tx: Mutex<rtrb::Producer<LayerHandle>>,
}

impl EngineShared {
    fn new() -> (Self, rtrb::Consumer<LayerHandle>) {
        let (ended_tx, ended_rx) = RingBuffer::new(LAYER_COUNT);
        let shared = Self {
            slots: (0..LAYER_COUNT)
                .map(|_| SlotLoopState { loops: AtomicU32::new(0), max_loops: AtomicU32::new(0) })
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            ended_tx: Mutex::new(ended_tx),
        };
        (shared, ended_rx)
    }

    fn slot(&self, layer: u32) -> &SlotLoopState {
        &self.slots[(layer as usize) & (LAYER_COUNT - 1)]
    }

    fn prime_slot(&self, layer: u32, max_loops: u32) {
        let slot = self.slot(layer);
        slot.loops.store(0, Ordering::Release);
        slot.max_loops.store(max_loops, Ordering::Release);
    }
}

impl LayerEventSink for EngineShared {
    fn on_looped(&self, handle: LayerHandle) -> bool {
        let slot = self.slot(handle.layer);
        let count = slot.loops.fetch_add(1, Ordering::AcqRel) + 1;
        let max = slot.max_loops.load(Ordering::Acquire);
        max == 0 || count < max
    }

    fn should_loop(&self, handle: LayerHandle) -> bool {
        let slot = self.slot(handle.layer);
        let max = slot.max_loops.load(Ordering::Acquire);
        max == 0 || slot.loops.load(Ordering::Acquire) < max
    }

    fn on_ended(&self, handle: LayerHandle) {
        if self.ended_tx.lock().push(handle).is_err() {
            log::warn!("ended-notification ring is full, dropping layer {}", handle.layer);
        }
    }
}

/// Parameters resolved from a source definition for one frame
struct SourceParams {
    bus: ObjectId,
    gain: f32,
    pitch: f32,
    priority: f32,
    spatialization: Spatialization,
    instance: SoundInstanceSettings,
    loop_enabled: bool,
    loop_count: u32,
}

type BankLoader = Receiver<Vec<crate::sources::SoundDefinition>>;

/// The Echomix engine.
pub struct Engine {
    config: EngineConfig,
    mixer: Arc<Mixer>,
    shared: Arc<EngineShared>,
    registry: AssetRegistry,
    buses: BusTree,
    scheduler: Scheduler,
    channels: Vec<ChannelState>,
    listeners: Arena<ListenerState>,
    entities: Arena<EntityState>,
    environments: Arena<EnvironmentState>,
    rooms: Arena<RoomState>,
    rtpcs: RtpcRegistry,
    events: HashMap<ObjectId, EventDefinition>,
    event_names: HashMap<String, ObjectId>,
    running_events: Vec<EventInstance>,
    switch_states: HashMap<ObjectId, ObjectId>,
    ended_rx: rtrb::Consumer<LayerHandle>,
    default_listener: Option<ObjectId>,
    listener_sequence: u64,
    master_gain: f32,
    muted: bool,
    paused: bool,
    next_play_id: u32,
    current_frame: u64,
    total_time: f64,
    pending_loads: Vec<(ObjectId, BankLoader)>,
}

impl Engine {
    /// Build an engine from a configuration.
    ///
    /// Fails with `ConfigInvalid`/`NotReady` without leaving partial
    /// state behind; nothing is shared until construction succeeds.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let buses = BusTree::from_definitions(config.resolve_buses()?)?;

        let hrir = match (&config.hrtf, config.mixer.panning_mode) {
            (Some(hrtf), _) if !hrtf.amir_file.as_os_str().is_empty() => {
                Some(HrirSphere::from_file(&hrtf.amir_file).map_err(|e| {
                    EngineError::ConfigInvalid(format!(
                        "cannot load {}: {e}",
                        hrtf.amir_file.display()
                    ))
                })?)
            }
            (_, PanningMode::Binaural) => Some(HrirSphere::synthetic(config.output.frequency)),
            _ => None,
        };

        let pipeline = if config.mixer.pipeline.is_empty() {
            match config.mixer.panning_mode {
                PanningMode::Binaural => Pipeline::default_specs(),
                PanningMode::Stereo => stereo_pipeline_specs(),
            }
        } else {
            config.mixer.pipeline.clone()
        };

        let (shared, ended_rx) = EngineShared::new();
        let shared = Arc::new(shared);
        let mixer = Mixer::new(
            MixerConfig {
                master_gain: 1.0,
                sample_rate: config.output.frequency,
                channels: config.output.channels,
                max_block_frames: config.output.buffer_size.max(256),
                reserved_layers: config.mixer.active_channels,
                pipeline,
                hrir,
                hrir_sampling: config.hrtf.as_ref().map(|h| h.hrir_sampling).unwrap_or_default(),
                occlusion_curves: config.game.occlusion.clone(),
                obstruction_curves: config.game.obstruction.clone(),
            },
            shared.clone(),
        )?;

        let total_channels = config.mixer.active_channels + config.mixer.virtual_channels;

        Ok(Self {
            scheduler: Scheduler::new(total_channels, config.mixer.active_channels),
            channels: (0..total_channels).map(|_| ChannelState::default()).collect(),
            listeners: Arena::new(config.game.listeners),
            entities: Arena::new(config.game.entities),
            environments: Arena::new(config.game.environments),
            rooms: Arena::new(config.game.rooms),
            rtpcs: RtpcRegistry::default(),
            events: HashMap::new(),
            event_names: HashMap::new(),
            running_events: Vec::new(),
            switch_states: HashMap::new(),
            default_listener: None,
            listener_sequence: 0,
            master_gain: 1.0,
            muted: false,
            paused: false,
            next_play_id: 0,
            current_frame: 0,
            total_time: 0.0,
            pending_loads: Vec::new(),
            ended_rx,
            registry: AssetRegistry::default(),
            mixer: Arc::new(mixer),
            shared,
            buses,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The mixer handle the audio driver calls `mix` on.
    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    pub fn registry(&mut self) -> &mut AssetRegistry {
        &mut self.registry
    }

    pub fn frame(&self) -> u64 {
        self.current_frame
    }

    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    // ─── Game objects ───────────────────────────────────────────────

    pub fn add_listener(&mut self, id: ObjectId) -> EngineResult<()> {
        self.listener_sequence += 1;
        let listener = ListenerState::new(id, self.listener_sequence);
        if self.listeners.insert(id, listener).is_none() {
            return Err(EngineError::ResourceExhausted(format!("listener {id}")));
        }
        if self.default_listener.is_none() {
            self.default_listener = Some(id);
        }
        Ok(())
    }

    pub fn remove_listener(&mut self, id: ObjectId) {
        self.listeners.remove(id);
        if self.default_listener == Some(id) {
            self.default_listener = self.listeners.iter().map(|(id, _)| id).next();
        }
    }

    pub fn set_default_listener(&mut self, id: ObjectId) -> bool {
        if self.listeners.get_by_id(id).is_some() {
            self.default_listener = Some(id);
            true
        } else {
            false
        }
    }

    pub fn set_listener_pose(
        &mut self,
        id: ObjectId,
        position: Position3D,
        orientation: em_spatial::Orientation,
    ) -> bool {
        match self.listeners.get_by_id_mut(id) {
            Some(listener) => {
                listener.position = position;
                listener.orientation = orientation;
                true
            }
            None => false,
        }
    }

    pub fn set_listener_velocity(&mut self, id: ObjectId, velocity: Position3D) -> bool {
        match self.listeners.get_by_id_mut(id) {
            Some(listener) => {
                listener.velocity = velocity;
                true
            }
            None => false,
        }
    }

    pub fn add_entity(&mut self, id: ObjectId) -> EngineResult<()> {
        if self.entities.insert(id, EntityState::new(id)).is_none() {
            return Err(EngineError::ResourceExhausted(format!("entity {id}")));
        }
        Ok(())
    }

    pub fn remove_entity(&mut self, id: ObjectId) {
        self.entities.remove(id);
    }

    pub fn set_entity_pose(&mut self, id: ObjectId, position: Position3D, velocity: Position3D) -> bool {
        match self.entities.get_by_id_mut(id) {
            Some(entity) => {
                entity.position = position;
                entity.velocity = velocity;
                true
            }
            None => false,
        }
    }

    pub fn entity(&self, id: ObjectId) -> Option<&EntityState> {
        self.entities.get_by_id(id)
    }

    pub fn add_environment(&mut self, state: EnvironmentState) -> EngineResult<()> {
        let id = state.id;
        if self.environments.insert(id, state).is_none() {
            return Err(EngineError::ResourceExhausted(format!("environment {id}")));
        }
        Ok(())
    }

    pub fn remove_environment(&mut self, id: ObjectId) {
        self.environments.remove(id);
    }

    pub fn add_room(&mut self, id: ObjectId, room: Room) -> EngineResult<()> {
        if self.rooms.insert(id, RoomState::new(id, room)).is_none() {
            return Err(EngineError::ResourceExhausted(format!("room {id}")));
        }
        Ok(())
    }

    pub fn remove_room(&mut self, id: ObjectId) {
        self.rooms.remove(id);
    }

    // ─── Buses, RTPC, switches ──────────────────────────────────────

    pub fn find_bus(&self, id: ObjectId) -> Option<ObjectId> {
        self.buses.find(id)
    }

    pub fn find_bus_by_name(&self, name: &str) -> Option<ObjectId> {
        self.buses.find_by_name(name)
    }

    pub fn set_bus_gain(&mut self, id: ObjectId, gain: f32) -> bool {
        self.buses.set_gain(id, gain)
    }

    pub fn fade_bus_gain(&mut self, id: ObjectId, to: f32, duration: f32) -> bool {
        self.buses.fade_gain(id, to, duration, FadeCurve::Linear)
    }

    pub fn bus_final_gain(&self, id: ObjectId) -> f32 {
        self.buses.final_gain(id)
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.max(0.0);
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }

    pub fn set_mute(&mut self, mute: bool) {
        self.muted = mute;
    }

    /// Pause or resume the whole engine; paused engines halt every real
    /// layer and skip frame advancement.
    pub fn set_paused(&mut self, paused: bool) {
        if self.paused == paused {
            return;
        }
        self.paused = paused;
        if paused {
            self.mixer.halt_all();
        } else {
            self.mixer.resume_all();
        }
    }

    pub fn register_rtpc(&mut self, rtpc: Rtpc) {
        self.rtpcs.register(rtpc);
    }

    pub fn set_rtpc_value(&mut self, id: ObjectId, value: f32) -> bool {
        match self.rtpcs.get_mut(id) {
            Some(rtpc) => {
                rtpc.set_value(value);
                true
            }
            None => false,
        }
    }

    /// Change a switch group's active state, restarting the affected
    /// switch-container channels with the new state's sounds.
    pub fn set_switch_state(&mut self, group: ObjectId, state: ObjectId) {
        self.switch_states.insert(group, state);

        let playing: Vec<usize> = self.scheduler.playing().to_vec();
        for index in playing {
            let Some(SourceRef::SwitchContainer(container)) = self.channels[index].source else {
                continue;
            };
            let matches = self
                .registry
                .switch_container(container)
                .map(|def| def.switch_group == group)
                .unwrap_or(false);
            if matches {
                self.restart_switch_channel(index);
            }
        }
    }

    // ─── Events ─────────────────────────────────────────────────────

    pub fn register_event(&mut self, definition: EventDefinition) {
        self.event_names.insert(definition.name.clone(), definition.id);
        self.events.insert(definition.id, definition);
    }

    /// Start an event; the returned canceler jumps it to its final state.
    pub fn trigger(&mut self, event: ObjectId, entity: Option<ObjectId>) -> Option<EventCanceler> {
        let definition = self.events.get(&event)?.clone();
        let instance = EventInstance::new(definition, entity);
        let canceler = instance.canceler();
        self.running_events.push(instance);
        Some(canceler)
    }

    pub fn trigger_by_name(&mut self, name: &str, entity: Option<ObjectId>) -> Option<EventCanceler> {
        let id = *self.event_names.get(name)?;
        self.trigger(id, entity)
    }

    // ─── Playback ───────────────────────────────────────────────────

    pub fn play(&mut self, source: SourceRef, location: Position3D, user_gain: f32) -> Channel {
        self.play_internal(source, None, location, user_gain)
    }

    pub fn play_on_entity(&mut self, source: SourceRef, entity: ObjectId, user_gain: f32) -> Channel {
        let Some(state) = self.entities.get_by_id(entity) else {
            log::error!("play on unknown entity {entity}");
            return Channel::INVALID;
        };
        let location = state.position;
        self.play_internal(source, Some(entity), location, user_gain)
    }

    pub fn play_by_name(&mut self, name: &str, location: Position3D, user_gain: f32) -> Channel {
        match self.registry.find_by_name(name) {
            Some(source) => self.play_internal(source, None, location, user_gain),
            None => {
                log::error!("unknown source '{name}'");
                Channel::INVALID
            }
        }
    }

    pub fn stop_all(&mut self) {
        let playing: Vec<usize> = self.scheduler.playing().to_vec();
        for index in playing {
            self.finish_channel(index);
        }
        self.mixer.stop_all();
    }

    pub fn stop(&mut self, channel: Channel, duration: f32) {
        let Some(index) = self.channel_index(channel) else { return };
        if duration <= 0.0 {
            self.finish_channel(index);
        } else {
            self.channels[index].begin_fade_out(duration, ChannelPlaybackState::Stopped, FadeCurve::Linear);
        }
    }

    pub fn pause(&mut self, channel: Channel, duration: f32) {
        let Some(index) = self.channel_index(channel) else { return };
        let state = &mut self.channels[index];
        if !matches!(state.playback, ChannelPlaybackState::Playing | ChannelPlaybackState::FadingIn) {
            return;
        }
        state.begin_fade_out(duration, ChannelPlaybackState::Paused, FadeCurve::Linear);
        if duration <= 0.0 && state.layer.valid() {
            self.mixer.set_play_state(state.layer, PlayState::Halt);
        }
    }

    pub fn resume(&mut self, channel: Channel, duration: f32) {
        let Some(index) = self.channel_index(channel) else { return };
        if self.channels[index].playback != ChannelPlaybackState::Paused {
            return;
        }

        let layer = self.channels[index].layer;
        if layer.valid() {
            let looping = self.channel_loops(index);
            self.mixer
                .set_play_state(layer, if looping { PlayState::Loop } else { PlayState::Play });
        }
        self.channels[index].begin_fade_in(duration, FadeCurve::Linear);
    }

    pub fn channel_playing(&self, channel: Channel) -> bool {
        self.channel_index(channel)
            .map(|index| self.channels[index].playing())
            .unwrap_or(false)
    }

    pub fn channel_playback_state(&self, channel: Channel) -> ChannelPlaybackState {
        self.channel_index(channel)
            .map(|index| self.channels[index].playback)
            .unwrap_or_default()
    }

    /// Whether the channel is backed by a mixer layer right now.
    pub fn channel_is_real(&self, channel: Channel) -> bool {
        self.channel_index(channel)
            .map(|index| self.channels[index].is_real())
            .unwrap_or(false)
    }

    pub fn set_channel_location(&mut self, channel: Channel, location: Position3D) {
        if let Some(index) = self.channel_index(channel) {
            self.channels[index].location = location;
        }
    }

    pub fn set_channel_gain(&mut self, channel: Channel, gain: f32) {
        if let Some(index) = self.channel_index(channel) {
            self.channels[index].user_gain = gain.max(0.0);
        }
    }

    pub fn set_channel_obstruction(&mut self, channel: Channel, obstruction: f32) {
        if let Some(index) = self.channel_index(channel) {
            self.channels[index].obstruction = obstruction.clamp(0.0, 1.0);
        }
    }

    pub fn set_channel_occlusion(&mut self, channel: Channel, occlusion: f32) {
        if let Some(index) = self.channel_index(channel) {
            self.channels[index].occlusion = occlusion.clamp(0.0, 1.0);
        }
    }

    // ─── Async loading ──────────────────────────────────────────────

    /// Decode a bank on a worker thread; results land in the registry
    /// once `try_finalize_load_sound_files` observes completion.
    pub fn load_sound_bank_async(
        &mut self,
        bank: ObjectId,
        loader: impl FnOnce() -> Vec<crate::sources::SoundDefinition> + Send + 'static,
    ) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            let _ = tx.send(loader());
        });
        self.pending_loads.push((bank, rx));
    }

    /// Poll outstanding bank loads; returns true when none remain.
    pub fn try_finalize_load_sound_files(&mut self) -> bool {
        let mut remaining = Vec::new();
        for (bank, rx) in self.pending_loads.drain(..) {
            match rx.try_recv() {
                Ok(definitions) => {
                    for definition in definitions {
                        let reference = self.registry.register_sound(definition);
                        self.registry.assign_to_bank(bank, reference);
                    }
                }
                Err(crossbeam_channel::TryRecvError::Empty) => remaining.push((bank, rx)),
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    log::error!("sound bank {bank} loader thread died");
                }
            }
        }
        self.pending_loads = remaining;
        self.pending_loads.is_empty()
    }

    pub fn unload_sound_bank(&mut self, bank: ObjectId) {
        self.registry.unload_bank(bank);
    }

    // ─── Frame advancement ──────────────────────────────────────────

    pub fn advance_frame(&mut self, delta: f32) {
        if self.paused {
            return;
        }

        // Lifecycle notifications from the audio thread since last frame
        while let Ok(handle) = self.ended_rx.pop() {
            if let Some(index) = self.channel_of_layer(handle) {
                self.handle_sound_end(index);
            }
        }

        self.rtpcs.update(delta);

        // Environment factors tracked by the engine unless the game does
        if !self.config.game.track_environments {
            let environments: Vec<(ObjectId, EnvironmentState)> =
                self.environments.iter().map(|(id, e)| (id, e.clone())).collect();
            for entity in self.entities.iter_mut() {
                for (id, environment) in &environments {
                    entity.set_environment_factor(*id, environment.factor(&entity.position));
                }
            }
        }

        // Bus activity uses last frame's channel gains, then the tree
        // advances before channels read the new final gains
        self.buses.reset_input_levels();
        let mut levels: Vec<(ObjectId, f32)> = Vec::new();
        for &index in self.scheduler.playing() {
            let state = &self.channels[index];
            if let Some(source) = state.source {
                if let Some(bus) = self.source_bus(source) {
                    levels.push((bus, state.gain));
                }
            }
        }
        for (bus, gain) in levels {
            self.buses.bump_input_level(bus, gain);
        }
        let master = if self.muted { 0.0 } else { self.master_gain };
        self.buses.advance_frame(delta, master);

        self.update_channels(delta);

        let priorities: Vec<f32> = self.channels.iter().map(|c| c.priority).collect();
        self.scheduler.sort_playing(|i| priorities[i]);

        self.update_real_channels();
        self.advance_events(delta);

        self.current_frame += 1;
        self.total_time += delta as f64;
    }

    // ─── Internals ──────────────────────────────────────────────────

    fn channel_index(&self, channel: Channel) -> Option<usize> {
        let index = channel.index as usize;
        if !channel.valid() || index >= self.channels.len() {
            return None;
        }
        (self.channels[index].generation == channel.generation).then_some(index)
    }

    fn channel_of_layer(&self, handle: LayerHandle) -> Option<usize> {
        self.channels.iter().position(|c| c.playing() && c.layer == handle)
    }

    fn next_play_id(&mut self) -> u32 {
        self.next_play_id = self.next_play_id.wrapping_add(1);
        if self.next_play_id == 0 {
            self.next_play_id = 1;
        }
        self.next_play_id
    }

    fn source_bus(&self, source: SourceRef) -> Option<ObjectId> {
        match source {
            SourceRef::Sound(id) => self.registry.sound(id).map(|d| d.bus),
            SourceRef::Collection(id) => self.registry.collection(id).map(|d| d.bus),
            SourceRef::SwitchContainer(id) => self.registry.switch_container(id).map(|d| d.bus),
        }
    }

    fn source_params(
        registry: &AssetRegistry,
        rtpcs: &RtpcRegistry,
        source: SourceRef,
    ) -> Option<SourceParams> {
        let build = |bus: ObjectId,
                     gain: &RtpcValue,
                     pitch: &RtpcValue,
                     priority: &RtpcValue,
                     spatialization: Spatialization,
                     attenuation: &em_spatial::Attenuation,
                     loop_enabled: bool,
                     loop_count: u32| SourceParams {
            bus,
            gain: gain.value(rtpcs),
            pitch: pitch.value(rtpcs),
            priority: priority.value(rtpcs),
            spatialization,
            instance: SoundInstanceSettings {
                spatialization,
                attenuation: attenuation.clone(),
                loop_count,
            },
            loop_enabled,
            loop_count,
        };

        match source {
            SourceRef::Sound(id) => {
                let def = registry.sound(id)?;
                Some(build(
                    def.bus,
                    &def.gain,
                    &def.pitch,
                    &def.priority,
                    def.spatialization,
                    &def.attenuation,
                    def.loop_enabled,
                    def.loop_count,
                ))
            }
            SourceRef::Collection(id) => {
                let def = registry.collection(id)?;
                Some(build(
                    def.bus,
                    &def.gain,
                    &def.pitch,
                    &def.priority,
                    def.spatialization,
                    &def.attenuation,
                    false,
                    0,
                ))
            }
            SourceRef::SwitchContainer(id) => {
                let def = registry.switch_container(id)?;
                Some(build(
                    def.bus,
                    &def.gain,
                    &def.pitch,
                    &def.priority,
                    def.spatialization,
                    &def.attenuation,
                    false,
                    0,
                ))
            }
        }
    }

    /// Pick the member sound a fresh play should start with.
    fn select_member(&mut self, index: usize, source: SourceRef) -> Option<ObjectId> {
        match source {
            SourceRef::Sound(id) => Some(id),
            SourceRef::Collection(id) => {
                let def = self.registry.collection(id)?.clone();
                let state = &mut self.channels[index];
                match def.play_mode {
                    CollectionPlayMode::Random => {
                        state.selector.select_random(&def.entries, def.avoid_repeat)
                    }
                    CollectionPlayMode::PlayAll | CollectionPlayMode::LoopAll => {
                        state.selector.select_unplayed(&def.entries, &state.played_sounds)
                    }
                }
            }
            SourceRef::SwitchContainer(id) => {
                let def = self.registry.switch_container(id)?.clone();
                let active = self.switch_states.get(&def.switch_group).copied();
                let item = def.items.iter().find(|item| Some(item.state) == active)?;
                item.sounds.first().copied()
            }
        }
    }

    fn play_internal(
        &mut self,
        source: SourceRef,
        entity: Option<ObjectId>,
        location: Position3D,
        user_gain: f32,
    ) -> Channel {
        if matches!(source, SourceRef::SwitchContainer(_)) && entity.is_none() {
            log::error!("switch containers are entity-scoped; play requires a valid entity");
            return Channel::INVALID;
        }

        let Some(params) = Self::source_params(&self.registry, &self.rtpcs, source) else {
            log::error!("play request for unregistered source {source:?}");
            return Channel::INVALID;
        };

        let gain = params.gain * self.buses.final_gain(params.bus) * user_gain;
        let priority = gain * params.priority;

        // Channel object: free list first, then evict a strictly lower
        // priority channel, otherwise the play fails
        let index = match self.scheduler.acquire_channel() {
            Some(index) => index,
            None => {
                let Some(lowest) = self.scheduler.lowest() else {
                    return Channel::INVALID;
                };
                if self.channels[lowest].priority >= priority {
                    log::warn!("no channel available for priority {priority}");
                    return Channel::INVALID;
                }
                self.finish_channel(lowest);
                match self.scheduler.acquire_channel() {
                    Some(index) => index,
                    None => return Channel::INVALID,
                }
            }
        };

        let real_slot = self.scheduler.acquire_real_slot();

        {
            let state = &mut self.channels[index];
            state.reset();
            state.generation = state.generation.wrapping_add(1).max(1);
            state.source = Some(source);
            state.entity = entity;
            state.location = location;
            state.user_gain = user_gain;
            state.gain = gain;
            state.pitch = params.pitch;
            state.priority = priority;
            state.real_slot = real_slot;
            state.begin_fade_in(0.0, FadeCurve::Linear);
        }

        let Some(member) = self.select_member(index, source) else {
            log::error!("source {source:?} selected no playable member");
            self.release_channel_slots(index);
            return Channel::INVALID;
        };
        self.channels[index].current_sound = Some(member);

        if let Some(slot) = self.channels[index].real_slot {
            if !self.start_layer(index, slot, 0) {
                self.release_channel_slots(index);
                return Channel::INVALID;
            }
            self.start_extra_switch_layers(index, source);
        }

        let priorities: Vec<f32> = self.channels.iter().map(|c| c.priority).collect();
        self.scheduler.insert_playing(index, priority, |i| priorities[i]);

        Channel { index: index as u32, generation: self.channels[index].generation }
    }

    /// Start (or restart) the channel's member sound on a mixer slot.
    fn start_layer(&mut self, index: usize, slot: u32, start_cursor: u64) -> bool {
        let Some(source) = self.channels[index].source else { return false };
        let Some(member) = self.channels[index].current_sound else { return false };
        let Some(definition) = self.registry.sound(member).cloned() else {
            log::error!("member sound {member} is not registered");
            return false;
        };
        let Some(params) = Self::source_params(&self.registry, &self.rtpcs, source) else {
            return false;
        };

        let looping = definition.loop_enabled || params.loop_enabled;
        let max_loops = if definition.loop_enabled { definition.loop_count } else { params.loop_count };

        let play_id = self.next_play_id();
        let handle = LayerHandle::new(play_id, slot);
        self.shared.prime_slot(slot, max_loops);

        let mut instance = params.instance.clone();
        if definition.spatialization != Spatialization::None {
            instance.spatialization = definition.spatialization;
            instance.attenuation = definition.attenuation.clone();
        }

        let state = if looping { PlayState::Loop } else { PlayState::Play };
        let gain = self.channels[index].gain;
        let pitch = self.channels[index].pitch;

        let claimed = self.mixer.play(
            definition.data.clone(),
            &instance,
            state,
            gain,
            self.channels[index].pan,
            pitch,
            1.0,
            handle,
        );
        if !claimed.valid() {
            log::error!("mixer rejected play on slot {slot}");
            return false;
        }

        if start_cursor > 0 {
            self.mixer.set_cursor(claimed, truncate_frames(start_cursor));
        }

        self.channels[index].layer = claimed;
        self.push_channel_spatial(index);
        true
    }

    /// Switch containers play their state's remaining sounds on
    /// auto-assigned layers so children sound together.
    fn start_extra_switch_layers(&mut self, index: usize, source: SourceRef) {
        let SourceRef::SwitchContainer(id) = source else { return };
        let Some(def) = self.registry.switch_container(id).cloned() else { return };
        let active = self.switch_states.get(&def.switch_group).copied();
        let Some(item) = def.items.iter().find(|item| Some(item.state) == active) else { return };

        let gain = self.channels[index].gain;
        let pitch = self.channels[index].pitch;
        for &sound in item.sounds.iter().skip(1) {
            let Some(definition) = self.registry.sound(sound).cloned() else { continue };
            let state =
                if definition.loop_enabled { PlayState::Loop } else { PlayState::Play };
            let handle = self.mixer.play(
                definition.data.clone(),
                &SoundInstanceSettings {
                    spatialization: definition.spatialization,
                    attenuation: definition.attenuation.clone(),
                    loop_count: definition.loop_count,
                },
                state,
                gain,
                0.0,
                pitch,
                1.0,
                LayerHandle::INVALID,
            );
            if handle.valid() {
                self.shared.prime_slot(handle.layer, definition.loop_count);
                self.channels[index].extra_layers.push(handle);
            }
        }
    }

    fn restart_switch_channel(&mut self, index: usize) {
        // Stop the old state's sounds
        let layer = self.channels[index].layer;
        if layer.valid() {
            self.mixer.set_play_state(layer, PlayState::Stop);
            self.channels[index].layer = LayerHandle::INVALID;
        }
        let extra: Vec<LayerHandle> = self.channels[index].extra_layers.drain(..).collect();
        for handle in extra {
            self.mixer.set_play_state(handle, PlayState::Stop);
        }

        self.channels[index].playback = ChannelPlaybackState::SwitchingState;

        let Some(source) = self.channels[index].source else { return };
        let Some(member) = self.select_member(index, source) else {
            self.finish_channel(index);
            return;
        };
        self.channels[index].current_sound = Some(member);

        if let Some(slot) = self.channels[index].real_slot {
            if self.start_layer(index, slot, 0) {
                self.start_extra_switch_layers(index, source);
            }
        }
    }

    /// A member sound finished on the mixer; advance collections or stop.
    fn handle_sound_end(&mut self, index: usize) {
        let Some(source) = self.channels[index].source else {
            self.finish_channel(index);
            return;
        };

        self.channels[index].layer = LayerHandle::INVALID;

        if let SourceRef::Collection(id) = source {
            if let Some(def) = self.registry.collection(id).cloned() {
                match def.play_mode {
                    CollectionPlayMode::PlayAll | CollectionPlayMode::LoopAll => {
                        if let Some(member) = self.channels[index].current_sound {
                            let exhausted =
                                self.channels[index].mark_played(member, def.entries.len());
                            if exhausted {
                                if def.play_mode == CollectionPlayMode::PlayAll {
                                    log::debug!("collection '{}' played every member", def.name);
                                    self.finish_channel(index);
                                    return;
                                }
                                self.channels[index].played_sounds.clear();
                            }
                        }

                        // Next member continues on the same slot
                        if let Some(next) = self.select_member(index, source) {
                            self.channels[index].current_sound = Some(next);
                            self.channels[index].virtual_cursor = 0.0;
                            if let Some(slot) = self.channels[index].real_slot {
                                if !self.start_layer(index, slot, 0) {
                                    self.finish_channel(index);
                                }
                            }
                            return;
                        }
                    }
                    CollectionPlayMode::Random => {}
                }
            }
        }

        log::debug!("sound ended on channel {index}");
        self.finish_channel(index);
    }

    /// Stop a channel immediately and recycle its slots.
    fn finish_channel(&mut self, index: usize) {
        let layer = self.channels[index].layer;
        if layer.valid() {
            self.mixer.set_play_state(layer, PlayState::Stop);
        }
        let extra: Vec<LayerHandle> = self.channels[index].extra_layers.drain(..).collect();
        for handle in extra {
            self.mixer.set_play_state(handle, PlayState::Stop);
        }
        self.release_channel_slots(index);
    }

    fn release_channel_slots(&mut self, index: usize) {
        if let Some(slot) = self.channels[index].real_slot.take() {
            self.scheduler.release_real_slot(slot);
        }
        self.scheduler.remove_playing(index);
        self.channels[index].reset();
        self.scheduler.release_channel(index);
    }

    fn channel_loops(&self, index: usize) -> bool {
        self.channels[index]
            .current_sound
            .and_then(|id| self.registry.sound(id))
            .map(|def| def.loop_enabled)
            .unwrap_or(false)
    }

    /// Push the channel's world-space parameters into its layer.
    fn push_channel_spatial(&mut self, index: usize) {
        let layer = self.channels[index].layer;
        if !layer.valid() {
            return;
        }

        let listeners: Vec<ListenerState> =
            self.listeners.iter().map(|(_, l)| l.clone()).collect();
        let location = self.channels[index].location;
        let best = find_best_listener(
            listeners.iter(),
            &location,
            self.config.game.listener_fetch_mode,
            self.default_listener,
        );

        let (listener_position, listener_orientation) = match best {
            Some(listener) => (listener.position, listener.orientation),
            None => (Position3D::origin(), em_spatial::Orientation::identity()),
        };

        // Smallest containing room wins
        let mut rooms: Vec<&RoomState> = self.rooms.iter().map(|(_, r)| r).collect();
        rooms.sort_by(|a, b| b.volume().total_cmp(&a.volume()));
        let reverb = rooms
            .iter()
            .rev()
            .find(|r| r.room.contains(&location))
            .map(|r| r.room.reverb_gain * r.room.factor(&location))
            .unwrap_or(0.0);

        self.mixer.update_spatial(layer, |spatial| {
            spatial.location = location;
            spatial.listener_position = listener_position;
            spatial.listener_orientation = listener_orientation;
            spatial.room_reverb_gain = reverb;
        });
    }

    fn update_channels(&mut self, delta: f32) {
        let playing: Vec<usize> = self.scheduler.playing().to_vec();
        let listeners: Vec<ListenerState> =
            self.listeners.iter().map(|(_, l)| l.clone()).collect();

        for index in playing {
            if !self.channels[index].playing() {
                continue;
            }

            // Fade transitions first
            let transition = {
                let state = &mut self.channels[index];
                state.fader.update(delta);
                match state.playback {
                    ChannelPlaybackState::FadingIn if state.fader.finished() => {
                        state.playback = ChannelPlaybackState::Playing;
                        None
                    }
                    ChannelPlaybackState::FadingOut if state.fader.finished() => {
                        Some(state.fade_target)
                    }
                    ChannelPlaybackState::SwitchingState => {
                        state.playback = ChannelPlaybackState::Playing;
                        None
                    }
                    _ => None,
                }
            };

            match transition {
                Some(ChannelPlaybackState::Paused) => {
                    let layer = self.channels[index].layer;
                    if layer.valid() {
                        self.mixer.set_play_state(layer, PlayState::Halt);
                    }
                    self.channels[index].playback = ChannelPlaybackState::Paused;
                }
                Some(ChannelPlaybackState::Stopped) => {
                    self.finish_channel(index);
                    continue;
                }
                _ => {}
            }

            if self.channels[index].playback == ChannelPlaybackState::Paused {
                continue;
            }

            let Some(source) = self.channels[index].source else { continue };
            let Some(params) = Self::source_params(&self.registry, &self.rtpcs, source) else {
                continue;
            };

            // Entity-attached channels follow their entity
            if let Some(entity) = self.channels[index].entity {
                if let Some(state) = self.entities.get_by_id(entity) {
                    self.channels[index].location = state.position;
                }
            }

            let location = self.channels[index].location;
            let listener = find_best_listener(
                listeners.iter(),
                &location,
                self.config.game.listener_fetch_mode,
                self.default_listener,
            );
            self.channels[index].listener = listener.map(|l| l.id);

            // Doppler from the emitting entity's velocity
            let doppler = match (listener, self.channels[index].entity) {
                (Some(listener), Some(entity)) if params.spatialization != Spatialization::None => {
                    let velocity = self
                        .entities
                        .get_by_id(entity)
                        .map(|e| e.velocity)
                        .unwrap_or_default();
                    doppler_pitch_factor(
                        listener,
                        &location,
                        &velocity,
                        self.config.game.sound_speed,
                        self.config.game.doppler_factor,
                    )
                }
                _ => 1.0,
            };
            self.channels[index].doppler = doppler;

            let bus_final = self.buses.final_gain(params.bus);
            let fade = self.channels[index].fader.current();
            let gain = params.gain * bus_final * self.channels[index].user_gain * fade;
            let pitch = params.pitch * doppler;

            self.channels[index].gain = gain;
            self.channels[index].priority = gain * params.priority;

            let layer = self.channels[index].layer;
            if layer.valid() {
                let pan = self.channels[index].pan;
                self.mixer.set_gain_pan(layer, gain, pan);
                self.mixer.set_pitch(layer, pitch);
                self.mixer.set_obstruction(layer, self.channels[index].obstruction);
                self.mixer.set_occlusion(layer, self.channels[index].occlusion);
                self.push_channel_spatial(index);
            } else if self.channels[index].playback == ChannelPlaybackState::Playing {
                // Track virtual progress so devirtualization resumes in
                // the right place
                self.advance_virtual(index, delta, pitch);
            }
        }
    }

    fn advance_virtual(&mut self, index: usize, delta: f32, pitch: f32) {
        let Some(member) = self.channels[index].current_sound else { return };
        let Some(definition) = self.registry.sound(member) else { return };
        let rate = definition.data.format().sample_rate as f64;
        let length = definition.data.length() as f64;
        let looping = definition.loop_enabled;

        let state = &mut self.channels[index];
        state.virtual_cursor += delta as f64 * rate * pitch as f64;
        let ended = state.virtual_cursor >= length;
        if ended && looping {
            state.virtual_cursor %= length;
        }
        if ended && !looping {
            self.handle_sound_end(index);
        }
    }

    /// Assign freed real slots to the highest-priority virtual channels,
    /// stealing from lower-priority real channels when it helps.
    fn update_real_channels(&mut self) {
        let playing: Vec<usize> = self.scheduler.playing().to_vec();

        for &index in playing.iter().rev() {
            if !self.channels[index].playing() || self.channels[index].is_real() {
                continue;
            }
            if self.channels[index].playback == ChannelPlaybackState::Paused {
                continue;
            }

            if let Some(slot) = self.scheduler.acquire_real_slot() {
                self.promote_channel(index, slot);
                continue;
            }

            // Scan from the low-priority end for a real channel to demote
            let priority = self.channels[index].priority;
            let victim = playing
                .iter()
                .copied()
                .find(|&candidate| {
                    candidate != index
                        && self.channels[candidate].is_real()
                        && self.channels[candidate].priority < priority
                });
            let Some(victim) = victim else {
                // No more swapping can be done
                return;
            };

            let slot = self.demote_channel(victim);
            if let Some(slot) = slot {
                self.promote_channel(index, slot);
            }
        }
    }

    /// Take the channel's layer away, keeping it tracked virtually.
    fn demote_channel(&mut self, index: usize) -> Option<u32> {
        let slot = self.channels[index].real_slot.take()?;
        let layer = self.channels[index].layer;
        if layer.valid() {
            if let Some(cursor) = self.mixer.cursor(layer) {
                self.channels[index].virtual_cursor = cursor as f64;
            }
            self.mixer.set_play_state(layer, PlayState::Stop);
            self.channels[index].layer = LayerHandle::INVALID;
        }
        Some(slot)
    }

    /// Give a virtual channel a real slot, resuming from its tracked
    /// position.
    fn promote_channel(&mut self, index: usize, slot: u32) {
        self.channels[index].real_slot = Some(slot);
        let cursor = self.channels[index].virtual_cursor as u64;
        if !self.start_layer(index, slot, cursor) {
            if let Some(slot) = self.channels[index].real_slot.take() {
                self.scheduler.release_real_slot(slot);
            }
        }
    }

    fn advance_events(&mut self, delta: f32) {
        enum EventOp {
            Play(Vec<SourceRef>, Option<ObjectId>),
            Stop(Vec<SourceRef>, f32),
            Pause(Vec<Channel>, f32),
            Resume(Vec<Channel>, f32),
            StopChannels(Vec<Channel>),
        }

        let instances: Vec<EventInstance> = self.running_events.clone();
        for instance in instances {
            let mut ops: Vec<EventOp> = Vec::new();
            {
                let mut inner = instance.inner.lock();
                if !inner.running {
                    continue;
                }
                if inner.cancelled {
                    ops.push(EventOp::StopChannels(inner.channels.clone()));
                    inner.running = false;
                } else {
                    inner.wait_remaining -= delta;
                    while inner.wait_remaining <= 0.0 && inner.cursor < inner.definition.actions.len()
                    {
                        let action = inner.definition.actions[inner.cursor].clone();
                        inner.cursor += 1;
                        match action.kind {
                            crate::event::EventActionKind::Wait => {
                                inner.wait_remaining = action.duration;
                            }
                            crate::event::EventActionKind::Play => {
                                ops.push(EventOp::Play(action.targets, inner.entity));
                            }
                            crate::event::EventActionKind::Stop => {
                                ops.push(EventOp::Stop(action.targets, action.duration));
                            }
                            crate::event::EventActionKind::Pause => {
                                ops.push(EventOp::Pause(inner.channels.clone(), action.duration));
                            }
                            crate::event::EventActionKind::Resume => {
                                ops.push(EventOp::Resume(inner.channels.clone(), action.duration));
                            }
                        }
                    }
                    if inner.cursor >= inner.definition.actions.len() && inner.wait_remaining <= 0.0 {
                        inner.running = false;
                    }
                }
            }

            for op in ops {
                match op {
                    EventOp::Play(targets, entity) => {
                        for source in targets {
                            let channel = match entity {
                                Some(entity) => self.play_on_entity(source, entity, 1.0),
                                None => self.play(source, Position3D::origin(), 1.0),
                            };
                            if channel.valid() {
                                instance.inner.lock().channels.push(channel);
                            }
                        }
                    }
                    EventOp::Stop(targets, duration) => {
                        let playing: Vec<usize> = self.scheduler.playing().to_vec();
                        for index in playing {
                            if self.channels[index].source.map(|s| targets.contains(&s)).unwrap_or(false)
                            {
                                let channel = Channel {
                                    index: index as u32,
                                    generation: self.channels[index].generation,
                                };
                                self.stop(channel, duration);
                            }
                        }
                    }
                    EventOp::Pause(channels, duration) => {
                        for channel in channels {
                            self.pause(channel, duration);
                        }
                    }
                    EventOp::Resume(channels, duration) => {
                        for channel in channels {
                            self.resume(channel, duration);
                        }
                    }
                    EventOp::StopChannels(channels) => {
                        for channel in channels {
                            self.stop(channel, 0.0);
                        }
                    }
                }
            }
        }

        self.running_events.retain(|instance| instance.is_running());
    }
}

/// Pipeline used for `PanningMode::Stereo`
fn stereo_pipeline_specs() -> Vec<NodeSpec> {
    let chain = [
        NodeKind::Input,
        NodeKind::Attenuation,
        NodeKind::Occlusion,
        NodeKind::Obstruction,
        NodeKind::NearField,
        NodeKind::StereoPanner,
        NodeKind::Reverb,
        NodeKind::Clip,
        NodeKind::Output,
    ];
    chain
        .into_iter()
        .enumerate()
        .map(|(i, kind)| NodeSpec {
            id: i as u32 + 1,
            kind,
            inputs: if i == 0 { vec![] } else { vec![i as u32] },
        })
        .collect()
}
