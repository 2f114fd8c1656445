//! The mixer core
//!
//! Produces blocks of interleaved output on the audio callback thread by
//! iterating ready layers, running each through its converter and the
//! pipeline graph, and summing into a scratch buffer. The audio mutex is
//! held only around the per-block mix loop; lifecycle work discovered
//! while mixing is deferred to the command queue and executed after the
//! mutex is released.

use std::sync::Arc;

use parking_lot::Mutex;
use portable_atomic::{AtomicU32, Ordering};

use em_core::{AtomicF32, AudioBuffer, ChannelConfig, Sample};
use em_dsp::{MIN_PLAY_SPEED, Resampler, align_frames, mix_add_block, smooth_play_speed, truncate_frames};
use em_dsp::{SIMD_BLOCK_FRAMES, constant_power_gains};
use em_spatial::{HrirSphere, SphereSampling};

use crate::command::{CommandQueue, MixerCommand};
use crate::layer::{Layer, PlayState, SpatialParams};
use crate::nodes::OcclusionCurves;
use crate::pipeline::{NodeSpec, Pipeline, PipelineSettings};
use crate::sound::{SoundData, SoundInstanceSettings};

/// log2 of the layer table size
pub const LAYER_BITS: usize = 10;

/// Number of layer slots in the mixer table
pub const LAYER_COUNT: usize = 1 << LAYER_BITS;

const LAYER_MASK: u32 = (LAYER_COUNT - 1) as u32;

/// Generation-checked reference to a playing layer.
///
/// The low bits of `layer` index the table; `id` must match the slot's
/// stored generation for any operation to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerHandle {
    pub id: u32,
    pub layer: u32,
}

impl LayerHandle {
    pub const INVALID: Self = Self { id: 0, layer: 0 };

    pub fn new(id: u32, layer: u32) -> Self {
        Self { id, layer }
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.id != 0
    }
}

/// Lifecycle callbacks from the mixer into the channel layer.
///
/// `should_loop` runs on the audio thread inside the mix loop while the
/// audio mutex is held — implementations must not call back into the
/// mixer or block. Everything else runs on the calling game thread or
/// during command execution after the audio mutex is released.
pub trait LayerEventSink: Send + Sync {
    fn on_started(&self, _handle: LayerHandle) {}
    fn on_paused(&self, _handle: LayerHandle) {}
    fn on_resumed(&self, _handle: LayerHandle) {}
    fn on_stopped(&self, _handle: LayerHandle) {}
    /// A layer crossed its loop boundary (fired from the deferred end
    /// command, exactly once per traversal); increment counts and return
    /// whether the layer should loop again.
    fn on_looped(&self, _handle: LayerHandle) -> bool {
        true
    }
    /// Non-mutating check whether the layer may keep wrapping, queried
    /// during mixing.
    fn should_loop(&self, _handle: LayerHandle) -> bool {
        true
    }
    /// The layer reached its end and its slot has been freed.
    fn on_ended(&self, _handle: LayerHandle) {}
}

/// Sink that ignores every event
pub struct NullEventSink;

impl LayerEventSink for NullEventSink {}

/// Mixer construction parameters
pub struct MixerConfig {
    pub master_gain: f32,
    pub sample_rate: u32,
    pub channels: ChannelConfig,
    /// Largest block the driver may request per callback
    pub max_block_frames: usize,
    /// Low layer indices excluded from auto-assignment scans; slots
    /// `1..=reserved_layers` are claimed explicitly by their owners
    pub reserved_layers: usize,
    pub pipeline: Vec<NodeSpec>,
    pub hrir: Option<HrirSphere>,
    pub hrir_sampling: SphereSampling,
    pub occlusion_curves: OcclusionCurves,
    pub obstruction_curves: OcclusionCurves,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            master_gain: 1.0,
            sample_rate: 48000,
            channels: ChannelConfig::Stereo,
            max_block_frames: 2048,
            reserved_layers: 0,
            pipeline: Pipeline::default_specs(),
            hrir: None,
            hrir_sampling: SphereSampling::default(),
            occlusion_curves: OcclusionCurves::default(),
            obstruction_curves: OcclusionCurves::default(),
        }
    }
}

/// State owned by whoever holds the audio mutex
struct AudioState {
    pipeline: Pipeline,
    /// Mix accumulator, stereo planar
    scratch: AudioBuffer,
    /// Source read buffer before conversion
    in_chunk: AudioBuffer,
    /// Converted source handed to the pipeline
    out_chunk: AudioBuffer,
    /// Pipeline result
    pipeline_out: AudioBuffer,
}

/// The real-time mixer.
pub struct Mixer {
    layers: Box<[Layer]>,
    master_gain: AtomicF32,
    next_id: AtomicU32,
    audio: Mutex<AudioState>,
    commands: CommandQueue,
    sink: Arc<dyn LayerEventSink>,
    sample_rate: u32,
    channels: ChannelConfig,
    max_block_frames: usize,
    reserved_layers: usize,
}

impl Mixer {
    pub fn new(config: MixerConfig, sink: Arc<dyn LayerEventSink>) -> Result<Self, em_core::EngineError> {
        let settings = PipelineSettings {
            device_sample_rate: config.sample_rate,
            max_block_frames: config.max_block_frames,
            hrir: config.hrir,
            hrir_sampling: config.hrir_sampling,
            occlusion_curves: config.occlusion_curves,
            obstruction_curves: config.obstruction_curves,
        };
        let pipeline = Pipeline::new(config.pipeline, settings)?;

        let layers: Vec<Layer> = (0..LAYER_COUNT).map(|_| Layer::default()).collect();

        // Sized so the converter's worst-case input demand fits
        let chunk_frames = config.max_block_frames * 4;

        Ok(Self {
            layers: layers.into_boxed_slice(),
            master_gain: AtomicF32::new(config.master_gain),
            next_id: AtomicU32::new(0),
            audio: Mutex::new(AudioState {
                pipeline,
                scratch: AudioBuffer::new(config.max_block_frames, 2),
                in_chunk: AudioBuffer::new(chunk_frames, 2),
                out_chunk: AudioBuffer::new(chunk_frames, 4),
                pipeline_out: AudioBuffer::new(config.max_block_frames, 4),
            }),
            commands: CommandQueue::new(),
            sink,
            sample_rate: config.sample_rate,
            channels: config.channels,
            max_block_frames: config.max_block_frames,
            reserved_layers: config.reserved_layers,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> ChannelConfig {
        self.channels
    }

    #[inline]
    fn get_layer(&self, layer: u32) -> &Layer {
        &self.layers[(layer & LAYER_MASK) as usize]
    }

    /// Play a sound over its full range.
    pub fn play(
        &self,
        sound: Arc<SoundData>,
        instance: &SoundInstanceSettings,
        state: PlayState,
        gain: f32,
        pan: f32,
        pitch: f32,
        speed: f32,
        handle: LayerHandle,
    ) -> LayerHandle {
        let end = sound.length();
        self.play_advanced(sound, instance, state, gain, pan, pitch, speed, 0, end, handle)
    }

    /// Play a sound between explicit start and end frames.
    ///
    /// Fills the slot's non-atomic fields first, then the atomic fields,
    /// and stores the flag last with release ordering so the audio thread
    /// observes fully published data.
    #[allow(clippy::too_many_arguments)]
    pub fn play_advanced(
        &self,
        sound: Arc<SoundData>,
        instance: &SoundInstanceSettings,
        state: PlayState,
        gain: f32,
        pan: f32,
        pitch: f32,
        speed: f32,
        start: u64,
        end: u64,
        handle: LayerHandle,
    ) -> LayerHandle {
        if state <= PlayState::Min || state >= PlayState::Max || state == PlayState::Stop {
            return LayerHandle::INVALID;
        }

        let start = truncate_frames(start);
        let end = truncate_frames(end.min(sound.length()));
        if end <= start || (end - start) < SIMD_BLOCK_FRAMES as u64 {
            return LayerHandle::INVALID;
        }

        if handle.layer != 0 {
            // Engine-managed slot
            return self.claim_layer(handle, sound, instance, state, gain, pan, pitch, speed, start, end);
        }

        // Scan for a free slot starting from the monotonic id cursor
        for _ in 0..LAYER_COUNT {
            let mut key = self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if key == 0 {
                // Handle 0 is reserved
                key = LAYER_COUNT as u32;
            }
            if ((key & LAYER_MASK) as usize) <= self.reserved_layers {
                continue;
            }
            let candidate = LayerHandle::new(key, key);
            if self.get_layer(key).flag.load(Ordering::Acquire) == PlayState::Min as u8 {
                let claimed = self.claim_layer(
                    candidate,
                    sound.clone(),
                    instance,
                    state,
                    gain,
                    pan,
                    pitch,
                    speed,
                    start,
                    end,
                );
                if claimed.valid() {
                    return claimed;
                }
            }
        }

        log::warn!("no free mixer layer for play request");
        LayerHandle::INVALID
    }

    #[allow(clippy::too_many_arguments)]
    fn claim_layer(
        &self,
        handle: LayerHandle,
        sound: Arc<SoundData>,
        instance: &SoundInstanceSettings,
        state: PlayState,
        gain: f32,
        pan: f32,
        pitch: f32,
        speed: f32,
        start: u64,
        end: u64,
    ) -> LayerHandle {
        let audio = self.audio.lock();

        let layer = self.get_layer(handle.layer);
        if layer.flag.load(Ordering::Acquire) != PlayState::Min as u8 {
            return LayerHandle::INVALID;
        }

        let format = sound.format();
        let src_channels = format.channels as usize;

        let Some(converter) = Resampler::new(src_channels, format.sample_rate, self.sample_rate)
        else {
            log::error!("unable to initialize the sample data converter for layer {}", handle.layer);
            return LayerHandle::INVALID;
        };

        let base_ratio = format.sample_rate as f32 / self.sample_rate as f32;

        // Non-atomic fields first, guarded by the Min flag and the mutex
        // SAFETY: audio mutex held
        let shared = unsafe { layer.shared() };
        shared.node_states = audio.pipeline.make_layer_states(src_channels);
        shared.converter = Some(converter);
        shared.spatial = SpatialParams {
            spatialization: instance.spatialization,
            attenuation: instance.attenuation.clone(),
            ..Default::default()
        };
        shared.sound = Some(sound);

        let (left, right) = constant_power_gains(gain, pan);
        let play_speed = (pitch * speed).max(MIN_PLAY_SPEED);

        layer.id.store(handle.id, Ordering::Release);
        layer.start.store(start, Ordering::Release);
        layer.end.store(end, Ordering::Release);
        layer.channels.store(format.channels, Ordering::Release);
        layer.gain.store(left, right, Ordering::Release);
        layer.pitch.store(pitch, Ordering::Release);
        layer.user_play_speed.store(speed.max(MIN_PLAY_SPEED), Ordering::Release);
        layer.play_speed.store(play_speed, Ordering::Release);
        layer.target_play_speed.store(play_speed, Ordering::Release);
        layer.base_sample_rate_ratio.store(base_ratio, Ordering::Release);
        layer.sample_rate_ratio.store(base_ratio * play_speed, Ordering::Release);
        layer.obstruction.store(0.0, Ordering::Release);
        layer.occlusion.store(0.0, Ordering::Release);
        layer.cursor.store(start, Ordering::Release);

        // Flag last, releasing the layer to the audio thread
        layer.flag.store(state as u8, Ordering::Release);
        drop(audio);

        self.sink.on_started(handle);
        handle
    }

    /// Validate a handle against its slot for write access.
    fn active_layer(&self, handle: LayerHandle) -> Option<&Layer> {
        let layer = self.get_layer(handle.layer);
        if handle.id != layer.id() || layer.state() <= PlayState::Stop {
            return None;
        }
        Some(layer)
    }

    pub fn set_gain_pan(&self, handle: LayerHandle, gain: f32, pan: f32) -> bool {
        let Some(layer) = self.active_layer(handle) else { return false };

        // Mono delivery ignores pan
        let pan = if self.channels == ChannelConfig::Mono { 0.0 } else { pan };
        let (left, right) = constant_power_gains(gain, pan);
        layer.gain.store(left, right, Ordering::Release);
        true
    }

    pub fn set_pitch(&self, handle: LayerHandle, pitch: f32) -> bool {
        let Some(layer) = self.active_layer(handle) else { return false };
        layer.pitch.store(pitch, Ordering::Release);
        true
    }

    pub fn set_play_speed(&self, handle: LayerHandle, speed: f32) -> bool {
        let Some(layer) = self.active_layer(handle) else { return false };
        layer.user_play_speed.store(speed.max(MIN_PLAY_SPEED), Ordering::Release);
        true
    }

    pub fn set_cursor(&self, handle: LayerHandle, cursor: u64) -> bool {
        let Some(layer) = self.active_layer(handle) else { return false };
        let clamped = truncate_frames(cursor.clamp(layer.start(), layer.end()));
        layer.cursor.store(clamped, Ordering::Release);
        true
    }

    pub fn set_obstruction(&self, handle: LayerHandle, obstruction: f32) -> bool {
        let Some(layer) = self.active_layer(handle) else { return false };
        layer.obstruction.store(obstruction.clamp(0.0, 1.0), Ordering::Release);
        true
    }

    pub fn set_occlusion(&self, handle: LayerHandle, occlusion: f32) -> bool {
        let Some(layer) = self.active_layer(handle) else { return false };
        layer.occlusion.store(occlusion.clamp(0.0, 1.0), Ordering::Release);
        true
    }

    /// Refresh the world-space parameters the pipeline reads.
    pub fn update_spatial(&self, handle: LayerHandle, update: impl FnOnce(&mut SpatialParams)) -> bool {
        let _audio = self.audio.lock();
        let layer = self.get_layer(handle.layer);
        if handle.id != layer.id() || layer.state() <= PlayState::Stop {
            return false;
        }
        // SAFETY: audio mutex held
        let shared = unsafe { layer.shared() };
        update(&mut shared.spatial);
        true
    }

    /// Transition a layer's play state via CAS, firing lifecycle events.
    pub fn set_play_state(&self, handle: LayerHandle, state: PlayState) -> bool {
        if state >= PlayState::Max {
            return false;
        }

        let layer = self.get_layer(handle.layer);
        if handle.id != layer.id() {
            return false;
        }

        let prev = layer.state();
        if prev < PlayState::Stop || prev == state {
            return false;
        }

        if prev == PlayState::Stop && (state == PlayState::Play || state == PlayState::Loop) {
            self.sink.on_started(handle);
        } else if (prev == PlayState::Play || prev == PlayState::Loop) && state == PlayState::Halt {
            self.sink.on_paused(handle);
        } else if prev == PlayState::Halt && (state == PlayState::Play || state == PlayState::Loop) {
            self.sink.on_resumed(handle);
        } else if prev != PlayState::Stop && state == PlayState::Stop {
            self.sink.on_stopped(handle);
        }

        if layer
            .flag
            .compare_exchange(prev as u8, state as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if state == PlayState::Stop {
            self.release_layer(handle);
        }
        true
    }

    /// Current cursor of an active layer.
    pub fn cursor(&self, handle: LayerHandle) -> Option<u64> {
        let layer = self.get_layer(handle.layer);
        (handle.id == layer.id() && layer.state() > PlayState::Stop).then(|| layer.cursor())
    }

    pub fn play_state(&self, handle: LayerHandle) -> PlayState {
        let layer = self.get_layer(handle.layer);
        if handle.id != layer.id() {
            return PlayState::Min;
        }
        let state = layer.state();
        if state > PlayState::Stop { state } else { PlayState::Min }
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.master_gain.store(gain, Ordering::Release);
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain.load(Ordering::Acquire)
    }

    /// Stop every active layer, invalidating outstanding handles.
    pub fn stop_all(&self) {
        for index in 0..LAYER_COUNT {
            let layer = &self.layers[index];
            let state = layer.state();
            if state > PlayState::Stop {
                let handle = LayerHandle::new(layer.id(), index as u32);
                self.set_play_state(handle, PlayState::Stop);
            }
        }
    }

    /// Pause every playing layer.
    pub fn halt_all(&self) {
        for layer in self.layers.iter() {
            let state = layer.state();
            if state > PlayState::Halt {
                let _ = layer.flag.compare_exchange(
                    state as u8,
                    PlayState::Halt as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
        }
    }

    /// Resume every halted layer.
    pub fn resume_all(&self) {
        for layer in self.layers.iter() {
            let _ = layer.flag.compare_exchange(
                PlayState::Halt as u8,
                PlayState::Play as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Free a layer slot and notify the sink.
    fn release_layer(&self, handle: LayerHandle) {
        {
            let _audio = self.audio.lock();
            let layer = self.get_layer(handle.layer);
            if layer.id() != handle.id {
                return;
            }
            // SAFETY: audio mutex held
            let shared = unsafe { layer.shared() };
            shared.node_states.clear();
            shared.converter = None;
            shared.sound = None;
            layer.flag.store(PlayState::Min as u8, Ordering::Release);
        }
        self.sink.on_ended(handle);
    }

    /// Mix `frame_count` frames of interleaved output into `output`.
    ///
    /// Returns `frame_count` when at least one layer contributed, else 0.
    /// `output` must hold `frame_count × channel_count` samples.
    pub fn mix(&self, output: &mut [Sample], frame_count: usize) -> usize {
        let channel_count = self.channels.count();
        if output.len() < frame_count * channel_count || frame_count > self.max_block_frames {
            return 0;
        }
        let frame_count = frame_count & !(SIMD_BLOCK_FRAMES - 1);

        let mut audio = self.audio.lock();
        audio.scratch.clear();

        let mut mixed_any = false;
        for index in 0..LAYER_COUNT {
            let layer = &self.layers[index];
            if !self.should_mix(layer) {
                continue;
            }

            self.update_pitch(layer);
            mixed_any = true;
            self.mix_layer(layer, index as u32, &mut audio, frame_count);
        }

        // Deliver before releasing the mutex so commands cannot clear
        // layers mid-copy
        let scratch = &audio.scratch;
        match self.channels {
            ChannelConfig::Stereo => {
                for (i, frame) in output.chunks_mut(2).take(frame_count).enumerate() {
                    frame[0] = scratch.channel(0)[i].clamp(-1.0, 1.0);
                    frame[1] = scratch.channel(1)[i].clamp(-1.0, 1.0);
                }
            }
            ChannelConfig::Mono => {
                for (i, sample) in output.iter_mut().take(frame_count).enumerate() {
                    *sample = scratch.channel(0)[i].clamp(-1.0, 1.0);
                }
            }
        }

        drop(audio);
        self.execute_commands();

        if mixed_any { frame_count } else { 0 }
    }

    /// A layer mixes when it holds a sound and its flag is above Halt.
    fn should_mix(&self, layer: &Layer) -> bool {
        layer.state() > PlayState::Halt
    }

    /// Smooth the play speed toward its target and retune the converter.
    fn update_pitch(&self, layer: &Layer) {
        let pitch = layer.pitch.load(Ordering::Acquire);
        let speed = layer.user_play_speed.load(Ordering::Acquire);

        let current = layer.play_speed.load(Ordering::Acquire);
        let target = (pitch * speed).max(MIN_PLAY_SPEED);

        if current != target {
            let next = smooth_play_speed(current, target);
            let base = layer.base_sample_rate_ratio.load(Ordering::Acquire);
            let ratio = base * next;

            layer.target_play_speed.store(target, Ordering::Release);
            layer.sample_rate_ratio.store(ratio, Ordering::Release);
            layer.play_speed.store(next, Ordering::Release);

            // SAFETY: audio mutex held by mix()
            let shared = unsafe { layer.shared() };
            if let Some(converter) = shared.converter.as_mut() {
                converter.set_ratio(ratio as f64);
            }
        }
    }

    fn mix_layer(&self, layer: &Layer, index: u32, audio: &mut AudioState, frame_count: usize) {
        let AudioState { pipeline, scratch, in_chunk, out_chunk, pipeline_out } = audio;

        // SAFETY: audio mutex held by mix()
        let shared = unsafe { layer.shared() };
        let Some(sound) = shared.sound.clone() else {
            // Command-queue discipline should prevent this; treat as free
            layer.flag.store(PlayState::Min as u8, Ordering::Release);
            return;
        };

        let flag = layer.state();
        let cursor = layer.cursor();
        let start = layer.start();
        let end = layer.end();
        let looping = flag == PlayState::Loop;
        let handle = LayerHandle::new(layer.id(), index);

        let (mut left, mut right) = layer.gain();
        if self.channels == ChannelConfig::Mono {
            left = (left + right) * std::f32::consts::FRAC_1_SQRT_2;
            right = left;
        }
        let master = self.master_gain.load(Ordering::Acquire);
        let left_gain = left * master;
        let right_gain = right * master;

        let format = sound.format();
        let src_channels = format.channels as usize;
        let ratio = layer.sample_rate_ratio.load(Ordering::Acquire);

        let out_frames = frame_count;
        let mut in_frames = out_frames;
        if (ratio - 1.0).abs() > f32::EPSILON {
            if let Some(converter) = shared.converter.as_ref() {
                in_frames = converter
                    .required_input_frames(out_frames)
                    .saturating_sub(converter.input_latency());
            }
        }
        in_frames = align_frames(in_frames).min(in_chunk.frames());
        if in_frames == 0 {
            return;
        }

        let length = sound.length();

        if sound.is_streaming() {
            // SAFETY: audio mutex held by mix()
            let inner = unsafe { sound.inner() };
            let chunk = &mut inner.chunk;
            let mut filled = 0usize;
            while filled < in_frames {
                if layer.state() == PlayState::Min {
                    break;
                }
                let want = (in_frames - filled).min(chunk.frames());
                let offset = (cursor + filled as u64) % length;
                let Some(streamer) = inner.streamer.as_mut() else { break };
                let read = streamer.stream(chunk, offset, want as u64);
                if read == 0 {
                    // End of stream and the audio is not looping
                    break;
                }
                let read = (read as usize).min(want);
                in_chunk.copy_from(filled, chunk, 0, read);
                filled += read;
            }
            for ch in 0..src_channels {
                in_chunk.channel_mut(ch)[filled..in_frames].fill(0.0);
            }
        } else {
            // SAFETY: audio mutex held by mix()
            let inner = unsafe { sound.inner() };
            let offset = (cursor % length) as usize;
            let available = length as usize - offset;
            if available < in_frames {
                in_chunk.copy_from(0, &inner.chunk, offset, available);
                in_chunk.copy_from(available, &inner.chunk, 0, in_frames - available);
            } else {
                in_chunk.copy_from(0, &inner.chunk, offset, in_frames);
            }
        }

        match shared.converter.as_mut() {
            Some(converter) => {
                converter.process(in_chunk, in_frames, out_chunk, out_frames);
            }
            None => out_chunk.copy_from(0, in_chunk, 0, out_frames),
        }

        if flag < PlayState::Play {
            return;
        }

        let old_cursor = cursor;
        let width = pipeline.execute(
            &shared.spatial,
            layer.obstruction(),
            layer.occlusion(),
            &mut shared.node_states,
            out_chunk,
            src_channels,
            out_frames,
            pipeline_out,
        );

        if let Some(width) = width {
            let step = in_frames as f64 / out_frames as f64;
            let mut position = cursor as f64;

            let mut i = 0;
            while i < out_frames {
                position = position.clamp(start as f64, end as f64);

                if position.ceil() as u64 >= end {
                    if !looping {
                        break;
                    }
                    // Loop accounting happens in the deferred end command;
                    // here we only ask whether to keep wrapping
                    if self.sink.should_loop(handle) {
                        position = start as f64;
                    } else {
                        if let Some(converter) = shared.converter.as_mut() {
                            converter.reset();
                        }
                        break;
                    }
                }

                match width {
                    1 => {
                        mix_add_block(i, left_gain, pipeline_out.channel(0), scratch.channel_mut(0));
                        mix_add_block(i, right_gain, pipeline_out.channel(0), scratch.channel_mut(1));
                    }
                    _ => {
                        mix_add_block(i, left_gain, pipeline_out.channel(0), scratch.channel_mut(0));
                        mix_add_block(i, right_gain, pipeline_out.channel(1), scratch.channel_mut(1));
                    }
                }

                position += step * SIMD_BLOCK_FRAMES as f64;
                i += SIMD_BLOCK_FRAMES;
            }
        }

        // Advance the cursor; discard the local update if someone moved it
        let mut new_cursor = (cursor + in_frames as u64).clamp(start, end);
        if layer
            .cursor
            .compare_exchange(old_cursor, new_cursor, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            new_cursor = old_cursor;
        }

        if new_cursor == end {
            self.commands.push(MixerCommand::SourceEnded { id: handle.id, layer: index, looping });
        }
    }

    /// Drain the deferred command queue in FIFO order.
    fn execute_commands(&self) {
        while let Some(command) = self.commands.pop() {
            match command {
                MixerCommand::SourceEnded { id, layer, looping } => {
                    let handle = LayerHandle::new(id, layer);
                    if !looping {
                        self.release_layer(handle);
                    } else if self.sink.on_looped(handle) {
                        let slot = self.get_layer(layer);
                        if slot.id() == id {
                            let _ = slot.cursor.compare_exchange(
                                slot.end(),
                                slot.start(),
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            );
                        }
                    } else {
                        self.release_layer(handle);
                    }
                }
            }
        }
    }
}
