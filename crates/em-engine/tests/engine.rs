//! End-to-end engine scenarios
//!
//! Each test drives the engine the way a game loop would: `advance_frame`
//! at 60 Hz on the control side, `Mixer::mix` standing in for the audio
//! callback.

use std::sync::Arc;

use em_core::AudioBuffer;
use em_engine::{
    BusDefinition, Channel, ChannelPlaybackState, CollectionDefinition, CollectionEntry,
    CollectionPlayMode, DuckBusDefinition, Engine, EngineConfig, Position3D, RtpcValue,
    SoundDefinition, SourceRef,
};
use em_mixer::{SoundData, SoundFormat};

const SAMPLE_RATE: u32 = 48000;
const FRAME: f32 = 1.0 / 60.0;

fn sine(frames: usize, frequency: f32) -> Arc<SoundData> {
    let mut data = AudioBuffer::new(frames, 1);
    for (i, s) in data.channel_mut(0).iter_mut().enumerate() {
        *s = (2.0 * std::f32::consts::PI * frequency * i as f32 / SAMPLE_RATE as f32).sin() * 0.5;
    }
    Arc::new(SoundData::from_buffer(data, SoundFormat { sample_rate: SAMPLE_RATE, channels: 1 }).unwrap())
}

fn test_config(active: usize, virtual_channels: usize) -> EngineConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = EngineConfig::default();
    config.mixer.active_channels = active;
    config.mixer.virtual_channels = virtual_channels;
    config.output.buffer_size = 1024;
    config
}

/// One 60 Hz tick: control-side advance plus the matching audio callback.
fn tick(engine: &mut Engine) {
    engine.advance_frame(FRAME);
    let mut out = vec![0.0f32; 1600];
    engine.mixer().mix(&mut out, 800);
}

fn register_sound(engine: &mut Engine, id: u64, name: &str, frames: usize, priority: f32) -> SourceRef {
    let mut definition = SoundDefinition::new(id, name, sine(frames, 440.0));
    definition.priority = RtpcValue::constant(priority);
    engine.registry().register_sound(definition)
}

#[test]
fn test_simple_play_runs_to_completion() {
    let mut engine = Engine::new(test_config(2, 8)).unwrap();
    engine.add_listener(1).unwrap();

    // One second of sine at the device rate
    let source = register_sound(&mut engine, 10, "sine", SAMPLE_RATE as usize, 1.0);

    let channel = engine.play(source, Position3D::new(0.0, 0.0, 0.0), 1.0);
    assert!(channel.valid());
    assert!(engine.channel_playing(channel));

    // Sixty-ish ticks of 800 frames covers the second with headroom
    for _ in 0..80 {
        tick(&mut engine);
        if !engine.channel_playing(channel) {
            break;
        }
    }
    assert!(!engine.channel_playing(channel));
}

#[test]
fn test_virtualization_by_priority() {
    let mut engine = Engine::new(test_config(1, 3)).unwrap();
    engine.add_listener(1).unwrap();

    let low = register_sound(&mut engine, 1, "low", SAMPLE_RATE as usize * 4, 0.1);
    let mid = register_sound(&mut engine, 2, "mid", SAMPLE_RATE as usize * 4, 0.5);
    let high = register_sound(&mut engine, 3, "high", SAMPLE_RATE as usize * 4, 0.9);

    let origin = Position3D::new(0.0, 0.0, 0.0);
    let low_channel = engine.play(low, origin, 1.0);
    let mid_channel = engine.play(mid, origin, 1.0);
    let high_channel = engine.play(high, origin, 1.0);
    assert!(low_channel.valid() && mid_channel.valid() && high_channel.valid());

    // After reconciliation only the highest priority is real
    tick(&mut engine);
    assert!(engine.channel_is_real(high_channel));
    assert!(!engine.channel_is_real(mid_channel));
    assert!(!engine.channel_is_real(low_channel));

    // Stopping the real channel promotes the next one down
    engine.stop(high_channel, 0.0);
    tick(&mut engine);
    assert!(!engine.channel_playing(high_channel));
    assert!(engine.channel_is_real(mid_channel));
    assert!(!engine.channel_is_real(low_channel));
}

#[test]
fn test_priority_rejection_when_no_slots() {
    // One active channel and no virtual tracking
    let mut engine = Engine::new(test_config(1, 0)).unwrap();
    engine.add_listener(1).unwrap();

    let high = register_sound(&mut engine, 1, "high", SAMPLE_RATE as usize * 4, 0.9);
    let low = register_sound(&mut engine, 2, "low", SAMPLE_RATE as usize * 4, 0.1);

    let origin = Position3D::new(0.0, 0.0, 0.0);
    let playing = engine.play(high, origin, 1.0);
    assert!(playing.valid());
    tick(&mut engine);

    // Lower priority cannot evict
    let rejected = engine.play(low, origin, 1.0);
    assert!(!rejected.valid());
    assert!(engine.channel_playing(playing));

    // Higher priority can
    let higher = register_sound(&mut engine, 3, "higher", SAMPLE_RATE as usize * 4, 2.0);
    let winner = engine.play(higher, origin, 1.0);
    assert!(winner.valid());
    assert!(!engine.channel_playing(playing));
}

#[test]
fn test_stop_round_trip_frees_layer() {
    let mut engine = Engine::new(test_config(2, 8)).unwrap();
    engine.add_listener(1).unwrap();
    let source = register_sound(&mut engine, 1, "beep", SAMPLE_RATE as usize * 4, 1.0);

    for _ in 0..8 {
        let channel = engine.play(source, Position3D::new(0.0, 0.0, 0.0), 1.0);
        assert!(channel.valid());
        engine.stop(channel, 0.0);
        tick(&mut engine);
        assert_eq!(engine.channel_playback_state(channel), ChannelPlaybackState::Stopped);
    }
}

#[test]
fn test_pause_resume_cycle() {
    let mut engine = Engine::new(test_config(2, 8)).unwrap();
    engine.add_listener(1).unwrap();

    let mut definition = SoundDefinition::new(1, "music", sine(SAMPLE_RATE as usize, 220.0));
    definition.loop_enabled = true;
    let source = engine.registry().register_sound(definition);

    let channel = engine.play(source, Position3D::new(0.0, 0.0, 0.0), 1.0);
    tick(&mut engine);

    engine.pause(channel, 0.0);
    tick(&mut engine);
    assert_eq!(engine.channel_playback_state(channel), ChannelPlaybackState::Paused);

    engine.resume(channel, 0.0);
    tick(&mut engine);
    assert_eq!(engine.channel_playback_state(channel), ChannelPlaybackState::Playing);

    engine.stop(channel, 0.0);
    tick(&mut engine);
    assert!(!engine.channel_playing(channel));
}

#[test]
fn test_loop_count_stops_channel() {
    let mut engine = Engine::new(test_config(2, 8)).unwrap();
    engine.add_listener(1).unwrap();

    // Short loop: 4800 frames, three passes
    let mut definition = SoundDefinition::new(1, "loop3", sine(4800, 440.0));
    definition.loop_enabled = true;
    definition.loop_count = 3;
    let source = engine.registry().register_sound(definition);

    let channel = engine.play(source, Position3D::new(0.0, 0.0, 0.0), 1.0);
    assert!(channel.valid());

    // 3 × 4800 frames is 0.3 s; give it a second of ticks
    for _ in 0..60 {
        tick(&mut engine);
        if !engine.channel_playing(channel) {
            break;
        }
    }
    assert!(!engine.channel_playing(channel));
}

#[test]
fn test_bus_ducking_settles_and_releases() {
    let mut config = test_config(2, 8);
    let mut master = BusDefinition::master();
    master.child_buses = vec![2, 3];
    config.buses = vec![
        master,
        BusDefinition { id: 2, name: "music".into(), gain: 1.0, child_buses: vec![], duck_buses: vec![] },
        BusDefinition {
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
        },
    ];

    let mut engine = Engine::new(config).unwrap();
    engine.add_listener(1).unwrap();

    let mut voice_line = SoundDefinition::new(1, "vo", sine(SAMPLE_RATE as usize, 300.0));
    voice_line.bus = 3;
    let source = engine.registry().register_sound(voice_line);

    let channel = engine.play(source, Position3D::new(0.0, 0.0, 0.0), 1.0);
    assert!(channel.valid());

    // Within the attack time the music bus settles at the duck gain
    for _ in 0..30 {
        tick(&mut engine);
    }
    assert!((engine.bus_final_gain(2) - 0.25).abs() < 1e-3, "ducked {}", engine.bus_final_gain(2));

    // After the voice stops and the release elapses it returns to 1
    engine.stop(channel, 0.0);
    for _ in 0..60 {
        tick(&mut engine);
    }
    assert!((engine.bus_final_gain(2) - 1.0).abs() < 1e-3, "released {}", engine.bus_final_gain(2));
}

#[test]
fn test_collection_play_all_stops_when_exhausted() {
    let mut engine = Engine::new(test_config(2, 8)).unwrap();
    engine.add_listener(1).unwrap();

    for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
        register_sound(&mut engine, id, name, 4800, 1.0);
    }
    let mut collection = CollectionDefinition::new(
        100,
        "steps",
        vec![
            CollectionEntry { sound: 1, weight: 1.0 },
            CollectionEntry { sound: 2, weight: 1.0 },
            CollectionEntry { sound: 3, weight: 1.0 },
        ],
    );
    collection.play_mode = CollectionPlayMode::PlayAll;
    let source = engine.registry().register_collection(collection);

    let channel = engine.play(source, Position3D::new(0.0, 0.0, 0.0), 1.0);
    assert!(channel.valid());

    // Three members × 0.1 s each; a second of ticks is plenty
    for _ in 0..60 {
        tick(&mut engine);
        if !engine.channel_playing(channel) {
            break;
        }
    }
    assert!(!engine.channel_playing(channel));
}

#[test]
fn test_master_gain_law() {
    let mut engine = Engine::new(test_config(2, 8)).unwrap();
    engine.add_listener(1).unwrap();

    engine.set_master_gain(0.5);
    engine.advance_frame(FRAME);
    approx::assert_abs_diff_eq!(engine.bus_final_gain(1), 0.5, epsilon = 1e-6);

    engine.set_mute(true);
    engine.advance_frame(FRAME);
    assert_eq!(engine.bus_final_gain(1), 0.0);

    engine.set_mute(false);
    engine.advance_frame(FRAME);
    assert!((engine.bus_final_gain(1) - 0.5).abs() < 1e-6);
}

#[test]
fn test_stop_all() {
    let mut engine = Engine::new(test_config(4, 8)).unwrap();
    engine.add_listener(1).unwrap();
    let source = register_sound(&mut engine, 1, "beep", SAMPLE_RATE as usize * 2, 1.0);

    let mut channels: Vec<Channel> = Vec::new();
    for _ in 0..4 {
        channels.push(engine.play(source, Position3D::new(0.0, 0.0, 0.0), 1.0));
    }
    tick(&mut engine);

    engine.stop_all();
    tick(&mut engine);
    for channel in channels {
        assert!(!engine.channel_playing(channel));
    }
}

#[test]
fn test_play_by_name_and_unknown_name() {
    let mut engine = Engine::new(test_config(2, 8)).unwrap();
    engine.add_listener(1).unwrap();
    register_sound(&mut engine, 1, "shot", 4800, 1.0);

    let channel = engine.play_by_name("shot", Position3D::new(0.0, 0.0, 0.0), 1.0);
    assert!(channel.valid());

    let missing = engine.play_by_name("nope", Position3D::new(0.0, 0.0, 0.0), 1.0);
    assert!(!missing.valid());
}

#[test]
fn test_async_bank_loading() {
    let mut engine = Engine::new(test_config(2, 8)).unwrap();
    engine.add_listener(1).unwrap();

    engine.load_sound_bank_async(42, || {
        vec![SoundDefinition::new(7, "loaded", sine(4800, 440.0))]
    });

    // Poll until the worker delivers
    let mut done = false;
    for _ in 0..200 {
        if engine.try_finalize_load_sound_files() {
            done = true;
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert!(done);

    let channel = engine.play_by_name("loaded", Position3D::new(0.0, 0.0, 0.0), 1.0);
    assert!(channel.valid());

    engine.unload_sound_bank(42);
    let gone = engine.play_by_name("loaded", Position3D::new(0.0, 0.0, 0.0), 1.0);
    assert!(!gone.valid());
}

#[test]
fn test_spatialized_sound_attenuates_with_distance() {
    let mut engine = Engine::new(test_config(2, 8)).unwrap();
    engine.add_listener(1).unwrap();

    let mut definition = SoundDefinition::new(1, "spatial", sine(SAMPLE_RATE as usize * 2, 440.0));
    definition.spatialization = em_engine::Spatialization::Position;
    definition.attenuation =
        em_engine::Attenuation { min_distance: 1.0, max_distance: 10.0, ..Default::default() };
    let source = engine.registry().register_sound(definition);

    let near = engine.play(source, Position3D::new(0.0, 2.0, 0.0), 1.0);
    engine.advance_frame(FRAME);
    let mut near_out = vec![0.0f32; 1600];
    engine.mixer().mix(&mut near_out, 800);
    let near_energy: f32 = near_out.iter().map(|s| s * s).sum();
    engine.stop(near, 0.0);
    tick(&mut engine);

    let far = engine.play(source, Position3D::new(0.0, 9.0, 0.0), 1.0);
    engine.advance_frame(FRAME);
    let mut far_out = vec![0.0f32; 1600];
    engine.mixer().mix(&mut far_out, 800);
    let far_energy: f32 = far_out.iter().map(|s| s * s).sum();
    engine.stop(far, 0.0);

    assert!(near_energy > 0.0);
    assert!(far_energy < near_energy, "{far_energy} >= {near_energy}");
}

#[test]
fn test_switch_container_requires_entity() {
    let mut engine = Engine::new(test_config(2, 8)).unwrap();
    engine.add_listener(1).unwrap();

    register_sound(&mut engine, 1, "walk", 4800, 1.0);
    register_sound(&mut engine, 2, "run", 4800, 1.0);
    let container = em_engine::SwitchContainerDefinition::new(
        50,
        "footsteps",
        7, // switch group
        vec![
            em_engine::SwitchItem { state: 100, sounds: vec![1] },
            em_engine::SwitchItem { state: 101, sounds: vec![2] },
        ],
    );
    let source = engine.registry().register_switch_container(container);
    engine.set_switch_state(7, 100);

    // Entity-scoped: no entity, no playback
    let rejected = engine.play(source, Position3D::new(0.0, 0.0, 0.0), 1.0);
    assert!(!rejected.valid());

    engine.add_entity(9).unwrap();
    let channel = engine.play_on_entity(source, 9, 1.0);
    assert!(channel.valid());

    // Changing the group state restarts the channel with the new sounds
    engine.set_switch_state(7, 101);
    tick(&mut engine);
    assert!(engine.channel_playing(channel));
}

#[test]
fn test_event_trigger_and_cancel() {
    let mut engine = Engine::new(test_config(2, 8)).unwrap();
    engine.add_listener(1).unwrap();
    let source = register_sound(&mut engine, 1, "stinger", SAMPLE_RATE as usize * 2, 1.0);

    engine.register_event(em_engine::EventDefinition {
        id: 1,
        name: "ambush".into(),
        actions: vec![em_engine::EventAction {
            kind: em_engine::EventActionKind::Play,
            targets: vec![source],
            duration: 0.0,
        }],
    });

    let canceler = engine.trigger_by_name("ambush", None).unwrap();
    tick(&mut engine);

    // The event played its sound
    let mut out = vec![0.0f32; 1600];
    assert_eq!(engine.mixer().mix(&mut out, 800), 800);
    assert!(out.iter().any(|s| s.abs() > 0.001));

    // Cancelling stops what the event started
    canceler.cancel();
    tick(&mut engine);
    tick(&mut engine);
    let mut silent = vec![0.0f32; 1600];
    assert_eq!(engine.mixer().mix(&mut silent, 800), 0);
}

#[test]
fn test_rtpc_drives_sound_gain() {
    let mut engine = Engine::new(test_config(2, 8)).unwrap();
    engine.add_listener(1).unwrap();

    engine.register_rtpc(em_engine::Rtpc::new(5, "intensity", 0.0, 1.0));

    let mut definition = SoundDefinition::new(1, "wind", sine(SAMPLE_RATE as usize * 2, 200.0));
    definition.gain = RtpcValue {
        base: 1.0,
        binding: Some(em_engine::RtpcBinding {
            rtpc: 5,
            min_value: 0.0,
            max_value: 1.0,
            curve: em_engine::FadeCurve::Linear,
        }),
    };
    definition.loop_enabled = true;
    let source = engine.registry().register_sound(definition);

    engine.set_rtpc_value(5, 1.0);
    let channel = engine.play(source, Position3D::new(0.0, 0.0, 0.0), 1.0);
    tick(&mut engine);

    let mut loud = vec![0.0f32; 1600];
    engine.mixer().mix(&mut loud, 800);
    let loud_energy: f32 = loud.iter().map(|s| s * s).sum();

    engine.set_rtpc_value(5, 0.1);
    tick(&mut engine);
    let mut quiet = vec![0.0f32; 1600];
    engine.mixer().mix(&mut quiet, 800);
    let quiet_energy: f32 = quiet.iter().map(|s| s * s).sum();

    assert!(loud_energy > 0.0);
    assert!(quiet_energy < loud_energy * 0.2, "{quiet_energy} vs {loud_energy}");
    engine.stop(channel, 0.0);
}
