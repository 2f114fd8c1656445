//! em-engine: the Echomix game-facing engine
//!
//! Everything above the mixer:
//! - Explicit [`Engine`] context (no process-wide singletons)
//! - Channel state machine with fade scheduling
//! - Priority scheduler with virtual/real channel reconciliation
//! - Bus tree with ducking
//! - Listeners, entities, environments, and rooms in generation-checked
//!   arenas
//! - RTPC values, timed events, switch states, collection play modes
//! - Asset registry and asynchronous sound loading

mod arena;
mod bus;
mod channel;
mod collection;
mod config;
mod engine;
mod entity;
mod environment;
mod event;
mod fader;
mod listener;
mod rtpc;
mod scheduler;
mod sources;

pub use arena::*;
pub use bus::*;
pub use channel::*;
pub use collection::*;
pub use config::*;
pub use engine::*;
pub use entity::*;
pub use environment::*;
pub use event::*;
pub use fader::*;
pub use listener::*;
pub use rtpc::*;
pub use scheduler::*;
pub use sources::*;

pub use em_core::{EngineError, EngineResult};
pub use em_mixer::{LayerHandle, PlayState, Spatialization};
pub use em_spatial::{Attenuation, Orientation, Position3D, Room, Shape, Zone};
