//! em-spatial: Echomix spatialization primitives
//!
//! Everything the pipeline's spatial nodes need:
//! - 3D position/orientation math and listener-space transforms
//! - Zone shapes (sphere/box/capsule/cone) with inner/outer factor interpolation
//! - First-order ambisonic encoding, rotation, and binaural decoding
//! - HRIR sphere datasets loaded from `.amir` assets
//! - Distance attenuation curves and rooms

mod attenuation;
mod binaural;
mod error;
mod hoa;
mod hrir;
mod position;
mod room;
mod shape;

pub use attenuation::*;
pub use binaural::*;
pub use error::*;
pub use hoa::*;
pub use hrir::*;
pub use position::*;
pub use room::*;
pub use shape::*;
