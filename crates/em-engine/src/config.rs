//! Engine configuration
//!
//! The configuration file is JSON with the sections below; every field
//! has a default so partial files and in-code construction both work.
//! The buses file is a separate JSON document.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bus::BusDefinition;
use em_core::{ChannelConfig, EngineError, EngineResult};
use em_mixer::{NodeSpec, OcclusionCurves};
use em_spatial::SphereSampling;

/// Delivery sample format, informational for the driver layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    #[default]
    F32,
    I16,
}

/// How sources are panned when they reach the delivery stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanningMode {
    /// Constant-power stereo panning
    Stereo,
    /// Ambisonic encode and binaural decode
    #[default]
    Binaural,
}

/// Which listener a channel binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerFetchMode {
    /// Never spatialize against a listener
    None,
    #[default]
    Nearest,
    Farthest,
    /// First registered listener
    First,
    /// Most recently registered listener
    Last,
    /// The engine's default listener
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub buffer_size: usize,
    pub frequency: u32,
    pub channels: ChannelConfig,
    pub format: SampleFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            frequency: 48000,
            channels: ChannelConfig::Stereo,
            format: SampleFormat::F32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfigSection {
    pub virtual_channels: usize,
    pub active_channels: usize,
    /// Empty selects the built-in pipeline for the panning mode
    pub pipeline: Vec<NodeSpec>,
    pub panning_mode: PanningMode,
}

impl Default for MixerConfigSection {
    fn default() -> Self {
        Self {
            virtual_channels: 64,
            active_channels: 32,
            pipeline: Vec::new(),
            panning_mode: PanningMode::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HrtfConfig {
    pub amir_file: PathBuf,
    pub hrir_sampling: SphereSampling,
}

impl Default for HrtfConfig {
    fn default() -> Self {
        Self { amir_file: PathBuf::new(), hrir_sampling: SphereSampling::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub listeners: usize,
    pub entities: usize,
    pub environments: usize,
    pub rooms: usize,
    /// Speed of sound in meters per second, for doppler
    pub sound_speed: f32,
    /// Doppler effect scale; 0 disables doppler
    pub doppler_factor: f32,
    pub listener_fetch_mode: ListenerFetchMode,
    /// When false the engine computes entity environment factors from
    /// zones each frame; when true the game supplies them
    pub track_environments: bool,
    pub obstruction: OcclusionCurves,
    pub occlusion: OcclusionCurves,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            listeners: 8,
            entities: 256,
            environments: 64,
            rooms: 32,
            sound_speed: 343.0,
            doppler_factor: 1.0,
            listener_fetch_mode: ListenerFetchMode::default(),
            track_environments: false,
            obstruction: OcclusionCurves::default(),
            occlusion: OcclusionCurves::default(),
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub driver: String,
    pub output: OutputConfig,
    pub mixer: MixerConfigSection,
    pub hrtf: Option<HrtfConfig>,
    pub game: GameConfig,
    /// Path of the buses file; empty uses `buses` below
    pub buses_file: String,
    /// Inline bus definitions, used when `buses_file` is empty
    pub buses: Vec<BusDefinition>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            driver: "null".into(),
            output: OutputConfig::default(),
            mixer: MixerConfigSection::default(),
            hrtf: None,
            game: GameConfig::default(),
            buses_file: String::new(),
            buses: vec![BusDefinition::master()],
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| EngineError::NotReady(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&data)
            .map_err(|e| EngineError::ConfigInvalid(format!("{}: {e}", path.display())))
    }

    /// Resolve the bus definitions, loading the buses file when set.
    pub fn resolve_buses(&self) -> EngineResult<Vec<BusDefinition>> {
        if self.buses_file.is_empty() {
            return Ok(self.buses.clone());
        }
        let data = std::fs::read_to_string(&self.buses_file)
            .map_err(|e| EngineError::NotReady(format!("cannot read {}: {e}", self.buses_file)))?;
        serde_json::from_str(&data)
            .map_err(|e| EngineError::ConfigInvalid(format!("{}: {e}", self.buses_file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_master_bus() {
        let config = EngineConfig::default();
        assert_eq!(config.buses.len(), 1);
        assert_eq!(config.buses[0].id, crate::bus::MASTER_BUS_ID);
    }

    #[test]
    fn test_partial_json_parses() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "output": { "frequency": 44100 }, "mixer": { "active_channels": 4 } }"#,
        )
        .unwrap();
        assert_eq!(config.output.frequency, 44100);
        assert_eq!(config.mixer.active_channels, 4);
        assert_eq!(config.mixer.virtual_channels, 64);
    }

    #[test]
    fn test_round_trip() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
