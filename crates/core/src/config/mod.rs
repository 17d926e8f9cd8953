use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{graphics::Extent, program::ProgramName, quality::QualityConfig, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub quality: QualityConfig,
    pub director: DirectorConfig,
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections and fields fall back
    /// to their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub viewport: Extent,
    pub initial_scene: ProgramName,
    pub default_crossfade_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            viewport: Extent::default(),
            initial_scene: ProgramName::Particles,
            default_crossfade_ms: 1_500,
        }
    }
}

impl EngineConfig {
    pub fn default_crossfade(&self) -> Duration {
        Duration::from_millis(self.default_crossfade_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorConfig {
    pub beats_per_bar: u32,
    pub cue_crossfade_ms: u64,
    pub heuristic_crossfade_ms: u64,
    pub thresholds: HeuristicThresholds,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            beats_per_bar: 4,
            cue_crossfade_ms: 2_000,
            heuristic_crossfade_ms: 3_000,
            thresholds: HeuristicThresholds::default(),
        }
    }
}

impl DirectorConfig {
    pub fn cue_crossfade(&self) -> Duration {
        Duration::from_millis(self.cue_crossfade_ms)
    }

    pub fn heuristic_crossfade(&self) -> Duration {
        Duration::from_millis(self.heuristic_crossfade_ms)
    }
}

/// Fixed cut-offs for the per-track default scene choice. All descriptors
/// are in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicThresholds {
    pub high_energy: f32,
    pub low_energy: f32,
    pub danceable: f32,
    pub high_valence: f32,
    pub low_valence: f32,
}

impl Default for HeuristicThresholds {
    fn default() -> Self {
        Self {
            high_energy: 0.7,
            low_energy: 0.4,
            danceable: 0.6,
            high_valence: 0.6,
            low_valence: 0.4,
        }
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 1024,
        }
    }
}
