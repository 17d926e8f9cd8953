//! Core library for the Pulse Visuals engine.
//!
//! The engine renders audio-reactive programs through an external graphics
//! capability, crossfading between two slots when the scene changes. Audio
//! features reach it through a latest-value [`FrameBus`]; the [`Director`]
//! follows the same frames to fire bar-synchronised cues and pick a default
//! scene per track. Everything is single-threaded apart from the bus, and
//! every collaborator is injected, so independent engines can coexist.

pub mod analysis;
pub mod artwork;
pub mod audio;
pub mod config;
pub mod director;
pub mod engine;
pub mod error;
pub mod graphics;
pub mod palette;
pub mod program;
pub mod quality;
pub mod store;
pub mod timeline;

pub use analysis::FeatureExtractor;
pub use artwork::{ArtworkCache, ArtworkResponse, ArtworkSource, FileArtworkSource, Validators};
pub use audio::{AudioFrame, Bands, FrameBus, FrameSubscription};
pub use config::{AppConfig, AudioConfig, DirectorConfig, EngineConfig, HeuristicThresholds};
pub use director::{Cue, CueStore, Director, DirectorEvent, TrackDescriptors, TrackMetadata};
pub use engine::{CrossfadePhase, CrossfadeState, Engine, SceneSwitcher, TickReport};
pub use error::{Result, VisualsError};
pub use graphics::{Extent, GraphicsBackend, HeadlessBackend};
pub use palette::{Color, Palette};
pub use program::{Program, ProgramName, VisualProgram};
pub use quality::{QualityConfig, QualityController, QualityPatch, QualityState};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use timeline::{BarClock, FrameClock};
