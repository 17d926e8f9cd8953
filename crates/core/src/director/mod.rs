//! Music-synchronised scene scheduling.
//!
//! The director follows the audio frames, derives a bar clock from the
//! reported tempo and fires authored cues when a new bar begins. On every
//! track change it also asks the metadata provider for track-level
//! descriptors, once, and picks a default scene from them.

mod cues;

use std::{
    rc::Rc,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{
    future::{FutureExt, LocalBoxFuture},
    task::noop_waker_ref,
};
use serde::{Deserialize, Serialize};

use crate::{
    audio::{AudioFrame, FrameSubscription},
    config::{DirectorConfig, HeuristicThresholds},
    engine::SceneSwitcher,
    program::ProgramName,
    timeline::BarClock,
    Result, VisualsError,
};

pub use cues::{Cue, CueAction, CueStore};

/// Track-level descriptors reported by the music service, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackDescriptors {
    pub energy: f32,
    pub danceability: f32,
    pub valence: f32,
    pub tempo: Option<f32>,
}

/// Per-track descriptor lookup provided by the music service.
pub trait TrackMetadata {
    fn audio_descriptors(&self, track_id: &str) -> LocalBoxFuture<'static, Result<TrackDescriptors>>;
}

/// Default scene for a track, checked in a fixed order.
pub fn choose_scene(descriptors: &TrackDescriptors, thresholds: &HeuristicThresholds) -> ProgramName {
    let energetic = descriptors.energy > thresholds.high_energy;
    let danceable = descriptors.danceability > thresholds.danceable;

    if energetic && danceable {
        ProgramName::Particles
    } else if descriptors.valence > thresholds.high_valence && danceable {
        ProgramName::Fluid
    } else if energetic && descriptors.valence < thresholds.low_valence {
        ProgramName::Tunnel
    } else if descriptors.energy < thresholds.low_energy {
        ProgramName::Typography
    } else {
        ProgramName::Terrain
    }
}

/// Scene switch requested by the director.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectorEvent {
    Cue { bar: u64, scene: ProgramName, epoch: u64 },
    Heuristic { scene: ProgramName, epoch: u64 },
}

struct TrackState {
    id: String,
    cues: Vec<Cue>,
    descriptors: Option<LocalBoxFuture<'static, Result<TrackDescriptors>>>,
}

pub struct Director {
    config: DirectorConfig,
    frames: FrameSubscription,
    cues: CueStore,
    metadata: Rc<dyn TrackMetadata>,
    track: Option<TrackState>,
    clock: BarClock,
}

impl Director {
    pub fn new(
        config: DirectorConfig,
        frames: FrameSubscription,
        cues: CueStore,
        metadata: Rc<dyn TrackMetadata>,
    ) -> Self {
        let clock = BarClock::new(config.beats_per_bar);
        Self {
            config,
            frames,
            cues,
            metadata,
            track: None,
            clock,
        }
    }

    /// Switches to a new track: loads its cues and starts the one descriptor
    /// lookup for it. Repeating the current id does nothing.
    pub fn set_track(&mut self, track_id: &str) {
        if self.track_id() == Some(track_id) {
            return;
        }

        let cues = self.cues.load(track_id).unwrap_or_else(|err| {
            tracing::warn!(track = track_id, error = %err, "could not load cues");
            Vec::new()
        });
        tracing::info!(track = track_id, cues = cues.len(), "track changed");

        self.clock.reset();
        self.track = Some(TrackState {
            id: track_id.to_string(),
            cues,
            descriptors: Some(self.metadata.audio_descriptors(track_id)),
        });
    }

    pub fn track_id(&self) -> Option<&str> {
        self.track.as_ref().map(|track| track.id.as_str())
    }

    pub fn cues(&self) -> &[Cue] {
        self.track
            .as_ref()
            .map(|track| track.cues.as_slice())
            .unwrap_or_default()
    }

    pub fn current_bar(&self) -> Option<u64> {
        self.clock.current_bar()
    }

    /// Persists a cue for the current track and schedules it immediately.
    pub fn add_cue(&mut self, cue: Cue) -> Result<()> {
        let track = self
            .track
            .as_mut()
            .ok_or(VisualsError::InvalidInput("no active track to add a cue to"))?;
        track.cues = self.cues.add(&track.id, cue)?;
        Ok(())
    }

    /// Runs once per render tick: resolves the pending descriptor lookup and
    /// processes the newest audio frame, if any.
    pub fn tick(&mut self, switcher: &mut dyn SceneSwitcher) -> Vec<DirectorEvent> {
        let mut events = Vec::new();
        events.extend(self.poll_descriptors(switcher));

        match self.frames.poll() {
            Ok(Some(frame)) => events.extend(self.on_frame(&frame, switcher)),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "skipping director tick"),
        }
        events
    }

    /// Advances the bar clock with one frame. When a new bar begins, the cue
    /// scheduled for it fires; with several, the last one added wins.
    pub fn on_frame(
        &mut self,
        frame: &AudioFrame,
        switcher: &mut dyn SceneSwitcher,
    ) -> Option<DirectorEvent> {
        let position = self.clock.advance(frame.time, frame.tempo)?;
        let track = self.track.as_ref()?;
        let cue = track
            .cues
            .iter()
            .rev()
            .find(|cue| u64::from(cue.bar) == position.bar)?;

        let scene = cue.scene;
        let epoch = switcher.switch_scene(scene, self.config.cue_crossfade());
        tracing::info!(track = %track.id, bar = position.bar, %scene, "cue fired");
        Some(DirectorEvent::Cue {
            bar: position.bar,
            scene,
            epoch,
        })
    }

    /// Most recent frame the director has processed.
    pub fn latest_frame(&self) -> Arc<AudioFrame> {
        self.frames.latest()
    }

    fn poll_descriptors(&mut self, switcher: &mut dyn SceneSwitcher) -> Option<DirectorEvent> {
        let track = self.track.as_mut()?;
        let pending = track.descriptors.as_mut()?;

        let mut cx = Context::from_waker(noop_waker_ref());
        let Poll::Ready(result) = pending.poll_unpin(&mut cx) else {
            return None;
        };
        track.descriptors = None;

        match result {
            Ok(descriptors) => {
                let scene = choose_scene(&descriptors, &self.config.thresholds);
                let epoch = switcher.switch_scene(scene, self.config.heuristic_crossfade());
                tracing::info!(track = %track.id, %scene, ?descriptors, "applied default scene for track");
                Some(DirectorEvent::Heuristic { scene, epoch })
            }
            Err(err) => {
                tracing::warn!(track = %track.id, error = %err, "track descriptors unavailable, keeping current scene");
                None
            }
        }
    }
}

impl std::fmt::Debug for Director {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Director")
            .field("track", &self.track_id())
            .field("cues", &self.cues())
            .field("bar", &self.clock.current_bar())
            .finish_non_exhaustive()
    }
}
