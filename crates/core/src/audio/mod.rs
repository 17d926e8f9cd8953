use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::{Result, VisualsError};

/// Loudness reported while nothing has been heard yet.
pub const SILENCE_LUFS: f32 = -70.0;

/// Band energies, each normalised to the share of total spectral magnitude.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bands {
    pub bass: f32,
    pub low_mid: f32,
    pub mid: f32,
    pub high_mid: f32,
    pub highs: f32,
}

/// Periodic snapshot of audio descriptors. Frames are immutable values and
/// are replaced wholesale on every publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    /// Playback position in seconds.
    pub time: f32,
    pub rms: f32,
    /// Normalised [0, 1] spectral centroid where 1.0 is Nyquist.
    pub spectral_centroid: f32,
    pub flux: f32,
    pub onset: bool,
    /// Beats per minute; `0.0` means unknown.
    pub tempo: f32,
    pub beat_confidence: f32,
    /// Position inside the current beat, in `[0, 1)`.
    pub beat_phase: f32,
    pub bands: Bands,
    pub chroma: [f32; 12],
    pub lufs_short: f32,
    pub novelty: f32,
}

impl AudioFrame {
    /// The documented stand-in used before any frame arrives: silence at
    /// time zero with unknown tempo, so the bar clock stays idle.
    pub fn neutral() -> Self {
        Self {
            time: 0.0,
            rms: 0.0,
            spectral_centroid: 0.0,
            flux: 0.0,
            onset: false,
            tempo: 0.0,
            beat_confidence: 0.0,
            beat_phase: 0.0,
            bands: Bands::default(),
            chroma: [0.0; 12],
            lufs_short: SILENCE_LUFS,
            novelty: 0.0,
        }
    }
}

impl Default for AudioFrame {
    fn default() -> Self {
        Self::neutral()
    }
}

#[derive(Debug)]
struct LatestFrame {
    sequence: u64,
    frame: Arc<AudioFrame>,
    subscribers: usize,
}

/// Single-slot "latest value" cell fed by the audio feature producer.
///
/// A publish swaps the whole `Arc<AudioFrame>` and bumps a monotonic
/// sequence number; readers never observe a partially written frame.
#[derive(Debug, Clone)]
pub struct FrameBus {
    shared: Arc<Mutex<LatestFrame>>,
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBus {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(LatestFrame {
                sequence: 0,
                frame: Arc::new(AudioFrame::neutral()),
                subscribers: 0,
            })),
        }
    }

    /// Replaces the latest frame and returns its sequence number.
    pub fn publish(&self, frame: AudioFrame) -> Result<u64> {
        let frame = Arc::new(frame);
        let mut latest = lock(&self.shared)?;
        latest.sequence += 1;
        latest.frame = frame;
        Ok(latest.sequence)
    }

    pub fn subscribe(&self) -> FrameSubscription {
        if let Ok(mut latest) = lock(&self.shared) {
            latest.subscribers += 1;
        }
        FrameSubscription {
            shared: self.shared.clone(),
            last_seen: 0,
            cached: Arc::new(AudioFrame::neutral()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared)
            .map(|latest| latest.subscribers)
            .unwrap_or(0)
    }

    pub fn sequence(&self) -> u64 {
        lock(&self.shared).map(|latest| latest.sequence).unwrap_or(0)
    }
}

/// Reader side of a [`FrameBus`]. Polled once per tick; never blocks waiting
/// for the producer.
#[derive(Debug)]
pub struct FrameSubscription {
    shared: Arc<Mutex<LatestFrame>>,
    last_seen: u64,
    cached: Arc<AudioFrame>,
}

impl FrameSubscription {
    /// Returns the newest frame if one was published since the last poll.
    pub fn poll(&mut self) -> Result<Option<Arc<AudioFrame>>> {
        let latest = lock(&self.shared)?;
        if latest.sequence == self.last_seen {
            return Ok(None);
        }
        self.last_seen = latest.sequence;
        self.cached = latest.frame.clone();
        Ok(Some(self.cached.clone()))
    }

    /// The most recently polled frame, or the neutral frame before any
    /// publish has been observed.
    pub fn latest(&self) -> Arc<AudioFrame> {
        self.cached.clone()
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_seen
    }

    pub fn unsubscribe(self) {}
}

impl Drop for FrameSubscription {
    fn drop(&mut self) {
        if let Ok(mut latest) = lock(&self.shared) {
            latest.subscribers = latest.subscribers.saturating_sub(1);
        }
    }
}

fn lock(shared: &Mutex<LatestFrame>) -> Result<MutexGuard<'_, LatestFrame>> {
    shared
        .lock()
        .map_err(|_| VisualsError::msg("audio frame cell has been poisoned"))
}
