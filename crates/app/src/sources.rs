//! Offline collaborators for the headless runner: sample sources that feed
//! the feature extractor and a file-backed track metadata provider.

use std::{collections::HashMap, f32::consts::TAU, path::Path};

use futures::future::{self, FutureExt, LocalBoxFuture};
use hound::{SampleFormat, WavReader};
use pulse_visuals_core::{Result, TrackDescriptors, TrackMetadata, VisualsError};

/// Mono sample stream consumed block by block.
pub trait SampleSource {
    fn sample_rate(&self) -> u32;

    /// Fills `block` with the next samples, zero-padding a short tail.
    /// Returns `false` once the stream is exhausted.
    fn read_block(&mut self, block: &mut [f32]) -> bool;
}

/// Whole WAV file decoded up front and downmixed to mono.
pub struct WavSource {
    sample_rate: u32,
    samples: Vec<f32>,
    position: usize,
}

impl WavSource {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = WavReader::open(path)
            .map_err(|err| VisualsError::msg(format!("failed to open `{}`: {err}", path.display())))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: std::result::Result<Vec<f32>, _> = match spec.sample_format {
            SampleFormat::Float => reader.samples::<f32>().collect(),
            SampleFormat::Int => {
                let full_scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / full_scale))
                    .collect()
            }
        };
        let interleaved =
            interleaved.map_err(|err| VisualsError::msg(format!("failed to read samples: {err}")))?;

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };
        tracing::info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels,
            seconds = samples.len() as f32 / spec.sample_rate.max(1) as f32,
            "loaded wav input"
        );

        Ok(Self {
            sample_rate: spec.sample_rate,
            samples,
            position: 0,
        })
    }
}

impl SampleSource for WavSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_block(&mut self, block: &mut [f32]) -> bool {
        let remaining = &self.samples[self.position.min(self.samples.len())..];
        if remaining.is_empty() {
            return false;
        }
        let take = remaining.len().min(block.len());
        block[..take].copy_from_slice(&remaining[..take]);
        block[take..].fill(0.0);
        self.position += take;
        true
    }
}

const CLICK_SECONDS: f32 = 0.03;
const CLICK_HZ: f32 = 1_000.0;
const ACCENT_HZ: f32 = 1_500.0;

/// Endless metronome: a short decaying tone on every beat, accented on the
/// first beat of each bar.
pub struct ClickTrack {
    sample_rate: u32,
    beat_samples: u64,
    beats_per_bar: u64,
    position: u64,
}

impl ClickTrack {
    pub fn new(sample_rate: u32, bpm: f32, beats_per_bar: u32) -> Result<Self> {
        if !(bpm.is_finite() && bpm > 0.0) {
            return Err(VisualsError::InvalidInput("click track tempo must be positive"));
        }
        let sample_rate = sample_rate.max(1);
        Ok(Self {
            sample_rate,
            beat_samples: ((60.0 / bpm) * sample_rate as f32).round().max(1.0) as u64,
            beats_per_bar: beats_per_bar.max(1) as u64,
            position: 0,
        })
    }

    fn sample_at(&self, index: u64) -> f32 {
        let beat = index / self.beat_samples;
        let offset = (index % self.beat_samples) as f32 / self.sample_rate as f32;
        if offset >= CLICK_SECONDS {
            return 0.0;
        }
        let pitch = if beat % self.beats_per_bar == 0 {
            ACCENT_HZ
        } else {
            CLICK_HZ
        };
        let envelope = 1.0 - offset / CLICK_SECONDS;
        0.8 * envelope * (TAU * pitch * offset).sin()
    }
}

impl SampleSource for ClickTrack {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_block(&mut self, block: &mut [f32]) -> bool {
        for (offset, slot) in block.iter_mut().enumerate() {
            *slot = self.sample_at(self.position + offset as u64);
        }
        self.position += block.len() as u64;
        true
    }
}

/// Track descriptors read from a JSON object keyed by track id. Unknown
/// tracks fail the lookup the way an unreachable service would.
#[derive(Debug, Default)]
pub struct DescriptorFile {
    tracks: HashMap<String, TrackDescriptors>,
}

impl DescriptorFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(Self {
            tracks: serde_json::from_str(raw)?,
        })
    }
}

impl TrackMetadata for DescriptorFile {
    fn audio_descriptors(&self, track_id: &str) -> LocalBoxFuture<'static, Result<TrackDescriptors>> {
        let found = self
            .tracks
            .get(track_id)
            .copied()
            .ok_or_else(|| VisualsError::msg(format!("no descriptors for track `{track_id}`")));
        future::ready(found).boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use hound::{WavSpec, WavWriter};

    use super::*;

    #[test]
    fn click_track_is_loud_on_the_beat_and_silent_between() {
        let mut click = ClickTrack::new(48_000, 120.0, 4).unwrap();
        // 10 ms blocks; beats every 500 ms, each click lasting 30 ms.
        let peaks: Vec<f32> = (0..51)
            .map(|_| {
                let mut block = vec![0.0; 480];
                assert!(click.read_block(&mut block));
                block.iter().fold(0.0_f32, |peak, sample| peak.max(sample.abs()))
            })
            .collect();

        assert!(peaks[0] > 0.1);
        assert!(peaks[3..50].iter().all(|peak| *peak == 0.0));
        assert!(peaks[50] > 0.1);
    }

    #[test]
    fn click_track_rejects_zero_tempo() {
        assert!(ClickTrack::new(48_000, 0.0, 4).is_err());
    }

    #[test]
    fn wav_source_downmixes_and_pads_the_tail() {
        let path = std::env::temp_dir().join(format!("pulse-visuals-{}-input.wav", std::process::id()));
        let spec = WavSpec {
            channels: 2,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..3 {
            writer.write_sample(16_384_i16).unwrap();
            writer.write_sample(0_i16).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = WavSource::open(&path).unwrap();
        assert_eq!(source.sample_rate(), 8_000);

        let mut block = [1.0; 4];
        assert!(source.read_block(&mut block));
        assert_eq!(block, [0.25, 0.25, 0.25, 0.0]);
        assert!(!source.read_block(&mut block));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn descriptor_file_serves_known_tracks_only() {
        let file = DescriptorFile::parse(r#"{"abc": {"energy": 0.9, "danceability": 0.8}}"#).unwrap();
        let found = block_on(file.audio_descriptors("abc")).unwrap();
        assert_eq!(found.energy, 0.9);
        assert_eq!(found.valence, 0.0);
        assert!(block_on(file.audio_descriptors("zzz")).is_err());
    }
}
