use std::{collections::VecDeque, f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{
    audio::{AudioFrame, Bands, SILENCE_LUFS},
    Result, VisualsError,
};

const ONSET_RATIO: f32 = 1.5;
const ONSET_FLOOR: f32 = 1e-3;
const MIN_BEAT_INTERVAL: f32 = 0.2;
const MAX_BEAT_HISTORY: usize = 32;
const FLUX_HISTORY: usize = 43;
const LOUDNESS_WINDOW_SECONDS: f32 = 3.0;
const NOVELTY_DECAY: f32 = 0.995;
const MIN_TEMPO: f32 = 60.0;
const MAX_TEMPO: f32 = 200.0;

/// Upper edges (Hz) of bass, low-mid, mid and high-mid; highs run to Nyquist.
const BAND_EDGES: [f32; 4] = [250.0, 500.0, 2_000.0, 4_000.0];
const CHROMA_MIN_HZ: f32 = 27.5;
const CHROMA_MAX_HZ: f32 = 5_000.0;

/// Turns blocks of mono samples into [`AudioFrame`]s.
///
/// Everything is synchronous so the extractor can sit behind an audio
/// callback, a file decoder or a test. The only contract downstream code
/// relies on is the frame it returns.
pub struct FeatureExtractor {
    sample_rate: u32,
    processed_samples: usize,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
    previous_magnitudes: Vec<f32>,
    flux_history: VecDeque<f32>,
    flux_peak: f32,
    beat_timestamps: Vec<f32>,
    tempo: f32,
    beat_confidence: f32,
    loudness: VecDeque<(f32, f32)>,
}

impl FeatureExtractor {
    /// Creates a new extractor using the default 48 kHz sample rate.
    pub fn new() -> Self {
        Self::with_sample_rate(48_000)
    }

    pub fn with_sample_rate(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            processed_samples: 0,
            fft_planner: RealFftPlanner::new(),
            fft: None,
            previous_magnitudes: Vec::new(),
            flux_history: VecDeque::with_capacity(FLUX_HISTORY),
            flux_peak: 0.0,
            beat_timestamps: Vec::new(),
            tempo: 0.0,
            beat_confidence: 0.0,
            loudness: VecDeque::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Current tempo estimate, `0.0` until two onsets have been seen.
    pub fn tempo(&self) -> f32 {
        self.tempo
    }

    /// Clears the accumulated state while preserving configuration.
    pub fn reset(&mut self) {
        self.processed_samples = 0;
        self.previous_magnitudes.clear();
        self.flux_history.clear();
        self.flux_peak = 0.0;
        self.beat_timestamps.clear();
        self.tempo = 0.0;
        self.beat_confidence = 0.0;
        self.loudness.clear();
    }

    /// Consumes one block of samples and produces the frame describing it.
    pub fn process_block(&mut self, samples: &[f32]) -> Result<AudioFrame> {
        if samples.len() < 2 {
            return Err(VisualsError::InvalidInput(
                "analysis requires blocks with at least two samples",
            ));
        }

        let block_size = samples.len();
        let sample_rate = self.sample_rate as f32;
        let start_time = self.processed_samples as f32 / sample_rate;
        let end_time = (self.processed_samples + block_size) as f32 / sample_rate;
        let timestamp = start_time + (end_time - start_time) * 0.5;
        self.processed_samples += block_size;

        let mean_square = samples.iter().map(|s| s * s).sum::<f32>() / block_size as f32;
        let rms = mean_square.sqrt();
        let lufs_short = self.update_loudness(end_time, mean_square);

        let magnitudes = self.magnitudes(samples)?;
        let bin_hz = sample_rate / block_size as f32;
        let spectral_centroid = normalised_centroid(&magnitudes, bin_hz, sample_rate * 0.5);
        let bands = band_energies(&magnitudes, bin_hz);
        let chroma = chroma(&magnitudes, bin_hz);

        let flux = self.spectral_flux(&magnitudes);
        let onset = self.detect_onset(timestamp, flux);
        let novelty = self.novelty(flux);
        let beat_phase = self.beat_phase(timestamp);

        Ok(AudioFrame {
            time: timestamp,
            rms,
            spectral_centroid,
            flux,
            onset,
            tempo: self.tempo,
            beat_confidence: self.beat_confidence,
            beat_phase,
            bands,
            chroma,
            lufs_short,
            novelty,
        })
    }

    fn magnitudes(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let len = samples.len();
        let fft = self.prepare_fft(len);

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        Ok(fft.spectrum.iter().map(|bin| bin.norm()).collect())
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let planner = &mut self.fft_planner;
        let fft = self.fft.get_or_insert_with(|| FftResources::new(planner, size));
        if fft.size != size {
            *fft = FftResources::new(planner, size);
        }
        fft
    }

    /// Sum of positive magnitude changes, normalised by bin count.
    fn spectral_flux(&mut self, magnitudes: &[f32]) -> f32 {
        let flux = if self.previous_magnitudes.len() == magnitudes.len() {
            magnitudes
                .iter()
                .zip(&self.previous_magnitudes)
                .map(|(now, before)| (now - before).max(0.0))
                .sum::<f32>()
                / magnitudes.len() as f32
        } else {
            0.0
        };
        self.previous_magnitudes.clear();
        self.previous_magnitudes.extend_from_slice(magnitudes);
        flux
    }

    fn detect_onset(&mut self, timestamp: f32, flux: f32) -> bool {
        let mean = if self.flux_history.is_empty() {
            0.0
        } else {
            self.flux_history.iter().sum::<f32>() / self.flux_history.len() as f32
        };
        if self.flux_history.len() == FLUX_HISTORY {
            self.flux_history.pop_front();
        }
        self.flux_history.push_back(flux);

        let spaced = self
            .beat_timestamps
            .last()
            .map(|last| timestamp - last >= MIN_BEAT_INTERVAL)
            .unwrap_or(true);
        let onset = flux > ONSET_FLOOR && flux > mean * ONSET_RATIO && spaced;

        if onset {
            self.beat_timestamps.push(timestamp);
            if self.beat_timestamps.len() > MAX_BEAT_HISTORY {
                let overflow = self.beat_timestamps.len() - MAX_BEAT_HISTORY;
                self.beat_timestamps.drain(0..overflow);
            }
            self.update_tempo_estimate();
        }
        onset
    }

    fn update_tempo_estimate(&mut self) {
        let intervals: Vec<f32> = self
            .beat_timestamps
            .windows(2)
            .map(|window| window[1] - window[0])
            .filter(|interval| *interval > f32::EPSILON)
            .collect();
        if intervals.is_empty() {
            return;
        }

        let mean = intervals.iter().sum::<f32>() / intervals.len() as f32;
        let variance = intervals
            .iter()
            .map(|interval| (interval - mean).powi(2))
            .sum::<f32>()
            / intervals.len() as f32;

        let mut bpm = 60.0 / mean;
        while bpm < MIN_TEMPO {
            bpm *= 2.0;
        }
        while bpm > MAX_TEMPO {
            bpm *= 0.5;
        }
        self.tempo = bpm;
        self.beat_confidence = (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0);
    }

    fn beat_phase(&self, timestamp: f32) -> f32 {
        match self.beat_timestamps.last() {
            Some(last) if self.tempo > 0.0 => {
                let beat_length = 60.0 / self.tempo;
                ((timestamp - last) / beat_length).rem_euclid(1.0)
            }
            _ => 0.0,
        }
    }

    fn novelty(&mut self, flux: f32) -> f32 {
        self.flux_peak = (self.flux_peak * NOVELTY_DECAY).max(flux);
        if self.flux_peak <= f32::EPSILON {
            0.0
        } else {
            (flux / self.flux_peak).clamp(0.0, 1.0)
        }
    }

    /// Unweighted short-term loudness over the trailing window.
    fn update_loudness(&mut self, end_time: f32, mean_square: f32) -> f32 {
        self.loudness.push_back((end_time, mean_square));
        while let Some((time, _)) = self.loudness.front() {
            if end_time - time > LOUDNESS_WINDOW_SECONDS {
                self.loudness.pop_front();
            } else {
                break;
            }
        }

        let mean = self.loudness.iter().map(|(_, power)| power).sum::<f32>()
            / self.loudness.len() as f32;
        if mean <= f32::EPSILON {
            SILENCE_LUFS
        } else {
            (-0.691 + 10.0 * mean.log10()).max(SILENCE_LUFS)
        }
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn new(planner: &mut RealFftPlanner<f32>, size: usize) -> Self {
        let plan = planner.plan_fft_forward(size);
        Self {
            size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        }
    }
}

impl fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("sample_rate", &self.sample_rate)
            .field("processed_samples", &self.processed_samples)
            .field("tempo", &self.tempo)
            .field("beat_timestamps", &self.beat_timestamps.len())
            .field("fft_size", &self.fft.as_ref().map(|fft| fft.size))
            .finish()
    }
}

fn normalised_centroid(magnitudes: &[f32], bin_hz: f32, nyquist: f32) -> f32 {
    let (weighted, total) = magnitudes
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(weighted, total), (i, magnitude)| {
            (weighted + magnitude * i as f32 * bin_hz, total + magnitude)
        });
    if total <= f32::EPSILON || nyquist <= 0.0 {
        0.0
    } else {
        (weighted / total / nyquist).clamp(0.0, 1.0)
    }
}

fn band_energies(magnitudes: &[f32], bin_hz: f32) -> Bands {
    let mut sums = [0.0_f32; 5];
    // Skip DC.
    for (i, magnitude) in magnitudes.iter().enumerate().skip(1) {
        let hz = i as f32 * bin_hz;
        let band = BAND_EDGES
            .iter()
            .position(|edge| hz < *edge)
            .unwrap_or(BAND_EDGES.len());
        sums[band] += magnitude;
    }

    let total: f32 = sums.iter().sum();
    if total <= f32::EPSILON {
        return Bands::default();
    }
    Bands {
        bass: sums[0] / total,
        low_mid: sums[1] / total,
        mid: sums[2] / total,
        high_mid: sums[3] / total,
        highs: sums[4] / total,
    }
}

/// Pitch-class profile normalised so the strongest class is 1.0.
fn chroma(magnitudes: &[f32], bin_hz: f32) -> [f32; 12] {
    let mut classes = [0.0_f32; 12];
    for (i, magnitude) in magnitudes.iter().enumerate().skip(1) {
        let hz = i as f32 * bin_hz;
        if !(CHROMA_MIN_HZ..=CHROMA_MAX_HZ).contains(&hz) {
            continue;
        }
        let midi = 69.0 + 12.0 * (hz / 440.0).log2();
        let class = (midi.round() as i32).rem_euclid(12) as usize;
        classes[class] += magnitude;
    }

    let peak = classes.iter().copied().fold(0.0_f32, f32::max);
    if peak > f32::EPSILON {
        for value in &mut classes {
            *value /= peak;
        }
    }
    classes
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
