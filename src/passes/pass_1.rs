//! Pass 1: Chromagram
//!
//! Folds each spectral frame into 12 pitch classes and max-normalizes it.

use crate::audio::AudioBlock;
use crate::config::{ChromaConfig, Config};
use crate::error::Result;
use crate::spectral::{bin_frequency, SpectralFrame, SpectralFrames};
use ndarray::Array2;

/// Pitch-class energy per frame, stored `[pitch_class, frame]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chromagram {
    data: Array2<f32>,
    hop_seconds: f32,
}

impl Chromagram {
    pub fn from_columns(columns: &[[f32; 12]], hop_seconds: f32) -> Self {
        let mut data = Array2::<f32>::zeros((12, columns.len()));
        for (f, column) in columns.iter().enumerate() {
            for (p, &v) in column.iter().enumerate() {
                data[[p, f]] = v;
            }
        }
        Self { data, hop_seconds }
    }

    pub fn n_frames(&self) -> usize {
        self.data.ncols()
    }

    pub fn hop_seconds(&self) -> f32 {
        self.hop_seconds
    }

    pub fn frame_time(&self, f: usize) -> f32 {
        f as f32 * self.hop_seconds
    }

    pub fn frame(&self, f: usize) -> [f32; 12] {
        let mut out = [0.0; 12];
        for (p, v) in out.iter_mut().enumerate() {
            *v = self.data[[p, f]];
        }
        out
    }

    pub fn is_silent(&self, f: usize) -> bool {
        self.data.column(f).iter().all(|&v| v == 0.0)
    }

    pub fn frames(&self) -> impl Iterator<Item = [f32; 12]> + '_ {
        (0..self.n_frames()).map(move |f| self.frame(f))
    }
}

/// Pitch class of a frequency, `round(12 log2(f/440) + 69) mod 12`
pub fn pitch_class_of(freq_hz: f32) -> usize {
    let midi = 12.0 * (freq_hz / 440.0).log2() + 69.0;
    (midi.round() as i64).rem_euclid(12) as usize
}

/// Bin to pitch-class lookup for bins inside the analysis band
fn pitch_class_map(sample_rate: u32, window_size: usize, cfg: &ChromaConfig) -> Vec<Option<usize>> {
    (0..window_size / 2)
        .map(|k| {
            let f = bin_frequency(k, sample_rate, window_size);
            if k == 0 || f < cfg.min_freq_hz || f > cfg.max_freq_hz {
                None
            } else {
                Some(pitch_class_of(f))
            }
        })
        .collect()
}

fn fold(magnitudes: &[f32], rms: f32, map: &[Option<usize>], cfg: &ChromaConfig) -> [f32; 12] {
    let mut chroma = [0.0f32; 12];
    if rms < cfg.silence_rms {
        return chroma;
    }
    for (mag, pc) in magnitudes.iter().zip(map) {
        if let Some(p) = pc {
            chroma[*p] += mag;
        }
    }
    normalize_max(&mut chroma);
    chroma
}

/// Divide by the maximum; all-zero (or non-finite) vectors become zero
pub fn normalize_max(chroma: &mut [f32; 12]) {
    let max = chroma.iter().fold(0.0f32, |a, &b| a.max(b));
    if max > 0.0 && max.is_finite() {
        for v in chroma.iter_mut() {
            *v /= max;
        }
    } else {
        *chroma = [0.0; 12];
    }
}

/// Chroma vector of a single frame
pub fn chroma_vector(
    frame: &SpectralFrame,
    sample_rate: u32,
    window_size: usize,
    cfg: &ChromaConfig,
) -> [f32; 12] {
    let map = pitch_class_map(sample_rate, window_size, cfg);
    fold(&frame.magnitudes, frame.rms, &map, cfg)
}

/// Accumulates chroma columns while frames are pulled through the pipeline
pub struct ChromagramBuilder {
    map: Vec<Option<usize>>,
    cfg: ChromaConfig,
    hop_seconds: f32,
    columns: Vec<[f32; 12]>,
}

impl ChromagramBuilder {
    pub fn new(sample_rate: u32, window_size: usize, hop_size: usize, cfg: &ChromaConfig) -> Self {
        Self {
            map: pitch_class_map(sample_rate, window_size, cfg),
            cfg: cfg.clone(),
            hop_seconds: hop_size as f32 / sample_rate as f32,
            columns: Vec::new(),
        }
    }

    pub fn push(&mut self, frame: &SpectralFrame) {
        let column = fold(&frame.magnitudes, frame.rms, &self.map, &self.cfg);
        self.columns.push(column);
    }

    pub fn finish(self) -> Chromagram {
        let columns = smooth(&self.columns, self.cfg.smoothing_frames);
        Chromagram::from_columns(&columns, self.hop_seconds)
    }
}

/// Centered moving average; silent frames stay silent
fn smooth(columns: &[[f32; 12]], length: usize) -> Vec<[f32; 12]> {
    if length <= 1 {
        return columns.to_vec();
    }
    let half = length / 2;
    (0..columns.len())
        .map(|f| {
            let source = &columns[f];
            if source.iter().all(|&v| v == 0.0) {
                return *source;
            }
            let lo = f.saturating_sub(half);
            let hi = (f + half + 1).min(columns.len());
            let mut acc = [0.0f32; 12];
            for column in &columns[lo..hi] {
                for (a, v) in acc.iter_mut().zip(column) {
                    *a += v;
                }
            }
            normalize_max(&mut acc);
            acc
        })
        .collect()
}

/// Build the chromagram of a whole block
pub fn run(block: &AudioBlock, config: &Config) -> Result<Chromagram> {
    log::info!("Pass 1: Chromagram");
    let window_size = config.stft.window_size;
    let hop_size = config.stft.hop_size();
    let frames = SpectralFrames::new(block.samples(), block.sample_rate(), window_size, hop_size)?;

    let mut builder = ChromagramBuilder::new(block.sample_rate(), window_size, hop_size, &config.chroma);
    for frame in frames {
        builder.push(&frame);
    }
    let chromagram = builder.finish();
    log::debug!("  {} chroma frames", chromagram.n_frames());
    Ok(chromagram)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pitch_class_of_reference_tones() {
        assert_eq!(pitch_class_of(440.0), 9);
        assert_eq!(pitch_class_of(261.63), 0);
        assert_eq!(pitch_class_of(369.99), 6);
        assert_eq!(pitch_class_of(65.41), 0);
    }

    #[test]
    fn test_normalize_max() {
        let mut v = [0.0; 12];
        v[3] = 2.0;
        v[7] = 1.0;
        normalize_max(&mut v);
        assert_eq!(v[3], 1.0);
        assert_eq!(v[7], 0.5);

        let mut z = [0.0; 12];
        normalize_max(&mut z);
        assert!(z.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_smoothing_keeps_silent_frames() {
        let mut loud = [0.0; 12];
        loud[0] = 1.0;
        let columns = vec![loud, [0.0; 12], loud];
        let smoothed = smooth(&columns, 3);
        assert!(smoothed[1].iter().all(|&v| v == 0.0));
        assert_eq!(smoothed[0][0], 1.0);
    }
}
