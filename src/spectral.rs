//! Spectral front-end: windowed magnitude frames over a mono buffer

use crate::error::{Result, TranscribeError};
use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use std::sync::Arc;

/// One analysis frame
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralFrame {
    pub index: usize,
    /// Frame start time in seconds, `index * hop / sr`
    pub time: f32,
    /// Linear magnitudes for bins `0..W/2`
    pub magnitudes: Vec<f32>,
    /// RMS of the unwindowed samples in the frame
    pub rms: f32,
    /// Peak absolute sample in the frame
    pub peak: f32,
}

/// Number of frames for `n` samples: `ceil((n - w) / h) + 1`, or 0 when `n < w`
pub fn frame_count(n_samples: usize, window_size: usize, hop_size: usize) -> usize {
    if n_samples < window_size || hop_size == 0 {
        return 0;
    }
    (n_samples - window_size).div_ceil(hop_size) + 1
}

/// Lazy, finite, non-restartable sequence of magnitude frames
pub struct SpectralFrames<'a> {
    samples: &'a [f32],
    sample_rate: u32,
    window_size: usize,
    hop_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex32>,
    next_index: usize,
    n_frames: usize,
}

impl<'a> SpectralFrames<'a> {
    pub fn new(
        samples: &'a [f32],
        sample_rate: u32,
        window_size: usize,
        hop_size: usize,
    ) -> Result<Self> {
        if window_size < 2 || !window_size.is_power_of_two() {
            return Err(TranscribeError::InvalidConfiguration(format!(
                "window size {} is not a power of two",
                window_size
            )));
        }
        if hop_size == 0 || hop_size > window_size {
            return Err(TranscribeError::InvalidConfiguration(format!(
                "hop size {} must be in 1..={}",
                hop_size, window_size
            )));
        }
        if samples.len() < window_size {
            return Err(TranscribeError::InsufficientAudio(format!(
                "{} samples is shorter than one {}-sample window",
                samples.len(),
                window_size
            )));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(window_size);

        Ok(Self {
            samples,
            sample_rate,
            window_size,
            hop_size,
            window: hann_window(window_size),
            fft,
            buffer: vec![Complex32::new(0.0, 0.0); window_size],
            next_index: 0,
            n_frames: frame_count(samples.len(), window_size, hop_size),
        })
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames per second
    pub fn frame_rate(&self) -> f32 {
        self.sample_rate as f32 / self.hop_size as f32
    }
}

impl Iterator for SpectralFrames<'_> {
    type Item = SpectralFrame;

    fn next(&mut self) -> Option<SpectralFrame> {
        if self.next_index >= self.n_frames {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;

        let start = index * self.hop_size;
        let end = (start + self.window_size).min(self.samples.len());
        let chunk = &self.samples[start..end];

        // Final frame is zero-padded
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let x = chunk.get(i).copied().unwrap_or(0.0);
            *slot = Complex32::new(x * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        let magnitudes = self.buffer[..self.window_size / 2]
            .iter()
            .map(|c| c.norm())
            .collect();

        Some(SpectralFrame {
            index,
            time: start as f32 / self.sample_rate as f32,
            magnitudes,
            rms: crate::audio::rms(chunk),
            peak: crate::audio::peak(chunk),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.n_frames - self.next_index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SpectralFrames<'_> {}

/// Symmetric Hann window
pub fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos()))
        .collect()
}

/// Frequency of bin `k`
pub fn bin_frequency(k: usize, sample_rate: u32, window_size: usize) -> f32 {
    k as f32 * sample_rate as f32 / window_size as f32
}

/// Bin index range covering `[low_hz, high_hz]`, clipped to `1..n_bins`
pub fn bin_range(
    low_hz: f32,
    high_hz: f32,
    sample_rate: u32,
    window_size: usize,
) -> std::ops::Range<usize> {
    let n_bins = window_size / 2;
    let hz_per_bin = sample_rate as f32 / window_size as f32;
    let lo = ((low_hz / hz_per_bin).ceil() as usize).max(1);
    let hi = ((high_hz / hz_per_bin).floor() as usize + 1).min(n_bins);
    lo..hi.max(lo)
}

/// Positive spectral difference summed over all bins
pub fn spectral_flux(prev: &[f32], cur: &[f32]) -> f32 {
    prev.iter()
        .zip(cur)
        .map(|(&p, &c)| (c - p).max(0.0))
        .sum()
}

/// Positive spectral difference summed over a bin range
pub fn band_flux(prev: &[f32], cur: &[f32], bins: std::ops::Range<usize>) -> f32 {
    let end = bins.end.min(prev.len()).min(cur.len());
    let start = bins.start.min(end);
    spectral_flux(&prev[start..end], &cur[start..end])
}

/// Magnitude spectrum of a short segment: Hann window, zero-padded to the next power of two
pub fn magnitude_spectrum(segment: &[f32]) -> (Vec<f32>, usize) {
    let n_fft = segment.len().max(2).next_power_of_two();
    let window = hann_window(segment.len());
    let mut buffer: Vec<Complex32> = (0..n_fft)
        .map(|i| {
            let x = if i < segment.len() { segment[i] * window[i] } else { 0.0 };
            Complex32::new(x, 0.0)
        })
        .collect();

    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(n_fft).process(&mut buffer);

    let mags = buffer[..n_fft / 2].iter().map(|c| c.norm()).collect();
    (mags, n_fft)
}
