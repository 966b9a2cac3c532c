//! Audio ingress and basic signal processing

use crate::error::{Result, TranscribeError};
use hound::WavReader;
use std::path::Path;

/// Mono PCM buffer owned by one analysis run
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBlock {
    /// Wrap samples that are already mono
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into_iter().map(clamp_sample).collect(),
            sample_rate,
            channels: 1,
        }
    }

    /// Downmix interleaved frames by averaging channels. This is the only downmix point.
    pub fn from_interleaved(interleaved: &[f32], channels: u16, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(TranscribeError::InvalidAudioFormat(
                "channel count must be at least 1".to_string(),
            ));
        }
        let n_ch = channels as usize;
        let samples = interleaved
            .chunks_exact(n_ch)
            .map(|frame| clamp_sample(frame.iter().sum::<f32>() / n_ch as f32))
            .collect();
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    /// Decode a WAV file (integer or float PCM, any channel count)
    pub fn load_wav<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TranscribeError::AudioFileError(format!(
                "Audio file does not exist: {}",
                path.display()
            )));
        }

        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();

        if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
            return Err(TranscribeError::InvalidAudioFormat(format!(
                "Unsupported bit depth: {}",
                spec.bits_per_sample
            )));
        }

        let mut interleaved: Vec<f32> = Vec::with_capacity(reader.len() as usize);
        match spec.sample_format {
            hound::SampleFormat::Int => {
                let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
                for sample in reader.samples::<i32>() {
                    interleaved.push(sample? as f32 / max_value);
                }
            }
            hound::SampleFormat::Float => {
                for sample in reader.samples::<f32>() {
                    interleaved.push(sample?);
                }
            }
        }

        log::debug!(
            "Loaded {}: {} Hz, {} channel(s), {} bit",
            path.display(),
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample
        );

        Self::from_interleaved(&interleaved, spec.channels, spec.sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count of the source before downmixing
    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_sec(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

fn clamp_sample(x: f32) -> f32 {
    if x.is_finite() {
        x.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Second-order IIR section (RBJ cookbook), evaluated in f64
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    pub fn lowpass(cutoff_hz: f32, sample_rate: u32) -> Self {
        let (cos_w, alpha) = Self::prewarp(cutoff_hz, sample_rate);
        let b1 = 1.0 - cos_w;
        Self::normalized(b1 / 2.0, b1, b1 / 2.0, cos_w, alpha)
    }

    pub fn highpass(cutoff_hz: f32, sample_rate: u32) -> Self {
        let (cos_w, alpha) = Self::prewarp(cutoff_hz, sample_rate);
        let b1 = -(1.0 + cos_w);
        Self::normalized(-b1 / 2.0, b1, -b1 / 2.0, cos_w, alpha)
    }

    fn prewarp(cutoff_hz: f32, sample_rate: u32) -> (f64, f64) {
        let nyquist = sample_rate as f64 / 2.0;
        let fc = (cutoff_hz as f64).clamp(1.0, nyquist * 0.99);
        let w0 = 2.0 * std::f64::consts::PI * fc / sample_rate as f64;
        // Q = 1/sqrt(2): Butterworth response
        let alpha = w0.sin() / (2.0 * std::f64::consts::FRAC_1_SQRT_2);
        (w0.cos(), alpha)
    }

    fn normalized(b0: f64, b1: f64, b2: f64, cos_w: f64, alpha: f64) -> Self {
        let a0 = 1.0 + alpha;
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Run the filter over a signal from zero state
    pub fn process(&self, samples: &[f32]) -> Vec<f32> {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        samples
            .iter()
            .map(|&x| {
                let x0 = x as f64;
                let y0 = self.b0 * x0 + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
                x2 = x1;
                x1 = x0;
                y2 = y1;
                y1 = y0;
                y0 as f32
            })
            .collect()
    }
}

/// Fourth-order band-pass: two high-pass then two low-pass sections.
/// A low edge at or below 20 Hz only low-passes.
pub fn bandpass(samples: &[f32], low_hz: f32, high_hz: f32, sample_rate: u32) -> Vec<f32> {
    let mut out = samples.to_vec();
    if low_hz > 20.0 {
        let hp = Biquad::highpass(low_hz, sample_rate);
        out = hp.process(&hp.process(&out));
    }
    let lp = Biquad::lowpass(high_hz, sample_rate);
    lp.process(&lp.process(&out))
}

/// Root mean square
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&x| x * x).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Peak absolute amplitude
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()))
}

/// Compute the p-th percentile of a dataset with linear interpolation
pub fn percentile(data: &[f32], p: f32) -> f32 {
    if data.is_empty() {
        return 0.0;
    }

    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let p = p.clamp(0.0, 100.0);
    let rank = (p / 100.0) * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let fraction = rank - lo as f32;
    sorted[lo] + fraction * (sorted[hi] - sorted[lo])
}

pub fn median(data: &[f32]) -> f32 {
    percentile(data, 50.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sr: u32, secs: f32) -> Vec<f32> {
        (0..(sr as f32 * secs) as usize)
            .map(|i| (2.0 * PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    #[test]
    fn test_downmix_averages_channels() {
        let interleaved = vec![1.0, 0.0, 0.5, 0.5, -1.0, -0.5];
        let block = AudioBlock::from_interleaved(&interleaved, 2, 44100).unwrap();
        assert_eq!(block.samples(), &[0.5, 0.5, -0.75]);
        assert_eq!(block.channels(), 2);
        assert!(AudioBlock::from_interleaved(&interleaved, 0, 44100).is_err());
    }

    #[test]
    fn test_from_mono_clamps() {
        let block = AudioBlock::from_mono(vec![2.0, -3.0, f32::NAN, 0.25], 22050);
        assert_eq!(block.samples(), &[1.0, -1.0, 0.0, 0.25]);
        assert!((block.duration_sec() - 4.0 / 22050.0).abs() < 1e-9);
    }

    #[test]
    fn test_lowpass_attenuates_high_tone() {
        let sr = 44100;
        let lp = Biquad::lowpass(200.0, sr);
        let low = lp.process(&sine(50.0, sr, 0.5));
        let high = lp.process(&sine(5000.0, sr, 0.5));
        assert!(rms(&low[4410..]) > 0.6);
        assert!(rms(&high[4410..]) < 0.01);
    }

    #[test]
    fn test_bandpass_passes_center() {
        let sr = 44100;
        let pass = bandpass(&sine(2000.0, sr, 0.5), 1000.0, 3000.0, sr);
        let stop = bandpass(&sine(100.0, sr, 0.5), 1000.0, 3000.0, sr);
        assert!(rms(&pass[4410..]) > 0.4);
        assert!(rms(&stop[4410..]) < 0.02);
    }

    #[test]
    fn test_percentile_and_median() {
        let data = vec![5.0, 1.0, 3.0, 2.0, 4.0];
        assert_eq!(percentile(&data, 0.0), 1.0);
        assert_eq!(percentile(&data, 100.0), 5.0);
        assert_eq!(median(&data), 3.0);
        assert!((percentile(&data, 25.0) - 2.0).abs() < 1e-6);
        assert_eq!(median(&[1.0, 2.0]), 1.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_rms_and_peak() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[1.0, -1.0]) - 1.0).abs() < 1e-6);
        assert_eq!(peak(&[0.2, -0.7, 0.5]), 0.7);
    }
}
