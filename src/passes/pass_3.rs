//! Pass 3: Tempo, beat and downbeat estimation
//!
//! The onset envelope is spectral flux over the whole spectrum, with a
//! separate kick-band (20-120 Hz) flux used to choose the bar phase.
//! Tempo comes from the envelope autocorrelation, beats from dynamic
//! programming, and swing from where off-beat hits land inside the beat.

use crate::analysis::{
    AnalysisWarning, DownbeatAnchor, DrumType, Hit, Tempo, TempoCorrection,
};
use crate::audio::median;
use crate::config::{Config, TempoConfig};
use crate::passes::pass_5::Grid;
use crate::spectral::{band_flux, bin_range, spectral_flux, SpectralFrame};

const KICK_BAND_HZ: (f32, f32) = (20.0, 120.0);
/// Candidates within this fraction of the best weighted peak prefer the shorter lag
const PEAK_RATIO: f32 = 0.8;
/// Off-beat window (fraction of a beat) used for swing measurement
const SWING_WINDOW: (f32, f32) = (0.40, 0.72);

/// Smoothed onset envelopes at the spectral frame rate
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OnsetEnvelope {
    pub full: Vec<f32>,
    pub kick: Vec<f32>,
    pub sample_rate: u32,
    pub window_size: usize,
    pub hop_size: usize,
}

impl OnsetEnvelope {
    pub fn len(&self) -> usize {
        self.full.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full.is_empty()
    }

    pub fn frame_rate(&self) -> f32 {
        self.sample_rate as f32 / self.hop_size as f32
    }

    /// Time an impulse onset registered at envelope frame `f`.
    ///
    /// Flux at frame `f` measures the window rising over `[u, u + H]` samples
    /// before the impulse; the Hann rise is centred `3W/4` into the window.
    pub fn frame_time(&self, f: f32) -> f32 {
        let offset = 0.75 * self.window_size as f32 - 0.5 * self.hop_size as f32;
        (f * self.hop_size as f32 + offset) / self.sample_rate as f32
    }
}

/// Builds onset envelopes incrementally from spectral frames
pub struct OnsetEnvelopeBuilder {
    kick_bins: std::ops::Range<usize>,
    previous: Option<Vec<f32>>,
    full: Vec<f32>,
    kick: Vec<f32>,
    sample_rate: u32,
    window_size: usize,
    hop_size: usize,
}

impl OnsetEnvelopeBuilder {
    pub fn new(sample_rate: u32, window_size: usize, hop_size: usize) -> Self {
        Self {
            kick_bins: bin_range(KICK_BAND_HZ.0, KICK_BAND_HZ.1, sample_rate, window_size),
            previous: None,
            full: Vec::new(),
            kick: Vec::new(),
            sample_rate,
            window_size,
            hop_size,
        }
    }

    pub fn push(&mut self, frame: &SpectralFrame) {
        let (full, kick) = match &self.previous {
            Some(prev) => (
                spectral_flux(prev, &frame.magnitudes),
                band_flux(prev, &frame.magnitudes, self.kick_bins.clone()),
            ),
            None => (0.0, 0.0),
        };
        self.full.push(full);
        self.kick.push(kick);
        self.previous = Some(frame.magnitudes.clone());
    }

    pub fn finish(self) -> OnsetEnvelope {
        OnsetEnvelope {
            full: moving_average3(&self.full),
            kick: moving_average3(&self.kick),
            sample_rate: self.sample_rate,
            window_size: self.window_size,
            hop_size: self.hop_size,
        }
    }
}

/// Centered 3-frame moving average, shrinking at the edges
pub fn moving_average3(signal: &[f32]) -> Vec<f32> {
    (0..signal.len())
        .map(|i| {
            let lo = i.saturating_sub(1);
            let hi = (i + 2).min(signal.len());
            signal[lo..hi].iter().sum::<f32>() / (hi - lo) as f32
        })
        .collect()
}

/// Mean-removed, unbiased, variance-normalized autocorrelation for lags `0..=max_lag`.
/// Empty when the signal has no variance.
pub fn autocorrelation(signal: &[f32], max_lag: usize) -> Vec<f32> {
    let n = signal.len();
    if n < 2 {
        return Vec::new();
    }
    let mean = signal.iter().sum::<f32>() / n as f32;
    let centered: Vec<f32> = signal.iter().map(|&x| x - mean).collect();
    let var = centered.iter().map(|&x| x * x).sum::<f32>() / n as f32;
    if !(var > 0.0 && var.is_finite()) {
        return Vec::new();
    }

    (0..=max_lag.min(n - 1))
        .map(|lag| {
            let sum: f32 = centered[..n - lag]
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum();
            sum / (n - lag) as f32 / var
        })
        .collect()
}

fn interpolate(r: &[f32], x: f32) -> Option<f32> {
    if x < 0.0 {
        return None;
    }
    let i = x.floor() as usize;
    if i + 1 >= r.len() {
        return None;
    }
    let frac = x - i as f32;
    Some(r[i] * (1.0 - frac) + r[i + 1] * frac)
}

/// Raw tempo estimate before normalization
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoEstimate {
    pub bpm_raw: f32,
    pub confidence: f32,
    /// Refined beat period in envelope frames
    pub period_frames: f32,
}

/// Autocorrelation tempo estimate over `[min_bpm, max_bpm]`
pub fn estimate_tempo(envelope: &[f32], frame_rate: f32, cfg: &TempoConfig) -> Option<TempoEstimate> {
    let n = envelope.len();
    if n < 4 || frame_rate <= 0.0 {
        return None;
    }

    let lag_min = ((60.0 * frame_rate / cfg.max_bpm).floor() as usize).max(1);
    let lag_max = ((60.0 * frame_rate / cfg.min_bpm).ceil() as usize).min(n - 2);
    if lag_min >= lag_max {
        return None;
    }

    let r = autocorrelation(envelope, (lag_max + 1).max(n / 2));
    if r.len() <= lag_max + 1 {
        return None;
    }

    // (lag, interpolated height, weight)
    let mut peaks: Vec<(f32, f32, f32)> = Vec::new();
    for lag in lag_min.max(1)..=lag_max {
        let (a, b, c) = (r[lag - 1], r[lag], r[lag + 1]);
        if !(b > a && b >= c && b > 0.0) {
            continue;
        }
        let denom = a - 2.0 * b + c;
        let delta = if denom < 0.0 {
            (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        let height = b - 0.25 * (a - c) * delta;
        let position = lag as f32 + delta;
        let weight = height * (1.0 - position / n as f32);
        peaks.push((position, height, weight));
    }

    let best_weight = peaks.iter().map(|p| p.2).fold(f32::MIN, f32::max);
    let &(position, height, _) = peaks
        .iter()
        .find(|p| p.2 >= PEAK_RATIO * best_weight)?;

    let period = refine_period(&r, position, n);
    let bpm_raw = 60.0 * frame_rate / period;
    log::debug!(
        "  autocorrelation peak at lag {:.2} (refined {:.3}), height {:.3}",
        position,
        period,
        height
    );

    Some(TempoEstimate {
        bpm_raw,
        confidence: height.clamp(0.0, 1.0),
        period_frames: period,
    })
}

/// Comb search over lag multiples within one frame of `lag`
fn refine_period(r: &[f32], lag: f32, n: usize) -> f32 {
    let harmonics = (((n / 2) as f32 / (lag.floor() + 1.0)).floor() as usize).max(1);
    let mut best = (lag, f32::MIN);
    for step in 0..=200 {
        let p = lag - 1.0 + step as f32 * 0.01;
        if p <= 0.0 {
            continue;
        }
        let score: f32 = (1..=harmonics)
            .filter_map(|m| interpolate(r, m as f32 * p))
            .sum();
        if score > best.1 {
            best = (p, score);
        }
    }
    best.0
}

/// Fold a raw tempo into the normalized range
pub fn normalize_tempo(bpm_raw: f32, confidence: f32, cfg: &TempoConfig) -> Tempo {
    let (bpm, correction) = if bpm_raw < cfg.double_below_bpm {
        (bpm_raw * 2.0, TempoCorrection::Doubled)
    } else if bpm_raw > cfg.halve_above_bpm {
        (bpm_raw / 2.0, TempoCorrection::Halved)
    } else {
        (bpm_raw, TempoCorrection::None)
    };
    let corrected = correction != TempoCorrection::None;

    Tempo {
        bpm: Some((bpm * 10.0).round() / 10.0),
        confidence,
        was_auto_corrected: corrected,
        original_bpm: corrected.then_some(bpm_raw),
        correction,
    }
}

/// Beat frames maximizing envelope strength minus a squared tempo-deviation penalty
pub fn track_beats(envelope: &[f32], frame_rate: f32, bpm: f32, tightness: f32) -> Vec<usize> {
    let n = envelope.len();
    let max = envelope.iter().fold(0.0f32, |a, &b| a.max(b));
    if n == 0 || max <= 0.0 || bpm <= 0.0 {
        return Vec::new();
    }

    let beat_sec = 60.0 / bpm;
    let period = beat_sec * frame_rate;
    let min_gap = (period / 2.0).round().max(1.0) as usize;
    let max_gap = (period * 2.0).round().max(min_gap as f32) as usize;

    let mut score = vec![0.0f32; n];
    let mut back: Vec<Option<usize>> = vec![None; n];

    for t in 0..n {
        let local = envelope[t] / max;
        let mut best: Option<(usize, f32)> = None;
        if t >= min_gap {
            let lo = t.saturating_sub(max_gap);
            for prev in lo..=t - min_gap {
                let dev = (t - prev) as f32 / frame_rate - beat_sec;
                let s = score[prev] - tightness * dev * dev;
                if best.map_or(true, |(_, b)| s > b) {
                    best = Some((prev, s));
                }
            }
        }
        match best {
            Some((prev, s)) if s > 0.0 => {
                score[t] = local + s;
                back[t] = Some(prev);
            }
            _ => score[t] = local,
        }
    }

    let tail_start = n.saturating_sub(period.round().max(1.0) as usize);
    let mut end = tail_start;
    for t in tail_start..n {
        if score[t] > score[end] {
            end = t;
        }
    }

    let mut beats = vec![end];
    let mut cursor = end;
    while let Some(prev) = back[cursor] {
        beats.push(prev);
        cursor = prev;
    }
    beats.reverse();
    beats
}

/// Bar phase (index of the first downbeat among `beats`) with the most kick-band energy.
/// Ties go to the lowest phase.
pub fn infer_downbeat_phase(beats: &[usize], kick: &[f32], beats_per_bar: u32) -> usize {
    let bpb = beats_per_bar.max(1) as usize;
    let strength = |b: usize| -> f32 {
        let lo = b.saturating_sub(1);
        let hi = (b + 2).min(kick.len());
        kick.get(lo..hi)
            .map(|w| w.iter().fold(0.0f32, |a, &x| a.max(x)))
            .unwrap_or(0.0)
    };

    let mut best = (0usize, f32::MIN);
    for phase in 0..bpb.min(beats.len().max(1)) {
        let score: f32 = beats
            .iter()
            .skip(phase)
            .step_by(bpb)
            .map(|&b| strength(b))
            .sum();
        if score > best.1 {
            best = (phase, score);
        }
    }
    best.0
}

/// Anchor the bar on the first detected kick, or at zero when there is none
pub fn align_to_first_kick(hits: &[Hit], beats_per_bar: u32) -> DownbeatAnchor {
    let first = hits
        .iter()
        .filter(|h| h.drum_type == DrumType::Kick)
        .map(|h| h.time_seconds)
        .fold(f32::INFINITY, f32::min);
    let time = if first.is_finite() { first.max(0.0) } else { 0.0 };
    DownbeatAnchor::new(time, beats_per_bar)
}

/// Shift the downbeat by the median offset of kicks lying within a quarter beat of a beat line
pub fn refine_downbeat(grid: &Grid, hits: &[Hit]) -> f32 {
    let beat = grid.beat_duration();
    let offsets: Vec<f32> = hits
        .iter()
        .filter(|h| h.drum_type == DrumType::Kick)
        .filter_map(|h| {
            let pos = grid.position(h.time_seconds);
            let offset = (pos - pos.round()) * beat;
            (offset.abs() <= beat / 4.0).then_some(offset)
        })
        .collect();
    if offsets.is_empty() {
        return grid.downbeat_time;
    }

    let mut downbeat = grid.downbeat_time + median(&offsets);
    // Keep the anchor non-negative by moving whole beats
    while downbeat < 0.0 {
        downbeat += beat;
    }
    downbeat
}

/// Median off-beat position of hits, as a swing percentage (50 = straight)
pub fn measure_swing(hits: &[Hit], grid: &Grid) -> f32 {
    let samples: Vec<f32> = hits
        .iter()
        .filter_map(|h| {
            let pos = grid.position(h.time_seconds);
            let frac = pos - pos.floor();
            (SWING_WINDOW.0..=SWING_WINDOW.1)
                .contains(&frac)
                .then_some(100.0 * frac)
        })
        .collect();
    if samples.is_empty() {
        50.0
    } else {
        median(&samples)
    }
}

/// Output of the tempo pass
#[derive(Debug, Clone, PartialEq)]
pub struct TempoAnalysis {
    pub tempo: Tempo,
    /// BPM used for the grid: the normalized tempo or the fallback
    pub grid_bpm: f32,
    pub beat_times: Vec<f32>,
    pub downbeat: DownbeatAnchor,
    pub warning: Option<AnalysisWarning>,
}

pub fn run(envelope: &OnsetEnvelope, config: &Config) -> TempoAnalysis {
    log::info!("Pass 3: Tempo & downbeat");
    let cfg = &config.tempo;
    let beats_per_bar = config.grid.beats_per_bar;
    let frame_rate = envelope.frame_rate();

    let estimate = estimate_tempo(&envelope.full, frame_rate, cfg)
        .filter(|e| e.confidence >= cfg.min_confidence);

    let Some(estimate) = estimate else {
        let warning = AnalysisWarning::TempoUncertain { confidence: 0.0 };
        log::warn!("{}", warning);
        return TempoAnalysis {
            tempo: Tempo::uncertain(),
            grid_bpm: cfg.fallback_bpm,
            beat_times: Vec::new(),
            downbeat: DownbeatAnchor::new(0.0, beats_per_bar),
            warning: Some(warning),
        };
    };

    let tempo = normalize_tempo(estimate.bpm_raw, estimate.confidence, cfg);
    let grid_bpm = tempo.bpm.unwrap_or(cfg.fallback_bpm);
    log::info!(
        "  Tempo {:.1} BPM (raw {:.2}, {:?}), confidence {:.2}",
        grid_bpm,
        estimate.bpm_raw,
        tempo.correction,
        tempo.confidence
    );

    let beats = track_beats(&envelope.full, frame_rate, grid_bpm, cfg.beat_tightness);
    let beat_times: Vec<f32> = beats
        .iter()
        .map(|&b| envelope.frame_time(b as f32).max(0.0))
        .collect();

    let downbeat = if beats.is_empty() {
        DownbeatAnchor::new(0.0, beats_per_bar)
    } else {
        let phase = infer_downbeat_phase(&beats, &envelope.kick, beats_per_bar);
        DownbeatAnchor::new(beat_times[phase.min(beat_times.len() - 1)], beats_per_bar)
    };
    log::info!(
        "  {} beats, downbeat at {:.3}s",
        beat_times.len(),
        downbeat.time_seconds
    );

    TempoAnalysis {
        tempo,
        grid_bpm,
        beat_times,
        downbeat,
        warning: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse_train(n: usize, period: f32) -> Vec<f32> {
        let mut env = vec![0.0; n];
        let mut t = 0.0f32;
        while (t as usize) < n {
            let i = t.round() as usize;
            for (k, w) in [0.25f32, 1.0, 0.25].iter().enumerate() {
                if let Some(slot) = (i + k).checked_sub(1).and_then(|j| env.get_mut(j)) {
                    *slot += w;
                }
            }
            t += period;
        }
        env
    }

    #[test]
    fn test_normalize_tempo_rules() {
        let cfg = TempoConfig::default();
        let t = normalize_tempo(86.0, 0.9, &cfg);
        assert_eq!(t.bpm, Some(172.0));
        assert_eq!(t.correction, TempoCorrection::Doubled);
        assert_eq!(t.original_bpm, Some(86.0));
        assert!(t.was_auto_corrected);

        let t = normalize_tempo(200.0, 0.9, &cfg);
        assert_eq!(t.bpm, Some(100.0));
        assert_eq!(t.correction, TempoCorrection::Halved);

        let t = normalize_tempo(128.04, 0.9, &cfg);
        assert_eq!(t.bpm, Some(128.0));
        assert_eq!(t.correction, TempoCorrection::None);
        assert_eq!(t.original_bpm, None);
    }

    #[test]
    fn test_boundaries_are_unchanged() {
        let cfg = TempoConfig::default();
        assert_eq!(normalize_tempo(90.0, 1.0, &cfg).correction, TempoCorrection::None);
        assert_eq!(normalize_tempo(180.0, 1.0, &cfg).correction, TempoCorrection::None);
    }

    #[test]
    fn test_autocorrelation_of_constant_is_empty() {
        assert!(autocorrelation(&[1.0; 64], 10).is_empty());
        let r = autocorrelation(&pulse_train(200, 10.0), 30);
        assert!((r[0] - 1.0).abs() < 1e-4);
        assert!(r[10] > 0.9);
        assert!(r[5] < 0.0);
    }

    #[test]
    fn test_estimate_tempo_on_pulse_train() {
        // 50 frames/s, pulse every 25 frames = 120 BPM
        let env = pulse_train(500, 25.0);
        let est = estimate_tempo(&env, 50.0, &TempoConfig::default()).unwrap();
        assert!((est.bpm_raw - 120.0).abs() < 1.0, "bpm {}", est.bpm_raw);
        assert!(est.confidence > 0.9);
    }

    #[test]
    fn test_track_beats_follows_pulses() {
        let env = pulse_train(500, 25.0);
        let beats = track_beats(&env, 50.0, 120.0, 100.0);
        assert!(beats.len() >= 19);
        for pair in beats.windows(2) {
            assert_eq!(pair[1] - pair[0], 25);
        }
        assert_eq!(beats[0] % 25, 0);
    }

    #[test]
    fn test_downbeat_phase_prefers_strong_kicks() {
        let beats: Vec<usize> = (0..8).map(|i| 10 + i * 20).collect();
        let mut kick = vec![0.0; 200];
        for (i, &b) in beats.iter().enumerate() {
            kick[b] = if i % 4 == 1 { 1.0 } else { 0.2 };
        }
        assert_eq!(infer_downbeat_phase(&beats, &kick, 4), 1);
        // Uniform energy ties to phase 0
        let flat = vec![1.0; 200];
        assert_eq!(infer_downbeat_phase(&beats, &flat, 4), 0);
    }

    #[test]
    fn test_moving_average3_edges() {
        assert_eq!(moving_average3(&[3.0, 0.0, 0.0]), vec![1.5, 1.0, 0.0]);
    }
}
