//! Pass 4: Drum onset detection & classification
//!
//! Each detection band is filtered and enveloped independently (in
//! parallel), peaks are refined to sample-accurate onsets, coincident
//! candidates are merged, and every merged onset is classified from the
//! spectrum of a short window after it.

use crate::analysis::{AnalysisSource, AnalysisWarning, DrumType, Hit, PerInstrument};
use crate::audio::{bandpass, AudioBlock};
use crate::config::{Config, DrumConfig, DrumSource};
use crate::spectral::magnitude_spectrum;
use rayon::prelude::*;

/// RMS envelope hop
const ENV_HOP_SEC: f32 = 0.005;
/// RMS envelope window
const ENV_WINDOW_SEC: f32 = 0.020;
/// Peaks must be the maximum within this distance
const PEAK_NEIGHBOURHOOD_SEC: f32 = 0.020;
/// Peaks must be at least double the minimum over this lookback
const PEAK_LOOKBACK_SEC: f32 = 0.050;
/// Onset search starts this long before the peak window
const ONSET_LOOKBACK_SEC: f32 = 0.030;
/// Fraction of the local maximum that marks the onset sample
const ONSET_FRACTION: f32 = 0.25;
/// Bands whose loudest envelope value is below this are skipped
const MIN_BAND_RMS: f32 = 1e-4;
/// Upper band edges are clamped below this fraction of the sample rate
const MAX_EDGE_FRACTION: f32 = 0.45;
/// Share of chord-bearing frames above which a recording counts as a full mix
const FULL_MIX_HARMONIC_RATIO: f32 = 0.3;

/// Frequency ranges that feed one detection band
#[derive(Debug, Clone, Copy)]
pub struct DetectionBand {
    pub drum_type: DrumType,
    pub ranges: &'static [(f32, f32)],
}

pub const DETECTION_BANDS: [DetectionBand; 5] = [
    DetectionBand {
        drum_type: DrumType::Kick,
        ranges: &[(20.0, 120.0)],
    },
    DetectionBand {
        drum_type: DrumType::Snare,
        ranges: &[(150.0, 300.0), (2000.0, 5000.0)],
    },
    DetectionBand {
        drum_type: DrumType::Hihat,
        ranges: &[(6000.0, 16000.0)],
    },
    DetectionBand {
        drum_type: DrumType::Clap,
        ranges: &[(1000.0, 3000.0)],
    },
    DetectionBand {
        drum_type: DrumType::Tom,
        ranges: &[(80.0, 300.0)],
    },
];

/// Band-limited copy of the signal
pub fn band_signal(samples: &[f32], band: &DetectionBand, sample_rate: u32) -> Vec<f32> {
    let max_edge = MAX_EDGE_FRACTION * sample_rate as f32;
    let mut out = vec![0.0f32; samples.len()];
    for &(lo, hi) in band.ranges {
        let hi = hi.min(max_edge);
        if lo >= hi {
            continue;
        }
        for (o, x) in out.iter_mut().zip(bandpass(samples, lo, hi, sample_rate)) {
            *o += x;
        }
    }
    out
}

/// Sliding RMS envelope
#[derive(Debug, Clone, PartialEq)]
pub struct BandEnvelope {
    /// Unnormalized RMS, frame `j` covers samples `[j*hop, j*hop + window)`
    pub values: Vec<f32>,
    pub hop: usize,
    pub window: usize,
    pub max: f32,
}

impl BandEnvelope {
    pub fn normalized(&self) -> Vec<f32> {
        if self.max <= 0.0 {
            return vec![0.0; self.values.len()];
        }
        self.values.iter().map(|v| v / self.max).collect()
    }
}

pub fn band_envelope(signal: &[f32], sample_rate: u32) -> BandEnvelope {
    let hop = ((ENV_HOP_SEC * sample_rate as f32).round() as usize).max(1);
    let window = ((ENV_WINDOW_SEC * sample_rate as f32).round() as usize).max(1);

    let mut prefix = Vec::with_capacity(signal.len() + 1);
    prefix.push(0.0f64);
    let mut acc = 0.0f64;
    for &x in signal {
        acc += (x as f64) * (x as f64);
        prefix.push(acc);
    }

    let n_frames = signal.len().div_ceil(hop);
    let values: Vec<f32> = (0..n_frames)
        .map(|j| {
            let start = j * hop;
            let end = (start + window).min(signal.len());
            let energy = (prefix[end] - prefix[start]).max(0.0);
            (energy / (end - start).max(1) as f64).sqrt() as f32
        })
        .collect();
    let max = values.iter().fold(0.0f32, |a, &b| a.max(b));

    BandEnvelope {
        values,
        hop,
        window,
        max,
    }
}

/// Envelope frames that are local maxima above `threshold`, rise clearly over
/// the recent minimum, and are separated by at least `min_distance` frames
/// (the louder of two close peaks wins).
pub fn pick_peaks(
    env: &[f32],
    threshold: f32,
    neighbourhood: usize,
    lookback: usize,
    min_distance: usize,
) -> Vec<usize> {
    let mut peaks: Vec<usize> = Vec::new();
    for j in 0..env.len() {
        let v = env[j];
        if v < threshold || v <= 0.0 {
            continue;
        }
        let lo = j.saturating_sub(neighbourhood);
        let hi = (j + neighbourhood + 1).min(env.len());
        // First index of a plateau only
        if env[lo..j].iter().any(|&x| x >= v) || env[j + 1..hi].iter().any(|&x| x > v) {
            continue;
        }
        let floor = env[j.saturating_sub(lookback)..j]
            .iter()
            .fold(f32::INFINITY, |a, &b| a.min(b));
        if floor.is_finite() && v < 2.0 * floor {
            continue;
        }

        match peaks.last() {
            Some(&last) if j - last < min_distance => {
                if v > env[last] {
                    peaks.pop();
                    peaks.push(j);
                }
            }
            _ => peaks.push(j),
        }
    }
    peaks
}

/// First sample in `[start, end)` reaching a quarter of the local maximum
pub fn refine_onset(signal: &[f32], start: usize, end: usize) -> usize {
    let end = end.min(signal.len());
    if start >= end {
        return start.min(signal.len().saturating_sub(1));
    }
    let region = &signal[start..end];
    let local_max = region.iter().fold(0.0f32, |a, &x| a.max(x.abs()));
    let target = ONSET_FRACTION * local_max;
    region
        .iter()
        .position(|x| x.abs() >= target)
        .map_or(start, |i| start + i)
}

/// Onset proposed by one band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub sample: usize,
    pub band: DrumType,
    /// Unnormalized envelope peak
    pub strength: f32,
}

fn detect_band(
    samples: &[f32],
    band: &DetectionBand,
    sample_rate: u32,
    cfg: &DrumConfig,
) -> Vec<Candidate> {
    let signal = band_signal(samples, band, sample_rate);
    let env = band_envelope(&signal, sample_rate);
    if env.max < MIN_BAND_RMS {
        log::debug!("  {} band silent, skipped", band.drum_type);
        return Vec::new();
    }

    let hop_sec = env.hop as f32 / sample_rate as f32;
    let frames = |sec: f32| ((sec / hop_sec).round() as usize).max(1);
    let peaks = pick_peaks(
        &env.normalized(),
        cfg.energy_threshold,
        frames(PEAK_NEIGHBOURHOOD_SEC),
        frames(PEAK_LOOKBACK_SEC),
        frames(cfg.min_hit_interval_ms / 1000.0),
    );

    let lookback = (ONSET_LOOKBACK_SEC * sample_rate as f32) as usize;
    let mut previous_end = 0usize;
    let candidates: Vec<Candidate> = peaks
        .iter()
        .map(|&j| {
            let peak_start = j * env.hop;
            let start = peak_start.saturating_sub(lookback).max(previous_end);
            let end = peak_start + env.window;
            previous_end = peak_start;
            Candidate {
                sample: refine_onset(&signal, start, end),
                band: band.drum_type,
                strength: env.values[j],
            }
        })
        .collect();

    log::debug!("  {} band: {} candidates", band.drum_type, candidates.len());
    candidates
}

/// Cluster candidates closer than `window` samples; the strongest band sets the onset
pub fn merge_candidates(mut candidates: Vec<Candidate>, window: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| a.sample.cmp(&b.sample).then(a.band.cmp(&b.band)));
    let mut merged: Vec<Candidate> = Vec::new();
    let mut cluster_start = 0usize;
    for c in candidates {
        match merged.last_mut() {
            Some(last) if c.sample - cluster_start <= window => {
                if c.strength > last.strength {
                    *last = c;
                }
            }
            _ => {
                cluster_start = c.sample;
                merged.push(c);
            }
        }
    }
    merged
}

/// Spectral descriptors of the window after an onset
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HitFeatures {
    pub centroid_hz: f32,
    pub sub_ratio: f32,
    pub kick_ratio: f32,
    pub tom_ratio: f32,
    pub body_ratio: f32,
    pub crack_ratio: f32,
    pub clap_ratio: f32,
    pub hihat_ratio: f32,
    pub clap_flatness: f32,
    pub hihat_flatness: f32,
}

/// Geometric over arithmetic mean of the power spectrum
fn flatness(power: &[f32]) -> f32 {
    if power.is_empty() {
        return 0.0;
    }
    let mean = power.iter().sum::<f32>() / power.len() as f32;
    if mean <= 0.0 {
        return 0.0;
    }
    let log_mean = power.iter().map(|&p| (p + 1e-12).ln()).sum::<f32>() / power.len() as f32;
    (log_mean.exp() / mean).min(1.0)
}

pub fn extract_features(segment: &[f32], sample_rate: u32) -> HitFeatures {
    if segment.len() < 4 {
        return HitFeatures::default();
    }
    let (mags, n_fft) = magnitude_spectrum(segment);
    let hz_per_bin = sample_rate as f32 / n_fft as f32;
    let power: Vec<f32> = mags.iter().map(|m| m * m).collect();
    let top = 16000.0f32.min(sample_rate as f32 / 2.0);

    let bins = |lo: f32, hi: f32| -> std::ops::Range<usize> {
        let a = ((lo / hz_per_bin).ceil() as usize).min(power.len());
        let b = ((hi.min(top) / hz_per_bin).floor() as usize + 1).min(power.len());
        a..b.max(a)
    };
    let energy = |lo: f32, hi: f32| -> f32 { power[bins(lo, hi)].iter().sum() };

    let total = energy(20.0, top);
    if total <= 0.0 {
        return HitFeatures::default();
    }
    let ratio = |lo: f32, hi: f32| energy(lo, hi) / total;

    let range = bins(20.0, top);
    let centroid_hz = range
        .clone()
        .map(|k| k as f32 * hz_per_bin * power[k])
        .sum::<f32>()
        / total;

    HitFeatures {
        centroid_hz,
        sub_ratio: ratio(20.0, 80.0),
        kick_ratio: ratio(20.0, 120.0),
        tom_ratio: ratio(80.0, 300.0),
        body_ratio: ratio(150.0, 300.0),
        crack_ratio: ratio(2000.0, 5000.0),
        clap_ratio: ratio(1000.0, 3000.0),
        hihat_ratio: ratio(6000.0, 16000.0),
        clap_flatness: flatness(&power[bins(1000.0, 3000.0)]),
        hihat_flatness: flatness(&power[bins(6000.0, 16000.0)]),
    }
}

/// Template scores per drum type; `perc` always receives `floor`
pub fn template_scores(f: &HitFeatures, floor: f32) -> PerInstrument<f32> {
    PerInstrument {
        kick: f.kick_ratio * (1.0 - (f.centroid_hz / 1000.0).min(1.0)),
        snare: (2.0 * (f.body_ratio * f.crack_ratio).sqrt()).min(1.0),
        hihat: f.hihat_ratio * (f.hihat_flatness / 0.3).min(1.0),
        clap: f.clap_ratio * (f.clap_flatness / 0.3).min(1.0),
        tom: (f.tom_ratio - f.sub_ratio).clamp(0.0, 1.0),
        perc: floor,
    }
}

/// Winning type (ties by canonical order) and its margin over the runner-up
pub fn classify(f: &HitFeatures, floor: f32) -> (DrumType, f32) {
    let scores = template_scores(f, floor);
    let mut ranked: Vec<(DrumType, f32)> = scores.iter().map(|(t, s)| (t, *s)).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let (winner, best) = ranked[0];
    let runner_up = ranked.get(1).map_or(0.0, |r| r.1);
    (winner, (best - runner_up).clamp(0.0, 1.0))
}

/// Per type, drop hits closer than `min_interval` seconds to the previous kept
/// hit, keeping the louder (the earlier on ties). Output is time-ordered.
pub fn enforce_min_interval(hits: Vec<Hit>, min_interval: f32) -> Vec<Hit> {
    let mut out: Vec<Hit> = Vec::with_capacity(hits.len());
    for drum_type in DrumType::ALL {
        let mut of_type: Vec<Hit> = hits
            .iter()
            .filter(|h| h.drum_type == drum_type)
            .copied()
            .collect();
        of_type.sort_by(|a, b| a.time_seconds.total_cmp(&b.time_seconds));

        let mut kept: Vec<Hit> = Vec::with_capacity(of_type.len());
        for hit in of_type {
            match kept.last_mut() {
                Some(last) if hit.time_seconds - last.time_seconds < min_interval => {
                    if hit.velocity > last.velocity {
                        *last = hit;
                    }
                }
                _ => kept.push(hit),
            }
        }
        out.extend(kept);
    }
    crate::analysis::sort_hits(&mut out);
    out
}

/// Detect and classify drum hits in a block
pub fn detect_hits(block: &AudioBlock, cfg: &DrumConfig) -> Vec<Hit> {
    let samples = block.samples();
    let sr = block.sample_rate();

    let candidates: Vec<Candidate> = DETECTION_BANDS
        .par_iter()
        .map(|band| detect_band(samples, band, sr, cfg))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();

    let merge_window = (cfg.merge_window_ms / 1000.0 * sr as f32) as usize;
    let onsets = merge_candidates(candidates, merge_window);
    let feature_len = ((cfg.feature_window_ms / 1000.0) * sr as f32) as usize;

    let classified: Vec<(Hit, f32)> = onsets
        .iter()
        .map(|c| {
            let end = (c.sample + feature_len).min(samples.len());
            let features = extract_features(&samples[c.sample.min(end)..end], sr);
            let (drum_type, confidence) = classify(&features, cfg.classification_floor);
            let time = c.sample as f32 / sr as f32;
            (Hit::detected(time, drum_type, 1.0, confidence), c.strength)
        })
        .collect();

    // Velocity relative to the loudest hit of the same type
    let loudest = PerInstrument::from_fn(|t| {
        classified
            .iter()
            .filter(|(h, _)| h.drum_type == t)
            .fold(0.0f32, |a, (_, s)| a.max(*s))
    });
    let hits: Vec<Hit> = classified
        .into_iter()
        .map(|(mut hit, strength)| {
            let max = *loudest.get(hit.drum_type);
            let v = if max > 0.0 { strength / max } else { 1.0 };
            hit.velocity = v.clamp(1.0 / 127.0, 1.0);
            hit
        })
        .collect();

    enforce_min_interval(hits, cfg.min_hit_interval_ms / 1000.0)
}

/// Output of the drum pass
#[derive(Debug, Clone, PartialEq)]
pub struct DrumAnalysis {
    pub hits: Vec<Hit>,
    pub source: AnalysisSource,
    pub warning: Option<AnalysisWarning>,
}

/// Resolve the configured source; `auto` looks at how much of the audio carries chords
pub fn resolve_source(source: DrumSource, harmonic_ratio: f32) -> AnalysisSource {
    match source {
        DrumSource::DrumsStem => AnalysisSource::DrumsStem,
        DrumSource::FullMix => AnalysisSource::FullMix,
        DrumSource::Auto if harmonic_ratio >= FULL_MIX_HARMONIC_RATIO => AnalysisSource::FullMix,
        DrumSource::Auto => AnalysisSource::DrumsStem,
    }
}

pub fn run(block: &AudioBlock, harmonic_ratio: f32, config: &Config) -> DrumAnalysis {
    log::info!("Pass 4: Drum detection & classification");
    let cfg = &config.drums;

    let source = resolve_source(cfg.source, harmonic_ratio);
    if source == AnalysisSource::FullMix {
        log::info!("  Input looks like a full mix, expect lower classification confidence");
    }

    let hits = detect_hits(block, cfg);
    for drum_type in DrumType::ALL {
        let count = hits.iter().filter(|h| h.drum_type == drum_type).count();
        if count > 0 {
            log::debug!("  {:<5} {}", drum_type, count);
        }
    }

    let warning = if hits.len() < cfg.min_hit_count {
        let w = AnalysisWarning::InsufficientHits {
            found: hits.len(),
            required: cfg.min_hit_count,
        };
        log::warn!("{}", w);
        Some(w)
    } else {
        None
    };
    log::info!("  ✓ {} hits", hits.len());

    DrumAnalysis {
        hits,
        source,
        warning,
    }
}
