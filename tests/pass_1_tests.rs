//! Tests for the spectral front-end and Pass 1: Chromagram

use groovescribe::audio::AudioBlock;
use groovescribe::config::{ChromaConfig, Config};
use groovescribe::passes::pass_1::{self, chroma_vector, ChromagramBuilder};
use groovescribe::spectral::{frame_count, SpectralFrames};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;

const SR: u32 = 44100;

/// Sum of equal-amplitude sines
fn generate_chord(freqs: &[f32], seconds: f32, sr: u32) -> Vec<f32> {
    let n = (seconds * sr as f32) as usize;
    let amp = 0.8 / freqs.len() as f32;
    (0..n)
        .map(|i| {
            let t = i as f32 / sr as f32;
            freqs.iter().map(|f| amp * (2.0 * PI * f * t).sin()).sum()
        })
        .collect()
}

/// Uniform noise from a fixed seed
fn generate_noise(n: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.gen_range(-0.5..0.5)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_iteration_matches_count() {
        let samples = generate_noise(SR as usize, 1);
        let frames = SpectralFrames::new(&samples, SR, 4096, 1024).unwrap();
        let expected = frame_count(samples.len(), 4096, 1024);
        assert_eq!(frames.len(), expected);
        let collected: Vec<_> = frames.collect();
        assert_eq!(collected.len(), expected);
        assert!(collected.iter().all(|f| f.magnitudes.len() == 2048));
        assert_eq!(collected[1].time, 1024.0 / SR as f32);
    }

    #[test]
    fn test_chroma_frames_are_zero_or_max_normalized() {
        let mut samples = generate_noise(3 * SR as usize, 7);
        // A silent stretch in the middle
        for s in &mut samples[SR as usize..2 * SR as usize] {
            *s = 0.0;
        }
        let block = AudioBlock::from_mono(samples, SR);
        let chromagram = pass_1::run(&block, &Config::default()).unwrap();

        let mut silent = 0;
        for chroma in chromagram.frames() {
            let max = chroma.iter().fold(0.0f32, |a, &b| a.max(b));
            if max == 0.0 {
                silent += 1;
            } else {
                assert_eq!(max, 1.0);
            }
        }
        assert!(silent > 0);
    }

    #[test]
    fn test_c_major_triad_chroma() {
        let samples = generate_chord(&[261.63, 329.63, 392.00], 2.0, SR);
        let frames = SpectralFrames::new(&samples, SR, 4096, 1024).unwrap();
        let mut builder = ChromagramBuilder::new(SR, 4096, 1024, &ChromaConfig::default());
        for frame in frames {
            builder.push(&frame);
        }
        let chromagram = builder.finish();

        let mid = chromagram.frame(chromagram.n_frames() / 2);
        let mut order: Vec<usize> = (0..12).collect();
        order.sort_by(|&a, &b| mid[b].total_cmp(&mid[a]));
        let mut top3 = order[..3].to_vec();
        top3.sort();
        assert_eq!(top3, vec![0, 4, 7], "chroma {:?}", mid);
    }

    #[test]
    fn test_single_frame_chroma_vector() {
        let cfg = ChromaConfig::default();
        let mut samples = generate_chord(&[220.00, 277.18, 329.63], 1.0, SR);
        samples.extend(vec![0.0; SR as usize]);
        let frames: Vec<_> = SpectralFrames::new(&samples, SR, 4096, 1024)
            .unwrap()
            .collect();

        // A major: A, C# and E lead the frame
        let voiced = chroma_vector(&frames[10], SR, 4096, &cfg);
        let mut order: Vec<usize> = (0..12).collect();
        order.sort_by(|&a, &b| voiced[b].total_cmp(&voiced[a]));
        let mut top3 = order[..3].to_vec();
        top3.sort();
        assert_eq!(top3, vec![1, 4, 9], "chroma {:?}", voiced);
        assert_eq!(voiced.iter().fold(0.0f32, |a, &b| a.max(b)), 1.0);

        let last = frames.last().unwrap();
        assert_eq!(chroma_vector(last, SR, 4096, &cfg), [0.0; 12]);
    }

    #[test]
    fn test_chromagram_frame_times_follow_hop() {
        let samples = generate_chord(&[261.63, 329.63, 392.00], 1.0, SR);
        let frames = SpectralFrames::new(&samples, SR, 4096, 1024).unwrap();
        let mut builder = ChromagramBuilder::new(SR, 4096, 1024, &ChromaConfig::default());
        let mut times = Vec::new();
        for frame in frames {
            times.push(frame.time);
            builder.push(&frame);
        }
        let chromagram = builder.finish();
        assert_eq!(chromagram.n_frames(), times.len());
        for (f, t) in times.iter().enumerate() {
            assert!((chromagram.frame_time(f) - t).abs() < 1e-5);
        }
    }
}
