//! Validation tests for Pass 0: Preflight, and for configuration handling

use groovescribe::audio::AudioBlock;
use groovescribe::config::{self, Config, GenrePreset};
use groovescribe::error::TranscribeError;
use groovescribe::passes::pass_0;

/// Generate a sine tone
fn generate_tone(freq: f32, seconds: f32, sr: u32) -> Vec<f32> {
    let n = (seconds * sr as f32) as usize;
    (0..n)
        .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_supported_rates() {
        let config = Config::default();
        for sr in [22050, 32000, 44100, 48000] {
            let block = AudioBlock::from_mono(generate_tone(440.0, 3.5, sr), sr);
            let report = pass_0::run(&block, &config).unwrap();
            assert!((report.duration_sec - 3.5).abs() < 0.01);
            assert!(!report.is_silent);
        }
    }

    #[test]
    fn test_rejects_unsupported_rate() {
        let block = AudioBlock::from_mono(generate_tone(440.0, 4.0, 16000), 16000);
        assert_eq!(
            pass_0::run(&block, &Config::default()),
            Err(TranscribeError::UnsupportedSampleRate(16000))
        );
    }

    #[test]
    fn test_rejects_empty_and_short_buffers() {
        let config = Config::default();
        let empty = AudioBlock::from_mono(Vec::new(), 44100);
        assert!(matches!(
            pass_0::run(&empty, &config),
            Err(TranscribeError::InsufficientAudio(_))
        ));

        let one_window = AudioBlock::from_mono(vec![0.1; 1000], 44100);
        assert!(matches!(
            pass_0::run(&one_window, &config),
            Err(TranscribeError::InsufficientAudio(_))
        ));

        let two_seconds = AudioBlock::from_mono(generate_tone(440.0, 2.0, 44100), 44100);
        assert!(matches!(
            pass_0::run(&two_seconds, &config),
            Err(TranscribeError::InsufficientAudio(_))
        ));
    }

    #[test]
    fn test_silence_is_not_an_error() {
        let block = AudioBlock::from_mono(vec![0.0; 5 * 44100], 44100);
        let report = pass_0::run(&block, &Config::default()).unwrap();
        assert!(report.is_silent);
        assert_eq!(report.peak, 0.0);
    }

    #[test]
    fn test_error_messages_carry_codes() {
        let err = TranscribeError::UnsupportedSampleRate(8000);
        assert!(err.to_string().starts_with("E002"));
        assert!(TranscribeError::Cancelled.to_string().starts_with("E004"));
    }

    #[test]
    fn test_config_validation_rejects_each_option() {
        let mutations: Vec<Box<dyn Fn(&mut Config)>> = vec![
            Box::new(|c| c.stft.window_size = 1024),
            Box::new(|c| c.stft.hop_fraction = 0.3),
            Box::new(|c| c.drums.energy_threshold = 0.3),
            Box::new(|c| c.drums.min_hit_interval_ms = 5.0),
            Box::new(|c| c.chords.min_chord_confidence = 0.7),
            Box::new(|c| c.grid.subdivisions_per_beat = 6),
            Box::new(|c| c.grid.swing_percent = 35.0),
            Box::new(|c| c.grid.quantize_strength = 1.5),
            Box::new(|c| c.grid.beats_per_bar = 5),
        ];
        for mutate in mutations {
            let mut config = Config::default();
            mutate(&mut config);
            assert!(matches!(
                config::validate_config(&config),
                Err(TranscribeError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut original = Config::default();
        original.grid.genre_preset = GenrePreset::Trap;
        original.grid.swing_percent = 58.0;
        config::save_config(&original, &path).unwrap();

        let loaded = config::load_config(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "grid": { "swing_percent": 99.0 } }"#).unwrap();
        assert!(config::load_config(&path).is_err());
    }
}
