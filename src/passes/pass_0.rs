//! Pass 0: Preflight
//!
//! Rejects buffers the rest of the pipeline cannot analyse. Silence is not
//! rejected here; it produces warnings further down.

use crate::audio::{self, AudioBlock};
use crate::config::{Config, MIN_DURATION_SEC, SUPPORTED_SAMPLE_RATES};
use crate::error::{Result, TranscribeError};

/// Summary of the input buffer
#[derive(Debug, Clone, PartialEq)]
pub struct PreflightReport {
    pub duration_sec: f32,
    pub rms: f32,
    pub peak: f32,
    pub is_silent: bool,
}

pub fn run(block: &AudioBlock, config: &Config) -> Result<PreflightReport> {
    log::info!("Pass 0: Preflight");

    if block.is_empty() {
        return Err(TranscribeError::InsufficientAudio(
            "buffer contains no samples".to_string(),
        ));
    }

    if !SUPPORTED_SAMPLE_RATES.contains(&block.sample_rate()) {
        return Err(TranscribeError::UnsupportedSampleRate(block.sample_rate()));
    }

    let window_size = config.stft.window_size;
    if block.len() < window_size {
        return Err(TranscribeError::InsufficientAudio(format!(
            "{} samples is shorter than one {}-sample window",
            block.len(),
            window_size
        )));
    }

    let duration_sec = block.duration_sec();
    if duration_sec < MIN_DURATION_SEC {
        return Err(TranscribeError::InsufficientAudio(format!(
            "{:.2} s is shorter than the {:.0} s minimum",
            duration_sec, MIN_DURATION_SEC
        )));
    }

    let rms = audio::rms(block.samples());
    let peak = audio::peak(block.samples());
    let is_silent = rms < config.chroma.silence_rms;

    if peak >= 0.999 {
        log::warn!("Input may be clipped (peak = {:.3})", peak);
    }
    log::debug!(
        "  {:.2} s @ {} Hz, rms {:.4}, peak {:.3}",
        duration_sec,
        block.sample_rate(),
        rms,
        peak
    );

    Ok(PreflightReport {
        duration_sec,
        rms,
        peak,
        is_silent,
    })
}
