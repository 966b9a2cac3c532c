//! Groove transcription engine
//!
//! A deterministic, non-ML audio analysis pipeline that extracts tempo,
//! downbeat, swing, chord progression and per-instrument drum hits from a
//! recording, quantizes the hits to a swung grid and exports MIDI.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod passes;
pub mod spectral;

pub use analysis::{Analysis, DownbeatAnchor};
pub use audio::AudioBlock;
pub use config::Config;
pub use error::{Result, TranscribeError};

use crate::config::DownbeatMode;
use crate::passes::pass_1::ChromagramBuilder;
use crate::passes::pass_3::OnsetEnvelopeBuilder;
use crate::passes::pass_5::Grid;
use crate::spectral::SpectralFrames;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Spectral frames pulled between cancellation checks
const CANCEL_CHECK_FRAMES: usize = 256;

/// Shared flag that stops an analysis at the next stage boundary
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            log::warn!("Analysis cancelled");
            Err(TranscribeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Main processing pipeline
#[derive(Debug, Clone)]
pub struct Transcriber {
    config: Config,
    downbeat: Option<DownbeatAnchor>,
}

impl Transcriber {
    /// Create a processor; the configuration is validated up front
    pub fn new(config: Config) -> Result<Self> {
        config::validate_config(&config)?;
        Ok(Self {
            config,
            downbeat: None,
        })
    }

    /// Use a fixed downbeat instead of inferring one
    pub fn with_downbeat(mut self, anchor: DownbeatAnchor) -> Self {
        self.downbeat = Some(anchor);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Analyse a file and write `analysis.json` and `transcription.mid` to `output_dir`
    pub fn process<P: AsRef<Path>, Q: AsRef<Path>>(&self, input_path: P, output_dir: Q) -> Result<Analysis> {
        let block = AudioBlock::load_wav(input_path)?;
        let analysis = self.analyze(&block, &CancelToken::new())?;
        self.export_results(&analysis, output_dir)?;
        Ok(analysis)
    }

    /// Run the full pipeline on an in-memory block. Performs no I/O.
    pub fn analyze(&self, block: &AudioBlock, cancel: &CancelToken) -> Result<Analysis> {
        let cfg = &self.config;
        if let Some(anchor) = &self.downbeat {
            anchor.validate()?;
        }
        cancel.check()?;

        // Pass 0: Preflight
        let preflight = passes::pass_0::run(block, cfg)?;
        cancel.check()?;

        // Pass 1: one pull over the spectral frames feeds chroma and onsets
        log::info!("Pass 1: Chromagram & onset envelope");
        let sample_rate = block.sample_rate();
        let window_size = cfg.stft.window_size;
        let hop_size = cfg.stft.hop_size();
        let frames = SpectralFrames::new(block.samples(), sample_rate, window_size, hop_size)?;
        let mut chroma = ChromagramBuilder::new(sample_rate, window_size, hop_size, &cfg.chroma);
        let mut onsets = OnsetEnvelopeBuilder::new(sample_rate, window_size, hop_size);
        for (i, frame) in frames.enumerate() {
            if i % CANCEL_CHECK_FRAMES == 0 {
                cancel.check()?;
            }
            chroma.push(&frame);
            onsets.push(&frame);
        }
        let chromagram = chroma.finish();
        let envelope = onsets.finish();
        log::info!("  ✓ {} frames", chromagram.n_frames());
        cancel.check()?;

        // Pass 2: Chords
        let chords = passes::pass_2::run(&chromagram, preflight.duration_sec, cfg);
        cancel.check()?;

        // Pass 3: Tempo & downbeat
        let tempo = passes::pass_3::run(&envelope, cfg);
        cancel.check()?;

        // Pass 4: Drums
        let drums = passes::pass_4::run(block, chords.harmonic_ratio(), cfg);
        cancel.check()?;

        let anchor = match self.downbeat {
            Some(anchor) => anchor,
            None => match cfg.tempo.downbeat_mode {
                DownbeatMode::KickPhase => tempo.downbeat,
                DownbeatMode::FirstKick => {
                    passes::pass_3::align_to_first_kick(&drums.hits, cfg.grid.beats_per_bar)
                }
            },
        };
        let mut grid = Grid::from_anchor(&anchor, tempo.grid_bpm);
        if self.downbeat.is_none() && cfg.tempo.snap_downbeat_to_kick {
            grid.downbeat_time = passes::pass_3::refine_downbeat(&grid, &drums.hits);
        }
        let swing = passes::pass_3::measure_swing(&drums.hits, &grid);
        log::info!(
            "  Grid {:.1} BPM, downbeat {:.3}s, swing {:.0}%",
            grid.bpm,
            grid.downbeat_time,
            swing
        );

        // Pass 5: Quantization
        let settings = cfg.grid.instrument_settings();
        let pattern = passes::pass_5::run(&drums.hits, &grid, &settings, cfg);
        cancel.check()?;

        // Pass 6: Groove matching
        let groove = passes::pass_6::run(&pattern, cfg);

        let warnings = [chords.warning.clone(), tempo.warning.clone(), drums.warning.clone()]
            .into_iter()
            .flatten()
            .collect();

        Ok(Analysis {
            bpm: tempo.tempo.bpm,
            bpm_confidence: tempo.tempo.confidence,
            swing,
            downbeat_time: grid.downbeat_time,
            beats_per_bar: grid.beats_per_bar,
            chord_events: chords.events,
            hits: pattern.to_hits(),
            analysis_source: drums.source,
            tempo: tempo.tempo,
            grid_bpm: grid.bpm,
            beat_times: tempo.beat_times,
            groove,
            warnings,
            duration_seconds: preflight.duration_sec,
            sample_rate,
            pattern,
            chromagram,
        })
    }

    /// Export MIDI and analysis results
    pub fn export_results<P: AsRef<Path>>(&self, analysis: &Analysis, output_dir: P) -> Result<()> {
        midi::export_midi(analysis, output_dir.as_ref(), &self.config.midi)?;
        analysis::export_analysis(analysis, output_dir.as_ref())?;
        Ok(())
    }
}

/// Validate configuration and the input file header
pub fn validate_input<P: AsRef<Path>>(input_path: P, config: &Config) -> Result<()> {
    let reader = hound::WavReader::open(input_path)?;
    let sample_rate = reader.spec().sample_rate;
    if !config::SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
        return Err(TranscribeError::UnsupportedSampleRate(sample_rate));
    }
    config::validate_config(config)?;
    Ok(())
}
