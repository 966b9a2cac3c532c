//! Configuration system for the analysis engine

use crate::analysis::{DrumType, InstrumentSettings, PerInstrument};
use crate::error::{Result, TranscribeError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sample rates the engine accepts
pub const SUPPORTED_SAMPLE_RATES: [u32; 4] = [22050, 32000, 44100, 48000];

/// Minimum input duration in seconds
pub const MIN_DURATION_SEC: f32 = 3.0;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub stft: StftConfig,
    pub chroma: ChromaConfig,
    pub chords: ChordConfig,
    pub tempo: TempoConfig,
    pub drums: DrumConfig,
    pub grid: GridConfig,
    pub patterns: PatternConfig,
    pub midi: MidiConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            stft: StftConfig::default(),
            chroma: ChromaConfig::default(),
            chords: ChordConfig::default(),
            tempo: TempoConfig::default(),
            drums: DrumConfig::default(),
            grid: GridConfig::default(),
            patterns: PatternConfig::default(),
            midi: MidiConfig::default(),
        }
    }
}

/// STFT configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StftConfig {
    /// Analysis window length in samples; 2048, 4096 or 8192
    pub window_size: usize,
    /// Hop as a fraction of the window; 1/2, 1/4 or 1/8
    pub hop_fraction: f32,
}

impl Default for StftConfig {
    fn default() -> Self {
        Self {
            window_size: 4096,
            hop_fraction: 0.25,
        }
    }
}

impl StftConfig {
    pub fn hop_size(&self) -> usize {
        ((self.window_size as f32 * self.hop_fraction).round() as usize).max(1)
    }
}

/// Chromagram configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChromaConfig {
    pub min_freq_hz: f32,
    pub max_freq_hz: f32,
    /// Frames with RMS below this are treated as silent
    pub silence_rms: f32,
    /// Centered moving-average length in frames; 1 disables smoothing
    pub smoothing_frames: usize,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            min_freq_hz: 60.0,
            max_freq_hz: 5000.0,
            silence_rms: 1e-4,
            smoothing_frames: 1,
        }
    }
}

/// Chord recognition configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChordConfig {
    pub min_chord_confidence: f32,
    /// Events shorter than this are absorbed into a neighbour
    pub min_event_ms: f32,
}

impl Default for ChordConfig {
    fn default() -> Self {
        Self {
            min_chord_confidence: 0.3,
            min_event_ms: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownbeatMode {
    /// Phase with the most kick-band onset energy
    KickPhase,
    /// First detected kick
    FirstKick,
}

/// Tempo and downbeat configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub min_bpm: f32,
    pub max_bpm: f32,
    pub double_below_bpm: f32,
    pub halve_above_bpm: f32,
    /// Autocorrelation peak height below which the estimate is rejected
    pub min_confidence: f32,
    pub fallback_bpm: f32,
    /// Beat-tracking penalty on squared deviation from the beat period (s^-2)
    pub beat_tightness: f32,
    pub downbeat_mode: DownbeatMode,
    /// Snap the downbeat onto a nearby kick after drum detection
    pub snap_downbeat_to_kick: bool,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            min_bpm: 30.0,
            max_bpm: 300.0,
            double_below_bpm: 90.0,
            halve_above_bpm: 180.0,
            min_confidence: 0.1,
            fallback_bpm: 120.0,
            beat_tightness: 100.0,
            downbeat_mode: DownbeatMode::KickPhase,
            snap_downbeat_to_kick: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrumSource {
    Auto,
    DrumsStem,
    FullMix,
}

/// Drum detection and classification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrumConfig {
    pub energy_threshold: f32,
    pub min_hit_interval_ms: f32,
    pub min_hit_count: usize,
    /// Candidates from different bands closer than this are one hit
    pub merge_window_ms: f32,
    pub feature_window_ms: f32,
    /// Score the catch-all `perc` class always receives
    pub classification_floor: f32,
    pub source: DrumSource,
}

impl Default for DrumConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.1,
            min_hit_interval_ms: 40.0,
            min_hit_count: 10,
            merge_window_ms: 25.0,
            feature_window_ms: 40.0,
            classification_floor: 0.3,
            source: DrumSource::Auto,
        }
    }
}

/// Named per-instrument quantization bundles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenrePreset {
    FourOnFloor,
    AfroHouse,
    Trap,
    Breakbeat,
    /// Every instrument uses the global grid values
    Custom,
}

impl GenrePreset {
    /// Settings bundle for the preset; `None` for `Custom`
    pub fn settings(self) -> Option<PerInstrument<InstrumentSettings>> {
        let s = InstrumentSettings::new;
        match self {
            GenrePreset::FourOnFloor => Some(PerInstrument {
                kick: s(50.0, 1.0, 4),
                snare: s(50.0, 1.0, 4),
                hihat: s(50.0, 1.0, 4),
                clap: s(50.0, 1.0, 4),
                tom: s(50.0, 0.9, 4),
                perc: s(50.0, 0.9, 4),
            }),
            GenrePreset::AfroHouse => Some(PerInstrument {
                kick: s(50.0, 1.0, 4),
                snare: s(54.0, 0.9, 4),
                hihat: s(56.0, 0.85, 4),
                clap: s(54.0, 0.9, 4),
                tom: s(56.0, 0.8, 4),
                perc: s(58.0, 0.75, 4),
            }),
            GenrePreset::Trap => Some(PerInstrument {
                kick: s(50.0, 1.0, 4),
                snare: s(50.0, 1.0, 4),
                hihat: s(50.0, 0.95, 32),
                clap: s(50.0, 1.0, 4),
                tom: s(50.0, 0.9, 8),
                perc: s(50.0, 0.9, 8),
            }),
            GenrePreset::Breakbeat => Some(PerInstrument {
                kick: s(54.0, 0.8, 4),
                snare: s(56.0, 0.75, 4),
                hihat: s(58.0, 0.7, 8),
                clap: s(56.0, 0.75, 4),
                tom: s(54.0, 0.7, 8),
                perc: s(56.0, 0.7, 8),
            }),
            GenrePreset::Custom => None,
        }
    }
}

/// Grid and quantization configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub beats_per_bar: u32,
    pub subdivisions_per_beat: u32,
    pub swing_percent: f32,
    pub quantize_strength: f32,
    pub genre_preset: GenrePreset,
    /// Per-type replacements applied after the preset
    pub overrides: PerInstrument<Option<InstrumentSettings>>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            beats_per_bar: 4,
            subdivisions_per_beat: 4,
            swing_percent: 50.0,
            quantize_strength: 1.0,
            genre_preset: GenrePreset::Custom,
            overrides: PerInstrument::default(),
        }
    }
}

impl GridConfig {
    /// Effective per-instrument settings: preset (or globals), then overrides
    pub fn instrument_settings(&self) -> PerInstrument<InstrumentSettings> {
        let global = InstrumentSettings::new(
            self.swing_percent,
            self.quantize_strength,
            self.subdivisions_per_beat,
        );
        let base = self
            .genre_preset
            .settings()
            .unwrap_or_else(|| PerInstrument::splat(global));
        PerInstrument::from_fn(|t| self.overrides.get(t).unwrap_or(*base.get(t)))
    }
}

/// Pattern matching configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Scores (0-100) below this are not reported as a match
    pub min_match_score: f32,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            min_match_score: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidiMapping {
    /// Single merged track on channel 10
    GmDrums,
    /// One track per drum type on channel 1
    Melodic,
}

/// MIDI export configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiConfig {
    pub mapping: MidiMapping,
    pub gm_pitches: PerInstrument<u8>,
    pub melodic_pitches: PerInstrument<u8>,
    pub note_length_ms: f32,
    pub include_chords: bool,
    pub chord_velocity: u8,
    /// Shift output so the bar line at or before the first event sits at tick 0
    pub align_to_downbeat: bool,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            mapping: MidiMapping::GmDrums,
            gm_pitches: PerInstrument {
                kick: 36,
                snare: 38,
                hihat: 42,
                clap: 39,
                tom: 45,
                perc: 47,
            },
            melodic_pitches: PerInstrument {
                kick: 36,
                snare: 37,
                hihat: 38,
                clap: 39,
                tom: 40,
                perc: 41,
            },
            note_length_ms: 50.0,
            include_chords: true,
            chord_velocity: 80,
            align_to_downbeat: true,
        }
    }
}

impl MidiConfig {
    pub fn pitch(&self, drum_type: DrumType) -> u8 {
        match self.mapping {
            MidiMapping::GmDrums => *self.gm_pitches.get(drum_type),
            MidiMapping::Melodic => *self.melodic_pitches.get(drum_type),
        }
    }
}

fn invalid(msg: String) -> TranscribeError {
    TranscribeError::InvalidConfiguration(msg)
}

fn check_range(name: &str, value: f32, lo: f32, hi: f32) -> Result<()> {
    if !(lo..=hi).contains(&value) {
        return Err(invalid(format!(
            "{} = {} outside [{}, {}]",
            name, value, lo, hi
        )));
    }
    Ok(())
}

fn check_settings(name: &str, settings: &InstrumentSettings) -> Result<()> {
    check_range(&format!("{}.swing", name), settings.swing, 40.0, 75.0)?;
    check_range(
        &format!("{}.quantize_strength", name),
        settings.quantize_strength,
        0.0,
        1.0,
    )?;
    if ![4, 8, 16, 32].contains(&settings.subdivisions_per_beat) {
        return Err(invalid(format!(
            "{}.subdivisions_per_beat = {} not in {{4, 8, 16, 32}}",
            name, settings.subdivisions_per_beat
        )));
    }
    Ok(())
}

/// Validate configuration parameters
pub fn validate_config(config: &Config) -> Result<()> {
    if ![2048, 4096, 8192].contains(&config.stft.window_size) {
        return Err(invalid(format!(
            "stft.window_size = {} not in {{2048, 4096, 8192}}",
            config.stft.window_size
        )));
    }
    if ![0.5, 0.25, 0.125].contains(&config.stft.hop_fraction) {
        return Err(invalid(format!(
            "stft.hop_fraction = {} not in {{0.5, 0.25, 0.125}}",
            config.stft.hop_fraction
        )));
    }

    if config.chroma.min_freq_hz <= 0.0 || config.chroma.min_freq_hz >= config.chroma.max_freq_hz
    {
        return Err(invalid("chroma frequency band must satisfy 0 < min < max".into()));
    }
    if config.chroma.smoothing_frames == 0 {
        return Err(invalid("chroma.smoothing_frames must be >= 1".into()));
    }

    check_range(
        "chords.min_chord_confidence",
        config.chords.min_chord_confidence,
        0.1,
        0.6,
    )?;
    if config.chords.min_event_ms < 0.0 {
        return Err(invalid("chords.min_event_ms must be >= 0".into()));
    }

    let t = &config.tempo;
    if !(0.0 < t.min_bpm && t.min_bpm < t.max_bpm && t.max_bpm <= 300.0) {
        return Err(invalid(format!(
            "tempo range [{}, {}] must satisfy 0 < min < max <= 300",
            t.min_bpm, t.max_bpm
        )));
    }
    if t.double_below_bpm >= t.halve_above_bpm {
        return Err(invalid("tempo.double_below_bpm must be < halve_above_bpm".into()));
    }
    check_range("tempo.min_confidence", t.min_confidence, 0.0, 1.0)?;
    check_range("tempo.fallback_bpm", t.fallback_bpm, 1.0, 300.0)?;
    if t.beat_tightness < 0.0 {
        return Err(invalid("tempo.beat_tightness must be >= 0".into()));
    }

    let d = &config.drums;
    check_range("drums.energy_threshold", d.energy_threshold, 0.05, 0.25)?;
    check_range("drums.min_hit_interval_ms", d.min_hit_interval_ms, 10.0, 100.0)?;
    check_range("drums.merge_window_ms", d.merge_window_ms, 0.0, 100.0)?;
    check_range("drums.feature_window_ms", d.feature_window_ms, 20.0, 50.0)?;
    check_range("drums.classification_floor", d.classification_floor, 0.0, 1.0)?;

    let g = &config.grid;
    if ![2, 3, 4, 6, 8].contains(&g.beats_per_bar) {
        return Err(invalid(format!(
            "grid.beats_per_bar = {} not in {{2, 3, 4, 6, 8}}",
            g.beats_per_bar
        )));
    }
    check_settings(
        "grid",
        &InstrumentSettings::new(g.swing_percent, g.quantize_strength, g.subdivisions_per_beat),
    )?;
    for (drum_type, settings) in g.overrides.iter() {
        if let Some(settings) = settings {
            check_settings(&format!("grid.overrides.{}", drum_type), settings)?;
        }
    }

    check_range("patterns.min_match_score", config.patterns.min_match_score, 0.0, 100.0)?;

    let m = &config.midi;
    for (drum_type, pitch) in m.gm_pitches.iter().chain(m.melodic_pitches.iter()) {
        if *pitch > 127 {
            return Err(invalid(format!("midi pitch for {} = {} > 127", drum_type, pitch)));
        }
    }
    if m.note_length_ms <= 0.0 {
        return Err(invalid("midi.note_length_ms must be > 0".into()));
    }
    if !(1..=127).contains(&m.chord_velocity) {
        return Err(invalid("midi.chord_velocity must be in 1..=127".into()));
    }

    Ok(())
}

/// Load configuration from JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| invalid(format!("cannot read {}: {}", path.display(), e)))?;
    let config: Config = serde_json::from_str(&content)
        .map_err(|e| invalid(format!("cannot parse {}: {}", path.display(), e)))?;
    validate_config(&config)?;
    Ok(config)
}

/// Save configuration to JSON file
pub fn save_config<P: AsRef<Path>>(config: &Config, path: P) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)
        .map_err(|e| TranscribeError::AnalysisExportError(e.to_string()))?;
    Ok(())
}
