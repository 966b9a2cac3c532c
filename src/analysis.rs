//! Analysis result model and JSON export

use crate::error::{Result, TranscribeError};
use crate::passes::pass_1::Chromagram;
use crate::passes::pass_5::DrumPattern;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Octave-invariant pitch class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    #[serde(rename = "C#")]
    Cs,
    D,
    #[serde(rename = "D#")]
    Ds,
    E,
    F,
    #[serde(rename = "F#")]
    Fs,
    G,
    #[serde(rename = "G#")]
    Gs,
    A,
    #[serde(rename = "A#")]
    As,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::Cs,
        PitchClass::D,
        PitchClass::Ds,
        PitchClass::E,
        PitchClass::F,
        PitchClass::Fs,
        PitchClass::G,
        PitchClass::Gs,
        PitchClass::A,
        PitchClass::As,
        PitchClass::B,
    ];

    /// Pitch class for any semitone index, wrapping modulo 12
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 12]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::Cs => "C#",
            PitchClass::D => "D",
            PitchClass::Ds => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::Fs => "F#",
            PitchClass::G => "G",
            PitchClass::Gs => "G#",
            PitchClass::A => "A",
            PitchClass::As => "A#",
            PitchClass::B => "B",
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Chord quality. Declaration order is the scoring tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChordQuality {
    Maj,
    Min,
    Dom7,
    Maj7,
    Min7,
    Dim,
    Aug,
}

impl ChordQuality {
    pub const ALL: [ChordQuality; 7] = [
        ChordQuality::Maj,
        ChordQuality::Min,
        ChordQuality::Dom7,
        ChordQuality::Maj7,
        ChordQuality::Min7,
        ChordQuality::Dim,
        ChordQuality::Aug,
    ];

    /// Template as semitone offsets from the root
    pub fn intervals(self) -> &'static [usize] {
        match self {
            ChordQuality::Maj => &[0, 4, 7],
            ChordQuality::Min => &[0, 3, 7],
            ChordQuality::Dom7 => &[0, 4, 7, 10],
            ChordQuality::Maj7 => &[0, 4, 7, 11],
            ChordQuality::Min7 => &[0, 3, 7, 10],
            ChordQuality::Dim => &[0, 3, 6],
            ChordQuality::Aug => &[0, 4, 8],
        }
    }

    /// Suffix appended to the root in chord symbols
    pub fn suffix(self) -> &'static str {
        match self {
            ChordQuality::Maj => "",
            ChordQuality::Min => "m",
            ChordQuality::Dom7 => "7",
            ChordQuality::Maj7 => "maj7",
            ChordQuality::Min7 => "m7",
            ChordQuality::Dim => "dim",
            ChordQuality::Aug => "aug",
        }
    }
}

/// Canonical chord symbol, e.g. `F#m`, `Cmaj7`
pub fn chord_symbol(root: PitchClass, quality: ChordQuality) -> String {
    format!("{}{}", root.name(), quality.suffix())
}

/// A chord held over a time span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordEvent {
    pub start_time: f32,
    pub end_time: f32,
    pub root: PitchClass,
    pub quality: ChordQuality,
    pub symbol: String,
    pub confidence: f32,
    pub source_notes: Vec<PitchClass>,
}

impl ChordEvent {
    pub fn duration(&self) -> f32 {
        self.end_time - self.start_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TempoCorrection {
    None,
    Doubled,
    Halved,
}

/// Estimated tempo after half/double-time normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tempo {
    /// Normalized BPM rounded to 0.1, `None` when the estimate was rejected
    pub bpm: Option<f32>,
    pub confidence: f32,
    pub was_auto_corrected: bool,
    pub original_bpm: Option<f32>,
    pub correction: TempoCorrection,
}

impl Tempo {
    /// Tempo record for a rejected estimate
    pub fn uncertain() -> Self {
        Self {
            bpm: None,
            confidence: 0.0,
            was_auto_corrected: false,
            original_bpm: None,
            correction: TempoCorrection::None,
        }
    }
}

/// The beat a bar starts on
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DownbeatAnchor {
    pub time_seconds: f32,
    pub beats_per_bar: u32,
    /// 1-based beat number that falls at `time_seconds`
    pub beat_position: u32,
}

impl DownbeatAnchor {
    pub fn new(time_seconds: f32, beats_per_bar: u32) -> Self {
        Self {
            time_seconds,
            beats_per_bar,
            beat_position: 1,
        }
    }

    /// Time of the bar line implied by this anchor
    pub fn downbeat_time(&self, bpm: f32) -> f32 {
        let offset = self.beat_position.saturating_sub(1) as f32;
        self.time_seconds - offset * 60.0 / bpm
    }

    pub fn validate(&self) -> Result<()> {
        if self.time_seconds < 0.0 || !self.time_seconds.is_finite() {
            return Err(TranscribeError::InvalidConfiguration(format!(
                "downbeat time must be >= 0, got {}",
                self.time_seconds
            )));
        }
        if self.beats_per_bar == 0
            || self.beat_position == 0
            || self.beat_position > self.beats_per_bar
        {
            return Err(TranscribeError::InvalidConfiguration(format!(
                "beat position {} outside 1..={}",
                self.beat_position, self.beats_per_bar
            )));
        }
        Ok(())
    }
}

/// Drum instrument classes. Declaration order is the canonical tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrumType {
    Kick,
    Snare,
    Hihat,
    Clap,
    Tom,
    Perc,
}

impl DrumType {
    pub const ALL: [DrumType; 6] = [
        DrumType::Kick,
        DrumType::Snare,
        DrumType::Hihat,
        DrumType::Clap,
        DrumType::Tom,
        DrumType::Perc,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DrumType::Kick => "kick",
            DrumType::Snare => "snare",
            DrumType::Hihat => "hihat",
            DrumType::Clap => "clap",
            DrumType::Tom => "tom",
            DrumType::Perc => "perc",
        }
    }
}

impl fmt::Display for DrumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DrumType {
    type Err = TranscribeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kick" | "bd" => Ok(DrumType::Kick),
            "snare" | "sd" => Ok(DrumType::Snare),
            "hihat" | "hi-hat" | "hh" => Ok(DrumType::Hihat),
            "clap" | "cp" => Ok(DrumType::Clap),
            "tom" => Ok(DrumType::Tom),
            "perc" | "percussion" => Ok(DrumType::Perc),
            other => Err(TranscribeError::InvalidConfiguration(format!(
                "unknown drum type '{}'",
                other
            ))),
        }
    }
}

/// One value per drum type, with fixed fields
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerInstrument<T> {
    pub kick: T,
    pub snare: T,
    pub hihat: T,
    pub clap: T,
    pub tom: T,
    pub perc: T,
}

impl<T> PerInstrument<T> {
    pub fn get(&self, drum_type: DrumType) -> &T {
        match drum_type {
            DrumType::Kick => &self.kick,
            DrumType::Snare => &self.snare,
            DrumType::Hihat => &self.hihat,
            DrumType::Clap => &self.clap,
            DrumType::Tom => &self.tom,
            DrumType::Perc => &self.perc,
        }
    }

    pub fn get_mut(&mut self, drum_type: DrumType) -> &mut T {
        match drum_type {
            DrumType::Kick => &mut self.kick,
            DrumType::Snare => &mut self.snare,
            DrumType::Hihat => &mut self.hihat,
            DrumType::Clap => &mut self.clap,
            DrumType::Tom => &mut self.tom,
            DrumType::Perc => &mut self.perc,
        }
    }

    pub fn from_fn(mut f: impl FnMut(DrumType) -> T) -> Self {
        Self {
            kick: f(DrumType::Kick),
            snare: f(DrumType::Snare),
            hihat: f(DrumType::Hihat),
            clap: f(DrumType::Clap),
            tom: f(DrumType::Tom),
            perc: f(DrumType::Perc),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DrumType, &T)> {
        DrumType::ALL.into_iter().map(move |t| (t, self.get(t)))
    }
}

impl<T: Clone> PerInstrument<T> {
    pub fn splat(value: T) -> Self {
        Self::from_fn(|_| value.clone())
    }
}

/// Quantization settings for one drum type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    pub swing: f32,
    pub quantize_strength: f32,
    pub subdivisions_per_beat: u32,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            swing: 50.0,
            quantize_strength: 1.0,
            subdivisions_per_beat: 4,
        }
    }
}

impl InstrumentSettings {
    pub fn new(swing: f32, quantize_strength: f32, subdivisions_per_beat: u32) -> Self {
        Self {
            swing,
            quantize_strength,
            subdivisions_per_beat,
        }
    }
}

/// A single drum hit
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub time_seconds: f32,
    pub drum_type: DrumType,
    pub velocity: f32,
    pub confidence: f32,
    pub is_manual: bool,
    pub is_quantized: bool,
}

impl Hit {
    pub fn detected(time_seconds: f32, drum_type: DrumType, velocity: f32, confidence: f32) -> Self {
        Self {
            time_seconds,
            drum_type,
            velocity,
            confidence,
            is_manual: false,
            is_quantized: false,
        }
    }
}

/// Sort hits by time, then canonical drum type order
pub fn sort_hits(hits: &mut [Hit]) {
    hits.sort_by(|a, b| {
        a.time_seconds
            .total_cmp(&b.time_seconds)
            .then(a.drum_type.cmp(&b.drum_type))
    });
}

/// Discrete grid coordinate. `bar` is negative for pickup hits before the downbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridCell {
    pub bar: i32,
    pub beat: u32,
    pub subdivision: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisSource {
    DrumsStem,
    FullMix,
}

/// Recoverable conditions attached to a finished analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisWarning {
    TempoUncertain { confidence: f32 },
    InsufficientHits { found: usize, required: usize },
    NoHarmonicContent,
}

impl fmt::Display for AnalysisWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisWarning::TempoUncertain { confidence } => write!(
                f,
                "W001: Tempo uncertain (confidence {:.2}), using fallback grid",
                confidence
            ),
            AnalysisWarning::InsufficientHits { found, required } => {
                write!(f, "W002: Only {} drum hits found ({} required)", found, required)
            }
            AnalysisWarning::NoHarmonicContent => write!(f, "W003: No harmonic content detected"),
        }
    }
}

/// Best library groove for the whole track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrooveMatch {
    pub name: String,
    pub score: f32,
}

/// Complete output of one analysis run
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub bpm: Option<f32>,
    pub bpm_confidence: f32,
    pub swing: f32,
    pub downbeat_time: f32,
    pub beats_per_bar: u32,
    pub chord_events: Vec<ChordEvent>,
    pub hits: Vec<Hit>,
    pub analysis_source: AnalysisSource,
    pub tempo: Tempo,
    /// BPM the grid was built on; the fallback tempo when `bpm` is `None`
    pub grid_bpm: f32,
    pub beat_times: Vec<f32>,
    pub groove: Option<GrooveMatch>,
    pub warnings: Vec<AnalysisWarning>,
    pub duration_seconds: f32,
    pub sample_rate: u32,
    #[serde(skip)]
    pub pattern: DrumPattern,
    #[serde(skip)]
    pub chromagram: Chromagram,
}

impl Analysis {
    pub fn has_warning(&self, predicate: impl Fn(&AnalysisWarning) -> bool) -> bool {
        self.warnings.iter().any(predicate)
    }

    pub fn hits_of(&self, drum_type: DrumType) -> impl Iterator<Item = &Hit> {
        self.hits.iter().filter(move |h| h.drum_type == drum_type)
    }
}

pub const ANALYSIS_FILENAME: &str = "analysis.json";

/// Write `analysis.json` into `output_dir`
pub fn export_analysis(analysis: &Analysis, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .map_err(|e| TranscribeError::AnalysisExportError(e.to_string()))?;
    let path = output_dir.join(ANALYSIS_FILENAME);

    let json = serde_json::to_string_pretty(analysis)?;
    std::fs::write(&path, json).map_err(|e| TranscribeError::AnalysisExportError(e.to_string()))?;

    log::info!("Exported analysis results to {}", path.display());
    Ok(path)
}
