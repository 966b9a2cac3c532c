//! Pass 6: Pattern generation & groove matching
//!
//! Named one-bar patterns are used both to generate hits and as templates
//! that detected bars are scored against.

use crate::analysis::{DrumType, GrooveMatch, Hit};
use crate::config::Config;
use crate::error::{Result, TranscribeError};
use crate::passes::pass_5::{DrumPattern, Grid};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Resolution of the match signatures, in cells per beat
pub const MATCH_SUBDIVISIONS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternName {
    /// Every beat
    FourOnFloor,
    /// The "and" of every beat
    Offbeat,
    /// Beats 2 and 4 (every odd beat index)
    TwoAndFour,
    /// Half-time backbeat: beat 3 in 4/4
    Backbeat,
    Eighths,
    Sixteenths,
}

impl PatternName {
    pub const ALL: [PatternName; 6] = [
        PatternName::FourOnFloor,
        PatternName::Offbeat,
        PatternName::TwoAndFour,
        PatternName::Backbeat,
        PatternName::Eighths,
        PatternName::Sixteenths,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PatternName::FourOnFloor => "4-on-floor",
            PatternName::Offbeat => "offbeat",
            PatternName::TwoAndFour => "2-and-4",
            PatternName::Backbeat => "backbeat",
            PatternName::Eighths => "8ths",
            PatternName::Sixteenths => "16ths",
        }
    }

    /// Hit positions inside one bar, in beats from the bar line
    pub fn positions(self, beats_per_bar: u32) -> Vec<f32> {
        let beats = 0..beats_per_bar.max(1);
        match self {
            PatternName::FourOnFloor => beats.map(|b| b as f32).collect(),
            PatternName::Offbeat => beats.map(|b| b as f32 + 0.5).collect(),
            PatternName::TwoAndFour => beats.filter(|b| b % 2 == 1).map(|b| b as f32).collect(),
            PatternName::Backbeat => vec![(beats_per_bar.max(1) / 2) as f32],
            PatternName::Eighths => steps(beats_per_bar, 2),
            PatternName::Sixteenths => steps(beats_per_bar, 4),
        }
    }
}

fn steps(beats_per_bar: u32, per_beat: u32) -> Vec<f32> {
    (0..beats_per_bar.max(1) * per_beat)
        .map(|i| i as f32 / per_beat as f32)
        .collect()
}

impl fmt::Display for PatternName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PatternName {
    type Err = TranscribeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "4-on-floor" | "four-on-floor" | "4-on-the-floor" => Ok(PatternName::FourOnFloor),
            "offbeat" | "off-beat" => Ok(PatternName::Offbeat),
            "2-and-4" | "two-and-four" => Ok(PatternName::TwoAndFour),
            "backbeat" | "half-time" | "halftime" => Ok(PatternName::Backbeat),
            "8ths" | "eighths" => Ok(PatternName::Eighths),
            "16ths" | "sixteenths" => Ok(PatternName::Sixteenths),
            other => Err(TranscribeError::InvalidConfiguration(format!(
                "unknown pattern '{}'",
                other
            ))),
        }
    }
}

/// Hits for `bars` bars of a named pattern starting at the grid's downbeat.
///
/// Bar lines get velocity 1.0, other beats 0.9 and off-beats 0.7. Generated
/// hits are flagged manual and quantized.
pub fn generate(drum_type: DrumType, pattern: PatternName, bars: u32, grid: &Grid) -> Vec<Hit> {
    let beat = grid.beat_duration();
    let positions = pattern.positions(grid.beats_per_bar);
    let mut hits = Vec::with_capacity(positions.len() * bars as usize);
    for bar in 0..bars {
        let bar_start = bar as f32 * grid.beats_per_bar as f32;
        for &pos in &positions {
            let velocity = if pos == 0.0 {
                1.0
            } else if pos.fract() == 0.0 {
                0.9
            } else {
                0.7
            };
            hits.push(Hit {
                time_seconds: grid.downbeat_time + (bar_start + pos) * beat,
                drum_type,
                velocity,
                confidence: 1.0,
                is_manual: true,
                is_quantized: true,
            });
        }
    }
    hits
}

/// [`generate`] with the drum type and pattern given by name
pub fn generate_named(drum_type: &str, pattern: &str, bars: u32, grid: &Grid) -> Result<Vec<Hit>> {
    let drum_type: DrumType = drum_type.parse()?;
    let pattern: PatternName = pattern.parse()?;
    Ok(generate(drum_type, pattern, bars, grid))
}

/// Occupied cells of one bar, indexed `beat * MATCH_SUBDIVISIONS + subdivision`
type BarSignature = BTreeSet<u32>;

fn template_signature(pattern: PatternName, beats_per_bar: u32) -> BarSignature {
    pattern
        .positions(beats_per_bar)
        .into_iter()
        .map(|pos| (pos * MATCH_SUBDIVISIONS as f32).round() as u32)
        .collect()
}

/// Bar range covered by the pattern, any drum type
fn bar_span(pattern: &DrumPattern) -> Option<(i32, i32)> {
    let bars = pattern.hits.iter().map(|p| {
        pattern
            .grid
            .nearest_cell(p.hit.time_seconds, MATCH_SUBDIVISIONS, 50.0)
            .bar
    });
    bars.fold(None, |span, bar| match span {
        None => Some((bar, bar)),
        Some((lo, hi)) => Some((lo.min(bar), hi.max(bar))),
    })
}

fn bar_signatures(pattern: &DrumPattern, drum_type: DrumType, span: (i32, i32)) -> Vec<BarSignature> {
    let mut bars = vec![BarSignature::new(); (span.1 - span.0 + 1) as usize];
    for p in pattern.hits_of(drum_type) {
        let cell = pattern
            .grid
            .nearest_cell(p.hit.time_seconds, MATCH_SUBDIVISIONS, 50.0);
        let slot = (cell.bar - span.0) as usize;
        if let Some(sig) = bars.get_mut(slot) {
            sig.insert(cell.beat * MATCH_SUBDIVISIONS + cell.subdivision);
        }
    }
    bars
}

/// Mismatching cells over cells active in either signature; empty vs empty scores 100
fn signature_score(a: &BarSignature, b: &BarSignature) -> f32 {
    let union = a.union(b).count();
    if union == 0 {
        return 100.0;
    }
    let mismatches = a.symmetric_difference(b).count();
    100.0 * (1.0 - mismatches as f32 / union as f32)
}

/// Score (0-100) of one drum type against a named pattern, averaged per bar.
/// A type with no hits scores 0.
pub fn match_type(pattern: &DrumPattern, drum_type: DrumType, name: PatternName) -> f32 {
    if pattern.hits_of(drum_type).next().is_none() {
        return 0.0;
    }
    let Some(span) = bar_span(pattern) else {
        return 0.0;
    };
    let template = template_signature(name, pattern.grid.beats_per_bar);
    let bars = bar_signatures(pattern, drum_type, span);
    bars.iter().map(|b| signature_score(b, &template)).sum::<f32>() / bars.len() as f32
}

/// Best-scoring named pattern for one drum type; ties keep the earlier name
pub fn best_pattern_for(pattern: &DrumPattern, drum_type: DrumType) -> Option<(PatternName, f32)> {
    PatternName::ALL
        .into_iter()
        .map(|name| (name, match_type(pattern, drum_type, name)))
        .fold(None, |best: Option<(PatternName, f32)>, cur| match best {
            Some(b) if b.1 >= cur.1 => Some(b),
            _ => Some(cur),
        })
        .filter(|(_, score)| *score > 0.0)
}

/// A named multi-instrument groove template
#[derive(Debug, Clone, PartialEq)]
pub struct Groove {
    pub name: &'static str,
    pub parts: Vec<(DrumType, PatternName)>,
}

/// Built-in groove library, in tie-break order
pub fn default_grooves() -> Vec<Groove> {
    use DrumType::*;
    use PatternName::*;
    vec![
        Groove {
            name: "four_on_floor",
            parts: vec![(Kick, FourOnFloor), (Hihat, Offbeat), (Clap, TwoAndFour)],
        },
        Groove {
            name: "house_8ths",
            parts: vec![(Kick, FourOnFloor), (Hihat, Eighths)],
        },
        Groove {
            name: "backbeat_rock",
            parts: vec![(Snare, TwoAndFour), (Hihat, Eighths)],
        },
        Groove {
            name: "halftime",
            parts: vec![(Snare, Backbeat), (Hihat, Eighths)],
        },
        Groove {
            name: "trap_16ths",
            parts: vec![(Hihat, Sixteenths), (Clap, Backbeat)],
        },
    ]
}

/// Mean part score of a groove
pub fn groove_score(pattern: &DrumPattern, groove: &Groove) -> f32 {
    if groove.parts.is_empty() {
        return 0.0;
    }
    groove
        .parts
        .iter()
        .map(|&(t, name)| match_type(pattern, t, name))
        .sum::<f32>()
        / groove.parts.len() as f32
}

/// Best groove from `library` scoring at least `min_score`
pub fn match_groove(pattern: &DrumPattern, library: &[Groove], min_score: f32) -> Option<GrooveMatch> {
    let mut best: Option<GrooveMatch> = None;
    for groove in library {
        let score = groove_score(pattern, groove);
        if score >= min_score && best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(GrooveMatch {
                name: groove.name.to_string(),
                score,
            });
        }
    }
    best
}

pub fn run(pattern: &DrumPattern, config: &Config) -> Option<GrooveMatch> {
    log::info!("Pass 6: Groove matching");
    for drum_type in pattern.drum_types() {
        if let Some((name, score)) = best_pattern_for(pattern, drum_type) {
            log::debug!("  {:<6} closest to {} ({:.0})", drum_type, name, score);
        }
    }
    let groove = match_groove(pattern, &default_grooves(), config.patterns.min_match_score);
    match &groove {
        Some(g) => log::info!("  ✓ Groove '{}' ({:.0}/100)", g.name, g.score),
        None => log::info!("  ✓ No groove above {:.0}", config.patterns.min_match_score),
    }
    groove
}
