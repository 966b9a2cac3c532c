//! Pass 5: Grid geometry & quantization
//!
//! Grid coordinates are pure arithmetic over `(time, bpm, downbeat,
//! beats_per_bar, subdivisions)`; nothing is stored per cell.

use crate::analysis::{
    sort_hits, DownbeatAnchor, DrumType, GridCell, Hit, InstrumentSettings, PerInstrument,
};
use crate::config::Config;
use crate::passes::pass_4::enforce_min_interval;
use serde::Serialize;

/// Beat grid anchored on a downbeat
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Grid {
    pub bpm: f32,
    /// Time of a bar line (bar 0, beat 0)
    pub downbeat_time: f32,
    pub beats_per_bar: u32,
}

impl Default for Grid {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            downbeat_time: 0.0,
            beats_per_bar: 4,
        }
    }
}

impl Grid {
    pub fn new(bpm: f32, downbeat_time: f32, beats_per_bar: u32) -> Self {
        Self {
            bpm,
            downbeat_time,
            beats_per_bar: beats_per_bar.max(1),
        }
    }

    pub fn from_anchor(anchor: &DownbeatAnchor, bpm: f32) -> Self {
        Self::new(bpm, anchor.downbeat_time(bpm), anchor.beats_per_bar)
    }

    pub fn beat_duration(&self) -> f32 {
        60.0 / self.bpm
    }

    pub fn bar_duration(&self) -> f32 {
        self.beat_duration() * self.beats_per_bar as f32
    }

    /// Fractional beats since the downbeat
    pub fn position(&self, time: f32) -> f32 {
        (time - self.downbeat_time) * self.bpm / 60.0
    }

    /// Cell containing `time` (floor geometry, unswung)
    pub fn cell_at(&self, time: f32, subdivisions: u32) -> GridCell {
        let subs = subdivisions.max(1);
        let pos = self.position(time) as f64;
        let beat_index = pos.floor() as i64;
        let sub = (((pos - pos.floor()) * subs as f64).floor() as u32).min(subs - 1);
        self.cell_from_beat(beat_index, sub)
    }

    fn cell_from_beat(&self, beat_index: i64, subdivision: u32) -> GridCell {
        let bpb = self.beats_per_bar as i64;
        GridCell {
            bar: beat_index.div_euclid(bpb) as i32,
            beat: beat_index.rem_euclid(bpb) as u32,
            subdivision,
        }
    }

    fn cell_from_index(&self, index: i64, subdivisions: u32) -> GridCell {
        let subs = subdivisions.max(1) as i64;
        self.cell_from_beat(index.div_euclid(subs), index.rem_euclid(subs) as u32)
    }

    /// Offset of a subdivision inside its beat, in beats.
    ///
    /// Subdivisions are taken in pairs; the odd member sits `swing/100` of the
    /// way through its pair, so 50 is straight and 67 is close to a triplet.
    pub fn subdivision_offset(subdivision: u32, subdivisions: u32, swing: f32) -> f64 {
        let subs = subdivisions.max(1) as f64;
        let pair_len = 2.0 / subs;
        let pair_start = (subdivision / 2) as f64 * pair_len;
        if subdivision % 2 == 0 {
            pair_start
        } else {
            pair_start + swing as f64 / 100.0 * pair_len
        }
    }

    /// Time of a cell with swing applied
    pub fn cell_time(&self, cell: GridCell, subdivisions: u32, swing: f32) -> f32 {
        let beats = cell.bar as f64 * self.beats_per_bar as f64
            + cell.beat as f64
            + Self::subdivision_offset(cell.subdivision, subdivisions, swing);
        (self.downbeat_time as f64 + beats * 60.0 / self.bpm as f64) as f32
    }

    /// Cell whose swung time is closest to `time`; ties go to the earlier cell
    pub fn nearest_cell(&self, time: f32, subdivisions: u32, swing: f32) -> GridCell {
        let subs = subdivisions.max(1);
        let index = (self.position(time) as f64 * subs as f64).floor() as i64;
        let mut best: Option<(GridCell, f32)> = None;
        for candidate in index - 1..=index + 1 {
            let cell = self.cell_from_index(candidate, subs);
            let distance = (self.cell_time(cell, subs, swing) - time).abs();
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((cell, distance));
            }
        }
        best.map_or_else(|| self.cell_at(time, subs), |(cell, _)| cell)
    }
}

/// A hit together with the grid cell it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PatternHit {
    #[serde(flatten)]
    pub hit: Hit,
    pub cell: GridCell,
}

/// Hits on a grid with the per-instrument settings used to place them
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DrumPattern {
    pub grid: Grid,
    pub settings: PerInstrument<InstrumentSettings>,
    pub hits: Vec<PatternHit>,
}

impl DrumPattern {
    /// Wrap hits that are already placed, assigning each its nearest cell
    pub fn from_hits(
        mut hits: Vec<Hit>,
        grid: Grid,
        settings: PerInstrument<InstrumentSettings>,
    ) -> Self {
        sort_hits(&mut hits);
        let hits = hits
            .into_iter()
            .map(|hit| {
                let s = settings.get(hit.drum_type);
                PatternHit {
                    cell: grid.nearest_cell(hit.time_seconds, s.subdivisions_per_beat, s.swing),
                    hit,
                }
            })
            .collect();
        Self {
            grid,
            settings,
            hits,
        }
    }

    pub fn to_hits(&self) -> Vec<Hit> {
        self.hits.iter().map(|p| p.hit).collect()
    }

    pub fn hits_of(&self, drum_type: DrumType) -> impl Iterator<Item = &PatternHit> {
        self.hits.iter().filter(move |p| p.hit.drum_type == drum_type)
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Drum types present, in canonical order
    pub fn drum_types(&self) -> Vec<DrumType> {
        DrumType::ALL
            .into_iter()
            .filter(|t| self.hits_of(*t).next().is_some())
            .collect()
    }
}

/// Snap hits towards their nearest swung cell, blending by quantize strength,
/// then re-apply the per-type minimum interval.
pub fn quantize(
    hits: &[Hit],
    grid: &Grid,
    settings: &PerInstrument<InstrumentSettings>,
    min_interval: f32,
) -> DrumPattern {
    let moved: Vec<Hit> = hits
        .iter()
        .map(|hit| {
            let s = settings.get(hit.drum_type);
            let strength = s.quantize_strength.clamp(0.0, 1.0);
            let cell = grid.nearest_cell(hit.time_seconds, s.subdivisions_per_beat, s.swing);
            let target = grid.cell_time(cell, s.subdivisions_per_beat, s.swing);
            let time = if strength >= 1.0 {
                target
            } else {
                (1.0 - strength) * hit.time_seconds + strength * target
            };
            Hit {
                time_seconds: time,
                is_quantized: hit.is_quantized || strength > 0.0,
                ..*hit
            }
        })
        .collect();

    let kept = enforce_min_interval(moved, min_interval);
    DrumPattern::from_hits(kept, *grid, *settings)
}

pub fn run(
    hits: &[Hit],
    grid: &Grid,
    settings: &PerInstrument<InstrumentSettings>,
    config: &Config,
) -> DrumPattern {
    log::info!("Pass 5: Quantization");
    log::debug!(
        "  grid {:.1} BPM, downbeat {:.3}s, {} beats/bar",
        grid.bpm,
        grid.downbeat_time,
        grid.beats_per_bar
    );
    let pattern = quantize(hits, grid, settings, config.drums.min_hit_interval_ms / 1000.0);
    let dropped = hits.len() - pattern.hits.len();
    if dropped > 0 {
        log::debug!("  {} hits collapsed onto shared cells", dropped);
    }
    log::info!("  ✓ {} hits on grid", pattern.hits.len());
    pattern
}
