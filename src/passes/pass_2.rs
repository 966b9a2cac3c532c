//! Pass 2: Chord recognition
//!
//! Scores every (root, quality) template against each chroma frame, then
//! turns the frame labels into a clean stream of chord events.

use crate::analysis::{chord_symbol, AnalysisWarning, ChordEvent, ChordQuality, PitchClass};
use crate::config::{ChordConfig, Config};
use crate::passes::pass_1::Chromagram;

/// Frames whose maximum is below this carry no usable harmony
const MIN_FRAME_MAX: f32 = 0.1;
/// Lower bound on the accepted template score
const MIN_TEMPLATE_SCORE: f32 = 0.1;

/// Best template for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameChord {
    pub root: PitchClass,
    pub quality: ChordQuality,
    pub score: f32,
}

/// `avg_chord_tone * energy_ratio` for one template
pub fn template_score(chroma: &[f32; 12], root: PitchClass, quality: ChordQuality) -> f32 {
    let total: f32 = chroma.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let intervals = quality.intervals();
    let tones: f32 = intervals
        .iter()
        .map(|i| chroma[(root.index() + i) % 12])
        .sum();
    (tones / intervals.len() as f32) * (tones / total)
}

/// Best-scoring chord for a frame, or `None` when the frame is rejected.
///
/// Candidates are visited quality-major in tie-break order and only a strictly
/// higher score replaces the current best, so ties resolve to the earlier
/// quality and then the lower root.
pub fn recognize_frame(chroma: &[f32; 12], min_score: f32) -> Option<FrameChord> {
    let max = chroma.iter().fold(0.0f32, |a, &b| a.max(b));
    if max < MIN_FRAME_MAX {
        return None;
    }
    let active = chroma.iter().filter(|&&v| v >= 0.5 * max).count();
    if active < 2 {
        return None;
    }

    let mut best: Option<FrameChord> = None;
    for quality in ChordQuality::ALL {
        for root in PitchClass::ALL {
            let score = template_score(chroma, root, quality);
            if best.map_or(true, |b| score > b.score) {
                best = Some(FrameChord {
                    root,
                    quality,
                    score,
                });
            }
        }
    }

    best.filter(|b| b.score >= min_score.max(MIN_TEMPLATE_SCORE))
}

#[derive(Debug, Clone)]
struct Segment {
    start: f32,
    end: f32,
    root: PitchClass,
    quality: ChordQuality,
    score_sum: f32,
    frames: usize,
}

impl Segment {
    fn same_chord(&self, other: &Segment) -> bool {
        self.root == other.root && self.quality == other.quality
    }

    fn confidence(&self) -> f32 {
        if self.frames == 0 {
            0.0
        } else {
            self.score_sum / self.frames as f32
        }
    }

    fn duration(&self) -> f32 {
        self.end - self.start
    }
}

/// Runs of identical consecutive frame labels
fn label_runs(labels: &[Option<FrameChord>], hop: f32) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut prev_frame: Option<usize> = None;

    for (f, label) in labels.iter().enumerate() {
        let Some(chord) = label else {
            continue;
        };
        let start = f as f32 * hop;
        let end = start + hop;
        match segments.last_mut() {
            Some(last)
                if prev_frame == Some(f.wrapping_sub(1))
                    && last.root == chord.root
                    && last.quality == chord.quality =>
            {
                last.end = end;
                last.score_sum += chord.score;
                last.frames += 1;
            }
            _ => segments.push(Segment {
                start,
                end,
                root: chord.root,
                quality: chord.quality,
                score_sum: chord.score,
                frames: 1,
            }),
        }
        prev_frame = Some(f);
    }
    segments
}

/// Merge identical neighbours whose gap is below `max_gap`
fn merge_identical(segments: &mut Vec<Segment>, max_gap: f32) -> bool {
    let mut changed = false;
    let mut i = 0;
    while i + 1 < segments.len() {
        if segments[i].same_chord(&segments[i + 1])
            && segments[i + 1].start - segments[i].end < max_gap
        {
            let next = segments.remove(i + 1);
            let cur = &mut segments[i];
            cur.end = next.end;
            cur.score_sum += next.score_sum;
            cur.frames += next.frames;
            changed = true;
        } else {
            i += 1;
        }
    }
    changed
}

/// Fold the shortest too-short segment into its stronger neighbour.
///
/// Only neighbours closer than `min_len` qualify; a short segment with none is
/// dropped, so silence never gets covered by a stretched chord.
fn absorb_shortest(segments: &mut Vec<Segment>, min_len: f32) -> bool {
    let shortest = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| s.duration() < min_len)
        .min_by(|a, b| a.1.duration().total_cmp(&b.1.duration()))
        .map(|(i, _)| i);
    let Some(i) = shortest else {
        return false;
    };

    let short = &segments[i];
    let prev = i
        .checked_sub(1)
        .filter(|&p| short.start - segments[p].end < min_len);
    let next = Some(i + 1)
        .filter(|&n| n < segments.len() && segments[n].start - short.end < min_len);
    let into_prev = match (prev, next) {
        (Some(p), Some(n)) => Some(segments[p].confidence() >= segments[n].confidence()),
        (Some(_), None) => Some(true),
        (None, Some(_)) => Some(false),
        (None, None) => None,
    };

    let short = segments.remove(i);
    match into_prev {
        Some(true) => segments[i - 1].end = short.end,
        Some(false) => segments[i].start = short.start,
        None => log::debug!(
            "  Dropped isolated {} at {:.2}s",
            chord_symbol(short.root, short.quality),
            short.start
        ),
    }
    true
}

/// Chord events from a chromagram
pub fn build_chord_events(
    chromagram: &Chromagram,
    duration_sec: f32,
    cfg: &ChordConfig,
) -> Vec<ChordEvent> {
    let labels: Vec<Option<FrameChord>> = chromagram
        .frames()
        .map(|chroma| recognize_frame(&chroma, cfg.min_chord_confidence))
        .collect();

    let min_len = cfg.min_event_ms / 1000.0;
    let mut segments = label_runs(&labels, chromagram.hop_seconds());

    loop {
        let merged = merge_identical(&mut segments, min_len);
        if !absorb_shortest(&mut segments, min_len) && !merged {
            break;
        }
    }

    // Bridge short gaps at their midpoint
    for i in 1..segments.len() {
        let gap = segments[i].start - segments[i - 1].end;
        if gap > 0.0 && gap < min_len {
            let mid = segments[i - 1].end + gap / 2.0;
            segments[i - 1].end = mid;
            segments[i].start = mid;
        }
    }

    segments
        .into_iter()
        .filter_map(|s| {
            let end = s.end.min(duration_sec);
            if s.start >= end {
                return None;
            }
            Some(ChordEvent {
                start_time: s.start,
                end_time: end,
                root: s.root,
                quality: s.quality,
                symbol: chord_symbol(s.root, s.quality),
                confidence: s.confidence().clamp(0.0, 1.0),
                source_notes: s
                    .quality
                    .intervals()
                    .iter()
                    .map(|i| PitchClass::from_index(s.root.index() + i))
                    .collect(),
            })
        })
        .collect()
}

/// Output of the chord pass
#[derive(Debug, Clone, Default)]
pub struct ChordAnalysis {
    pub events: Vec<ChordEvent>,
    /// Non-silent frames that received a chord label
    pub voiced_frames: usize,
    pub non_silent_frames: usize,
    pub warning: Option<AnalysisWarning>,
}

impl ChordAnalysis {
    /// Share of non-silent frames that carry a chord
    pub fn harmonic_ratio(&self) -> f32 {
        if self.non_silent_frames == 0 {
            0.0
        } else {
            self.voiced_frames as f32 / self.non_silent_frames as f32
        }
    }
}

pub fn run(chromagram: &Chromagram, duration_sec: f32, config: &Config) -> ChordAnalysis {
    log::info!("Pass 2: Chord recognition");

    let mut voiced_frames = 0;
    let mut non_silent_frames = 0;
    for (f, chroma) in chromagram.frames().enumerate() {
        if chromagram.is_silent(f) {
            continue;
        }
        non_silent_frames += 1;
        if recognize_frame(&chroma, config.chords.min_chord_confidence).is_some() {
            voiced_frames += 1;
        }
    }

    let events = build_chord_events(chromagram, duration_sec, &config.chords);
    let warning = if events.is_empty() {
        log::warn!("{}", AnalysisWarning::NoHarmonicContent);
        Some(AnalysisWarning::NoHarmonicContent)
    } else {
        None
    };

    log::info!("  ✓ {} chord events", events.len());
    for event in &events {
        log::debug!(
            "  {:>7.3}-{:>7.3}s {:<6} ({:.2})",
            event.start_time,
            event.end_time,
            event.symbol,
            event.confidence
        );
    }

    ChordAnalysis {
        events,
        voiced_frames,
        non_silent_frames,
        warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chroma_of(pcs: &[usize]) -> [f32; 12] {
        let mut c = [0.0; 12];
        for &p in pcs {
            c[p] = 1.0;
        }
        c
    }

    #[test]
    fn test_pure_triads() {
        let c = recognize_frame(&chroma_of(&[0, 4, 7]), 0.3).unwrap();
        assert_eq!((c.root, c.quality), (PitchClass::C, ChordQuality::Maj));
        assert!((c.score - 1.0).abs() < 1e-6);

        let fsm = recognize_frame(&chroma_of(&[6, 9, 1]), 0.3).unwrap();
        assert_eq!((fsm.root, fsm.quality), (PitchClass::Fs, ChordQuality::Min));
    }

    #[test]
    fn test_seventh_chord() {
        let g7 = recognize_frame(&chroma_of(&[7, 11, 2, 5]), 0.3).unwrap();
        assert_eq!((g7.root, g7.quality), (PitchClass::G, ChordQuality::Dom7));
    }

    #[test]
    fn test_augmented_tie_breaks_to_lowest_root() {
        // C E G# is symmetric: C+, E+ and G#+ all score 1.0
        let aug = recognize_frame(&chroma_of(&[0, 4, 8]), 0.3).unwrap();
        assert_eq!((aug.root, aug.quality), (PitchClass::C, ChordQuality::Aug));
    }

    #[test]
    fn test_rejections() {
        assert!(recognize_frame(&[0.0; 12], 0.1).is_none());
        assert!(recognize_frame(&chroma_of(&[3]), 0.1).is_none());
        // Flat chroma: no template scores above 4/12
        assert!(recognize_frame(&[1.0; 12], 0.35).is_none());
    }

    #[test]
    fn test_short_event_absorbed_into_stronger_neighbour() {
        let hop = 0.02;
        let c = Some(FrameChord {
            root: PitchClass::C,
            quality: ChordQuality::Maj,
            score: 0.9,
        });
        let g = Some(FrameChord {
            root: PitchClass::G,
            quality: ChordQuality::Maj,
            score: 0.5,
        });
        let glitch = Some(FrameChord {
            root: PitchClass::E,
            quality: ChordQuality::Min,
            score: 0.4,
        });
        let mut labels = vec![c; 20];
        labels.extend(vec![glitch; 2]);
        labels.extend(vec![g; 20]);

        let mut segments = label_runs(&labels, hop);
        assert_eq!(segments.len(), 3);
        while absorb_shortest(&mut segments, 0.1) || merge_identical(&mut segments, 0.1) {}
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].root, PitchClass::C);
        assert!((segments[0].end - 0.44).abs() < 1e-5);
        assert!((segments[0].confidence() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_short_segment_never_reaches_across_silence() {
        let c = Some(FrameChord {
            root: PitchClass::C,
            quality: ChordQuality::Maj,
            score: 0.9,
        });
        let fade = Some(FrameChord {
            root: PitchClass::A,
            quality: ChordQuality::Min,
            score: 0.3,
        });
        // C, half a second of silence, a two-frame fade-in, then a lone blip
        let mut labels = vec![c; 20];
        labels.extend(vec![None; 25]);
        labels.extend(vec![fade; 2]);
        labels.extend(vec![c; 20]);
        labels.extend(vec![None; 25]);
        labels.extend(vec![fade; 2]);

        let mut segments = label_runs(&labels, 0.02);
        assert_eq!(segments.len(), 4);
        while absorb_shortest(&mut segments, 0.1) || merge_identical(&mut segments, 0.1) {}

        assert_eq!(segments.len(), 2);
        assert!((segments[0].end - 0.4).abs() < 1e-5);
        // The fade-in joins the chord after the silence, not the one before
        assert!((segments[1].start - 0.9).abs() < 1e-5);
        assert!((segments[1].end - 1.34).abs() < 1e-5);
    }

    #[test]
    fn test_identical_runs_merge_across_short_gap() {
        let c = Some(FrameChord {
            root: PitchClass::C,
            quality: ChordQuality::Maj,
            score: 0.8,
        });
        let mut labels = vec![c; 10];
        labels.push(None);
        labels.extend(vec![c; 10]);
        let mut segments = label_runs(&labels, 0.02);
        assert_eq!(segments.len(), 2);
        merge_identical(&mut segments, 0.1);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].frames, 20);
    }
}
