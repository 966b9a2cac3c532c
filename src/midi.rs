//! MIDI export
//!
//! Writes a format-1 Standard MIDI File: a conductor track with tempo and
//! time signature, the drum hits, and optionally the chord stream as block
//! chords.

use crate::analysis::{Analysis, ChordEvent, DrumType, Hit};
use crate::config::{MidiConfig, MidiMapping};
use crate::error::{Result, TranscribeError};
use crate::passes::pass_5::{DrumPattern, Grid};
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::path::{Path, PathBuf};

pub const TICKS_PER_BEAT: u16 = 480;
pub const MIDI_FILENAME: &str = "transcription.mid";

/// Channel indices are zero-based: 9 is GM channel 10
const DRUM_CHANNEL: u8 = 9;
const MELODIC_CHANNEL: u8 = 0;
const CHORD_CHANNEL: u8 = 1;
/// C3, lowest note of a block chord
const CHORD_BASE_NOTE: u8 = 48;

/// A note placed on the tick timeline
#[derive(Debug, Clone, Copy, PartialEq)]
struct Note {
    on: u32,
    off: u32,
    key: u8,
    velocity: u8,
}

/// Seconds to ticks relative to an origin
#[derive(Debug, Clone, Copy)]
struct TickClock {
    origin: f32,
    ticks_per_second: f64,
}

impl TickClock {
    fn new(origin: f32, bpm: f32) -> Self {
        Self {
            origin,
            ticks_per_second: bpm as f64 / 60.0 * TICKS_PER_BEAT as f64,
        }
    }

    fn ticks(&self, time: f32) -> u32 {
        ((time - self.origin) as f64 * self.ticks_per_second)
            .round()
            .max(0.0) as u32
    }

    fn duration(&self, seconds: f32) -> u32 {
        (seconds as f64 * self.ticks_per_second).round().max(1.0) as u32
    }
}

/// `round(v * 127)` clamped to the valid note-on range
pub fn midi_velocity(velocity: f32) -> u8 {
    (velocity * 127.0).round().clamp(1.0, 127.0) as u8
}

/// Earliest bar line at or before the first event, or zero when alignment is off
fn timeline_origin(grid: &Grid, hits: &[Hit], chords: &[ChordEvent], align: bool) -> f32 {
    if !align {
        return 0.0;
    }
    let first = hits
        .iter()
        .map(|h| h.time_seconds)
        .chain(chords.iter().map(|c| c.start_time))
        .fold(f32::INFINITY, f32::min);
    if !first.is_finite() {
        return 0.0;
    }
    let bar = grid.bar_duration();
    if !(bar > 0.0) {
        return first;
    }
    let bars = ((first - grid.downbeat_time) / bar).floor();
    grid.downbeat_time + bars * bar
}

/// Drum notes for one track: same-tick duplicates keep the loudest, and every
/// note ends at its nominal length or at the next note-on of the same key.
fn drum_notes(hits: &[&Hit], clock: &TickClock, note_ticks: u32, cfg: &MidiConfig) -> Vec<Note> {
    let mut notes: Vec<Note> = hits
        .iter()
        .map(|h| {
            let on = clock.ticks(h.time_seconds);
            Note {
                on,
                off: on + note_ticks,
                key: cfg.pitch(h.drum_type).min(127),
                velocity: midi_velocity(h.velocity),
            }
        })
        .collect();
    notes.sort_by(|a, b| {
        (a.key, a.on)
            .cmp(&(b.key, b.on))
            .then(b.velocity.cmp(&a.velocity))
    });
    notes.dedup_by(|later, earlier| later.key == earlier.key && later.on == earlier.on);

    for i in 0..notes.len().saturating_sub(1) {
        let next = notes[i + 1];
        if next.key == notes[i].key && next.on < notes[i].off {
            notes[i].off = next.on;
        }
    }
    notes
}

fn chord_notes(chords: &[ChordEvent], clock: &TickClock, velocity: u8) -> Vec<Note> {
    let velocity = velocity.clamp(1, 127);
    chords
        .iter()
        .flat_map(|c| {
            let on = clock.ticks(c.start_time);
            let off = clock.ticks(c.end_time).max(on + 1);
            c.quality.intervals().iter().map(move |&interval| Note {
                on,
                off,
                key: (CHORD_BASE_NOTE as usize + c.root.index() + interval).min(127) as u8,
                velocity,
            })
        })
        .collect()
}

/// Delta-timed track from notes; offs precede ons on the same tick
fn note_track(name: &'static str, channel: u8, notes: &[Note]) -> Vec<TrackEvent<'static>> {
    // (tick, is_on, key, velocity)
    let mut timeline: Vec<(u32, bool, u8, u8)> = Vec::with_capacity(notes.len() * 2);
    for n in notes {
        timeline.push((n.on, true, n.key, n.velocity));
        timeline.push((n.off, false, n.key, 0));
    }
    timeline.sort_by_key(|&(tick, is_on, key, _)| (tick, is_on, key));

    let mut events = vec![TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
    }];
    let mut current = 0u32;
    for (tick, is_on, key, velocity) in timeline {
        let message = if is_on {
            MidiMessage::NoteOn {
                key: u7::from(key),
                vel: u7::from(velocity),
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::from(key),
                vel: u7::from(0),
            }
        };
        events.push(TrackEvent {
            delta: u28::from(tick - current),
            kind: TrackEventKind::Midi {
                channel: u4::from(channel),
                message,
            },
        });
        current = tick;
    }
    events.push(end_of_track());
    events
}

fn end_of_track() -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    }
}

fn conductor_track(bpm: f32, beats_per_bar: u32) -> Vec<TrackEvent<'static>> {
    let tempo_uspq = (60_000_000.0 / bpm as f64).round() as u32;
    vec![
        TrackEvent {
            delta: u28::from(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(b"groovescribe")),
        },
        TrackEvent {
            delta: u28::from(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(tempo_uspq))),
        },
        TrackEvent {
            delta: u28::from(0),
            // denominator as a power of two: 2 -> quarter notes
            kind: TrackEventKind::Meta(MetaMessage::TimeSignature(
                beats_per_bar.min(255) as u8,
                2,
                24,
                8,
            )),
        },
        end_of_track(),
    ]
}

/// Serialize a drum pattern (and optional chords) to SMF bytes
pub fn write_midi(
    pattern: &DrumPattern,
    chords: &[ChordEvent],
    bpm: f32,
    cfg: &MidiConfig,
) -> Result<Vec<u8>> {
    if !(bpm > 0.0 && bpm.is_finite()) {
        return Err(TranscribeError::MidiExportError(format!(
            "invalid tempo {}",
            bpm
        )));
    }

    let hits = pattern.to_hits();
    let chords: &[ChordEvent] = if cfg.include_chords { chords } else { &[] };
    let origin = timeline_origin(&pattern.grid, &hits, chords, cfg.align_to_downbeat);
    let clock = TickClock::new(origin, bpm);
    let note_ticks = clock.duration(cfg.note_length_ms / 1000.0);

    let mut tracks = vec![conductor_track(bpm, pattern.grid.beats_per_bar)];
    match cfg.mapping {
        MidiMapping::GmDrums => {
            let all: Vec<&Hit> = hits.iter().collect();
            let notes = drum_notes(&all, &clock, note_ticks, cfg);
            tracks.push(note_track("Drums", DRUM_CHANNEL, &notes));
        }
        MidiMapping::Melodic => {
            for drum_type in DrumType::ALL {
                let of_type: Vec<&Hit> = hits.iter().filter(|h| h.drum_type == drum_type).collect();
                if of_type.is_empty() {
                    continue;
                }
                let notes = drum_notes(&of_type, &clock, note_ticks, cfg);
                tracks.push(note_track(drum_type.name(), MELODIC_CHANNEL, &notes));
            }
        }
    }
    if !chords.is_empty() {
        let notes = chord_notes(chords, &clock, cfg.chord_velocity);
        tracks.push(note_track("Chords", CHORD_CHANNEL, &notes));
    }

    log::debug!(
        "  MIDI: {} tracks, origin {:.3}s, note length {} ticks",
        tracks.len(),
        origin,
        note_ticks
    );

    let smf = Smf {
        header: Header::new(Format::Parallel, Timing::Metrical(u15::from(TICKS_PER_BEAT))),
        tracks,
    };
    let mut bytes = Vec::new();
    smf.write(&mut bytes)
        .map_err(|e| TranscribeError::MidiExportError(format!("{:?}", e)))?;
    Ok(bytes)
}

/// Write `transcription.mid` for an analysis into `output_dir`
pub fn export_midi(analysis: &Analysis, output_dir: &Path, cfg: &MidiConfig) -> Result<PathBuf> {
    let bytes = write_midi(&analysis.pattern, &analysis.chord_events, analysis.grid_bpm, cfg)?;

    std::fs::create_dir_all(output_dir)
        .map_err(|e| TranscribeError::MidiExportError(e.to_string()))?;
    let path = output_dir.join(MIDI_FILENAME);
    std::fs::write(&path, bytes).map_err(|e| TranscribeError::MidiExportError(e.to_string()))?;

    log::info!(
        "Exported {} hits and {} chords to {}",
        analysis.pattern.hits.len(),
        if cfg.include_chords {
            analysis.chord_events.len()
        } else {
            0
        },
        path.display()
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{InstrumentSettings, PerInstrument};

    fn pattern(hits: Vec<Hit>, grid: Grid) -> DrumPattern {
        DrumPattern::from_hits(hits, grid, PerInstrument::splat(InstrumentSettings::default()))
    }

    #[test]
    fn test_velocity_mapping() {
        assert_eq!(midi_velocity(1.0), 127);
        assert_eq!(midi_velocity(0.5), 64);
        assert_eq!(midi_velocity(0.0), 1);
        assert_eq!(midi_velocity(2.0), 127);
    }

    #[test]
    fn test_origin_is_bar_line_before_first_event() {
        let grid = Grid::new(120.0, 0.5, 4);
        let hits = vec![Hit::detected(1.2, DrumType::Kick, 1.0, 1.0)];
        assert!((timeline_origin(&grid, &hits, &[], true) - 0.5).abs() < 1e-6);
        let early = vec![Hit::detected(0.1, DrumType::Kick, 1.0, 1.0)];
        assert!((timeline_origin(&grid, &early, &[], true) + 1.5).abs() < 1e-6);
        assert_eq!(timeline_origin(&grid, &hits, &[], false), 0.0);
    }

    #[test]
    fn test_note_truncated_at_next_same_pitch() {
        let cfg = MidiConfig {
            note_length_ms: 500.0,
            ..MidiConfig::default()
        };
        let clock = TickClock::new(0.0, 120.0);
        let a = Hit::detected(0.0, DrumType::Hihat, 1.0, 1.0);
        let b = Hit::detected(0.25, DrumType::Hihat, 1.0, 1.0);
        let notes = drum_notes(&[&a, &b], &clock, clock.duration(0.5), &cfg);
        assert_eq!(notes[0].on, 0);
        assert_eq!(notes[0].off, 240);
        assert_eq!(notes[1].off, 240 + 480);
    }

    #[test]
    fn test_same_tick_duplicates_keep_loudest() {
        let cfg = MidiConfig::default();
        let clock = TickClock::new(0.0, 120.0);
        let a = Hit::detected(1.0, DrumType::Kick, 0.2, 1.0);
        let b = Hit::detected(1.0, DrumType::Kick, 0.9, 1.0);
        let notes = drum_notes(&[&a, &b], &clock, 48, &cfg);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].velocity, midi_velocity(0.9));
    }

    #[test]
    fn test_header_and_track_count() {
        let grid = Grid::new(120.0, 0.0, 4);
        let hits = vec![
            Hit::detected(0.0, DrumType::Kick, 1.0, 1.0),
            Hit::detected(0.5, DrumType::Snare, 1.0, 1.0),
        ];
        let p = pattern(hits, grid);

        let gm = write_midi(&p, &[], 120.0, &MidiConfig::default()).unwrap();
        assert_eq!(&gm[0..4], b"MThd");
        assert_eq!(&gm[8..14], &[0x00, 0x01, 0x00, 0x02, 0x01, 0xE0]);

        let melodic_cfg = MidiConfig {
            mapping: MidiMapping::Melodic,
            ..MidiConfig::default()
        };
        let melodic = write_midi(&p, &[], 120.0, &melodic_cfg).unwrap();
        assert_eq!(&melodic[10..12], &[0x00, 0x03]);
    }

    #[test]
    fn test_rejects_bad_tempo() {
        let p = pattern(Vec::new(), Grid::default());
        assert!(matches!(
            write_midi(&p, &[], 0.0, &MidiConfig::default()),
            Err(TranscribeError::MidiExportError(_))
        ));
    }
}
