//! Tests for MIDI export

use groovescribe::analysis::{chord_symbol, ChordEvent, ChordQuality, DrumType, Hit, PitchClass};
use groovescribe::analysis::{InstrumentSettings, PerInstrument};
use groovescribe::config::{MidiConfig, MidiMapping};
use groovescribe::midi::write_midi;
use groovescribe::passes::pass_5::{DrumPattern, Grid};
use groovescribe::passes::pass_6::{generate, PatternName};
use midly::{MidiMessage, Smf, TrackEventKind};

fn pattern_of(hits: Vec<Hit>, grid: Grid) -> DrumPattern {
    DrumPattern::from_hits(
        hits,
        grid,
        PerInstrument::splat(InstrumentSettings::default()),
    )
}

fn chord(start: f32, end: f32, root: PitchClass, quality: ChordQuality) -> ChordEvent {
    ChordEvent {
        start_time: start,
        end_time: end,
        root,
        quality,
        symbol: chord_symbol(root, quality),
        confidence: 0.9,
        source_notes: Vec::new(),
    }
}

/// (absolute tick, channel, key, velocity) of every note-on in a track
fn note_ons(smf: &Smf, track: usize) -> Vec<(u32, u8, u8, u8)> {
    let mut tick = 0u32;
    let mut out = Vec::new();
    for event in &smf.tracks[track] {
        tick += event.delta.as_int();
        if let TrackEventKind::Midi {
            channel,
            message: MidiMessage::NoteOn { key, vel },
        } = event.kind
        {
            if vel.as_int() > 0 {
                out.push((tick, channel.as_int(), key.as_int(), vel.as_int()));
            }
        }
    }
    out
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_and_meta_bytes() {
        let grid = Grid::new(120.0, 0.0, 4);
        let pattern = pattern_of(generate(DrumType::Kick, PatternName::FourOnFloor, 1, &grid), grid);
        let bytes = write_midi(&pattern, &[], 120.0, &MidiConfig::default()).unwrap();

        assert_eq!(&bytes[0..4], b"MThd");
        assert_eq!(&bytes[4..8], &[0, 0, 0, 6]);
        assert_eq!(&bytes[8..10], &[0x00, 0x01]);
        assert_eq!(&bytes[12..14], &[0x01, 0xE0]);
        assert!(contains(&bytes, &[0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]));
        assert!(contains(&bytes, &[0xFF, 0x58, 0x04, 0x04, 0x02, 0x18, 0x08]));
    }

    #[test]
    fn test_gm_drum_track() {
        let grid = Grid::new(120.0, 0.0, 4);
        let mut hits = generate(DrumType::Kick, PatternName::FourOnFloor, 1, &grid);
        hits.extend(generate(DrumType::Snare, PatternName::TwoAndFour, 1, &grid));
        let bytes = write_midi(&pattern_of(hits, grid), &[], 120.0, &MidiConfig::default()).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 2);

        let ons = note_ons(&smf, 1);
        assert_eq!(ons.len(), 6);
        assert!(ons.iter().all(|&(_, ch, _, _)| ch == 9));
        assert_eq!(ons[0], (0, 9, 36, 127));
        let snares: Vec<u32> = ons.iter().filter(|n| n.2 == 38).map(|n| n.0).collect();
        assert_eq!(snares, vec![480, 1440]);
    }

    #[test]
    fn test_melodic_tracks_and_custom_pitches() {
        let grid = Grid::new(120.0, 0.0, 4);
        let mut hits = generate(DrumType::Kick, PatternName::FourOnFloor, 1, &grid);
        hits.extend(generate(DrumType::Hihat, PatternName::Eighths, 1, &grid));
        let mut cfg = MidiConfig {
            mapping: MidiMapping::Melodic,
            ..MidiConfig::default()
        };
        cfg.melodic_pitches.hihat = 60;
        let bytes = write_midi(&pattern_of(hits, grid), &[], 120.0, &cfg).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 3);

        let kicks = note_ons(&smf, 1);
        let hats = note_ons(&smf, 2);
        assert_eq!(kicks.len(), 4);
        assert_eq!(hats.len(), 8);
        assert!(kicks.iter().all(|n| n.1 == 0 && n.2 == 36));
        assert!(hats.iter().all(|n| n.1 == 0 && n.2 == 60));
        // Off-beat eighths carry velocity 0.7
        assert_eq!(hats[1].3, 89);
    }

    #[test]
    fn test_chord_track() {
        let grid = Grid::new(120.0, 0.0, 4);
        let pattern = pattern_of(generate(DrumType::Kick, PatternName::FourOnFloor, 1, &grid), grid);
        let chords = vec![
            chord(0.0, 1.0, PitchClass::A, ChordQuality::Min),
            chord(1.0, 2.0, PitchClass::F, ChordQuality::Maj),
        ];

        let bytes = write_midi(&pattern, &chords, 120.0, &MidiConfig::default()).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 3);
        let ons = note_ons(&smf, 2);
        let keys: Vec<u8> = ons.iter().map(|n| n.2).collect();
        // A3 minor triad then F3 major triad
        assert_eq!(keys, vec![57, 60, 64, 53, 57, 60]);
        assert!(ons.iter().all(|n| n.1 == 1 && n.3 == 80));
        assert_eq!(ons[3].0, 960);

        let no_chords = MidiConfig {
            include_chords: false,
            ..MidiConfig::default()
        };
        let bytes = write_midi(&pattern, &chords, 120.0, &no_chords).unwrap();
        assert_eq!(Smf::parse(&bytes).unwrap().tracks.len(), 2);
    }

    #[test]
    fn test_alignment_moves_first_bar_to_zero() {
        let grid = Grid::new(120.0, 0.0, 4);
        let late = Grid::new(120.0, 4.0, 4);
        let hits = generate(DrumType::Kick, PatternName::FourOnFloor, 1, &late);
        let pattern = pattern_of(hits, grid);

        let aligned = write_midi(&pattern, &[], 120.0, &MidiConfig::default()).unwrap();
        let smf = Smf::parse(&aligned).unwrap();
        assert_eq!(note_ons(&smf, 1)[0].0, 0);

        let absolute = MidiConfig {
            align_to_downbeat: false,
            ..MidiConfig::default()
        };
        let bytes = write_midi(&pattern, &[], 120.0, &absolute).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(note_ons(&smf, 1)[0].0, 3840);
    }
}
