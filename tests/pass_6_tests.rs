//! Tests for Pass 6: Pattern generation & groove matching

use groovescribe::analysis::{DrumType, Hit, InstrumentSettings, PerInstrument};
use groovescribe::passes::pass_5::{quantize, DrumPattern, Grid};
use groovescribe::passes::pass_6::{
    best_pattern_for, default_grooves, generate, generate_named, match_groove, match_type,
    PatternName,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn straight_settings() -> PerInstrument<InstrumentSettings> {
    PerInstrument::splat(InstrumentSettings::new(50.0, 1.0, 4))
}

/// Shift every hit by up to `max_jitter` seconds
fn humanize(hits: &[Hit], max_jitter: f32, seed: u64) -> Vec<Hit> {
    let mut rng = StdRng::seed_from_u64(seed);
    hits.iter()
        .map(|h| Hit {
            time_seconds: (h.time_seconds + rng.gen_range(-max_jitter..max_jitter)).max(0.0),
            is_manual: false,
            is_quantized: false,
            ..*h
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_on_floor_two_bars() {
        let grid = Grid::new(120.0, 0.0, 4);
        let hits = generate_named("kick", "4-on-floor", 2, &grid).unwrap();
        let times: Vec<f32> = hits.iter().map(|h| h.time_seconds).collect();
        assert_eq!(times, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5]);
        assert!(hits.iter().all(|h| h.drum_type == DrumType::Kick));
        assert_eq!(hits[0].velocity, 1.0);
        assert_eq!(hits[1].velocity, 0.9);
        assert_eq!(hits[4].velocity, 1.0);
    }

    #[test]
    fn test_unknown_names_are_errors() {
        let grid = Grid::default();
        assert!(generate_named("cowbell", "4-on-floor", 1, &grid).is_err());
        assert!(generate_named("kick", "samba", 1, &grid).is_err());
    }

    #[test]
    fn test_pattern_counts_per_bar() {
        let grid = Grid::new(100.0, 0.0, 4);
        let count = |name| generate(DrumType::Hihat, name, 1, &grid).len();
        assert_eq!(count(PatternName::FourOnFloor), 4);
        assert_eq!(count(PatternName::Offbeat), 4);
        assert_eq!(count(PatternName::TwoAndFour), 2);
        assert_eq!(count(PatternName::Backbeat), 1);
        assert_eq!(count(PatternName::Eighths), 8);
        assert_eq!(count(PatternName::Sixteenths), 16);

        let three_four = Grid::new(100.0, 0.0, 3);
        assert_eq!(generate(DrumType::Kick, PatternName::FourOnFloor, 2, &three_four).len(), 6);
    }

    #[test]
    fn test_generated_pattern_scores_100() {
        let grid = Grid::new(120.0, 0.25, 4);
        for name in PatternName::ALL {
            let hits = generate(DrumType::Snare, name, 4, &grid);
            let pattern = DrumPattern::from_hits(hits, grid, straight_settings());
            assert_eq!(match_type(&pattern, DrumType::Snare, name), 100.0, "{}", name);
        }
    }

    #[test]
    fn test_humanized_groove_still_matches() {
        let grid = Grid::new(124.0, 0.0, 4);
        let mut hits = generate(DrumType::Kick, PatternName::FourOnFloor, 4, &grid);
        hits.extend(generate(DrumType::Hihat, PatternName::Offbeat, 4, &grid));
        hits.extend(generate(DrumType::Clap, PatternName::TwoAndFour, 4, &grid));
        let loose = humanize(&hits, 0.02, 8);

        let pattern = quantize(&loose, &grid, &straight_settings(), 0.04);
        let groove = match_groove(&pattern, &default_grooves(), 60.0).unwrap();
        assert_eq!(groove.name, "four_on_floor");
        assert!(groove.score > 99.0);

        let (best, score) = best_pattern_for(&pattern, DrumType::Hihat).unwrap();
        assert_eq!(best, PatternName::Offbeat);
        assert_eq!(score, 100.0);
    }

    #[test]
    fn test_threshold_is_respected() {
        let grid = Grid::new(120.0, 0.0, 4);
        let hits = generate(DrumType::Hihat, PatternName::Sixteenths, 2, &grid);
        let pattern = DrumPattern::from_hits(hits, grid, straight_settings());
        // Only the hat part of trap_16ths is present: mean score 50
        assert!(match_groove(&pattern, &default_grooves(), 60.0).is_none());
        let low = match_groove(&pattern, &default_grooves(), 40.0).unwrap();
        assert_eq!(low.name, "trap_16ths");
    }
}
