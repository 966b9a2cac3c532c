use anyhow::Context;
use clap::{Parser, Subcommand};
use groovescribe::analysis::DownbeatAnchor;
use groovescribe::config::{GenrePreset, MidiMapping};
use groovescribe::passes::{pass_5, pass_6};
use groovescribe::{midi, validate_input, Config, Transcriber};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Groove transcription: tempo, chords and drum hits to MIDI
#[derive(Parser)]
#[command(name = "groovescribe")]
#[command(about = "Extract tempo, downbeat, chords and drum hits from audio and export MIDI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an audio file and write analysis.json and transcription.mid
    Analyze {
        /// Input audio file (WAV)
        input: PathBuf,

        /// Output directory for results
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,

        /// Custom configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Genre quantization preset (four_on_floor, afro_house, trap, breakbeat, custom)
        #[arg(long)]
        preset: Option<String>,

        /// Drum note mapping (gm_drums, melodic)
        #[arg(long)]
        mapping: Option<String>,

        /// Leave the chord track out of the MIDI file
        #[arg(long)]
        no_chords: bool,

        /// Fixed downbeat time in seconds
        #[arg(long)]
        downbeat: Option<f32>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Quiet output
        #[arg(short, long)]
        quiet: bool,
    },
    /// Write a generated pattern as MIDI
    Generate {
        /// Drum type (kick, snare, hihat, clap, tom, perc)
        drum_type: String,

        /// Pattern (4-on-floor, offbeat, 2-and-4, backbeat, 8ths, 16ths)
        pattern: String,

        #[arg(long, default_value_t = 4)]
        bars: u32,

        #[arg(long, default_value_t = 120.0)]
        bpm: f32,

        #[arg(long, default_value_t = 4)]
        beats_per_bar: u32,

        /// Custom configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output MIDI file
        #[arg(short, long, default_value = "pattern.mid")]
        output: PathBuf,
    },
    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Show default configuration
    ShowConfig,
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Parse a config enum from its snake_case name
fn parse_name<T: DeserializeOwned>(what: &str, value: &str) -> anyhow::Result<T> {
    let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
    serde_json::from_value(serde_json::Value::String(normalized))
        .with_context(|| format!("unknown {} '{}'", what, value))
}

fn load_or_default(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => groovescribe::config::load_config(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            output,
            config,
            preset,
            mapping,
            no_chords,
            downbeat,
            verbose,
            quiet,
        } => {
            if verbose && quiet {
                anyhow::bail!("Cannot specify both --verbose and --quiet");
            }
            init_logging(verbose, quiet);

            let mut config = load_or_default(config.as_deref())?;
            if let Some(preset) = preset {
                config.grid.genre_preset = parse_name::<GenrePreset>("preset", &preset)?;
            }
            if let Some(mapping) = mapping {
                config.midi.mapping = parse_name::<MidiMapping>("mapping", &mapping)?;
            }
            if no_chords {
                config.midi.include_chords = false;
            }

            validate_input(&input, &config)?;

            let mut processor = Transcriber::new(config)?;
            if let Some(time) = downbeat {
                let anchor = DownbeatAnchor::new(time, processor.config().grid.beats_per_bar);
                processor = processor.with_downbeat(anchor);
            }

            log::info!("Processing {}...", input.display());
            let analysis = processor.process(&input, &output)?;

            match analysis.bpm {
                Some(bpm) => log::info!("Tempo: {:.1} BPM", bpm),
                None => log::info!("Tempo: uncertain (grid at {:.1} BPM)", analysis.grid_bpm),
            }
            for warning in &analysis.warnings {
                log::warn!("{}", warning);
            }
            log::info!("Results saved to {}", output.display());
        }
        Commands::Generate {
            drum_type,
            pattern,
            bars,
            bpm,
            beats_per_bar,
            config,
            output,
        } => {
            init_logging(false, false);
            let config = load_or_default(config.as_deref())?;
            let grid = pass_5::Grid::new(bpm, 0.0, beats_per_bar);
            let hits = pass_6::generate_named(&drum_type, &pattern, bars, &grid)?;
            let pattern =
                pass_5::DrumPattern::from_hits(hits, grid, config.grid.instrument_settings());
            let bytes = midi::write_midi(&pattern, &[], bpm, &config.midi)?;
            std::fs::write(&output, bytes)
                .with_context(|| format!("writing {}", output.display()))?;
            log::info!("Wrote {} hits to {}", pattern.hits.len(), output.display());
        }
        Commands::ValidateConfig { config } => {
            let config = groovescribe::config::load_config(config)?;
            println!("Configuration is valid");
            if let Ok(json) = serde_json::to_string_pretty(&config) {
                println!("{}", json);
            }
        }
        Commands::ShowConfig => {
            let config = Config::default();
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
    }

    Ok(())
}
