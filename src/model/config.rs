use crate::engine::{
    DEFAULT_BINARY, DEFAULT_GAIN, DEFAULT_SAMPLE_RATE, DEFAULT_SOUND_BANK, FluidSynth,
};
use crate::error::GenerationError;
use crate::generator::{DEFAULT_LENGTH, DEFAULT_SCALE};
use crate::midi_exporter::{DEFAULT_TEMPO_BPM, MAX_TEMPO_BPM, MIN_TEMPO_BPM};
use crate::provider::{ChatClient, DEFAULT_API_BASE, DEFAULT_MODEL};
use crate::server::{DEFAULT_BIND, DEFAULT_WORKERS};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tunesmith",
    about = "Ask a language model for a melody and hear it!"
)]
pub struct Args {
    /// API credential for the language model provider.
    #[arg(long, env = "API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible provider.
    #[arg(long, env = "TUNESMITH_API_BASE", default_value = DEFAULT_API_BASE, global = true)]
    pub api_base: String,

    /// Model identifier sent with every chat request.
    #[arg(long, env = "TUNESMITH_MODEL", default_value = DEFAULT_MODEL, global = true)]
    pub model: String,

    /// SoundFont handed to the synthesis engine.
    #[arg(long, env = "TUNESMITH_SOUNDFONT", default_value = DEFAULT_SOUND_BANK, global = true)]
    pub soundfont: PathBuf,

    /// FluidSynth executable.
    #[arg(long, default_value = DEFAULT_BINARY, global = true)]
    pub fluidsynth: PathBuf,

    /// Output sample rate in Hz.
    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE, global = true)]
    pub sample_rate: u32,

    /// Synthesizer gain.
    #[arg(long, default_value_t = DEFAULT_GAIN, global = true)]
    pub gain: f32,

    /// Tempo in beats per minute; every note lasts one beat.
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_TEMPO_BPM,
        value_parser = clap::value_parser!(u32).range(MIN_TEMPO_BPM as i64..=MAX_TEMPO_BPM as i64),
        global = true
    )]
    pub tempo: u32,

    /// Directory that holds the per-request scratch directories.
    #[arg(long, env = "TUNESMITH_WORKDIR", global = true)]
    pub workdir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP service.
    Serve {
        /// Address to listen on.
        #[arg(short, long, default_value = DEFAULT_BIND)]
        bind: String,

        /// Number of request worker threads.
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,
    },

    /// Encode a literal melody such as "C4 E4 G4" and render it.
    Render {
        /// Space separated note tokens.
        melody: String,

        /// Where to write the waveform.
        #[arg(short, long, default_value = "melody.wav")]
        out: PathBuf,

        /// Where to write the event file. Defaults to the waveform path with a .mid extension.
        #[arg(long)]
        midi_out: Option<PathBuf>,

        /// Print the encoded events and skip rendering.
        #[arg(short, long, default_value_t = false)]
        dry_run: bool,
    },

    /// Generate one melody and write it to disk.
    Generate {
        #[arg(short, long, default_value = DEFAULT_SCALE)]
        scale: String,

        #[arg(short, long, default_value_t = DEFAULT_LENGTH)]
        length: usize,

        /// Where to write the waveform.
        #[arg(short, long, default_value = "melody.wav")]
        out: PathBuf,
    },
}

/// Runtime settings shared by every request.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub soundfont: PathBuf,
    pub fluidsynth: PathBuf,
    pub sample_rate: u32,
    pub gain: f32,
    pub tempo_bpm: u32,
    pub workdir: PathBuf,
}

impl Settings {
    pub fn from_args(args: &Args) -> Self {
        Self {
            api_key: args.api_key.clone(),
            api_base: args.api_base.clone(),
            model: args.model.clone(),
            soundfont: args.soundfont.clone(),
            fluidsynth: args.fluidsynth.clone(),
            sample_rate: args.sample_rate,
            gain: args.gain,
            tempo_bpm: args.tempo,
            workdir: args.workdir.clone().unwrap_or_else(std::env::temp_dir),
        }
    }

    pub fn engine(&self) -> FluidSynth {
        FluidSynth::new(&self.soundfont)
            .with_binary(&self.fluidsynth)
            .with_sample_rate(self.sample_rate)
            .with_gain(self.gain)
    }

    pub fn provider(&self) -> Result<ChatClient, GenerationError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(GenerationError::MissingCredential)?;
        ChatClient::new(&self.api_base, key, &self.model)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serve_defaults() {
        let args = Args::try_parse_from(["tunesmith", "serve"]).unwrap();
        let Command::Serve { bind, workers } = &args.command else {
            panic!("expected serve, got {:?}", args.command);
        };
        assert_eq!(bind, DEFAULT_BIND);
        assert_eq!(*workers, DEFAULT_WORKERS);

        let settings = Settings::from_args(&args);
        assert_eq!(settings.tempo_bpm, 120);
        assert_eq!(settings.soundfont, PathBuf::from(DEFAULT_SOUND_BANK));
        assert_eq!(settings.engine().sound_bank(), settings.soundfont.as_path());
    }

    #[test]
    fn global_options_after_subcommand() {
        let args = Args::try_parse_from([
            "tunesmith", "render", "C4 E4 G4", "--tempo", "90", "--dry-run", "--soundfont", "/tmp/x.sf2",
        ])
        .unwrap();

        assert_eq!(args.tempo, 90);
        assert_eq!(args.soundfont, PathBuf::from("/tmp/x.sf2"));
        assert!(matches!(
            args.command,
            Command::Render { ref melody, dry_run: true, .. } if melody == "C4 E4 G4"
        ));
    }

    #[test]
    fn tempo_out_of_range_is_rejected_at_startup() {
        for tempo in ["0", "3", "1001"] {
            assert!(Args::try_parse_from(["tunesmith", "--tempo", tempo, "serve"]).is_err(), "{tempo}");
        }
        let args = Args::try_parse_from(["tunesmith", "--tempo", "1000", "serve"]).unwrap();
        assert_eq!(args.tempo, MAX_TEMPO_BPM);
    }

    #[test]
    fn provider_needs_a_key() {
        let args = Args::try_parse_from(["tunesmith", "--api-key", "", "generate"]).unwrap();
        let mut settings = Settings::from_args(&args);
        assert!(matches!(settings.provider(), Err(GenerationError::MissingCredential)));

        settings.api_key = None;
        assert!(matches!(settings.provider(), Err(GenerationError::MissingCredential)));

        settings.api_key = Some("sk-test".into());
        assert!(settings.provider().is_ok());
    }
}
