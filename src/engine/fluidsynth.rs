use crate::engine::RenderEngine;
use crate::error::RenderError;
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::process::Command;

pub const DEFAULT_BINARY: &str = "fluidsynth";
pub const DEFAULT_SOUND_BANK: &str = "/usr/share/sounds/sf2/FluidR3_GM.sf2";
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_GAIN: f32 = 0.2;

/// Renders event files by shelling out to the FluidSynth command line player.
#[derive(Debug, Clone)]
pub struct FluidSynth {
    binary: PathBuf,
    sound_bank: PathBuf,
    sample_rate: u32,
    gain: f32,
}

impl FluidSynth {
    pub fn new<P: Into<PathBuf>>(sound_bank: P) -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_BINARY),
            sound_bank: sound_bank.into(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            gain: DEFAULT_GAIN,
        }
    }

    pub fn with_binary<P: Into<PathBuf>>(mut self, binary: P) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn sound_bank(&self) -> &Path {
        &self.sound_bank
    }

    fn command(&self, event_file: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-ni")
            .arg("-g")
            .arg(self.gain.to_string())
            .arg(&self.sound_bank)
            .arg(event_file)
            .arg("-F")
            .arg(output)
            .arg("-r")
            .arg(self.sample_rate.to_string());
        cmd
    }
}

impl Default for FluidSynth {
    fn default() -> Self {
        Self::new(DEFAULT_SOUND_BANK)
    }
}

impl RenderEngine for FluidSynth {
    fn synthesize(&self, event_file: &Path, output: &Path) -> Result<(), RenderError> {
        if !self.sound_bank.is_file() {
            return Err(RenderError::MissingSoundBank(self.sound_bank.clone()));
        }

        debug!(
            "Running {} on '{}' with sound bank '{}'..!",
            self.binary.display(),
            event_file.display(),
            self.sound_bank.display()
        );

        let result = self
            .command(event_file, output)
            .output()
            .map_err(|source| RenderError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_owned();
            warn!("Synthesis engine failed ({}): {}", result.status, stderr);
            return Err(RenderError::EngineFailed {
                status: result.status.to_string(),
                stderr,
            });
        }

        if !output.is_file() {
            return Err(RenderError::NoOutput(output.to_path_buf()));
        }

        Ok(())
    }
}
