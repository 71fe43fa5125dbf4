use crate::error::RenderError;
use log::debug;
use std::path::{Path, PathBuf};

mod fluidsynth;

pub use fluidsynth::{
    DEFAULT_BINARY, DEFAULT_GAIN, DEFAULT_SAMPLE_RATE, DEFAULT_SOUND_BANK, FluidSynth,
};

/// Header facts about a rendered waveform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waveform {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames: u32,
}

impl Waveform {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }
}

pub trait RenderEngine: Send + Sync {
    /// Turn `event_file` into a waveform file at `output`.
    fn synthesize(&self, event_file: &Path, output: &Path) -> Result<(), RenderError>;

    fn render(&self, event_file: &Path, output: &Path) -> Result<PathBuf, RenderError> {
        if !event_file.is_file() {
            return Err(RenderError::MissingEventFile(event_file.to_path_buf()));
        }

        self.synthesize(event_file, output)?;

        let waveform = inspect_waveform(output)?;
        debug!(
            "Rendered '{}' -> '{}' ({} Hz, {} ch, {:.2}s)..!",
            event_file.display(),
            output.display(),
            waveform.sample_rate,
            waveform.channels,
            waveform.duration_secs()
        );

        Ok(output.to_path_buf())
    }
}

/// Check that `path` is a non-empty, readable WAV file.
pub fn inspect_waveform(path: &Path) -> Result<Waveform, RenderError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => {}
        _ => return Err(RenderError::NoOutput(path.to_path_buf())),
    }

    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    Ok(Waveform {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        frames: reader.duration(),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    struct Scribbler;

    impl RenderEngine for Scribbler {
        fn synthesize(&self, _event_file: &Path, output: &Path) -> Result<(), RenderError> {
            std::fs::write(output, b"RIFF but not really").map_err(|_| RenderError::NoOutput(output.into()))
        }
    }

    #[test]
    fn reads_a_real_wav_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..44_100 {
            writer.write_sample(0i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let waveform = inspect_waveform(&path).unwrap();
        assert_eq!(waveform.channels, 2);
        assert_eq!(waveform.frames, 44_100);
        assert!((waveform.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn missing_or_empty_output_is_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        assert!(matches!(inspect_waveform(&path), Err(RenderError::NoOutput(_))));

        std::fs::write(&path, b"").unwrap();
        assert!(matches!(inspect_waveform(&path), Err(RenderError::NoOutput(_))));
    }

    #[test]
    fn render_rejects_garbage_output() {
        let dir = tempfile::tempdir().unwrap();
        let midi = dir.path().join("melody.mid");
        std::fs::write(&midi, b"MThd").unwrap();

        let result = Scribbler.render(&midi, &dir.path().join("melody.wav"));
        assert!(matches!(result, Err(RenderError::InvalidAudio(_))));
    }

    #[test]
    fn render_requires_the_event_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = Scribbler.render(&dir.path().join("nope.mid"), &dir.path().join("out.wav"));
        assert!(matches!(result, Err(RenderError::MissingEventFile(_))));
    }
}
