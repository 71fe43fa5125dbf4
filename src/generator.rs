use crate::engine::RenderEngine;
use crate::error::GenerationError;
use crate::midi_exporter::{self, DEFAULT_TEMPO_BPM};
use crate::model::melody::Generation;
use crate::provider::ChatProvider;
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

pub const DEFAULT_SCALE: &str = "C_major";
pub const DEFAULT_LENGTH: usize = 16;
pub const MAX_LENGTH: usize = 128;

pub const MIDI_FILE_NAME: &str = "melody.mid";
pub const AUDIO_FILE_NAME: &str = "melody.wav";

const MELODY_LABEL: &str = "melody";
const DESCRIPTION_LABEL: &str = "description";

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// The prompt asks for exactly the two labelled lines that [`extract_generation`] reads.
pub fn build_prompt(scale: &str, length: usize) -> String {
    format!(
        "Generate a melody in the {scale} scale with {length} notes. Give every note an octave \
         (for example C4 or F#5), and feel free to use sharps (#) and flats (b). \
         Then write a 1-2 sentence description about what the melody represents.\n\
         Reply with exactly these two lines and nothing else:\n\
         Melody: <the {length} notes separated by single spaces, e.g. C4 E4 G4 Bb3>\n\
         Description: <the description>",
        scale = scale.replace('_', " "),
    )
}

/// Value of a `Label: value` line, ignoring label case and markdown decoration.
fn labelled<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let line = line.trim().trim_start_matches(['*', '#', '-']).trim_start();
    let (head, rest) = line.split_once(':')?;

    if !head.trim().trim_matches('*').trim().eq_ignore_ascii_case(label) {
        return None;
    }

    Some(rest.trim().trim_start_matches('*').trim())
}

/// Find the `Melody:` and `Description:` lines in a model reply.
pub fn extract_generation(reply: &str) -> Result<Generation, GenerationError> {
    if reply.trim().is_empty() {
        return Err(GenerationError::EmptyReply);
    }

    let mut melody: Option<&str> = None;
    let mut description: Option<&str> = None;

    for line in reply.lines() {
        if melody.is_none() {
            melody = labelled(line, MELODY_LABEL).filter(|m| !m.is_empty());
        }
        if description.is_none() {
            description = labelled(line, DESCRIPTION_LABEL).filter(|d| !d.is_empty());
        }
    }

    let melody = melody
        .ok_or_else(|| GenerationError::MalformedReply("reply has no 'Melody:' line".into()))?;
    let description = description.ok_or_else(|| {
        GenerationError::MalformedReply("reply has no 'Description:' line".into())
    })?;

    Ok(Generation {
        melody: melody.to_owned(),
        description: description.to_owned(),
    })
}

fn is_dash_separator(token: &str) -> bool {
    token.chars().all(|c| matches!(c, '-' | '–' | '—'))
}

/// Split a melody line on whitespace. Dashes standing alone between notes (`C4 - D4`)
/// are dropped; anything else left in a token is the note parser's problem.
pub fn split_tokens(melody: &str) -> Vec<&str> {
    melody
        .split_whitespace()
        .filter(|token| !is_dash_separator(token))
        .collect()
}

/// Encode `tokens` to `midi_path` and render them to `audio_path`.
pub fn render_melody<E: RenderEngine + ?Sized, S: AsRef<str>>(
    engine: &E,
    tokens: &[S],
    tempo_bpm: u32,
    midi_path: &Path,
    audio_path: &Path,
) -> Result<PathBuf, GenerationError> {
    let midi = midi_exporter::encode(tokens, tempo_bpm, midi_path)?;
    Ok(engine.render(&midi, audio_path)?)
}

/// Audio produced for one request. The files live in a private scratch directory that is
/// removed when this value is dropped.
#[derive(Debug)]
pub struct GeneratedAudio {
    pub request_id: u64,
    pub generation: Generation,
    pub midi_path: PathBuf,
    pub audio_path: PathBuf,
    workspace: TempDir,
}

impl GeneratedAudio {
    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    pub fn read_audio(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.audio_path)
    }

    /// Copy the waveform out of the scratch directory before it goes away.
    pub fn persist_to(self, dest: &Path) -> io::Result<PathBuf> {
        fs::copy(&self.audio_path, dest)?;
        Ok(dest.to_path_buf())
    }
}

pub struct Generator<P: ChatProvider, E: RenderEngine> {
    provider: P,
    engine: E,
    workdir: PathBuf,
    tempo_bpm: u32,
}

impl<P: ChatProvider, E: RenderEngine> Generator<P, E> {
    pub fn new(provider: P, engine: E) -> Self {
        Self {
            provider,
            engine,
            workdir: std::env::temp_dir(),
            tempo_bpm: DEFAULT_TEMPO_BPM,
        }
    }

    pub fn with_workdir<D: Into<PathBuf>>(mut self, workdir: D) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn with_tempo(mut self, tempo_bpm: u32) -> Self {
        self.tempo_bpm = tempo_bpm;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn generate(&self, scale: &str, length: usize) -> Result<GeneratedAudio, GenerationError> {
        let request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);

        let scale = scale.trim();
        if scale.is_empty() {
            return Err(GenerationError::InvalidRequest("scale must not be empty".into()));
        }
        if !(1..=MAX_LENGTH).contains(&length) {
            return Err(GenerationError::InvalidRequest(format!(
                "length must be between 1 and {MAX_LENGTH}"
            )));
        }

        info!("[req {}] Asking for {} notes in {}..!", request_id, length, scale);
        let reply = self.provider.complete(&build_prompt(scale, length))?;
        debug!("[req {}] Raw reply: {:?}", request_id, reply);

        let generation = extract_generation(&reply)?;
        let tokens = split_tokens(&generation.melody);
        if tokens.len() != length {
            warn!(
                "[req {}] Asked for {} notes but the reply has {}..!",
                request_id,
                length,
                tokens.len()
            );
        }

        fs::create_dir_all(&self.workdir)?;
        let workspace = tempfile::Builder::new()
            .prefix(&format!("tunesmith-{request_id}-"))
            .tempdir_in(&self.workdir)?;

        let midi_path = workspace.path().join(MIDI_FILE_NAME);
        let audio_path = workspace.path().join(AUDIO_FILE_NAME);

        render_melody(&self.engine, &tokens, self.tempo_bpm, &midi_path, &audio_path)
            .inspect_err(|why| warn!("[req {}] Generation failed: {}", request_id, why))?;

        info!(
            "[req {}] Rendered {} notes: '{}'..!",
            request_id,
            tokens.len(),
            generation.description
        );

        Ok(GeneratedAudio {
            request_id,
            generation,
            midi_path,
            audio_path,
            workspace,
        })
    }

    /// Plain pass-through to the provider, unrelated to melody generation.
    pub fn chat(&self, message: &str) -> Result<String, GenerationError> {
        if message.trim().is_empty() {
            return Err(GenerationError::InvalidRequest("No message provided".into()));
        }
        self.provider.complete(message)
    }
}
