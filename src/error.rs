use std::path::PathBuf;
use thiserror::Error;

/// Failures while turning note tokens into an event file.
#[derive(Error, Debug)]
pub enum MelodyError {
    #[error("Invalid note token '{token}': {reason}")]
    InvalidNoteToken { token: String, reason: String },
    #[error("Melody contains no notes")]
    EmptyMelody,
    #[error("Tempo of {0} bpm is outside the supported range")]
    InvalidTempo(u32),
    #[error("Malformed event file: {0}")]
    MalformedEventFile(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MelodyError {
    pub(crate) fn invalid_token(token: &str, reason: &str) -> Self {
        MelodyError::InvalidNoteToken {
            token: token.to_owned(),
            reason: reason.to_owned(),
        }
    }
}

/// Failures of the external synthesis engine.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Sound bank not found at {0}")]
    MissingSoundBank(PathBuf),
    #[error("Event file not found at {0}")]
    MissingEventFile(PathBuf),
    #[error("Failed to launch synthesis engine '{binary}': {source}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Synthesis engine exited with {status}: {stderr}")]
    EngineFailed { status: String, stderr: String },
    #[error("Synthesis engine produced no output at {0}")]
    NoOutput(PathBuf),
    #[error("Rendered waveform is unreadable: {0}")]
    InvalidAudio(#[from] hound::Error),
}

/// Anything that stops a generation request from producing audio.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("No API credential configured for the language model provider")]
    MissingCredential,
    #[error("Provider returned {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Provider returned an empty reply")]
    EmptyReply,
    #[error("Malformed reply: {0}")]
    MalformedReply(String),
    #[error(transparent)]
    Melody(#[from] MelodyError),
    #[error("Render failure: {0}")]
    Render(#[from] RenderError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GenerationError {
    /// HTTP status reported to clients: caller/melody problems are 4xx, provider
    /// trouble is 502 and local failures are 500.
    pub fn status_code(&self) -> u16 {
        match self {
            GenerationError::InvalidRequest(_) => 400,
            GenerationError::Melody(
                MelodyError::InvalidNoteToken { .. } | MelodyError::EmptyMelody,
            ) => 422,
            GenerationError::Provider { .. }
            | GenerationError::Http(_)
            | GenerationError::Json(_)
            | GenerationError::EmptyReply
            | GenerationError::MalformedReply(_) => 502,
            GenerationError::Melody(
                MelodyError::InvalidTempo(_) | MelodyError::MalformedEventFile(_) | MelodyError::Io(_),
            )
            | GenerationError::MissingCredential
            | GenerationError::Render(_)
            | GenerationError::Io(_) => 500,
        }
    }
}
