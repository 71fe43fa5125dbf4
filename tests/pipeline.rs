use std::path::Path;
use std::sync::Arc;
use std::thread;
use tunesmith::{
    ChatProvider, GenerationError, Generator, RenderEngine, RenderError, inspect_waveform,
    read_event_file, start_server,
};

const SAMPLE_RATE: u32 = 8_000;

/// Answers every prompt with the same text.
struct Scripted(&'static str);

impl ChatProvider for Scripted {
    fn complete(&self, _prompt: &str) -> Result<String, GenerationError> {
        if self.0.is_empty() {
            return Err(GenerationError::EmptyReply);
        }
        Ok(self.0.to_owned())
    }
}

/// Writes a silent WAV exactly as long as the event file it is given.
struct Silence;

impl RenderEngine for Silence {
    fn synthesize(&self, event_file: &Path, output: &Path) -> Result<(), RenderError> {
        let notes = read_event_file(event_file)
            .map_err(|_| RenderError::MissingEventFile(event_file.to_path_buf()))?;
        let end_ms = notes
            .iter()
            .map(|n| n.time_ms + n.duration_ms)
            .fold(0.0, f64::max);
        let frames = (end_ms / 1000.0 * SAMPLE_RATE as f64).round() as u32;

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(output, spec)?;
        for _ in 0..frames {
            writer.write_sample(0i16)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

#[test]
fn generate_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Generator::new(
        Scripted("Sure!\nMelody: C4 D4 E4 F4\nDescription: A short climb."),
        Silence,
    )
    .with_workdir(dir.path())
    .with_tempo(120);

    let audio = generator.generate("C_major", 4).unwrap();
    assert_eq!(audio.generation.melody, "C4 D4 E4 F4");

    let notes = read_event_file(&audio.midi_path).unwrap();
    let pitches: Vec<u8> = notes.iter().map(|n| n.note.midi).collect();
    assert_eq!(pitches, vec![60, 62, 64, 65]);

    let waveform = inspect_waveform(&audio.audio_path).unwrap();
    assert!((waveform.duration_secs() - 2.0).abs() < 1e-3);

    let out = dir.path().join("kept.wav");
    audio.persist_to(&out).unwrap();
    assert!(out.is_file());

    // only the persisted copy survives the workspace
    let left: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(left.len(), 1);
}

#[test]
fn empty_reply_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Generator::new(Scripted(""), Silence).with_workdir(dir.path());

    let err = generator.generate("A_minor", 8).unwrap_err();
    assert!(matches!(err, GenerationError::EmptyReply));
    assert_eq!(err.status_code(), 502);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn concurrent_generations_do_not_share_files() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Arc::new(
        Generator::new(Scripted("Melody: A4 B4 C5\nDescription: Three steps."), Silence)
            .with_workdir(dir.path()),
    );

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let generator = Arc::clone(&generator);
            thread::spawn(move || generator.generate("A_minor", 3).unwrap())
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let mut workspaces: Vec<_> = results.iter().map(|a| a.workspace().to_path_buf()).collect();
    workspaces.sort();
    workspaces.dedup();
    assert_eq!(workspaces.len(), 4);

    let mut ids: Vec<_> = results.iter().map(|a| a.request_id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);

    for audio in &results {
        let notes = read_event_file(&audio.midi_path).unwrap();
        assert_eq!(notes.len(), 3);
        assert_eq!(notes[2].note.midi, 72);
    }
}

fn allows_any_origin(response: &reqwest::blocking::Response) -> bool {
    response
        .headers()
        .get("access-control-allow-origin")
        .and_then(|v| v.to_str().ok())
        == Some("*")
}

#[test]
fn serves_wav_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Arc::new(
        Generator::new(Scripted("Melody: G4 G4 D5 D5\nDescription: Twinkle."), Silence)
            .with_workdir(dir.path()),
    );
    let handle = start_server(generator, "127.0.0.1:0", 2).unwrap();
    let base = format!("http://{}", handle.addr());
    let client = reqwest::blocking::Client::new();

    let response = client
        .post(format!("{base}/generate-music"))
        .json(&serde_json::json!({"scale": "G_major", "length": 4}))
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(allows_any_origin(&response));
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "audio/wav"
    );
    assert!(
        response.headers()["content-disposition"]
            .to_str()
            .unwrap()
            .contains("melody.wav")
    );
    let body = response.bytes().unwrap();
    assert_eq!(&body[..4], b"RIFF");

    let response = client
        .post(format!("{base}/generate-music"))
        .json(&serde_json::json!({"scale": "G_major", "length": 0}))
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    assert!(allows_any_origin(&response));

    let response = client.get(format!("{base}/missing")).send().unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert!(allows_any_origin(&response));

    handle.stop();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
