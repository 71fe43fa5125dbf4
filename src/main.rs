use anyhow::Result;
use clap::Parser;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use tunesmith::{
    Args, Command, Generator, Melody, Settings, inspect_event_file, melody_to_bytes, pitch_label,
    render_melody, split_tokens, start_server,
};

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let settings = Settings::from_args(&args);
    debug!("Settings: {:?}", Settings { api_key: None, ..settings.clone() });

    match args.command {
        Command::Serve { bind, workers } => serve(&settings, &bind, workers),
        Command::Render {
            melody,
            out,
            midi_out,
            dry_run,
        } => {
            if dry_run {
                preview(&melody, settings.tempo_bpm)
            } else {
                let midi_out = midi_out.unwrap_or_else(|| out.with_extension("mid"));
                render(&settings, &melody, &midi_out, &out)
            }
        }
        Command::Generate { scale, length, out } => generate(&settings, &scale, length, &out),
    }
}

fn generator(settings: &Settings) -> Result<Generator<tunesmith::ChatClient, tunesmith::FluidSynth>> {
    Ok(Generator::new(settings.provider()?, settings.engine())
        .with_workdir(&settings.workdir)
        .with_tempo(settings.tempo_bpm))
}

fn serve(settings: &Settings, bind: &str, workers: usize) -> Result<()> {
    let generator = Arc::new(generator(settings)?);
    let handle = start_server(generator, bind, workers)?;

    let (done_tx, done_rx) = mpsc::channel::<()>();
    ctrlc::set_handler(move || {
        warn!("Ctrl-C received, shutting down..!");
        let _ = done_tx.send(());
    })?;

    let _ = done_rx.recv();
    handle.stop();
    info!("Server stopped, exiting..!");

    Ok(())
}

fn preview(melody: &str, tempo_bpm: u32) -> Result<()> {
    let tokens = split_tokens(melody);
    let melody = Melody::from_tokens(&tokens, tempo_bpm)?;
    let events = inspect_event_file(&melody_to_bytes(&melody)?)?;

    info!(
        "Previewing {} notes at {} bpm ({:.0}ms)..!",
        events.len(),
        tempo_bpm,
        melody.duration_ms()
    );
    for (i, ev) in events.iter().enumerate() {
        info!(
            "Event {}: note={} time_ms={:.3} dur_ms={:.3}",
            i,
            pitch_label(ev.note.midi),
            ev.time_ms,
            ev.duration_ms
        );
    }

    Ok(())
}

fn render(settings: &Settings, melody: &str, midi_out: &Path, out: &Path) -> Result<()> {
    let tokens = split_tokens(melody);
    info!("Rendering {} notes to '{}'...", tokens.len(), out.display());

    render_melody(&settings.engine(), &tokens, settings.tempo_bpm, midi_out, out)?;
    info!(
        "Wrote '{}' and '{}'..!",
        midi_out.display(),
        out.display()
    );

    Ok(())
}

fn generate(settings: &Settings, scale: &str, length: usize, out: &Path) -> Result<()> {
    let generator = generator(settings)?;
    let audio = generator.generate(scale, length)?;

    info!("Melody: {}", audio.generation.melody);
    let description = audio.generation.description.clone();
    let written = audio.persist_to(out)?;
    info!("Saved '{}'..!", written.display());

    println!("{description}");
    Ok(())
}
