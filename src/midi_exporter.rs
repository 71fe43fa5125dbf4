use crate::error::MelodyError;
use crate::model::melody::{Melody, Note, TimedNote};
use log::{debug, warn};
use midly::num::{u4, u7, u15, u24, u28};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Ticks per quarter note; every melody note lasts exactly this long.
pub const TICKS_PER_BEAT: u16 = 480;
pub const NOTE_VELOCITY: u8 = 64;
/// General MIDI program 0, acoustic grand piano.
pub const PROGRAM: u8 = 0;
pub const DEFAULT_TEMPO_BPM: u32 = 120;

// Bounded so that 60_000_000 / bpm always fits the 24-bit tempo field.
pub const MIN_TEMPO_BPM: u32 = 4;
pub const MAX_TEMPO_BPM: u32 = 1000;

const CHANNEL: u8 = 0;
const DEFAULT_MPQN: u32 = 500_000;
const TRACK_NAME: &[u8] = b"tunesmith melody";

/// Parse `notes`, lay them out one beat apart and write a single-track event file to `path`.
///
/// Every token is parsed before anything touches the filesystem, so a bad token leaves no file.
pub fn encode<S: AsRef<str>, P: AsRef<Path>>(
    notes: &[S],
    tempo_bpm: u32,
    path: P,
) -> Result<PathBuf, MelodyError> {
    let melody = Melody::from_tokens(notes, tempo_bpm)?;
    write_event_file(&melody, path)
}

pub fn write_event_file<P: AsRef<Path>>(melody: &Melody, path: P) -> Result<PathBuf, MelodyError> {
    let bytes = melody_to_bytes(melody)?;
    fs::write(path.as_ref(), &bytes)?;

    debug!(
        "Wrote {} notes ({} bytes, {:.0}ms) to '{}'..!",
        melody.len(),
        bytes.len(),
        melody.duration_ms(),
        path.as_ref().display()
    );

    Ok(path.as_ref().to_path_buf())
}

pub fn melody_to_bytes(melody: &Melody) -> Result<Vec<u8>, MelodyError> {
    let smf = melody_to_smf(melody);
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    Ok(buf)
}

fn midi_event(delta: u32, message: MidiMessage) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Midi {
            channel: u4::new(CHANNEL),
            message,
        },
    }
}

fn meta_event(delta: u32, message: MetaMessage<'static>) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Meta(message),
    }
}

fn melody_to_smf(melody: &Melody) -> Smf<'static> {
    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(TICKS_PER_BEAT)),
    ));

    let mut track: Track<'static> = Vec::with_capacity(melody.len() * 2 + 4);
    track.push(meta_event(0, MetaMessage::TrackName(TRACK_NAME)));
    track.push(meta_event(0, MetaMessage::Tempo(u24::new(melody.micros_per_beat()))));
    track.push(midi_event(
        0,
        MidiMessage::ProgramChange {
            program: u7::new(PROGRAM),
        },
    ));

    let mut last_tick: u32 = 0;
    for event in melody.events.iter() {
        let key = u7::new(event.note.midi);
        let vel = u7::new(event.note.velocity);

        track.push(midi_event(
            event.start_tick.saturating_sub(last_tick),
            MidiMessage::NoteOn { key, vel },
        ));
        track.push(midi_event(event.duration_ticks, MidiMessage::NoteOff { key, vel }));
        last_tick = event.end_tick();
    }

    track.push(meta_event(0, MetaMessage::EndOfTrack));
    smf.tracks.push(track);

    smf
}

#[derive(Debug, Clone)]
struct TempoSegment {
    mpqn: u32,
    start_tick: u64,
    ms_at_start: f64,
}

/// Read an event file back into timed notes, honouring any tempo changes.
pub fn read_event_file<P: AsRef<Path>>(path: P) -> Result<Vec<TimedNote>, MelodyError> {
    let bytes = fs::read(path.as_ref())?;
    inspect_event_file(&bytes)
}

pub fn inspect_event_file(bytes: &[u8]) -> Result<Vec<TimedNote>, MelodyError> {
    let smf = Smf::parse(bytes).map_err(|e| MelodyError::MalformedEventFile(e.to_string()))?;

    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(t) => t.as_int() as u64,
        Timing::Timecode(_fps, _subframe) => {
            return Err(MelodyError::MalformedEventFile(
                "SMPTE timecode timing is not supported".into(),
            ));
        }
    };

    // (tick, mpqn); 120bpm until a tempo meta appears
    let mut tempo_changes: Vec<(u64, u32)> = vec![(0, DEFAULT_MPQN)];
    // (key, start, end, velocity)
    let mut intervals: Vec<(u8, u64, u64, u8)> = Vec::new();
    let mut open_notes: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();

    for track in smf.tracks.iter() {
        let mut abs_tick: u64 = 0;
        for event in track.iter() {
            abs_tick = abs_tick.saturating_add(event.delta.as_int() as u64);

            match &event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(micro)) => {
                    tempo_changes.push((abs_tick, micro.as_int()));
                }
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            open_notes
                                .entry((ch, key.as_int()))
                                .or_default()
                                .push((abs_tick, vel.as_int()));
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            let key = key.as_int();
                            match open_notes.get_mut(&(ch, key)).and_then(|stack| stack.pop()) {
                                Some((start, vel)) => intervals.push((key, start, abs_tick, vel)),
                                None => debug!(
                                    "Orphaned NoteOff for {} ch{} at tick {}..!",
                                    key, ch, abs_tick
                                ),
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }

    for ((ch, key), stack) in open_notes.iter() {
        for (start, _) in stack {
            warn!("Dropping unclosed NoteOn for {}, channel: {} at tick: {}..!", key, ch, start);
        }
    }

    tempo_changes.sort_by_key(|(tick, _)| *tick);

    let mut segments: Vec<TempoSegment> = Vec::with_capacity(tempo_changes.len());
    let mut ms_accum = 0.0;
    let (mut last_tick, mut last_mpqn) = (0u64, DEFAULT_MPQN);
    for (tick, mpqn) in tempo_changes {
        ms_accum += (tick - last_tick) as f64 * last_mpqn as f64 / ticks_per_beat as f64 / 1000.0;
        segments.push(TempoSegment {
            mpqn,
            start_tick: tick,
            ms_at_start: ms_accum,
        });
        last_tick = tick;
        last_mpqn = mpqn;
    }

    let ticks_to_ms = |tick: u64| -> f64 {
        let segment = segments
            .iter()
            .rfind(|seg| seg.start_tick <= tick)
            .unwrap_or(&segments[0]);
        segment.ms_at_start
            + (tick - segment.start_tick) as f64 * segment.mpqn as f64 / ticks_per_beat as f64 / 1000.0
    };

    let mut notes: Vec<TimedNote> = intervals
        .into_iter()
        .map(|(midi, start, end, velocity)| {
            let time_ms = ticks_to_ms(start);
            TimedNote {
                note: Note { midi, velocity },
                time_ms,
                duration_ms: ticks_to_ms(end) - time_ms,
            }
        })
        .collect();

    notes.sort_by(|a, b| a.time_ms.total_cmp(&b.time_ms));

    Ok(notes)
}
