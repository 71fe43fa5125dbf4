use crate::error::MelodyError;
use crate::midi_exporter::{MAX_TEMPO_BPM, MIN_TEMPO_BPM, NOTE_VELOCITY, TICKS_PER_BEAT};
use crate::model::notes::parse_note;
use serde::{Deserialize, Serialize};

const MICROSECONDS_PER_MINUTE: u32 = 60_000_000;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Note {
    pub midi: u8,
    pub velocity: u8,
}

/// A note placed on the event-file grid.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub note: Note,
    pub start_tick: u32,
    pub duration_ticks: u32,
}

impl NoteEvent {
    pub fn end_tick(&self) -> u32 {
        self.start_tick + self.duration_ticks
    }
}

/// A note read back from an event file, in wall-clock time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimedNote {
    pub note: Note,
    pub time_ms: f64,
    pub duration_ms: f64,
}

/// A monophonic line of one-beat notes at a fixed tempo.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Melody {
    pub tempo_bpm: u32,
    pub events: Vec<NoteEvent>,
}

impl Melody {
    /// Parse every token and lay the notes out back to back, one beat each.
    ///
    /// Fails on the first token that doesn't parse; nothing is returned for the others.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S], tempo_bpm: u32) -> Result<Self, MelodyError> {
        if !(MIN_TEMPO_BPM..=MAX_TEMPO_BPM).contains(&tempo_bpm) {
            return Err(MelodyError::InvalidTempo(tempo_bpm));
        }

        if tokens.is_empty() {
            return Err(MelodyError::EmptyMelody);
        }

        let beat = TICKS_PER_BEAT as u32;
        let events = tokens
            .iter()
            .enumerate()
            .map(|(i, token)| {
                parse_note(token.as_ref()).map(|midi| NoteEvent {
                    note: Note {
                        midi,
                        velocity: NOTE_VELOCITY,
                    },
                    start_tick: i as u32 * beat,
                    duration_ticks: beat,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { tempo_bpm, events })
    }

    pub fn micros_per_beat(&self) -> u32 {
        MICROSECONDS_PER_MINUTE / self.tempo_bpm
    }

    pub fn beat_ms(&self) -> f64 {
        60_000.0 / self.tempo_bpm as f64
    }

    pub fn duration_ms(&self) -> f64 {
        let end = self.events.last().map(|e| e.end_tick()).unwrap_or(0);
        end as f64 / TICKS_PER_BEAT as f64 * self.beat_ms()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Melody text and description pulled out of a model reply.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub melody: String,
    pub description: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn triad_at_120_bpm() {
        let melody = Melody::from_tokens(&["C4", "E4", "G4"], 120).unwrap();

        assert_eq!(melody.len(), 3);
        assert_eq!(melody.micros_per_beat(), 500_000);
        assert!((melody.beat_ms() - 500.0).abs() < f64::EPSILON);
        assert!((melody.duration_ms() - 1500.0).abs() < f64::EPSILON);

        let pitches: Vec<u8> = melody.events.iter().map(|e| e.note.midi).collect();
        assert_eq!(pitches, vec![60, 64, 67]);
    }

    #[test]
    fn events_are_back_to_back() {
        let melody = Melody::from_tokens(&["C4", "D4", "Eb4", "F#4", "G4"], 90).unwrap();

        for pair in melody.events.windows(2) {
            assert_eq!(pair[0].end_tick(), pair[1].start_tick);
            assert!(pair[0].start_tick < pair[1].start_tick);
        }
        assert!(melody.events.iter().all(|e| e.note.velocity == NOTE_VELOCITY));
    }

    #[test]
    fn one_bad_token_fails_the_whole_melody() {
        let result = Melody::from_tokens(&["C4", "H4", "G4"], 120);
        assert!(matches!(
            result,
            Err(MelodyError::InvalidNoteToken { ref token, .. }) if token == "H4"
        ));
    }

    #[test]
    fn empty_and_out_of_range_tempo() {
        let none: [&str; 0] = [];
        assert!(matches!(Melody::from_tokens(&none, 120), Err(MelodyError::EmptyMelody)));
        assert!(matches!(Melody::from_tokens(&["C4"], 0), Err(MelodyError::InvalidTempo(0))));
        assert!(matches!(
            Melody::from_tokens(&["C4"], MAX_TEMPO_BPM + 1),
            Err(MelodyError::InvalidTempo(_))
        ));
    }
}
