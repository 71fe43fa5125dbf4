use crate::error::MelodyError;

/// Lowest octave a token may name (`C0` = 12).
pub const MIN_OCTAVE: u32 = 0;

/// Highest octave a token may name. Only `C9`..=`G9` fit below 128 there.
pub const MAX_OCTAVE: u32 = 9;

// -----------------------------------------------------------------------------
// Spelling -> semitone offset within the written octave.
//
// - enharmonic spellings share an offset (C# = Db, D# = Eb, ...).
// - Cb and B# cross the octave line: Cb4 sounds as B3 and B#3 as C4.
// -----------------------------------------------------------------------------

pub const PITCH_CLASSES: &[(&str, i32)] = &[
    ("Cb", -1),
    ("C", 0),
    ("B#", 12),
    ("C#", 1),
    ("Db", 1),
    ("D", 2),
    ("D#", 3),
    ("Eb", 3),
    ("E", 4),
    ("Fb", 4),
    ("E#", 5),
    ("F", 5),
    ("F#", 6),
    ("Gb", 6),
    ("G", 7),
    ("G#", 8),
    ("Ab", 8),
    ("A", 9),
    ("A#", 10),
    ("Bb", 10),
    ("B", 11),
];

const SHARP_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

pub fn offset_for(spelling: &str) -> Option<i32> {
    PITCH_CLASSES
        .iter()
        .find(|(name, _)| *name == spelling)
        .map(|&(_, offset)| offset)
}

/// Parse a note token such as `C4`, `F#5` or `Bb3` into a MIDI pitch number.
///
/// Tokens are a pitch letter, an optional `#`/`b` accidental and a single octave
/// digit. The pitch is `12 + octave * 12 + offset`, so `C4` is 60.
pub fn parse_note(token: &str) -> Result<u8, MelodyError> {
    if !token.is_ascii() {
        return Err(MelodyError::invalid_token(token, "token must be plain ASCII"));
    }

    let (spelling, octave) = match token.len() {
        2 => token.split_at(1),
        3 => token.split_at(2),
        _ => {
            return Err(MelodyError::invalid_token(
                token,
                "expected a letter, an optional accidental and an octave digit",
            ));
        }
    };

    let offset = offset_for(spelling).ok_or_else(|| {
        MelodyError::invalid_token(token, "unknown pitch letter or accidental")
    })?;

    let octave = match octave.chars().next().and_then(|c| c.to_digit(10)) {
        Some(o) if (MIN_OCTAVE..=MAX_OCTAVE).contains(&o) => o as i32,
        _ => return Err(MelodyError::invalid_token(token, "octave is not a digit")),
    };

    let pitch = 12 + octave * 12 + offset;
    if !(0..=127).contains(&pitch) {
        return Err(MelodyError::invalid_token(token, "pitch is outside the MIDI range"));
    }

    Ok(pitch as u8)
}

/// Sharp-spelled label for a MIDI pitch, e.g. `"C#4 (61)"`.
pub fn pitch_label(midi: u8) -> String {
    let octave = (midi / 12) as i32 - 1;
    format!("{}{} ({})", SHARP_NAMES[(midi % 12) as usize], octave, midi)
}
