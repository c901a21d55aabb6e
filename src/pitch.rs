//! Conversions between note names such as `C4` / `D3#` and MIDI pitch numbers.
//!
//! Names use scientific pitch notation with middle C (60) as `C4`. Sharps are
//! written after the octave (`D3#`), which is how the built-in key tables spell
//! them; the parser also accepts the conventional `D#3` spelling. Flats are
//! never produced or accepted.

use crate::error::{ProfileError, Result};

/// MIDI note number, 0..=127.
pub type Pitch = u8;

const SEMITONES: [(char, u8); 7] = [
    ('C', 0),
    ('D', 2),
    ('E', 4),
    ('F', 5),
    ('G', 7),
    ('A', 9),
    ('B', 11),
];

// Spelling of each pitch class: natural letter plus sharp flag.
const PITCH_CLASS_NAMES: [(char, bool); 12] = [
    ('C', false),
    ('C', true),
    ('D', false),
    ('D', true),
    ('E', false),
    ('F', false),
    ('F', true),
    ('G', false),
    ('G', true),
    ('A', false),
    ('A', true),
    ('B', false),
];

/// Parse a note name into a MIDI pitch.
///
/// Accepts `<Letter><Octave>[#]` and `<Letter>#<Octave>`, with the octave in
/// `-1..=9`. Fails with [`ProfileError::InvalidNoteName`] on anything else,
/// including names that land outside 0..=127 (`G9#`).
pub fn name_to_midi_pitch(name: &str) -> Result<Pitch> {
    let invalid = || ProfileError::InvalidNoteName(name.to_string());
    let trimmed = name.trim();
    let mut chars = trimmed.chars();

    let letter = chars.next().ok_or_else(invalid)?.to_ascii_uppercase();
    let semitone = SEMITONES
        .iter()
        .find(|(l, _)| *l == letter)
        .map(|(_, s)| *s)
        .ok_or_else(invalid)?;

    let mut rest = chars.as_str();
    let mut sharp = false;
    if let Some(stripped) = rest.strip_prefix('#') {
        sharp = true;
        rest = stripped;
    }
    if let Some(stripped) = rest.strip_suffix('#') {
        if sharp {
            return Err(invalid());
        }
        sharp = true;
        rest = stripped;
    }

    let digits = rest.strip_prefix('-').unwrap_or(rest);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let octave: i32 = rest.parse().map_err(|_| invalid())?;

    let pitch = (octave + 1) * 12 + semitone as i32 + sharp as i32;
    if !(0..=127).contains(&pitch) {
        return Err(invalid());
    }
    Ok(pitch as Pitch)
}

/// Name of a MIDI pitch, always using the sharp spelling for black keys.
pub fn midi_pitch_to_name(pitch: Pitch) -> String {
    let (letter, sharp) = PITCH_CLASS_NAMES[(pitch % 12) as usize];
    let octave = pitch as i32 / 12 - 1;
    if sharp {
        format!("{letter}{octave}#")
    } else {
        format!("{letter}{octave}")
    }
}

/// True for the black-key pitch classes C#, D#, F#, G#, A#.
pub fn is_half_step(pitch: Pitch) -> bool {
    matches!(pitch % 12, 1 | 3 | 6 | 8 | 10)
}
