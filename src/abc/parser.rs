//! ABC parser
//!
//! Turns the token stream into tunes made of timed items. Geometry is added later by
//! the layout pass.

use crate::error::LegatoError;
use crate::score::{ElementKind, SourceRange, Timing};

use super::lexer::{Lexer, LocatedToken, Token};

/// Key signature as a count of sharps (positive) or flats (negative).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KeySignature {
    pub fifths: i8,
}

const SHARP_ORDER: [char; 7] = ['F', 'C', 'G', 'D', 'A', 'E', 'B'];
const FLAT_ORDER: [char; 7] = ['B', 'E', 'A', 'D', 'G', 'C', 'F'];

impl KeySignature {
    /// Parse a `K:` value like "G", "Bb", "F#m", "Dmin", "Emaj" or "none".
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.split_whitespace().next().unwrap_or("");
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return Some(Self::default());
        }

        let mut chars = trimmed.chars();
        let tonic = chars.next()?.to_ascii_uppercase();
        let rest: String = chars.collect();
        let (accidental, mode) = match rest.chars().next() {
            Some('#') => (1, &rest[1..]),
            Some('b') => (-1, &rest[1..]),
            _ => (0, rest.as_str()),
        };

        let base: i8 = match tonic {
            'C' => 0,
            'G' => 1,
            'D' => 2,
            'A' => 3,
            'E' => 4,
            'B' => 5,
            'F' => -1,
            _ => return None,
        };
        let mode = mode.to_ascii_lowercase();
        let shift = match mode.as_str() {
            "" | "maj" | "major" | "ion" => 0,
            "m" | "min" | "minor" | "aeo" => -3,
            "mix" => -1,
            "dor" => -2,
            "phr" => -4,
            "loc" => -5,
            "lyd" => 1,
            _ => return None,
        };
        let fifths = base + accidental * 7 + shift;
        if !(-7..=7).contains(&fifths) {
            return None;
        }
        Some(Self { fifths })
    }

    /// Semitone shift the key applies to a note letter.
    pub fn shift(&self, letter: char) -> i8 {
        let letter = letter.to_ascii_uppercase();
        let count = self.fifths.unsigned_abs() as usize;
        if self.fifths > 0 && SHARP_ORDER[..count].contains(&letter) {
            1
        } else if self.fifths < 0 && FLAT_ORDER[..count].contains(&letter) {
            -1
        } else {
            0
        }
    }
}

/// One timed or structural unit of a tune.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub kind: ElementKind,
    pub range: SourceRange,
    pub pitches: Vec<u8>,
    pub timing: Option<Timing>,
    pub tie: bool,
    /// Body line the item was written on, counted from 0 within the tune.
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTune {
    pub title: Option<String>,
    pub tempo: Option<u16>,
    pub range: SourceRange,
    pub items: Vec<Item>,
}

/// Parse ABC source into tunes.
pub fn parse(source: &str) -> Result<Vec<ParsedTune>, LegatoError> {
    let tokens = Lexer::new(source).tokenize()?;
    let len = source.chars().count();
    Parser::new(tokens, len).parse()
}

struct TuneState {
    title: Option<String>,
    tempo: Option<u16>,
    meter: f64,
    unit: Option<f64>,
    key: KeySignature,
    in_body: bool,
    start: usize,
    items: Vec<Item>,
    clock: f64,
    line: usize,
    line_used: bool,
    // Accidentals written earlier in the bar, keyed by natural MIDI pitch
    bar_accidentals: Vec<(u8, i8)>,
}

impl TuneState {
    fn new(start: usize) -> Self {
        Self {
            title: None,
            tempo: None,
            meter: 1.0,
            unit: None,
            key: KeySignature::default(),
            in_body: false,
            start,
            items: Vec::new(),
            clock: 0.0,
            line: 0,
            line_used: false,
            bar_accidentals: Vec::new(),
        }
    }

    /// Unit note length as a fraction of a whole note.
    fn unit(&self) -> f64 {
        self.unit
            .unwrap_or(if self.meter < 0.75 { 1.0 / 16.0 } else { 1.0 / 8.0 })
    }

    fn finish(self, end: usize) -> ParsedTune {
        ParsedTune {
            title: self.title,
            tempo: self.tempo,
            range: SourceRange::new(self.start, end),
            items: self.items,
        }
    }
}

struct Parser {
    tokens: Vec<LocatedToken>,
    pos: usize,
    len: usize,
}

impl Parser {
    fn new(tokens: Vec<LocatedToken>, len: usize) -> Self {
        Self { tokens, pos: 0, len }
    }

    fn peek(&self) -> Option<&LocatedToken> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<LocatedToken> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(token: &LocatedToken, message: impl Into<String>) -> LegatoError {
        LegatoError::Compile {
            line: token.line,
            column: token.column,
            message: message.into(),
        }
    }

    fn parse(mut self) -> Result<Vec<ParsedTune>, LegatoError> {
        let mut tunes = Vec::new();
        let mut current: Option<TuneState> = None;

        while let Some(token) = self.peek().cloned() {
            match &token.token {
                Token::Field { name: 'X', .. } => {
                    self.pos += 1;
                    if let Some(tune) = current.take() {
                        tunes.push(tune.finish(token.start));
                    }
                    current = Some(TuneState::new(token.start));
                }
                Token::Field { name, value } => {
                    self.pos += 1;
                    let tune = current.get_or_insert_with(|| TuneState::new(token.start));
                    apply_field(tune, *name, value, &token)?;
                }
                Token::Whitespace => {
                    self.pos += 1;
                }
                Token::Newline => {
                    self.pos += 1;
                    if let Some(tune) = current.as_mut() {
                        if tune.line_used {
                            tune.line += 1;
                            tune.line_used = false;
                        }
                    }
                }
                _ => {
                    let tune = match current.as_mut() {
                        Some(tune) if tune.in_body => tune,
                        _ => {
                            return Err(Self::error(
                                &token,
                                "Music found before the K: field. Every tune needs X: and K: headers.",
                            ))
                        }
                    };
                    self.parse_music(tune)?;
                }
            }
        }

        if let Some(tune) = current.take() {
            tunes.push(tune.finish(self.len));
        }
        Ok(tunes)
    }

    fn parse_music(&mut self, tune: &mut TuneState) -> Result<(), LegatoError> {
        let Some(token) = self.next() else {
            return Ok(());
        };
        match token.token {
            Token::Bar(kind) => {
                tune.bar_accidentals.clear();
                push_item(tune, ElementKind::Bar(kind), token.start, token.end, Vec::new(), None);
            }
            Token::Sharp | Token::Flat | Token::Natural | Token::Note(_) => {
                self.pos -= 1;
                let note = self.parse_note(tune)?;
                let duration = note.duration * 4.0 * tune.unit();
                push_item(
                    tune,
                    ElementKind::Note,
                    note.start,
                    note.end,
                    vec![note.pitch],
                    Some(duration),
                );
            }
            Token::Rest(_) => {
                let (multiplier, end) = self.parse_length(token.end)?;
                let duration = multiplier * 4.0 * tune.unit();
                push_item(tune, ElementKind::Rest, token.start, end, Vec::new(), Some(duration));
            }
            Token::ChordStart => {
                let mut pitches = Vec::new();
                let mut first_length = None;
                let end = loop {
                    match self.peek().map(|t| (t.token.clone(), t.end)) {
                        Some((Token::ChordEnd, end)) => {
                            self.pos += 1;
                            break end;
                        }
                        Some((Token::Whitespace, _)) => {
                            self.pos += 1;
                        }
                        Some((Token::Sharp | Token::Flat | Token::Natural | Token::Note(_), _)) => {
                            let note = self.parse_note(tune)?;
                            first_length.get_or_insert(note.duration);
                            pitches.push(note.pitch);
                        }
                        _ => return Err(Self::error(&token, "Unclosed chord: expected ']'")),
                    }
                };
                if pitches.is_empty() {
                    return Err(Self::error(&token, "Empty chord"));
                }
                let (multiplier, end) = self.parse_length(end)?;
                let duration = first_length.unwrap_or(1.0) * multiplier * 4.0 * tune.unit();
                push_item(tune, ElementKind::Chord, token.start, end, pitches, Some(duration));
            }
            Token::Tie => match tune.items.last_mut() {
                Some(item) if !item.pitches.is_empty() => item.tie = true,
                _ => return Err(Self::error(&token, "Tie '-' must follow a note")),
            },
            Token::ChordEnd => return Err(Self::error(&token, "Unexpected ']' outside a chord")),
            Token::OctaveUp | Token::OctaveDown => {
                return Err(Self::error(&token, "Octave mark must follow a note"))
            }
            Token::Number(_) | Token::Slash => {
                return Err(Self::error(&token, "Note length must follow a note or rest"))
            }
            Token::Field { .. } | Token::Whitespace | Token::Newline => {}
        }
        Ok(())
    }

    /// Parse `[accidentals] letter [octave marks] [length]`.
    fn parse_note(&mut self, tune: &mut TuneState) -> Result<ParsedNote, LegatoError> {
        let first = self.peek().cloned();
        let start = first.as_ref().map(|t| t.start).unwrap_or(self.len);

        let mut accidental: Option<i8> = None;
        while let Some(token) = self.peek() {
            let step = match token.token {
                Token::Sharp => 1,
                Token::Flat => -1,
                Token::Natural => 0,
                _ => break,
            };
            accidental = Some(match (accidental, step) {
                (Some(a), s) if s != 0 && a.signum() == s => a + s,
                _ => step,
            });
            self.pos += 1;
        }

        let letter_token = match self.next() {
            Some(t) => t,
            None => {
                let anchor = first.unwrap_or_else(|| eof_token(self.len));
                return Err(Self::error(&anchor, "Accidental must be followed by a note"));
            }
        };
        let letter = match letter_token.token {
            Token::Note(letter) => letter,
            _ => return Err(Self::error(&letter_token, "Accidental must be followed by a note")),
        };

        let mut octave: i16 = if letter.is_ascii_lowercase() { 1 } else { 0 };
        let mut end = letter_token.end;
        while let Some(token) = self.peek() {
            match token.token {
                Token::OctaveUp => octave += 1,
                Token::OctaveDown => octave -= 1,
                _ => break,
            }
            end = token.end;
            self.pos += 1;
        }

        let natural = natural_pitch(letter, octave)
            .ok_or_else(|| Self::error(&letter_token, "Note is outside the MIDI range"))?;
        let shift = match accidental {
            Some(a) => {
                tune.bar_accidentals.retain(|(p, _)| *p != natural);
                tune.bar_accidentals.push((natural, a));
                a
            }
            None => tune
                .bar_accidentals
                .iter()
                .find(|(p, _)| *p == natural)
                .map(|(_, a)| *a)
                .unwrap_or_else(|| tune.key.shift(letter)),
        };
        let pitch = u8::try_from(natural as i16 + shift as i16)
            .ok()
            .filter(|p| *p <= 127)
            .ok_or_else(|| Self::error(&letter_token, "Note is outside the MIDI range"))?;

        let (duration, end) = self.parse_length(end)?;
        Ok(ParsedNote {
            pitch,
            duration,
            start,
            end,
        })
    }

    /// Parse an optional length suffix, returning the multiplier of the unit length and
    /// the end offset of the suffix.
    fn parse_length(&mut self, mut end: usize) -> Result<(f64, usize), LegatoError> {
        let mut multiplier = 1.0;
        if let Some(token) = self.peek().cloned() {
            if let Token::Number(n) = token.token {
                if n == 0 {
                    return Err(Self::error(&token, "Note length cannot be zero"));
                }
                multiplier = n as f64;
                end = token.end;
                self.pos += 1;
            }
        }
        while let Some(token) = self.peek().cloned() {
            if token.token != Token::Slash {
                break;
            }
            self.pos += 1;
            end = token.end;
            match self.peek().cloned() {
                Some(LocatedToken { token: Token::Number(0), .. }) => {
                    return Err(Self::error(&token, "Note length cannot be divided by zero"));
                }
                Some(LocatedToken { token: Token::Number(d), end: number_end, .. }) => {
                    multiplier /= d as f64;
                    end = number_end;
                    self.pos += 1;
                }
                _ => multiplier /= 2.0,
            }
        }
        Ok((multiplier, end))
    }
}

struct ParsedNote {
    pitch: u8,
    /// Multiple of the unit length
    duration: f64,
    start: usize,
    end: usize,
}

fn eof_token(len: usize) -> LocatedToken {
    LocatedToken {
        token: Token::Newline,
        line: 1,
        column: 1,
        start: len,
        end: len,
    }
}

fn natural_pitch(letter: char, octave: i16) -> Option<u8> {
    let step: i16 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let midi = 60 + octave * 12 + step;
    u8::try_from(midi).ok().filter(|m| *m <= 127)
}

fn push_item(
    tune: &mut TuneState,
    kind: ElementKind,
    start: usize,
    end: usize,
    pitches: Vec<u8>,
    duration: Option<f64>,
) {
    let timing = duration.map(|duration| {
        let timing = Timing {
            start: tune.clock,
            duration,
        };
        tune.clock += duration;
        timing
    });
    tune.items.push(Item {
        kind,
        range: SourceRange::new(start, end),
        pitches,
        timing,
        tie: false,
        line: tune.line,
    });
    tune.line_used = true;
}

fn apply_field(
    tune: &mut TuneState,
    name: char,
    value: &str,
    token: &LocatedToken,
) -> Result<(), LegatoError> {
    let invalid = |what: &str| LegatoError::Compile {
        line: token.line,
        column: token.column,
        message: format!("Invalid {} '{}'", what, value),
    };

    match name {
        'T' => {
            if tune.title.is_none() && !value.is_empty() {
                tune.title = Some(value.to_string());
            }
        }
        'M' => {
            tune.meter = match value {
                "C" | "C|" | "" | "none" => 1.0,
                _ => parse_fraction(value).ok_or_else(|| invalid("meter"))?,
            };
        }
        'L' => {
            tune.unit = Some(parse_fraction(value).ok_or_else(|| invalid("unit note length"))?);
        }
        'Q' => {
            tune.tempo = Some(parse_tempo(value).ok_or_else(|| invalid("tempo"))?);
        }
        'K' => {
            tune.key = KeySignature::parse(value).ok_or_else(|| invalid("key signature"))?;
            tune.bar_accidentals.clear();
            tune.in_body = true;
        }
        _ => {}
    }
    Ok(())
}

/// Parse "3/4" or "1" into a positive fraction.
fn parse_fraction(value: &str) -> Option<f64> {
    let value = value.trim();
    let fraction = match value.split_once('/') {
        Some((num, den)) => {
            let num: u32 = num.trim().parse().ok()?;
            let den: u32 = den.trim().parse().ok()?;
            if den == 0 {
                return None;
            }
            num as f64 / den as f64
        }
        None => value.parse::<u32>().ok()? as f64,
    };
    (fraction > 0.0).then_some(fraction)
}

/// Parse "120" or "1/4=120" (optionally surrounded by quoted text) into quarter-note BPM.
fn parse_tempo(value: &str) -> Option<u16> {
    let unquoted: String = value
        .split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 0)
        .map(|(_, part)| part)
        .collect();
    let unquoted = unquoted.trim();
    let bpm = match unquoted.split_once('=') {
        Some((beat, bpm)) => {
            let beat = parse_fraction(beat)?;
            let bpm: f64 = bpm.trim().parse().ok()?;
            bpm * beat * 4.0
        }
        None => unquoted.parse::<f64>().ok()?,
    };
    let bpm = bpm.round();
    (bpm >= 1.0 && bpm <= u16::MAX as f64).then_some(bpm as u16)
}
