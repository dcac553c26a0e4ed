//! # Score Data Model
//!
//! Types shared by the adapter, the selection mapper, the synthesis engines and the
//! highlight tracker.
//!
//! ## Type Hierarchy
//! ```text
//! VisualScore (id, source snapshot)
//!   └── Vec<Tune> (title, tempo, source range)
//!         └── Vec<VisualElement>
//!               ├── id: ElementRef (score id, tune, index)
//!               ├── kind: Note | Chord | Rest | Bar
//!               ├── range: SourceRange (char offsets, [start, end))
//!               ├── geometry: Geometry (x, y, width, height)
//!               ├── pitches: Vec<u8> (MIDI)
//!               └── timing: Option<Timing> (beats)
//! ```
//!
//! ## Key Concepts
//!
//! ### Score identity
//! Every successful compile gets a fresh [`ScoreId`]. Element references embed it, so a
//! reference taken from a replaced score can never resolve against the new one.
//!
//! ### Source ranges
//! Offsets count Unicode scalar values, not bytes, so they can be handed straight to
//! a text area selection.
//!
//! ### Element order
//! Elements of a tune are stored in source order. `ElementRef` orders by
//! `(score, tune, index)`, so the smallest reference of a group is also the earliest
//! in the source.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identity of one successful compile.
pub type ScoreId = u64;

/// Immutable snapshot of the editor text.
///
/// Cloning is cheap; all clones share the same buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText(Arc<str>);

impl SourceText {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Text covered by a char-offset range, or `None` if the range is out of bounds.
    pub fn slice(&self, range: SourceRange) -> Option<&str> {
        let start = self.byte_offset(range.start)?;
        let end = self.byte_offset(range.end)?;
        self.0.get(start..end)
    }

    fn byte_offset(&self, chars: usize) -> Option<usize> {
        if chars == 0 {
            return Some(0);
        }
        match self.0.char_indices().nth(chars) {
            Some((byte, _)) => Some(byte),
            None if self.len() == chars => Some(self.0.len()),
            None => None,
        }
    }
}

impl Default for SourceText {
    fn default() -> Self {
        Self::new("")
    }
}

impl From<&str> for SourceText {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for SourceText {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Half-open `[start, end)` range of character offsets into the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRange {
    pub start: usize,
    pub end: usize,
}

impl SourceRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(end >= start, "range end before start");
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True if the range is well formed and lies within a text of `len` characters.
    pub fn fits(&self, len: usize) -> bool {
        self.start <= self.end && self.end <= len
    }
}

/// Reference to one element of one compiled score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementRef {
    pub score: ScoreId,
    pub tune: usize,
    pub index: usize,
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}/{}/{}", self.score, self.tune, self.index)
    }
}

/// Position and extent of an element on the rendering surface.
///
/// `x`/`width` bound the glyph horizontally; `y`/`height` span the staff system the
/// element sits on, which is what the playback cursor is drawn over.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Vertical playback marker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub left: f64,
    pub top: f64,
    pub height: f64,
}

impl From<Geometry> for Cursor {
    fn from(g: Geometry) -> Self {
        Cursor {
            left: g.x,
            top: g.y,
            height: g.height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarKind {
    Single,
    Double,
    Final,
    Start,
    RepeatStart,
    RepeatEnd,
    RepeatBoth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Note,
    Chord,
    Rest,
    Bar(BarKind),
}

/// Onset and length in quarter-note beats from the start of the tune.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub start: f64,
    pub duration: f64,
}

impl Timing {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualElement {
    pub id: ElementRef,
    pub kind: ElementKind,
    pub range: SourceRange,
    pub geometry: Geometry,
    /// MIDI pitches; empty for rests and barlines.
    pub pitches: Vec<u8>,
    /// `None` for elements that take no time (barlines).
    pub timing: Option<Timing>,
    /// The note is tied into the next one, which must not be re-attacked.
    pub tie: bool,
}

impl VisualElement {
    pub fn is_playable(&self) -> bool {
        !self.pitches.is_empty() && self.timing.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tune {
    pub index: usize,
    pub title: Option<String>,
    /// Quarter-note beats per minute.
    pub tempo: u16,
    /// Span of the whole tune in the source, header included.
    pub range: SourceRange,
    pub elements: Vec<VisualElement>,
}

impl Tune {
    /// Notes and chords, in source order.
    pub fn notes(&self) -> impl Iterator<Item = &VisualElement> {
        self.elements
            .iter()
            .filter(|e| matches!(e.kind, ElementKind::Note | ElementKind::Chord))
    }

    /// Length of the tune in beats.
    pub fn length(&self) -> f64 {
        self.elements
            .iter()
            .filter_map(|e| e.timing)
            .map(|t| t.end())
            .fold(0.0, f64::max)
    }
}

/// Laid-out score produced from exactly one source snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualScore {
    pub id: ScoreId,
    pub source: SourceText,
    pub tunes: Vec<Tune>,
}

impl VisualScore {
    pub fn first_tune(&self) -> Option<&Tune> {
        self.tunes.first()
    }

    /// Look up an element, refusing references minted by another compile.
    pub fn element(&self, element: ElementRef) -> Option<&VisualElement> {
        if element.score != self.id {
            return None;
        }
        self.tunes
            .get(element.tune)?
            .elements
            .get(element.index)
            .filter(|e| e.id == element)
    }

    pub fn contains(&self, element: ElementRef) -> bool {
        self.element(element).is_some()
    }

    pub fn elements(&self) -> impl Iterator<Item = &VisualElement> {
        self.tunes.iter().flat_map(|t| t.elements.iter())
    }

    /// Source text of one tune, as sent to a remote synthesis service.
    pub fn tune_text(&self, tune: &Tune) -> Option<&str> {
        self.source.slice(tune.range)
    }
}

/// One notification from the timing source.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    /// Elements sounding now; empty means a gap. `cursor` is an optional position hint
    /// supplied by the engine.
    Sounding {
        elements: Vec<ElementRef>,
        cursor: Option<Cursor>,
    },
    /// Playback reached the end.
    Finished,
}

impl PlaybackEvent {
    pub fn sounding(elements: Vec<ElementRef>) -> Self {
        PlaybackEvent::Sounding {
            elements,
            cursor: None,
        }
    }
}
