//! # Selection Mapper
//!
//! Maps a click on a rendered element back to the text that produced it.
//!
//! Resolution goes through the score, never through the click payload alone: a click
//! whose element belongs to a replaced score fails with
//! [`LegatoError::ElementNotFound`] and must be dropped rather than applied to the
//! editor, since its offsets describe text that may no longer exist.
//!
//! ## Example
//! ```rust
//! use legato::{compile, selection, SourceRange};
//!
//! let score = compile("X:1\nK:C\nCDEF|").unwrap();
//! let third = score.tunes[0].notes().nth(2).unwrap();
//!
//! // Offsets count characters, not bytes
//! let sel = selection::select(third.id, &score, 20.0).unwrap();
//! assert_eq!(score.source.slice(SourceRange::new(sel.start, sel.end)), Some("E"));
//! assert_eq!(sel.line, 3);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::LegatoError;
use crate::score::{ElementRef, SourceRange, VisualScore};

/// Payload delivered by the renderer when an element is clicked.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickEvent {
    pub element_ref: ElementRef,
    pub start_char: usize,
    pub end_char: usize,
}

/// Editor selection derived from a click.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSelection {
    pub start: usize,
    pub end: usize,
    /// 1-based line of `start`
    pub line: usize,
    /// Advisory scroll offset, `(line - 1) * line_height`
    pub scroll_top: f64,
}

/// The text-editing surface.
pub trait TextEditor {
    /// Select `[start, end)`, in character offsets.
    fn set_selection(&mut self, start: usize, end: usize);

    fn scroll_to(&mut self, top: f64);
}

/// Resolve an element reference to its source range.
pub fn resolve(element: ElementRef, score: &VisualScore) -> Result<SourceRange, LegatoError> {
    score
        .element(element)
        .map(|e| e.range)
        .ok_or(LegatoError::ElementNotFound(element))
}

/// 1-based line number of a character offset.
pub fn line_number(source: &str, offset: usize) -> usize {
    source.chars().take(offset).filter(|c| *c == '\n').count() + 1
}

/// Resolve an element and compute the selection and scroll position for it.
pub fn select(element: ElementRef, score: &VisualScore, line_height: f64) -> Result<TextSelection, LegatoError> {
    let range = resolve(element, score)?;
    let line = line_number(score.source.as_str(), range.start);
    Ok(TextSelection {
        start: range.start,
        end: range.end,
        line,
        scroll_top: (line - 1) as f64 * line_height,
    })
}

/// Apply a selection to the editor.
pub fn apply(selection: &TextSelection, editor: &mut dyn TextEditor) {
    editor.set_selection(selection.start, selection.end);
    editor.scroll_to(selection.scroll_top);
}
