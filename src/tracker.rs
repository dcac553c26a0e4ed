//! # Timing/Cursor Tracker
//!
//! Applies the playback event stream to the rendering surface.
//!
//! ## Highlighting
//! Each `Sounding` event is diffed against the current highlight set and only the
//! delta is applied: elements that stopped sounding are unhighlighted, new ones are
//! highlighted, unchanged ones are left alone.
//!
//! ## Cursor
//! The cursor follows the group's anchor, the earliest element in source order. An
//! engine-supplied position hint wins over the anchor's geometry. A gap (empty group)
//! clears highlights but leaves the cursor where it was.
//!
//! ## Stale events
//! Elements that do not belong to the attached score, or that the surface no longer
//! knows about, are dropped silently. This is expected while a session drains its last
//! events after a recompile.

use std::collections::BTreeSet;

use crate::score::{Cursor, ElementRef, PlaybackEvent, ScoreId};
use crate::surface::ScoreSurface;

const TARGET: &str = "legato::tracker";

/// What the controller should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStep {
    Continue,
    /// The completion sentinel was seen and display state has been cleared.
    Finished,
}

#[derive(Debug, Default)]
pub struct Tracker {
    score: Option<ScoreId>,
    highlighted: BTreeSet<ElementRef>,
    cursor: Option<Cursor>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follow events for `score`. Highlight state starts empty.
    pub fn attach(&mut self, score: ScoreId) {
        self.score = Some(score);
        self.highlighted.clear();
        self.cursor = None;
    }

    /// Stop following any score. Used once the surface has been unmounted and holds
    /// no highlight state of its own.
    pub fn detach(&mut self) {
        self.score = None;
        self.highlighted.clear();
        self.cursor = None;
    }

    pub fn attached(&self) -> Option<ScoreId> {
        self.score
    }

    pub fn highlighted(&self) -> &BTreeSet<ElementRef> {
        &self.highlighted
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    pub fn on_event(&mut self, event: &PlaybackEvent, surface: &mut dyn ScoreSurface) -> TrackStep {
        match event {
            PlaybackEvent::Finished => {
                self.clear(surface);
                TrackStep::Finished
            }
            PlaybackEvent::Sounding { elements, cursor } => {
                self.apply(elements, *cursor, surface);
                TrackStep::Continue
            }
        }
    }

    /// Remove every highlight and the cursor from the surface.
    pub fn clear(&mut self, surface: &mut dyn ScoreSurface) {
        for element in std::mem::take(&mut self.highlighted) {
            surface.unhighlight(element);
        }
        if self.cursor.take().is_some() {
            surface.hide_cursor();
        }
    }

    fn apply(&mut self, elements: &[ElementRef], hint: Option<Cursor>, surface: &mut dyn ScoreSurface) {
        let Some(score) = self.score else {
            return;
        };

        let sounding: BTreeSet<ElementRef> = elements
            .iter()
            .copied()
            .filter(|e| e.score == score && surface.geometry_of(*e).is_some())
            .collect();
        let dropped = elements.len() - sounding.len();
        if dropped > 0 {
            log::debug!(target: TARGET, "dropped {} stale element(s)", dropped);
        }

        log::trace!(
            target: TARGET,
            "highlight +{} -{}",
            sounding.difference(&self.highlighted).count(),
            self.highlighted.difference(&sounding).count()
        );
        for element in self.highlighted.difference(&sounding) {
            surface.unhighlight(*element);
        }
        for element in sounding.difference(&self.highlighted) {
            surface.highlight(*element);
        }
        self.highlighted = sounding;

        let Some(anchor) = self.highlighted.first().copied() else {
            return;
        };
        let next = hint.or_else(|| surface.geometry_of(anchor).map(Cursor::from));
        if let Some(cursor) = next {
            if self.cursor != Some(cursor) {
                surface.show_cursor(cursor);
                self.cursor = Some(cursor);
            }
        }
    }
}
