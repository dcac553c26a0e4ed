//! Rendering surface capability.
//!
//! The renderer exposes a narrow set of operations on a mounted score. The adapter
//! mounts and unmounts; the tracker highlights, unhighlights, asks for geometry and
//! moves the cursor. Neither reaches into the renderer's element tree directly.

use std::collections::{BTreeSet, HashMap};

use crate::score::{Cursor, ElementRef, Geometry, ScoreId, VisualScore};

pub trait ScoreSurface {
    /// Attach a score for display and register click listeners for its elements.
    fn mount(&mut self, score: &VisualScore);

    /// Detach the mounted score, dropping its listeners and any highlight state.
    fn unmount(&mut self);

    fn highlight(&mut self, element: ElementRef);

    fn unhighlight(&mut self, element: ElementRef);

    /// Geometry of a mounted element; `None` if the element is not mounted.
    fn geometry_of(&self, element: ElementRef) -> Option<Geometry>;

    fn show_cursor(&mut self, cursor: Cursor);

    fn hide_cursor(&mut self);
}

/// Headless surface that keeps display state in memory.
///
/// Useful for servers and tests; counts highlight operations so callers can check that
/// only deltas were applied.
#[derive(Debug, Default)]
pub struct MemorySurface {
    mounted: Option<ScoreId>,
    geometry: HashMap<ElementRef, Geometry>,
    highlighted: BTreeSet<ElementRef>,
    cursor: Option<Cursor>,
    listeners: usize,
    pub mounts: usize,
    pub highlight_calls: usize,
    pub unhighlight_calls: usize,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mounted(&self) -> Option<ScoreId> {
        self.mounted
    }

    pub fn highlighted(&self) -> &BTreeSet<ElementRef> {
        &self.highlighted
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor
    }

    /// Number of click listeners currently registered.
    pub fn listeners(&self) -> usize {
        self.listeners
    }
}

impl ScoreSurface for MemorySurface {
    fn mount(&mut self, score: &VisualScore) {
        self.unmount();
        self.geometry = score.elements().map(|e| (e.id, e.geometry)).collect();
        self.listeners = self.geometry.len();
        self.mounted = Some(score.id);
        self.mounts += 1;
    }

    fn unmount(&mut self) {
        self.mounted = None;
        self.geometry.clear();
        self.highlighted.clear();
        self.cursor = None;
        self.listeners = 0;
    }

    fn highlight(&mut self, element: ElementRef) {
        if self.geometry.contains_key(&element) {
            self.highlight_calls += 1;
            self.highlighted.insert(element);
        }
    }

    fn unhighlight(&mut self, element: ElementRef) {
        if self.geometry.contains_key(&element) {
            self.unhighlight_calls += 1;
            self.highlighted.remove(&element);
        }
    }

    fn geometry_of(&self, element: ElementRef) -> Option<Geometry> {
        self.geometry.get(&element).copied()
    }

    fn show_cursor(&mut self, cursor: Cursor) {
        self.cursor = Some(cursor);
    }

    fn hide_cursor(&mut self) {
        self.cursor = None;
    }
}
