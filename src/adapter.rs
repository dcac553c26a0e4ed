//! # Score Model Adapter
//!
//! Wraps a [`Typesetter`] and keeps the last successfully compiled score.
//!
//! ## Contract
//! - `compile` is deterministic: the same text yields the same tunes, elements, ranges
//!   and geometry. Only the [`ScoreId`] differs between compiles.
//! - A failed compile carries no partial result and leaves the last good score in place,
//!   so the display and any geometry lookups keep working while the user types.
//! - Every element range of an accepted score fits inside its source text.
//! - `mount` attaches the current score to a surface at most once per compile, tearing
//!   down the previous mount first so click listeners are never duplicated.

use std::sync::Arc;

use crate::error::LegatoError;
use crate::score::{ScoreId, SourceText, Tune, VisualScore};
use crate::surface::ScoreSurface;

const TARGET: &str = "legato::adapter";

/// The external parser/engraver boundary.
pub trait Typesetter {
    /// Lay out `source`, stamping every element reference with `score`.
    fn typeset(&self, source: &SourceText, score: ScoreId) -> Result<Vec<Tune>, LegatoError>;
}

pub struct ScoreAdapter<T: Typesetter> {
    typesetter: T,
    next_id: ScoreId,
    current: Option<Arc<VisualScore>>,
    mounted: Option<ScoreId>,
}

impl<T: Typesetter> ScoreAdapter<T> {
    pub fn new(typesetter: T) -> Self {
        Self {
            typesetter,
            next_id: 1,
            current: None,
            mounted: None,
        }
    }

    /// Compile a source snapshot into a new score.
    ///
    /// On success the new score replaces the current one. On failure the current score
    /// is untouched.
    pub fn compile(&mut self, source: &SourceText) -> Result<Arc<VisualScore>, LegatoError> {
        let id = self.next_id;
        let result = self
            .typesetter
            .typeset(source, id)
            .and_then(|tunes| check_ranges(source, tunes));

        match result {
            Ok(tunes) => {
                self.next_id += 1;
                let score = Arc::new(VisualScore {
                    id,
                    source: source.clone(),
                    tunes,
                });
                log::info!(
                    target: TARGET,
                    "compiled score {} ({} tunes, {} elements)",
                    id,
                    score.tunes.len(),
                    score.elements().count()
                );
                self.current = Some(Arc::clone(&score));
                Ok(score)
            }
            Err(e) => {
                log::warn!(target: TARGET, "compile failed, keeping previous score: {}", e);
                Err(e)
            }
        }
    }

    /// Last successfully compiled score.
    pub fn current(&self) -> Option<&Arc<VisualScore>> {
        self.current.as_ref()
    }

    /// Score currently attached to the surface.
    pub fn mounted(&self) -> Option<ScoreId> {
        self.mounted
    }

    /// Attach the current score to `surface`, replacing any previous mount.
    ///
    /// Returns the id of the mounted score. Mounting the same score twice is a no-op.
    pub fn mount(&mut self, surface: &mut dyn ScoreSurface) -> Option<ScoreId> {
        let score = self.current.as_ref()?;
        if self.mounted == Some(score.id) {
            return self.mounted;
        }
        if self.mounted.is_some() {
            surface.unmount();
        }
        surface.mount(score);
        self.mounted = Some(score.id);
        log::debug!(target: TARGET, "mounted score {}", score.id);
        self.mounted
    }
}

impl<T: Typesetter + Default> Default for ScoreAdapter<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

fn check_ranges(source: &SourceText, tunes: Vec<Tune>) -> Result<Vec<Tune>, LegatoError> {
    let len = source.len();
    let bad = tunes
        .iter()
        .flat_map(|t| t.elements.iter())
        .map(|e| e.range)
        .find(|r| !r.fits(len));
    match bad {
        Some(range) => Err(LegatoError::InvalidRange {
            start: range.start,
            end: range.end,
            len,
        }),
        None => Ok(tunes),
    }
}
