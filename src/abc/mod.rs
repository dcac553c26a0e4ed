//! # ABC Typesetter
//!
//! Built-in [`Typesetter`] for a practical subset of ABC notation, so the playback core
//! can run end to end without an external engraver.
//!
//! ## Sub-modules
//! - `lexer` - Tokens with character offsets and line/column positions
//! - `parser` - Tunes, headers, pitches (key signature, bar accidentals) and timing
//! - `layout` - Element identity and staff-system geometry
//!
//! ## Supported Syntax
//! - Header fields `X:` `T:` `M:` `L:` `Q:` `K:` (others are accepted and ignored)
//! - Notes `A-G a-g` with `^ ^^ _ __ =`, octave marks `'` `,` and lengths `2 / /2 3/2`
//! - Rests `z x`, chords `[CEG]`, ties `-`
//! - Barlines `| || |] [| |: :| ::`
//! - Quoted chord symbols, `!decorations!`, slurs and `%` comments are skipped
//!
//! ## Example
//! ```rust
//! use legato::abc::AbcTypesetter;
//! use legato::{SourceText, Typesetter};
//!
//! let typesetter = AbcTypesetter::default();
//! let tunes = typesetter.typeset(&SourceText::from("X:1\nK:C\nCDEF|"), 1).unwrap();
//!
//! assert_eq!(tunes.len(), 1);
//! assert_eq!(tunes[0].notes().count(), 4);
//! assert_eq!(tunes[0].notes().next().unwrap().pitches, vec![60]); // C4
//! ```

pub mod layout;
pub mod lexer;
pub mod parser;

pub use layout::LayoutOptions;
pub use parser::KeySignature;

use crate::adapter::Typesetter;
use crate::error::LegatoError;
use crate::score::{ScoreId, SourceText, Tune};

pub const DEFAULT_TEMPO: u16 = 120;

#[derive(Debug, Clone, PartialEq)]
pub struct AbcTypesetter {
    pub layout: LayoutOptions,
    /// Quarter-note BPM for tunes without a `Q:` field
    pub default_tempo: u16,
}

impl Default for AbcTypesetter {
    fn default() -> Self {
        Self {
            layout: LayoutOptions::default(),
            default_tempo: DEFAULT_TEMPO,
        }
    }
}

impl Typesetter for AbcTypesetter {
    fn typeset(&self, source: &SourceText, score: ScoreId) -> Result<Vec<Tune>, LegatoError> {
        let parsed = parser::parse(source.as_str())?;
        Ok(layout::layout(parsed, score, self.default_tempo, &self.layout))
    }
}
