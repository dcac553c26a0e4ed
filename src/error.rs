//! # Error Types
//!
//! This module defines all error types for the playback core.
//!
//! ## Error Types
//! - `Compile` - Malformed notation, with line and column information
//! - `InvalidRange` - A typesetter produced an element outside the source text
//! - `ElementNotFound` - A click referenced an element of a score that is no longer current
//! - `SynthesisUnavailable` - The synthesis back end could not be acquired or primed
//! - `RemoteSynthesis` - The remote synthesis service answered with an error
//! - `InvalidTransition` - A session operation was called from the wrong phase
//! - `InvalidConfig` / `Config` - Bad runtime configuration
//!
//! None of these is fatal. A compile failure leaves the last good score on screen,
//! a stale click is dropped, and a playback failure surfaces as `PlaybackState::Error`.
//!
//! ## Usage
//! ```rust
//! use legato::{compile, LegatoError};
//!
//! match compile("X:1\nK:C\nCD#E|") {
//!     Ok(score) => println!("{} tunes", score.tunes.len()),
//!     Err(LegatoError::Compile { line, column, message }) => {
//!         eprintln!("Parse error at {}:{}: {}", line, column, message);
//!     }
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use thiserror::Error;

use crate::score::ElementRef;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LegatoError {
    /// Compile error with location information.
    ///
    /// # Example
    /// ```
    /// # use legato::LegatoError;
    /// let err = LegatoError::Compile {
    ///     line: 3,
    ///     column: 2,
    ///     message: "Unexpected character '#'".to_string(),
    /// };
    /// assert_eq!(err.to_string(), "Parse error at line 3, column 2: Unexpected character '#'");
    /// ```
    #[error("Parse error at line {line}, column {column}: {message}")]
    Compile {
        line: usize,
        column: usize,
        message: String,
    },

    /// The typesetter tagged an element with a range outside `[0, len]`.
    #[error("Element source range {start}..{end} is outside the source text (length {len})")]
    InvalidRange { start: usize, end: usize, len: usize },

    #[error("Element {0} does not belong to the current score")]
    ElementNotFound(ElementRef),

    #[error("Synthesis unavailable: {0}")]
    SynthesisUnavailable(String),

    /// Error reported by the remote synthesis service.
    ///
    /// `detail` is the service's own message and is shown to the user verbatim.
    ///
    /// # Example
    /// ```
    /// # use legato::LegatoError;
    /// let err = LegatoError::RemoteSynthesis {
    ///     status: Some(500),
    ///     detail: "FluidSynth synthesis failed".to_string(),
    /// };
    /// assert_eq!(err.to_string(), "FluidSynth synthesis failed");
    /// ```
    #[error("{detail}")]
    RemoteSynthesis { status: Option<u16>, detail: String },

    #[error("Cannot {action} while {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration file could not be read as YAML.
    #[error("Malformed configuration: {0}")]
    Config(String),
}
