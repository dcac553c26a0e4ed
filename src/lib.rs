pub mod abc;
pub mod adapter;
pub mod config;
pub mod controller;
pub mod error;
pub mod player;
pub mod score;
pub mod selection;
pub mod surface;
pub mod synth;
pub mod tracker;

pub use abc::AbcTypesetter;
pub use adapter::{ScoreAdapter, Typesetter};
pub use config::{PlayerConfig, RemoteConfig};
pub use controller::{Effect, PlaybackController, PlaybackState};
pub use error::*;
pub use player::{Command, Player, PlayerHandle};
pub use score::*;
pub use selection::{ClickEvent, TextEditor, TextSelection};
pub use surface::{MemorySurface, ScoreSurface};
pub use synth::remote::{AudioPlayer, BackendHealth, RemoteSynth, Transport};
pub use synth::timeline::{NoteOutput, NullOutput, TimelineSynth};
pub use synth::{CompletionMode, SessionManager, SynthBackend, SynthSession};
pub use tracker::Tracker;

/// Compile ABC source with the built-in typesetter.
/// Useful for one-off inspection; a long-lived editor should keep a [`ScoreAdapter`].
pub fn compile(source: &str) -> Result<VisualScore, LegatoError> {
    let mut adapter = ScoreAdapter::new(AbcTypesetter::default());
    let score = adapter.compile(&SourceText::from(source))?;
    Ok(VisualScore::clone(&score))
}
