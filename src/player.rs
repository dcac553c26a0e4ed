//! # Player
//!
//! Single-threaded driver that wires the adapter, selection mapper and playback
//! controller to a rendering surface and a text editor.
//!
//! The player runs as one task on a tokio [`LocalSet`](tokio::task::LocalSet). It reacts
//! to [`Command`]s from a [`PlayerHandle`] and to messages from the background tasks it
//! spawns for the controller: awaiting an acquire or prime, forwarding session events,
//! and ticking the completion poll. Every background message carries the generation it
//! was started under, so the controller can ignore work from a cancelled attempt.
//!
//! Forwarding and polling tasks are aborted on every halt. Await tasks are left to run
//! to completion: a session acquired after cancellation still has to reach the session
//! manager to be released. On shutdown, unfinished await tasks are aborted (no session
//! exists yet) and outcomes already queued are handed to the manager, which releases
//! every session among them.
//!
//! ## Example
//! ```rust
//! use legato::{AbcTypesetter, Command, MemorySurface, NullOutput, Player, PlayerConfig, ScoreAdapter, TimelineSynth};
//! use legato::selection::TextEditor;
//!
//! struct Editor;
//! impl TextEditor for Editor {
//!     fn set_selection(&mut self, _start: usize, _end: usize) {}
//!     fn scroll_to(&mut self, _top: f64) {}
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let config = PlayerConfig::default();
//!     let (player, handle) = Player::new(
//!         ScoreAdapter::new(AbcTypesetter::default()),
//!         TimelineSynth::new(NullOutput),
//!         MemorySurface::new(),
//!         Editor,
//!         &config,
//!     );
//!     let task = tokio::task::spawn_local(player.run());
//!     handle.send(Command::Edit("X:1\nK:C\nCDEF|".to_string()));
//!     drop(handle);
//!
//!     let player = task.await.unwrap();
//!     assert_eq!(player.surface().mounted(), Some(1));
//! }).await;
//! # });
//! ```

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::adapter::{ScoreAdapter, Typesetter};
use crate::config::PlayerConfig;
use crate::controller::{Effect, PlaybackController, PlaybackState};
use crate::error::LegatoError;
use crate::score::{PlaybackEvent, SourceText};
use crate::selection::{self, ClickEvent, TextEditor};
use crate::surface::ScoreSurface;
use crate::synth::{Generation, PendingOp, Resolution, SynthBackend};

const TARGET: &str = "legato::playback";

/// Requests from the outer application.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// The editor's text changed.
    Edit(String),
    /// A rendered element was clicked.
    Click(ClickEvent),
    Toggle,
    Stop,
}

enum Message<S> {
    Resolved {
        generation: Generation,
        resolution: Resolution<S>,
    },
    Event {
        generation: Generation,
        event: PlaybackEvent,
    },
    StreamClosed {
        generation: Generation,
    },
    Tick {
        generation: Generation,
    },
}

/// Sending side of a running [`Player`].
#[derive(Clone)]
pub struct PlayerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PlaybackState>,
}

impl PlayerHandle {
    /// Queue a command. Returns `false` once the player has shut down.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn edit(&self, text: impl Into<String>) -> bool {
        self.send(Command::Edit(text.into()))
    }

    pub fn toggle(&self) -> bool {
        self.send(Command::Toggle)
    }

    pub fn stop(&self) -> bool {
        self.send(Command::Stop)
    }

    pub fn state(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.clone()
    }
}

pub struct Player<T: Typesetter, B: SynthBackend, S: ScoreSurface, E: TextEditor> {
    adapter: ScoreAdapter<T>,
    controller: PlaybackController<B>,
    surface: S,
    editor: E,
    source: SourceText,
    compile_error: Option<LegatoError>,
    line_height: f64,
    commands: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::UnboundedSender<Message<B::Session>>,
    rx: mpsc::UnboundedReceiver<Message<B::Session>>,
    tasks: Vec<JoinHandle<()>>,
    awaiting: Vec<JoinHandle<()>>,
}

impl<T, B, S, E> Player<T, B, S, E>
where
    T: Typesetter,
    B: SynthBackend,
    S: ScoreSurface,
    E: TextEditor,
{
    pub fn new(adapter: ScoreAdapter<T>, backend: B, surface: S, editor: E, config: &PlayerConfig) -> (Self, PlayerHandle) {
        let controller = PlaybackController::new(backend).with_poll_interval(config.poll_interval());
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = PlayerHandle {
            commands: commands_tx,
            state: controller.subscribe(),
        };

        let player = Self {
            adapter,
            controller,
            surface,
            editor,
            source: SourceText::default(),
            compile_error: None,
            line_height: config.line_height,
            commands,
            tx,
            rx,
            tasks: Vec::new(),
            awaiting: Vec::new(),
        };
        (player, handle)
    }

    pub fn adapter(&self) -> &ScoreAdapter<T> {
        &self.adapter
    }

    pub fn controller(&self) -> &PlaybackController<B> {
        &self.controller
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn source(&self) -> &SourceText {
        &self.source
    }

    /// Error from the most recent compile, if it failed.
    pub fn compile_error(&self) -> Option<&LegatoError> {
        self.compile_error.as_ref()
    }

    /// Process commands until every [`PlayerHandle`] is dropped, then stop playback and
    /// hand the player back. Must run inside a `LocalSet`.
    pub async fn run(mut self) -> Self {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.command(command),
                    None => break,
                },
                Some(message) = self.rx.recv() => self.message(message),
            }
        }

        let effects = self.controller.stop(&mut self.surface);
        self.apply(effects);
        self.abort_tasks();
        self.release_pending();
        log::debug!(target: TARGET, "player shut down");
        self
    }

    fn release_pending(&mut self) {
        for task in self.awaiting.drain(..) {
            task.abort();
        }
        self.rx.close();
        while let Ok(message) = self.rx.try_recv() {
            if let Message::Resolved { generation, resolution } = message {
                // Playback is stopped, so this only releases a late session
                let _ = self.controller.resolve(generation, resolution, &mut self.surface);
            }
        }
    }

    fn command(&mut self, command: Command) {
        match command {
            Command::Edit(text) => self.edit(text),
            Command::Click(click) => self.click(click),
            Command::Toggle => {
                self.adapter.mount(&mut self.surface);
                let score = self.adapter.current().map(|s| &**s);
                let effects = self.controller.toggle(score, &mut self.surface);
                self.apply(effects);
            }
            Command::Stop => {
                let effects = self.controller.stop(&mut self.surface);
                self.apply(effects);
            }
        }
    }

    fn edit(&mut self, text: String) {
        let effects = self.controller.source_changed(&mut self.surface);
        self.apply(effects);

        self.source = SourceText::from(text);
        match self.adapter.compile(&self.source) {
            Ok(_) => {
                self.compile_error = None;
                self.adapter.mount(&mut self.surface);
            }
            Err(e) => self.compile_error = Some(e),
        }
    }

    fn click(&mut self, click: ClickEvent) {
        let Some(score) = self.adapter.current() else {
            return;
        };
        match selection::select(click.element_ref, score, self.line_height) {
            Ok(selection) => selection::apply(&selection, &mut self.editor),
            Err(e) => log::debug!(target: TARGET, "dropped click: {}", e),
        }
    }

    fn message(&mut self, message: Message<B::Session>) {
        let effects = match message {
            Message::Resolved { generation, resolution } => {
                self.controller.resolve(generation, resolution, &mut self.surface)
            }
            Message::Event { generation, event } => self.controller.on_event(generation, &event, &mut self.surface),
            Message::StreamClosed { generation } => self.controller.stream_closed(generation, &mut self.surface),
            Message::Tick { generation } => self.controller.poll_completion(generation, &mut self.surface),
        };
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<Effect<B::Session>>) {
        for effect in effects {
            match effect {
                Effect::Await(PendingOp { generation, future }) => {
                    let tx = self.tx.clone();
                    self.awaiting.retain(|task| !task.is_finished());
                    self.awaiting.push(tokio::task::spawn_local(async move {
                        let resolution = future.await;
                        let _ = tx.send(Message::Resolved { generation, resolution });
                    }));
                }
                Effect::Listen { generation, mut events } => {
                    let tx = self.tx.clone();
                    self.tasks.push(tokio::task::spawn_local(async move {
                        while let Some(event) = events.next().await {
                            if tx.send(Message::Event { generation, event }).is_err() {
                                return;
                            }
                        }
                        let _ = tx.send(Message::StreamClosed { generation });
                    }));
                }
                Effect::Poll { generation, interval } => {
                    let tx = self.tx.clone();
                    self.tasks.push(tokio::task::spawn_local(poll(tx, generation, interval)));
                }
                Effect::Halt => self.abort_tasks(),
            }
        }
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn poll<S>(tx: mpsc::UnboundedSender<Message<S>>, generation: Generation, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if tx.send(Message::Tick { generation }).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use tokio::task::LocalSet;

    use super::*;
    use crate::abc::AbcTypesetter;
    use crate::score::ElementRef;
    use crate::surface::MemorySurface;
    use crate::synth::timeline::{NoteOutput, TimelineSynth};

    type TestPlayer = Player<AbcTypesetter, TimelineSynth<Counter>, MemorySurface, Recorder>;

    #[derive(Default)]
    struct Recorder {
        selection: Option<(usize, usize)>,
        scroll: Option<f64>,
    }

    impl TextEditor for Recorder {
        fn set_selection(&mut self, start: usize, end: usize) {
            self.selection = Some((start, end));
        }

        fn scroll_to(&mut self, top: f64) {
            self.scroll = Some(top);
        }
    }

    #[derive(Default, Clone)]
    struct Counter {
        notes: Rc<Cell<usize>>,
        silenced: Rc<Cell<usize>>,
    }

    impl NoteOutput for Counter {
        fn note_on(&mut self, _pitch: u8, _velocity: u8) {
            self.notes.set(self.notes.get() + 1);
        }

        fn note_off(&mut self, _pitch: u8) {}

        fn all_notes_off(&mut self) {
            self.silenced.set(self.silenced.get() + 1);
        }
    }

    fn player(output: Counter, warmup: Duration) -> (TestPlayer, PlayerHandle) {
        Player::new(
            ScoreAdapter::new(AbcTypesetter::default()),
            TimelineSynth::new(output).with_warmup(warmup),
            MemorySurface::new(),
            Recorder::default(),
            &PlayerConfig::default(),
        )
    }

    async fn wait_for(handle: &PlayerHandle, state: PlaybackState) {
        let mut rx = handle.subscribe();
        rx.wait_for(|s| *s == state).await.unwrap();
    }

    const TUNE: &str = "X:1\nL:1/4\nQ:1/4=120\nK:C\nCDEF|";

    #[tokio::test(start_paused = true)]
    async fn test_plays_to_completion() {
        LocalSet::new()
            .run_until(async {
                let output = Counter::default();
                let (player, handle) = player(output.clone(), Duration::ZERO);
                let task = tokio::task::spawn_local(player.run());

                handle.edit(TUNE);
                handle.toggle();
                wait_for(&handle, PlaybackState::Running).await;
                wait_for(&handle, PlaybackState::Idle).await;
                drop(handle);

                let player = task.await.unwrap();
                assert_eq!(output.notes.get(), 4);
                assert_eq!(player.surface().highlight_calls, 4);
                assert_eq!(player.surface().unhighlight_calls, 4);
                assert!(player.surface().highlighted().is_empty());
                assert!(player.surface().cursor().is_none());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_warmup() {
        LocalSet::new()
            .run_until(async {
                let output = Counter::default();
                let (player, handle) = player(output.clone(), Duration::from_secs(1));
                let task = tokio::task::spawn_local(player.run());

                handle.edit(TUNE);
                handle.toggle();
                wait_for(&handle, PlaybackState::Loading).await;
                handle.toggle();
                wait_for(&handle, PlaybackState::Idle).await;

                // Let the abandoned warm-up finish
                tokio::time::sleep(Duration::from_secs(2)).await;
                assert_eq!(handle.state(), PlaybackState::Idle);
                drop(handle);

                let player = task.await.unwrap();
                assert_eq!(output.notes.get(), 0);
                assert_eq!(output.silenced.get(), 1);
                assert!(player.surface().highlighted().is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_during_playback_stops() {
        LocalSet::new()
            .run_until(async {
                let (player, handle) = player(Counter::default(), Duration::ZERO);
                let task = tokio::task::spawn_local(player.run());

                handle.edit(TUNE);
                handle.toggle();
                wait_for(&handle, PlaybackState::Running).await;
                tokio::time::sleep(Duration::from_millis(600)).await;

                handle.edit("X:1\nK:G\nGABc|");
                wait_for(&handle, PlaybackState::Idle).await;
                tokio::time::sleep(Duration::from_secs(3)).await;
                drop(handle);

                let player = task.await.unwrap();
                assert_eq!(player.surface().mounted(), Some(2));
                assert!(player.surface().highlighted().is_empty());
                assert_eq!(player.controller().state(), PlaybackState::Idle);
            })
            .await;
    }

    #[tokio::test]
    async fn test_click_selects_source() {
        LocalSet::new()
            .run_until(async {
                let (player, handle) = player(Counter::default(), Duration::ZERO);
                let task = tokio::task::spawn_local(player.run());

                handle.edit("X:1\nK:C\nCDEF|");
                handle.send(Command::Click(ClickEvent {
                    element_ref: ElementRef { score: 1, tune: 0, index: 2 },
                    start_char: 10,
                    end_char: 11,
                }));
                drop(handle);

                let player = task.await.unwrap();
                assert_eq!(player.editor().selection, Some((10, 11)));
                assert_eq!(player.editor().scroll, Some(40.0));
            })
            .await;
    }

    #[tokio::test]
    async fn test_stale_click_is_dropped() {
        LocalSet::new()
            .run_until(async {
                let (player, handle) = player(Counter::default(), Duration::ZERO);
                let task = tokio::task::spawn_local(player.run());

                handle.edit("X:1\nK:C\nCDEF|");
                handle.edit("X:1\nK:C\nC2 D2|");
                handle.send(Command::Click(ClickEvent {
                    element_ref: ElementRef { score: 1, tune: 0, index: 2 },
                    start_char: 10,
                    end_char: 11,
                }));
                drop(handle);

                let player = task.await.unwrap();
                assert_eq!(player.editor().selection, None);
            })
            .await;
    }

    #[tokio::test]
    async fn test_failed_compile_keeps_score() {
        LocalSet::new()
            .run_until(async {
                let (player, handle) = player(Counter::default(), Duration::ZERO);
                let task = tokio::task::spawn_local(player.run());

                handle.edit("X:1\nK:C\nCDEF|");
                handle.edit("X:1\nK:C\nCD#");
                drop(handle);

                let player = task.await.unwrap();
                assert!(matches!(player.compile_error(), Some(LegatoError::Compile { .. })));
                assert_eq!(player.surface().mounted(), Some(1));
                assert_eq!(player.source().as_str(), "X:1\nK:C\nCD#");
            })
            .await;
    }

    #[tokio::test]
    async fn test_toggle_without_source_is_error() {
        LocalSet::new()
            .run_until(async {
                let (player, handle) = player(Counter::default(), Duration::ZERO);
                let task = tokio::task::spawn_local(player.run());
                handle.toggle();
                let mut rx = handle.subscribe();
                rx.wait_for(|s| matches!(s, PlaybackState::Error(_))).await.unwrap();

                // Stopping clears the error
                handle.stop();
                wait_for(&handle, PlaybackState::Idle).await;
                drop(handle);
                task.await.unwrap();
            })
            .await;
    }
}
