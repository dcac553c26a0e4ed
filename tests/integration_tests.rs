//! Integration tests for the playback core
//!
//! Drives compile, click resolution and playback through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::stream::{self, StreamExt};
use tokio::task::LocalSet;
use tokio::time::Instant;

use legato::selection::{self, TextEditor};
use legato::synth::remote::Response;
use legato::synth::EventStream;
use legato::{
    compile, AbcTypesetter, AudioPlayer, Effect, ElementRef, LegatoError, MemorySurface, NullOutput,
    PlaybackController, PlaybackEvent, PlaybackState, Player, PlayerConfig, RemoteConfig, RemoteSynth,
    ScoreAdapter, ScoreSurface, SourceText, SynthBackend, SynthSession, TimelineSynth, Transport, Tune,
    VisualScore,
};

const FOUR_NOTES: &str = "X:1\nK:C\nCDEF|";

#[test]
fn test_four_notes_third_is_e() {
    let score = compile(FOUR_NOTES).unwrap();
    assert_eq!(score.tunes.len(), 1);

    let notes: Vec<_> = score.tunes[0].notes().collect();
    assert_eq!(notes.len(), 4);

    let range = selection::resolve(notes[2].id, &score).unwrap();
    assert_eq!(score.source.slice(range), Some("E"));
}

#[test]
fn test_compile_is_deterministic() {
    let source = "X:1\nT:Reel\nM:4/4\nL:1/8\nK:D\n|:d2fd A2FA|dfaf g2fe|\n[DFA]4 z4:|";
    let a = compile(source).unwrap();
    let b = compile(source).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_every_element_resolves_to_its_range() {
    let mut adapter = ScoreAdapter::new(AbcTypesetter::default());
    let score = adapter
        .compile(&SourceText::from("X:1\nK:Bb\n_B,2 c/d/ [=EG]2 z|]\nX:2\nK:A\nabc'|"))
        .unwrap();
    for element in score.elements() {
        assert_eq!(selection::resolve(element.id, &score), Ok(element.range));
        assert!(score.source.slice(element.range).is_some());
    }
}

#[test]
fn test_click_from_replaced_score_is_not_found() {
    let mut adapter = ScoreAdapter::new(AbcTypesetter::default());
    let old = adapter.compile(&SourceText::from(FOUR_NOTES)).unwrap();
    let new = adapter.compile(&SourceText::from("X:1\nK:C\nFEDC|")).unwrap();

    for element in old.elements() {
        assert_eq!(
            selection::resolve(element.id, &new),
            Err(LegatoError::ElementNotFound(element.id))
        );
    }
}

#[test]
fn test_compile_error_reports_location() {
    let err = compile("X:1\nK:C\nCD\nE#F|").unwrap_err();
    assert_eq!(
        err,
        LegatoError::Compile {
            line: 4,
            column: 2,
            message: "Unexpected character '#'".to_string(),
        }
    );
}

/// Back end whose acquire waits for a gate and which counts releases.
#[derive(Default)]
struct GatedBackend {
    gates: Rc<RefCell<Vec<oneshot::Sender<()>>>>,
    acquired: Rc<Cell<usize>>,
    released: Rc<Cell<usize>>,
}

struct GatedSession {
    released: Rc<Cell<usize>>,
}

impl SynthBackend for GatedBackend {
    type Session = GatedSession;

    fn acquire(&mut self, _score: &VisualScore, _tune: &Tune) -> LocalBoxFuture<'static, Result<GatedSession, LegatoError>> {
        let (tx, rx) = oneshot::channel();
        self.gates.borrow_mut().push(tx);
        let acquired = Rc::clone(&self.acquired);
        let released = Rc::clone(&self.released);
        async move {
            let _ = rx.await;
            acquired.set(acquired.get() + 1);
            Ok(GatedSession { released })
        }
        .boxed_local()
    }
}

impl SynthSession for GatedSession {
    fn prime(&mut self) -> LocalBoxFuture<'static, Result<(), LegatoError>> {
        future::pending().boxed_local()
    }

    fn start(&mut self) -> Result<EventStream, LegatoError> {
        Ok(stream::empty().boxed_local())
    }

    fn stop(&mut self) {
        self.released.set(self.released.get() + 1);
    }

    fn is_running(&self) -> bool {
        false
    }
}

#[test]
fn test_toggle_twice_before_prime_leaves_nothing_behind() {
    let score = compile(FOUR_NOTES).unwrap();
    let mut surface = MemorySurface::new();
    surface.mount(&score);

    let backend = GatedBackend::default();
    let gates = Rc::clone(&backend.gates);
    let released = Rc::clone(&backend.released);
    let mut controller = PlaybackController::new(backend);

    let mut effects = controller.toggle(Some(&score), &mut surface);
    assert_eq!(controller.state(), PlaybackState::Loading);

    // Acquire resolves, prime hangs
    let gate = gates.borrow_mut().remove(0);
    let _ = gate.send(());
    let op = match effects.remove(0) {
        Effect::Await(op) => op,
        other => panic!("unexpected {:?}", other),
    };
    let generation = op.generation;
    let resolution = op.future.now_or_never().unwrap();
    let pending = controller.resolve(generation, resolution, &mut surface);
    assert!(matches!(pending.as_slice(), [Effect::Await(_)]));
    assert_eq!(controller.state(), PlaybackState::Loading);

    controller.toggle(Some(&score), &mut surface);
    assert_eq!(controller.state(), PlaybackState::Idle);
    assert!(surface.highlighted().is_empty());
    assert_eq!(released.get(), 1);

    // Stopping again changes nothing
    controller.stop(&mut surface);
    controller.stop(&mut surface);
    assert_eq!(controller.state(), PlaybackState::Idle);
    assert_eq!(released.get(), 1);
}

#[tokio::test]
async fn test_shutdown_during_acquire_leaves_nothing_behind() {
    LocalSet::new()
        .run_until(async {
            let backend = GatedBackend::default();
            let gates = Rc::clone(&backend.gates);
            let acquired = Rc::clone(&backend.acquired);
            let released = Rc::clone(&backend.released);
            let (player, handle) = Player::new(
                ScoreAdapter::new(AbcTypesetter::default()),
                backend,
                MemorySurface::new(),
                Editor::default(),
                &PlayerConfig::default(),
            );
            let task = tokio::task::spawn_local(player.run());

            handle.edit(FOUR_NOTES);
            handle.toggle();
            handle
                .subscribe()
                .wait_for(|s| *s == PlaybackState::Loading)
                .await
                .unwrap();

            // The acquisition completes just as the last handle goes away
            let gate = gates.borrow_mut().remove(0);
            let _ = gate.send(());
            drop(handle);

            let player = task.await.unwrap();
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
            assert_eq!(released.get(), acquired.get());
            assert_eq!(player.controller().state(), PlaybackState::Idle);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_four_note_playback_highlights_in_order() {
    let score = compile(FOUR_NOTES).unwrap();
    let mut surface = MemorySurface::new();
    surface.mount(&score);
    let mut controller = PlaybackController::new(TimelineSynth::new(NullOutput));

    let mut queue = controller.toggle(Some(&score), &mut surface);
    let mut listen = None;
    while let Some(effect) = queue.pop() {
        match effect {
            Effect::Await(op) => {
                let resolution = op.future.await;
                queue.extend(controller.resolve(op.generation, resolution, &mut surface));
            }
            Effect::Listen { generation, events } => listen = Some((generation, events)),
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(controller.state(), PlaybackState::Running);

    let (generation, mut events) = listen.unwrap();
    let mut sequence = Vec::new();
    while let Some(event) = events.next().await {
        controller.on_event(generation, &event, &mut surface);
        if let PlaybackEvent::Sounding { .. } = event {
            sequence.push(surface.highlighted().iter().copied().collect::<Vec<_>>());
        }
    }

    let expected: Vec<Vec<ElementRef>> = score.tunes[0].notes().map(|n| vec![n.id]).collect();
    assert_eq!(sequence, expected);
    assert!(surface.highlighted().is_empty());
    assert!(surface.cursor().is_none());
    assert_eq!(controller.state(), PlaybackState::Idle);
}

#[derive(Default)]
struct Editor {
    selection: Option<(usize, usize)>,
}

impl TextEditor for Editor {
    fn set_selection(&mut self, start: usize, end: usize) {
        self.selection = Some((start, end));
    }

    fn scroll_to(&mut self, _top: f64) {}
}

#[tokio::test(start_paused = true)]
async fn test_recompile_mid_playback() {
    LocalSet::new()
        .run_until(async {
            let (player, handle) = Player::new(
                ScoreAdapter::new(AbcTypesetter::default()),
                TimelineSynth::new(NullOutput),
                MemorySurface::new(),
                Editor::default(),
                &PlayerConfig::default(),
            );
            let task = tokio::task::spawn_local(player.run());
            let mut state = handle.subscribe();

            handle.edit("X:1\nL:1/4\nK:C\nCDEFGABc|");
            handle.toggle();
            state.wait_for(|s| *s == PlaybackState::Running).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1100)).await;

            handle.edit("X:1\nL:1/4\nK:C\nc2 B2|");
            state.wait_for(|s| *s == PlaybackState::Idle).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(handle);

            let player = task.await.unwrap();
            let current = player.adapter().current().unwrap();
            assert_eq!(player.surface().mounted(), Some(current.id));
            assert!(player.surface().highlighted().is_empty());
            assert!(player.surface().cursor().is_none());
        })
        .await;
}

/// Transport that always returns the same audio buffer.
struct StaticTransport;

impl Transport for StaticTransport {
    fn post(&self, _path: &str, _body: Vec<u8>) -> LocalBoxFuture<'static, Result<Response, String>> {
        future::ready(Ok(Response {
            status: 200,
            body: b"RIFF".to_vec(),
        }))
        .boxed_local()
    }

    fn get(&self, _path: &str) -> LocalBoxFuture<'static, Result<Response, String>> {
        future::ready(Err("unsupported".to_string())).boxed_local()
    }
}

/// Plays for a fixed length of time and never signals the end.
struct TimedPlayer {
    length: Duration,
    ends_at: Option<Instant>,
}

impl AudioPlayer for TimedPlayer {
    fn load(&mut self, _audio: Vec<u8>) -> LocalBoxFuture<'static, Result<(), String>> {
        future::ready(Ok(())).boxed_local()
    }

    fn play(&mut self) -> Result<(), String> {
        self.ends_at = Some(Instant::now() + self.length);
        Ok(())
    }

    fn stop(&mut self) {
        self.ends_at = None;
    }

    fn is_playing(&self) -> bool {
        self.ends_at.map_or(false, |end| Instant::now() < end)
    }
}

#[tokio::test(start_paused = true)]
async fn test_polled_completion_lags_by_at_most_one_interval() {
    LocalSet::new()
        .run_until(async {
            let config = PlayerConfig::default();
            let synth = RemoteSynth::new(
                StaticTransport,
                TimedPlayer {
                    length: Duration::from_millis(1050),
                    ends_at: None,
                },
                RemoteConfig::default(),
            );
            let (player, handle) = Player::new(
                ScoreAdapter::new(AbcTypesetter::default()),
                synth,
                MemorySurface::new(),
                Editor::default(),
                &config,
            );
            let task = tokio::task::spawn_local(player.run());
            let mut state = handle.subscribe();

            handle.edit(FOUR_NOTES);
            handle.toggle();
            state.wait_for(|s| *s == PlaybackState::Running).await.unwrap();
            let started = Instant::now();
            state.wait_for(|s| *s == PlaybackState::Idle).await.unwrap();
            let observed = started.elapsed();

            assert!(observed >= Duration::from_millis(1050));
            assert!(observed <= Duration::from_millis(1050) + config.poll_interval());
            drop(handle);
            task.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_click_selects_source_text() {
    LocalSet::new()
        .run_until(async {
            let (player, handle) = Player::new(
                ScoreAdapter::new(AbcTypesetter::default()),
                TimelineSynth::new(NullOutput),
                MemorySurface::new(),
                Editor::default(),
                &PlayerConfig::default(),
            );
            let task = tokio::task::spawn_local(player.run());

            handle.edit(FOUR_NOTES);
            handle.send(legato::Command::Click(legato::ClickEvent {
                element_ref: ElementRef { score: 1, tune: 0, index: 2 },
                start_char: 10,
                end_char: 11,
            }));
            drop(handle);

            let player = task.await.unwrap();
            assert_eq!(player.editor().selection, Some((10, 11)));
        })
        .await;
}
