//! # Playback Controller
//!
//! The state machine behind the play/stop button.
//!
//! ## States
//! | Current | Event | Next |
//! |---|---|---|
//! | Idle / Error | `toggle` | Loading |
//! | Loading | primed | Running |
//! | Loading | acquire or prime failed | Error |
//! | Loading / Running | `toggle`, `stop` | Idle |
//! | Running | completion | Idle |
//! | any | `source_changed` | Idle |
//!
//! ## Effects
//! The controller never awaits or spawns anything. Each call returns the [`Effect`]s the
//! driver must carry out: await a pending operation, forward an event stream, start a
//! completion poll, or halt the background work of the previous attempt. Everything the
//! driver feeds back is tagged with the [`Generation`] it was started under and is
//! ignored once that generation has been superseded.

use std::time::Duration;

use tokio::sync::watch;

use crate::error::LegatoError;
use crate::score::{PlaybackEvent, VisualScore};
use crate::surface::ScoreSurface;
use crate::synth::{Advance, CompletionMode, EventStream, Generation, PendingOp, Resolution, SessionManager, SynthBackend};
use crate::tracker::{TrackStep, Tracker};

const TARGET: &str = "legato::playback";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Running,
    /// The last attempt failed; `toggle` retries from scratch.
    Error(String),
}

impl PlaybackState {
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackState::Loading | PlaybackState::Running)
    }
}

/// Work the driver must perform on the controller's behalf.
pub enum Effect<S> {
    /// Await the operation and pass its outcome to [`PlaybackController::resolve`].
    Await(PendingOp<S>),
    /// Forward each event to [`PlaybackController::on_event`], then report the end of the
    /// stream to [`PlaybackController::stream_closed`].
    Listen { generation: Generation, events: EventStream },
    /// Call [`PlaybackController::poll_completion`] every `interval`.
    Poll { generation: Generation, interval: Duration },
    /// Abort every forwarding and polling task started so far.
    Halt,
}

impl<S> std::fmt::Debug for Effect<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::Await(op) => write!(f, "Await({})", op.generation),
            Effect::Listen { generation, .. } => write!(f, "Listen({})", generation),
            Effect::Poll { generation, interval } => write!(f, "Poll({}, {:?})", generation, interval),
            Effect::Halt => write!(f, "Halt"),
        }
    }
}

pub struct PlaybackController<B: SynthBackend> {
    sessions: SessionManager<B>,
    tracker: Tracker,
    generation: Generation,
    state: watch::Sender<PlaybackState>,
    poll_interval: Duration,
}

impl<B: SynthBackend> PlaybackController<B> {
    pub fn new(backend: B) -> Self {
        let (state, _) = watch::channel(PlaybackState::Idle);
        Self {
            sessions: SessionManager::new(backend),
            tracker: Tracker::new(),
            generation: 0,
            state,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Interval for backends that only report completion through a running flag.
    /// Observed end of playback lags the real end by at most one interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state.subscribe()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn sessions(&self) -> &SessionManager<B> {
        &self.sessions
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Start playback of the score's first tune, or stop whatever is in progress.
    pub fn toggle(&mut self, score: Option<&VisualScore>, surface: &mut dyn ScoreSurface) -> Vec<Effect<B::Session>> {
        if self.state.borrow().is_active() {
            return self.halt(surface);
        }

        self.generation += 1;
        let Some((score, tune)) = score.and_then(|s| s.first_tune().map(|t| (s, t))) else {
            self.set_state(PlaybackState::Error(
                LegatoError::SynthesisUnavailable("nothing to play".to_string()).to_string(),
            ));
            return Vec::new();
        };

        self.tracker.attach(score.id);
        let op = self.sessions.acquire(self.generation, score, tune);
        self.set_state(PlaybackState::Loading);
        vec![Effect::Await(op)]
    }

    /// Stop from any state. Idempotent.
    pub fn stop(&mut self, surface: &mut dyn ScoreSurface) -> Vec<Effect<B::Session>> {
        if self.state.borrow().is_active() {
            self.halt(surface)
        } else {
            self.set_state(PlaybackState::Idle);
            Vec::new()
        }
    }

    /// The source text changed; the current score is about to be replaced.
    pub fn source_changed(&mut self, surface: &mut dyn ScoreSurface) -> Vec<Effect<B::Session>> {
        let effects = self.stop(surface);
        self.tracker.detach();
        effects
    }

    /// Outcome of an awaited operation.
    pub fn resolve(
        &mut self,
        generation: Generation,
        resolution: Resolution<B::Session>,
        surface: &mut dyn ScoreSurface,
    ) -> Vec<Effect<B::Session>> {
        match self.sessions.resolve(generation, resolution) {
            Advance::Pending(op) => vec![Effect::Await(op)],
            Advance::Ready => self.begin(surface),
            Advance::Failed(e) => {
                self.fail(e, surface);
                Vec::new()
            }
            Advance::Stale => Vec::new(),
        }
    }

    /// One event from the running session's stream.
    pub fn on_event(
        &mut self,
        generation: Generation,
        event: &PlaybackEvent,
        surface: &mut dyn ScoreSurface,
    ) -> Vec<Effect<B::Session>> {
        if !self.is_current(generation) {
            return Vec::new();
        }
        match self.tracker.on_event(event, surface) {
            TrackStep::Continue => Vec::new(),
            TrackStep::Finished => self.finish(surface),
        }
    }

    /// The event stream ended. Only push-completion sessions treat that as the end of
    /// playback; polling sessions have no events to begin with.
    pub fn stream_closed(&mut self, generation: Generation, surface: &mut dyn ScoreSurface) -> Vec<Effect<B::Session>> {
        if self.is_current(generation) && self.sessions.completion() == Some(CompletionMode::Signal) {
            log::debug!(target: TARGET, "event stream closed without a finish signal");
            return self.finish(surface);
        }
        Vec::new()
    }

    /// Periodic check of the session's running flag.
    pub fn poll_completion(&mut self, generation: Generation, surface: &mut dyn ScoreSurface) -> Vec<Effect<B::Session>> {
        if self.is_current(generation) && !self.sessions.is_running() {
            return self.finish(surface);
        }
        Vec::new()
    }

    fn is_current(&self, generation: Generation) -> bool {
        generation == self.generation && *self.state.borrow() == PlaybackState::Running
    }

    fn begin(&mut self, surface: &mut dyn ScoreSurface) -> Vec<Effect<B::Session>> {
        let completion = self.sessions.completion();
        match self.sessions.start() {
            Ok(events) => {
                self.set_state(PlaybackState::Running);
                let generation = self.generation;
                let mut effects = vec![Effect::Listen { generation, events }];
                if completion == Some(CompletionMode::Polling) {
                    effects.push(Effect::Poll {
                        generation,
                        interval: self.poll_interval,
                    });
                }
                effects
            }
            Err(e) => {
                self.fail(e, surface);
                Vec::new()
            }
        }
    }

    fn finish(&mut self, surface: &mut dyn ScoreSurface) -> Vec<Effect<B::Session>> {
        log::info!(target: TARGET, "playback finished (generation {})", self.generation);
        self.halt(surface)
    }

    fn halt(&mut self, surface: &mut dyn ScoreSurface) -> Vec<Effect<B::Session>> {
        self.generation += 1;
        self.sessions.stop();
        self.tracker.clear(surface);
        self.set_state(PlaybackState::Idle);
        vec![Effect::Halt]
    }

    fn fail(&mut self, error: LegatoError, surface: &mut dyn ScoreSurface) {
        log::warn!(target: TARGET, "playback failed: {}", error);
        self.sessions.stop();
        self.tracker.clear(surface);
        self.set_state(PlaybackState::Error(error.to_string()));
    }

    fn set_state(&self, next: PlaybackState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            log::debug!(target: TARGET, "{:?} -> {:?}", state, next);
            *state = next;
            true
        });
    }
}
