//! # Synthesis Sessions
//!
//! Lifecycle of one playback attempt against a synthesis back end.
//!
//! ## Phases
//! ```text
//! Idle → Acquiring → Priming → Primed → Running → Idle
//!          │            │         │         │
//!          └────────────┴─────────┴─────────┴──── stop() / error → Idle
//! ```
//!
//! ## Sub-modules
//! - `timeline` - Local engine: schedules note output and emits timed events
//! - `remote` - Remote engine: posts the tune to a synthesis service and plays the audio
//!
//! ## Key Types
//! - [`SynthBackend`] - Acquires sessions for a tune
//! - [`SynthSession`] - One acquired session: prime, start, stop
//! - [`SessionManager`] - Owns the single live session and its phase
//! - [`PendingOp`] - A suspended acquire or prime, tagged with its generation
//!
//! ## Suspension and Cancellation
//! `acquire` and `prime` return owned futures. The manager never awaits them itself;
//! the driver does, and feeds the outcome back through [`SessionManager::resolve`]
//! together with the generation it was started under. A resolution whose generation
//! is no longer current, or that arrives after `stop()`, is discarded. A session that
//! is acquired after its attempt was cancelled is released immediately.
//!
//! `stop()` never suspends and never fails. It moves the session out of the manager
//! before releasing it, so a session is released exactly once.

pub mod remote;
pub mod timeline;

use std::cell::Cell;
use std::mem;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::LocalBoxStream;

use crate::error::LegatoError;
use crate::score::{PlaybackEvent, Tune, VisualScore};

const TARGET: &str = "legato::synth";

/// Identity of one playback attempt.
pub type Generation = u64;

/// Ordered stream of events produced by a running session.
pub type EventStream = LocalBoxStream<'static, PlaybackEvent>;

/// How the end of playback is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// The event stream ends with [`PlaybackEvent::Finished`].
    Signal,
    /// No end signal; the driver polls [`SynthSession::is_running`].
    Polling,
}

pub trait SynthSession {
    /// Warm up (load samples, buffer audio). May suspend for an unbounded time.
    fn prime(&mut self) -> LocalBoxFuture<'static, Result<(), LegatoError>>;

    /// Begin real-time playback. Only called on a primed session.
    fn start(&mut self) -> Result<EventStream, LegatoError>;

    /// Release every resource held by the session. Must not fail.
    fn stop(&mut self);

    /// Running-state flag used by the polling completion mode.
    fn is_running(&self) -> bool;

    fn completion(&self) -> CompletionMode {
        CompletionMode::Signal
    }
}

pub trait SynthBackend {
    type Session: SynthSession + 'static;

    /// Request synthesis resources for one tune. May suspend for an unbounded time.
    fn acquire(
        &mut self,
        score: &VisualScore,
        tune: &Tune,
    ) -> LocalBoxFuture<'static, Result<Self::Session, LegatoError>>;
}

/// Issues [`Claim`]s on an output device shared by every session of one back end.
#[derive(Debug, Default)]
pub(crate) struct DeviceClaims {
    holder: Rc<Cell<u64>>,
    issued: u64,
}

impl DeviceClaims {
    pub(crate) fn issue(&mut self) -> Claim {
        self.issued += 1;
        Claim {
            id: self.issued,
            holder: Rc::clone(&self.holder),
        }
    }
}

/// One session's right to drive the shared device. Only the current holder may
/// silence it; a session that never took the device releases nothing.
#[derive(Debug)]
pub(crate) struct Claim {
    id: u64,
    holder: Rc<Cell<u64>>,
}

impl Claim {
    pub(crate) fn take(&self) {
        self.holder.set(self.id);
    }

    pub(crate) fn held(&self) -> bool {
        self.holder.get() == self.id
    }

    /// Give the device up. Returns whether this session was holding it.
    pub(crate) fn release(&self) -> bool {
        let held = self.held();
        if held {
            self.holder.set(0);
        }
        held
    }
}

/// Outcome of a suspended operation.
pub enum Resolution<S> {
    Acquired(Result<S, LegatoError>),
    Primed(Result<(), LegatoError>),
}

/// A suspended acquire or prime that the driver must await.
pub struct PendingOp<S> {
    pub generation: Generation,
    pub future: LocalBoxFuture<'static, Resolution<S>>,
}

/// What the manager did with a resolution.
pub enum Advance<S> {
    /// Acquired; the prime step is now pending.
    Pending(PendingOp<S>),
    /// Primed and ready to start.
    Ready,
    /// The attempt failed and its resources were released.
    Failed(LegatoError),
    /// The resolution belonged to a cancelled attempt and was discarded.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Acquiring,
    Priming,
    Primed,
    Running,
}

enum Slot<S> {
    Idle,
    Acquiring,
    Priming(S),
    Primed(S),
    Running(S),
}

impl<S> Slot<S> {
    fn phase(&self) -> SessionPhase {
        match self {
            Slot::Idle => SessionPhase::Idle,
            Slot::Acquiring => SessionPhase::Acquiring,
            Slot::Priming(_) => SessionPhase::Priming,
            Slot::Primed(_) => SessionPhase::Primed,
            Slot::Running(_) => SessionPhase::Running,
        }
    }
}

fn phase_name(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Idle => "idle",
        SessionPhase::Acquiring => "acquiring",
        SessionPhase::Priming => "priming",
        SessionPhase::Primed => "primed",
        SessionPhase::Running => "running",
    }
}

/// Owner of the single live synthesis session.
pub struct SessionManager<B: SynthBackend> {
    backend: B,
    generation: Generation,
    slot: Slot<B::Session>,
}

impl<B: SynthBackend> SessionManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            generation: 0,
            slot: Slot::Idle,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn phase(&self) -> SessionPhase {
        self.slot.phase()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Start a new attempt, stopping any live session first.
    pub fn acquire(
        &mut self,
        generation: Generation,
        score: &VisualScore,
        tune: &Tune,
    ) -> PendingOp<B::Session> {
        self.stop();
        self.generation = generation;
        self.slot = Slot::Acquiring;
        log::debug!(target: TARGET, "acquiring session for tune {} (generation {})", tune.index, generation);

        let future = self
            .backend
            .acquire(score, tune)
            .map(Resolution::Acquired)
            .boxed_local();
        PendingOp { generation, future }
    }

    /// Feed back the outcome of a pending operation.
    pub fn resolve(&mut self, generation: Generation, resolution: Resolution<B::Session>) -> Advance<B::Session> {
        let current = generation == self.generation;

        match (resolution, mem::replace(&mut self.slot, Slot::Idle)) {
            (Resolution::Acquired(Ok(mut session)), Slot::Acquiring) if current => {
                log::debug!(target: TARGET, "session acquired (generation {}), priming", generation);
                let future = session.prime().map(Resolution::Primed).boxed_local();
                self.slot = Slot::Priming(session);
                Advance::Pending(PendingOp { generation, future })
            }
            (Resolution::Primed(Ok(())), Slot::Priming(session)) if current => {
                log::debug!(target: TARGET, "session primed (generation {})", generation);
                self.slot = Slot::Primed(session);
                Advance::Ready
            }
            (Resolution::Acquired(Err(e)), Slot::Acquiring) if current => {
                log::warn!(target: TARGET, "acquire failed: {}", e);
                Advance::Failed(e)
            }
            (Resolution::Primed(Err(e)), Slot::Priming(mut session)) if current => {
                log::warn!(target: TARGET, "prime failed: {}", e);
                session.stop();
                Advance::Failed(e)
            }
            (resolution, slot) => {
                self.slot = slot;
                if let Resolution::Acquired(Ok(mut late)) = resolution {
                    late.stop();
                }
                log::debug!(target: TARGET, "discarded late resolution for generation {}", generation);
                Advance::Stale
            }
        }
    }

    /// Begin playback of the primed session.
    pub fn start(&mut self) -> Result<EventStream, LegatoError> {
        match mem::replace(&mut self.slot, Slot::Idle) {
            Slot::Primed(mut session) => match session.start() {
                Ok(events) => {
                    log::info!(target: TARGET, "playback started (generation {})", self.generation);
                    self.slot = Slot::Running(session);
                    Ok(events)
                }
                Err(e) => {
                    log::warn!(target: TARGET, "start failed: {}", e);
                    session.stop();
                    Err(e)
                }
            },
            other => {
                let from = phase_name(other.phase());
                self.slot = other;
                Err(LegatoError::InvalidTransition { from, action: "start" })
            }
        }
    }

    /// Release the live session, if any. Idempotent.
    pub fn stop(&mut self) {
        match mem::replace(&mut self.slot, Slot::Idle) {
            Slot::Idle => {}
            Slot::Acquiring => {
                log::debug!(target: TARGET, "cancelled acquisition (generation {})", self.generation);
            }
            Slot::Priming(mut session) | Slot::Primed(mut session) | Slot::Running(mut session) => {
                session.stop();
                log::info!(target: TARGET, "session released (generation {})", self.generation);
            }
        }
    }

    /// True while a started session reports that it is still playing.
    pub fn is_running(&self) -> bool {
        match &self.slot {
            Slot::Running(session) => session.is_running(),
            _ => false,
        }
    }

    pub fn completion(&self) -> Option<CompletionMode> {
        match &self.slot {
            Slot::Priming(s) | Slot::Primed(s) | Slot::Running(s) => Some(s.completion()),
            _ => None,
        }
    }
}

impl<B: SynthBackend> Drop for SessionManager<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
