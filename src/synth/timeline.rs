//! Local synthesis engine.
//!
//! Schedules note on/off messages for a tune against wall-clock time and emits a
//! [`PlaybackEvent`] at each onset. Sound generation itself is delegated to a
//! [`NoteOutput`] (a MIDI port, a soft synth, or nothing at all).
//!
//! Timing:
//! - One step per distinct onset; a step's event lists every element starting there.
//! - Seconds per beat is `60 / tempo`, with the tune's quarter-note tempo.
//! - A note tied into an identical note is not re-attacked.
//! - After the last element ends, all notes are released and `Finished` is emitted.
//! - Tunes longer than [`MAX_LENGTH`] are refused at prime.
//!
//! Sessions share the back end's output. A session takes it over when it primes, and
//! only the session holding it sends `all_notes_off` on stop.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::stream::{self, StreamExt};
use tokio::time::Instant;

use crate::error::LegatoError;
use crate::score::{ElementRef, PlaybackEvent, Tune, VisualScore};

use super::{Claim, CompletionMode, DeviceClaims, EventStream, SynthBackend, SynthSession};

pub const DEFAULT_VELOCITY: u8 = 80;

/// Longest tune the local engine will schedule.
pub const MAX_LENGTH: Duration = Duration::from_secs(24 * 60 * 60);

/// Sink for note messages.
pub trait NoteOutput {
    fn note_on(&mut self, pitch: u8, velocity: u8);
    fn note_off(&mut self, pitch: u8);
    fn all_notes_off(&mut self);
}

/// Output that discards everything; playback still drives highlighting.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl NoteOutput for NullOutput {
    fn note_on(&mut self, _pitch: u8, _velocity: u8) {}
    fn note_off(&mut self, _pitch: u8) {}
    fn all_notes_off(&mut self) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Offset from the start of playback
    pub at: Duration,
    pub elements: Vec<ElementRef>,
    pub release: Vec<u8>,
    pub attack: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Timeline {
    pub steps: Vec<Step>,
    pub end: Duration,
}

impl Timeline {
    pub fn build(tune: &Tune) -> Result<Self, LegatoError> {
        let seconds_per_beat = 60.0 / tune.tempo.max(1) as f64;
        let offset = |beats: f64| {
            Duration::try_from_secs_f64((beats * seconds_per_beat).max(0.0))
                .ok()
                .filter(|at| *at <= MAX_LENGTH)
                .ok_or_else(|| LegatoError::SynthesisUnavailable("tune is too long to schedule".to_string()))
        };

        let mut steps: Vec<Step> = Vec::new();
        let mut sounding: Vec<u8> = Vec::new();
        let mut tied = false;

        for element in &tune.elements {
            let Some(timing) = element.timing else {
                continue;
            };
            let at = offset(timing.start)?;
            let sustained = tied && element.pitches == sounding;

            let (release, attack) = if sustained {
                (Vec::new(), Vec::new())
            } else {
                (std::mem::take(&mut sounding), element.pitches.clone())
            };
            sounding = element.pitches.clone();
            tied = element.tie;

            match steps.last_mut() {
                Some(last) if last.at == at => {
                    last.elements.push(element.id);
                    last.release.extend(release);
                    last.attack.extend(attack);
                }
                _ => steps.push(Step {
                    at,
                    elements: vec![element.id],
                    release,
                    attack,
                }),
            }
        }

        Ok(Timeline {
            steps,
            end: offset(tune.length())?,
        })
    }
}

/// Local engine backed by a [`NoteOutput`].
pub struct TimelineSynth<O: NoteOutput + 'static> {
    output: Rc<RefCell<O>>,
    claims: DeviceClaims,
    velocity: u8,
    warmup: Duration,
}

impl<O: NoteOutput + 'static> TimelineSynth<O> {
    pub fn new(output: O) -> Self {
        Self {
            output: Rc::new(RefCell::new(output)),
            claims: DeviceClaims::default(),
            velocity: DEFAULT_VELOCITY,
            warmup: Duration::ZERO,
        }
    }

    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.velocity = velocity.min(127);
        self
    }

    /// Delay applied by `prime`, standing in for instrument loading.
    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn output(&self) -> Rc<RefCell<O>> {
        Rc::clone(&self.output)
    }
}

impl<O: NoteOutput + 'static> SynthBackend for TimelineSynth<O> {
    type Session = TimelineSession<O>;

    fn acquire(
        &mut self,
        _score: &VisualScore,
        tune: &Tune,
    ) -> LocalBoxFuture<'static, Result<TimelineSession<O>, LegatoError>> {
        let result = if tune.notes().next().is_none() {
            Err(LegatoError::SynthesisUnavailable(
                "tune has no playable notes".to_string(),
            ))
        } else {
            Ok(TimelineSession {
                output: Rc::clone(&self.output),
                claim: self.claims.issue(),
                velocity: self.velocity,
                warmup: self.warmup,
                tune: tune.clone(),
                timeline: None,
                running: Rc::new(Cell::new(false)),
            })
        };
        future::ready(result).boxed_local()
    }
}

pub struct TimelineSession<O: NoteOutput + 'static> {
    output: Rc<RefCell<O>>,
    claim: Claim,
    velocity: u8,
    warmup: Duration,
    tune: Tune,
    timeline: Option<Timeline>,
    running: Rc<Cell<bool>>,
}

impl<O: NoteOutput + 'static> SynthSession for TimelineSession<O> {
    fn prime(&mut self) -> LocalBoxFuture<'static, Result<(), LegatoError>> {
        match Timeline::build(&self.tune) {
            Ok(timeline) => self.timeline = Some(timeline),
            Err(e) => return future::ready(Err(e)).boxed_local(),
        }
        self.claim.take();
        let warmup = self.warmup;
        if warmup.is_zero() {
            future::ready(Ok(())).boxed_local()
        } else {
            async move {
                tokio::time::sleep(warmup).await;
                Ok(())
            }
            .boxed_local()
        }
    }

    fn start(&mut self) -> Result<EventStream, LegatoError> {
        let timeline = self
            .timeline
            .take()
            .ok_or(LegatoError::InvalidTransition {
                from: "unprimed",
                action: "start",
            })?;
        self.running.set(true);

        let playhead = Playhead {
            steps: timeline.steps.into_iter(),
            end: timeline.end,
            origin: None,
            output: Rc::clone(&self.output),
            velocity: self.velocity,
            running: Rc::clone(&self.running),
            done: false,
        };
        Ok(stream::unfold(playhead, |mut playhead| async move {
            let event = playhead.advance().await?;
            Some((event, playhead))
        })
        .boxed_local())
    }

    fn stop(&mut self) {
        self.running.set(false);
        if self.claim.release() {
            self.output.borrow_mut().all_notes_off();
        }
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }

    fn completion(&self) -> CompletionMode {
        CompletionMode::Signal
    }
}

struct Playhead<O: NoteOutput> {
    steps: std::vec::IntoIter<Step>,
    end: Duration,
    origin: Option<Instant>,
    output: Rc<RefCell<O>>,
    velocity: u8,
    running: Rc<Cell<bool>>,
    done: bool,
}

impl<O: NoteOutput> Playhead<O> {
    async fn advance(&mut self) -> Option<PlaybackEvent> {
        if self.done {
            return None;
        }
        let origin = *self.origin.get_or_insert_with(Instant::now);

        match self.steps.next() {
            Some(step) => {
                tokio::time::sleep_until(origin + step.at).await;
                if !self.running.get() {
                    self.done = true;
                    return None;
                }
                let mut output = self.output.borrow_mut();
                for pitch in &step.release {
                    output.note_off(*pitch);
                }
                for pitch in &step.attack {
                    output.note_on(*pitch, self.velocity);
                }
                Some(PlaybackEvent::sounding(step.elements))
            }
            None => {
                tokio::time::sleep_until(origin + self.end).await;
                self.done = true;
                if !self.running.get() {
                    return None;
                }
                self.output.borrow_mut().all_notes_off();
                self.running.set(false);
                Some(PlaybackEvent::Finished)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;

    #[derive(Debug, Clone, PartialEq)]
    enum Message {
        On(u8),
        Off(u8),
        AllOff,
    }

    #[derive(Default)]
    struct Recorder {
        messages: Vec<Message>,
    }

    impl NoteOutput for Recorder {
        fn note_on(&mut self, pitch: u8, _velocity: u8) {
            self.messages.push(Message::On(pitch));
        }

        fn note_off(&mut self, pitch: u8) {
            self.messages.push(Message::Off(pitch));
        }

        fn all_notes_off(&mut self) {
            self.messages.push(Message::AllOff);
        }
    }

    #[test]
    fn test_timeline_steps_follow_tempo() {
        let score = compile("X:1\nL:1/4\nQ:1/4=60\nK:C\nCDEF|").unwrap();
        let timeline = Timeline::build(&score.tunes[0]).unwrap();

        let offsets: Vec<_> = timeline.steps.iter().map(|s| s.at).collect();
        assert_eq!(
            offsets,
            vec![
                Duration::from_secs(0),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3)
            ]
        );
        assert_eq!(timeline.end, Duration::from_secs(4));
        assert_eq!(timeline.steps[1].release, vec![60]);
        assert_eq!(timeline.steps[1].attack, vec![62]);
        assert_eq!(timeline.steps[1].elements, vec![score.tunes[0].elements[1].id]);
    }

    #[test]
    fn test_tied_notes_are_not_reattacked() {
        let score = compile("X:1\nK:C\nC2-C2 D").unwrap();
        let timeline = Timeline::build(&score.tunes[0]).unwrap();
        assert_eq!(timeline.steps.len(), 3);
        assert!(timeline.steps[1].attack.is_empty());
        assert!(timeline.steps[1].release.is_empty());
        assert_eq!(timeline.steps[2].release, vec![60]);
    }

    #[test]
    fn test_rests_release_and_are_highlighted() {
        let score = compile("X:1\nK:C\nC z D").unwrap();
        let timeline = Timeline::build(&score.tunes[0]).unwrap();
        assert_eq!(timeline.steps[1].release, vec![60]);
        assert!(timeline.steps[1].attack.is_empty());
        assert_eq!(timeline.steps[1].elements.len(), 1);
    }

    #[test]
    fn test_acquire_rejects_tune_without_notes() {
        let score = compile("X:1\nK:C\nz2 |").unwrap();
        let mut synth = TimelineSynth::new(NullOutput);
        let result = synth.acquire(&score, &score.tunes[0]).now_or_never().unwrap();
        assert!(matches!(result, Err(LegatoError::SynthesisUnavailable(_))));
    }

    #[test]
    fn test_prime_refuses_tune_too_long_to_schedule() {
        let score = compile("X:1\nL:4294967295/1\nK:C\nC4294967295|").unwrap();
        assert!(Timeline::build(&score.tunes[0]).is_err());

        let mut synth = TimelineSynth::new(NullOutput);
        let mut session = synth.acquire(&score, &score.tunes[0]).now_or_never().unwrap().unwrap();
        assert_eq!(
            session.prime().now_or_never().unwrap(),
            Err(LegatoError::SynthesisUnavailable("tune is too long to schedule".to_string()))
        );
        assert!(session.start().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_plays_in_order_then_finishes() {
        let score = compile("X:1\nL:1/4\nQ:1/4=120\nK:C\nCD|").unwrap();
        let mut synth = TimelineSynth::new(Recorder::default());
        let output = synth.output();

        let mut session = synth.acquire(&score, &score.tunes[0]).await.unwrap();
        session.prime().await.unwrap();
        let begin = Instant::now();
        let mut events = session.start().unwrap();
        assert!(session.is_running());

        let ids: Vec<_> = score.tunes[0].elements.iter().map(|e| e.id).collect();
        assert_eq!(events.next().await, Some(PlaybackEvent::sounding(vec![ids[0]])));
        assert_eq!(events.next().await, Some(PlaybackEvent::sounding(vec![ids[1]])));
        assert!(begin.elapsed() >= Duration::from_millis(500));
        assert_eq!(events.next().await, Some(PlaybackEvent::Finished));
        assert!(begin.elapsed() >= Duration::from_secs(1));
        assert_eq!(events.next().await, None);
        assert!(!session.is_running());

        assert_eq!(
            output.borrow().messages,
            vec![Message::On(60), Message::Off(60), Message::On(62), Message::AllOff]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_stream() {
        let score = compile("X:1\nK:C\nCDEF").unwrap();
        let mut synth = TimelineSynth::new(NullOutput).with_warmup(Duration::from_millis(250));
        let mut session = synth.acquire(&score, &score.tunes[0]).await.unwrap();
        session.prime().await.unwrap();
        let mut events = session.start().unwrap();

        assert!(matches!(events.next().await, Some(PlaybackEvent::Sounding { .. })));
        session.stop();
        assert!(!session.is_running());
        assert_eq!(events.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopping_unprimed_session_keeps_live_notes() {
        let score = compile("X:1\nK:C\nCDEF|").unwrap();
        let mut synth = TimelineSynth::new(Recorder::default());
        let output = synth.output();

        let mut late = synth.acquire(&score, &score.tunes[0]).await.unwrap();
        let mut live = synth.acquire(&score, &score.tunes[0]).await.unwrap();
        live.prime().await.unwrap();
        let mut events = live.start().unwrap();
        assert!(matches!(events.next().await, Some(PlaybackEvent::Sounding { .. })));

        late.stop();
        assert!(live.is_running());
        assert_eq!(output.borrow().messages, vec![Message::On(60)]);

        live.stop();
        assert_eq!(output.borrow().messages.last(), Some(&Message::AllOff));
    }
}
