//! Remote synthesis engine.
//!
//! Sends the tune's notation to a synthesis service and plays back the audio it
//! returns. The HTTP client and the audio output are both injected: [`Transport`]
//! performs requests and [`AudioPlayer`] plays a rendered buffer.
//!
//! The service emits no per-note events, so a remote session yields an empty event
//! stream and reports completion only through [`SynthSession::is_running`]
//! ([`CompletionMode::Polling`]).
//!
//! Every session of one back end plays through the same [`AudioPlayer`]. A session
//! takes the player over when it primes, and only the session holding it can stop it.

use std::cell::RefCell;
use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::RemoteConfig;
use crate::error::LegatoError;
use crate::score::{Tune, VisualScore};

use super::{Claim, CompletionMode, DeviceClaims, EventStream, SynthBackend, SynthSession};

const TARGET: &str = "legato::synth";

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Request boundary to the synthesis service. Errors are transport failures only;
/// HTTP error statuses come back as a [`Response`].
pub trait Transport {
    fn post(&self, path: &str, body: Vec<u8>) -> LocalBoxFuture<'static, Result<Response, String>>;

    fn get(&self, path: &str) -> LocalBoxFuture<'static, Result<Response, String>>;
}

/// Plays one rendered audio buffer.
pub trait AudioPlayer {
    /// Decode and buffer `audio`. May suspend.
    fn load(&mut self, audio: Vec<u8>) -> LocalBoxFuture<'static, Result<(), String>>;

    fn play(&mut self) -> Result<(), String>;

    fn stop(&mut self);

    fn is_playing(&self) -> bool;
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    abc: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Service status as reported by the health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub status: String,
    #[serde(default)]
    pub soundfont_found: bool,
    #[serde(default)]
    pub soundfont_path: Option<String>,
    #[serde(default)]
    pub soundfont_dir: Option<String>,
}

pub struct RemoteSynth<T: Transport, P: AudioPlayer + 'static> {
    transport: Rc<T>,
    player: Rc<RefCell<P>>,
    claims: DeviceClaims,
    config: RemoteConfig,
}

impl<T: Transport, P: AudioPlayer + 'static> RemoteSynth<T, P> {
    pub fn new(transport: T, player: P, config: RemoteConfig) -> Self {
        Self {
            transport: Rc::new(transport),
            player: Rc::new(RefCell::new(player)),
            claims: DeviceClaims::default(),
            config,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn player(&self) -> Rc<RefCell<P>> {
        Rc::clone(&self.player)
    }

    /// Query the service's health endpoint.
    pub async fn health(&self) -> Result<BackendHealth, LegatoError> {
        let response = self
            .transport
            .get(&self.config.health_path)
            .await
            .map_err(|detail| LegatoError::RemoteSynthesis { status: None, detail })?;
        if !response.is_success() {
            return Err(error_from_response(&response));
        }
        serde_json::from_slice(&response.body).map_err(|e| LegatoError::RemoteSynthesis {
            status: Some(response.status),
            detail: format!("Malformed health response: {}", e),
        })
    }
}

impl<T: Transport, P: AudioPlayer + 'static> SynthBackend for RemoteSynth<T, P> {
    type Session = RemoteSession<P>;

    fn acquire(
        &mut self,
        score: &VisualScore,
        tune: &Tune,
    ) -> LocalBoxFuture<'static, Result<RemoteSession<P>, LegatoError>> {
        let text = score.tune_text(tune).unwrap_or("").trim();
        if text.is_empty() {
            return future::ready(Err(LegatoError::SynthesisUnavailable(
                "ABC notation is empty".to_string(),
            )))
            .boxed_local();
        }

        let body = match serde_json::to_vec(&SynthesizeRequest { abc: text }) {
            Ok(body) => body,
            Err(e) => return future::ready(Err(LegatoError::SynthesisUnavailable(e.to_string()))).boxed_local(),
        };
        log::debug!(target: TARGET, "requesting synthesis of {} bytes of notation", text.len());

        let request = self.transport.post(&self.config.synthesize_path, body);
        let player = Rc::clone(&self.player);
        let claim = self.claims.issue();
        async move {
            let response = request
                .await
                .map_err(|detail| LegatoError::RemoteSynthesis { status: None, detail })?;
            if !response.is_success() {
                return Err(error_from_response(&response));
            }
            log::debug!(target: TARGET, "received {} bytes of audio", response.body.len());
            Ok(RemoteSession {
                audio: Some(response.body),
                player,
                claim,
            })
        }
        .boxed_local()
    }
}

/// Prefer the service's `detail` message; fall back to the raw body.
fn error_from_response(response: &Response) -> LegatoError {
    let detail = match serde_json::from_slice::<ErrorBody>(&response.body) {
        Ok(body) => body.detail,
        Err(_) => {
            let text = String::from_utf8_lossy(&response.body).trim().to_string();
            if text.is_empty() {
                format!("Synthesis failed with status {}", response.status)
            } else {
                text
            }
        }
    };
    LegatoError::RemoteSynthesis {
        status: Some(response.status),
        detail,
    }
}

pub struct RemoteSession<P: AudioPlayer + 'static> {
    audio: Option<Vec<u8>>,
    player: Rc<RefCell<P>>,
    claim: Claim,
}

impl<P: AudioPlayer + 'static> SynthSession for RemoteSession<P> {
    fn prime(&mut self) -> LocalBoxFuture<'static, Result<(), LegatoError>> {
        let Some(audio) = self.audio.take() else {
            return future::ready(Err(LegatoError::InvalidTransition {
                from: "primed",
                action: "prime",
            }))
            .boxed_local();
        };
        self.claim.take();
        self.player
            .borrow_mut()
            .load(audio)
            .map(|result| {
                result.map_err(|e| LegatoError::SynthesisUnavailable(format!("could not load audio: {}", e)))
            })
            .boxed_local()
    }

    fn start(&mut self) -> Result<EventStream, LegatoError> {
        if !self.claim.held() {
            return Err(LegatoError::SynthesisUnavailable(
                "audio output was taken over by another session".to_string(),
            ));
        }
        self.player
            .borrow_mut()
            .play()
            .map_err(LegatoError::SynthesisUnavailable)?;
        Ok(stream::empty().boxed_local())
    }

    fn stop(&mut self) {
        if self.claim.release() {
            self.player.borrow_mut().stop();
        }
    }

    fn is_running(&self) -> bool {
        self.claim.held() && self.player.borrow().is_playing()
    }

    fn completion(&self) -> CompletionMode {
        CompletionMode::Polling
    }
}
