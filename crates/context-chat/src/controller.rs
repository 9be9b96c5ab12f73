//! Client-side request controller with primary/fallback routing.
//!
//! The controller runs in the calling application. For each user message it
//! first asks the chat server ([`PrimaryBackend`]); if that call fails for
//! any reason it replays a reduced version of the generation step directly
//! against the model ([`Generator`]), using its own bounded buffer of recent
//! turns instead of server-side retrieval and persistence.
//!
//! ```text
//!            submit                 ok
//!   Idle ───────────▶ AwaitingPrimary ───────────▶ Idle
//!                          │ err                     ▲
//!                          ▼              ok / err   │
//!                     AwaitingFallback ──────────────┘
//! ```
//!
//! Only one request may be in flight: a submission while the controller is
//! not [`ControllerState::Idle`] is rejected with [`ControllerError::Busy`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use context_chat_core::error::GenerationError;
use context_chat_core::generation::{Generator, PromptRole, PromptTurn};
use context_chat_core::models::Turn;

use crate::config::ClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    AwaitingPrimary,
    AwaitingFallback,
}

/// Which backend produced an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub route: Route,
}

/// Why the primary route did not produce an answer.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("chat server unreachable: {0}")]
    Transport(String),

    #[error("chat server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed chat server response: {0}")]
    Malformed(String),

    #[error("invalid chat server url: {0}")]
    InvalidUrl(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("a request is already in flight")]
    Busy,

    #[error("message required")]
    EmptyMessage,

    /// Both routes failed. The only user-visible failure of [`ChatController::submit`].
    #[error("{fallback}")]
    FallbackFailed {
        primary: RouteError,
        fallback: GenerationError,
    },

    #[error("nothing to regenerate")]
    NothingToRegenerate,

    #[error("regeneration failed: {0}")]
    RegenerateFailed(GenerationError),
}

/// The server pipeline as seen from the client.
#[async_trait]
pub trait PrimaryBackend: Send + Sync {
    async fn query(&self, session_id: &str, message: &str) -> Result<String, RouteError>;
}

/// [`PrimaryBackend`] that talks to `POST {server_url}/chat/query/{session_id}`.
///
/// Session ids are opaque: they are percent-encoded as a single path
/// segment, so `/`, `?` or `#` inside an id cannot change the route.
pub struct HttpPrimary {
    http: reqwest::Client,
    base_url: reqwest::Url,
}

#[derive(Serialize)]
struct QueryBody<'a> {
    message: &'a str,
}

#[derive(Deserialize)]
struct AnswerBody {
    answer: String,
}

#[derive(Deserialize)]
struct HistoryBody {
    history: Vec<Turn>,
}

impl HttpPrimary {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RouteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RouteError::Transport(e.to_string()))?;
        let base_url: String = base_url.into();
        let base_url = reqwest::Url::parse(&base_url)
            .map_err(|e| RouteError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(RouteError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { http, base_url })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, RouteError> {
        Self::new(&config.server_url, Duration::from_secs(config.timeout_secs))
    }

    /// `{server_url}/chat/{route}/{session_id}` with the id as one segment.
    fn session_url(&self, route: &str, session_id: &str) -> Result<reqwest::Url, RouteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RouteError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["chat", route, session_id]);
        Ok(url)
    }

    /// Fetch the server-side history for a session.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>, RouteError> {
        let response = self
            .http
            .get(self.session_url("history", session_id)?)
            .send()
            .await
            .map_err(|e| RouteError::Transport(e.to_string()))?;
        let body: HistoryBody = read_success(response).await?;
        Ok(body.history)
    }
}

async fn read_success<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, RouteError> {
    let status = response.status();
    if !status.is_success() {
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message = body
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("request failed")
            .to_string();
        return Err(RouteError::Status {
            status: status.as_u16(),
            message,
        });
    }
    response
        .json()
        .await
        .map_err(|e| RouteError::Malformed(e.to_string()))
}

#[async_trait]
impl PrimaryBackend for HttpPrimary {
    async fn query(&self, session_id: &str, message: &str) -> Result<String, RouteError> {
        let response = self
            .http
            .post(self.session_url("query", session_id)?)
            .json(&QueryBody { message })
            .send()
            .await
            .map_err(|e| RouteError::Transport(e.to_string()))?;
        let body: AnswerBody = read_success(response).await?;
        Ok(body.answer)
    }
}

/// Marks the controller busy for one request.
///
/// On drop the state returns to idle and, unless [`InFlight::commit`] was
/// called, the user turn recorded by [`InFlight::record_user`] is removed
/// again. Both also happen when the request future is cancelled mid-flight,
/// so the buffer never keeps an unanswered user turn.
struct InFlight<'a> {
    state: &'a Mutex<ControllerState>,
    pending: Option<&'a Mutex<Vec<PromptTurn>>>,
}

impl<'a> InFlight<'a> {
    fn begin(state: &'a Mutex<ControllerState>) -> Result<Self, ControllerError> {
        let mut current = state.lock().unwrap_or_else(|e| e.into_inner());
        if *current != ControllerState::Idle {
            return Err(ControllerError::Busy);
        }
        *current = ControllerState::AwaitingPrimary;
        Ok(Self {
            state,
            pending: None,
        })
    }

    fn advance(&self, next: ControllerState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Push the user turn, trimming the buffer to `keep` turns.
    fn record_user(&mut self, buffer: &'a Mutex<Vec<PromptTurn>>, message: &str, keep: usize) {
        let mut turns = buffer.lock().unwrap_or_else(|e| e.into_inner());
        turns.push(PromptTurn::user(message));
        if turns.len() > keep {
            let excess = turns.len() - keep;
            turns.drain(..excess);
        }
        self.pending = Some(buffer);
    }

    /// Pair the pending user turn with its answer.
    fn commit(&mut self, answer: &str) {
        if let Some(buffer) = self.pending.take() {
            buffer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(PromptTurn::model(answer));
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.pending.take() {
            let mut turns = buffer.lock().unwrap_or_else(|e| e.into_inner());
            if turns.last().map(|t| t.role) == Some(PromptRole::User) {
                turns.pop();
            }
        }
        self.advance(ControllerState::Idle);
    }
}

/// Decides per message which backend answers, and keeps the local buffer
/// the fallback path replays.
pub struct ChatController {
    session_id: String,
    primary: Arc<dyn PrimaryBackend>,
    fallback: Arc<dyn Generator>,
    max_exchanges: usize,
    state: Mutex<ControllerState>,
    buffer: Mutex<Vec<PromptTurn>>,
}

impl ChatController {
    pub fn new(
        session_id: impl Into<String>,
        primary: Arc<dyn PrimaryBackend>,
        fallback: Arc<dyn Generator>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            primary,
            fallback,
            max_exchanges: 2,
            state: Mutex::new(ControllerState::Idle),
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Number of prior user/model exchanges replayed on the fallback path.
    pub fn with_max_exchanges(mut self, max_exchanges: usize) -> Self {
        self.max_exchanges = max_exchanges;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> ControllerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the local buffer.
    pub fn buffer(&self) -> Vec<PromptTurn> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Route one user message: primary first, fallback on any primary failure.
    pub async fn submit(&self, message: &str) -> Result<Reply, ControllerError> {
        if message.trim().is_empty() {
            return Err(ControllerError::EmptyMessage);
        }
        let mut flight = InFlight::begin(&self.state)?;
        flight.record_user(&self.buffer, message, self.max_exchanges * 2 + 1);

        let primary_err = match self.primary.query(&self.session_id, message).await {
            Ok(text) => {
                flight.commit(&text);
                return Ok(Reply {
                    text,
                    route: Route::Primary,
                });
            }
            Err(e) => e,
        };

        tracing::warn!(error = %primary_err, "primary route failed, falling back to direct generation");
        flight.advance(ControllerState::AwaitingFallback);

        let replay = self.buffer();
        match self.fallback.generate(&replay).await {
            Ok(result) => {
                flight.commit(&result.text);
                Ok(Reply {
                    text: result.text,
                    route: Route::Fallback,
                })
            }
            Err(fallback) => Err(ControllerError::FallbackFailed {
                primary: primary_err,
                fallback,
            }),
        }
    }

    /// Ask the model again for the most recent user message, directly.
    ///
    /// The new answer replaces the latest model turn in the buffer.
    pub async fn regenerate(&self) -> Result<Reply, ControllerError> {
        let flight = InFlight::begin(&self.state)?;
        flight.advance(ControllerState::AwaitingFallback);

        let last_user = self
            .buffer()
            .into_iter()
            .rev()
            .find(|t| t.role == PromptRole::User)
            .ok_or(ControllerError::NothingToRegenerate)?;

        let result = self
            .fallback
            .generate(std::slice::from_ref(&last_user))
            .await
            .map_err(ControllerError::RegenerateFailed)?;

        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if buffer.last().map(|t| t.role) == Some(PromptRole::Model) {
            buffer.pop();
        }
        buffer.push(PromptTurn::model(&result.text));

        Ok(Reply {
            text: result.text,
            route: Route::Fallback,
        })
    }
}
