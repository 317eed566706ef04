//! Conversation state machine
//!
//! [`Conversation`] owns the transcript and is the only place it changes.
//! A turn starts with [`Conversation::send`], which hands back an
//! [`ActiveTurn`]; the caller pulls [`StreamUpdate`]s from it and feeds them to
//! [`Conversation::apply_update`] in arrival order until a [`TurnOutcome`]
//! comes back. Between updates the caller may call [`Conversation::stop`].

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ChatCompletionRequest, ChatMessage, CompletionChunk, Role};
use crate::core::chat_stream::{ChatBackend, ChatStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub messages: Vec<ChatMessage>,
    pub streaming: bool,
    pub last_error: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Per-request parameters taken from the user's settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSettings {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
}

/// How a turn ended. Every outcome leaves the conversation idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Committed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    EmptyInput,
    AlreadyStreaming,
    NoModelSelected,
}

impl fmt::Display for SendRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendRejection::EmptyInput => write!(f, "Type a message before sending"),
            SendRejection::AlreadyStreaming => {
                write!(f, "A response is still streaming; stop it or wait for it to finish")
            }
            SendRejection::NoModelSelected => write!(f, "Select a model first"),
        }
    }
}

impl Error for SendRejection {}

pub enum StreamUpdate {
    Chunk(CompletionChunk),
    Failed(ApiError),
    Finished,
}

struct StreamHandle {
    id: u64,
    cancel_token: CancellationToken,
}

/// Cancels the turn it was taken from; usable from any task.
#[derive(Clone)]
pub struct StopHandle {
    cancel_token: CancellationToken,
}

impl StopHandle {
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }
}

/// The in-flight request of one turn.
pub struct ActiveTurn {
    stream_id: u64,
    stream: ChatStream,
}

impl ActiveTurn {
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub async fn next_update(&mut self) -> StreamUpdate {
        match self.stream.next_chunk().await {
            Some(Ok(chunk)) => StreamUpdate::Chunk(chunk),
            Some(Err(err)) => StreamUpdate::Failed(err),
            None => StreamUpdate::Finished,
        }
    }
}

pub struct Conversation {
    session: Session,
    input: String,
    settings: ChatSettings,
    backend: Arc<dyn ChatBackend>,
    active_stream: Option<StreamHandle>,
    current_stream_id: u64,
    current_response: String,
}

impl Conversation {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: ChatSettings) -> Self {
        Self {
            session: Session::default(),
            input: String::new(),
            settings,
            backend,
            active_stream: None,
            current_stream_id: 0,
            current_response: String::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.session.messages
    }

    pub fn state(&self) -> SessionState {
        if self.active_stream.is_some() {
            SessionState::Streaming
        } else {
            SessionState::Idle
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    pub fn last_error(&self) -> Option<&str> {
        self.session.last_error.as_deref()
    }

    pub fn usage(&self) -> Option<TokenUsage> {
        self.session.usage
    }

    /// Text waiting to be sent, e.g. put back by [`Conversation::resend`].
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, input: impl Into<String>) {
        self.input = input.into();
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.settings.model = model.into();
    }

    pub fn set_settings(&mut self, settings: ChatSettings) {
        self.settings = settings;
    }

    /// Start a turn for `text`.
    ///
    /// Rejections leave the conversation untouched.
    pub fn send(&mut self, text: &str) -> Result<ActiveTurn, SendRejection> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendRejection::EmptyInput);
        }
        if self.active_stream.is_some() {
            return Err(SendRejection::AlreadyStreaming);
        }
        if self.settings.model.trim().is_empty() {
            return Err(SendRejection::NoModelSelected);
        }

        self.session.last_error = None;
        self.input.clear();
        self.session.messages.push(ChatMessage::user(text));
        let request_messages = self.request_messages();
        self.session.messages.push(ChatMessage::assistant(String::new()));
        self.current_response.clear();

        self.current_stream_id += 1;
        let cancel_token = CancellationToken::new();
        self.active_stream = Some(StreamHandle {
            id: self.current_stream_id,
            cancel_token: cancel_token.clone(),
        });
        self.session.streaming = true;

        let mut request = ChatCompletionRequest::new(self.settings.model.clone(), request_messages);
        request.temperature = Some(self.settings.temperature);
        request.max_tokens = Some(self.settings.max_tokens);
        request.stream = Some(true);

        debug!(
            stream_id = self.current_stream_id,
            model = %self.settings.model,
            messages = request.messages.len(),
            "Starting chat turn"
        );
        let stream = self.backend.stream_chat(request, cancel_token);

        Ok(ActiveTurn {
            stream_id: self.current_stream_id,
            stream,
        })
    }

    /// Send whatever is in the pending input.
    pub fn send_input(&mut self) -> Result<ActiveTurn, SendRejection> {
        let text = self.input.clone();
        self.send(&text)
    }

    pub fn stop(&mut self) -> bool {
        match &self.active_stream {
            Some(handle) => {
                debug!(stream_id = handle.id, "Stopping chat turn");
                handle.cancel_token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.active_stream.as_ref().map(|handle| StopHandle {
            cancel_token: handle.cancel_token.clone(),
        })
    }

    pub fn is_current_stream(&self, stream_id: u64) -> bool {
        self.active_stream
            .as_ref()
            .is_some_and(|handle| handle.id == stream_id)
    }

    /// Apply one update from the turn identified by `stream_id`.
    ///
    /// Returns the outcome once the turn is over. Updates from any other
    /// stream are ignored.
    pub fn apply_update(&mut self, stream_id: u64, update: StreamUpdate) -> Option<TurnOutcome> {
        if !self.is_current_stream(stream_id) {
            debug!(stream_id, "Ignoring update from stale stream");
            return None;
        }

        match update {
            StreamUpdate::Chunk(chunk) => {
                self.append_chunk(&chunk);
                None
            }
            StreamUpdate::Failed(err) => Some(self.fail_turn(err)),
            StreamUpdate::Finished => Some(self.finish_turn()),
        }
    }

    /// Run `turn` until it ends.
    pub async fn drive(&mut self, mut turn: ActiveTurn) -> TurnOutcome {
        loop {
            let update = turn.next_update().await;
            let ends_stream = !matches!(update, StreamUpdate::Chunk(_));
            if let Some(outcome) = self.apply_update(turn.stream_id, update) {
                return outcome;
            }
            if ends_stream {
                // The turn was already closed elsewhere
                return TurnOutcome::Cancelled;
            }
        }
    }

    /// Take back the last exchange so it can be edited and sent again.
    ///
    /// Removes the trailing user/assistant pair (or a user message left
    /// behind by a failed turn) and puts the user text into the pending
    /// input. Nothing is sent. Returns the restored text.
    ///
    /// Does nothing unless the transcript holds at least one completed
    /// user/assistant exchange.
    pub fn resend(&mut self) -> Option<String> {
        if self.active_stream.is_some() {
            return None;
        }

        let messages = &mut self.session.messages;
        let has_exchange = messages
            .windows(2)
            .any(|pair| pair[0].role == Role::User && pair[1].role == Role::Assistant);
        if !has_exchange {
            return None;
        }

        let keep = match messages.as_slice() {
            [.., last] if last.role == Role::User => messages.len() - 1,
            [.., user, last] if user.role == Role::User && last.role == Role::Assistant => {
                messages.len() - 2
            }
            _ => return None,
        };

        let text = messages[keep].content.clone();
        messages.truncate(keep);
        self.input = text.clone();
        Some(text)
    }

    pub fn clear(&mut self) -> bool {
        if self.active_stream.is_some() {
            return false;
        }
        self.session.messages.clear();
        self.session.usage = None;
        self.session.last_error = None;
        self.current_response.clear();
        true
    }

    fn request_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.session.messages.len() + 1);
        if !self.settings.system_prompt.is_empty() {
            messages.push(ChatMessage::system(self.settings.system_prompt.clone()));
        }
        messages.extend(self.session.messages.iter().cloned());
        messages
    }

    fn append_chunk(&mut self, chunk: &CompletionChunk) {
        if self
            .active_stream
            .as_ref()
            .is_some_and(|handle| handle.cancel_token.is_cancelled())
        {
            return;
        }

        if let Some(content) = chunk.delta_content().filter(|content| !content.is_empty()) {
            self.current_response.push_str(content);
            if let Some(last) = self.session.messages.last_mut() {
                if last.role == Role::Assistant {
                    last.content.clone_from(&self.current_response);
                }
            }
        }

        if let Some(usage) = chunk.usage {
            self.session.usage = Some(TokenUsage {
                prompt: usage.prompt_tokens,
                completion: usage.completion_tokens,
            });
        }
    }

    fn finish_turn(&mut self) -> TurnOutcome {
        let cancelled = self
            .active_stream
            .take()
            .is_some_and(|handle| handle.cancel_token.is_cancelled());
        self.session.streaming = false;
        self.current_response.clear();

        if cancelled {
            info!("Chat turn cancelled; keeping partial response");
            TurnOutcome::Cancelled
        } else {
            debug!("Chat turn committed");
            TurnOutcome::Committed
        }
    }

    fn fail_turn(&mut self, err: ApiError) -> TurnOutcome {
        self.active_stream = None;
        self.session.streaming = false;
        self.current_response.clear();

        if self
            .session
            .messages
            .last()
            .is_some_and(|message| message.role == Role::Assistant)
        {
            self.session.messages.pop();
        }

        let message = err.to_string();
        warn!(error = %message, "Chat turn failed");
        self.session.last_error = Some(message.clone());
        TurnOutcome::Failed(message)
    }
}

#[cfg(test)]
mod tests;
