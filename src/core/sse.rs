//! Server-Sent-Events decoding
//!
//! [`SseDecoder`] wraps any byte stream and yields one [`SseEvent`] per event
//! frame. It knows nothing about JSON; callers interpret `data` themselves.

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt;
use std::pin::Pin;
use std::str::Utf8Error;
use std::task::{Context, Poll};

use futures_util::Stream;
use memchr::memchr;

/// Payload that ends a completion stream.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub retry: Option<u64>,
    /// All `data:` lines of the frame joined with `\n`.
    pub data: String,
}

#[derive(Debug)]
pub enum SseError<E> {
    InvalidUtf8(Utf8Error),
    Transport(E),
}

impl<E: fmt::Display> fmt::Display for SseError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SseError::InvalidUtf8(err) => write!(f, "Invalid UTF-8 in event stream: {err}"),
            SseError::Transport(err) => write!(f, "Event stream transport error: {err}"),
        }
    }
}

impl<E: StdError + 'static> StdError for SseError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            SseError::InvalidUtf8(err) => Some(err),
            SseError::Transport(err) => Some(err),
        }
    }
}

/// Splits incoming bytes into complete lines, independent of how the bytes
/// were chunked on the wire.
#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
    // Bytes before this offset are known to hold no `\n`.
    scanned: usize,
}

impl SseLineBuffer {
    /// Appends `chunk` and returns every line it completed, without the
    /// trailing `\n` / `\r\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;

        while let Some(relative) = memchr(b'\n', &self.buffer[search_from..]) {
            let newline = search_from + relative;
            let mut end = newline;
            if end > start && self.buffer[end - 1] == b'\r' {
                end -= 1;
            }
            lines.push(self.buffer[start..end].to_vec());
            start = newline + 1;
            search_from = start;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        self.scanned = self.buffer.len();
        lines
    }

    /// Returns the unterminated tail, if any, and empties the buffer.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        self.scanned = 0;
        let mut tail = std::mem::take(&mut self.buffer);
        if tail.last() == Some(&b'\r') {
            tail.pop();
        }
        Some(tail)
    }
}

/// Accumulates fields until a blank line closes the frame.
#[derive(Default)]
struct EventBuilder {
    event: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
    data_lines: Vec<String>,
}

impl EventBuilder {
    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data_lines.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => self.retry = value.trim().parse().ok(),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let builder = std::mem::take(self);
        if builder.data_lines.is_empty() {
            return None;
        }
        Some(SseEvent {
            event: builder.event,
            id: builder.id,
            retry: builder.retry,
            data: builder.data_lines.join("\n"),
        })
    }
}

/// Lazy, single-pass decoder over a byte stream.
///
/// Ends after a `[DONE]` payload (which is not yielded), after the first
/// error, or when the input runs out. Once ended it only returns `None`.
pub struct SseDecoder<S, E> {
    inner: Pin<Box<S>>,
    lines: SseLineBuffer,
    builder: EventBuilder,
    ready: VecDeque<Result<SseEvent, SseError<E>>>,
    input_done: bool,
    terminated: bool,
}

// `inner` is boxed, so nothing in the decoder is ever pinned in place.
impl<S, E> Unpin for SseDecoder<S, E> {}

impl<S, B, E> SseDecoder<S, E>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner: Box::pin(inner),
            lines: SseLineBuffer::default(),
            builder: EventBuilder::default(),
            ready: VecDeque::new(),
            input_done: false,
            terminated: false,
        }
    }

    fn feed_raw_line(&mut self, raw: &[u8]) -> bool {
        match std::str::from_utf8(raw) {
            Ok(line) => {
                if let Some(event) = self.builder.feed_line(line) {
                    self.ready.push_back(Ok(event));
                }
                true
            }
            Err(err) => {
                self.ready.push_back(Err(SseError::InvalidUtf8(err)));
                false
            }
        }
    }

    fn feed_chunk(&mut self, chunk: &[u8]) {
        for raw in self.lines.push(chunk) {
            if !self.feed_raw_line(&raw) {
                self.input_done = true;
                return;
            }
        }
    }

    fn finish_input(&mut self) {
        self.input_done = true;
        if let Some(tail) = self.lines.finish() {
            if !self.feed_raw_line(&tail) {
                return;
            }
        }
        // A final frame without its closing blank line is still delivered
        if let Some(event) = self.builder.dispatch() {
            self.ready.push_back(Ok(event));
        }
    }
}

impl<S, B, E> Stream for SseDecoder<S, E>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    type Item = Result<SseEvent, SseError<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.terminated {
                return Poll::Ready(None);
            }

            if let Some(item) = this.ready.pop_front() {
                match item {
                    Ok(event) if event.data.trim() == DONE_SENTINEL => {
                        this.terminated = true;
                        return Poll::Ready(None);
                    }
                    Ok(event) => return Poll::Ready(Some(Ok(event))),
                    Err(err) => {
                        this.terminated = true;
                        return Poll::Ready(Some(Err(err)));
                    }
                }
            }

            if this.input_done {
                this.terminated = true;
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => this.feed_chunk(chunk.as_ref()),
                Poll::Ready(Some(Err(err))) => {
                    this.terminated = true;
                    return Poll::Ready(Some(Err(SseError::Transport(err))));
                }
                Poll::Ready(None) => this.finish_input(),
            }
        }
    }
}
