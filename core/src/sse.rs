//! Incremental decoding of the chatbot's event stream.
//!
//! The backend speaks a loose dialect of server-sent events: payload lines are
//! normally prefixed with `data: `, but bare lines are also treated as
//! payloads. `data: [DONE]` ends the stream early.
//!
//! [`SseLineDecoder`] is the synchronous framing core. [`ChatStream`] wraps a
//! response body and yields [`StreamEvent`]s lazily; it owns the body, so the
//! connection is released as soon as the stream terminates or is dropped.

use crate::error::message_from_body;
use futures::stream::{BoxStream, FusedStream};
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

pub const DONE_SENTINEL: &str = "[DONE]";
const DATA_FIELD: &str = "data: ";
const EVENT_FIELD: &str = "event:";
const COMMENT_MARKER: char = ':';

pub const EMPTY_BODY_MESSAGE: &str = "response body is empty";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data(String),
    Complete,
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Data(_))
    }
}

/// Payloads recovered from one feed, plus whether the sentinel was seen.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub payloads: Vec<String>,
    pub done: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Line {
    Payload(String),
    Done,
    Skip,
}

/// Line-oriented framing over raw bytes.
///
/// After every [`feed`](Self::feed) the internal buffer holds at most one
/// partial line; UTF-8 sequences split across chunks are carried over.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: String,
    pending: Vec<u8>,
    done: bool,
}

impl SseLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Decoded {
        if self.done {
            return Decoded {
                payloads: Vec::new(),
                done: true,
            };
        }
        let text = self.decode_utf8(bytes);
        self.buffer.push_str(&text);

        let Some(boundary) = self.buffer.rfind('\n') else {
            return Decoded::default();
        };
        let remainder = self.buffer.split_off(boundary + 1);
        let complete = std::mem::replace(&mut self.buffer, remainder);
        self.process(complete.split('\n'))
    }

    /// Flushes whatever is left once the transport reports end-of-stream.
    pub fn flush(&mut self) -> Decoded {
        if self.done {
            return Decoded {
                payloads: Vec::new(),
                done: true,
            };
        }
        if !self.pending.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.pending.clear();
            self.buffer.push_str(&tail);
        }
        let residual = std::mem::take(&mut self.buffer);
        let mut decoded = self.process(residual.split('\n'));
        self.done = true;
        decoded.done = true;
        decoded
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    fn process<'a>(&mut self, lines: impl Iterator<Item = &'a str>) -> Decoded {
        let mut decoded = Decoded::default();
        for line in lines {
            match classify(line) {
                Line::Payload(payload) => decoded.payloads.push(payload),
                Line::Done => {
                    self.done = true;
                    self.buffer.clear();
                    self.pending.clear();
                    decoded.done = true;
                    return decoded;
                }
                Line::Skip => {}
            }
        }
        decoded
    }

    fn decode_utf8(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut text = String::with_capacity(self.pending.len());
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match err.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid);
                        }
                        // Incomplete sequence at the end; wait for the next chunk.
                        None => {
                            self.pending.drain(..valid_up_to);
                            return text;
                        }
                    }
                }
            }
        }
    }
}

fn classify(raw: &str) -> Line {
    let line = raw.trim();
    if line.is_empty() {
        return Line::Skip;
    }
    if let Some(payload) = line.strip_prefix(DATA_FIELD) {
        return match payload {
            DONE_SENTINEL => Line::Done,
            payload => Line::Payload(payload.to_owned()),
        };
    }
    // `data: ` with nothing after it, once trimmed.
    if line == DATA_FIELD.trim_end() {
        return Line::Skip;
    }
    if line.starts_with(COMMENT_MARKER) || line.starts_with(EVENT_FIELD) {
        return Line::Skip;
    }
    Line::Payload(line.to_owned())
}

type ByteChunks = BoxStream<'static, Result<Vec<u8>, String>>;

enum State {
    Failed(String),
    Streaming(Box<Streaming>),
    Finished,
}

struct Streaming {
    body: Option<ByteChunks>,
    decoder: SseLineDecoder,
    queued: VecDeque<String>,
}

/// Lazy, finite sequence of [`StreamEvent`]s for one chat request.
///
/// Yields any number of `Data` events followed by exactly one `Complete` or
/// `Error`, then ends. It cannot be restarted.
pub struct ChatStream {
    state: State,
}

impl ChatStream {
    /// Wraps a body of byte chunks. Read failures become a terminal `Error`.
    pub fn from_body<S, B, E>(body: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + 'static,
        E: Display + 'static,
    {
        let chunks = body
            .map(|chunk| chunk.map(|bytes| bytes.as_ref().to_vec()).map_err(|err| err.to_string()))
            .boxed();
        Self {
            state: State::Streaming(Box::new(Streaming {
                body: Some(chunks),
                decoder: SseLineDecoder::new(),
                queued: VecDeque::new(),
            })),
        }
    }

    /// A stream that fails before producing any data.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: State::Failed(message.into()),
        }
    }

    /// Validates the initial response and takes ownership of its body.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    warn!(%err, "failed to read error body of chat stream");
                    String::new()
                }
            };
            return Self::failed(message_from_body(status, &body));
        }
        if response.content_length() == Some(0) || status == reqwest::StatusCode::NO_CONTENT {
            return Self::failed(EMPTY_BODY_MESSAGE);
        }
        debug!(%status, "chat stream opened");
        Self::from_body(response.bytes_stream())
    }

    /// Feeds every event to `on_event` until the stream terminates, returning
    /// the terminal event.
    pub async fn drive<F>(mut self, mut on_event: F) -> StreamEvent
    where
        F: FnMut(&StreamEvent),
    {
        while let Some(event) = self.next().await {
            on_event(&event);
            if event.is_terminal() {
                return event;
            }
        }
        StreamEvent::Complete
    }

    /// Concatenates all payloads, or returns the stream's error message.
    pub async fn collect_text(self) -> Result<String, String> {
        let mut text = String::new();
        let terminal = self
            .drive(|event| {
                if let StreamEvent::Data(payload) = event {
                    text.push_str(payload);
                }
            })
            .await;
        match terminal {
            StreamEvent::Error(message) => Err(message),
            _ => Ok(text),
        }
    }
}

impl Stream for ChatStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        loop {
            let mut streaming = match std::mem::replace(&mut this.state, State::Finished) {
                State::Finished => return Poll::Ready(None),
                State::Failed(message) => return Poll::Ready(Some(StreamEvent::Error(message))),
                State::Streaming(streaming) => streaming,
            };

            if let Some(payload) = streaming.queued.pop_front() {
                this.state = State::Streaming(streaming);
                return Poll::Ready(Some(StreamEvent::Data(payload)));
            }

            let Some(body) = streaming.body.as_mut() else {
                // Body already released and queue drained.
                return Poll::Ready(Some(StreamEvent::Complete));
            };

            let decoded = match body.poll_next_unpin(cx) {
                Poll::Pending => {
                    this.state = State::Streaming(streaming);
                    return Poll::Pending;
                }
                Poll::Ready(Some(Ok(chunk))) => streaming.decoder.feed(&chunk),
                Poll::Ready(Some(Err(err))) => {
                    warn!(error = %err, "chat stream read failed");
                    return Poll::Ready(Some(StreamEvent::Error(format!(
                        "stream read failed: {err}"
                    ))));
                }
                Poll::Ready(None) => streaming.decoder.flush(),
            };

            streaming.queued.extend(decoded.payloads);
            if decoded.done {
                streaming.body = None;
            }
            this.state = State::Streaming(streaming);
        }
    }
}

impl FusedStream for ChatStream {
    fn is_terminated(&self) -> bool {
        matches!(self.state, State::Finished)
    }
}
