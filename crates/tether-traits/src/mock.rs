//! A recording [`ServerHttpExchange`] for tests.
//!
//! [`MockExchange`] answers nothing by itself. Every response detail the code
//! under test produces is recorded in shared state that the paired
//! [`MockHandle`] can inspect after the exchange box has been moved away.
//!
//! ```rust
//! use tether_traits::mock::MockExchange;
//! use tether_traits::ServerHttpExchange;
//!
//! let (exchange, handle) = MockExchange::get("/vibe?when=poll&id=abc");
//! exchange.end(Some("hello".to_string()));
//! assert_eq!(handle.body().as_deref(), Some("hello"));
//! ```

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::exchange::{BodyAction, ErrorAction, ServerHttpExchange, VoidAction};

/// Recording exchange. Construct with [`MockExchange::get`] or [`MockExchange::post`].
#[derive(Debug)]
pub struct MockExchange {
    method: String,
    uri: String,
    request_headers: Vec<(String, String)>,
    body: Option<String>,
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    status: u16,
    response_headers: Vec<(String, String)>,
    chunks: String,
    ended: bool,
    end_calls: usize,
    headers_after_write: usize,
    manual_finish: bool,
    finish: Option<VoidAction>,
    error: Option<ErrorAction>,
    close: Option<VoidAction>,
}

impl std::fmt::Debug for MockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockState")
            .field("status", &self.status)
            .field("ended", &self.ended)
            .field("end_calls", &self.end_calls)
            .finish_non_exhaustive()
    }
}

impl MockExchange {
    /// Creates a `GET` exchange for `uri`.
    pub fn get(uri: &str) -> (Box<Self>, MockHandle) {
        Self::new("GET", uri, None)
    }

    /// Creates a `POST` exchange for `uri` carrying `body`.
    pub fn post(uri: &str, body: &str) -> (Box<Self>, MockHandle) {
        Self::new("POST", uri, Some(body.to_string()))
    }

    fn new(method: &str, uri: &str, body: Option<String>) -> (Box<Self>, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            status: 200,
            ..MockState::default()
        }));
        let exchange = Box::new(Self {
            method: method.to_string(),
            uri: uri.to_string(),
            request_headers: Vec::new(),
            body,
            state: state.clone(),
        });
        (exchange, MockHandle { state })
    }

    /// Adds a request header.
    pub fn with_header(mut self: Box<Self>, name: &str, value: &str) -> Box<Self> {
        self.request_headers
            .push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    /// Keeps the finish action pending after `end` until [`MockHandle::finish`] is called.
    pub fn with_manual_finish(self: Box<Self>) -> Box<Self> {
        self.state.lock().manual_finish = true;
        self
    }
}

impl ServerHttpExchange for MockExchange {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn set_header(&mut self, name: &str, value: &str) {
        let mut state = self.state.lock();
        if !state.chunks.is_empty() || state.ended {
            state.headers_after_write += 1;
            return;
        }
        state
            .response_headers
            .retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        state
            .response_headers
            .push((name.to_ascii_lowercase(), value.to_string()));
    }

    fn set_status(&mut self, status: u16) {
        self.state.lock().status = status;
    }

    fn on_body(&mut self, action: BodyAction) {
        action(self.body.take().unwrap_or_default());
    }

    fn on_finish(&mut self, action: VoidAction) {
        self.state.lock().finish = Some(action);
    }

    fn on_error(&mut self, action: ErrorAction) {
        self.state.lock().error = Some(action);
    }

    fn on_close(&mut self, action: VoidAction) {
        self.state.lock().close = Some(action);
    }

    fn write(&mut self, chunk: &str) {
        self.state.lock().chunks.push_str(chunk);
    }

    fn end(self: Box<Self>, body: Option<String>) {
        let finish = {
            let mut state = self.state.lock();
            state.end_calls += 1;
            if state.ended {
                return;
            }
            state.ended = true;
            if let Some(body) = body {
                state.chunks.push_str(&body);
            }
            if state.manual_finish {
                None
            } else {
                state.finish.take()
            }
        };
        if let Some(finish) = finish {
            finish();
        }
    }
}

/// Inspection handle paired with a [`MockExchange`].
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    /// Returns `true` once the exchange has been ended.
    pub fn is_ended(&self) -> bool {
        self.state.lock().ended
    }

    /// Number of times `end` was called.
    pub fn end_calls(&self) -> usize {
        self.state.lock().end_calls
    }

    /// Response body, or `None` while the exchange is still open.
    pub fn body(&self) -> Option<String> {
        let state = self.state.lock();
        state.ended.then(|| state.chunks.clone())
    }

    /// Response status.
    pub fn status(&self) -> u16 {
        self.state.lock().status
    }

    /// Response header value.
    pub fn header(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .response_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    /// Number of `set_header` calls that arrived after the body started.
    pub fn late_headers(&self) -> usize {
        self.state.lock().headers_after_write
    }

    /// Returns `true` if a finish action is registered and has not run yet.
    pub fn has_pending_finish(&self) -> bool {
        self.state.lock().finish.is_some()
    }

    /// Runs the finish action as the server would once the response is flushed.
    ///
    /// When the exchange was not ended by the code under test this simulates
    /// the server ending it on its own, with an empty body.
    pub fn finish(&self) {
        let finish = {
            let mut state = self.state.lock();
            state.ended = true;
            state.finish.take()
        };
        if let Some(finish) = finish {
            finish();
        }
    }

    /// Fails the exchange with `error`.
    pub fn fail(&self, error: TransportError) {
        let action = self.state.lock().error.take();
        if let Some(action) = action {
            action(error);
        }
    }

    /// Simulates the client going away before an answer was produced.
    pub fn disconnect(&self) {
        let action = self.state.lock().close.take();
        if let Some(action) = action {
            action();
        }
    }
}
