//! [`ServerHttpExchange`] over an axum request.
//!
//! An [`AxumExchange`] buffers the response it is given and hands it to its
//! paired [`PendingResponse`] when ended. The handler awaits the pending
//! response and returns it to axum; if axum drops the handler future first
//! (the client went away), the pending response fires the close hook.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use parking_lot::Mutex;
use tether_longpoll::CONTENT_TYPE_PLAIN;
use tether_traits::{BodyAction, ErrorAction, ServerHttpExchange, TransportError, VoidAction};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// How long a timed-out poll waits for a frame that was being written when
/// the timeout hit.
const RELEASE_GRACE: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Hooks {
    finish: Option<VoidAction>,
    error: Option<ErrorAction>,
    close: Option<VoidAction>,
}

impl Hooks {
    /// Takes every hook; only one of them may ever run.
    fn settle(&mut self) -> (Option<VoidAction>, Option<ErrorAction>, Option<VoidAction>) {
        (self.finish.take(), self.error.take(), self.close.take())
    }
}

/// One axum request seen through the exchange capability.
pub struct AxumExchange {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Option<String>,
    status: StatusCode,
    response_headers: HeaderMap,
    response_body: String,
    responder: Option<oneshot::Sender<Response>>,
    hooks: Arc<Mutex<Hooks>>,
}

impl AxumExchange {
    /// Wraps a buffered request. Invalid UTF-8 in the body is replaced.
    pub fn new(method: Method, uri: &Uri, headers: HeaderMap, body: Bytes) -> (Self, PendingResponse) {
        let (responder, receiver) = oneshot::channel();
        let hooks = Arc::new(Mutex::new(Hooks::default()));
        let exchange = Self {
            method,
            uri: uri.to_string(),
            headers,
            body: Some(String::from_utf8_lossy(&body).into_owned()),
            status: StatusCode::OK,
            response_headers: HeaderMap::new(),
            response_body: String::new(),
            responder: Some(responder),
            hooks: hooks.clone(),
        };
        let pending = PendingResponse {
            receiver,
            hooks,
            answered: false,
        };
        (exchange, pending)
    }
}

impl ServerHttpExchange for AxumExchange {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn method(&self) -> &str {
        self.method.as_str()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    fn set_header(&mut self, name: &str, value: &str) {
        if !self.response_body.is_empty() {
            debug!(header = name, "header set after body, ignored");
            return;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.response_headers.insert(name, value);
            }
            _ => warn!(header = name, "invalid response header, ignored"),
        }
    }

    fn set_status(&mut self, status: u16) {
        match StatusCode::from_u16(status) {
            Ok(status) => self.status = status,
            Err(_) => warn!(status, "invalid response status, ignored"),
        }
    }

    fn on_body(&mut self, action: BodyAction) {
        action(self.body.take().unwrap_or_default());
    }

    fn on_finish(&mut self, action: VoidAction) {
        self.hooks.lock().finish = Some(action);
    }

    fn on_error(&mut self, action: ErrorAction) {
        self.hooks.lock().error = Some(action);
    }

    fn on_close(&mut self, action: VoidAction) {
        self.hooks.lock().close = Some(action);
    }

    fn write(&mut self, chunk: &str) {
        self.response_body.push_str(chunk);
    }

    fn end(mut self: Box<Self>, body: Option<String>) {
        if let Some(body) = body {
            self.response_body.push_str(&body);
        }
        let mut response = Response::new(Body::from(std::mem::take(&mut self.response_body)));
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.response_headers);

        if let Some(responder) = self.responder.take() {
            if responder.send(response).is_err() {
                trace!(uri = %self.uri, "response ready after the client went away");
            }
        }
    }
}

impl fmt::Debug for AxumExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AxumExchange")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("status", &self.status)
            .field("ended", &self.responder.is_none())
            .finish_non_exhaustive()
    }
}

/// The response half of an [`AxumExchange`].
///
/// Dropping it before [`wait`](Self::wait) completes fires the exchange's
/// close hook.
pub struct PendingResponse {
    receiver: oneshot::Receiver<Response>,
    hooks: Arc<Mutex<Hooks>>,
    answered: bool,
}

impl PendingResponse {
    /// Waits for the exchange to be ended and returns its response.
    ///
    /// When `poll_timeout` elapses first the exchange finishes without an
    /// answer and the request is answered empty. An exchange dropped without
    /// an answer is reported to its error hook and answered with a 500.
    pub async fn wait(mut self, poll_timeout: Option<Duration>) -> Response {
        let received = match poll_timeout {
            Some(limit) => tokio::time::timeout(limit, &mut self.receiver).await.ok(),
            None => Some((&mut self.receiver).await),
        };
        self.answered = true;

        match received {
            Some(Ok(response)) => {
                self.fire_finish();
                response
            }
            Some(Err(_)) => {
                let err = TransportError::Internal("exchange dropped without a response".into());
                warn!(error = %err, "long-polling exchange failed");
                self.fire_error(err);
                status_only(StatusCode::INTERNAL_SERVER_ERROR)
            }
            None => {
                debug!("poll timeout elapsed, releasing held exchange");
                self.fire_finish();
                // A frame may have been handed over while the timeout fired
                match tokio::time::timeout(RELEASE_GRACE, &mut self.receiver).await {
                    Ok(Ok(response)) => response,
                    _ => status_only(StatusCode::OK),
                }
            }
        }
    }

    fn fire_finish(&self) {
        let (finish, _, _) = self.hooks.lock().settle();
        if let Some(finish) = finish {
            finish();
        }
    }

    fn fire_error(&self, err: TransportError) {
        let (_, error, _) = self.hooks.lock().settle();
        if let Some(error) = error {
            error(err);
        }
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if self.answered {
            return;
        }
        let (_, _, close) = self.hooks.lock().settle();
        if let Some(close) = close {
            debug!("client went away before an answer");
            close();
        }
    }
}

impl fmt::Debug for PendingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResponse")
            .field("answered", &self.answered)
            .finish_non_exhaustive()
    }
}

fn status_only(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_PLAIN));
    response
}
