//! The consumed capability: a single HTTP request/response cycle.

use std::fmt;

use crate::error::TransportError;

/// Callback invoked once with no arguments.
pub type VoidAction = Box<dyn FnOnce() + Send + 'static>;

/// Callback invoked once with the error that terminated an exchange.
pub type ErrorAction = Box<dyn FnOnce(TransportError) + Send + 'static>;

/// Callback invoked once with the decoded request body.
pub type BodyAction = Box<dyn FnOnce(String) + Send + 'static>;

/// An owned, uniquely held exchange.
///
/// Whoever holds the box is the only party allowed to answer it. Ending the
/// exchange consumes the box.
pub type BoxedExchange = Box<dyn ServerHttpExchange>;

/// One HTTP round trip as seen from the server.
///
/// Implementations adapt a concrete HTTP server's request/response objects.
/// Each callback slot is registered at most once per exchange and each
/// registered callback is invoked at most once:
///
/// - the finish action runs after the response has been ended normally,
/// - the error action runs when the underlying connection fails,
/// - the close action runs when the client goes away before an answer was produced.
///
/// Only one of finish, error and close fires for a given exchange.
pub trait ServerHttpExchange: Send + fmt::Debug + 'static {
    /// Request URI, path and query string.
    fn uri(&self) -> &str;

    /// Request method in upper case (`GET`, `POST`, ...).
    fn method(&self) -> &str;

    /// Returns the first value of a request header, matched case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;

    /// Query string of the request URI without the leading `?`.
    fn query(&self) -> &str {
        self.uri().split_once('?').map_or("", |(_, query)| query)
    }

    /// Sets a response header. Has no effect once the first chunk was written.
    fn set_header(&mut self, name: &str, value: &str);

    /// Sets the response status. Defaults to 200.
    fn set_status(&mut self, status: u16);

    /// Registers the callback receiving the request body.
    ///
    /// The body is buffered by the exchange, so the response may be ended
    /// before the callback runs.
    fn on_body(&mut self, action: BodyAction);

    /// Registers the callback fired after the response was ended.
    fn on_finish(&mut self, action: VoidAction);

    /// Registers the callback fired when the exchange fails.
    fn on_error(&mut self, action: ErrorAction);

    /// Registers the callback fired when the client disconnects abruptly.
    fn on_close(&mut self, action: VoidAction);

    /// Appends a chunk to the response body.
    fn write(&mut self, chunk: &str);

    /// Ends the response, optionally appending a final body chunk.
    fn end(self: Box<Self>, body: Option<String>);
}
