//! The exposed capability: logical transports and the servers producing them.

use std::fmt;
use std::sync::Arc;

use crate::action::Handler;
use crate::error::{TransportError, TransportResult};
use crate::exchange::BoxedExchange;

/// A logical, long-lived message channel to one client.
///
/// Handles may be shared across threads; every method is non-blocking.
pub trait ServerTransport: Send + Sync + fmt::Debug {
    /// Stable identifier of the channel.
    fn id(&self) -> &str;

    /// Sends a text frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once the transport has closed, or
    /// [`TransportError::SerializationFailed`] if the frame cannot be encoded.
    fn send(&self, frame: &str) -> TransportResult<()>;

    /// Requests the channel to close.
    fn close(&self);

    /// Returns `true` once the close signal has fired.
    fn is_closed(&self) -> bool;

    /// Registers a handler for frames received from the client.
    fn on_message(&self, handler: Handler<String>);

    /// Registers a handler for the one-shot close signal.
    fn on_close(&self, handler: Handler<()>);

    /// Registers a handler for transport errors.
    fn on_error(&self, handler: Handler<TransportError>);
}

/// Consumes HTTP exchanges and produces [`ServerTransport`]s.
///
/// Instances may be accessed by multiple threads.
pub trait TransportServer: Send + Sync {
    /// Routes a newly arrived exchange.
    fn handle(&self, exchange: BoxedExchange);

    /// Registers a handler called once for every newly opened transport.
    fn on_transport(&self, handler: Handler<Arc<dyn ServerTransport>>);
}
