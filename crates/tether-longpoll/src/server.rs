//! Routes exchanges to long-polling sessions.

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tether_traits::{
    Actions, BoxedExchange, Handler, ServerTransport, TransportError, TransportServer, headers,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::LongpollConfig;
use crate::session::LongpollSession;
use crate::wire::{CONTENT_TYPE_PLAIN, PollQuery, When, decode_message_body};

/// Long-polling transport producer.
///
/// Creates a [`LongpollSession`] for every `when=open` exchange, announces it
/// to the `on_transport` handlers, and routes later exchanges to it by id.
/// Sessions leave the registry when they close. Cloning is cheap and every
/// clone shares the same registry.
#[derive(Clone)]
pub struct LongpollServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    config: LongpollConfig,
    sessions: DashMap<String, Arc<LongpollSession>>,
    transport_actions: Actions<Arc<dyn ServerTransport>>,
}

impl LongpollServer {
    /// Creates a server with no sessions.
    pub fn new(config: LongpollConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                config,
                sessions: DashMap::new(),
                transport_actions: Actions::new(),
            }),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &LongpollConfig {
        &self.inner.config
    }

    /// Looks up a live session.
    pub fn get(&self, id: &str) -> Option<Arc<LongpollSession>> {
        self.inner.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Closes every live session.
    pub fn close_all(&self) {
        let sessions: Vec<_> = self
            .inner
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        info!(sessions = sessions.len(), "closing all long-polling sessions");
        for session in sessions {
            session.terminate();
        }
    }

    /// Handles one exchange.
    ///
    /// Malformed requests are answered with a plain-text error and the status
    /// of the matching [`TransportError`].
    pub fn handle(&self, exchange: BoxedExchange) {
        let query = match PollQuery::parse(exchange.query()) {
            Ok(query) => query,
            Err(err) => return reject(exchange, &err),
        };
        let method = exchange.method().to_ascii_uppercase();
        match method.as_str() {
            "GET" => self.handle_get(exchange, &query),
            "POST" => self.handle_post(exchange, &query),
            other => reject(
                exchange,
                &TransportError::ProtocolError(format!("unsupported method: {other}")),
            ),
        }
    }

    fn handle_get(&self, exchange: BoxedExchange, query: &PollQuery) {
        let when = match query.when {
            Some(when) => when,
            None => {
                return reject(
                    exchange,
                    &TransportError::ProtocolError("missing `when` parameter".into()),
                );
            }
        };
        if when == When::Open {
            return self.open(exchange, query);
        }

        let id = match query.require_id() {
            Ok(id) => id,
            Err(err) => return reject(exchange, &err),
        };
        match self.get(id) {
            Some(session) => session.bind(exchange, when),
            None if when == When::Abort => {
                debug!(session_id = %id, "abort for unknown session");
                end_empty(exchange);
            }
            None => reject(exchange, &TransportError::SessionNotFound(id.to_string())),
        }
    }

    fn open(&self, exchange: BoxedExchange, query: &PollQuery) {
        let encoding = match query.check_transport().and_then(|()| query.encoding()) {
            Ok(encoding) => encoding,
            Err(err) => return reject(exchange, &err),
        };

        let id = format!("{}{}", self.inner.config.session_id_prefix, Uuid::new_v4());
        let session = LongpollSession::new(id.clone(), encoding, self.inner.config.idle_timeout());
        self.inner.sessions.insert(id.clone(), session.clone());

        let registry: Weak<ServerInner> = Arc::downgrade(&self.inner);
        session.on_close(Box::new(move |_: &()| {
            if let Some(registry) = registry.upgrade() {
                registry.sessions.remove(&id);
                debug!(session_id = %id, sessions = registry.sessions.len(), "session unregistered");
            }
        }));

        let transport: Arc<dyn ServerTransport> = session.clone();
        self.inner.transport_actions.fire(&transport);
        session.handshake(exchange);
    }

    fn handle_post(&self, mut exchange: BoxedExchange, query: &PollQuery) {
        let id = match query.require_id() {
            Ok(id) => id,
            Err(err) => return reject(exchange, &err),
        };
        let max = self.inner.config.max_body_size;
        let declared = exchange
            .header(headers::CONTENT_LENGTH)
            .and_then(|value| value.trim().parse::<usize>().ok());
        if let Some(size) = declared.filter(|size| *size > max) {
            return reject(exchange, &TransportError::RequestTooLarge { size, max });
        }
        let Some(session) = self.get(id) else {
            return reject(exchange, &TransportError::SessionNotFound(id.to_string()));
        };

        exchange.on_body(Box::new(move |body: String| {
            if body.len() > max {
                warn!(session_id = %session.id(), size = body.len(), max, "message body too large");
                return;
            }
            match decode_message_body(&body).and_then(|message| session.receive(message)) {
                Ok(()) => {}
                Err(err) => warn!(session_id = %session.id(), error = %err, "message dropped"),
            }
        }));
        end_empty(exchange);
    }
}

impl TransportServer for LongpollServer {
    fn handle(&self, exchange: BoxedExchange) {
        LongpollServer::handle(self, exchange);
    }

    fn on_transport(&self, handler: Handler<Arc<dyn ServerTransport>>) {
        self.inner.transport_actions.add(handler);
    }
}

impl fmt::Debug for LongpollServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LongpollServer")
            .field("config", &self.inner.config)
            .field("sessions", &self.inner.sessions.len())
            .field("transport_handlers", &self.inner.transport_actions.len())
            .finish()
    }
}

fn end_empty(mut exchange: BoxedExchange) {
    exchange.set_header(headers::CONTENT_TYPE, CONTENT_TYPE_PLAIN);
    exchange.end(None);
}

fn reject(mut exchange: BoxedExchange, err: &TransportError) {
    warn!(
        method = exchange.method(),
        uri = exchange.uri(),
        status = err.status_code(),
        error = %err,
        "long-polling request rejected"
    );
    exchange.set_status(err.status_code());
    exchange.set_header(headers::CONTENT_TYPE, CONTENT_TYPE_PLAIN);
    exchange.end(Some(err.to_string()));
}
