//! The long-polling session.
//!
//! A session owns at most one bound exchange at a time. Its state is a small
//! enum guarded by a mutex; every transition moves the previous state out
//! (take-and-replace), so exactly one caller ends up owning a bound exchange
//! and is the only one allowed to answer it. Exchanges are always answered
//! after the lock is released, because answering one may synchronously run
//! its finish callback, which re-enters the session.
//!
//! ```text
//!  open ──► Bound(open) ──end──► WaitingForBind ◄──────────┐
//!                                 │   ▲    │               │
//!                          bind   │   │    │ idle timeout  │ finish after
//!                          (poll) ▼   │    ▼               │ a delivered frame
//!                               Bound(poll)  Closed ◄──────┤
//!                                 │                        │
//!                                 └── finish, nothing ─────┘
//!                                     written, or idle
//!                                     timeout: Closed
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tether_traits::{
    Actions, BoxedExchange, Handler, OnceActions, ServerHttpExchange, ServerTransport,
    TransportError, TransportResult, headers,
};
use tracing::{debug, info, trace, warn};

use crate::cache::FrameCache;
use crate::timer::IdleTimer;
use crate::wire::{CONTENT_TYPE_PLAIN, ResponseEncoding, When, handshake_body};

/// Observable state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No exchange is bound; frames are cached.
    WaitingForBind,
    /// An exchange is held open, waiting for a frame.
    Bound,
    /// Terminal.
    Closed,
}

/// One binding of one exchange.
#[derive(Debug)]
struct Cycle {
    seq: u64,
    when: When,
    written: AtomicBool,
}

enum Phase {
    WaitingForBind {
        idle: Option<IdleTimer>,
    },
    Bound {
        exchange: BoxedExchange,
        cycle: Arc<Cycle>,
        /// Ends a held poll once the idle timeout passes without data.
        hold: Option<IdleTimer>,
    },
    Closed,
}

struct Inner {
    phase: Phase,
    /// Sequence number of the most recent binding. Callbacks of older
    /// bindings are ignored.
    current_cycle: u64,
    /// A close was requested while no exchange was bound; the next poll is
    /// answered empty.
    close_requested: bool,
}

/// Server side of one long-polling channel.
pub struct LongpollSession {
    id: String,
    encoding: ResponseEncoding,
    idle_timeout: Duration,
    inner: Mutex<Inner>,
    cache: FrameCache,
    next_cycle: AtomicU64,
    this: Weak<Self>,
    message_actions: Actions<String>,
    error_actions: Actions<TransportError>,
    close_actions: OnceActions<()>,
}

impl LongpollSession {
    /// Creates a session on its first exchange and answers that exchange
    /// with the handshake carrying `id`.
    pub fn open(
        id: impl Into<String>,
        exchange: BoxedExchange,
        encoding: ResponseEncoding,
        idle_timeout: Duration,
    ) -> Arc<Self> {
        let session = Self::new(id, encoding, idle_timeout);
        session.handshake(exchange);
        session
    }

    /// Creates a session that has not answered its handshake yet. Frames
    /// sent before [`handshake`](Self::handshake) are cached.
    pub(crate) fn new(
        id: impl Into<String>,
        encoding: ResponseEncoding,
        idle_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: id.into(),
            encoding,
            idle_timeout,
            inner: Mutex::new(Inner {
                phase: Phase::WaitingForBind { idle: None },
                current_cycle: 0,
                close_requested: false,
            }),
            cache: FrameCache::new(),
            next_cycle: AtomicU64::new(1),
            this: this.clone(),
            message_actions: Actions::new(),
            error_actions: Actions::new(),
            close_actions: OnceActions::new(),
        })
    }

    /// Binds the creating exchange and answers it with `?id=<id>`.
    ///
    /// The handshake is never cached: it goes to this exchange or nowhere.
    pub(crate) fn handshake(&self, exchange: BoxedExchange) {
        info!(
            session_id = %self.id,
            jsonp = self.encoding.is_callback(),
            "long-polling session opened"
        );
        self.bind(exchange, When::Open);
        if let Err(err) = self.deliver(&handshake_body(&self.id), false) {
            warn!(session_id = %self.id, error = %err, "handshake not delivered");
        }
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Response encoding chosen when the session was opened.
    pub fn encoding(&self) -> &ResponseEncoding {
        &self.encoding
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        match self.inner.lock().phase {
            Phase::WaitingForBind { .. } => SessionState::WaitingForBind,
            Phase::Bound { .. } => SessionState::Bound,
            Phase::Closed => SessionState::Closed,
        }
    }

    /// Returns `true` once the session is closed.
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Number of frames waiting for the next poll.
    pub fn cached_frames(&self) -> usize {
        self.cache.len()
    }

    /// Attaches a newly arrived exchange.
    ///
    /// A `poll` binding cancels the idle timer, then either ends the exchange
    /// empty (a close was requested while unbound), answers it with the oldest
    /// cached frame, or holds it open until [`send`](Self::send),
    /// [`close`](Self::close) or the idle timeout. A held poll that times out
    /// is ended empty and the session closes. An `abort` exchange terminates the session and
    /// is answered empty. On a closed session the exchange is answered empty.
    pub fn bind(&self, mut exchange: BoxedExchange, when: When) {
        if when == When::Abort {
            self.close_locked(self.inner.lock(), "aborted by client");
            exchange.set_header(headers::CONTENT_TYPE, CONTENT_TYPE_PLAIN);
            exchange.end(None);
            return;
        }

        let cycle = Arc::new(Cycle {
            seq: self.next_cycle.fetch_add(1, Ordering::Relaxed),
            when,
            written: AtomicBool::new(false),
        });
        exchange.set_header(headers::CONTENT_TYPE, self.encoding.content_type());
        self.register_hooks(&mut *exchange, &cycle);

        enum Outcome {
            Held,
            End(BoxedExchange, Option<String>),
            Failed(TransportError),
        }

        let mut inner = self.inner.lock();
        let superseded = match std::mem::replace(&mut inner.phase, Phase::Closed) {
            Phase::Closed => {
                drop(inner);
                debug!(session_id = %self.id, %when, "bind on closed session");
                exchange.end(None);
                return;
            }
            Phase::Bound { exchange, .. } => Some(exchange),
            Phase::WaitingForBind { idle } => {
                drop(idle);
                None
            }
        };
        inner.current_cycle = cycle.seq;

        let outcome = if when == When::Poll && inner.close_requested {
            inner.close_requested = false;
            inner.phase = Phase::WaitingForBind { idle: None };
            Outcome::End(exchange, None)
        } else if when == When::Poll {
            match self.cache.poll() {
                Some(frame) => match self.encoding.format(&frame) {
                    Ok(body) => {
                        cycle.written.store(true, Ordering::SeqCst);
                        inner.phase = Phase::WaitingForBind { idle: None };
                        Outcome::End(exchange, Some(body))
                    }
                    Err(err) => {
                        inner.phase = Phase::Bound {
                            exchange,
                            cycle,
                            hold: self.arm_hold_timer(),
                        };
                        Outcome::Failed(err)
                    }
                },
                None => {
                    inner.phase = Phase::Bound {
                        exchange,
                        cycle,
                        hold: self.arm_hold_timer(),
                    };
                    Outcome::Held
                }
            }
        } else {
            inner.phase = Phase::Bound {
                exchange,
                cycle,
                hold: None,
            };
            Outcome::Held
        };
        drop(inner);

        if let Some(previous) = superseded {
            warn!(session_id = %self.id, "exchange bound while another was held; ending the old one");
            previous.end(None);
        }

        match outcome {
            Outcome::Held => debug!(session_id = %self.id, %when, "exchange bound"),
            Outcome::End(exchange, body) => {
                debug!(
                    session_id = %self.id,
                    %when,
                    delivered = body.is_some(),
                    pending = self.cache.len(),
                    "exchange answered on bind"
                );
                exchange.end(body);
            }
            Outcome::Failed(err) => {
                warn!(session_id = %self.id, error = %err, "cached frame dropped");
                self.error_actions.fire(&err);
            }
        }
    }

    /// Sends a frame: written to the bound exchange, which is then ended, or
    /// cached for the next poll.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] on a closed session and
    /// [`TransportError::SerializationFailed`] if the frame cannot be encoded;
    /// an encoding failure is also reported to the error handlers and the
    /// frame is dropped.
    pub fn send(&self, frame: &str) -> TransportResult<()> {
        self.deliver(frame, true)
    }

    fn deliver(&self, frame: &str, cacheable: bool) -> TransportResult<()> {
        let body = match self.encoding.format(frame) {
            Ok(body) => body,
            Err(err) => {
                warn!(session_id = %self.id, error = %err, "frame dropped");
                self.error_actions.fire(&err);
                return Err(err);
            }
        };

        let mut inner = self.inner.lock();
        match std::mem::replace(&mut inner.phase, Phase::Closed) {
            Phase::Bound { exchange, cycle, .. } => {
                // Marked under the lock so a racing finish sees the delivery
                cycle.written.store(true, Ordering::SeqCst);
                inner.phase = Phase::WaitingForBind { idle: None };
                drop(inner);
                trace!(session_id = %self.id, "frame written to bound exchange");
                exchange.end(Some(body));
                Ok(())
            }
            waiting @ Phase::WaitingForBind { .. } => {
                inner.phase = waiting;
                if cacheable {
                    self.cache.offer(frame.to_string());
                    trace!(session_id = %self.id, pending = self.cache.len(), "frame cached");
                }
                Ok(())
            }
            Phase::Closed => Err(TransportError::Closed),
        }
    }

    /// Requests close.
    ///
    /// A bound exchange is ended empty, which the client reads as a close.
    /// Without one, the next poll is answered empty instead of with cached data.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        match std::mem::replace(&mut inner.phase, Phase::Closed) {
            Phase::Bound { exchange, .. } => {
                inner.phase = Phase::WaitingForBind { idle: None };
                drop(inner);
                debug!(session_id = %self.id, "close requested, ending bound exchange");
                exchange.end(None);
            }
            Phase::WaitingForBind { idle } => {
                inner.phase = Phase::WaitingForBind { idle };
                inner.close_requested = true;
                debug!(session_id = %self.id, "close requested while unbound");
            }
            Phase::Closed => {}
        }
    }

    /// Closes the session immediately and fires the close signal.
    pub fn terminate(&self) {
        self.close_locked(self.inner.lock(), "terminated");
    }

    /// Delivers a client-to-server message to the message handlers.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] on a closed session.
    pub fn receive(&self, message: String) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        trace!(session_id = %self.id, size = message.len(), "message received");
        self.message_actions.fire(&message);
        Ok(())
    }

    fn register_hooks(&self, exchange: &mut dyn ServerHttpExchange, cycle: &Arc<Cycle>) {
        let this = self.this.clone();
        let finished = cycle.clone();
        exchange.on_finish(Box::new(move || {
            if let Some(session) = this.upgrade() {
                session.on_exchange_finished(&finished);
            }
        }));

        let this = self.this.clone();
        let seq = cycle.seq;
        exchange.on_error(Box::new(move |err: TransportError| {
            if let Some(session) = this.upgrade() {
                session.on_exchange_error(seq, err);
            }
        }));

        let this = self.this.clone();
        exchange.on_close(Box::new(move || {
            if let Some(session) = this.upgrade() {
                session.on_exchange_closed(seq);
            }
        }));
    }

    fn on_exchange_finished(&self, cycle: &Cycle) {
        let mut inner = self.inner.lock();
        if inner.current_cycle != cycle.seq {
            trace!(session_id = %self.id, cycle = cycle.seq, "superseded exchange finished");
            return;
        }

        // A still-bound exchange here was ended by the server side (timeout)
        // and must not be answered again.
        let (previous_idle, finished) = match std::mem::replace(&mut inner.phase, Phase::Closed) {
            Phase::Closed => return,
            Phase::Bound { exchange, .. } => (None, Some(exchange)),
            Phase::WaitingForBind { idle } => (idle, None),
        };

        let nothing_written = cycle.when == When::Poll && !cycle.written.load(Ordering::SeqCst);
        if !nothing_written {
            inner.phase = Phase::WaitingForBind {
                idle: self.arm_idle_timer(),
            };
        }
        drop(inner);
        drop(previous_idle);
        drop(finished);

        if nothing_written {
            self.finish_close("poll ended without data");
        } else {
            trace!(session_id = %self.id, when = %cycle.when, "exchange finished, waiting for next poll");
        }
    }

    fn on_exchange_error(&self, seq: u64, err: TransportError) {
        if self.inner.lock().current_cycle != seq {
            trace!(session_id = %self.id, cycle = seq, error = %err, "superseded exchange failed");
            return;
        }
        warn!(session_id = %self.id, error = %err, "exchange failed");
        self.error_actions.fire(&err);

        let inner = self.inner.lock();
        // A bind may have landed while the handlers ran
        if inner.current_cycle != seq {
            return;
        }
        self.close_locked(inner, "exchange error");
    }

    fn on_exchange_closed(&self, seq: u64) {
        let inner = self.inner.lock();
        if inner.current_cycle != seq {
            trace!(session_id = %self.id, cycle = seq, "superseded exchange disconnected");
            return;
        }
        self.close_locked(inner, "client disconnected");
    }

    fn arm_hold_timer(&self) -> Option<IdleTimer> {
        let this = self.this.clone();
        IdleTimer::arm(self.idle_timeout, move |timer_id| {
            if let Some(session) = this.upgrade() {
                session.on_hold_timeout(timer_id);
            }
        })
    }

    fn on_hold_timeout(&self, timer_id: u64) {
        let mut inner = self.inner.lock();
        match &mut inner.phase {
            Phase::Bound { hold, .. }
                if hold.as_ref().is_some_and(|timer| timer.id() == timer_id) =>
            {
                if let Some(timer) = hold.take() {
                    timer.into_fired();
                }
            }
            _ => {
                trace!(session_id = %self.id, timer_id, "hold timer lost the race to a delivery");
                return;
            }
        }
        self.close_locked(inner, "poll held past idle timeout");
    }

    fn arm_idle_timer(&self) -> Option<IdleTimer> {
        let this = self.this.clone();
        let timer = IdleTimer::arm(self.idle_timeout, move |timer_id| {
            if let Some(session) = this.upgrade() {
                session.on_idle_timeout(timer_id);
            }
        });
        if timer.is_none() {
            warn!(session_id = %self.id, "no tokio runtime, idle timeout disabled");
        }
        timer
    }

    fn on_idle_timeout(&self, timer_id: u64) {
        let mut inner = self.inner.lock();
        match &mut inner.phase {
            Phase::WaitingForBind { idle }
                if idle.as_ref().is_some_and(|timer| timer.id() == timer_id) =>
            {
                if let Some(timer) = idle.take() {
                    timer.into_fired();
                }
            }
            _ => {
                trace!(session_id = %self.id, timer_id, "idle timer lost the race to a bind");
                return;
            }
        }
        self.close_locked(inner, "idle timeout");
    }

    fn close_locked(&self, mut inner: MutexGuard<'_, Inner>, reason: &'static str) {
        let previous = std::mem::replace(&mut inner.phase, Phase::Closed);
        drop(inner);
        match previous {
            Phase::Closed => return,
            Phase::Bound { exchange, .. } => exchange.end(None),
            Phase::WaitingForBind { idle } => drop(idle),
        }
        self.finish_close(reason);
    }

    fn finish_close(&self, reason: &'static str) {
        info!(
            session_id = %self.id,
            reason,
            undelivered = self.cache.len(),
            "long-polling session closed"
        );
        self.close_actions.fire(());
    }
}

impl ServerTransport for LongpollSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, frame: &str) -> TransportResult<()> {
        LongpollSession::send(self, frame)
    }

    fn close(&self) {
        LongpollSession::close(self);
    }

    fn is_closed(&self) -> bool {
        LongpollSession::is_closed(self)
    }

    fn on_message(&self, handler: Handler<String>) {
        self.message_actions.add(handler);
    }

    fn on_close(&self, handler: Handler<()>) {
        self.close_actions.add(handler);
    }

    fn on_error(&self, handler: Handler<TransportError>) {
        self.error_actions.add(handler);
    }
}

impl fmt::Debug for LongpollSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LongpollSession")
            .field("id", &self.id)
            .field("encoding", &self.encoding)
            .field("state", &self.state())
            .field("cached_frames", &self.cache.len())
            .finish()
    }
}
