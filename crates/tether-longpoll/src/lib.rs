//! # Tether Long-Polling
//!
//! Server side of an HTTP long-polling transport. The server keeps each
//! client's `GET` open until a frame is ready, answers it with that frame,
//! and waits for the client to reconnect. Frames sent while no request is
//! held are cached and drained on the next poll.
//!
//! ## Protocol
//!
//! - `GET ?when=open` creates a session and answers with `?id=<id>`.
//! - `GET ?when=poll&id=<id>` binds the request as the live channel. A poll
//!   that ends without data tells the client the session is gone.
//! - `GET ?when=abort&id=<id>` closes the session.
//! - `POST ?id=<id>` with body `data=<message>` delivers a message.
//!
//! With `jsonp=true&callback=<name>`, every answer is wrapped as
//! `<name>("<frame>");` and served as JavaScript.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_longpoll::{LongpollConfig, LongpollServer};
//! use tether_traits::{ServerTransport, TransportServer};
//!
//! let server = LongpollServer::new(LongpollConfig::default());
//! server.on_transport(Box::new(|transport: &Arc<dyn ServerTransport>| {
//!     let _ = transport.send("welcome");
//! }));
//! // Hand every incoming exchange to `server.handle(exchange)`.
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod server;
pub mod session;
pub mod timer;
pub mod wire;

pub use cache::FrameCache;
pub use config::LongpollConfig;
pub use server::LongpollServer;
pub use session::{LongpollSession, SessionState};
pub use timer::IdleTimer;
pub use wire::{
    CONTENT_TYPE_JAVASCRIPT, CONTENT_TYPE_PLAIN, PollQuery, ResponseEncoding, When,
    decode_message_body, handshake_body,
};

/// Idle timeout applied between an answered exchange and the next poll.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 3_000;
