//! # Tether Transport Traits
//!
//! Core capabilities shared by the Tether long-polling transport and the HTTP
//! adapters that feed it. This crate provides the seam between a concrete HTTP
//! server and the session logic.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Consumed capability**: [`ServerHttpExchange`], one HTTP request/response round trip
//! - **Exposed capability**: [`ServerTransport`] and [`TransportServer`]
//! - **Callbacks**: [`Actions`], [`OnceActions`] and the boxed action aliases
//! - **Errors**: [`TransportError`], [`TransportResult`]
//!
//! ## Usage
//!
//! HTTP adapters implement [`ServerHttpExchange`] and hand boxed exchanges to
//! a [`TransportServer`]:
//!
//! ```rust,ignore
//! use tether_traits::{BoxedExchange, TransportServer};
//!
//! fn on_request(server: &impl TransportServer, exchange: BoxedExchange) {
//!     server.handle(exchange);
//! }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

mod action;
mod error;
mod exchange;
mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use action::{Actions, Handler, OnceActions};
pub use error::{TransportError, TransportResult};
pub use exchange::{BodyAction, BoxedExchange, ErrorAction, ServerHttpExchange, VoidAction};
pub use transport::{ServerTransport, TransportServer};

/// Commonly used header names.
pub mod headers {
    /// Response content type.
    pub const CONTENT_TYPE: &str = "content-type";

    /// Request content length.
    pub const CONTENT_LENGTH: &str = "content-length";
}
