//! # Tether axum Integration
//!
//! Serves a [`LongpollServer`](tether_longpoll::LongpollServer) over axum.
//! Every request on the endpoint becomes an [`AxumExchange`] handed to the
//! server; the handler then waits until the session answers it.
//!
//! ```rust,no_run
//! use tether_axum::{LongpollServerConfig, run_server};
//! use tether_longpoll::LongpollServer;
//!
//! # async fn serve() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LongpollServerConfig::from_env();
//! let server = LongpollServer::new(config.longpoll.clone());
//! run_server(server, config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! To mount the endpoint into an existing application, merge
//! [`longpoll_router`] into its router.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod exchange;
pub mod router;

pub use config::LongpollServerConfig;
pub use error::{ServeError, ServeResult};
pub use exchange::{AxumExchange, PendingResponse};
pub use router::{longpoll_router, run_server, run_server_with_shutdown};
