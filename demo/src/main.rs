//! Tether demo - long-polling echo server
//!
//! Every message a client posts is sent back on its long-polling channel.
//!
//! ```text
//! curl 'http://127.0.0.1:8080/vibe?when=open'                   # ?id=<id>
//! curl 'http://127.0.0.1:8080/vibe?when=poll&id=<id>' &          # held
//! curl -d 'data=hi' 'http://127.0.0.1:8080/vibe?id=<id>'         # poll answers "hi"
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tether_axum::{LongpollServerConfig, run_server_with_shutdown};
use tether_longpoll::{LongpollConfig, LongpollServer};
use tether_traits::{ServerTransport, TransportError, TransportServer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Long-polling echo server
#[derive(Parser, Debug)]
#[command(name = "tether-demo", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "TETHER_BIND_ADDR", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Path of the long-polling endpoint
    #[arg(long, env = "TETHER_ENDPOINT_PATH", default_value = "/vibe")]
    path: String,

    /// Close sessions that do not reconnect within this many milliseconds
    #[arg(long, env = "TETHER_IDLE_TIMEOUT_MS", default_value_t = tether_longpoll::DEFAULT_IDLE_TIMEOUT_MS)]
    idle_timeout_ms: u64,

    /// Answer held polls empty after this many milliseconds (0 holds indefinitely)
    #[arg(long, env = "TETHER_POLL_TIMEOUT_MS", default_value_t = 0)]
    poll_timeout_ms: u64,

    /// Disable response compression
    #[arg(long)]
    no_compression: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn server_config(&self) -> LongpollServerConfig {
        let config = LongpollServerConfig::new()
            .with_bind_address(self.bind.clone())
            .with_endpoint_path(self.path.clone())
            .with_compression(!self.no_compression)
            .with_longpoll(LongpollConfig::new().with_idle_timeout_ms(self.idle_timeout_ms));
        if self.poll_timeout_ms > 0 {
            config.with_poll_timeout(Duration::from_millis(self.poll_timeout_ms))
        } else {
            config
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tether_longpoll=debug,tether_axum=debug"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Echoes every inbound message back to its sender.
fn echo(transport: &Arc<dyn ServerTransport>) {
    let id = transport.id().to_string();
    info!(session_id = %id, "client connected");

    let weak: Weak<dyn ServerTransport> = Arc::downgrade(transport);
    transport.on_message(Box::new(move |message: &String| {
        let Some(transport) = weak.upgrade() else {
            return;
        };
        if let Err(err) = transport.send(message) {
            warn!(session_id = %transport.id(), error = %err, "echo failed");
        }
    }));

    transport.on_error(Box::new({
        let id = id.clone();
        move |err: &TransportError| warn!(session_id = %id, error = %err, "transport error")
    }));
    transport.on_close(Box::new(move |_: &()| {
        info!(session_id = %id, "client disconnected");
    }));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = args.server_config();
    let server = LongpollServer::new(config.longpoll.clone());
    server.on_transport(Box::new(echo));

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    run_server_with_shutdown(server, config, shutdown)
        .await
        .context("long-polling server failed")
}
