//! Session lifecycle tests
//!
//! Drives a single [`LongpollSession`] through open, bind, send and close
//! with recording exchanges, on a paused clock so the idle timer can be
//! stepped deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use tether_longpoll::{LongpollSession, ResponseEncoding, SessionState, When};
use tether_traits::mock::{MockExchange, MockHandle};
use tether_traits::{ServerTransport, TransportError};
use tokio::time::sleep;

const IDLE: Duration = Duration::from_millis(3_000);

/// Opens a session and returns it together with a close counter.
fn open(encoding: ResponseEncoding) -> (Arc<LongpollSession>, Arc<AtomicUsize>) {
    let (exchange, handshake) = MockExchange::get("/vibe?when=open");
    let session = LongpollSession::open("s-1", exchange, encoding, IDLE);
    assert!(handshake.is_ended());

    let closes = Arc::new(AtomicUsize::new(0));
    let counter = closes.clone();
    session.on_close(Box::new(move |_: &()| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    (session, closes)
}

fn poll(session: &LongpollSession) -> MockHandle {
    let (exchange, handle) = MockExchange::get("/vibe?when=poll&id=s-1");
    session.bind(exchange, When::Poll);
    handle
}

mod scenarios {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_frame_sent_while_unbound_is_drained_on_poll() {
        let (session, closes) = open(ResponseEncoding::Plain);

        session.send("hello").expect("open session");
        assert_eq!(session.cached_frames(), 1);

        let handle = poll(&session);
        assert_eq!(handle.body().as_deref(), Some("hello"));
        assert_eq!(session.cached_frames(), 0);
        assert_eq!(session.state(), SessionState::WaitingForBind);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbound_frames_drain_in_order_one_per_poll() {
        let (session, closes) = open(ResponseEncoding::Plain);

        for frame in ["a", "b", "c"] {
            session.send(frame).expect("open session");
        }
        assert_eq!(session.cached_frames(), 3);

        let bodies: Vec<_> = (0..3).map(|_| poll(&session).body()).collect();
        assert_eq!(
            bodies,
            vec![Some("a".to_string()), Some("b".to_string()), Some("c".to_string())]
        );
        assert_eq!(session.cached_frames(), 0);
        assert_eq!(session.state(), SessionState::WaitingForBind);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_poll_times_out_and_closes() {
        let (session, closes) = open(ResponseEncoding::Plain);

        let handle = poll(&session);
        sleep(IDLE - Duration::from_millis(1)).await;
        assert!(!handle.is_ended());
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(2)).await;
        assert_eq!(handle.body().as_deref(), Some(""));
        assert_eq!(handle.end_calls(), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_sent_while_bound_ends_exchange() {
        let (session, _closes) = open(ResponseEncoding::Plain);

        let handle = poll(&session);
        assert!(!handle.is_ended());
        assert_eq!(session.state(), SessionState::Bound);

        session.send("x").expect("open session");
        assert_eq!(handle.body().as_deref(), Some("x"));
        assert_eq!(handle.end_calls(), 1);
        assert_eq!(session.cached_frames(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_jsonp_frame_is_wrapped() {
        let (session, _closes) = open(ResponseEncoding::Callback("cb".into()));

        session.send("42").expect("open session");
        let handle = poll(&session);
        assert_eq!(handle.body().as_deref(), Some(r#"cb("42");"#));
        assert_eq!(
            handle.header("content-type").as_deref(),
            Some("text/javascript; charset=utf-8")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_ending_without_data_closes() {
        let (session, closes) = open(ResponseEncoding::Plain);

        let handle = poll(&session);
        // The HTTP layer gives up on the held request
        handle.finish();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(handle.end_calls(), 0);
        assert_eq!(handle.body().as_deref(), Some(""));
        assert_eq!(session.cached_frames(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_while_unbound_answers_next_poll_empty() {
        let (session, closes) = open(ResponseEncoding::Plain);
        session.send("pending").expect("open session");

        session.close();
        assert_eq!(session.state(), SessionState::WaitingForBind);
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        let handle = poll(&session);
        assert_eq!(handle.body().as_deref(), Some(""));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), SessionState::Closed);
        // The cached frame was not delivered
        assert_eq!(session.cached_frames(), 1);
    }
}

mod idle_timer {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_no_reconnect_after_handshake_closes() {
        let (session, closes) = open(ResponseEncoding::Plain);

        sleep(IDLE - Duration::from_millis(1)).await;
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(2)).await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_restarts_countdown() {
        let (session, closes) = open(ResponseEncoding::Plain);

        sleep(IDLE - Duration::from_millis(1)).await;
        let handle = poll(&session);

        // The handshake countdown would have fired here
        sleep(IDLE - Duration::from_millis(1)).await;
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert_eq!(session.state(), SessionState::Bound);
        assert!(!handle.is_ended());

        sleep(Duration::from_millis(2)).await;
        assert_eq!(handle.body().as_deref(), Some(""));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_cancels_hold_countdown() {
        let (session, closes) = open(ResponseEncoding::Plain);

        sleep(IDLE / 2).await;
        let first = poll(&session);
        sleep(IDLE / 2).await;
        session.send("x").expect("open session");
        assert_eq!(first.body().as_deref(), Some("x"));

        // A fresh poll right away: only its own countdown may end it
        let second = poll(&session);
        sleep(IDLE - Duration::from_millis(1)).await;
        assert!(!second.is_ended());
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_poll_rearms_idle_timer() {
        let (session, closes) = open(ResponseEncoding::Plain);

        let handle = poll(&session);
        session.send("x").expect("open session");
        assert!(handle.is_ended());

        sleep(IDLE + Duration::from_millis(1)).await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_requested_then_timeout_closes_once() {
        let (session, closes) = open(ResponseEncoding::Plain);
        session.close();

        sleep(IDLE + Duration::from_millis(1)).await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let handle = poll(&session);
        assert_eq!(handle.body().as_deref(), Some(""));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}

mod handoff {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_new_poll_supersedes_held_exchange() {
        let (session, closes) = open(ResponseEncoding::Plain);

        let first = poll(&session);
        let second = poll(&session);

        assert_eq!(first.body().as_deref(), Some(""));
        assert!(!second.is_ended());
        assert_eq!(session.state(), SessionState::Bound);
        // The superseded exchange's finish is stale
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        session.send("after").expect("open session");
        assert_eq!(second.body().as_deref(), Some("after"));
        assert_eq!(first.end_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_finish_is_ignored() {
        let (session, closes) = open(ResponseEncoding::Plain);

        let (exchange, first) = MockExchange::get("/vibe?when=poll&id=s-1");
        session.bind(exchange.with_manual_finish(), When::Poll);
        session.send("x").expect("open session");
        assert!(first.has_pending_finish());

        let second = poll(&session);
        first.finish();

        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert_eq!(session.state(), SessionState::Bound);
        assert!(!second.is_ended());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_exchange_disconnect_and_error_are_ignored() {
        let (session, closes) = open(ResponseEncoding::Plain);
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        session.on_error(Box::new(move |_: &TransportError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let first = poll(&session);
        let second = poll(&session);
        first.disconnect();
        first.fail(TransportError::ConnectionLost("reset by peer".into()));

        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(session.state(), SessionState::Bound);

        session.send("still here").expect("open session");
        assert_eq!(second.body().as_deref(), Some("still here"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_headers_are_set_before_body() {
        let (session, _closes) = open(ResponseEncoding::Callback("cb".into()));
        let handle = poll(&session);
        session.send("y").expect("open session");

        assert_eq!(handle.late_headers(), 0);
        assert_eq!(
            handle.header("content-type").as_deref(),
            Some("text/javascript; charset=utf-8")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_deliver_each_frame_once() {
        let (session, _closes) = open(ResponseEncoding::Plain);
        let handle = poll(&session);

        let senders: Vec<_> = (0..32)
            .map(|i| {
                let session = session.clone();
                tokio::spawn(async move { session.send(&format!("f{i}")) })
            })
            .collect();
        for sender in senders {
            sender
                .await
                .expect("sender task")
                .expect("session still open");
        }

        let delivered = handle.body().expect("bound exchange answered");
        assert!(delivered.starts_with('f'));
        assert_eq!(handle.end_calls(), 1);
        assert_eq!(session.cached_frames(), 31);
    }
}

mod closing {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_close_while_bound_ends_exchange_and_signals() {
        let (session, closes) = open(ResponseEncoding::Plain);
        let handle = poll(&session);

        session.close();
        assert_eq!(handle.body().as_deref(), Some(""));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(matches!(session.send("late"), Err(TransportError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_signal_fires_once() {
        let (session, closes) = open(ResponseEncoding::Plain);

        session.terminate();
        session.terminate();
        session.close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        let late = Arc::new(AtomicUsize::new(0));
        let counter = late.clone();
        session.on_close(Box::new(move |_: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exchange_error_reports_and_closes() {
        let (session, closes) = open(ResponseEncoding::Plain);
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = errors.clone();
        session.on_error(Box::new(move |_: &TransportError| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let handle = poll(&session);
        handle.fail(TransportError::ConnectionLost("reset by peer".into()));

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_disconnect_closes() {
        let (session, closes) = open(ResponseEncoding::Plain);
        let handle = poll(&session);

        handle.disconnect();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_terminates() {
        let (session, closes) = open(ResponseEncoding::Plain);

        let (exchange, handle) = MockExchange::get("/vibe?when=abort&id=s-1");
        session.bind(exchange, When::Abort);

        assert_eq!(handle.body().as_deref(), Some(""));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bind_after_close_is_answered_empty() {
        let (session, _closes) = open(ResponseEncoding::Plain);
        session.terminate();

        let handle = poll(&session);
        assert_eq!(handle.body().as_deref(), Some(""));
    }
}
