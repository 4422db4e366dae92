//! End-to-end tests of the protocol engine against a scripted daemon:
//! reply framing, command/response pairing under concurrency, event
//! routing, and connection teardown.

mod common;

use common::MockDaemon;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tor_ctrl::connection::ControlConnection;
use tor_ctrl::{EventHandler, TorCtlError};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn authenticate_round_trip() {
    let (stream, mut daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);

    let task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.exec("AUTHENTICATE \r\n", None).await })
    };
    daemon.expect("AUTHENTICATE ").await;
    daemon.send_line("250 OK").await;

    let reply = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.lines.len(), 1);
    assert_eq!(reply.code(), 250);
    assert_eq!(reply.first_message(), "OK");
}

#[tokio::test]
async fn multi_line_reply() {
    let (stream, mut daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);

    let task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.exec("GETINFO version\r\n", None).await })
    };
    daemon.expect("GETINFO version").await;
    daemon.send_line("250-version=Tor 0.4.7.13").await;
    daemon.send_line("250 OK").await;

    let reply = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.lines.len(), 2);
    assert_eq!(reply.lines[0].message, "version=Tor 0.4.7.13");
    assert_eq!(reply.lines[1].message, "OK");
}

#[tokio::test]
async fn data_body_is_unstuffed_exactly() {
    let (stream, mut daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);

    let task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.exec("GETINFO config-text\r\n", None).await })
    };
    daemon.expect("GETINFO config-text").await;
    daemon.send_line("250+config-text=").await;
    daemon.send_line("Nickname X").await;
    daemon.send_line("..leading-dot-line").await;
    daemon.send_line("ExitPolicy reject *:*").await;
    daemon.send_line(".").await;
    daemon.send_line("250 OK").await;

    let reply = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(
        reply.lines[0].data.as_deref(),
        Some("Nickname X\n.leading-dot-line\nExitPolicy reject *:*")
    );
}

#[tokio::test]
async fn server_error_is_returned_to_the_caller() {
    let (stream, mut daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);

    let task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.exec("SETCONF BadOption=1\r\n", None).await })
    };
    daemon.expect("SETCONF BadOption=1").await;
    daemon.send_line("552 Unrecognized option: BadOption").await;

    match timeout(TEST_TIMEOUT, task).await.unwrap().unwrap() {
        Err(TorCtlError::Server { code, message }) => {
            assert_eq!(code, 552);
            assert_eq!(message, "Unrecognized option: BadOption");
        }
        other => panic!("expected server error, got {:?}", other),
    }

    // The connection stays usable after a server error.
    let task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.exec("GETINFO version\r\n", None).await })
    };
    daemon.expect("GETINFO version").await;
    daemon.send_line("250 OK").await;
    assert!(timeout(TEST_TIMEOUT, task).await.unwrap().unwrap().is_ok());
}

struct BandwidthRecorder {
    read: AtomicU64,
    written: AtomicU64,
}

impl EventHandler for BandwidthRecorder {
    fn bandwidth_used(&self, bytes_read: u64, bytes_written: u64) {
        self.read.store(bytes_read, Ordering::SeqCst);
        self.written.store(bytes_written, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn event_during_pending_request_goes_to_the_handler() {
    let (stream, mut daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);

    let recorder = Arc::new(BandwidthRecorder {
        read: AtomicU64::new(0),
        written: AtomicU64::new(0),
    });
    conn.set_event_handler(Some(recorder.clone()));

    let task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.exec("GETINFO version\r\n", None).await })
    };
    daemon.expect("GETINFO version").await;
    daemon.send_line("650 BW 1024 2048").await;
    daemon.send_line("250-version=Tor 0.4.7.13").await;
    daemon.send_line("250 OK").await;

    let reply = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.code(), 250);
    assert_eq!(recorder.read.load(Ordering::SeqCst), 1024);
    assert_eq!(recorder.written.load(Ordering::SeqCst), 2048);
}

#[tokio::test]
async fn concurrent_callers_receive_replies_in_write_order() {
    const CALLERS: usize = 8;

    let (stream, mut daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);
    conn.start();

    let mut tasks = Vec::new();
    for i in 0..CALLERS {
        let conn = conn.clone();
        tasks.push(tokio::spawn(async move {
            let cmd = format!("GETINFO key{}\r\n", i);
            let reply = conn.exec(&cmd, None).await.unwrap();
            (i, reply.first_message().to_string())
        }));
    }

    // Echo every command back in arrival order, with events sprinkled
    // between responses.
    for _ in 0..CALLERS {
        let line = daemon.read_line().await;
        daemon.send_line("650 BW 1 2").await;
        daemon.send_line(&format!("250 echo {}", line)).await;
    }

    for task in tasks {
        let (i, message) = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
        assert_eq!(message, format!("echo GETINFO key{}", i));
    }
}

#[tokio::test]
async fn abandoned_caller_does_not_shift_the_pairing() {
    let (stream, mut daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);
    conn.start();

    // The first caller gives up before its reply arrives.
    let abandoned = {
        let conn = conn.clone();
        timeout(
            Duration::from_millis(100),
            async move { conn.exec("GETINFO first\r\n", None).await },
        )
        .await
    };
    assert!(abandoned.is_err(), "caller should have timed out");

    let second = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.exec("GETINFO second\r\n", None).await })
    };

    daemon.expect("GETINFO first").await;
    daemon.expect("GETINFO second").await;
    // The first reply is discarded against the abandoned waiter; the
    // second reaches the live caller.
    daemon.send_line("250 for the abandoned caller").await;
    daemon.send_line("250 for the live caller").await;

    let reply = timeout(TEST_TIMEOUT, second).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.first_message(), "for the live caller");
}

#[tokio::test]
async fn clean_close_with_no_pending_requests() {
    let (stream, daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);
    conn.start();

    daemon.close();
    settle().await;

    assert!(matches!(
        conn.exec("GETINFO version\r\n", None).await,
        Err(TorCtlError::TransportClosed)
    ));
}

#[tokio::test]
async fn close_with_pending_requests_cancels_all_of_them() {
    const PENDING: usize = 3;

    let (stream, mut daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);
    conn.start();

    let mut tasks = Vec::new();
    for i in 0..PENDING {
        let conn = conn.clone();
        tasks.push(tokio::spawn(async move {
            conn.exec(&format!("GETINFO key{}\r\n", i), None).await
        }));
    }
    // Writer-lock acquisition order among the tasks is arbitrary;
    // just drain one command per caller.
    for _ in 0..PENDING {
        daemon.read_line().await;
    }
    daemon.close();

    for task in tasks {
        let result = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
        assert!(matches!(result, Err(TorCtlError::TransportClosed)));
    }

    // Nothing further reaches the wire.
    assert!(matches!(
        conn.send_fire_and_forget("SIGNAL NEWNYM\r\n").await,
        Err(TorCtlError::TransportClosed)
    ));
}

#[tokio::test]
async fn eof_mid_reply_is_a_latched_protocol_error() {
    let (stream, mut daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);

    let task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.exec("GETINFO version\r\n", None).await })
    };
    daemon.expect("GETINFO version").await;
    daemon.send_line("250-partial").await;
    daemon.close();

    let result = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    assert!(matches!(result, Err(TorCtlError::Protocol(_))));

    // The error is latched for every later command.
    assert!(matches!(
        conn.exec("GETINFO version\r\n", None).await,
        Err(TorCtlError::Protocol(_))
    ));
}

#[tokio::test]
async fn raw_listeners_and_handler_both_see_events() {
    let (stream, mut daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);
    conn.start();

    let raw: Arc<Mutex<Vec<String>>> = Arc::default();
    let sink = raw.clone();
    conn.add_raw_listener(Arc::new(move |name: &str, rest: &str| {
        sink.lock().unwrap().push(format!("{}|{}", name, rest));
    }));

    let recorder = Arc::new(BandwidthRecorder {
        read: AtomicU64::new(0),
        written: AtomicU64::new(0),
    });
    conn.set_event_handler(Some(recorder.clone()));

    daemon.send_line("650 BW 10 20").await;
    daemon.send_line("650 UNKNOWN_KIND some args").await;
    settle().await;

    assert_eq!(
        *raw.lock().unwrap(),
        vec!["BW|10 20", "UNKNOWN_KIND|some args"]
    );
    assert_eq!(recorder.read.load(Ordering::SeqCst), 10);
    assert_eq!(recorder.written.load(Ordering::SeqCst), 20);
}

#[tokio::test]
async fn fire_and_forget_then_eof_is_clean() {
    let (stream, mut daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);
    conn.start();

    conn.send_fire_and_forget("SIGNAL SHUTDOWN\r\n").await.unwrap();
    daemon.expect("SIGNAL SHUTDOWN").await;
    daemon.close();
    settle().await;

    // No pending waiter existed, so the EOF latches TransportClosed
    // without any caller observing an error.
    assert!(matches!(
        conn.exec("GETINFO version\r\n", None).await,
        Err(TorCtlError::TransportClosed)
    ));
}

#[tokio::test]
async fn lf_only_line_endings_are_accepted() {
    let (stream, mut daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);

    let task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.exec("GETINFO version\r\n", None).await })
    };
    daemon.expect("GETINFO version").await;
    daemon.send("250-version=x\n250 OK\n").await;

    let reply = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(reply.lines.len(), 2);
    assert_eq!(reply.lines[0].message, "version=x");
}

#[tokio::test]
async fn malformed_status_line_kills_the_reader() {
    let (stream, mut daemon) = MockDaemon::new();
    let conn = ControlConnection::new(stream);

    let task = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.exec("GETINFO version\r\n", None).await })
    };
    daemon.expect("GETINFO version").await;
    daemon.send_line("2x0 nonsense").await;

    let result = timeout(TEST_TIMEOUT, task).await.unwrap().unwrap();
    assert!(matches!(result, Err(TorCtlError::Protocol(_))));
}
