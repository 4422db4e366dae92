//! The protocol engine: a request/response multiplexer over one
//! duplex byte stream.
//!
//! Synchronous replies and asynchronous events arrive interleaved on
//! the same stream, so a single background reader task parses every
//! reply and routes it: status class 6xx goes to the event
//! [`Dispatcher`], everything else completes the oldest pending
//! command. The daemon answers commands in order, which makes a FIFO
//! of waiters sufficient — there are no tags to match on. The engine
//! guarantees that the order of waiters equals the order of command
//! bytes on the wire by performing both the write and the enqueue
//! under one lock.

use crate::error::{Result, TorCtlError};
use crate::events::{Dispatcher, EventHandler, RawEventListener};
use crate::protocol::{encode_data_block, Reply, ReplyLine};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Sink for the wire-level debug tap. Receives every outgoing line as
/// `>> <line>` and every incoming line as `<< <line>`. Advisory only:
/// implementations must not block.
pub trait DebugTap: Send + Sync {
    /// Called once per wire line, prefixed with its direction.
    fn line(&self, line: &str);
}

impl<F> DebugTap for F
where
    F: Fn(&str) + Send + Sync,
{
    fn line(&self, line: &str) {
        self(line)
    }
}

type BoxedRead = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// A pending command's completion slot.
type Waiter = oneshot::Sender<Result<Reply>>;

/// Terminal condition of the reader, latched for the connection's
/// remaining lifetime.
#[derive(Debug, Clone)]
enum Fatal {
    /// The wire grammar was violated; the stream state is unknown.
    Protocol(String),
    /// The stream ended or failed.
    Closed,
}

impl Fatal {
    fn to_error(&self) -> TorCtlError {
        match self {
            Fatal::Protocol(msg) => TorCtlError::Protocol(msg.clone()),
            Fatal::Closed => TorCtlError::TransportClosed,
        }
    }
}

/// State shared between command callers and the reader task.
struct Shared {
    waiters: Mutex<VecDeque<Waiter>>,
    dispatcher: Dispatcher,
    tap: RwLock<Option<Arc<dyn DebugTap>>>,
    fatal: OnceLock<Fatal>,
}

impl Shared {
    fn tap_line(&self, line: &str) {
        let tap = self.tap.read().unwrap().clone();
        if let Some(tap) = tap {
            tap.line(line);
        }
    }

    fn tap_active(&self) -> bool {
        self.tap.read().unwrap().is_some()
    }

    /// Latch the terminal condition and fail every pending waiter
    /// with it. The first latch wins; later calls reuse it.
    fn terminate(&self, fatal: Fatal) {
        let _ = self.fatal.set(fatal);
        let latched = self.fatal.get().expect("just set");
        let drained: Vec<Waiter> = self.waiters.lock().unwrap().drain(..).collect();
        for waiter in drained {
            let _ = waiter.send(Err(latched.to_error()));
        }
    }
}

/// A connection to a Tor control port over an arbitrary duplex byte
/// stream.
///
/// Cloning yields another handle to the same connection; any number of
/// tasks may issue commands concurrently. The background reader is
/// started by [`start`](Self::start) or implicitly by the first
/// [`exec`](Self::exec).
#[derive(Clone)]
pub struct ControlConnection {
    shared: Arc<Shared>,
    writer: Arc<tokio::sync::Mutex<BoxedWrite>>,
    pending_reader: Arc<Mutex<Option<BoxedRead>>>,
    reader_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ControlConnection {
    /// Wrap a duplex byte stream. The stream is the only transport the
    /// engine touches; establishing it (TCP, Unix socket, in-memory
    /// pipe) is the caller's concern.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let read_half: Box<dyn AsyncRead + Send + Unpin> = Box::new(read_half);

        ControlConnection {
            shared: Arc::new(Shared {
                waiters: Mutex::new(VecDeque::new()),
                dispatcher: Dispatcher::default(),
                tap: RwLock::new(None),
                fatal: OnceLock::new(),
            }),
            writer: Arc::new(tokio::sync::Mutex::new(Box::new(write_half))),
            pending_reader: Arc::new(Mutex::new(Some(BufReader::new(read_half)))),
            reader_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the background reader. Idempotent; concurrent callers
    /// elect one starter. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let Some(reader) = self.pending_reader.lock().unwrap().take() else {
            return;
        };
        debug!("starting control connection reader");
        let shared = self.shared.clone();
        let handle = tokio::spawn(read_loop(reader, shared));
        *self.reader_task.lock().unwrap() = Some(handle);
    }

    /// Send a command and wait for its reply.
    ///
    /// `command` is the fully formatted command line including its
    /// trailing CRLF; `body` is sent after it as a dot-stuffed data
    /// block when present. Fails with [`TorCtlError::Server`] if any
    /// reply line has a non-2xx status. After the reader has
    /// terminated, fails immediately with the latched error without
    /// touching the stream.
    pub async fn exec(&self, command: &str, body: Option<&str>) -> Result<Reply> {
        self.check_usable()?;
        self.start();

        let (tx, rx) = oneshot::channel();
        {
            let mut writer = self.writer.lock().await;
            // Enqueue before the bytes leave so the reader can never
            // see a reply for a command whose waiter is not yet
            // queued. Ordering is still write order: both happen
            // under the writer lock. The latch is re-checked under
            // the waiter lock so a terminating reader either drains
            // this waiter or was observed here first.
            {
                let mut waiters = self.shared.waiters.lock().unwrap();
                self.check_usable()?;
                waiters.push_back(tx);
            }
            if let Err(e) = self.write_command(&mut writer, command, body).await {
                self.shared.waiters.lock().unwrap().pop_back();
                return Err(e);
            }
        }

        match rx.await {
            Ok(result) => result?.into_result(),
            Err(_) => Err(TorCtlError::Canceled),
        }
    }

    /// Write a command without registering a waiter. Used for the
    /// shutdown signals, where the daemon may close the connection
    /// before replying; the EOF that follows is then a clean close.
    pub async fn send_fire_and_forget(&self, command: &str) -> Result<()> {
        self.check_usable()?;
        let mut writer = self.writer.lock().await;
        self.check_usable()?;
        self.write_command(&mut writer, command, None).await
    }

    /// Register a raw event listener.
    pub fn add_raw_listener(&self, listener: RawEventListener) {
        self.shared.dispatcher.add_raw_listener(listener);
    }

    /// Remove a raw event listener previously registered (identity
    /// comparison on the `Arc`).
    pub fn remove_raw_listener(&self, listener: &RawEventListener) {
        self.shared.dispatcher.remove_raw_listener(listener);
    }

    /// Install or clear the typed event handler.
    pub fn set_event_handler(&self, handler: Option<Arc<dyn EventHandler>>) {
        self.shared.dispatcher.set_handler(handler);
    }

    /// Install or clear the wire-level debug tap. Safe at any time.
    pub fn set_debug_tap(&self, tap: Option<Arc<dyn DebugTap>>) {
        *self.shared.tap.write().unwrap() = tap;
    }

    /// Tear the connection down: stop the reader, fail pending
    /// commands with [`TorCtlError::Canceled`], and close the write
    /// half. Subsequent commands fail with
    /// [`TorCtlError::TransportClosed`].
    pub async fn shutdown(&self) {
        let _ = self.shared.fatal.set(Fatal::Closed);
        if let Some(handle) = self.reader_task.lock().unwrap().take() {
            handle.abort();
        }
        self.pending_reader.lock().unwrap().take();
        let drained: Vec<Waiter> = self.shared.waiters.lock().unwrap().drain(..).collect();
        for waiter in drained {
            let _ = waiter.send(Err(TorCtlError::Canceled));
        }
        let _ = self.writer.lock().await.shutdown().await;
        debug!("control connection shut down");
    }

    fn check_usable(&self) -> Result<()> {
        match self.shared.fatal.get() {
            Some(fatal) => Err(fatal.to_error()),
            None => Ok(()),
        }
    }

    async fn write_command(
        &self,
        writer: &mut BoxedWrite,
        command: &str,
        body: Option<&str>,
    ) -> Result<()> {
        trace!("sending command: {}", command.trim_end());
        if self.shared.tap_active() {
            self.shared
                .tap_line(&format!(">> {}", command.trim_end_matches(['\r', '\n'])));
            if let Some(body) = body {
                for line in body.split('\n') {
                    let line = line.trim_end_matches('\r');
                    let stuffed = if line.starts_with('.') { "." } else { "" };
                    self.shared.tap_line(&format!(">> {}{}", stuffed, line));
                }
                self.shared.tap_line(">> .");
            }
        }

        writer.write_all(command.as_bytes()).await?;
        if let Some(body) = body {
            writer.write_all(encode_data_block(body).as_bytes()).await?;
        }
        writer.flush().await?;
        Ok(())
    }
}

/// The background reader: parse one reply at a time and route it
/// until the stream ends or the wire grammar breaks.
async fn read_loop(mut reader: BoxedRead, shared: Arc<Shared>) {
    let fatal = loop {
        match read_reply(&mut reader, &shared).await {
            Ok(Some(reply)) if reply.is_event() => {
                shared
                    .dispatcher
                    .dispatch(&reply, |note| shared.tap_line(note));
            }
            Ok(Some(reply)) => {
                let waiter = shared.waiters.lock().unwrap().pop_front();
                match waiter {
                    // A canceled caller has dropped its receiver; the
                    // send fails and the reply is discarded, which is
                    // exactly what keeps the FIFO pairing intact.
                    Some(waiter) => drop(waiter.send(Ok(reply))),
                    None => warn!(
                        reply = %reply.first_message(),
                        "reply arrived with no pending command"
                    ),
                }
            }
            Ok(None) => {
                debug!("control stream closed");
                break Fatal::Closed;
            }
            Err(fatal) => {
                debug!("control reader failed: {}", fatal.to_error());
                break fatal;
            }
        }
    };
    shared.terminate(fatal);
}

/// Read one full reply. `Ok(None)` means the stream ended cleanly at
/// a reply boundary; EOF anywhere else is a protocol error.
async fn read_reply(
    reader: &mut BoxedRead,
    shared: &Shared,
) -> std::result::Result<Option<Reply>, Fatal> {
    let mut lines = Vec::new();
    loop {
        let Some(line) = read_line(reader, shared).await? else {
            if lines.is_empty() {
                return Ok(None);
            }
            return Err(Fatal::Protocol(
                "stream closed in the middle of a reply".to_string(),
            ));
        };

        let mut reply_line = match ReplyLine::parse(&line) {
            Ok(parsed) => parsed,
            Err(e) => return Err(Fatal::Protocol(e.to_string())),
        };
        if reply_line.is_data() {
            reply_line.data = Some(read_data_block(reader, shared).await?);
        }

        let is_end = reply_line.is_end();
        lines.push(reply_line);
        if is_end {
            return Ok(Some(Reply { lines }));
        }
    }
}

/// Read one line without its terminator; `Ok(None)` at end of stream.
/// Accepts LF-only line endings on input.
async fn read_line(
    reader: &mut BoxedRead,
    shared: &Shared,
) -> std::result::Result<Option<String>, Fatal> {
    let mut buf = String::new();
    let n = match reader.read_line(&mut buf).await {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::InvalidData => {
            return Err(Fatal::Protocol("non-UTF-8 bytes on control stream".to_string()));
        }
        Err(e) => {
            debug!("control stream read failed: {}", e);
            return Err(Fatal::Closed);
        }
    };
    if n == 0 {
        return Ok(None);
    }
    let line = buf.trim_end_matches(['\r', '\n']);
    trace!("received line: {}", line);
    shared.tap_line(&format!("<< {}", line));
    Ok(Some(line.to_string()))
}

/// Consume a dot-terminated data block, removing the stuffing dots.
/// The decoded lines are joined with `\n`, without a trailing newline.
async fn read_data_block(
    reader: &mut BoxedRead,
    shared: &Shared,
) -> std::result::Result<String, Fatal> {
    let mut lines: Vec<String> = Vec::new();
    loop {
        let Some(line) = read_line(reader, shared).await? else {
            return Err(Fatal::Protocol(
                "stream closed inside a data block".to_string(),
            ));
        };
        if line == "." {
            return Ok(lines.join("\n"));
        }
        let line = line.strip_prefix('.').unwrap_or(&line);
        lines.push(line.to_string());
    }
}
