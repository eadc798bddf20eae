//! The link engine: one serial line, one command in flight.
//!
//! [`Link::send`] holds the send lock from the moment a frame is written
//! until its confirmation arrives (or the wait ends some other way), so a
//! confirming frame always belongs to the most recent command. The read loop
//! runs as its own task, consumes confirmations, and turns every other valid
//! frame into an [`Event`] on the outbound queue.
//!
//! The event queue is unbounded. The consumer must drain it; nothing pushes
//! back on the read loop.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::{Config, LinkConfig};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::frame::{self, FRAME_LEN, Frame};
use crate::jitter::JitterFilter;
use crate::port::open_port;
use crate::stats::{LinkStats, StatsSnapshot};

pub type Events = mpsc::UnboundedReceiver<Event>;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// How a successful [`Link::send`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written; the frame asked for no confirmation.
    Sent,
    /// A frame with the same channel and mode came back.
    Acknowledged,
    /// The wait was cancelled (shutdown or caller token) before anything
    /// came back. The device may or may not have acted on the command.
    Cancelled,
}

struct PendingAck {
    ch: u8,
    mode: u8,
    done: oneshot::Sender<()>,
}

/// State the read loop and senders both touch.
#[derive(Default)]
struct Shared {
    // written only while the send lock is held
    pending: Mutex<Option<PendingAck>>,
    stats: LinkStats,
}

impl Shared {
    fn expect(&self, ch: u8, mode: u8, done: oneshot::Sender<()>) {
        let mut slot = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        *slot = Some(PendingAck { ch, mode, done });
    }

    fn clear(&self) {
        let mut slot = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        *slot = None;
    }

    /// Consumes `frame` as a confirmation if a sender is waiting for it.
    fn resolve(&self, frame: &Frame) -> bool {
        let mut slot = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        let matched = matches!(&*slot, Some(p) if p.ch == frame.ch && p.mode == frame.mode);
        if !matched {
            return false;
        }
        self.stats.inc_acked();
        if let Some(p) = slot.take() {
            let _ = p.done.send(());
        }
        debug!(ch = frame.ch, mode = frame.mode, "approved");
        true
    }
}

// Clears the expectation however the send future ends, dropped included.
struct AckGuard<'a>(&'a Shared);

impl Drop for AckGuard<'_> {
    fn drop(&mut self) {
        self.0.clear();
    }
}

pub struct Link {
    writer: tokio::sync::Mutex<Writer>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    settle: Duration,
    reader: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Link {
    /// Opens the configured serial port and starts the engine on it.
    pub fn open(cfg: &Config) -> Result<(Self, Events)> {
        let port = open_port(&cfg.serial)?;
        Ok(Self::new(port, &cfg.link))
    }

    /// Starts the engine on any duplex byte stream. Spawns the read loop,
    /// so this must run inside a tokio runtime.
    pub fn new<T>(transport: T, cfg: &LinkConfig) -> (Self, Events)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (rd, wr) = tokio::io::split(transport);
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let cancel = CancellationToken::new();

        let reader = ReadLoop {
            buf: Vec::with_capacity(4 * FRAME_LEN),
            shared: shared.clone(),
            events: tx,
            jitter: JitterFilter::new(cfg.motion_jitter()),
        };
        let task = tokio::spawn(reader.run(rd, cancel.clone()));

        let link = Self {
            writer: tokio::sync::Mutex::new(Box::new(wr)),
            shared,
            cancel,
            settle: cfg.settle_delay(),
            reader: Mutex::new(Some(task)),
        };
        (link, rx)
    }

    pub async fn send(&self, frame: &Frame) -> Result<SendOutcome> {
        self.send_with_cancel(frame, &CancellationToken::new()).await
    }

    /// Like [`Link::send`], but the wait for confirmation also ends when
    /// `cancel` fires.
    pub async fn send_with_cancel(
        &self,
        frame: &Frame,
        cancel: &CancellationToken,
    ) -> Result<SendOutcome> {
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }
        let mut writer = self.writer.lock().await;
        if self.cancel.is_cancelled() {
            return Err(Error::Closed);
        }
        let bytes = frame.encode();

        let Some(timeout) = frame.ack_timeout else {
            self.write(&mut writer, &bytes).await?;
            return Ok(SendOutcome::Sent);
        };

        // Registered before writing so a fast confirmation cannot slip past.
        let (done_tx, done_rx) = oneshot::channel();
        self.shared.expect(frame.ch, frame.mode, done_tx);
        let _guard = AckGuard(&self.shared);
        self.write(&mut writer, &bytes).await?;

        tokio::select! {
            res = done_rx => match res {
                Ok(()) => {
                    // the device may follow up right after confirming
                    tokio::time::sleep(self.settle).await;
                    Ok(SendOutcome::Acknowledged)
                }
                Err(_) => Ok(SendOutcome::Cancelled),
            },
            _ = tokio::time::sleep(timeout) => {
                warn!(%frame, timeout_ms = timeout.as_millis() as u64, "command not acknowledged");
                self.shared.stats.inc_timeouts();
                Err(Error::AckTimeout(Box::new(*frame)))
            }
            _ = self.cancel.cancelled() => {
                debug!(%frame, "wait cancelled by shutdown");
                Ok(SendOutcome::Cancelled)
            }
            _ = cancel.cancelled() => {
                debug!(%frame, "wait cancelled by caller");
                Ok(SendOutcome::Cancelled)
            }
        }
    }

    async fn write(&self, writer: &mut Writer, bytes: &[u8; FRAME_LEN]) -> Result<()> {
        debug!(bytes = ?bytes, "> frame");
        let res = match writer.write_all(bytes).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = res {
            error!(error = %e, "serial write failed");
            self.cancel.cancel();
            return Err(Error::Transport(format!("write: {e}")));
        }
        self.shared.stats.inc_out();
        Ok(())
    }

    pub fn stats(&self) -> &LinkStats {
        &self.shared.stats
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the engine stops, by shutdown or transport failure.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    /// Stops the read loop and cancels any pending wait. Returns the read
    /// loop's error if the transport had already failed.
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        let task = self
            .reader
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        match task {
            Some(task) => task
                .await
                .map_err(|e| Error::Transport(format!("read loop: {e}")))?,
            None => Ok(()),
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ReadLoop {
    buf: Vec<u8>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<Event>,
    jitter: JitterFilter,
}

impl ReadLoop {
    async fn run<R>(mut self, mut rd: R, cancel: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; 256];
        loop {
            let res = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("read loop stopped");
                    return Ok(());
                }
                res = rd.read(&mut chunk) => res,
            };
            match res {
                Ok(0) => {
                    error!("serial transport closed");
                    cancel.cancel();
                    return Err(Error::Transport("transport closed".into()));
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    error!(error = %e, "serial read failed");
                    cancel.cancel();
                    return Err(Error::Transport(format!("read: {e}")));
                }
            }
            self.drain().await;
        }
    }

    async fn drain(&mut self) {
        while self.buf.len() >= FRAME_LEN {
            if !frame::is_start(self.buf[0]) {
                let skip = self
                    .buf
                    .iter()
                    .position(|b| frame::is_start(*b))
                    .unwrap_or(self.buf.len());
                warn!(skipped = skip, "discarding bytes before start marker");
                self.shared.stats.inc_malformed();
                self.buf.drain(..skip);
                continue;
            }

            let mut raw = [0u8; FRAME_LEN];
            raw.copy_from_slice(&self.buf[..FRAME_LEN]);
            self.shared.stats.inc_in();
            debug!(bytes = ?raw, "< frame");

            if let Err(e) = frame::validate(&raw) {
                // a good frame may start inside this window; step past the marker only
                warn!(error = %e, bytes = ?raw, "dropping malformed frame");
                self.shared.stats.inc_malformed();
                self.buf.drain(..1);
                continue;
            }
            self.buf.drain(..FRAME_LEN);
            let frame = Frame::decode(&raw);

            if self.shared.resolve(&frame) {
                // let the sender run before anything queued behind the ack
                tokio::task::yield_now().await;
                continue;
            }
            self.dispatch(frame);
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        let event = Event::classify(frame, Instant::now());
        if let Some(name) = event.name() {
            debug!(name, ch = event.channel, "dispatching");
        }
        if event.is_motion() && !self.jitter.admit(event.channel, event.received_at) {
            debug!(ch = event.channel, "anti-jitter");
            self.shared.stats.inc_suppressed();
            return;
        }
        self.shared.stats.inc_events();
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}
