//! Per-connection read and write tasks.
//!
//! Each established TCP stream gets a `Connection` that owns one read task
//! and one write task:
//! - Read task: decodes frames from the socket → `SessionEvent::MessageReceived`
//! - Write task: receives encoded frames from a queue → writes them to the socket
//!
//! Only the write task touches the write half, and every queued item is a
//! complete frame, so concurrent senders can never interleave partial frames.
//!
//! There is no cancellation token. [`Connection::close`] aborts the read
//! task, which is what unblocks a read parked on the peer, and drops the
//! frame queue so the write task flushes whatever was already queued, shuts
//! down its half and exits.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::events::SessionEvent;
use super::framing::{encode_message, FrameDecoder, TextEncoding};
use crate::constants::READ_BUFFER_SIZE;
use crate::error::ChatError;

/// An open connection to the peer.
pub struct Connection {
    /// Remote address of the peer.
    peer_addr: SocketAddr,
    /// Encoding applied to outgoing text.
    encoding: TextEncoding,
    /// Queue of encoded frames for the write task. `None` once closed.
    frame_tx: Option<UnboundedSender<Vec<u8>>>,
    /// Set by whichever side ends the connection first.
    closed: Arc<AtomicBool>,
    /// Session event channel.
    event_tx: UnboundedSender<SessionEvent>,
    /// Handle to the read task (for cleanup).
    read_handle: JoinHandle<()>,
    /// Handle to the write task (for cleanup).
    write_handle: JoinHandle<()>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("encoding", &self.encoding)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Take ownership of an established stream and spawn its read and write tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        encoding: TextEncoding,
        event_tx: UnboundedSender<SessionEvent>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let closed = Arc::new(AtomicBool::new(false));

        let read_handle = tokio::spawn(Self::read_loop(
            read_half,
            Arc::clone(&closed),
            event_tx.clone(),
        ));
        let write_handle = tokio::spawn(Self::write_loop(write_half, frame_rx, event_tx.clone()));

        Self {
            peer_addr,
            encoding,
            frame_tx: Some(frame_tx),
            closed,
            event_tx,
            read_handle,
            write_handle,
        }
    }

    /// Queue `text` for the peer.
    ///
    /// Empty text is a no-op. The call returns once the frame is queued; the
    /// write itself happens on the write task and its failure is reported as
    /// a [`SessionEvent::Error`].
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::FrameTooLarge`] (nothing queued) or
    /// [`ChatError::Write`] if the connection was closed or the write task
    /// has already stopped.
    pub fn send(&self, text: &str) -> Result<(), ChatError> {
        if text.is_empty() {
            return Ok(());
        }
        let frame = encode_message(text, self.encoding)?;
        match &self.frame_tx {
            Some(frame_tx) if frame_tx.send(frame).is_ok() => Ok(()),
            _ => Err(ChatError::writer_closed()),
        }
    }

    /// Remote address of the peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether the connection has ended, locally or by the peer.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the connection, unblocking the read task.
    ///
    /// Frames already accepted by [`Connection::send`] are still written
    /// before the write half shuts down. Idempotent. Emits
    /// [`SessionEvent::Disconnected`] unless the peer had already ended the
    /// connection.
    pub fn close(&mut self) {
        self.read_handle.abort();
        // Ends the write loop once the queue is drained.
        self.frame_tx = None;
        if !self.closed.swap(true, Ordering::SeqCst) {
            log::info!("[Connection] Closed connection to {}", self.peer_addr);
            let _ = self.event_tx.send(SessionEvent::Disconnected);
        }
    }

    /// Wait for the write task to finish flushing after [`Connection::close`].
    ///
    /// Never completes on a connection that has not been closed. Call at
    /// most once.
    pub async fn flushed(&mut self) {
        if let Err(e) = (&mut self.write_handle).await {
            if !e.is_cancelled() {
                log::warn!("[Connection] Write task failed: {e}");
            }
        }
    }

    /// Read loop: decodes frames from the socket and emits events.
    async fn read_loop(
        mut reader: OwnedReadHalf,
        closed: Arc<AtomicBool>,
        event_tx: UnboundedSender<SessionEvent>,
    ) {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let failure = 'read: loop {
            match reader.read(&mut buf).await {
                Ok(0) if decoder.has_partial() => {
                    break Some(ChatError::Read(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed in the middle of a message",
                    )));
                }
                Ok(0) => break None,
                Ok(n) => {
                    decoder.push(&buf[..n]);
                    while let Some(message) = decoder.next_message() {
                        let text = match message {
                            Ok(text) => text,
                            Err(e) => break 'read Some(e),
                        };
                        log::debug!("[Connection] Received {} bytes of text", text.len());
                        if event_tx.send(SessionEvent::MessageReceived(text)).is_err() {
                            log::warn!("[Connection] Event channel closed, stopping read loop");
                            return;
                        }
                    }
                }
                Err(e) => break Some(ChatError::Read(e)),
            }
        };

        // A local close already reported the disconnect.
        if closed.swap(true, Ordering::SeqCst) {
            return;
        }

        match failure {
            None => {
                log::info!("[Connection] Peer closed the connection");
                let _ = event_tx.send(SessionEvent::StatusChanged(
                    "the peer closed the connection".to_string(),
                ));
            }
            Some(err) => {
                log::error!("[Connection] {err}");
                let _ = event_tx.send(SessionEvent::from(&err));
            }
        }
        let _ = event_tx.send(SessionEvent::Disconnected);
    }

    /// Write loop: receives encoded frames and writes them to the socket.
    async fn write_loop(
        mut writer: OwnedWriteHalf,
        mut frame_rx: UnboundedReceiver<Vec<u8>>,
        event_tx: UnboundedSender<SessionEvent>,
    ) {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                let err = ChatError::Write(e);
                log::error!("[Connection] {err}");
                let _ = event_tx.send(SessionEvent::from(&err));
                return;
            }
        }

        // Queue dropped by close: tell the peer we are done.
        if let Err(e) = writer.shutdown().await {
            log::debug!("[Connection] Shutdown after close failed: {e}");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.read_handle.abort();
        // A closed connection is left to flush its queue.
        if self.frame_tx.is_some() {
            self.write_handle.abort();
        }
    }
}
