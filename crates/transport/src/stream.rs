//! Newline-delimited JSON over a byte stream.
//!
//! Each message is one line. Serialised envelopes never contain a raw newline,
//! so no escaping is needed; payloads that do contain one are refused rather
//! than split across frames.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use requestify::{InboundSlot, MessageHandler, RequestCapability, Transport, TransportError};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{watch, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Line-framed transport over any `AsyncRead + AsyncWrite` stream.
///
/// A background task reads lines and delivers them to the installed handler.
/// When the peer closes the stream, or reading fails, the transport is marked
/// closed and later sends fail with [`TransportError::Closed`].
pub struct StreamTransport {
    writer: Mutex<BoxedWriter>,
    inbound: Arc<InboundSlot>,
    capability: RequestCapability,
    closed: Arc<watch::Sender<bool>>,
    reader: AbortHandle,
}

impl StreamTransport {
    /// Wraps `stream` and starts the reader task.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let inbound = Arc::new(InboundSlot::new());
        let closed = Arc::new(watch::Sender::new(false));

        let reader = tokio::spawn(read_lines(read_half, Arc::clone(&inbound), Arc::clone(&closed)))
            .abort_handle();

        Self {
            writer: Mutex::new(Box::new(write_half)),
            inbound,
            capability: RequestCapability::new(),
            closed,
            reader,
        }
    }

    /// Opens a TCP connection and wraps it.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    /// Returns `true` once the stream has ended or [`StreamTransport::shutdown`]
    /// has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Waits until the transport is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Flushes and shuts down the write side, then stops reading.
    pub async fn shutdown(&self) -> Result<(), TransportError> {
        self.closed.send_replace(true);
        self.reader.abort();
        let mut writer = self.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_lines<R>(read_half: R, inbound: Arc<InboundSlot>, closed: Arc<watch::Sender<bool>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    loop {
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                debug!("Peer closed the stream");
                break;
            }
            Ok(_) => {
                let raw = std::mem::take(&mut buf);
                let line = match String::from_utf8(raw) {
                    Ok(line) => line,
                    Err(err) => {
                        warn!(bytes = err.as_bytes().len(), "Dropping inbound line that is not valid UTF-8");
                        continue;
                    }
                };
                let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
                if line.trim().is_empty() {
                    continue;
                }
                trace!(bytes = line.len(), "stream transport received line");
                inbound.deliver(line.to_string());
            }
            Err(err) => {
                warn!(error = %err, "Stream read failed");
                break;
            }
        }
    }
    closed.send_replace(true);
}

#[async_trait]
impl Transport for StreamTransport {
    async fn send(&self, payload: String) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if payload.contains('\n') {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "payload contains a newline",
            )));
        }

        let mut writer = self.writer.lock().await;
        writer.write_all(payload.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    fn set_on_message(&self, handler: MessageHandler) {
        self.inbound.install(handler);
    }

    fn claim_request_capability(&self) -> bool {
        self.capability.claim()
    }
}
