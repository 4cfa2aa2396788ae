//! In-memory transport.
//!
//! [`channel`] returns the two halves a connection needs plus a
//! [`MemoryPeer`] that plays the client: it feeds frames to the read half,
//! observes what the gateway wrote, and can make writes fail on demand.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use surge_protocol::{Frame, FrameType};
use tokio::sync::mpsc;

use crate::traits::{FrameSink, FrameSource, TransportError};

type Inbound = Result<Frame, TransportError>;

/// Shared flags between the sink and the peer.
#[derive(Debug, Default)]
struct Flags {
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
    closed: AtomicBool,
}

/// Create a connected in-memory transport.
#[must_use]
pub fn channel() -> (MemorySource, MemorySink, MemoryPeer) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let flags = Arc::new(Flags::default());

    (
        MemorySource { inbound: inbound_rx },
        MemorySink {
            outbound: outbound_tx,
            flags: Arc::clone(&flags),
        },
        MemoryPeer {
            inbound: Some(inbound_tx),
            outbound: outbound_rx,
            flags,
        },
    )
}

/// Read half fed by a [`MemoryPeer`].
pub struct MemorySource {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Write half observed by a [`MemoryPeer`].
pub struct MemorySink {
    outbound: mpsc::UnboundedSender<Frame>,
    flags: Arc<Flags>,
}

/// The client end of an in-memory transport.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    flags: Arc<Flags>,
}

impl MemoryPeer {
    /// Deliver a frame to the gateway. Returns `false` if the read half is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(Ok(frame)).is_ok())
    }

    /// Deliver a Text frame.
    pub fn send_text(&self, payload: impl Into<Bytes>) -> bool {
        self.send(Frame::text(payload))
    }

    /// Make the gateway's next read fail with the given error.
    pub fn send_error(&self, error: TransportError) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// End the inbound stream cleanly, as if the client hung up.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Make every subsequent gateway write fail.
    pub fn fail_writes(&self) {
        self.flags.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Make every subsequent gateway write block forever, like a peer that
    /// stopped reading.
    pub fn stall_writes(&self) {
        self.flags.stall_writes.store(true, Ordering::SeqCst);
    }

    /// Whether the gateway closed its write half.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.flags.closed.load(Ordering::SeqCst)
    }

    /// Wait for the next frame the gateway wrote.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.outbound.recv().await
    }

    /// Take the next written frame if one is ready.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.outbound.try_recv().ok()
    }

    /// Drain every written frame of the given type.
    pub fn drain(&mut self, kind: FrameType) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            if frame.frame_type() == kind {
                frames.push(frame);
            }
        }
        frames
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Frame>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.flags.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if self.flags.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("broken pipe".into()));
        }
        if self.flags.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.flags.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
