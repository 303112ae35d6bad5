use crate::message::{Message, PeerAddress};
use crate::wire::{read_message, write_message, WireError};
use anyhow::Context;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Point-to-point, best-effort delivery. `send` never blocks the caller and
/// never reports failure back; lost messages are only logged.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, message: Message, target: PeerAddress);
}

/// Opens a fresh TCP connection per message on a spawned task. Must be used
/// from within a tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn send(&self, message: Message, target: PeerAddress) {
        tokio::spawn(async move {
            if let Err(err) = deliver(&message, target).await {
                debug!(
                    from = %message.sender,
                    %target,
                    kind = message.payload.kind(),
                    error = %err,
                    "send failed"
                );
            }
        });
    }
}

async fn deliver(message: &Message, target: PeerAddress) -> Result<(), WireError> {
    let mut stream = TcpStream::connect(target.0).await?;
    write_message(&mut stream, message).await?;
    stream.shutdown().await?;
    Ok(())
}

pub async fn bind(address: PeerAddress) -> anyhow::Result<TcpListener> {
    TcpListener::bind(address.0)
        .await
        .with_context(|| format!("binding peer listener on {address}"))
}

/// Accept connections and forward one decoded message per connection into
/// `inbound`. A full queue drops the message instead of stalling the socket.
/// Returns once the receiving side of `inbound` is gone.
pub async fn serve(listener: TcpListener, inbound: mpsc::Sender<Message>) -> anyhow::Result<()> {
    if let Ok(local) = listener.local_addr() {
        info!(address = %local, "peer listener ready");
    }
    loop {
        let (mut stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        if inbound.is_closed() {
            return Ok(());
        }
        let inbound = inbound.clone();
        tokio::spawn(async move {
            match read_message(&mut stream).await {
                Ok(message) => match inbound.try_send(message) {
                    Ok(()) => {}
                    Err(TrySendError::Full(message)) => warn!(
                        from = %message.sender,
                        kind = message.payload.kind(),
                        "inbound queue full, dropping message"
                    ),
                    Err(TrySendError::Closed(_)) => {}
                },
                Err(err) => debug!(%remote, error = %err, "discarding unreadable message"),
            }
        });
    }
}

/// In-memory transport that records every send. Lets the protocol run
/// without sockets.
#[derive(Clone, Debug, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<(PeerAddress, Message)>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything sent so far.
    pub fn take(&self) -> Vec<(PeerAddress, Message)> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn sent(&self) -> Vec<(PeerAddress, Message)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, message: Message, target: PeerAddress) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((target, message));
    }
}
