use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use super::{Inbound, Transport, WireRequest, encode};
use crate::error::TransportError;

/// Line-delimited JSON over a single TCP connection to a worker pool.
///
/// The write half is owned by one writer task; `send` only enqueues, so
/// concurrent senders never interleave bytes on the socket.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    outbound: mpsc::Sender<String>,
}

impl TcpTransport {
    pub async fn connect(addr: &str, capacity: usize) -> Result<(Self, Inbound), TransportError> {
        let stream = TcpStream::connect(addr).await?;
        info!(%addr, "connected to worker pool");
        Ok(Self::from_stream(stream, capacity))
    }

    /// Wrap an established stream. Must be called inside a tokio runtime.
    pub fn from_stream(stream: TcpStream, capacity: usize) -> (Self, Inbound) {
        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);

        tokio::spawn(write_loop(write_half, out_rx));
        tokio::spawn(read_loop(read_half, in_tx));

        (Self { outbound: out_tx }, Inbound::new(in_rx))
    }
}

impl Transport for TcpTransport {
    fn send(&self, request: &WireRequest) -> Result<(), TransportError> {
        let frame = encode(request)?;
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Full,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<String>) {
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(error = %e, "worker connection write failed");
            break;
        }
    }
    // Dropping `rx` here makes every later send fail with `Closed`.
    debug!("tcp writer stopped");
}

// Lines are forwarded as raw bytes: a frame that is not valid UTF-8 must reach
// the listener as a malformed frame instead of ending the stream.
async fn read_loop(reader: OwnedReadHalf, tx: mpsc::Sender<Vec<u8>>) {
    let mut reader = BufReader::new(reader);
    loop {
        let mut frame = Vec::new();
        match reader.read_until(b'\n', &mut frame).await {
            Ok(0) => {
                info!("worker pool closed the connection");
                break;
            }
            Ok(_) => {
                if frame.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "worker connection read failed");
                break;
            }
        }
    }
}
