//! Frame-based hub session over an arbitrary byte stream
//!
//! Request/response protocol: one frame carrying the program text out, one
//! frame carrying the captured output back. Works over any stream transport
//! (TCP simulator, Bluetooth RFCOMM).

use crate::transport::framing::{self, FrameDecoder};
use crate::transport::traits::{HubSession, TransportError};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Hub session speaking length-prefixed text frames over a byte stream
pub struct StreamSession<S> {
    stream: S,
    decoder: FrameDecoder,
    peer: String,
}

impl<S> StreamSession<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Wrap a connected stream; `peer` is used for diagnostics only
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
            peer: peer.into(),
        }
    }
}

#[async_trait]
impl<S> HubSession for StreamSession<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn run(&mut self, program: &str) -> Result<String, TransportError> {
        let frame = framing::encode(program)?;

        // A failed write means the link is gone, not just this command
        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;

        debug!(peer = %self.peer, bytes = frame.len(), "program uploaded");

        let mut read_buf = vec![0u8; 4096];
        loop {
            if let Some(output) = self.decoder.decode_next()? {
                return Ok(output);
            }

            let n = self
                .stream
                .read(&mut read_buf)
                .await
                .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
            if n == 0 {
                return Err(TransportError::ConnectionLost("hub closed the link".into()));
            }
            self.decoder.extend(&read_buf[..n]);
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        debug!(peer = %self.peer, "link shut down");
        Ok(())
    }
}
