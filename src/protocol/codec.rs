//! Length-prefixed framing for [`Command`]s.
//!
//! Each frame is a big-endian `u32` length followed by the MessagePack
//! encoding of the command. A frame whose payload cannot be decoded is
//! reported as [`Frame::Malformed`]; the length prefix keeps the stream in
//! sync so the connection can keep going.

use super::Command;
use crate::core::TransportError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One decoded frame.
#[derive(Debug)]
pub enum Frame {
    Command(Command),
    Malformed(String),
}

#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a command payload (without the length prefix)
    pub fn encode(&self, command: &Command) -> Result<Vec<u8>, TransportError> {
        let payload =
            rmp_serde::to_vec(command).map_err(|e| TransportError::Codec(e.to_string()))?;
        if payload.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }
        Ok(payload)
    }

    /// Decode a command payload (without the length prefix)
    pub fn decode(&self, payload: &[u8]) -> Result<Command, TransportError> {
        rmp_serde::from_slice(payload).map_err(|e| TransportError::Codec(e.to_string()))
    }

    /// Write one frame and flush
    pub async fn write_frame<W>(&self, writer: &mut W, command: &Command) -> Result<(), TransportError>
    where
        W: AsyncWrite + Unpin,
    {
        let payload = self.encode(command)?;
        writer.write_u32(payload.len() as u32).await?;
        writer.write_all(&payload).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one frame
    ///
    /// Returns `Ok(None)` when the peer closed the stream.
    pub async fn read_frame<R>(&self, reader: &mut R) -> Result<Option<Frame>, TransportError>
    where
        R: AsyncRead + Unpin,
    {
        let len = match reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if len > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await?;

        match self.decode(&payload) {
            Ok(command) => Ok(Some(Frame::Command(command))),
            Err(e) => Ok(Some(Frame::Malformed(e.to_string()))),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}
