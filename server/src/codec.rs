//! NUL-terminated framing for the engine's command server.
//!
//! A request is a JSON array of strings (command words then arguments)
//! followed by a single `\0` byte on the engine's stdin. The engine answers
//! with the command's stdout followed by `\0`. This module provides
//! [`FrameReader`] and [`FrameWriter`] for async reading and writing of
//! those frames.

use thiserror::Error;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

/// Byte that terminates every frame in both directions.
pub const FRAME_TERMINATOR: u8 = 0;

/// Maximum frame size (64 MiB) to prevent unbounded memory allocation.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The stream ended after part of a frame had been read.
    #[error("stream ended after {read} bytes of an unterminated frame")]
    Truncated { read: usize },
    /// The frame grew past [`MAX_FRAME_BYTES`] without a terminator.
    #[error("frame exceeds maximum of {limit} bytes")]
    Oversized { limit: usize },
}

/// Reads NUL-terminated frames from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    limit: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_limit(reader, MAX_FRAME_BYTES)
    }

    pub fn with_limit(reader: R, limit: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            limit,
        }
    }

    /// Read the next frame, without its terminator.
    ///
    /// Returns `Ok(None)` on EOF at a frame boundary (clean shutdown).
    /// Returns `Err` on EOF mid-frame or an oversized frame.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut buf = Vec::new();
        let max_read = (self.limit as u64).saturating_add(1);
        let bytes_read = (&mut self.reader)
            .take(max_read)
            .read_until(FRAME_TERMINATOR, &mut buf)
            .await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if buf.last() == Some(&FRAME_TERMINATOR) {
            buf.pop();
            return Ok(Some(buf));
        }

        if buf.len() > self.limit {
            return Err(FrameError::Oversized { limit: self.limit });
        }
        Err(FrameError::Truncated { read: buf.len() })
    }
}

/// Writes NUL-terminated frames to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write a command request: the words as a JSON array, then the terminator.
    pub async fn write_request(&mut self, words: &[String]) -> Result<(), FrameError> {
        let body = serde_json::to_vec(words).map_err(std::io::Error::from)?;
        self.write_frame(&body).await
    }

    /// Write raw frame bytes followed by the terminator.
    pub async fn write_frame(&mut self, body: &[u8]) -> Result<(), FrameError> {
        self.writer.write_all(body).await?;
        self.writer.write_all(&[FRAME_TERMINATOR]).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Close the underlying stream so the peer observes EOF.
    pub async fn close(&mut self) -> Result<(), FrameError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
