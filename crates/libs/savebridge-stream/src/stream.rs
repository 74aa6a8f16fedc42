//! A bounded byte pipe whose two ends can be moved between contexts.

use crate::chunk::WriteChunk;
use savebridge_rpc::KeepAlive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub const DEFAULT_STREAM_CAPACITY: usize = 16;

const DROPPED_UNCLOSED: &str = "writable was dropped without being closed";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("stream is closed")]
    Closed,
    #[error("stream aborted: {0}")]
    Aborted(String),
    #[error("readable side is gone")]
    ReaderGone,
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),
}

#[derive(Debug)]
enum Frame {
    Data(Vec<u8>),
    Abort(String),
}

/// Creates a connected pair holding at most `capacity` unread chunks.
pub fn byte_stream(capacity: usize) -> (WritableStream, ReadableStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closed = Arc::new(AtomicBool::new(false));
    let writable = WritableStream {
        tx: Some(tx),
        written: 0,
        keepalive: None,
        closed: Arc::clone(&closed),
    };
    let readable = ReadableStream { rx, aborted: None, closed };
    (writable, readable)
}

#[derive(Debug)]
pub struct WritableStream {
    tx: Option<mpsc::Sender<Frame>>,
    written: u64,
    keepalive: Option<KeepAlive>,
    closed: Arc<AtomicBool>,
}

impl WritableStream {
    /// Writes one chunk, waiting while the reader is `capacity` chunks behind.
    pub async fn write(&mut self, chunk: impl Into<WriteChunk>) -> Result<(), StreamError> {
        let bytes = chunk.into().into_bytes()?;
        let tx = self.tx.as_ref().ok_or(StreamError::Closed)?;
        if bytes.is_empty() {
            return Ok(());
        }
        let len = bytes.len() as u64;
        tx.send(Frame::Data(bytes)).await.map_err(|_| StreamError::ReaderGone)?;
        self.written += len;
        Ok(())
    }

    /// Ends the stream; the reader sees end-of-stream after draining.
    /// Dropping this end without closing it aborts the stream instead.
    pub fn close(&mut self) -> Result<(), StreamError> {
        self.keepalive.take();
        let tx = self.tx.take().ok_or(StreamError::Closed)?;
        self.closed.store(true, Ordering::Release);
        drop(tx);
        Ok(())
    }

    /// Ends the stream with an error the reader observes in place of end-of-stream.
    pub async fn abort(&mut self, reason: impl Into<String>) -> Result<(), StreamError> {
        self.keepalive.take();
        let tx = self.tx.take().ok_or(StreamError::Closed)?;
        tx.send(Frame::Abort(reason.into())).await.map_err(|_| StreamError::ReaderGone)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, mpsc::Sender::is_closed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Keeps `guard` running until this end is closed, aborted or dropped.
    pub fn attach_keepalive(&mut self, guard: KeepAlive) {
        self.keepalive = Some(guard);
    }

    pub fn has_keepalive(&self) -> bool {
        self.keepalive.as_ref().is_some_and(|guard| !guard.is_finished())
    }
}

#[derive(Debug)]
pub struct ReadableStream {
    rx: mpsc::Receiver<Frame>,
    aborted: Option<String>,
    closed: Arc<AtomicBool>,
}

impl ReadableStream {
    /// Next chunk, `Ok(None)` at end of stream.
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        if let Some(reason) = &self.aborted {
            return Err(StreamError::Aborted(reason.clone()));
        }
        match self.rx.recv().await {
            Some(Frame::Data(bytes)) => Ok(Some(bytes)),
            Some(Frame::Abort(reason)) => {
                self.rx.close();
                self.aborted = Some(reason.clone());
                Err(StreamError::Aborted(reason))
            }
            None if self.closed.load(Ordering::Acquire) => Ok(None),
            None => {
                self.aborted = Some(DROPPED_UNCLOSED.to_string());
                Err(StreamError::Aborted(DROPPED_UNCLOSED.to_string()))
            }
        }
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, StreamError> {
        let mut body = Vec::new();
        while let Some(chunk) = self.read().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// Stops accepting writes; chunks already queued can still be read.
    pub fn cancel(&mut self) {
        self.rx.close();
    }
}
