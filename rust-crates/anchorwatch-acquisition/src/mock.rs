//! In-memory channel for tests and hardware-free runs

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::DeviceChannel;
use crate::error::Result;

/// Clonable fake anchor: clones share the same buffers
#[derive(Clone, Default)]
pub struct MockChannel {
    inner: Arc<Mutex<MockChannelInner>>,
}

#[derive(Default)]
struct MockChannelInner {
    input: VecDeque<u8>,
    pending_error: Option<std::io::ErrorKind>,
    reads: usize,
    clears: usize,
    closed: bool,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if the device had sent them
    pub fn inject(&self, data: &[u8]) {
        self.inner.lock().input.extend(data);
    }

    /// Make the next read fail with `kind`
    pub fn fail_next_read(&self, kind: std::io::ErrorKind) {
        self.inner.lock().pending_error = Some(kind);
    }

    pub fn pending_bytes(&self) -> usize {
        self.inner.lock().input.len()
    }

    pub fn read_count(&self) -> usize {
        self.inner.lock().reads
    }

    pub fn clear_count(&self) -> usize {
        self.inner.lock().clears
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl DeviceChannel for MockChannel {
    fn bytes_available(&mut self) -> Result<usize> {
        let inner = self.inner.lock();
        // A pending failure must reach read_chunk even with nothing queued
        if inner.pending_error.is_some() {
            return Ok(inner.input.len().max(1));
        }
        Ok(inner.input.len())
    }

    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        inner.reads += 1;

        if let Some(kind) = inner.pending_error.take() {
            return Err(std::io::Error::new(kind, "injected read failure").into());
        }

        let n = inner.input.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(inner.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.input.clear();
        inner.clears += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.inner.lock().closed = true;
        Ok(())
    }
}
