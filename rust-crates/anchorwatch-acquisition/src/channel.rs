//! Device endpoint abstraction

use crate::error::Result;

/// Communication endpoint of one anchor
///
/// Implementations are polled from the blocking pool, one call sequence per
/// cycle, so they only need to be `Send`.
pub trait DeviceChannel: Send {
    /// Number of bytes waiting in the input buffer (never blocks)
    fn bytes_available(&mut self) -> Result<usize>;

    /// Read at most `buffer.len()` bytes, blocking no longer than the channel timeout
    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Discard everything still waiting in the input buffer
    fn clear_input(&mut self) -> Result<()>;

    /// Release the endpoint
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
