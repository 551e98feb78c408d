use std::collections::VecDeque;
use std::io;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Outbound byte queue shared between callers and the I/O loop
///
/// Callers append without blocking; the loop drains from the front, one
/// socket write at a time. Bytes are never reordered.
#[derive(Default)]
pub(crate) struct Outbound {
    buffer: Mutex<VecDeque<u8>>,
    wake: Notify,
}

impl Outbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and wake the loop so it starts waiting for write readiness
    pub fn push(&self, bytes: &[u8]) {
        self.buffer.lock().unwrap().extend(bytes);
        self.wake.notify_one();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    /// Hand the queued bytes to `write` once and drop as many bytes from the
    /// front as it reports written.
    pub fn write_with<F>(&self, write: F) -> io::Result<usize>
    where
        F: FnOnce(&[u8]) -> io::Result<usize>,
    {
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.is_empty() {
            return Ok(0);
        }
        let sent = write(buffer.make_contiguous())?;
        let sent = sent.min(buffer.len());
        buffer.drain(..sent);
        Ok(sent)
    }

    /// Resolves on the next `push` or `wake`, or immediately if one happened
    /// since the last call.
    pub async fn notified(&self) {
        self.wake.notified().await
    }

    /// Wake the loop without queuing anything
    pub fn wake(&self) {
        self.wake.notify_one();
    }
}
