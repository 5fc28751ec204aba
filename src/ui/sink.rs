//! Shared output sinks
//!
//! A sink is the destination every task writer eventually writes through.
//! Several tasks may hold the same sink, so writes lock it for the duration of
//! one `write` call.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared, lockable destination for output
pub type Sink = Arc<Mutex<dyn Write + Send>>;

/// Sink writing to the process stdout
pub fn stdout_sink() -> Sink {
    Arc::new(Mutex::new(io::stdout()))
}

/// Sink writing to the process stderr
pub fn stderr_sink() -> Sink {
    Arc::new(Mutex::new(io::stderr()))
}

/// Write all of `buf` to a sink under one lock
pub fn write_sink(sink: &Sink, buf: &[u8]) -> io::Result<()> {
    let mut guard = sink.lock().unwrap_or_else(PoisonError::into_inner);
    guard.write_all(buf)?;
    guard.flush()
}

/// In-memory buffer that can be cloned and read back, mostly for capturing output
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a clone of this buffer as a sink
    pub fn sink(&self) -> Sink {
        Arc::new(Mutex::new(self.clone()))
    }

    /// Current contents, lossily decoded
    pub fn contents(&self) -> String {
        let guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&guard).into_owned()
    }

    /// Take the contents, leaving the buffer empty
    pub fn take(&self) -> Vec<u8> {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *guard)
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_buffer_clones_share_contents() {
        let buffer = SharedBuffer::new();
        let sink = buffer.sink();

        write_sink(&sink, b"hello ").unwrap();
        write_sink(&sink, b"world").unwrap();

        assert_eq!(buffer.contents(), "hello world");
        assert_eq!(buffer.take(), b"hello world".to_vec());
        assert!(buffer.is_empty());
    }
}
