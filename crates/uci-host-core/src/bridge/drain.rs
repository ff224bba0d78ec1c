//! Non-blocking drain of the Output Channel.

use std::borrow::Cow;
use std::ffi::CStr;
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

/// Size of the staging buffer used by a single drain call.
pub const CAPTURE_BUFFER_SIZE: usize = 4096;

/// One chunk of captured engine output.
///
/// A chunk holds exactly the bytes one read returned, so it may end in the
/// middle of a line (or of a UTF-8 sequence). The bytes are always followed
/// by a NUL terminator for C-style consumers.
#[derive(Clone, PartialEq, Eq)]
pub struct OutputChunk {
    /// Payload followed by a single trailing `0`.
    bytes: Vec<u8>,
}

impl OutputChunk {
    pub(crate) fn from_slice(data: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(data.len() + 1);
        bytes.extend_from_slice(data);
        bytes.push(0);
        Self { bytes }
    }

    /// Raw payload, without the terminator.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - 1]
    }

    /// NUL-terminated view. Stops early if the engine emitted a NUL byte.
    pub fn as_c_str(&self) -> &CStr {
        CStr::from_bytes_until_nul(&self.bytes).unwrap_or(c"")
    }

    /// Payload decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.bytes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the payload, dropping the terminator.
    pub fn into_bytes(mut self) -> Vec<u8> {
        self.bytes.pop();
        self.bytes
    }
}

impl fmt::Debug for OutputChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OutputChunk").field(&self.text()).finish()
    }
}

/// Read side of the Output Channel plus the staging buffer.
///
/// Every drain holds the buffer lock for the whole read, so concurrent
/// callers never interleave reads on the descriptor.
pub(crate) struct OutputDrain {
    reader: File,
    buffer: Mutex<Box<[u8; CAPTURE_BUFFER_SIZE]>>,
}

impl OutputDrain {
    /// `reader` must already be in non-blocking mode.
    pub(crate) fn new(reader: File) -> Self {
        Self {
            reader,
            buffer: Mutex::new(Box::new([0u8; CAPTURE_BUFFER_SIZE])),
        }
    }

    /// Attempt one read. `None` means nothing is available right now (or the
    /// write side has closed).
    pub(crate) fn drain(&self) -> Option<OutputChunk> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match (&self.reader).read(&mut buffer[..]) {
                Ok(0) => return None,
                Ok(n) => {
                    debug!(bytes = n, "drained engine output");
                    return Some(OutputChunk::from_slice(&buffer[..n]));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
                Err(e) => {
                    warn!(error = %e, "output channel read failed");
                    return None;
                }
            }
        }
    }

    /// Drain until nothing is immediately available, appending to `out`.
    pub(crate) fn drain_into(&self, out: &mut Vec<u8>) {
        while let Some(chunk) = self.drain() {
            out.extend_from_slice(chunk.as_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::sys;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::sync::Arc;

    fn drain_pair() -> (OutputDrain, File) {
        let (read, write) = sys::pipe().unwrap();
        sys::set_nonblocking(read.as_raw_fd()).unwrap();
        (OutputDrain::new(File::from(read)), File::from(write))
    }

    #[test]
    fn empty_channel_returns_none_without_blocking() {
        let (drain, _writer) = drain_pair();
        let start = std::time::Instant::now();
        assert!(drain.drain().is_none());
        assert!(start.elapsed() < std::time::Duration::from_millis(100));
    }

    #[test]
    fn chunk_is_nul_terminated() {
        let (drain, mut writer) = drain_pair();
        writer.write_all(b"readyok\n").unwrap();

        let chunk = drain.drain().unwrap();
        assert_eq!(chunk.as_bytes(), b"readyok\n");
        assert_eq!(chunk.as_c_str().to_bytes(), b"readyok\n");
        assert_eq!(chunk.len(), 8);
        assert!(drain.drain().is_none());
    }

    #[test]
    fn large_writes_are_split_into_buffer_sized_chunks() {
        let (drain, mut writer) = drain_pair();
        let payload: Vec<u8> = (0..CAPTURE_BUFFER_SIZE * 2 + 100)
            .map(|i| b'a' + (i % 26) as u8)
            .collect();
        writer.write_all(&payload).unwrap();

        let mut sizes = Vec::new();
        let mut collected = Vec::new();
        while let Some(chunk) = drain.drain() {
            sizes.push(chunk.len());
            collected.extend_from_slice(chunk.as_bytes());
        }
        assert!(sizes.iter().all(|&n| n <= CAPTURE_BUFFER_SIZE));
        assert_eq!(collected, payload);
    }

    #[test]
    fn closed_writer_reads_as_no_data() {
        let (drain, writer) = drain_pair();
        drop(writer);
        assert!(drain.drain().is_none());
    }

    #[test]
    fn concurrent_drains_never_duplicate_bytes() {
        let (drain, mut writer) = drain_pair();
        let drain = Arc::new(drain);
        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        writer.write_all(&payload).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let drain = Arc::clone(&drain);
                std::thread::spawn(move || {
                    let mut total = 0usize;
                    while let Some(chunk) = drain.drain() {
                        total += chunk.len();
                    }
                    total
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, payload.len());
    }

    #[test]
    fn chunk_with_interior_nul_truncates_c_view_only() {
        let chunk = OutputChunk::from_slice(b"ab\0cd");
        assert_eq!(chunk.as_bytes(), b"ab\0cd");
        assert_eq!(chunk.as_c_str().to_bytes(), b"ab");
        assert_eq!(chunk.into_bytes(), b"ab\0cd".to_vec());
    }
}
