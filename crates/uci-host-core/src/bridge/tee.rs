//! Stream-capture adapter: everything written to the engine's standard
//! output is forwarded to the original stream and mirrored into the Output
//! Channel, in order.
//!
//! The adapter is a dedicated thread reading a capture pipe spliced onto the
//! stdout slot. It forwards whole read chunks rather than single bytes; the
//! pipe preserves ordering either way.

use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::drain::CAPTURE_BUFFER_SIZE;

const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Totals reported by the adapter thread when it exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TeeStats {
    pub(crate) bytes: u64,
    pub(crate) passthrough_failed: bool,
    pub(crate) mirror_failed: bool,
}

/// Handle to the running adapter thread.
pub(crate) struct CaptureTee {
    handle: JoinHandle<TeeStats>,
    done: Receiver<()>,
}

impl CaptureTee {
    /// Start forwarding `capture` into `passthrough` and `mirror`.
    ///
    /// The thread exits when every write end of the capture pipe is closed.
    pub(crate) fn spawn(capture: File, passthrough: File, mirror: File) -> std::io::Result<Self> {
        let (done_tx, done) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("engine-stdout-tee".to_string())
            .spawn(move || {
                let stats = pump(capture, passthrough, mirror);
                let _ = done_tx.send(());
                stats
            })?;
        Ok(Self { handle, done })
    }

    /// Wait up to `timeout` for the thread to finish, calling `while_waiting`
    /// between polls so the caller can make room in the Output Channel.
    ///
    /// Returns `None` if the thread is still running at the deadline; it is
    /// then left detached.
    pub(crate) fn finish(self, timeout: Duration, mut while_waiting: impl FnMut()) -> Option<TeeStats> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.done.recv_timeout(WAIT_SLICE) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    while_waiting();
                    if Instant::now() >= deadline {
                        warn!(
                            timeout_ms = timeout.as_millis() as u64,
                            "stdout capture still open at teardown; detaching"
                        );
                        return None;
                    }
                }
            }
        }
        match self.handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                warn!("stdout capture thread panicked");
                None
            }
        }
    }
}

fn pump(mut capture: File, mut passthrough: File, mut mirror: File) -> TeeStats {
    let mut stats = TeeStats::default();
    let mut buf = [0u8; CAPTURE_BUFFER_SIZE];

    loop {
        let n = match capture.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "stdout capture read failed");
                break;
            }
        };
        let chunk = &buf[..n];

        // Pass-through first: it is the visible surface when nobody drains.
        if !stats.passthrough_failed {
            if let Err(e) = passthrough.write_all(chunk) {
                warn!(error = %e, "pass-through write failed; continuing capture only");
                stats.passthrough_failed = true;
            }
        }
        if !stats.mirror_failed {
            if let Err(e) = mirror.write_all(chunk) {
                warn!(error = %e, "output channel write failed; continuing pass-through only");
                stats.mirror_failed = true;
            }
        }
        stats.bytes += n as u64;
    }

    let _ = passthrough.flush();
    debug!(bytes = stats.bytes, "stdout capture closed");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::sys;

    fn pipe_files() -> (File, File) {
        let (r, w) = sys::pipe().unwrap();
        (File::from(r), File::from(w))
    }

    #[test]
    fn forwards_to_both_sides_in_order() {
        let (capture_r, mut capture_w) = pipe_files();
        let (mut pass_r, pass_w) = pipe_files();
        let (mut mirror_r, mirror_w) = pipe_files();

        let tee = CaptureTee::spawn(capture_r, pass_w, mirror_w).unwrap();
        capture_w.write_all(b"id name stub\n").unwrap();
        capture_w.write_all(b"uciok\n").unwrap();
        drop(capture_w);

        let stats = tee.finish(Duration::from_secs(5), || {}).unwrap();
        assert_eq!(stats.bytes, 19);
        assert!(!stats.passthrough_failed);
        assert!(!stats.mirror_failed);

        let mut pass = String::new();
        pass_r.read_to_string(&mut pass).unwrap();
        let mut mirror = String::new();
        mirror_r.read_to_string(&mut mirror).unwrap();
        assert_eq!(pass, "id name stub\nuciok\n");
        assert_eq!(mirror, pass);
    }

    #[test]
    fn closed_passthrough_does_not_stop_the_mirror() {
        let (capture_r, mut capture_w) = pipe_files();
        let (pass_r, pass_w) = pipe_files();
        let (mut mirror_r, mirror_w) = pipe_files();
        drop(pass_r);

        let tee = CaptureTee::spawn(capture_r, pass_w, mirror_w).unwrap();
        capture_w.write_all(b"bestmove e2e4\n").unwrap();
        drop(capture_w);

        let stats = tee.finish(Duration::from_secs(5), || {}).unwrap();
        assert!(stats.passthrough_failed);

        let mut mirror = String::new();
        mirror_r.read_to_string(&mut mirror).unwrap();
        assert_eq!(mirror, "bestmove e2e4\n");
    }

    #[test]
    fn finish_times_out_while_capture_stays_open() {
        let (capture_r, _capture_w) = pipe_files();
        let (_pass_r, pass_w) = pipe_files();
        let (_mirror_r, mirror_w) = pipe_files();

        let tee = CaptureTee::spawn(capture_r, pass_w, mirror_w).unwrap();
        let mut polls = 0;
        let stats = tee.finish(Duration::from_millis(50), || polls += 1);
        assert!(stats.is_none());
        assert!(polls > 0);
    }
}
