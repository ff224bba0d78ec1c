//! I/O bridge between a host and an engine that believes it owns a console.
//!
//! ```text
//! host --send_line--> [command pipe] --> stdin slot --> engine reads
//! engine writes --> stdout slot --> [capture pipe] --> tee thread
//!                                                        |--> original stdout
//!                                                        '--> [output pipe] --drain--> host
//! ```
//!
//! The stdio slots default to descriptors 0 and 1. Redirecting those is
//! process-global, so at most one bridge may own them at a time; tests bridge
//! spare descriptors instead.

pub mod drain;
pub(crate) mod sys;
pub(crate) mod tee;

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::HarnessError;

pub use drain::{CAPTURE_BUFFER_SIZE, OutputChunk};
use drain::OutputDrain;
use tee::CaptureTee;

/// Set while some bridge owns the process's real stdin/stdout.
static PROCESS_STDIO_BRIDGED: AtomicBool = AtomicBool::new(false);

/// The descriptors an engine uses as its console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdioSlots {
    pub stdin: RawFd,
    pub stdout: RawFd,
}

impl StdioSlots {
    /// The process's own standard input and output.
    pub const PROCESS: Self = Self {
        stdin: libc::STDIN_FILENO,
        stdout: libc::STDOUT_FILENO,
    };

    pub fn new(stdin: RawFd, stdout: RawFd) -> Self {
        Self { stdin, stdout }
    }

    /// `true` if either slot is one of the process-wide stdio descriptors.
    pub fn touches_process_stdio(&self) -> bool {
        self.stdin == libc::STDIN_FILENO || self.stdout == libc::STDOUT_FILENO
    }
}

impl Default for StdioSlots {
    fn default() -> Self {
        Self::PROCESS
    }
}

/// Descriptor state that only exists while the redirection is in place.
struct Redirection {
    saved_stdout: OwnedFd,
    tee: CaptureTee,
}

/// An installed bridge: Command Channel, Output Channel, capture adapter,
/// and the saved originals needed to undo the redirection.
pub struct IoBridge {
    slots: StdioSlots,
    command: File,
    drain: OutputDrain,
    saved_stdin: OwnedFd,
    redirection: Mutex<Option<Redirection>>,
    claims_process_stdio: bool,
}

impl std::fmt::Debug for IoBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoBridge")
            .field("slots", &self.slots)
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl IoBridge {
    /// Create the channels and splice them onto `slots`.
    ///
    /// Steps:
    /// 1. Create the Command, Output, and capture pipes.
    /// 2. Save the current stdin/stdout so they can be restored.
    /// 3. Make the Output Channel read end non-blocking.
    /// 4. Start the capture adapter.
    /// 5. Redirect the stdin slot to the Command Channel read end.
    /// 6. Redirect the stdout slot to the capture pipe.
    ///
    /// Nothing observable changes unless every step succeeds.
    pub fn install(slots: StdioSlots) -> Result<Self, HarnessError> {
        let claims_process_stdio = slots.touches_process_stdio();
        if claims_process_stdio && PROCESS_STDIO_BRIDGED.swap(true, Ordering::AcqRel) {
            return Err(HarnessError::pipe_setup(
                "claim process stdio",
                io::Error::new(
                    io::ErrorKind::ResourceBusy,
                    "process stdin/stdout are already bridged",
                ),
            ));
        }

        match Self::install_inner(slots, claims_process_stdio) {
            Ok(bridge) => Ok(bridge),
            Err(e) => {
                if claims_process_stdio {
                    PROCESS_STDIO_BRIDGED.store(false, Ordering::Release);
                }
                Err(e)
            }
        }
    }

    fn install_inner(slots: StdioSlots, claims_process_stdio: bool) -> Result<Self, HarnessError> {
        let (command_read, command_write) =
            sys::pipe().map_err(|e| HarnessError::pipe_setup("create command channel", e))?;
        let (output_read, output_write) =
            sys::pipe().map_err(|e| HarnessError::pipe_setup("create output channel", e))?;
        let (capture_read, capture_write) =
            sys::pipe().map_err(|e| HarnessError::pipe_setup("create capture pipe", e))?;

        let saved_stdin =
            sys::duplicate(slots.stdin).map_err(|e| HarnessError::pipe_setup("save stdin", e))?;
        let saved_stdout =
            sys::duplicate(slots.stdout).map_err(|e| HarnessError::pipe_setup("save stdout", e))?;
        let passthrough = saved_stdout
            .try_clone()
            .map_err(|e| HarnessError::pipe_setup("open pass-through stream", e))?;

        sys::set_nonblocking(output_read.as_raw_fd())
            .map_err(|e| HarnessError::pipe_setup("configure non-blocking output channel", e))?;

        let tee = CaptureTee::spawn(
            File::from(capture_read),
            File::from(passthrough),
            File::from(output_write),
        )
        .map_err(|e| HarnessError::pipe_setup("start stdout capture", e))?;

        sys::redirect(command_read.as_fd(), slots.stdin)
            .map_err(|e| HarnessError::pipe_setup("redirect stdin", e))?;

        sys::flush_stdio();
        if let Err(e) = sys::redirect(capture_write.as_fd(), slots.stdout) {
            if let Err(restore) = sys::redirect(saved_stdin.as_fd(), slots.stdin) {
                warn!(error = %restore, "failed to restore stdin after aborted bridge setup");
            }
            return Err(HarnessError::pipe_setup("redirect stdout", e));
        }

        // The slots now hold the only references the engine side needs.
        drop(command_read);
        drop(capture_write);

        info!(
            stdin_fd = slots.stdin,
            stdout_fd = slots.stdout,
            "stdio bridge installed"
        );

        Ok(Self {
            slots,
            command: File::from(command_write),
            drain: OutputDrain::new(File::from(output_read)),
            saved_stdin,
            redirection: Mutex::new(Some(Redirection { saved_stdout, tee })),
            claims_process_stdio,
        })
    }

    pub fn slots(&self) -> StdioSlots {
        self.slots
    }

    /// `true` until [`IoBridge::teardown`] has run.
    pub fn is_installed(&self) -> bool {
        self.redirection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Write `text` plus a newline to the Command Channel in a single write.
    pub fn send_line(&self, text: &str) -> io::Result<()> {
        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');
        (&self.command).write_all(&line)
    }

    /// One non-blocking read of captured output.
    pub fn drain(&self) -> Option<OutputChunk> {
        self.drain.drain()
    }

    /// A new handle on the stdin that was in place before redirection.
    pub fn host_stdin(&self) -> io::Result<File> {
        self.saved_stdin.try_clone().map(File::from)
    }

    /// Undo the redirection and return any captured bytes not yet drained.
    ///
    /// Waits up to `timeout` for the capture adapter to forward what the
    /// engine already wrote. Idempotent: later calls return nothing.
    pub fn teardown(&self, timeout: Duration) -> Vec<u8> {
        let Some(redirection) = self
            .redirection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Vec::new();
        };

        sys::flush_stdio();
        if let Err(e) = sys::redirect(redirection.saved_stdout.as_fd(), self.slots.stdout) {
            warn!(error = %e, stdout_fd = self.slots.stdout, "failed to restore stdout");
        }
        if let Err(e) = sys::redirect(self.saved_stdin.as_fd(), self.slots.stdin) {
            warn!(error = %e, stdin_fd = self.slots.stdin, "failed to restore stdin");
        }

        let mut residual = Vec::new();
        let stats = redirection
            .tee
            .finish(timeout, || self.drain.drain_into(&mut residual));
        self.drain.drain_into(&mut residual);

        if self.claims_process_stdio {
            PROCESS_STDIO_BRIDGED.store(false, Ordering::Release);
        }

        debug!(
            captured_bytes = stats.map(|s| s.bytes),
            residual_bytes = residual.len(),
            "stdio bridge torn down"
        );
        residual
    }
}

impl Drop for IoBridge {
    fn drop(&mut self) {
        let residual = self.teardown(Duration::from_secs(1));
        if !residual.is_empty() {
            debug!(bytes = residual.len(), "discarding undrained engine output");
        }
    }
}
