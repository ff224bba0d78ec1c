//! Shared test utilities for uci-host integration tests.
//!
//! Provides a stub engine that behaves like a console UCI engine (it reads
//! its stdin slot and prints to its stdout slot), a loader that hands it to
//! an [`EngineHost`](uci_host_core::EngineHost), and spare descriptors so
//! tests can bridge something other than the process's real stdio.

use std::ffi::CStr;
use std::fs::File;
use std::io::{self, Read, Write};
use std::mem::ManuallyDrop;
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uci_host_core::{
    BindError, EngineArgs, EngineHost, EngineModule, EntryPoint, ModuleLoader, StdioSlots,
};

// ---------------------------------------------------------------------------
// Spare console descriptors
// ---------------------------------------------------------------------------

/// Two `/dev/null` descriptors standing in for an engine's console.
///
/// Bridging these instead of 0/1 keeps tests independent of each other and
/// of the test harness's own output.
pub struct ScratchSlots {
    stdin: File,
    stdout: File,
}

impl ScratchSlots {
    pub fn new() -> Self {
        Self {
            stdin: File::open("/dev/null").expect("open /dev/null for reading"),
            stdout: File::options()
                .write(true)
                .open("/dev/null")
                .expect("open /dev/null for writing"),
        }
    }

    pub fn slots(&self) -> StdioSlots {
        StdioSlots::new(self.stdin.as_raw_fd(), self.stdout.as_raw_fd())
    }
}

impl Default for ScratchSlots {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Call log
// ---------------------------------------------------------------------------

/// Everything a [`StubEngine`] observed, shared with the test.
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
    received: Mutex<Vec<u8>>,
}

impl CallLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Entry points called so far, e.g. `"initialize stockfish"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Raw bytes the engine read from its stdin slot.
    pub fn received(&self) -> Vec<u8> {
        self.received.lock().unwrap().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c.starts_with(prefix))
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

// ---------------------------------------------------------------------------
// Stub engine
// ---------------------------------------------------------------------------

/// A minimal console UCI engine.
///
/// `run_loop` reads lines from the stdin slot until `quit` or end of input
/// and answers on the stdout slot:
///
/// | command        | reply                         |
/// |----------------|-------------------------------|
/// | `uci`          | `id name stub` then `uciok`   |
/// | `isready`      | `readyok`                     |
/// | `ping`         | `pong`                        |
/// | `go ...`       | `bestmove e2e4`               |
/// | `echo TEXT`    | `TEXT`                        |
/// | `flood N`      | `N` bytes of `x`, no newline  |
///
/// Unknown commands are ignored. The module-routed `send_command` applies
/// the same table to an internal queue drained by `get_output`.
pub struct StubEngine {
    slots: StdioSlots,
    banner: Option<String>,
    log: Arc<CallLog>,
    outbox: Mutex<Vec<u8>>,
}

impl StubEngine {
    pub fn new(slots: StdioSlots, log: Arc<CallLog>) -> Self {
        Self {
            slots,
            banner: None,
            log,
            outbox: Mutex::new(Vec::new()),
        }
    }

    /// Print `banner` to the stdout slot during `initialize`.
    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    fn console(fd: RawFd) -> ManuallyDrop<File> {
        // SAFETY: the slot descriptor outlives the engine; ManuallyDrop keeps
        // this borrowed handle from closing it.
        ManuallyDrop::new(unsafe { File::from_raw_fd(fd) })
    }

    fn print(&self, bytes: &[u8]) {
        let mut out = Self::console(self.slots.stdout);
        // The stub has no error channel; a closed console just drops output.
        let _ = out.write_all(bytes);
    }

    fn read_line(&self) -> Option<Vec<u8>> {
        let mut input = Self::console(self.slots.stdin);
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match input.read(&mut byte) {
                Ok(0) => return (!line.is_empty()).then_some(line),
                Ok(_) => {
                    self.log.received.lock().unwrap().push(byte[0]);
                    if byte[0] == b'\n' {
                        return Some(line);
                    }
                    line.push(byte[0]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Reply for one command line, and whether the loop should stop.
fn respond(line: &str) -> (Vec<u8>, bool) {
    let line = line.trim_end_matches('\r');
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "uci" => (b"id name stub\nuciok\n".to_vec(), false),
        "isready" => (b"readyok\n".to_vec(), false),
        "ping" => (b"pong\n".to_vec(), false),
        "go" => (b"bestmove e2e4\n".to_vec(), false),
        "echo" => (format!("{rest}\n").into_bytes(), false),
        "flood" => (vec![b'x'; rest.parse().unwrap_or(0)], false),
        "quit" => (Vec::new(), true),
        _ => (Vec::new(), false),
    }
}

impl EngineModule for StubEngine {
    fn name(&self) -> &str {
        "stub"
    }

    fn initialize(&self, args: &EngineArgs) {
        let mut call = format!("initialize {}", args.program().to_string_lossy());
        for arg in args.args_lossy() {
            call.push(' ');
            call.push_str(&arg);
        }
        self.log.record(call);
        if let Some(banner) = &self.banner {
            self.print(format!("{banner}\n").as_bytes());
        }
    }

    fn run_loop(&self, _args: &EngineArgs) {
        self.log.record("run_loop");
        while let Some(line) = self.read_line() {
            let (reply, quit) = respond(&String::from_utf8_lossy(&line));
            if !reply.is_empty() {
                self.print(&reply);
            }
            if quit {
                break;
            }
        }
        self.log.record("run_loop returned");
    }

    fn shutdown(&self) {
        self.log.record("shutdown");
    }

    fn get_output(&self) -> Option<Vec<u8>> {
        let mut outbox = self.outbox.lock().unwrap();
        if outbox.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut *outbox))
    }

    fn send_command(&self, command: &CStr) {
        let line = command.to_string_lossy();
        self.log.record(format!("send_command {line}"));
        let (reply, _) = respond(&line);
        self.outbox.lock().unwrap().extend_from_slice(&reply);
    }

    fn release(&self) -> anyhow::Result<()> {
        self.log.record("release");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Hands out [`StubEngine`]s, optionally pretending some entry points are
/// missing from the module.
pub struct StubLoader {
    slots: StdioSlots,
    log: Arc<CallLog>,
    banner: Option<String>,
    missing: Vec<EntryPoint>,
}

impl StubLoader {
    pub fn new(slots: StdioSlots, log: Arc<CallLog>) -> Self {
        Self {
            slots,
            log,
            banner: None,
            missing: Vec::new(),
        }
    }

    pub fn with_banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = Some(banner.into());
        self
    }

    /// Fail binding as if `entry` were not exported.
    pub fn without(mut self, entry: EntryPoint) -> Self {
        self.missing.push(entry);
        self
    }
}

impl ModuleLoader for StubLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn EngineModule>, BindError> {
        if !self.missing.is_empty() {
            let missing: Vec<&'static str> =
                self.missing.iter().map(|e| e.symbol_name()).collect();
            return Err(BindError::SymbolBind {
                path: path.to_path_buf(),
                message: format!("undefined symbol: {}", missing[0]),
                missing,
            });
        }

        let mut engine = StubEngine::new(self.slots, Arc::clone(&self.log));
        if let Some(banner) = &self.banner {
            engine = engine.with_banner(banner.clone());
        }
        Ok(Box::new(engine))
    }
}

// ---------------------------------------------------------------------------
// Compiled fixture modules
// ---------------------------------------------------------------------------

/// C source of an engine exporting all five entry points.
///
/// Everything it observes is appended to an output buffer that `get_output`
/// hands back (and clears):
///
/// - `initialize_engine`: `init ARGC ARGV0 ARGV1 terminated|unterminated`
/// - `run_engine_loop`: `loop ARGC`
/// - `send_command`: `got COMMAND`, except `raw`, which answers with the
///   bytes `0xff 0x0a`
/// - `shutdown_engine`: `shutdown`
pub const FULL_ENGINE_C: &str = r#"
#include <stddef.h>
#include <stdio.h>
#include <string.h>

static char pending[4096];
static size_t pending_len;
static char handed_out[4096];

static void emit(const char *text) {
    size_t n = strlen(text);
    if (pending_len + n >= sizeof pending) return;
    memcpy(pending + pending_len, text, n);
    pending_len += n;
}

void initialize_engine(int argc, char **argv) {
    char line[512];
    snprintf(line, sizeof line, "init %d %s %s %s\n", argc, argv[0],
             argc > 1 ? argv[1] : "-",
             argv[argc] == NULL ? "terminated" : "unterminated");
    emit(line);
}

void run_engine_loop(int argc, char **argv) {
    char line[64];
    (void)argv;
    snprintf(line, sizeof line, "loop %d\n", argc);
    emit(line);
}

void shutdown_engine(void) {
    emit("shutdown\n");
}

const char *get_output(void) {
    if (pending_len == 0) return NULL;
    memcpy(handed_out, pending, pending_len);
    handed_out[pending_len] = '\0';
    pending_len = 0;
    return handed_out;
}

void send_command(const char *command) {
    if (strcmp(command, "raw") == 0) {
        emit("\xff\n");
        return;
    }
    emit("got ");
    emit(command);
    emit("\n");
}
"#;

/// C source of a module exporting only `initialize_engine` and
/// `run_engine_loop`.
pub const PARTIAL_ENGINE_C: &str = r#"
void initialize_engine(int argc, char **argv) { (void)argc; (void)argv; }
void run_engine_loop(int argc, char **argv) { (void)argc; (void)argv; }
"#;

/// Compile `source` into `dir/lib<name>.so` with `$CC` (default `cc`).
///
/// Returns `None` when no C compiler is installed, so callers can skip.
/// Panics if the compiler runs but fails.
pub fn compile_fixture_module(dir: &Path, name: &str, source: &str) -> Option<PathBuf> {
    let source_path = dir.join(format!("{name}.c"));
    let module_path = dir.join(format!("lib{name}.so"));
    std::fs::write(&source_path, source).expect("write fixture source");

    let compiler = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
    let output = match Command::new(&compiler)
        .args(["-shared", "-fPIC", "-o"])
        .arg(&module_path)
        .arg(&source_path)
        .output()
    {
        Ok(output) => output,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => panic!("{compiler} failed to start: {e}"),
    };
    assert!(
        output.status.success(),
        "{compiler} failed to build {name}: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Some(module_path)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Drain `host` until the captured text contains `needle` or `timeout`
/// elapses. Returns everything drained.
pub fn drain_until_contains(host: &EngineHost, needle: &str, timeout: Duration) -> String {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    while Instant::now() < deadline {
        match host.get_output() {
            Ok(Some(chunk)) => {
                out.extend_from_slice(chunk.as_bytes());
                if String::from_utf8_lossy(&out).contains(needle) {
                    break;
                }
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(2)),
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respond_table() {
        assert_eq!(respond("uci").0, b"id name stub\nuciok\n");
        assert_eq!(respond("echo hello world").0, b"hello world\n");
        assert_eq!(respond("flood 3").0, b"xxx");
        assert_eq!(respond("go depth 1").0, b"bestmove e2e4\n");
        assert!(respond("quit").1);
        assert!(respond("setoption name Hash value 16").0.is_empty());
    }

    #[test]
    fn module_routed_commands_queue_replies() {
        let log = CallLog::new();
        let engine = StubEngine::new(ScratchSlots::new().slots(), Arc::clone(&log));
        engine.send_command(c"isready");
        assert_eq!(engine.get_output().as_deref(), Some(&b"readyok\n"[..]));
        assert!(engine.get_output().is_none());
        assert_eq!(log.calls(), vec!["send_command isready"]);
    }
}
