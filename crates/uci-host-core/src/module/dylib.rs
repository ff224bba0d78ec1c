//! Shared-library engine modules bound through the platform dynamic loader.
//!
//! The module is opened with `RTLD_LAZY | RTLD_LOCAL` and all five entry
//! points are resolved up front. A module that lacks any of them is closed
//! again before the error is returned, so a failed bind never leaves a
//! handle behind.

use std::ffi::{CStr, c_char, c_int};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use libloading::os::unix::{Library, RTLD_LAZY, RTLD_LOCAL};
use tracing::{debug, info, warn};

use crate::error::BindError;

use super::args::EngineArgs;
use super::symbols::EntryPoint;
use super::trait_def::{EngineModule, ModuleLoader};

type InitializeFn = unsafe extern "C" fn(c_int, *mut *mut c_char);
type RunLoopFn = unsafe extern "C" fn(c_int, *mut *mut c_char);
type ShutdownFn = unsafe extern "C" fn();
type GetOutputFn = unsafe extern "C" fn() -> *const c_char;
type SendCommandFn = unsafe extern "C" fn(*const c_char);

/// Resolved entry points. Only ever built with all five present.
#[derive(Clone, Copy)]
struct EntryPoints {
    initialize: InitializeFn,
    run_loop: RunLoopFn,
    shutdown: ShutdownFn,
    get_output: GetOutputFn,
    send_command: SendCommandFn,
}

/// Loads engine modules from shared libraries on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl DylibLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleLoader for DylibLoader {
    fn load(&self, path: &Path) -> std::result::Result<Box<dyn EngineModule>, BindError> {
        DylibModule::open(path).map(|m| Box::new(m) as Box<dyn EngineModule>)
    }
}

/// An engine module backed by a `dlopen`ed shared library.
pub struct DylibModule {
    name: String,
    path: PathBuf,
    entry: EntryPoints,
    /// `None` once the handle has been released.
    library: Mutex<Option<Library>>,
}

impl std::fmt::Debug for DylibModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DylibModule")
            .field("path", &self.path)
            .finish()
    }
}

impl DylibModule {
    /// Open `path` and bind the five entry points.
    pub fn open(path: &Path) -> std::result::Result<Self, BindError> {
        // SAFETY: loading a library runs its initializers; the module is
        // trusted code by construction of this harness.
        let library = unsafe { Library::open(Some(path), RTLD_LAZY | RTLD_LOCAL) }.map_err(|e| {
            BindError::ModuleLoad {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;

        let resolved = (
            resolve::<InitializeFn>(&library, EntryPoint::Initialize),
            resolve::<RunLoopFn>(&library, EntryPoint::RunLoop),
            resolve::<ShutdownFn>(&library, EntryPoint::Shutdown),
            resolve::<GetOutputFn>(&library, EntryPoint::GetOutput),
            resolve::<SendCommandFn>(&library, EntryPoint::SendCommand),
        );

        let mut missing = Vec::new();
        let mut messages = Vec::new();
        for (entry, err) in [
            (EntryPoint::Initialize, resolved.0.as_ref().err()),
            (EntryPoint::RunLoop, resolved.1.as_ref().err()),
            (EntryPoint::Shutdown, resolved.2.as_ref().err()),
            (EntryPoint::GetOutput, resolved.3.as_ref().err()),
            (EntryPoint::SendCommand, resolved.4.as_ref().err()),
        ] {
            if let Some(message) = err {
                missing.push(entry.symbol_name());
                messages.push(message.clone());
            }
        }

        let (Ok(initialize), Ok(run_loop), Ok(shutdown), Ok(get_output), Ok(send_command)) =
            resolved
        else {
            warn!(
                module = %path.display(),
                missing = ?missing,
                "releasing partially bound engine module"
            );
            if let Err(e) = library.close() {
                warn!(module = %path.display(), error = %e, "failed to close engine module");
            }
            return Err(BindError::SymbolBind {
                path: path.to_path_buf(),
                missing,
                message: messages.join("; "),
            });
        };

        info!(module = %path.display(), "bound engine module entry points");

        Ok(Self {
            name: path.display().to_string(),
            path: path.to_path_buf(),
            entry: EntryPoints {
                initialize,
                run_loop,
                shutdown,
                get_output,
                send_command,
            },
            library: Mutex::new(Some(library)),
        })
    }

    /// Path the module was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Look up one entry point and copy the function pointer out of the symbol.
fn resolve<T: Copy>(library: &Library, entry: EntryPoint) -> std::result::Result<T, String> {
    // SAFETY: the caller picks `T` to match the documented C signature of
    // `entry`; the pointer is only used while the library stays open.
    unsafe { library.get::<T>(entry.symbol_bytes()) }
        .map(|symbol| *symbol)
        .map_err(|e| e.to_string())
}

// The entry points below are only reachable through `EngineHost`, which stops
// calling into the module before `release` and never calls after it.
impl EngineModule for DylibModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&self, args: &EngineArgs) {
        let mut argv = args.c_argv();
        unsafe { (self.entry.initialize)(argv.argc(), argv.as_mut_ptr()) }
    }

    fn run_loop(&self, args: &EngineArgs) {
        let mut argv = args.c_argv();
        unsafe { (self.entry.run_loop)(argv.argc(), argv.as_mut_ptr()) }
    }

    fn shutdown(&self) {
        unsafe { (self.entry.shutdown)() }
    }

    fn get_output(&self) -> Option<Vec<u8>> {
        let ptr = unsafe { (self.entry.get_output)() };
        if ptr.is_null() {
            return None;
        }
        // Copy immediately: the module may reuse its buffer on the next call.
        let bytes = unsafe { CStr::from_ptr(ptr) }.to_bytes().to_vec();
        (!bytes.is_empty()).then_some(bytes)
    }

    fn send_command(&self, command: &CStr) {
        unsafe { (self.entry.send_command)(command.as_ptr()) }
    }

    fn release(&self) -> Result<()> {
        let library = self
            .library
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match library {
            Some(library) => {
                library
                    .close()
                    .with_context(|| format!("failed to close {}", self.path.display()))?;
                info!(module = %self.path.display(), "released engine module");
            }
            None => debug!(module = %self.path.display(), "engine module already released"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_a_module_load_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("libnot-there.so");

        let Err(err) = DylibLoader::new().load(&path) else {
            panic!("loading a missing file should fail");
        };
        match err {
            BindError::ModuleLoad { path: p, message } => {
                assert_eq!(p, path);
                assert!(!message.is_empty());
            }
            other => panic!("expected ModuleLoad, got {other:?}"),
        }
    }

    #[test]
    fn non_library_file_is_a_module_load_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("libfake.so");
        std::fs::write(&path, b"definitely not an ELF object").unwrap();

        let err = DylibModule::open(&path).unwrap_err();
        assert!(matches!(err, BindError::ModuleLoad { .. }), "got {err:?}");
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn library_without_entry_points_reports_every_missing_symbol() {
        let err = DylibModule::open(Path::new("libc.so.6")).unwrap_err();
        match err {
            BindError::SymbolBind { missing, message, .. } => {
                let expected: Vec<&str> =
                    EntryPoint::ALL.iter().map(|e| e.symbol_name()).collect();
                assert_eq!(missing, expected);
                assert!(message.contains("initialize_engine"), "message: {message}");
            }
            other => panic!("expected SymbolBind, got {other:?}"),
        }
    }
}
