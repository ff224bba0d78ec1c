//! The `EngineModule` and `ModuleLoader` traits -- the seam between the
//! lifecycle controller and whatever provides the five entry points.
//!
//! Production code binds a shared library through [`super::DylibLoader`];
//! tests supply a static table of Rust callables instead. Both traits are
//! object-safe so the controller can hold `Box<dyn EngineModule>`.

use std::ffi::CStr;
use std::path::Path;

use anyhow::Result;

use crate::error::BindError;

use super::args::EngineArgs;

/// A bound engine module exposing the five entry points.
///
/// Implementations must be callable from several threads at once:
/// `run_loop` blocks one thread while `send_command` and `get_output` may be
/// called from others.
pub trait EngineModule: Send + Sync {
    /// Human-readable name of the module (usually its path).
    fn name(&self) -> &str;

    /// Set up engine state. Called once, after the stdio bridge is installed.
    fn initialize(&self, args: &EngineArgs);

    /// Run the engine's command loop. Blocks until the engine's own
    /// protocol ends it.
    fn run_loop(&self, args: &EngineArgs);

    /// Release engine-internal resources after `run_loop` has returned.
    fn shutdown(&self);

    /// The module's own view of pending output, copied out of the module
    /// byte for byte (no text decoding).
    ///
    /// Returns `None` when the module reports nothing.
    fn get_output(&self) -> Option<Vec<u8>>;

    /// Hand a command line directly to the module.
    fn send_command(&self, command: &CStr);

    /// Release the module handle. No entry point may be called afterwards.
    fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Resolves a module path into a bound [`EngineModule`].
///
/// A loader either returns a module with all five entry points bound or a
/// [`BindError`]; it must release anything it opened before failing.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, path: &Path) -> std::result::Result<Box<dyn EngineModule>, BindError>;
}

// Compile-time assertion: both traits must stay object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn EngineModule, _: &dyn ModuleLoader) {}
};
