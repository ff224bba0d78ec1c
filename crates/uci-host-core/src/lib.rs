//! Host a UCI chess engine compiled as a shared library.
//!
//! The engine is written to talk to a console: it reads commands from its
//! standard input and prints replies to its standard output. [`EngineHost`]
//! loads the library, binds its entry points, and splices a pair of pipes
//! onto those descriptors so the host can feed commands and drain replies
//! while the engine's blocking run loop executes on another thread.
//!
//! ```no_run
//! use uci_host_core::{DylibLoader, EngineHost, HostConfig, SessionPlan, run_session};
//!
//! let host = EngineHost::new(HostConfig::new("./libstockfish.so"));
//! let report = run_session(&host, &DylibLoader::new(), &SessionPlan::default())?;
//! print!("{}", report.text());
//! # Ok::<(), uci_host_core::HarnessError>(())
//! ```

#[cfg(not(unix))]
compile_error!("uci-host-core requires a Unix target (POSIX pipes and dlopen)");

pub mod bridge;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod module;
pub mod stream;

pub use bridge::{CAPTURE_BUFFER_SIZE, IoBridge, OutputChunk, StdioSlots};
pub use config::{HostConfig, IoRouting};
pub use error::{BindError, HarnessError};
pub use lifecycle::{EngineHost, LifecycleState, SessionPlan, SessionReport, run_session};
pub use module::{DylibLoader, DylibModule, EngineArgs, EngineModule, EntryPoint, ModuleLoader};
pub use stream::output_stream;
