//! Engine modules and the loaders that bind them.
//!
//! # Architecture
//!
//! ```text
//! EngineHost::bind
//!     |
//!     v
//! ModuleLoader --load(path)--> Box<dyn EngineModule>
//!     |                               |
//!     |   DylibLoader (dlopen)        |   initialize(args)
//!     |   stub loaders (tests)        |   run_loop(args)     (blocks)
//!     |                               |   shutdown()
//!     |                               |   get_output() / send_command()
//!     |                               |   release()
//! ```

pub mod args;
pub mod dylib;
pub mod symbols;
pub mod trait_def;

pub use args::EngineArgs;
pub use dylib::{DylibLoader, DylibModule};
pub use symbols::EntryPoint;
pub use trait_def::{EngineModule, ModuleLoader};
