//! Configuration for an [`crate::EngineHost`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::bridge::StdioSlots;

/// How `send_command` and `get_output` reach the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoRouting {
    /// Through the harness's own pipes (the engine only sees its console).
    #[default]
    Bridge,
    /// Through the module's exported `send_command` / `get_output`.
    Module,
}

impl fmt::Display for IoRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bridge => f.write_str("bridge"),
            Self::Module => f.write_str("module"),
        }
    }
}

impl FromStr for IoRouting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bridge" => Ok(Self::Bridge),
            "module" => Ok(Self::Module),
            other => Err(format!(
                "unknown I/O routing: {other:?} (expected \"bridge\" or \"module\")"
            )),
        }
    }
}

/// Everything an [`crate::EngineHost`] needs before binding.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Path to the engine shared library.
    pub module_path: PathBuf,
    /// `argv[0]` passed to `initialize` and `run_loop`.
    pub program_name: String,
    pub routing: IoRouting,
    /// Descriptors the engine treats as its console.
    pub stdio: StdioSlots,
    /// How long shutdown waits for in-flight output to be captured.
    pub teardown_timeout: Duration,
}

impl HostConfig {
    pub const DEFAULT_PROGRAM_NAME: &str = "stockfish";
    pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(module_path: impl Into<PathBuf>) -> Self {
        Self {
            module_path: module_path.into(),
            program_name: Self::DEFAULT_PROGRAM_NAME.to_string(),
            routing: IoRouting::default(),
            stdio: StdioSlots::default(),
            teardown_timeout: Self::DEFAULT_TEARDOWN_TIMEOUT,
        }
    }

    pub fn with_program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = name.into();
        self
    }

    pub fn with_routing(mut self, routing: IoRouting) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_stdio(mut self, stdio: StdioSlots) -> Self {
        self.stdio = stdio;
        self
    }

    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }
}
