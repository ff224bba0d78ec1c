//! The five entry points an engine module must export.

use std::fmt;

/// One of the named operations a hosted engine module exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    Initialize,
    RunLoop,
    Shutdown,
    GetOutput,
    SendCommand,
}

impl EntryPoint {
    /// Every entry point, in resolution order.
    pub const ALL: [EntryPoint; 5] = [
        EntryPoint::Initialize,
        EntryPoint::RunLoop,
        EntryPoint::Shutdown,
        EntryPoint::GetOutput,
        EntryPoint::SendCommand,
    ];

    /// Exported symbol name looked up in the module.
    pub fn symbol_name(self) -> &'static str {
        match self {
            Self::Initialize => "initialize_engine",
            Self::RunLoop => "run_engine_loop",
            Self::Shutdown => "shutdown_engine",
            Self::GetOutput => "get_output",
            Self::SendCommand => "send_command",
        }
    }

    /// NUL-terminated symbol name for the dynamic loader.
    pub(crate) fn symbol_bytes(self) -> &'static [u8] {
        match self {
            Self::Initialize => b"initialize_engine\0",
            Self::RunLoop => b"run_engine_loop\0",
            Self::Shutdown => b"shutdown_engine\0",
            Self::GetOutput => b"get_output\0",
            Self::SendCommand => b"send_command\0",
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_bytes_match_names() {
        for entry in EntryPoint::ALL {
            let bytes = entry.symbol_bytes();
            assert_eq!(bytes.last(), Some(&0));
            assert_eq!(&bytes[..bytes.len() - 1], entry.symbol_name().as_bytes());
        }
    }

    #[test]
    fn names_are_distinct() {
        let mut names: Vec<_> = EntryPoint::ALL.iter().map(|e| e.symbol_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 5);
    }
}
