//! Error types for binding, bridging, and driving a hosted engine.

use std::io;
use std::path::PathBuf;

use crate::lifecycle::LifecycleState;

/// Failure to load an engine module or resolve its entry points.
///
/// Both variants carry the dynamic loader's diagnostic text. A bind failure
/// is fatal to the embedding attempt: the module handle (if one was opened)
/// has already been released when this error is returned.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("failed to load engine module {}: {message}", .path.display())]
    ModuleLoad { path: PathBuf, message: String },

    #[error(
        "engine module {} is missing entry point(s) {}: {message}",
        .path.display(),
        .missing.join(", ")
    )]
    SymbolBind {
        path: PathBuf,
        missing: Vec<&'static str>,
        message: String,
    },
}

/// Errors surfaced by [`crate::EngineHost`] operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("stdio bridge setup failed during {stage}: {source}")]
    PipeSetup {
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("cannot {operation} while the engine is {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("argument contains an interior NUL byte: {0:?}")]
    InvalidArgument(String),

    #[error("failed to write command to engine: {0}")]
    CommandWrite(#[source] io::Error),

    #[error("failed to release engine module: {0}")]
    Release(String),
}

impl HarnessError {
    pub(crate) fn pipe_setup(stage: &'static str, source: io::Error) -> Self {
        Self::PipeSetup { stage, source }
    }

    /// Return `true` for the error kinds that abort starting a session.
    pub fn is_fatal_setup(&self) -> bool {
        matches!(self, Self::Bind(_) | Self::PipeSetup { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_bind_lists_every_missing_entry_point() {
        let err = BindError::SymbolBind {
            path: PathBuf::from("./libengine.so"),
            missing: vec!["shutdown_engine", "get_output"],
            message: "undefined symbol: shutdown_engine".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("./libengine.so"), "unexpected message: {msg}");
        assert!(msg.contains("shutdown_engine, get_output"), "unexpected message: {msg}");
    }

    #[test]
    fn bind_errors_are_fatal_setup_errors() {
        let err: HarnessError = BindError::ModuleLoad {
            path: PathBuf::from("missing.so"),
            message: "cannot open shared object file".to_string(),
        }
        .into();
        assert!(err.is_fatal_setup());

        let err = HarnessError::pipe_setup("pipe", io::Error::from_raw_os_error(libc::EMFILE));
        assert!(err.is_fatal_setup());
        assert!(err.to_string().contains("during pipe"));
    }

    #[test]
    fn invalid_state_names_operation_and_state() {
        let err = HarnessError::InvalidState {
            operation: "send a command",
            state: LifecycleState::ShutDown,
        };
        assert_eq!(
            err.to_string(),
            "cannot send a command while the engine is shut down"
        );
        assert!(!err.is_fatal_setup());
    }
}
