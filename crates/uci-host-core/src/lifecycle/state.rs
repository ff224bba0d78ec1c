//! Lifecycle states of a hosted engine and the legal transition graph.

use std::fmt;

/// Where a hosted engine is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// No module has been bound yet.
    Unloaded,
    /// All five entry points resolved; no engine code has run.
    Bound,
    /// The stdio bridge is installed and `initialize` has been invoked.
    Initialized,
    /// `run_loop` has been entered. The state stays `Running` after the loop
    /// returns until `shutdown` completes.
    Running,
    /// Terminal. The module has been shut down and released.
    ShutDown,
}

impl LifecycleState {
    /// Check whether `from -> to` is an edge in the lifecycle graph:
    ///
    /// ```text
    /// unloaded    -> bound
    /// bound       -> initialized
    /// initialized -> running
    /// running     -> shut down
    /// ```
    pub fn is_valid_transition(from: Self, to: Self) -> bool {
        matches!(
            (from, to),
            (Self::Unloaded, Self::Bound)
                | (Self::Bound, Self::Initialized)
                | (Self::Initialized, Self::Running)
                | (Self::Running, Self::ShutDown)
        )
    }

    /// `true` once the bridge exists and commands may be sent.
    pub fn accepts_commands(self) -> bool {
        matches!(self, Self::Initialized | Self::Running)
    }

    /// `true` if no further calls into the module are valid.
    pub fn is_terminal(self) -> bool {
        self == Self::ShutDown
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unloaded => "unloaded",
            Self::Bound => "bound",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::ShutDown => "shut down",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [LifecycleState; 5] = [
        LifecycleState::Unloaded,
        LifecycleState::Bound,
        LifecycleState::Initialized,
        LifecycleState::Running,
        LifecycleState::ShutDown,
    ];

    #[test]
    fn only_the_forward_path_is_valid() {
        let valid: Vec<(LifecycleState, LifecycleState)> = ALL
            .iter()
            .flat_map(|&from| ALL.iter().map(move |&to| (from, to)))
            .filter(|&(from, to)| LifecycleState::is_valid_transition(from, to))
            .collect();

        assert_eq!(
            valid,
            vec![
                (LifecycleState::Unloaded, LifecycleState::Bound),
                (LifecycleState::Bound, LifecycleState::Initialized),
                (LifecycleState::Initialized, LifecycleState::Running),
                (LifecycleState::Running, LifecycleState::ShutDown),
            ]
        );
    }

    #[test]
    fn shut_down_has_no_outgoing_edges() {
        for to in ALL {
            assert!(!LifecycleState::is_valid_transition(
                LifecycleState::ShutDown,
                to
            ));
        }
        assert!(LifecycleState::ShutDown.is_terminal());
    }

    #[test]
    fn commands_are_accepted_only_with_a_bridge() {
        let accepting: Vec<_> = ALL.into_iter().filter(|s| s.accepts_commands()).collect();
        assert_eq!(
            accepting,
            vec![LifecycleState::Initialized, LifecycleState::Running]
        );
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(LifecycleState::Initialized.to_string(), "initialized");
        assert_eq!(LifecycleState::ShutDown.to_string(), "shut down");
    }
}
