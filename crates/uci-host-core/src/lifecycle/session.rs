//! One-shot session runner: bind, initialize, pre-seed commands, run the
//! engine loop to completion, shut down, and hand back everything the
//! engine printed.

use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::HarnessError;
use crate::module::ModuleLoader;

use super::EngineHost;

const DRAIN_POLL: Duration = Duration::from_millis(5);

/// What to feed the engine during a session.
#[derive(Debug, Clone)]
pub struct SessionPlan {
    /// Arguments for `initialize`.
    pub init_args: Vec<String>,
    /// Arguments for `run_loop`.
    pub loop_args: Vec<String>,
    /// Commands queued before the run loop starts.
    pub commands: Vec<String>,
    /// Sent after `commands` so the run loop terminates. `None` leaves the
    /// loop running until the engine stops on its own.
    pub quit_command: Option<String>,
}

impl SessionPlan {
    pub const DEFAULT_QUIT_COMMAND: &str = "quit";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands = commands.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_init_args(mut self, args: Vec<String>) -> Self {
        self.init_args = args;
        self
    }

    pub fn with_loop_args(mut self, args: Vec<String>) -> Self {
        self.loop_args = args;
        self
    }

    pub fn with_quit_command(mut self, quit: Option<String>) -> Self {
        self.quit_command = quit;
        self
    }
}

impl Default for SessionPlan {
    /// `uci` then `quit`.
    fn default() -> Self {
        Self {
            init_args: Vec::new(),
            loop_args: Vec::new(),
            commands: vec!["uci".to_string()],
            quit_command: Some(Self::DEFAULT_QUIT_COMMAND.to_string()),
        }
    }
}

/// Outcome of [`run_session`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Every byte captured from the engine's stdout, in order.
    pub output: Vec<u8>,
    pub commands_sent: usize,
}

impl SessionReport {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }
}

/// Drive `host` through its whole lifecycle.
///
/// Output is drained on a helper thread while the run loop blocks this one,
/// so a chatty engine never stalls on a full Output Channel.
pub fn run_session(
    host: &EngineHost,
    loader: &dyn ModuleLoader,
    plan: &SessionPlan,
) -> Result<SessionReport, HarnessError> {
    host.bind(loader)?;
    host.initialize(&plan.init_args)?;

    let mut commands_sent = 0;
    for command in plan.commands.iter().chain(plan.quit_command.iter()) {
        host.send_command(command)?;
        commands_sent += 1;
    }

    let loop_done = AtomicBool::new(false);
    let (loop_result, drained) = thread::scope(|scope| {
        let drainer = scope.spawn(|| {
            let mut out = Vec::new();
            while !loop_done.load(Ordering::Acquire) {
                match host.get_output() {
                    Ok(Some(chunk)) => out.extend_from_slice(chunk.as_bytes()),
                    Ok(None) => thread::sleep(DRAIN_POLL),
                    Err(e) => {
                        warn!(error = %e, "session drain stopped");
                        break;
                    }
                }
            }
            out
        });

        let result = host.run_loop(&plan.loop_args);
        loop_done.store(true, Ordering::Release);
        let drained = drainer.join().unwrap_or_else(|_| {
            warn!("session drain thread panicked");
            Vec::new()
        });
        (result, drained)
    });
    loop_result?;

    let mut output = drained;
    output.extend(host.shutdown_and_collect()?);

    info!(
        session_id = %host.session_id(),
        commands_sent,
        output_bytes = output.len(),
        "engine session finished"
    );

    Ok(SessionReport {
        output,
        commands_sent,
    })
}
