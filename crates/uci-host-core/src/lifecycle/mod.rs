//! Engine lifecycle controller: binds a module, installs the stdio bridge,
//! drives the blocking run loop, and tears everything down in order.
//!
//! ```text
//! unloaded --bind--> bound --initialize--> initialized --run_loop--> running --shutdown--> shut down
//! ```
//!
//! While the engine is initialized or running, `send_command` and
//! `get_output` may be called from any thread, including while another
//! thread is blocked inside `run_loop`. There is no cancellation at this
//! layer: `run_loop` returns only when the engine's own protocol ends it
//! (send the engine's quit command to bound the wait).

pub mod session;
pub mod state;

use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bridge::{IoBridge, OutputChunk, sys};
use crate::config::{HostConfig, IoRouting};
use crate::error::HarnessError;
use crate::module::args::to_cstring;
use crate::module::{EngineArgs, EngineModule, ModuleLoader};

pub use session::{SessionPlan, SessionReport, run_session};
pub use state::LifecycleState;

/// Owns one hosted engine: its module handle, its stdio bridge, and its
/// lifecycle state.
///
/// Only one host may bridge the process's real stdin/stdout at a time.
pub struct EngineHost {
    config: HostConfig,
    session_id: Uuid,
    state: Mutex<LifecycleState>,
    loop_active: AtomicBool,
    module: RwLock<Option<Box<dyn EngineModule>>>,
    bridge: RwLock<Option<IoBridge>>,
}

impl std::fmt::Debug for EngineHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHost")
            .field("session_id", &self.session_id)
            .field("module_path", &self.config.module_path)
            .field("state", &self.state())
            .finish()
    }
}

/// Clears the run-loop flag even if the engine call unwinds.
struct LoopGuard<'a>(&'a AtomicBool);

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl EngineHost {
    /// Create an unloaded host.
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            session_id: Uuid::new_v4(),
            state: Mutex::new(LifecycleState::Unloaded),
            loop_active: AtomicBool::new(false),
            module: RwLock::new(None),
            bridge: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Identifier attached to every log event from this host.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    /// `true` while some thread is inside the engine's run loop.
    pub fn is_loop_active(&self) -> bool {
        self.loop_active.load(Ordering::Acquire)
    }

    /// Load the module and bind its five entry points (unloaded -> bound).
    ///
    /// On failure the host stays unloaded and no engine code has run.
    pub fn bind(&self, loader: &dyn ModuleLoader) -> Result<(), HarnessError> {
        let mut state = self.lock_state();
        require(*state == LifecycleState::Unloaded, "bind a module", *state)?;

        let module = loader.load(&self.config.module_path).inspect_err(|e| {
            warn!(
                session_id = %self.session_id,
                module = %self.config.module_path.display(),
                error = %e,
                "failed to bind engine module"
            );
        })?;

        *self.module_write() = Some(module);
        self.advance(&mut *state, LifecycleState::Bound);
        Ok(())
    }

    /// Install the stdio bridge and call the engine's `initialize`
    /// (bound -> initialized).
    ///
    /// With [`IoRouting::Module`] the module owns its console plumbing and
    /// no bridge is installed.
    ///
    /// The module stays exclusively held until the engine's `initialize`
    /// returns. A concurrent `run_loop`, or a module-routed `send_command` or
    /// `get_output`, waits for it instead of entering a half-set-up engine.
    /// Bridge-routed commands only touch the pipes and queue up as usual.
    pub fn initialize(&self, args: &[String]) -> Result<(), HarnessError> {
        let engine_args = EngineArgs::new(&self.config.program_name, args)?;
        let module = {
            let mut state = self.lock_state();
            require(*state == LifecycleState::Bound, "initialize the engine", *state)?;

            if self.config.routing == IoRouting::Bridge {
                let bridge = IoBridge::install(self.config.stdio)?;
                *self.bridge_write() = Some(bridge);
            }
            let module = self.module_write();
            self.advance(&mut *state, LifecycleState::Initialized);
            module
        };

        if let Some(module) = module.as_ref() {
            module.initialize(&engine_args);
        }
        drop(module);
        debug!(session_id = %self.session_id, args = ?args, "engine initialize returned");
        Ok(())
    }

    /// Enter the engine's command loop (initialized -> running).
    ///
    /// Blocks the calling thread until the engine leaves its loop. An
    /// unexpected exit is treated as a normal return.
    pub fn run_loop(&self, args: &[String]) -> Result<(), HarnessError> {
        let engine_args = EngineArgs::new(&self.config.program_name, args)?;
        {
            let mut state = self.lock_state();
            require(*state == LifecycleState::Initialized, "enter the run loop", *state)?;
            self.loop_active.store(true, Ordering::Release);
            self.advance(&mut *state, LifecycleState::Running);
        }

        let _guard = LoopGuard(&self.loop_active);
        if let Some(module) = self.module_read().as_ref() {
            module.run_loop(&engine_args);
        }
        info!(session_id = %self.session_id, "engine run loop returned");
        Ok(())
    }

    /// Feed one line of protocol text to the engine. A newline is appended.
    pub fn send_command(&self, text: &str) -> Result<(), HarnessError> {
        let state = self.state();
        require(state.accepts_commands(), "send a command", state)?;

        match self.config.routing {
            IoRouting::Bridge => {
                let bridge = self.bridge_read();
                let bridge = bridge.as_ref().ok_or_else(|| HarnessError::InvalidState {
                    operation: "send a command",
                    state: self.state(),
                })?;
                bridge.send_line(text).map_err(HarnessError::CommandWrite)?;
            }
            IoRouting::Module => {
                let command = to_cstring(text)?;
                let module = self.module_read();
                let module = module.as_ref().ok_or_else(|| HarnessError::InvalidState {
                    operation: "send a command",
                    state: self.state(),
                })?;
                module.send_command(&command);
            }
        }

        debug!(session_id = %self.session_id, command = text, "sent command to engine");
        Ok(())
    }

    /// Drain captured output without blocking.
    ///
    /// Returns `Ok(None)` when nothing is available, including after
    /// shutdown. Fails before the engine has been initialized.
    pub fn get_output(&self) -> Result<Option<OutputChunk>, HarnessError> {
        let state = self.state();
        if matches!(state, LifecycleState::Unloaded | LifecycleState::Bound) {
            return Err(HarnessError::InvalidState {
                operation: "drain output",
                state,
            });
        }

        let chunk = match self.config.routing {
            IoRouting::Bridge => self.bridge_read().as_ref().and_then(IoBridge::drain),
            IoRouting::Module => self
                .module_read()
                .as_ref()
                .and_then(|m| m.get_output())
                .map(|bytes| OutputChunk::from_slice(&bytes)),
        };
        Ok(chunk)
    }

    /// A handle on the console input that was in place before redirection,
    /// so a host can keep reading its own user.
    pub fn host_stdin(&self) -> Result<File, HarnessError> {
        let stdin = match self.bridge_read().as_ref() {
            Some(bridge) => bridge.host_stdin(),
            None => sys::duplicate(self.config.stdio.stdin).map(File::from),
        };
        stdin.map_err(|e| HarnessError::pipe_setup("duplicate host stdin", e))
    }

    /// Shut the engine down (running -> shut down), discarding undrained
    /// output. It has already been forwarded to the original stdout.
    pub fn shutdown(&self) -> Result<(), HarnessError> {
        let residual = self.shutdown_and_collect()?;
        if !residual.is_empty() {
            debug!(
                session_id = %self.session_id,
                bytes = residual.len(),
                "discarding undrained engine output at shutdown"
            );
        }
        Ok(())
    }

    /// Shut the engine down and return every captured byte not yet drained.
    ///
    /// Order: engine `shutdown`, bridge teardown, module release. Must be
    /// called after `run_loop` has returned.
    pub fn shutdown_and_collect(&self) -> Result<Vec<u8>, HarnessError> {
        let mut state = self.lock_state();
        require(
            *state == LifecycleState::Running && !self.is_loop_active(),
            "shut down",
            *state,
        )?;

        if let Some(module) = self.module_read().as_ref() {
            module.shutdown();
        }

        let bridge = self.bridge_write().take();
        let residual = bridge
            .map(|b| b.teardown(self.config.teardown_timeout))
            .unwrap_or_default();

        let module = self.module_write().take();
        self.advance(&mut *state, LifecycleState::ShutDown);
        drop(state);

        if let Some(module) = module {
            module
                .release()
                .map_err(|e| HarnessError::Release(format!("{e:#}")))?;
        }
        Ok(residual)
    }

    fn advance(&self, state: &mut LifecycleState, to: LifecycleState) {
        debug_assert!(
            LifecycleState::is_valid_transition(*state, to),
            "invalid lifecycle transition {} -> {}",
            state,
            to
        );
        info!(
            session_id = %self.session_id,
            module = %self.config.module_path.display(),
            from = %state,
            to = %to,
            "engine lifecycle transition"
        );
        *state = to;
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn module_read(&self) -> RwLockReadGuard<'_, Option<Box<dyn EngineModule>>> {
        self.module.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn module_write(&self) -> RwLockWriteGuard<'_, Option<Box<dyn EngineModule>>> {
        self.module.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bridge_read(&self) -> RwLockReadGuard<'_, Option<IoBridge>> {
        self.bridge.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn bridge_write(&self) -> RwLockWriteGuard<'_, Option<IoBridge>> {
        self.bridge.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn require(ok: bool, operation: &'static str, state: LifecycleState) -> Result<(), HarnessError> {
    if ok {
        Ok(())
    } else {
        Err(HarnessError::InvalidState { operation, state })
    }
}

impl Drop for EngineHost {
    fn drop(&mut self) {
        let state = *self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if matches!(state, LifecycleState::Unloaded | LifecycleState::ShutDown) {
            return;
        }

        warn!(
            session_id = %self.session_id,
            state = %state,
            "engine host dropped before shutdown; releasing without engine shutdown"
        );
        let timeout = self.config.teardown_timeout;
        if let Some(bridge) = self.bridge_write().take() {
            bridge.teardown(timeout);
        }
        if let Some(module) = self.module_write().take() {
            if let Err(e) = module.release() {
                warn!(session_id = %self.session_id, error = %e, "failed to release engine module");
            }
        }
    }
}
