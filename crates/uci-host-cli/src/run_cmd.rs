//! `uci-host run` command: host the engine and talk to it.
//!
//! Engine output reaches the terminal through the bridge's pass-through
//! stream, so this command never prints captured chunks itself while the
//! bridge is installed; it only records them to the transcript.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use uci_host_core::{DylibLoader, EngineHost, IoRouting, LifecycleState, output_stream};

use crate::config::UciHostConfig;

/// Flags for `uci-host run`.
#[derive(Debug, Default)]
pub struct RunOptions {
    /// Appended to the configured engine arguments.
    pub args: Vec<String>,
    /// Replace the configured pre-seeded commands when non-empty.
    pub commands: Vec<String>,
    pub transcript: Option<PathBuf>,
    pub poll_ms: Option<u64>,
    /// Send only the pre-seeded commands, then quit.
    pub batch: bool,
    pub routing: Option<IoRouting>,
}

/// Run the engine until its loop ends.
pub async fn run_engine(config: UciHostConfig, options: RunOptions) -> Result<()> {
    let mut host_config = config.host;
    if let Some(routing) = options.routing {
        host_config = host_config.with_routing(routing);
    }
    let routing = host_config.routing;
    let module_path = host_config.module_path.clone();

    let host = Arc::new(EngineHost::new(host_config));
    host.bind(&DylibLoader::new())
        .with_context(|| format!("failed to bind engine module {}", module_path.display()))?;

    let mut engine_args = config.engine_args;
    engine_args.extend(options.args);
    host.initialize(&engine_args)
        .context("failed to initialize engine")?;

    let preseed = if options.commands.is_empty() {
        config.preseed
    } else {
        options.commands
    };
    for command in &preseed {
        host.send_command(command)
            .with_context(|| format!("failed to send pre-seeded command {command:?}"))?;
    }

    if options.batch {
        host.send_command(&config.quit_command)
            .context("failed to send quit command")?;
    } else {
        spawn_console_forwarder(Arc::clone(&host), config.quit_command.clone())?;
    }

    let mut transcript = match &options.transcript {
        Some(path) => Some(
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .with_context(|| format!("failed to open transcript {}", path.display()))?,
        ),
        None => None,
    };

    let poll_interval = options
        .poll_ms
        .map(|ms| Duration::from_millis(ms.max(1)))
        .unwrap_or(config.poll_interval);

    info!(
        session_id = %host.session_id(),
        module = %module_path.display(),
        %routing,
        preseed = preseed.len(),
        batch = options.batch,
        "engine session started"
    );

    let runner = tokio::task::spawn_blocking({
        let host = Arc::clone(&host);
        let args = engine_args.clone();
        move || host.run_loop(&args)
    });
    tokio::pin!(runner);

    let mut output = output_stream(Arc::clone(&host), poll_interval);
    let mut captured = 0usize;
    loop {
        tokio::select! {
            joined = &mut runner => {
                joined
                    .context("engine run loop panicked")?
                    .context("engine run loop failed")?;
                break;
            }
            Some(chunk) = output.next() => {
                captured += chunk.len();
                record(&mut transcript, chunk.as_bytes(), routing).await?;
            }
        }
    }

    // Whatever is still in flight comes back from the teardown.
    let residual = tokio::task::spawn_blocking({
        let host = Arc::clone(&host);
        move || host.shutdown_and_collect()
    })
    .await
    .context("engine shutdown panicked")?
    .context("engine shutdown failed")?;
    captured += residual.len();
    record(&mut transcript, &residual, routing).await?;

    if let Some(file) = transcript.as_mut() {
        file.flush().await.context("failed to flush transcript")?;
    }

    info!(
        session_id = %host.session_id(),
        captured_bytes = captured,
        "engine session finished"
    );
    Ok(())
}

/// Write drained output to the transcript, and to stdout when no bridge
/// pass-through is showing it already.
async fn record(
    transcript: &mut Option<tokio::fs::File>,
    bytes: &[u8],
    routing: IoRouting,
) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    if let Some(file) = transcript.as_mut() {
        file.write_all(bytes)
            .await
            .context("failed to write transcript")?;
    }
    if routing == IoRouting::Module {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(bytes).context("failed to write engine output")?;
        stdout.flush().context("failed to flush engine output")?;
    }
    Ok(())
}

/// Forward the user's lines to the engine; send `quit_command` at end of
/// input.
///
/// Runs on a detached thread: a blocking read of the console must not hold
/// up runtime shutdown once the engine has quit.
fn spawn_console_forwarder(host: Arc<EngineHost>, quit_command: String) -> Result<()> {
    let console = host
        .host_stdin()
        .context("failed to open the console for reading")?;

    thread::Builder::new()
        .name("console-forwarder".to_string())
        .spawn(move || forward_lines(&host, BufReader::new(console), &quit_command))
        .context("failed to start console forwarder")?;
    Ok(())
}

fn forward_lines(host: &EngineHost, reader: impl BufRead, quit_command: &str) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "console read failed");
                break;
            }
        };
        if let Err(e) = host.send_command(line.trim_end_matches('\r')) {
            debug!(error = %e, "engine no longer accepts commands");
            return;
        }
    }

    if host.state().accepts_commands() {
        if let Err(e) = host.send_command(quit_command) {
            debug!(error = %e, "failed to send quit at end of input");
        }
    } else if host.state() != LifecycleState::ShutDown {
        debug!(state = %host.state(), "console closed before the engine started");
    }
}
