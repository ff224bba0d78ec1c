mod check_cmd;
mod config;
mod run_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use uci_host_core::IoRouting;

use config::UciHostConfig;
use run_cmd::RunOptions;

#[derive(Parser)]
#[command(name = "uci-host", about = "Host a UCI chess engine shared library")]
struct Cli {
    /// Engine shared library (overrides UCI_HOST_MODULE env var)
    #[arg(long, global = true)]
    module: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a uci-host config file
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Bind the engine module and report its entry points
    Check,
    /// Run the engine, forwarding console lines as UCI commands
    Run {
        /// Extra engine argument (repeatable)
        #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Command sent before the run loop starts (repeatable; replaces the configured pre-seed)
        #[arg(long = "command", value_name = "COMMAND")]
        commands: Vec<String>,
        /// Append everything the engine prints to this file
        #[arg(long)]
        transcript: Option<PathBuf>,
        /// Output drain interval in milliseconds
        #[arg(long)]
        poll_ms: Option<u64>,
        /// Send only the pre-seeded commands, then quit
        #[arg(long)]
        batch: bool,
        /// Route commands through the bridge or the module's own entry points
        #[arg(long)]
        routing: Option<IoRouting>,
    },
}

/// Execute the `uci-host init` command: write config file.
fn cmd_init(cli_module: Option<&str>, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let mut cfg = config::ConfigFile::default();
    if let Some(module) = cli_module {
        cfg.engine.module = module.to_string();
    }
    let path = config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  engine.module = {}", cfg.engine.module);
    println!("  session.preseed = {:?}", cfg.session.preseed);
    println!();
    println!("Next: run `uci-host check` to verify the engine module.");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr: stdout may be bridged into the engine's capture.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(cli.module.as_deref(), force)?;
        }
        Commands::Check => {
            let resolved = UciHostConfig::resolve(cli.module.as_deref())?;
            check_cmd::run_check(&resolved.host.module_path)?;
        }
        Commands::Run {
            args,
            commands,
            transcript,
            poll_ms,
            batch,
            routing,
        } => {
            let resolved = UciHostConfig::resolve(cli.module.as_deref())?;
            let options = RunOptions {
                args,
                commands,
                transcript,
                poll_ms,
                batch,
                routing,
            };
            run_cmd::run_engine(resolved, options).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test_util {
    use std::sync::{Mutex, MutexGuard, PoisonError};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Serialize tests that read or write process environment variables.
    pub fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
