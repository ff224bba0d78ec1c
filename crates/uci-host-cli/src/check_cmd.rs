//! `uci-host check` command: confirm a module exports every entry point.

use std::path::Path;

use anyhow::{Context, Result};

use uci_host_core::{DylibLoader, EntryPoint, ModuleLoader};

/// Bind `module_path`, list the resolved entry points, and release it.
///
/// No engine code runs: binding resolves symbols only.
pub fn run_check(module_path: &Path) -> Result<()> {
    let module = DylibLoader::new()
        .load(module_path)
        .with_context(|| format!("module {} failed the check", module_path.display()))?;

    println!("Module: {}", module.name());
    for entry in EntryPoint::ALL {
        println!("  {:<20} ok", entry.symbol_name());
    }

    module
        .release()
        .with_context(|| format!("failed to release {}", module_path.display()))?;
    println!("All {} entry points resolved.", EntryPoint::ALL.len());
    Ok(())
}
