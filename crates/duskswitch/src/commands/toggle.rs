//! Enable / disable adaptive switching.

use nix::sys::signal::Signal;
use tracing::info;

use duskswitch_core::{MonitoringService, PreferenceStore, PreferenceUpdate};

use crate::context::Context;
use crate::error::CliError;
use crate::output;

pub fn handle(enable: bool, ctx: &Context) -> Result<(), CliError> {
    let preferences = ctx.preferences()?;
    preferences.set(PreferenceUpdate::Enabled(enable))?;
    let daemon = ctx.daemon();

    if !enable {
        // Stop action: the daemon persists the flag too and exits.
        if daemon.signal(Signal::SIGUSR2)? {
            info!("daemon asked to stop");
        }
        output::print_output("Adaptive switching disabled", ctx.quiet);
        return Ok(());
    }

    let prefs = preferences.get();
    if prefs.setup_completed {
        daemon.start()?;
        daemon.reload();
        output::print_output(
            &format!("{} Adaptive switching enabled", output::mark(true, ctx.color)),
            ctx.quiet,
        );
    } else {
        output::print_output(
            &format!(
                "Adaptive switching enabled. {}",
                output::warn("Run `duskswitch setup` to grant the display permission.", ctx.color)
            ),
            ctx.quiet,
        );
    }
    Ok(())
}
