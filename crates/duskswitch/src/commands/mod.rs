//! Command handlers, one module per top-level subcommand.

pub mod companion;
pub mod config_cmd;
pub mod daemon;
pub mod decide;
pub mod grant;
pub mod setup;
pub mod status;
pub mod threshold;
pub mod toggle;

use crate::cli::{Command, GlobalOpts};
use crate::context::Context;
use crate::error::CliError;

/// Route a parsed command to its handler.
pub async fn dispatch(cmd: Command, ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Setup(args) => setup::handle(args, ctx).await,
        Command::Grant(args) => grant::handle(args, ctx, global).await,
        Command::Status => status::handle(ctx, global).await,
        Command::Companion(args) => companion::handle(args, ctx).await,
        Command::Daemon(args) => daemon::handle(args, ctx).await,
        Command::Decide(args) => decide::handle(&args, ctx, global).await,
        Command::Threshold(args) => threshold::handle(args, ctx, global),
        Command::Enable => toggle::handle(true, ctx),
        Command::Disable => toggle::handle(false, ctx),
        // Handled before the config is loaded.
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}

/// Resolve on Ctrl-C or SIGTERM.
pub(crate) async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let Ok(mut term) = signal(SignalKind::terminate()) else {
        let _ = tokio::signal::ctrl_c().await;
        return;
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
