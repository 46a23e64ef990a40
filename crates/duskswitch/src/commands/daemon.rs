//! Daemon command: host the theme service until told to stop.
//!
//! Signals drive it: SIGUSR1 is a screen-on trigger, SIGHUP re-reads the
//! preference file, SIGUSR2 disables switching and exits, SIGTERM/Ctrl-C
//! just exit.

use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use duskswitch_core::{MonitoringService, PreferenceStore};

use crate::cli::DaemonArgs;
use crate::context::Context;
use crate::error::CliError;

pub async fn handle(args: DaemonArgs, ctx: &Context) -> Result<(), CliError> {
    let process = ctx.daemon();
    let Some(_pid_file) = process.claim()? else {
        let holder = process
            .running_pid()
            .map_or_else(|| "another process".to_owned(), |pid| format!("pid {pid}"));
        return Err(CliError::Validation {
            field: "daemon".into(),
            reason: format!("already running as {holder}"),
        });
    };

    let preferences = ctx.preferences()?;
    let store: Arc<dyn PreferenceStore> = preferences.clone();
    let service = ctx.theme_service(store);

    let mut screen_on = signal(SignalKind::user_defined1())?;
    let mut reload = signal(SignalKind::hangup())?;
    let mut stop_action = signal(SignalKind::user_defined2())?;

    service.start()?;
    let mut evaluations = service.evaluations();
    info!(
        pid = std::process::id(),
        pid_file = %process.pid_path().display(),
        "theme daemon running"
    );

    if args.evaluate_now {
        service.screen_on();
    }

    loop {
        tokio::select! {
            () = super::shutdown_signal() => {
                info!("shutdown requested");
                break;
            }
            _ = screen_on.recv() => service.screen_on(),
            _ = reload.recv() => match preferences.reload() {
                Ok(changed) => debug!(changed, "preferences reloaded on SIGHUP"),
                Err(e) => warn!(error = %e, "preference reload failed (non-fatal)"),
            },
            _ = stop_action.recv() => {
                info!("stop action received, disabling switching");
                if let Err(e) = service.disable() {
                    warn!(error = %e, "could not persist disabled state");
                }
                break;
            }
            evaluation = evaluations.recv() => match evaluation {
                Ok(evaluation) => info!(?evaluation, "theme evaluated"),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "evaluation log lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    service.stop();
    Ok(())
}
