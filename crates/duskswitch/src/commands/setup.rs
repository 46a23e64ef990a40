//! Setup command: drive the guided permission flow from the terminal.
//!
//! Renders each published state, optionally grants on reaching the last
//! step, and maps Ctrl-C to leaving setup.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tracing::debug;

use duskswitch_core::{
    GrantResult, MonitoringService, SetupFlow, SetupHandle, SetupOutcome, SetupStep, SetupUiState,
    manual_instruction,
};

use crate::cli::{SetupArgs, Strategy};
use crate::context::Context;
use crate::daemon_process::NoDaemon;
use crate::error::CliError;
use crate::output;

const SPINNER_TICK: Duration = Duration::from_millis(120);

pub async fn handle(args: SetupArgs, ctx: &Context) -> Result<(), CliError> {
    let preferences = ctx.preference_store()?;
    let monitoring: Arc<dyn MonitoringService> = if args.no_daemon {
        Arc::new(NoDaemon)
    } else {
        Arc::new(ctx.daemon())
    };

    let flow = SetupFlow::new(
        ctx.monitor(),
        ctx.channel().await,
        preferences,
        monitoring,
        ctx.config.setup_config(),
    );
    let (handle, mut join) = flow.spawn();
    let mut state = handle.state();

    let spinner = spinner(ctx.quiet);
    let mut view = View::new(ctx.color);
    let mut auto_grant = args.via;

    let outcome = loop {
        tokio::select! {
            finished = &mut join => {
                break finished.unwrap_or_else(|e| {
                    debug!(error = %e, "setup flow task failed");
                    SetupOutcome::Exited
                });
            }
            changed = state.changed() => {
                if changed.is_err() {
                    // Flow dropped its state; the task is finishing.
                    break (&mut join).await.unwrap_or(SetupOutcome::Exited);
                }
                let current = state.borrow_and_update().clone();
                view.render(&current, &spinner);

                if current.current_step == SetupStep::Grant && !current.is_completed {
                    if let Some(strategy) = auto_grant.take() {
                        grant(&handle, strategy, ctx, &spinner).await;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted, leaving setup");
                if let Err(e) = handle.exit_setup().await {
                    debug!(error = %e, "exit request not delivered");
                }
            }
        }
    };

    spinner.finish_and_clear();
    drain(&mut state, &mut view, &spinner);

    match outcome {
        SetupOutcome::Completed => {
            output::print_output(
                &format!(
                    "{} Setup complete. Adaptive switching is on.",
                    output::mark(true, ctx.color)
                ),
                ctx.quiet,
            );
            Ok(())
        }
        SetupOutcome::Exited => Err(CliError::SetupIncomplete),
    }
}

/// Render whatever the flow published after its task ended.
fn drain(state: &mut watch::Receiver<SetupUiState>, view: &mut View, spinner: &ProgressBar) {
    if state.has_changed().unwrap_or(false) {
        let last = state.borrow_and_update().clone();
        view.render(&last, spinner);
    }
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.enable_steady_tick(SPINNER_TICK);
    bar
}

async fn grant(handle: &SetupHandle, strategy: Strategy, ctx: &Context, spinner: &ProgressBar) {
    let result = match strategy {
        Strategy::Manual => {
            let command = manual_instruction(ctx.package_id());
            spinner.suspend(|| eprintln!("  On the device, run: {command}"));
            return;
        }
        Strategy::Service => handle.grant_via_elevation_service().await,
        Strategy::Superuser => handle.grant_via_superuser().await,
    };
    match result {
        Ok(GrantResult::Success) => debug!("grant succeeded"),
        Ok(other) => debug!(result = other.label(), "grant did not succeed"),
        Err(e) => debug!(error = %e, "grant request not delivered"),
    }
}

// ── Rendering ────────────────────────────────────────────────────────

struct View {
    color: bool,
    step: Option<SetupStep>,
    notice: Option<String>,
}

impl View {
    fn new(color: bool) -> Self {
        Self {
            color,
            step: None,
            notice: None,
        }
    }

    fn render(&mut self, state: &SetupUiState, spinner: &ProgressBar) {
        if self.step != Some(state.current_step) {
            self.step = Some(state.current_step);
            let header = format!(
                "Step {}/3: {}",
                state.current_step.number(),
                step_title(state.current_step)
            );
            let hint = step_hint(state);
            let color = self.color;
            spinner.suspend(|| {
                eprintln!("{header}");
                for line in hint {
                    eprintln!("  {}", output::dim(&line, color));
                }
            });
        }

        let notice = state.notice.as_ref().map(ToString::to_string);
        if notice != self.notice {
            if let Some(text) = &notice {
                let line = format!("  ! {text}");
                let line = output::warn(&line, self.color);
                spinner.suspend(|| eprintln!("{line}"));
            }
            self.notice = notice;
        }

        spinner.set_message(status_line(state, self.color));
    }
}

fn step_title(step: SetupStep) -> &'static str {
    match step {
        SetupStep::DevMode => "Enable developer options and USB debugging",
        SetupStep::Connect => "Connect the device to a computer",
        SetupStep::Grant => "Grant the display permission",
    }
}

fn step_hint(state: &SetupUiState) -> Vec<String> {
    match state.current_step {
        SetupStep::DevMode => vec![
            "Settings > About > tap the build number seven times,".into(),
            "then turn on USB debugging in Developer options.".into(),
        ],
        SetupStep::Connect => vec!["Plug in a USB cable and accept the debugging prompt.".into()],
        SetupStep::Grant => vec![
            "From the computer, run:".into(),
            format!("  {}", state.pending_command),
            "or: duskswitch grant --via service | superuser".into(),
        ],
    }
}

fn status_line(state: &SetupUiState, color: bool) -> String {
    let snap = &state.snapshot;
    let mut line = match state.current_step {
        SetupStep::DevMode => format!(
            "developer options {}  usb debugging {}",
            output::mark(snap.developer_mode_enabled, color),
            output::mark(snap.debug_bridge_enabled, color)
        ),
        SetupStep::Connect => format!("connected {}", output::mark(snap.device_connected, color)),
        SetupStep::Grant => format!(
            "permission {}",
            output::mark(snap.permission_granted, color)
        ),
    };
    if state.countdown > 0 {
        line.push_str(&format!("  continuing in {}...", state.countdown));
    } else if !state.current_step.is_satisfied(snap) {
        line.push_str("  waiting");
    }
    line
}

#[cfg(test)]
mod tests {
    use duskswitch_core::EnvironmentSnapshot;

    use super::*;

    fn state(step: SetupStep) -> SetupUiState {
        SetupUiState {
            current_step: step,
            ..SetupUiState::new("adb shell pm grant dev.duskswitch X".into())
        }
    }

    #[test]
    fn status_line_shows_countdown() {
        let mut s = state(SetupStep::Connect);
        s.snapshot = EnvironmentSnapshot {
            device_connected: true,
            ..EnvironmentSnapshot::default()
        };
        s.countdown = 2;
        assert_eq!(status_line(&s, false), "connected ✓  continuing in 2...");
    }

    #[test]
    fn status_line_waits_on_unsatisfied_step() {
        let s = state(SetupStep::DevMode);
        assert_eq!(
            status_line(&s, false),
            "developer options ✗  usb debugging ✗  waiting"
        );
    }

    #[test]
    fn grant_hint_carries_the_pending_command() {
        let hint = step_hint(&state(SetupStep::Grant));
        assert!(hint.iter().any(|l| l.contains("adb shell pm grant")));
    }
}
