//! Status command: one poll of the environment plus stored state.

use serde::Serialize;

use duskswitch_core::{EnvironmentSnapshot, PreferenceStore, Preferences, ThresholdPreset};
use duskswitch_elevate::host::{marker_present, ping};

use crate::cli::GlobalOpts;
use crate::context::Context;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct StatusReport {
    package_id: String,
    environment: EnvironmentSnapshot,
    preferences: Preferences,
    companion: CompanionStatus,
    daemon: DaemonStatus,
}

#[derive(Serialize)]
struct CompanionStatus {
    socket: String,
    reachable: bool,
    authorized: bool,
}

#[derive(Serialize)]
struct DaemonStatus {
    running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<u32>,
}

pub async fn handle(ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    let environment = ctx.monitor().poll().await;
    let preferences = ctx.preferences()?.get();

    let socket = ctx.config.socket_path();
    let reachable = ping(&socket).await.unwrap_or(false);
    let authorized = marker_present(&ctx.config.marker_path()).unwrap_or(false);
    let pid = ctx.daemon().running_pid();

    let report = StatusReport {
        package_id: ctx.package_id().to_owned(),
        environment,
        preferences,
        companion: CompanionStatus {
            socket: socket.display().to_string(),
            reachable,
            authorized,
        },
        daemon: DaemonStatus {
            running: pid.is_some(),
            pid,
        },
    };

    let color = ctx.color;
    let out = output::render_single(
        &global.output,
        &report,
        |r| detail(r, color),
        |r| {
            let ready = r.environment.permission_granted && r.preferences.enabled;
            if ready { "active" } else { "inactive" }.to_owned()
        },
    );
    output::print_output(&out, ctx.quiet);
    Ok(())
}

fn detail(r: &StatusReport, color: bool) -> String {
    let m = |v: bool| output::mark(v, color);
    let env = &r.environment;
    let prefs = &r.preferences;
    let threshold = match prefs.custom_threshold_lux {
        Some(lux) => format!("{lux} lux (custom)"),
        None => format!(
            "{} lux ({})",
            prefs.threshold_lux,
            ThresholdPreset::nearest(prefs.threshold_lux)
        ),
    };
    let daemon = r
        .daemon
        .pid
        .map_or_else(|| m(false), |pid| format!("{} pid {pid}", m(true)));

    [
        format!("Package:           {}", r.package_id),
        String::new(),
        format!("Developer options: {}", m(env.developer_mode_enabled)),
        format!("USB debugging:     {}", m(env.debug_bridge_enabled)),
        format!("Connected:         {}", m(env.device_connected)),
        format!("Permission:        {}", m(env.permission_granted)),
        String::new(),
        format!("Setup completed:   {}", m(prefs.setup_completed)),
        format!("Switching enabled: {}", m(prefs.enabled)),
        format!("Threshold:         {threshold}"),
        String::new(),
        format!("Companion:         {} {}", m(r.companion.reachable), r.companion.socket),
        format!("Authorized:        {}", m(r.companion.authorized)),
        format!("Daemon:            {daemon}"),
    ]
    .join("\n")
}
