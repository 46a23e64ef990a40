//! Grant command: acquire the display permission with a single strategy.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use duskswitch_core::{GrantResult, host_instruction, manual_instruction};
use duskswitch_elevate::AuthorizationOutcome;

use crate::cli::{GlobalOpts, GrantArgs, Strategy};
use crate::context::{Context, SystemChannel};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct GrantReport {
    strategy: &'static str,
    #[serde(flatten)]
    result: GrantResult,
}

pub async fn handle(args: GrantArgs, ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    let package = ctx.package_id();

    let (strategy, result) = match args.via {
        Strategy::Manual => {
            print_manual(package, ctx);
            return Ok(());
        }
        Strategy::Service => {
            let channel = ctx.channel().await;
            let wait = Duration::from_secs(ctx.config.companion.authorization_wait_secs);
            ("service", grant_via_service(&channel, package, wait, ctx).await)
        }
        Strategy::Superuser => {
            let channel = ctx.channel().await;
            ("superuser", channel.via_superuser(package).await)
        }
    };

    if let Some(err) = CliError::from_grant(
        &result,
        &ctx.config.socket_path().display().to_string(),
        &manual_instruction(package),
    ) {
        return Err(err);
    }

    let report = GrantReport { strategy, result };
    let out = output::render_single(
        &global.output,
        &report,
        |r| format!("{} {} ({})", output::mark(true, ctx.color), r.result, r.strategy),
        |r| r.result.label().to_owned(),
    );
    output::print_output(&out, ctx.quiet);
    Ok(())
}

fn print_manual(package: &str, ctx: &Context) {
    let lines = [
        "Run this in a shell on the device:".to_owned(),
        format!("  {}", manual_instruction(package)),
        String::new(),
        "Or from a computer with the debug bridge attached:".to_owned(),
        format!("  {}", host_instruction(package)),
    ];
    output::print_output(&lines.join("\n"), ctx.quiet);
}

/// Ask the companion service. When it first needs to authorize us, wait for
/// the authorization outcome and retry once.
pub async fn grant_via_service(
    channel: &SystemChannel,
    package: &str,
    wait: Duration,
    ctx: &Context,
) -> GrantResult {
    // Subscribe before the first attempt so the outcome cannot be missed.
    let mut outcomes = channel.authorization_outcomes();

    let first = channel.via_elevation_service(package).await;
    if first != GrantResult::NotAuthorized {
        return first;
    }

    if !ctx.quiet {
        eprintln!(
            "{}",
            output::warn(
                "Waiting for the companion operator to run `duskswitch companion authorize`...",
                ctx.color,
            )
        );
    }

    match tokio::time::timeout(wait, next_outcome(&mut outcomes)).await {
        Ok(Some(AuthorizationOutcome::Granted)) => {
            info!("authorization granted, retrying grant");
            channel.via_elevation_service(package).await
        }
        Ok(_) => GrantResult::NotAuthorized,
        Err(_) => {
            debug!(?wait, "no authorization outcome in time");
            GrantResult::NotAuthorized
        }
    }
}

async fn next_outcome(
    outcomes: &mut broadcast::Receiver<AuthorizationOutcome>,
) -> Option<AuthorizationOutcome> {
    loop {
        match outcomes.recv().await {
            Ok(outcome) => return Some(outcome),
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
