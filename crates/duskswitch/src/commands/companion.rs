//! Companion subcommands: run the privileged service, or manage the
//! authorization marker it is paired with.

use duskswitch_elevate::CompanionService;
use duskswitch_elevate::host::{remove_marker, write_marker};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::{CompanionArgs, CompanionCommand};
use crate::context::Context;
use crate::error::CliError;
use crate::output;

pub async fn handle(args: CompanionArgs, ctx: &Context) -> Result<(), CliError> {
    match args.command {
        CompanionCommand::Serve { once, .. } => serve(once, ctx).await,

        CompanionCommand::Authorize => {
            let marker = ctx.config.marker_path();
            write_marker(&marker)?;
            info!(marker = %marker.display(), "companion authorization written");
            output::print_output(
                &format!(
                    "{} duskswitch may now use the companion service",
                    output::mark(true, ctx.color)
                ),
                ctx.quiet,
            );
            Ok(())
        }

        CompanionCommand::Revoke => {
            remove_marker(&ctx.config.marker_path())?;
            output::print_output("Companion authorization revoked", ctx.quiet);
            Ok(())
        }
    }
}

async fn serve(once: bool, ctx: &Context) -> Result<(), CliError> {
    let socket = ctx.config.socket_path();
    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let service = CompanionService::new(&socket)
        .allow_uids(ctx.config.companion.allowed_uids.iter().copied());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        super::shutdown_signal().await;
        info!("shutdown requested");
        trigger.cancel();
    });

    if once {
        service.serve_once(cancel).await?;
    } else {
        service.serve(cancel).await?;
    }
    Ok(())
}
