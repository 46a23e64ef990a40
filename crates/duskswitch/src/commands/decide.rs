//! Decide command: run the theme decider on given readings without
//! touching the sensors or the display.

use serde::Serialize;

use duskswitch_core::platform::{MemoryDisplay, StaticSensors};
use duskswitch_core::{Evaluation, HysteresisThemeDecider, PreferenceStore, ThemeDecisionState};
use duskswitch_core::theme::decider::band;

use crate::cli::{DecideArgs, GlobalOpts};
use crate::context::Context;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct Decision {
    threshold_lux: f32,
    lower_lux: f32,
    upper_lux: f32,
    #[serde(flatten)]
    evaluation: Evaluation,
}

pub async fn handle(args: &DecideArgs, ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    if !args.lux.is_finite() {
        return Err(CliError::Validation {
            field: "lux".into(),
            reason: "must be a finite number".into(),
        });
    }

    let threshold = match args.threshold {
        Some(lux) => lux,
        None => ctx.preferences()?.get().effective_threshold(),
    };

    let decider = HysteresisThemeDecider::new(
        StaticSensors {
            light: args.lux,
            proximity: args.proximity,
        },
        MemoryDisplay::new(args.dark),
    );
    let mut state = ThemeDecisionState::new(threshold, args.dark);
    let evaluation = decider.evaluate(&mut state).await?;

    let band = band(state.configured_threshold_lux);
    let decision = Decision {
        threshold_lux: state.configured_threshold_lux,
        lower_lux: band.lower,
        upper_lux: band.upper,
        evaluation,
    };

    let color = ctx.color;
    let out = output::render_single(
        &global.output,
        &decision,
        |d| detail(d, color),
        |d| plain(&d.evaluation, args.dark).to_owned(),
    );
    output::print_output(&out, ctx.quiet);
    Ok(())
}

/// The resulting mode, or `covered`.
fn plain(evaluation: &Evaluation, was_dark: bool) -> &'static str {
    match evaluation {
        Evaluation::Covered { .. } => "covered",
        Evaluation::Kept { dark, .. } | Evaluation::Switched { dark, .. } => {
            if *dark {
                "dark"
            } else {
                "light"
            }
        }
        Evaluation::Skipped if was_dark => "dark",
        Evaluation::Skipped => "light",
    }
}

fn detail(d: &Decision, color: bool) -> String {
    let outcome = match d.evaluation {
        Evaluation::Covered { distance } => {
            output::warn(&format!("covered (proximity {distance}), no change"), color)
        }
        Evaluation::Kept { lux, dark } => {
            format!("keep {} at {lux} lux", if dark { "dark" } else { "light" })
        }
        Evaluation::Switched { lux, dark } => output::ok(
            &format!("switch to {} at {lux} lux", if dark { "dark" } else { "light" }),
            color,
        ),
        Evaluation::Skipped => "skipped".into(),
    };
    format!(
        "Threshold: {} lux (band {} .. {})\nDecision:  {outcome}",
        d.threshold_lux, d.lower_lux, d.upper_lux
    )
}
