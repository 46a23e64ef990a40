//! Threshold subcommands: list the preset scale, pick a preset, or store a
//! custom value. A running daemon is told to reload afterwards.

use std::str::FromStr;

use tabled::Tabled;

use duskswitch_core::{PreferenceStore, PreferenceUpdate, ThresholdModel, ThresholdPreset};

use crate::cli::{GlobalOpts, ThresholdArgs, ThresholdCommand};
use crate::context::Context;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "")]
    active: String,
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Preset")]
    preset: String,
    #[tabled(rename = "Lux")]
    lux: String,
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ThresholdArgs, ctx: &Context, global: &GlobalOpts) -> Result<(), CliError> {
    let preferences = ctx.preferences()?;

    match args.command {
        ThresholdCommand::List => {
            let prefs = preferences.get();
            let steps = ThresholdModel::display_steps(prefs.custom_threshold_lux);
            let active = ThresholdModel::index_for(prefs.effective_threshold());
            let out = output::render_list(
                &global.output,
                &steps,
                |s| StepRow {
                    active: if s.index == active { "▶".into() } else { String::new() },
                    index: s.index,
                    preset: s.preset.to_string(),
                    lux: if s.custom {
                        format!("{} (custom)", s.lux)
                    } else {
                        s.lux.to_string()
                    },
                },
                |s| format!("{}\t{}", s.preset, s.lux),
            );
            output::print_output(&out, ctx.quiet);
            return Ok(());
        }

        ThresholdCommand::Set { preset } => {
            let preset = parse_preset(&preset)?;
            preferences.set(PreferenceUpdate::Preset(preset))?;
            report(ctx, &format!("threshold set to {preset} ({} lux)", preset.lux()));
        }

        ThresholdCommand::Custom { lux } => {
            if !lux.is_finite() {
                return Err(CliError::Validation {
                    field: "lux".into(),
                    reason: "must be a finite number".into(),
                });
            }
            preferences.set(PreferenceUpdate::CustomThreshold(lux))?;
            let stored = preferences.get().effective_threshold();
            report(ctx, &format!("threshold set to {stored} lux (custom)"));
        }
    }

    ctx.daemon().reload();
    Ok(())
}

fn report(ctx: &Context, message: &str) {
    output::print_output(
        &format!("{} {message}", output::mark(true, ctx.color)),
        ctx.quiet,
    );
}

/// Accept a preset name or its index on the scale. Out-of-range indices
/// clamp to the nearest end.
fn parse_preset(input: &str) -> Result<ThresholdPreset, CliError> {
    if let Ok(index) = input.parse::<i64>() {
        return Ok(ThresholdPreset::from_index(index));
    }
    ThresholdPreset::from_str(input.trim()).map_err(|_| CliError::Validation {
        field: "preset".into(),
        reason: format!(
            "unknown preset '{input}', expected one of: {}",
            ThresholdModel::presets()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_parse_by_name_or_index() {
        assert_eq!(parse_preset("dim").ok(), Some(ThresholdPreset::Dim));
        assert_eq!(parse_preset("Sunlight").ok(), Some(ThresholdPreset::Sunlight));
        assert_eq!(parse_preset("3").ok(), Some(ThresholdPreset::Bright));
        assert_eq!(parse_preset("42").ok(), Some(ThresholdPreset::Sunlight));
        assert_eq!(parse_preset("-1").ok(), Some(ThresholdPreset::Dark));
    }

    #[test]
    fn unknown_preset_lists_the_choices() {
        let Err(CliError::Validation { reason, .. }) = parse_preset("dusk") else {
            panic!("expected a validation error");
        };
        assert!(reason.contains("dark, dim, soft, bright, daylight, sunlight"));
    }
}
