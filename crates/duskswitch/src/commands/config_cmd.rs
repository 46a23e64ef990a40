//! Config subcommand handlers.

use std::path::PathBuf;

use dialoguer::{Confirm, Input};

use duskswitch_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

fn target_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config::config_path)
}

fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let cfg = match &global.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };
    Ok(cfg)
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn to_toml(cfg: &Config) -> Result<String, CliError> {
    toml::to_string_pretty(cfg).map_err(|e| CliError::Config(e.into()))
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let path = target_path(global);
            eprintln!("duskswitch configuration wizard");
            eprintln!("   Config path: {}\n", path.display());

            if path.exists()
                && !global.yes
                && !Confirm::new()
                    .with_prompt("A config file already exists. Overwrite it?")
                    .default(false)
                    .interact()
                    .map_err(prompt_err)?
            {
                eprintln!("   Left unchanged.");
                return Ok(());
            }

            let mut cfg = Config::default();

            // 1. Package whose permission setup acquires
            cfg.package_id = Input::new()
                .with_prompt("Package id")
                .default(cfg.package_id.clone())
                .interact_text()
                .map_err(prompt_err)?;

            // 2. Superuser binary
            cfg.superuser.binary = Input::new()
                .with_prompt("Superuser binary")
                .default(cfg.superuser.binary.clone())
                .interact_text()
                .map_err(prompt_err)?;

            // 3. Companion socket (blank keeps the runtime-dir default)
            let socket: String = Input::new()
                .with_prompt("Companion socket path (blank for default)")
                .allow_empty(true)
                .interact_text()
                .map_err(prompt_err)?;
            if !socket.trim().is_empty() {
                cfg.companion.socket_path = Some(PathBuf::from(socket.trim()));
            }

            cfg.validate()?;
            config::save_config_to(&cfg, &path)?;
            eprintln!("\n   Saved to {}", path.display());
            Ok(())
        }

        // ── Show: effective configuration ───────────────────────────
        ConfigCommand::Show => {
            let cfg = load(global)?;
            let rendered = match global.output {
                crate::cli::OutputFormat::Table | crate::cli::OutputFormat::Plain => {
                    to_toml(&cfg)?
                }
                _ => output::render_single(&global.output, &cfg, |_| String::new(), |_| {
                    String::new()
                }),
            };
            output::print_output(rendered.trim_end(), global.quiet);
            Ok(())
        }

        // ── Path ────────────────────────────────────────────────────
        ConfigCommand::Path => {
            output::print_output(&target_path(global).display().to_string(), global.quiet);
            Ok(())
        }
    }
}
