#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `thrcal` command line: loads the typed config, calibrates devices on the
//! simulated front-end and writes the row log and register document.

mod cli;
mod error_fmt;
mod run;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::WrapErr;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    let _ = color_eyre::install();

    if let Err(e) = real_main(cli) {
        if JSON_MODE.get().copied().unwrap_or(false) {
            eprintln!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn real_main(cli: Cli) -> eyre::Result<()> {
    let cfg = load_config(&cli.config)?;
    init_tracing(cli.json, cli.log_level.as_deref(), &cfg.logging);

    let mut cfg = cfg;
    if let Some(csv) = &cli.devices {
        cfg.devices = thrcal_config::load_devices_csv(csv)?;
    }
    cfg.validate().wrap_err("invalid configuration")?;
    let specs = run::all_specs(&cfg)?;

    match cli.cmd {
        Commands::Calibrate {
            mode,
            out_dir,
            jobs,
            write_back,
        } => {
            let opts = run::RunOpts::resolve(&cfg, mode.map(Into::into), jobs, out_dir, write_back);

            let shutdown = Arc::new(AtomicBool::new(false));
            {
                let flag = Arc::clone(&shutdown);
                if let Err(e) = ctrlc::set_handler(move || {
                    flag.store(true, Ordering::Relaxed);
                }) {
                    tracing::warn!(error = %e, "no Ctrl-C handler; interrupts will not stop cleanly");
                }
            }

            let summaries = run::run_calibration(&cfg, specs, &opts, &shutdown)?;
            for s in &summaries {
                if cli.json {
                    println!("{}", s.to_json());
                } else {
                    let cause = s.cause.as_deref().map(|c| format!(" ({c})")).unwrap_or_default();
                    println!(
                        "{}/vmm{}: {} thresholdDac={} masked={}{}{}",
                        s.device,
                        s.vmm,
                        s.status,
                        s.threshold_dac,
                        s.masked,
                        if s.second_pass { " second-pass" } else { "" },
                        cause,
                    );
                }
            }
            let resolved = summaries.iter().filter(|s| s.status == "resolved").count();
            if !cli.json {
                println!(
                    "calibration complete: {resolved}/{} devices resolved, outputs in {}",
                    summaries.len(),
                    opts.out_dir.display()
                );
            }
            Ok(())
        }
        Commands::SelfCheck => {
            let probed = run::self_check(&cfg, &specs)?;
            if cli.json {
                println!("{}", serde_json::json!({ "self_check": "ok", "devices": probed }));
            } else {
                println!("OK ({probed} devices probed)");
            }
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> eyre::Result<thrcal_config::Config> {
    let text =
        fs::read_to_string(path).wrap_err_with(|| format!("read config {}", path.display()))?;
    toml::from_str::<thrcal_config::Config>(&text)
        .wrap_err_with(|| format!("parse config {}", path.display()))
}

/// Console layer plus an optional JSON-lines file sink from `[logging]`.
fn init_tracing(json: bool, cli_level: Option<&str>, logging: &thrcal_config::Logging) {
    // RUST_LOG wins, then the CLI flag, then [logging] level
    let level = cli_level.or(logging.level.as_deref()).unwrap_or("info");
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = logging.file.as_deref().and_then(|file| {
        let path = Path::new(file);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let name = path.file_name()?;
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        Some(fmt::layer().json().with_writer(writer).with_ansi(false))
    });

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
    };
    // Ignore error if subscriber was already set
    let _ = result;
}
