use clap::Parser;
use eyre::{Result, WrapErr};
use std::fs;
use std::path::Path;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod actuators;
mod bench;
mod calibrate;
mod cli;
mod error_fmt;
mod plant;
mod run;

use crate::bench::Backend;
use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE, flush_logs, json_mode};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn load_config(path: &Path) -> Result<irrigo_config::Config> {
    let text = fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = irrigo_config::load_toml(&text).wrap_err("parse config")?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn init_tracing(json: bool, level: &str, logging: &irrigo_config::Logging) -> Result<()> {
    // RUST_LOG wins over --log-level
    let console_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .wrap_err_with(|| format!("invalid log level {level:?}"))?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    if json {
        layers.push(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    } else {
        layers.push(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(console_filter)
                .boxed(),
        );
    }

    if let Some(file) = logging.file.as_deref() {
        use tracing_appender::rolling::{RollingFileAppender, Rotation};
        let path = Path::new(file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file {file:?} has no file name"))?;
        let rotation = match logging.rotation.as_deref() {
            Some("daily") => Rotation::DAILY,
            Some("hourly") => Rotation::HOURLY,
            _ => Rotation::NEVER,
        };
        fs::create_dir_all(dir).wrap_err_with(|| format!("create log dir {}", dir.display()))?;
        let (writer, guard) =
            tracing_appender::non_blocking(RollingFileAppender::new(rotation, dir, name));
        if let Ok(mut slot) = FILE_GUARD.lock() {
            *slot = Some(guard);
        }
        let file_filter = EnvFilter::try_new(logging.level.as_deref().unwrap_or("info"))
            .wrap_err("invalid logging.level")?;
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(file_filter)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .wrap_err("install log subscriber")?;
    Ok(())
}

fn check_config(cfg: &irrigo_config::Config, run_file: Option<&Path>, json_out: bool) -> Result<()> {
    let channels = cfg.channel_count();
    let active = match run_file {
        Some(p) => {
            let limits = run::run_limits(cfg);
            Some(run::read_run_file(p, &limits, 0)?.len())
        }
        None => None,
    };
    if json_out {
        println!(
            "{}",
            serde_json::json!({ "ok": true, "channels": channels, "run_channels": active })
        );
    } else {
        match active {
            Some(n) => println!("config ok: {channels} channels, run configures {n}"),
            None => println!("config ok: {channels} channels"),
        }
    }
    Ok(())
}

fn real_main(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli.config)?;
    init_tracing(cli.json, &cli.log_level, &cfg.logging)?;
    let backend = Backend::select(cli.sim);
    tracing::debug!(?backend, config = %cli.config.display(), "starting");
    let json_out = cli.json;

    match cli.cmd {
        Commands::Run {
            run_file,
            passes,
            record,
            no_save,
        } => run::run(
            &cfg,
            backend,
            json_out,
            run::RunArgs {
                run_file,
                passes,
                record,
                no_save,
            },
        ),
        Commands::Read {
            channel,
            samples,
            raw,
        } => calibrate::read(&cfg, backend, json_out, channel, samples, raw),
        Commands::Calibrate { stage } => calibrate::calibrate(&cfg, backend, json_out, stage),
        Commands::Calibration { action } => calibrate::calibration(&cfg, backend, json_out, action),
        Commands::Journal { action } => actuators::journal(&cfg, backend, json_out, action),
        Commands::Jog {
            actuator,
            target,
            wait_ms,
        } => actuators::jog(&cfg, backend, json_out, actuator, target, wait_ms),
        Commands::CheckConfig { run_file } => check_config(&cfg, run_file.as_deref(), json_out),
    }
}

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let result = real_main(cli);
    if let Err(e) = &result {
        tracing::error!(error = %e, "command failed");
    }
    flush_logs();
    if let Err(e) = result {
        if json_mode() {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}
