use anyhow::{bail, Context as _};
use apicheck::base_cli::{Cli, OutputFormat};
use apicheck::base_request::{ReqwestTransport, Transport};
use apicheck::context::{Context, RunConfig};
use apicheck::report;
use apicheck::runner::Runner;
use apicheck::script::FILE_SCHEME;
use chrono::Local;
use clap::Parser;
use dotenv::dotenv;
use log::LevelFilter;
use std::{
    path::{Path, PathBuf},
    process::{Command, ExitCode},
    str::FromStr,
};

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli_instance = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    builder
        .format_timestamp(None)
        .format_target(true)
        .filter_level(LevelFilter::from_str(&cli_instance.log_level).unwrap_or(LevelFilter::Info))
        .init();

    match run(cli_instance).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!(target: "apicheck", "{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every test passed and every path loaded.
async fn run(cli: Cli) -> Result<bool, anyhow::Error> {
    let config = match &cli.config_file {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    let config_dir = cli
        .config_file
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut ctx = Context::from_config(&config).with_clock(Local::now());
    if let Some(base) = &cli.log_dir {
        let dir = report::create_log_dir(base, Local::now())
            .with_context(|| format!("cannot create log dir under {}", base.display()))?;
        log::info!(target: "apicheck", "log-dir={}", dir.display());
        ctx.log_dir = Some(dir);
    }

    let mut runner = Runner::new(ReqwestTransport::new()?);

    if let Some(file) = hook_file(&config_dir, config.test_setup.as_deref()) {
        log::info!(target: "apicheck", "[testSetup] {}", file.display());
        let report = runner
            .run_file(&mut ctx, &file)
            .await
            .map_err(|err| anyhow::anyhow!(report::report_error(&err)))?;
        if !report.stats.all_passed() {
            bail!("testSetup failed; aborting run");
        }
    }
    if let Some(command) = non_empty(config.exec_setup.as_deref()) {
        log::info!(target: "apicheck", "[execSetup] {command}");
        exec_shell(command).context("execSetup")?;
    }

    let mut loaded_all = true;
    for path in &cli.paths {
        match runner.run_path(&mut ctx, path).await {
            Ok(path_report) => {
                if path.is_dir() {
                    println!("[Suite] Complete {}", path.display());
                    println!("{}", report::stats_table(&path_report.stats));
                }
            }
            Err(err) => {
                loaded_all = false;
                log::error!(target: "apicheck", "{}", report::report_error(&err));
            }
        }
    }

    run_tear_down(&mut runner, &mut ctx, &config, &config_dir).await;

    let stats = runner.stats();
    match cli.output {
        OutputFormat::Json => println!("{}", report::pretty_json(&runner.results())),
        OutputFormat::Plain => {
            println!("Complete");
            println!("{}", report::stats_table(&stats));
        }
    }
    Ok(loaded_all && stats.all_passed())
}

async fn run_tear_down<T: Transport>(
    runner: &mut Runner<T>,
    ctx: &mut Context,
    config: &RunConfig,
    config_dir: &Path,
) {
    if let Some(file) = hook_file(config_dir, config.test_tear_down.as_deref()) {
        log::info!(target: "apicheck", "[testTearDown] {}", file.display());
        if let Err(err) = runner.run_file(ctx, &file).await {
            log::error!(target: "apicheck", "{}", report::report_error(&err));
        }
    }
    if let Some(command) = non_empty(config.exec_tear_down.as_deref()) {
        log::info!(target: "apicheck", "[execTearDown] {command}");
        if let Err(err) = exec_shell(command) {
            log::error!(target: "apicheck", "execTearDown: {err:#}");
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// `file://` references in the config resolve next to the config file.
fn hook_file(config_dir: &Path, value: Option<&str>) -> Option<PathBuf> {
    let value = non_empty(value)?;
    Some(config_dir.join(value.strip_prefix(FILE_SCHEME).unwrap_or(value)))
}

fn exec_shell(command: &str) -> Result<(), anyhow::Error> {
    let status = Command::new("sh").arg("-c").arg(command).status()?;
    if !status.success() {
        bail!("Failed Return code {status}: {command}");
    }
    Ok(())
}
