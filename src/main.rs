// src/main.rs
//
// -----------------------------------------------------------------------------
// nstat - stress-test orchestrator for SDN controllers
// -----------------------------------------------------------------------------

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use nstat::config::{TestConfig, TestType};
use nstat::constants::DEFAULT_RESULTS_FILE;
use nstat::remote::DefaultConnector;
use nstat::results_dir::ResultsDir;
use nstat::runner::TestRunner;

// -----------------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------------
#[derive(Parser)]
#[command(name = "nstat", version, about = "Stress-test orchestrator for SDN controllers")]
struct Cli {
    /// Test type to run
    #[arg(long = "test", value_enum)]
    test: TestType,

    /// Controller base directory (overrides controller.base_dir)
    #[arg(long = "ctrl-base-dir", value_name = "DIR")]
    ctrl_base_dir: Option<String>,

    /// Southbound emulator base directory (overrides sb_emulator.base_dir)
    #[arg(long = "sb-emu-base-dir", value_name = "DIR")]
    sb_emu_base_dir: Option<String>,

    /// Northbound generator base directory (overrides nb_emulator.base_dir)
    #[arg(long = "nb-emu-base-dir", value_name = "DIR")]
    nb_emu_base_dir: Option<String>,

    /// Sniffer base directory (overrides sniffer.base_dir)
    #[arg(long = "sniffer-base-dir", value_name = "DIR")]
    sniffer_base_dir: Option<String>,

    /// Test configuration (.json, or YAML for any other extension)
    #[arg(long = "json-config", value_name = "PATH")]
    json_config: PathBuf,

    /// Result document path (default: <output-dir>/results.json)
    #[arg(long = "json-output", value_name = "PATH")]
    json_output: Option<PathBuf>,

    /// Output directory (default: ./nstat-<date>-<time>-<test>)
    #[arg(long = "output-dir", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Log level for nstat (error, warn, info, debug, trace); RUST_LOG overrides it
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Skip the test run and only check that the result document exists
    #[arg(long = "bypass-execution")]
    bypass_execution: bool,
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nstat={}", level.to_lowercase())));
    fmt().with_env_filter(filter).init();
}

/// Result document named on the command line, or the default inside the output dir.
fn bypass_output(cli: &Cli) -> Result<PathBuf> {
    match (&cli.json_output, &cli.output_dir) {
        (Some(p), _) => Ok(p.clone()),
        (None, Some(d)) => Ok(d.join(DEFAULT_RESULTS_FILE)),
        (None, None) => bail!("--bypass-execution needs --json-output or --output-dir"),
    }
}

fn load_config(cli: &Cli) -> Result<TestConfig> {
    let mut cfg = TestConfig::from_file(&cli.json_config)
        .with_context(|| format!("Failed to load {}", cli.json_config.display()))?;
    cfg.override_base_dirs(
        cli.ctrl_base_dir.as_deref(),
        cli.sb_emu_base_dir.as_deref(),
        cli.nb_emu_base_dir.as_deref(),
        cli.sniffer_base_dir.as_deref(),
    );
    cfg.validate(cli.test)
        .with_context(|| format!("Invalid configuration for {}", cli.test))?;
    Ok(cfg)
}

fn run_test(cli: &Cli) -> Result<bool> {
    let cfg = load_config(cli)?;
    let mut dir = ResultsDir::create(&cli.json_config, cli.test.as_str(), cli.output_dir.as_deref())?;
    dir.write_metadata()?;
    let output = cli.json_output.clone().unwrap_or_else(|| dir.results_path());

    info!("Running {} with {}", cli.test, cli.json_config.display());
    let t0 = Instant::now();
    let mut runner = TestRunner::new(cli.test, cfg, Arc::new(DefaultConnector::default()));
    let summary = runner
        .run_to(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    dir.finalize(t0.elapsed().as_secs_f64(), &summary)?;

    if !summary.success() {
        error!(
            "{}: setup_ok={}, {}/{} point(s) failed",
            cli.test, summary.setup_ok, summary.failed_points, summary.points
        );
    }
    Ok(summary.success())
}

fn bypass(cli: &Cli) -> Result<bool> {
    let output = bypass_output(cli)?;
    if Path::new(&output).exists() {
        info!("Execution bypassed, using {}", output.display());
        Ok(true)
    } else {
        error!("Execution bypassed but {} does not exist", output.display());
        Ok(false)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let ok = if cli.bypass_execution {
        bypass(&cli)?
    } else {
        run_test(&cli)?
    };
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
