use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use domstat::agent::Agent;
use domstat::config::Config;
use domstat::error::{FatalError, RunError, EXIT_DONT_RETRY};
use domstat::hypervisor;
use domstat::load::{TopLoadSampler, LOAD_TOOL};
use domstat::pid::{PsProcessLister, PROCESS_LIST_TOOL};
use domstat::sink::LineEmitter;
use domstat::tool;

/// Libvirt VM metrics collector for tcollector/OpenTSDB.
#[derive(Parser)]
#[command(name = "domstat", about)]
struct Cli {
    /// Path to the YAML configuration file (defaults apply without one).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info.
mod version {
    /// Release version string.
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} ({}/{})",
            RELEASE,
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("domstat {}", version::full());
        return ExitCode::SUCCESS;
    }

    // Logs go to stderr; stdout carries only metric lines.
    let Ok(filter) = EnvFilter::try_new(&cli.log_level) else {
        eprintln!("invalid log level: {}", cli.log_level);
        return ExitCode::FAILURE;
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .init();

    // A config that does not load or validate cannot be fixed by a
    // restart, so it joins the do-not-retry class.
    let cfg = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "invalid configuration, do not restart");
                return ExitCode::from(EXIT_DONT_RETRY);
            }
        },
        None => Config::default(),
    };

    info!(version = version::RELEASE, uri = %cfg.hypervisor_uri, "starting domstat");

    match run(cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_fatal() => {
            error!(error = %err, "fatal error, do not restart");
            ExitCode::from(EXIT_DONT_RETRY)
        }
        Err(err) => {
            error!(error = %err, "exiting on transient error");
            ExitCode::FAILURE
        }
    }
}

fn run(cfg: Config) -> Result<(), RunError> {
    check_external_tools()?;

    let hypervisor = hypervisor::connect(&cfg.hypervisor_uri).map_err(|source| {
        FatalError::Connect {
            uri: cfg.hypervisor_uri.clone(),
            source,
        }
    })?;
    info!(uri = %cfg.hypervisor_uri, "hypervisor connection open");

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        if ctrlc::set_handler(move || shutdown.store(true, Ordering::Relaxed)).is_err() {
            warn!("failed to register signal handler; rely on the supervisor to stop us");
        }
    }

    let lister = PsProcessLister::new(cfg.tool_timeout);
    let load_sampler = TopLoadSampler::new(cfg.snapshot_wait, cfg.tool_timeout);
    // Large enough that a cycle's lines reach stdout as one flushed batch.
    let emitter = LineEmitter::new(BufWriter::with_capacity(64 * 1024, io::stdout()));

    let mut agent = Agent::new(cfg, hypervisor, lister, load_sampler, emitter, shutdown);
    agent.run()
}

/// Verify the external tools the pipeline shells out to are present.
fn check_external_tools() -> Result<(), FatalError> {
    for tool_name in [PROCESS_LIST_TOOL, LOAD_TOOL] {
        if !tool::command_exists(tool_name) {
            return Err(FatalError::MissingTool { tool: tool_name });
        }
    }

    Ok(())
}
