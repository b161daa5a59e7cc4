//! The LSOE daemon.

use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use lsoe::config::Config;
use lsoe::engine::Engine;
use lsoe::northbound::LogNorthbound;
use lsoe::session::VendorRegistry;

#[derive(Parser)]
#[command(name = "lsoed", version, about = "Link State Over Ethernet daemon")]
struct Args {
    /// Configuration file; the LSOE_CONFIG environment variable is
    /// consulted when this flag is absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bark more. Once for debug logging, twice to also hex-dump raw PDUs.
    #[arg(short, long, action = ArgAction::Count)]
    debug: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("fatal: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: u8) {
    let default_filter = if debug > 0 { "lsoe=debug,lsoed=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var_os("LSOE_CONFIG").map(PathBuf::from));
    let cfg = Config::load(config_path.as_deref())?;

    // Everything runs on one thread; sessions never see torn state.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build runtime")?;
    let local = tokio::task::LocalSet::new();
    runtime.block_on(local.run_until(async move {
        let engine = Engine::new(
            cfg,
            Rc::new(LogNorthbound),
            VendorRegistry::default(),
            args.debug > 1,
        )
        .await?;
        tokio::select! {
            result = engine.run() => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                Ok(())
            }
        }
    }))
}
