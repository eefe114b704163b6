//! stratad - the Strata storage-control daemon.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use strata_server::{config, http, ServerConfig, StorageService};

#[derive(Parser)]
#[command(name = "stratad", about = "Strata storage-control service", version)]
struct Args {
    /// Data root holding the metadata catalog and all project trees
    #[arg(long, env = "STRATA_DATA_ROOT", default_value = "/data")]
    data_root: PathBuf,

    /// REST API bind address
    #[arg(long, env = "STRATA_HTTP_ADDR", default_value = "127.0.0.1:8080")]
    http_addr: String,

    /// Control RPC bind address (e.g. tcp://127.0.0.1:5555); disabled if unset
    #[arg(long, env = "STRATA_CONTROL_ADDR")]
    control_addr: Option<String>,

    /// System admin API key (must start with `admin_`)
    #[arg(long, env = "STRATA_ADMIN_KEY", hide_env_values = true)]
    admin_key: String,

    /// Table write-lock timeout in seconds
    #[arg(long, env = "STRATA_LOCK_TIMEOUT_SECS", default_value_t = config::DEFAULT_LOCK_TIMEOUT_SECS)]
    lock_timeout_secs: u64,

    /// Per-request deadline in seconds
    #[arg(long, env = "STRATA_REQUEST_TIMEOUT_SECS", default_value_t = config::DEFAULT_REQUEST_TIMEOUT_SECS)]
    request_timeout_secs: u64,

    /// Verbose console logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    strata_logging::init_logging(strata_logging::LogConfig {
        app_name: "stratad",
        log_dir: args.data_root.join("_logs"),
        verbose: args.verbose,
    })
    .context("Failed to initialize logging")?;

    if !args.admin_key.starts_with("admin_") {
        anyhow::bail!("the admin key must carry the `admin_` prefix");
    }

    let mut config = ServerConfig::new(&args.data_root, &args.admin_key);
    config.http_addr = args.http_addr.clone();
    config.control_addr = args.control_addr.clone();
    config.lock_timeout = Duration::from_secs(args.lock_timeout_secs);
    config.request_timeout = Duration::from_secs(args.request_timeout_secs);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(async move {
        let service = StorageService::open(config.clone())
            .context("Failed to open the storage service")?;
        info!("Data root: {}", args.data_root.display());

        tokio::spawn(strata_server::janitor::run(service.clone()));

        if let Some(control_addr) = config.control_addr.clone() {
            let control_service = service.clone();
            let handle = tokio::runtime::Handle::current();
            std::thread::Builder::new()
                .name("strata-control".to_string())
                .spawn(move || {
                    if let Err(e) =
                        strata_server::control::run(control_service, handle, &control_addr)
                    {
                        tracing::error!("Control RPC terminated: {e:#}");
                    }
                })
                .context("Failed to spawn control thread")?;
        }

        http::serve(service, &config.http_addr).await
    })
}
