//! # hput CLI Entry Point
//!
//! Main binary for hput. Starts an HTTP server that stores whatever is PUT
//! to a path and serves, runs or exports it on any other verb.
//!
//! ## Usage
//!
//! ```bash
//! # Serve on port 80 with file storage under ./hput.db
//! hput serve
//!
//! # Serve from memory on port 8080, reachable from other machines
//! hput serve --port 8080 --storage memory --nonlocal
//!
//! # Only run what is already stored; PUT executes too
//! hput serve --locked
//! ```

use anyhow::Result;
use argh::FromArgs;
use hput_cli::{LogLevel, Storage, open_saver};
use hput_server::{HttpServer, ResourceLimits, Sandbox, ServerConfig, Service};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Main CLI structure parsed from command-line arguments.
#[derive(FromArgs)]
/// hput - store anything at a path, run it as JavaScript on request
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
}

/// Arguments for starting the hput server.
///
/// # Example
///
/// ```bash
/// hput serve --port 8080 --storage local --filename /var/lib/hput
/// ```
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// start the hput HTTP server
struct ServeArgs {
    /// port to listen on (all interfaces)
    #[argh(option, short = 'p', default = "80")]
    port: u16,

    /// allow traffic which is not local
    ///
    /// Without this flag, callers outside the loopback interface get 403.
    #[argh(switch)]
    nonlocal: bool,

    /// pass all requests to run, do not store any paths
    #[argh(switch)]
    locked: bool,

    /// which storage to use, currently supported: local and memory
    #[argh(option, default = "Storage::Local")]
    storage: Storage,

    /// if using local storage, name of the directory to create and use
    #[argh(option, default = "\"hput.db\".into()")]
    filename: String,

    /// which log level to use, options are: debug, info, warn, error
    ///
    /// RUST_LOG overrides this when set.
    #[argh(option, default = "LogLevel::Info")]
    log: LogLevel,

    /// maximum execution time of one script in milliseconds
    ///
    /// Must be between 1 and 3600000 (1 hour). Defaults to 30000.
    #[argh(option, long = "max-execution-time-ms", default = "30000")]
    max_execution_time_ms: u64,

    /// URL written into exported replay scripts
    ///
    /// Must include the http:// or https:// prefix.
    #[argh(option, long = "base-url", default = "\"http://localhost\".into()")]
    base_url: String,
}

impl ServeArgs {
    fn server_config(&self) -> ServerConfig {
        ServerConfig::new()
            .with_nonlocal(self.nonlocal)
            .with_locked(self.locked)
            .with_base_url(self.base_url.clone())
            .with_limits(
                ResourceLimits::new()
                    .with_execution_timeout(Duration::from_millis(self.max_execution_time_ms)),
            )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    match cli.command {
        Commands::Serve(args) => {
            // RUST_LOG wins over --log
            let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log.as_filter()));
            tracing_subscriber::fmt().with_env_filter(env_filter).init();

            run_serve(args).await
        }
    }
}

/// Executes the `serve` subcommand. Runs until the listener fails.
async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = args.server_config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    tracing::info!("Using {} storage", args.storage);
    let saver = open_saver(args.storage, &args.filename)?;

    if config.locked {
        tracing::info!("Locked mode: PUT runs stored paths instead of storing");
    }
    if config.allow_nonlocal {
        tracing::warn!("Accepting traffic which is not local");
    }
    tracing::info!(
        "Maximum execution time: {}ms",
        config.limits.execution_timeout.as_millis()
    );

    let service = Service::new(
        saver,
        Sandbox::new(config.limits.clone()),
        config.base_url.clone(),
    );
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), args.port);
    HttpServer::new(service, config).run(addr).await?;

    Ok(())
}
