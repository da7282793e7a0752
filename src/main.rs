//! echolog Server Binary
//!
//! Accepts TCP clients, logs one line per connection and echoes the whole log.

use clap::Parser;
use echolog::config::ServerConfig;
use echolog::server::shutdown::spawn_signal_listener;
use echolog::server::{bind_listener, EchoLogServer};
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "echolog-server")]
#[command(about = "Concurrent TCP log-echo server")]
#[command(version)]
struct Args {
    /// Detach and run in the background once the listener is bound
    #[arg(short, long)]
    daemon: bool,

    /// Configuration file path
    #[arg(short, long, default_value = "config/server.toml")]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind to
    #[arg(short, long)]
    bind: Option<IpAddr>,

    /// Shared log file path
    #[arg(short = 'f', long)]
    data_file: Option<PathBuf>,

    /// Disable the periodic timestamp writer
    #[arg(long)]
    no_timestamps: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Forward diagnostics to the systemd journal
    #[cfg(feature = "journald")]
    #[arg(long)]
    journald: bool,
}

fn main() {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("echolog-server: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(args.verbose, journald_enabled(&args, &config), args.daemon);
    info!("Starting echolog server v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = start(args.daemon, config) {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    info!("echolog server stopped");
}

fn load_config(args: &Args) -> echolog::Result<ServerConfig> {
    let mut config = if args.config.exists() {
        ServerConfig::from_file(&args.config)?
    } else {
        ServerConfig::default()
    };

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(data_file) = &args.data_file {
        config.storage.data_file = data_file.clone();
    }
    if args.no_timestamps {
        config.timestamp.enabled = false;
    }

    #[cfg(feature = "journald")]
    if args.journald {
        config.logging.journald = true;
    }

    // Daemon mode changes the working directory to `/`.
    if config.storage.data_file.is_relative() {
        config.storage.data_file = std::env::current_dir()?.join(&config.storage.data_file);
    }

    config.validate()?;
    Ok(config)
}

/// A daemon has no terminal, so its diagnostics go to the journal.
fn journald_enabled(args: &Args, config: &ServerConfig) -> bool {
    config.logging.journald || args.daemon
}

fn start(daemon: bool, config: ServerConfig) -> echolog::Result<()> {
    info!("Listen address: {}", config.listen_addr());
    info!("Log file: {}", config.storage.data_file.display());
    info!("Timestamps enabled: {}", config.timestamp.enabled);

    // Bind before detaching so bind failures still reach the caller's exit status.
    let listener = bind_listener(&config)?;

    if daemon {
        info!("Entering daemon mode");
        daemonize()?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config, listener))
}

async fn serve(config: ServerConfig, listener: std::net::TcpListener) -> echolog::Result<()> {
    let server = EchoLogServer::new(config, listener)?;
    // Handlers go in before the log file exists so a signal never leaves it behind.
    let signals = spawn_signal_listener(server.context())?;
    server.create_log().await?;

    let result = server.run().await;
    signals.abort();

    let report = result?;
    info!(
        joined = report.joined,
        aborted = report.aborted,
        "Shutdown complete"
    );
    Ok(())
}

#[cfg(unix)]
fn daemonize() -> io::Result<()> {
    // SAFETY: no runtime threads exist yet, so forking cannot strand locks.
    if unsafe { libc::daemon(0, 0) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn daemonize() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "daemon mode requires a unix platform",
    ))
}

fn init_tracing(verbose: bool, journald: bool, daemon: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "echolog=debug,echolog_server=debug,info"
        } else {
            "echolog=info,echolog_server=info,warn"
        })
    });

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    #[cfg(feature = "journald")]
    let journald_layer = if journald {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer.with_syslog_identifier("echolog".to_string())),
            Err(e) => {
                eprintln!("echolog-server: journald unavailable: {}", e);
                if daemon {
                    eprintln!("echolog-server: diagnostics will be lost once detached");
                }
                None
            }
        }
    } else {
        None
    };

    #[cfg(not(feature = "journald"))]
    let journald_layer: Option<tracing_subscriber::layer::Identity> = {
        if daemon {
            eprintln!(
                "echolog-server: built without journald support, diagnostics will be lost once detached"
            );
        } else if journald {
            eprintln!("echolog-server: built without journald support, ignoring logging.journald");
        }
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(journald_layer)
        .init();
}
