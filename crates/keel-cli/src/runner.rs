use clap::{Args, Parser, Subcommand};
use keel_cluster::isolation::{create_isolation, exit_channel};
use keel_cluster::master::{MasterActor, MasterEvent, MasterOptions};
use keel_cluster::slave::{SlaveActor, SlaveEvent, SlaveOptions};
use keel_common::config::AppConfig;
use keel_server::actor::ActorSystem;
use log::{error, info};

/// Exit codes: 0 on clean shutdown, 1 on configuration errors,
/// 2 when an agent stopped on an unrecoverable protocol error.
const EXIT_CLEAN: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_PROTOCOL: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "keel", version, about = "A two-tier cluster resource manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the cluster master.
    Master(MasterArgs),
    /// Run a slave agent on a worker node.
    Slave(SlaveArgs),
}

#[derive(Debug, Args)]
struct MasterArgs {
    #[arg(long)]
    port: Option<u16>,
    /// The allocation policy (e.g. "simple").
    #[arg(long)]
    allocator: Option<String>,
    /// Locator of the election service for fault-tolerant deployments.
    #[arg(long = "fault-tolerant")]
    fault_tolerant: Option<String>,
    /// Suppress informational logging.
    #[arg(long)]
    quiet: bool,
}

#[derive(Debug, Args)]
struct SlaveArgs {
    /// The master endpoint (name@host:port) for single-master deployments.
    #[arg(long)]
    master: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Locator of the election service for fault-tolerant deployments.
    #[arg(long = "fault-tolerant")]
    fault_tolerant: Option<String>,
    /// Filesystem root for executor working directories.
    #[arg(long = "work-dir")]
    work_dir: Option<String>,
    /// The isolation backend (e.g. "process").
    #[arg(long)]
    isolation: Option<String>,
    /// Advertised resources (e.g. "cpus:4;mem:1024").
    #[arg(long)]
    resources: Option<String>,
    /// Suppress informational logging.
    #[arg(long)]
    quiet: bool,
}

pub fn main(args: Vec<String>) -> i32 {
    let cli = match Cli::try_parse_from(args) {
        Ok(x) => x,
        Err(e) => {
            // Help and version output are not configuration errors.
            let code = if e.use_stderr() { EXIT_CONFIG } else { EXIT_CLEAN };
            let _ = e.print();
            return code;
        }
    };

    let quiet = match &cli.command {
        Command::Master(args) => args.quiet,
        Command::Slave(args) => args.quiet,
    };
    init_logger(quiet);

    let config = match load_config(&cli.command) {
        Ok(x) => x,
        Err(e) => {
            error!("{e}");
            return EXIT_CONFIG;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(x) => x,
        Err(e) => {
            error!("failed to build runtime: {e}");
            return EXIT_CONFIG;
        }
    };
    match cli.command {
        Command::Master(_) => runtime.block_on(run_master(config)),
        Command::Slave(_) => runtime.block_on(run_slave(config)),
    }
}

fn init_logger(quiet: bool) {
    let default_filter = if quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

/// Load the application configuration and fold the CLI flags in on top.
fn load_config(command: &Command) -> Result<AppConfig, String> {
    let mut config = AppConfig::load().map_err(|e| e.to_string())?;
    match command {
        Command::Master(args) => {
            if let Some(port) = args.port {
                config.master.port = port;
            }
            if let Some(allocator) = &args.allocator {
                config.master.allocator = allocator.clone();
            }
            if let Some(locator) = &args.fault_tolerant {
                config.master.fault_tolerant = Some(locator.clone());
            }
        }
        Command::Slave(args) => {
            if let Some(master) = &args.master {
                config.slave.master = master.clone();
            }
            if let Some(port) = args.port {
                config.slave.port = port;
            }
            if let Some(locator) = &args.fault_tolerant {
                config.slave.fault_tolerant = Some(locator.clone());
            }
            if let Some(work_dir) = &args.work_dir {
                config.slave.work_dir = work_dir.clone();
            }
            if let Some(isolation) = &args.isolation {
                config.slave.isolation = isolation.clone();
            }
            if let Some(resources) = &args.resources {
                config.slave.resources = resources.clone();
            }
        }
    }
    Ok(config)
}

async fn run_master(config: AppConfig) -> i32 {
    info!("starting keel master {}", env!("CARGO_PKG_VERSION"));
    if config.master.fault_tolerant.is_some() {
        info!("running in fault-tolerant mode");
    }
    let options = match MasterOptions::from_config(&config) {
        Ok(x) => x,
        Err(e) => {
            error!("{e}");
            return EXIT_CONFIG;
        }
    };
    let mut system = ActorSystem::new();
    let handle = system.spawn::<MasterActor>(options);
    tokio::select! {
        _ = handle.clone().wait_for_stop() => {
            error!("master stopped unexpectedly");
            EXIT_PROTOCOL
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            let _ = handle.send(MasterEvent::Shutdown).await;
            handle.wait_for_stop().await;
            EXIT_CLEAN
        }
    }
}

async fn run_slave(config: AppConfig) -> i32 {
    info!("starting keel slave {}", env!("CARGO_PKG_VERSION"));
    let (exits_tx, exits_rx) = exit_channel();
    let isolation = match create_isolation(&config.slave.isolation, exits_tx) {
        Ok(x) => x,
        Err(e) => {
            error!("{e}");
            return EXIT_CONFIG;
        }
    };
    let options = match SlaveOptions::from_config(&config, isolation, exits_rx) {
        Ok(x) => x,
        Err(e) => {
            error!("{e}");
            return EXIT_CONFIG;
        }
    };
    let mut system = ActorSystem::new();
    let handle = system.spawn::<SlaveActor>(options);
    tokio::select! {
        _ = handle.clone().wait_for_stop() => {
            error!("slave stopped unexpectedly");
            EXIT_PROTOCOL
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            let _ = handle.send(SlaveEvent::Shutdown).await;
            handle.wait_for_stop().await;
            EXIT_CLEAN
        }
    }
}
