//! parkd server and command-line client
//!
//! # Examples
//!
//! ```bash
//! # Start the HTTP server
//! parkd serve --bind 0.0.0.0 --port 8080
//!
//! # Lay out lot 1 with 10 car, 4 motorcycle and 2 van spaces
//! parkd lot init 1 --car 10 --motorcycle 4 --van 2
//!
//! # Park and release
//! parkd park 1 van
//! parkd unpark 1 3
//!
//! # Show counters and spaces
//! parkd lot status 1
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use parkd::config::{Settings, StorageBackend};
use parkd::engine::{ParkingEngine, Status};
use parkd::server::{start_server, ServerConfig};
use parkd::storage::JournalSpaceStore;
use parkd::{Capacities, LotId, VehicleType};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// parkd - typed parking space allocation
#[derive(Parser, Debug)]
#[command(name = "parkd")]
#[command(version = parkd::VERSION)]
#[command(about = "parkd - typed parking space allocation with an availability cache", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, short, global = true, env = "PARKD_CONFIG")]
    config: Option<PathBuf>,

    /// Storage backend, overrides the configuration file
    #[arg(long, global = true, value_enum)]
    backend: Option<Backend>,

    /// Data directory for the journal backend
    #[arg(long, global = true, env = "PARKD_DATA")]
    data_dir: Option<PathBuf>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "PARKD_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "PARKD_LOG_LEVEL")]
    log_level: String,

    /// Emit JSON log lines on stdout
    #[arg(long, global = true)]
    json_logs: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Backend {
    Memory,
    Journal,
}

impl From<Backend> for StorageBackend {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Memory => StorageBackend::Memory,
            Backend::Journal => StorageBackend::Journal,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve(ServeArgs),

    /// Lot management
    Lot {
        #[command(subcommand)]
        command: LotCommands,
    },

    /// Park a vehicle and print the assigned space
    Park {
        lot: u64,
        /// car, motorcycle or van
        vehicle_type: String,
    },

    /// Free a space (or the van group starting at it)
    Unpark { lot: u64, space: u32 },

    /// Rewrite the journal keeping only current state
    Compact,

    /// Print the effective configuration
    Config,

    /// Show version
    Version,
}

/// Server arguments, each overriding the configuration
#[derive(Args, Debug)]
struct ServeArgs {
    /// HTTP bind address
    #[arg(short, long, env = "PARKD_BIND")]
    bind: Option<String>,

    /// HTTP port
    #[arg(short, long, env = "PARKD_PORT")]
    port: Option<u16>,

    /// Disable CORS
    #[arg(long)]
    no_cors: bool,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

/// Space counts per vehicle type
#[derive(Args, Debug)]
struct CapacityArgs {
    #[arg(long, default_value = "0")]
    car: u32,

    #[arg(long, default_value = "0")]
    motorcycle: u32,

    #[arg(long, default_value = "0")]
    van: u32,
}

impl CapacityArgs {
    fn capacities(&self) -> Capacities {
        Capacities::default()
            .with(VehicleType::Car, self.car)
            .with(VehicleType::Motorcycle, self.motorcycle)
            .with(VehicleType::Van, self.van)
    }
}

#[derive(Subcommand, Debug)]
enum LotCommands {
    /// Create lot ID if needed and lay out fresh spaces
    Init {
        lot: u64,
        #[command(flatten)]
        capacities: CapacityArgs,
    },

    /// Create a named lot under a new id
    Create {
        name: String,
        #[command(flatten)]
        capacities: CapacityArgs,
    },

    /// Replace the spaces of an existing lot
    Reinit {
        lot: u64,
        #[command(flatten)]
        capacities: CapacityArgs,
    },

    /// Show counters and spaces
    Status {
        lot: u64,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Recompute the availability counters from the spaces
    Sync { lot: u64 },

    /// Compare cached counters against the spaces
    Verify { lot: u64 },

    /// List lots
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli)?;

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        settings.storage.backend = backend.into();
    }
    if let Some(data_dir) = cli.data_dir {
        settings.storage.data_dir = data_dir;
    }

    match cli.command {
        Commands::Serve(args) => serve_command(settings, args).await,
        Commands::Lot { command } => lot_command(&settings, command).await,
        Commands::Park { lot, vehicle_type } => {
            let engine = open_engine(&settings).await?;
            let vehicle_type: VehicleType = vehicle_type.parse()?;
            let space = engine.park(LotId::new(lot), vehicle_type).await?;
            println!("Parked {} in space {}", vehicle_type, space);
            Ok(())
        }
        Commands::Unpark { lot, space } => {
            let engine = open_engine(&settings).await?;
            let freed = engine.unpark(LotId::new(lot), space).await?;
            println!("Freed spaces {:?}", freed);
            Ok(())
        }
        Commands::Compact => {
            if settings.storage.backend != StorageBackend::Journal {
                warn!("Compaction only applies to the journal backend");
                return Ok(());
            }
            let store = JournalSpaceStore::open(&settings.storage.data_dir, settings.storage.fsync)?;
            store.compact()?;
            println!("Compacted {}", store.path().display());
            Ok(())
        }
        Commands::Config => {
            print!("{}", settings.to_toml()?);
            Ok(())
        }
        Commands::Version => {
            println!("parkd {}", parkd::VERSION);
            Ok(())
        }
    }
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<()> {
    std::fs::create_dir_all(&cli.log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "parkd.log");

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::registry()
        .with(cli.json_logs.then(|| fmt::layer().json().with_writer(std::io::stdout)))
        .with((!cli.json_logs).then(|| {
            fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(!cli.no_color)
        }))
        .with(fmt::layer().with_writer(file_appender).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(())
}

/// Open the configured store and warm the cache from it
async fn open_engine(settings: &Settings) -> anyhow::Result<ParkingEngine> {
    let engine = settings.open_engine()?;
    engine.warm_cache().await?;
    Ok(engine)
}

/// Serve command - start the HTTP server
async fn serve_command(mut settings: Settings, args: ServeArgs) -> anyhow::Result<()> {
    info!(version = %parkd::VERSION, "parkd starting");

    if let Some(bind) = args.bind {
        settings.server.bind = bind;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if args.no_cors {
        settings.server.cors = false;
    }
    if let Some(timeout) = args.timeout {
        settings.server.timeout_secs = timeout;
    }

    if settings.storage.backend == StorageBackend::Memory {
        warn!("Memory backend selected, lots are lost on exit");
    }

    let engine = Arc::new(settings.open_engine()?);
    info!(backend = ?settings.storage.backend, data_dir = %settings.storage.data_dir.display(), "Storage opened");

    start_server(ServerConfig::from(settings.server), engine).await
}

async fn lot_command(settings: &Settings, command: LotCommands) -> anyhow::Result<()> {
    let engine = open_engine(settings).await?;

    match command {
        LotCommands::Init { lot, capacities } => {
            let lot = engine
                .initialize_lot(LotId::new(lot), &capacities.capacities())
                .await?;
            println!("Initialized lot {}", lot.id);
        }
        LotCommands::Create { name, capacities } => {
            let lot = engine
                .create_lot(Some(name), &capacities.capacities())
                .await?;
            println!("Created lot {}", lot.id);
        }
        LotCommands::Reinit { lot, capacities } => {
            let lot = engine
                .reinitialize_lot(LotId::new(lot), &capacities.capacities())
                .await?;
            println!("Reinitialized lot {}", lot.id);
        }
        LotCommands::Status { lot, json } => {
            let status = engine.status(LotId::new(lot)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
        }
        LotCommands::Sync { lot } => {
            let counters = engine.sync_cache(LotId::new(lot)).await?;
            println!(
                "Synchronized lot {}: {}/{} available",
                lot, counters.lot.available, counters.lot.total
            );
        }
        LotCommands::Verify { lot } => {
            let drift = engine.verify_cache(LotId::new(lot)).await?;
            if drift.is_consistent() {
                println!("Lot {} cache is consistent", lot);
            } else {
                println!("Lot {} cache drift:", lot);
                println!("  cached: {:?}", drift.cached);
                println!("  actual: {:?}", drift.actual);
            }
        }
        LotCommands::List => {
            for lot in engine.list_lots().await? {
                println!(
                    "{:>6}  {:<24}  {}",
                    lot.id,
                    lot.name.as_deref().unwrap_or("-"),
                    lot.created_at.to_rfc3339()
                );
            }
        }
    }

    Ok(())
}

fn print_status(status: &Status) {
    println!(
        "Lot {} {}",
        status.lot,
        status.name.as_deref().unwrap_or("")
    );
    println!(
        "  {:<12} {:>5}/{:<5}",
        "all", status.capacity.available, status.capacity.total
    );
    for (vehicle_type, counters) in &status.capacity_by_type {
        println!(
            "  {:<12} {:>5}/{:<5}",
            vehicle_type.as_str(),
            counters.available,
            counters.total
        );
    }
    println!();
    for space in &status.spaces {
        let occupant = space.occupant.map(|t| t.as_str()).unwrap_or("-");
        println!(
            "  {:>5}  {:<12} {}",
            space.space_number,
            space.designated.as_str(),
            occupant
        );
    }
}
