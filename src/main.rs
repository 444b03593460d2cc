use ayaneo_platform::*;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, Result};
use std::sync::Arc;
use tokio::time::{self, Duration};
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Record bus operations instead of touching hardware and print them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Board vendor to use instead of the DMI value
    #[arg(long, global = true, requires = "board_name")]
    board_vendor: Option<String>,

    /// Board name to use instead of the DMI value
    #[arg(long, global = true, requires = "board_vendor")]
    board_name: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the detected board and model
    Identify,
    /// Set a static color
    Color {
        /// Red value (0-255)
        #[arg(short, long, default_value_t = 255)]
        red: u8,
        /// Green value (0-255)
        #[arg(short, long, default_value_t = 255)]
        green: u8,
        /// Blue value (0-255)
        #[arg(short, long, default_value_t = 255)]
        blue: u8,
        /// Brightness (0-255)
        #[arg(short = 'B', long, default_value_t = 255)]
        brightness: u8,
    },
    /// Take control and turn the LEDs off
    Off,
    /// Hand the LEDs back to firmware
    Release,
    /// Set the bypass charge behaviour
    Charge {
        /// auto or inhibit-charge
        behavior: ChargeBehavior,
    },
    /// Print the protocol entry of the detected model
    Table,
}

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("ayaneo_platform=info")),
        )
        .compact()
        .init();

    color_eyre::install()?;

    let cli = Cli::parse();
    debug!("Parsed command line arguments");

    let board = match (cli.board_vendor, cli.board_name) {
        (Some(vendor), Some(name)) => BoardIdentity::new(vendor, name),
        _ => BoardIdentity::from_sysfs()?,
    };

    let mut config = PlatformConfig::default();
    let mock = Arc::new(MockBus::new());
    let bus: Arc<dyn EcBus> = if cli.dry_run {
        mock.clone()
    } else {
        Arc::new(DevPortBus::open()?)
    };

    match cli.command {
        Commands::Identify => {
            let model = Model::from_board(&board)?;
            println!("{} {}: {}", board.vendor, board.name, model);
            return Ok(());
        }
        Commands::Table => {
            let model = Model::from_board(&board)?;
            if let Some(entry) = protocol::lookup(model) {
                println!("{:#?}", entry);
            }
            return Ok(());
        }
        Commands::Color {
            red,
            green,
            blue,
            brightness,
        } => {
            let platform = Platform::probe(&board, bus, config).await?;
            platform.led().set_multi_intensity([red, green, blue]);
            platform.led().set_brightness(brightness);
            platform.flush().await;
            platform.detach().await?;
            info!("Color set to {}", Rgb::new(red, green, blue));
        }
        Commands::Off => {
            // probing already leaves the outputs off
            let platform = Platform::probe(&board, bus, config).await?;
            platform.detach().await?;
        }
        Commands::Release => {
            let platform = Platform::probe(&board, bus, config).await?;
            platform.shutdown().await?;
        }
        Commands::Charge { behavior } => {
            config.charge_behavior = behavior;
            let platform = Platform::probe(&board, bus, config).await?;
            if !platform.bypass_available() {
                platform.detach().await?;
                bail!("Bypass charging is not available on this board");
            }
            wait_for_charge(&platform, behavior).await;
            platform.detach().await?;
        }
    }

    if cli.dry_run {
        for op in mock.ops() {
            println!("{}", op);
        }
    }

    Ok(())
}

/// Waits for the charge task to write `behavior`, giving up after a few
/// lock timeouts
async fn wait_for_charge(platform: &Platform, behavior: ChargeBehavior) {
    let deadline = platform.config().lock_timeout * 4;
    let applied = time::timeout(deadline, async {
        while platform.charge().applied() != Some(behavior) {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    match applied {
        Ok(()) => info!("Charge behaviour set to {}", behavior),
        Err(_) => warn!("Charge behaviour {} not applied within {:?}", behavior, deadline),
    }
}
