use ayaneo_platform::*;
use clap::Parser;
use color_eyre::eyre::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Line protocol front end for the LED and charge controls.
///
/// Reads one command per line on stdin and answers `OK`, `ERR <reason>` or
/// a status line.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Use the recording bus instead of hardware
    #[arg(long)]
    dry_run: bool,

    /// Board vendor to use instead of the DMI value
    #[arg(long, requires = "board_name")]
    board_vendor: Option<String>,

    /// Board name to use instead of the DMI value
    #[arg(long, requires = "board_vendor")]
    board_name: Option<String>,

    /// Initial suspend mode (oem, keep, off)
    #[arg(long, default_value_t = SuspendMode::Oem)]
    suspend_mode: SuspendMode,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new("ayaneo_platform=info")),
        )
        .compact()
        .with_writer(std::io::stderr)
        .init();

    color_eyre::install()?;

    let args = Args::parse();
    let board = match (args.board_vendor, args.board_name) {
        (Some(vendor), Some(name)) => BoardIdentity::new(vendor, name),
        _ => BoardIdentity::from_sysfs()?,
    };
    let bus: Arc<dyn EcBus> = if args.dry_run {
        Arc::new(MockBus::new())
    } else {
        Arc::new(DevPortBus::open()?)
    };
    let config = PlatformConfig {
        suspend_mode: args.suspend_mode,
        ..PlatformConfig::default()
    };

    let platform = Platform::probe(&board, bus, config).await?;
    println!("OK");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else { break };

        debug!("Command: {}", line.trim());
        match handle(&platform, line.trim()).await {
            Ok(Reply::Ok) => println!("OK"),
            Ok(Reply::Text(text)) => println!("{text}"),
            Ok(Reply::Exit) => {
                println!("OK");
                return Ok(());
            }
            Err(e) => {
                warn!("{}", e);
                println!("ERR {e}");
            }
        }
    }

    platform.shutdown().await?;
    Ok(())
}

enum Reply {
    Ok,
    Text(String),
    Exit,
}

async fn handle(platform: &Platform, line: &str) -> std::result::Result<Reply, String> {
    let (command, value) = match line.split_once(':') {
        Some((command, value)) => (command, Some(value.trim())),
        None => (line, None),
    };
    let required = || value.ok_or_else(|| format!("{command} needs a value"));

    match command {
        "brightness" => {
            let brightness: u8 = required()?
                .parse()
                .map_err(|_| "brightness must be between 0 and 255".to_string())?;
            platform.led().set_brightness(brightness);
        }
        "multi_intensity" => {
            let channels = required()?
                .split(',')
                .map(|s| s.trim().parse::<u8>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| "intensities must be between 0 and 255".to_string())?;
            let intensity: [u8; 3] = channels
                .try_into()
                .map_err(|_| "use R,G,B (e.g. 255,0,0 for red)".to_string())?;
            platform.led().set_multi_intensity(intensity);
        }
        "suspend_mode" => match value {
            Some(text) => {
                platform
                    .set_suspend_mode_str(text)
                    .map_err(|e| e.to_string())?;
            }
            None => return Ok(Reply::Text(platform.suspend_mode_listing())),
        },
        "charge_behaviour" => match value {
            Some(text) => {
                platform.charge().set_str(text).map_err(|e| e.to_string())?;
            }
            None => return Ok(Reply::Text(platform.charge().get().to_string())),
        },
        "suspend" => platform.suspend().await.map_err(|e| e.to_string())?,
        "resume" => platform.resume().await.map_err(|e| e.to_string())?,
        "shutdown" => {
            platform.shutdown().await.map_err(|e| e.to_string())?;
            return Ok(Reply::Exit);
        }
        "status" => return Ok(Reply::Text(status(platform))),
        "" => return Err("no command given".to_string()),
        other => return Err(format!("unknown command: {other}")),
    }

    Ok(Reply::Ok)
}

fn status(platform: &Platform) -> String {
    let led = platform.led();
    let [r, g, b] = led.multi_intensity();
    format!(
        "model={} control={:?} brightness={} multi_intensity={},{},{} pending={} suspend_mode={} charge_behaviour={} bypass={}",
        platform.model(),
        platform.control_state(),
        led.brightness(),
        r,
        g,
        b,
        platform.pending_updates(),
        platform.suspend_mode(),
        platform.charge().get(),
        if platform.bypass_available() { "available" } else { "unavailable" },
    )
}
