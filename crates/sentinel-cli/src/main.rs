use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use sentinel_hw::{frame, Camera};
use std::path::PathBuf;
use zbus::{proxy, Connection};

#[proxy(
    interface = "org.sentinel.Sentinel1",
    default_service = "org.sentinel.Sentinel1",
    default_path = "/org/sentinel/Sentinel1"
)]
trait Sentinel {
    fn start(&self, camera_index: u32) -> zbus::Result<(bool, String)>;
    fn stop(&self) -> zbus::Result<bool>;
    fn enroll(&self, identity_id: &str, name: &str, image_path: &str) -> zbus::Result<bool>;
    fn remove_identity(&self, identity_id: &str) -> zbus::Result<bool>;
    fn list_watchlist(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;

    #[zbus(signal)]
    fn alert(&self, name: &str, confidence: f64, timestamp: &str) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "sentinel", about = "Sentinel face watchlist CLI")]
struct Cli {
    /// Talk to the daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll an identity from a face image
    Enroll {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// Image containing the face (the largest-confidence face is used)
        #[arg(long)]
        image: PathBuf,
    },
    /// Start scanning
    Start {
        /// Camera index (daemon default when omitted)
        #[arg(short, long)]
        camera: Option<u32>,
    },
    /// Stop scanning
    Stop,
    /// Show daemon status
    Status,
    /// List watchlist identities
    List,
    /// Remove an identity from the watchlist
    Remove {
        /// Identity ID to remove
        id: String,
    },
    /// Print alerts as they arrive
    Watch,
    /// Run camera diagnostics (bypasses the daemon)
    Test {
        /// Camera index to open
        #[arg(short, long, default_value_t = 0)]
        camera: u32,
        /// Save the captured frame as an image
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Test { camera, save } => run_camera_test(camera, save)?,
        Commands::Enroll { id, name, image } => {
            let proxy = connect(cli.session).await?;
            let path = std::fs::canonicalize(&image)
                .with_context(|| format!("cannot resolve {}", image.display()))?;
            let inserted = proxy.enroll(&id, &name, &path.to_string_lossy()).await?;
            if inserted {
                println!("Enrolled {name} ({id})");
            } else {
                println!("Updated {name} ({id})");
            }
        }
        Commands::Start { camera } => {
            let proxy = connect(cli.session).await?;
            let index = match camera {
                Some(index) => index,
                None => default_camera(&proxy).await?,
            };
            let (ok, message) = proxy.start(index).await?;
            if !ok {
                bail!("start failed: {message}");
            }
            println!("{message}");
        }
        Commands::Stop => {
            let proxy = connect(cli.session).await?;
            if proxy.stop().await? {
                println!("Scanning stopped");
            } else {
                println!("Scanning was not active");
            }
        }
        Commands::Status => {
            let proxy = connect(cli.session).await?;
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::List => {
            let proxy = connect(cli.session).await?;
            let items: Vec<serde_json::Value> = serde_json::from_str(&proxy.list_watchlist().await?)?;
            if items.is_empty() {
                println!("Watchlist is empty");
            }
            for item in items {
                println!(
                    "{:<20} {}",
                    item["identity_id"].as_str().unwrap_or("?"),
                    item["name"].as_str().unwrap_or("?")
                );
            }
        }
        Commands::Remove { id } => {
            let proxy = connect(cli.session).await?;
            if proxy.remove_identity(&id).await? {
                println!("Removed {id}");
            } else {
                bail!("no identity with id {id}");
            }
        }
        Commands::Watch => {
            let proxy = connect(cli.session).await?;
            let mut alerts = proxy.receive_alert().await?;
            println!("Waiting for alerts (Ctrl-C to quit)...");
            while let Some(signal) = alerts.next().await {
                let args = signal.args()?;
                println!(
                    "[{}] {} ({:.2}%)",
                    args.timestamp(),
                    args.name(),
                    args.confidence()
                );
            }
        }
    }

    Ok(())
}

async fn connect(session_bus: bool) -> Result<SentinelProxy<'static>> {
    let conn = if session_bus {
        Connection::session().await
    } else {
        Connection::system().await
    }
    .context("cannot connect to D-Bus")?;
    SentinelProxy::new(&conn)
        .await
        .context("cannot reach sentineld")
}

/// The daemon's configured default camera index.
async fn default_camera(proxy: &SentinelProxy<'_>) -> Result<u32> {
    let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
    let index = status["default_camera"]
        .as_u64()
        .context("daemon status has no default_camera")?;
    Ok(u32::try_from(index)?)
}

fn run_camera_test(index: u32, save: Option<PathBuf>) -> Result<()> {
    println!("Video capture devices:");
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("  (none found)");
    }
    for dev in &devices {
        println!("  [{}] {}  {} ({}, {})", dev.index, dev.path, dev.name, dev.driver, dev.bus);
    }

    let mut camera = Camera::open_index(index)?;
    println!(
        "Opened {} at {}x{} ({})",
        camera.device_path, camera.width, camera.height, camera.fourcc
    );

    let captured = camera.capture_frame()?;
    let brightness = captured.avg_brightness();
    println!("Captured frame #{}: avg brightness {brightness:.1}", captured.sequence);
    if frame::is_dark_frame(&captured.data, 0.95) {
        println!("Warning: frame is almost entirely dark");
    }

    if let Some(path) = save {
        let image = image::GrayImage::from_raw(captured.width, captured.height, captured.data)
            .context("frame buffer does not match its dimensions")?;
        image.save(&path)?;
        println!("Saved frame to {}", path.display());
    }
    Ok(())
}
