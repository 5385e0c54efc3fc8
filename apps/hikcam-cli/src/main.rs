//! hikcam CLI
//!
//! Logs in to a Hikvision camera or NVR, optionally grabs a JPEG still, then
//! records the live stream (system header followed by body chunks) to a file
//! until Ctrl-C.
//!
//! ## Usage
//!
//! ```bash
//! export HIKCAM_ADDRESS=192.168.1.64
//! export HIKCAM_PASSWORD=<password>
//!
//! # Record the main stream to hikcam.ps
//! hikcam
//!
//! # Sub stream, plus a snapshot written next to the recording
//! hikcam --sub-stream --snapshot
//!
//! # No hardware: in-memory device
//! hikcam --mock
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use hikcam::{
    frame_channel, Credentials, DeviceSession, SdkConfig, SdkRuntime, StreamVariant, DEFAULT_PORT,
};

#[cfg(feature = "mock-sdk")]
use hikcam::sdk::mock::{FeedConfig, MockSdk};

/// Interval between stream statistics log lines
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Frames buffered between the SDK delivery thread and the file writer
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// CLI configuration from environment/args
struct Config {
    /// Device IP address or hostname
    address: String,
    /// Device SDK port
    port: u16,
    username: String,
    password: String,
    /// HCNetSDK library path (platform default name if unset)
    sdk_path: Option<PathBuf>,
    /// Recording destination
    output: PathBuf,
    /// Capture a JPEG still before streaming
    snapshot: bool,
    /// Request the sub stream instead of the main stream
    sub_stream: bool,
    /// Use the in-memory device instead of HCNetSDK
    mock: bool,
}

impl Config {
    fn from_env() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mock = args.iter().any(|arg| arg == "--mock");
        let snapshot = args.iter().any(|arg| arg == "--snapshot");
        let sub_stream = args.iter().any(|arg| arg == "--sub-stream");

        // The mock device accepts anything, so only real devices need these
        let address = std::env::var("HIKCAM_ADDRESS")
            .or_else(|e| if mock { Ok("127.0.0.1".into()) } else { Err(e) })
            .context("HIKCAM_ADDRESS environment variable not set")?;
        let password = std::env::var("HIKCAM_PASSWORD")
            .or_else(|e| if mock { Ok(String::new()) } else { Err(e) })
            .context("HIKCAM_PASSWORD environment variable not set")?;

        let username = std::env::var("HIKCAM_USER").unwrap_or_else(|_| "admin".into());

        let port = match std::env::var("HIKCAM_PORT") {
            Ok(port) => port.parse().context("Invalid HIKCAM_PORT")?,
            Err(_) => DEFAULT_PORT,
        };

        let sdk_path = std::env::var("HIKCAM_SDK_PATH").ok().map(PathBuf::from);

        let output = std::env::var("HIKCAM_OUTPUT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("hikcam.ps"));

        Ok(Self {
            address,
            port,
            username,
            password,
            sdk_path,
            output,
            snapshot,
            sub_stream,
            mock,
        })
    }

    fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password, &self.address).with_port(self.port)
    }
}

/// Initialised SDK, plus the mock device when running without hardware.
struct Backend {
    runtime: Arc<SdkRuntime>,
    #[cfg(feature = "mock-sdk")]
    mock: Option<Arc<MockSdk>>,
}

fn open_backend(config: &Config) -> Result<Backend> {
    if config.mock {
        #[cfg(feature = "mock-sdk")]
        {
            info!("Using in-memory mock device");
            let mock = Arc::new(MockSdk::new());
            let runtime = SdkRuntime::init(mock.clone()).context("Failed to initialise mock SDK")?;
            return Ok(Backend {
                runtime,
                mock: Some(mock),
            });
        }
        #[cfg(not(feature = "mock-sdk"))]
        {
            anyhow::bail!("Mock device not enabled. Rebuild with --features mock-sdk");
        }
    }

    let runtime = SdkRuntime::load(config.sdk_path.as_deref(), SdkConfig::default())
        .context("Failed to load HCNetSDK")?;
    Ok(Backend {
        runtime,
        #[cfg(feature = "mock-sdk")]
        mock: None,
    })
}

/// Run a blocking session operation off the async runtime.
async fn with_session<T, F>(session: &Arc<Mutex<DeviceSession>>, op: F) -> Result<T>
where
    F: FnOnce(&mut DeviceSession) -> hikcam::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let session = Arc::clone(session);
    tokio::task::spawn_blocking(move || {
        let mut guard = session
            .lock()
            .map_err(|_| anyhow!("Session lock poisoned"))?;
        op(&mut guard).map_err(anyhow::Error::from)
    })
    .await?
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hikcam=info".parse().unwrap()),
        )
        .init();

    let config = Config::from_env()?;
    let variant = StreamVariant::from_sub_stream(config.sub_stream);

    info!("hikcam starting");
    info!("  Device: {}:{} as {}", config.address, config.port, config.username);
    info!("  Stream: {}", variant);
    info!("  Output: {}", config.output.display());
    info!("  Mock device: {}", config.mock);

    let backend = open_backend(&config)?;
    let session = Arc::new(Mutex::new(DeviceSession::new(
        Arc::clone(&backend.runtime),
        config.credentials(),
    )));

    with_session(&session, |s| s.login())
        .await
        .with_context(|| format!("Failed to log in to {}", config.address))?;

    if config.snapshot {
        let path = config.output.with_extension("jpg");
        match with_session(&session, |s| s.capture_jpeg()).await {
            Ok(jpeg) => {
                tokio::fs::write(&path, &jpeg)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Snapshot saved to {} ({} bytes)", path.display(), jpeg.len());
            }
            Err(e) => warn!("Snapshot failed: {:#}. Continuing with live stream.", e),
        }
    }

    let (consumer, mut rx) = frame_channel(FRAME_CHANNEL_CAPACITY);
    let handle = with_session(&session, move |s| s.start_stream_with(consumer, variant))
        .await
        .context("Failed to start live stream")?;

    #[cfg(feature = "mock-sdk")]
    let feed = backend
        .mock
        .as_ref()
        .map(|mock| mock.start_feed(handle, FeedConfig::default()));
    #[cfg(not(feature = "mock-sdk"))]
    let _ = handle;

    let mut file = tokio::fs::File::create(&config.output)
        .await
        .with_context(|| format!("Failed to create {}", config.output.display()))?;

    let mut stats_tick = tokio::time::interval(STATS_INTERVAL);
    stats_tick.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut written = 0u64;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, stopping");
                break;
            }
            packet = rx.recv() => {
                let Some(packet) = packet else {
                    warn!("Live stream ended");
                    break;
                };
                if packet.is_header() {
                    info!("Stream header received ({} bytes)", packet.len());
                }
                file.write_all(&packet.payload)
                    .await
                    .context("Failed to write stream data")?;
                written += packet.len() as u64;
            }
            _ = stats_tick.tick() => {
                let stats = session.lock().ok().and_then(|s| s.stream_stats());
                if let Some(stats) = stats {
                    info!(
                        "Stats: {} headers, {} bodies, {} bytes received, {} bytes written, {} dropped",
                        stats.headers,
                        stats.bodies,
                        stats.bytes,
                        written,
                        stats.empty + stats.unknown
                    );
                }
            }
        }
    }

    file.flush().await.context("Failed to flush output")?;

    // Unblock a delivery thread waiting on a full channel before stopping
    drop(rx);

    with_session(&session, |s| {
        s.logout();
        Ok(())
    })
    .await?;

    #[cfg(feature = "mock-sdk")]
    {
        if let Some(feed) = feed {
            let chunks = tokio::task::spawn_blocking(move || feed.stop()).await?;
            info!("Mock feed delivered {} chunks", chunks);
        }
    }

    backend.runtime.shutdown();
    info!("Wrote {} bytes to {}", written, config.output.display());
    Ok(())
}
