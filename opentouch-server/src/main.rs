//! OpenTouch server — entry point.
//!
//! ```text
//! opentouch                      Start with defaults (port 8000, 30 fps)
//! opentouch --port 9000          Use port 9000 (or the next free one)
//! opentouch --fps 60 -q 0.9      High-performance mode
//! opentouch --monitor 1          Capture the second monitor
//! opentouch --config <path>      Load a custom config TOML
//! opentouch --gen-config         Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use opentouch_core::{DxgiCapturer, InputInjector, JpegEncoder, SessionHub, enable_dpi_awareness};
use opentouch_server::config::ServerConfig;
use opentouch_server::net;
use opentouch_server::service::WsServer;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "opentouch",
    version,
    about = "Mirror this desktop to a browser and control it remotely"
)]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "opentouch.toml")]
    config: PathBuf,

    /// Server port; the next free port is used if it is taken.
    #[arg(short, long)]
    port: Option<u16>,

    /// Target frames per second.
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(10..=60))]
    fps: Option<u32>,

    /// Base JPEG quality, 0.1-1.0.
    #[arg(short, long)]
    quality: Option<f64>,

    /// Monitor index to capture (0 = primary).
    #[arg(short, long)]
    monitor: Option<u32>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

impl Cli {
    /// Command-line flags take precedence over the config file.
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(host) = &self.host {
            config.network.host = host.clone();
        }
        if let Some(fps) = self.fps {
            config.screen.fps = fps;
        }
        if let Some(quality) = self.quality {
            config.quality.base = quality.clamp(0.1, 1.0);
        }
        if let Some(monitor) = self.monitor {
            config.screen.monitor_index = monitor;
        }
        if self.verbose {
            config.logging.level = "debug".into();
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", ServerConfig::default_toml()?);
        return Ok(());
    }

    let loaded = ServerConfig::load(&cli.config);
    let mut config = match &loaded {
        Ok(Some(config)) => config.clone(),
        _ => ServerConfig::default(),
    };
    cli.apply(&mut config);

    // Init tracing. --verbose beats RUST_LOG, which beats the config file.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("opentouch v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Ok(Some(_)) => info!("config: {}", cli.config.display()),
        Ok(None) => info!("no config at {}; using defaults", cli.config.display()),
        Err(e) => warn!("{e}; using defaults"),
    }

    // Before DXGI sees the outputs, so sizes are in physical pixels.
    enable_dpi_awareness();

    info!("target FPS: {}", config.fps());
    info!("base quality: {:.2}", config.quality.base);
    info!("monitor: {}", config.screen.monitor_index);
    info!(
        "change detection: {} (threshold {}, skip cap {})",
        config.screen.change_detection, config.screen.change_threshold, config.screen.skip_cap
    );

    let listener = net::bind_with_fallback(
        &config.network.host,
        config.network.port,
        config.network.port_scan_attempts,
    )
    .await?;
    let port = listener.local_addr()?.port();
    info!("open on the remote device: http://{}:{port}", net::local_ip());

    let hub = SessionHub::new(
        config.to_hub_config(),
        DxgiCapturer::factory(config.screen.monitor_index),
        Arc::new(JpegEncoder::new()),
        Arc::new(InputInjector::new()),
        Handle::current(),
    );
    let server = WsServer::new(hub, config.probe_interval());
    let stop = server.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    server.run(listener).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from(["opentouch", "-p", "9000", "-f", "60", "-q", "3.0", "-m", "1", "-v"]);
        let mut config = ServerConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.network.port, 9000);
        assert_eq!(config.screen.fps, 60);
        assert_eq!(config.quality.base, 1.0);
        assert_eq!(config.screen.monitor_index, 1);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn fps_outside_range_is_rejected() {
        assert!(Cli::try_parse_from(["opentouch", "--fps", "5"]).is_err());
        assert!(Cli::try_parse_from(["opentouch", "--fps", "61"]).is_err());
    }

    #[test]
    fn no_flags_keep_config() {
        let cli = Cli::parse_from(["opentouch"]);
        let mut config = ServerConfig::default();
        config.network.port = 1234;
        cli.apply(&mut config);
        assert_eq!(config.network.port, 1234);
        assert_eq!(cli.config, PathBuf::from("opentouch.toml"));
    }
}
