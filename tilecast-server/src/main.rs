//! tilecast daemon — entry point.
//!
//! ```text
//! tilecast-server                  Run the stream daemon (video mode)
//! tilecast-server --show <key>     Also display one image at startup
//! tilecast-server --config <path>  Load a custom config TOML
//! tilecast-server --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tilecast_core::session::{PaletteQuantizer, RecipientDirectory};
use tilecast_core::telemetry::DispatchTelemetry;
use tilecast_core::types::SurfaceId;
use tilecast_core::{
    CaptureServer, MessageSchema, PacketDispatcher, PacketSynthesizer, RasterCache,
    SessionContext, SessionRuntime, SurfacePool,
};
use tilecast_server::config::ServerConfig;
use tilecast_server::resolver::{BasePaletteQuantizer, DirImageResolver};
use tilecast_server::viewer::ViewerRegistry;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tilecast-server", about = "tilecast display streaming daemon")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tilecast.toml")]
    config: PathBuf,

    /// Display this image key once at startup (still mode).
    #[arg(long)]
    show: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let config = ServerConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("tilecast-server v{}", env!("CARGO_PKG_VERSION"));
    info!("stream UDP port: {}", config.network.stream_port);
    info!("viewer TCP port: {}", config.network.viewer_port);
    info!("image dir: {}", config.display.image_dir);

    // Viewer fan-out.
    let registry = Arc::new(ViewerRegistry::new());
    registry.start(config.network.viewer_port).await?;

    // Surface allocation.
    let pool = SurfacePool::new(config.surfaces.pool.iter().copied().map(SurfaceId::new));
    let surface = pool.allocate()?;
    info!(surface = %surface, "surface allocated");

    // Pipeline wiring.
    let synthesizer = Arc::new(PacketSynthesizer::new(MessageSchema::modern()));
    let dispatcher = Arc::new(PacketDispatcher::new(Arc::new(DispatchTelemetry::new())));
    let quantizer = Arc::new(BasePaletteQuantizer);
    let ctx = Arc::new(SessionContext {
        cache: Arc::new(RasterCache::new()),
        synthesizer: synthesizer.clone(),
        dispatcher: dispatcher.clone(),
        resolver: Arc::new(DirImageResolver::new(&config.display.image_dir)),
        quantizer: quantizer.clone(),
        directory: registry.clone(),
    });
    let mut session = SessionRuntime::new(surface, ctx);

    // Still mode: one session pass for the requested key.
    if let Some(key) = &cli.show {
        session.run_once(key.clone()).await;
        session.join().await;
    }

    // Video mode: every decoded stream frame goes straight to the
    // viewers from the frame callback.
    let mut capture = CaptureServer::new(config.network.stream_port);
    {
        let synthesizer = synthesizer.clone();
        let dispatcher = dispatcher.clone();
        let registry = registry.clone();
        capture.on_frame(move |frame| {
            let synthesizer = synthesizer.clone();
            let dispatcher = dispatcher.clone();
            let registry = registry.clone();
            let quantizer = quantizer.clone();
            async move {
                let raster = quantizer.quantize(&frame);
                match synthesizer.build(surface, &raster) {
                    Ok(built) => {
                        let recipients = registry.recipients().await;
                        dispatcher.send(&recipients, &[built.message]).await;
                    }
                    Err(e) => warn!(error = %e, "frame synthesis failed"),
                }
            }
        });
    }
    capture.start().await?;

    // Ctrl-C shutdown.
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");

    capture.stop().await;
    session.stop().await;
    registry.stop().await;
    if let Err(e) = pool.release(surface) {
        warn!(error = %e, "surface release failed");
    }
    info!("shutdown complete");

    Ok(())
}
