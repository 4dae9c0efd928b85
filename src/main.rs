use clap::Parser;
use piper_bridge::backends::piper::PiperBackend;
use piper_bridge::backends::SpeechBackend;
use piper_bridge::config_loader::{BridgeConfig, Settings};
use piper_bridge::logging::{self, LogFormat};
use piper_bridge::server::{self, AppState};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Serve Piper text-to-speech as WAV over HTTP
#[derive(Debug, Parser)]
#[command(name = "piper-bridge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Extra settings file, layered over Bridge.* and under the environment
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides BIND_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format: text or json
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Before argument parsing, so `.env` can feed env-backed flags too.
    let dotenv = dotenvy::dotenv();

    let args = Args::parse();
    logging::init_logging(&args.log_level, args.log_format);

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let mut settings = Settings::load_or_default(args.config.as_deref());
    if let Some(host) = args.host {
        settings.bind_host = host;
    }
    if let Some(port) = args.port {
        settings.port = port;
    }

    let config = BridgeConfig::from_settings(settings);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        bin = %config.piper_bin,
        model = %config.model_path.display(),
        rate = config.sample_rate,
        origin = %config.allow_origin,
        timeout_secs = config.synth_timeout.as_secs(),
        max_concurrent = config.max_concurrent_synth,
        "Resolved configuration"
    );
    if !config.model_exists() {
        warn!(model = %config.model_path.display(), "Voice model not found; synthesis will fail until it is installed");
    }

    let backend: Arc<dyn SpeechBackend> = Arc::new(PiperBackend::from_config(&config));
    let addr = config.bind_addr();
    let state = AppState::new(config, backend);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Piper bridge listening");

    server::serve_on(listener, state, server::shutdown_signal()).await?;

    info!("Server shutdown complete");
    Ok(())
}
