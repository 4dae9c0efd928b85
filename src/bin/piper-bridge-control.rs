//! piper-bridge-control - CLI client for a running piper-bridge
//!
//! Checks bridge health and fetches synthesized speech as WAV files.

use clap::{Parser, Subcommand};
use piper_bridge::server::HealthResponse;
use reqwest::blocking::{Client, Response};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;

/// CLI client for the piper-bridge HTTP server
#[derive(Parser)]
#[command(name = "piper-bridge-control")]
#[command(version)]
#[command(about = "Talk to a running piper-bridge", long_about = None)]
struct Cli {
    /// Base URL of the bridge
    #[arg(long, env = "PIPER_BRIDGE_URL", default_value = "http://127.0.0.1:8089")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show bridge health and voice configuration
    Health,

    /// Synthesize text to a WAV file
    Say {
        /// Text to speak
        text: String,
        /// Where to write the audio
        #[arg(short, long, default_value = "speech.wav")]
        output: PathBuf,
        /// Send the text as a JSON body instead of a query parameter
        #[arg(long)]
        post: bool,
    },
}

/// Passes successful responses through; prints anything else and yields `None`.
fn check(resp: Response) -> Result<Option<Response>, Box<dyn std::error::Error>> {
    if resp.status().is_success() {
        return Ok(Some(resp));
    }
    let status = resp.status();
    let body = resp.text()?;
    eprintln!("Bridge returned {}: {}", status, body.trim());
    Ok(None)
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Health => {
            let Some(resp) = check(client.get(format!("{}/health", base)).send()?)? else {
                return Ok(ExitCode::FAILURE);
            };
            let health: HealthResponse = resp.json()?;

            println!("Piper Bridge Health");
            println!("───────────────────");
            println!("Model found:  {}", if health.ok { "Yes" } else { "No" });
            println!("Model:        {}", health.model);
            println!("Sample rate:  {} Hz", health.rate);
            println!("Binary:       {}", health.bin);

            if !health.ok {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Say { text, output, post } => {
            let url = format!("{}/tts", base);
            let request = if post {
                client.post(&url).json(&json!({ "text": text }))
            } else {
                client.get(&url).query(&[("text", &text)])
            };

            let Some(resp) = check(request.send()?)? else {
                return Ok(ExitCode::FAILURE);
            };
            let audio = resp.bytes()?;
            std::fs::write(&output, &audio)?;
            println!("Wrote {} bytes to {}", audio.len(), output.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}
