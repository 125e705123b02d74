//! Takion headless client: entry point.
//!
//! ```text
//! takion-client                    Connect with takion-client.toml
//! takion-client --config <path>    Use custom config TOML
//! takion-client --host <addr>      Override the console address
//! takion-client --pin <pin>        Login PIN for the first prompt
//! takion-client --gen-config       Dump default config and exit
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use takion_core::{Session, SessionEvent, SessionHandle};
use takion_client::config::ClientConfig;
use takion_client::sinks::{CountingSink, SilentEncoder};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "takion-client", about = "Headless Takion streaming client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "takion-client.toml")]
    config: PathBuf,

    /// Console address (overrides config). Example: 192.168.1.50, 192.168.1.50:9296 or [fe80::1]:9296
    #[arg(long)]
    host: Option<String>,

    /// Login PIN used when the console first asks for one.
    #[arg(long)]
    pin: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        println!("{}", ClientConfig::default_toml()?);
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(host) = &cli.host {
        config.set_host(host);
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("takion-client v{}", env!("CARGO_PKG_VERSION"));

    let connect_info = match config.to_connect_info() {
        Ok(info) => info,
        Err(e) => {
            error!("invalid configuration: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };
    info!(
        host = %connect_info.host,
        generation = %connect_info.generation,
        profile = %connect_info.video_profile,
        "connecting"
    );

    let video = Arc::new(CountingSink::new("video"));
    let audio = Arc::new(CountingSink::new("audio"));
    let (handle, mut events) = Session::start(
        connect_info,
        video.clone(),
        audio.clone(),
        Box::new(SilentEncoder::default()),
    );
    let handle = Arc::new(handle);

    // Ctrl-C stops the session; teardown still reports Disconnected.
    let ctrl_c_handle = Arc::clone(&handle);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping session");
            ctrl_c_handle.stop();
        }
    });

    let mut pin = cli.pin;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut failed = false;

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::LoginPinRequested { incorrect } => {
                if incorrect {
                    warn!("console rejected the login PIN");
                }
                let answer = match pin.take() {
                    Some(p) => Some(p),
                    None => prompt_pin(&mut stdin).await,
                };
                submit_pin(&handle, answer);
            }
            SessionEvent::AudioFormat { channels, rate } => {
                info!(channels, rate, "audio format negotiated");
            }
            SessionEvent::Connected => info!("streaming"),
            SessionEvent::Quality(event) => warn!(?event, "stream quality"),
            SessionEvent::Disconnected { reason, detail } => {
                if reason.is_error() {
                    error!(%reason, detail = %detail, "session ended");
                    failed = true;
                } else {
                    info!(%reason, detail = %detail, "session ended");
                }
            }
        }
    }

    for sink in [&video, &audio] {
        let stats = sink.stats();
        info!(
            sink = sink.name(),
            frames = stats.frames,
            recovered = stats.recovered,
            bytes = stats.bytes,
            "media totals"
        );
    }

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

async fn prompt_pin<R>(stdin: &mut tokio::io::Lines<R>) -> Option<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    info!("console requests a login PIN; type it and press enter");
    match stdin.next_line().await {
        Ok(Some(line)) => Some(line.trim().to_string()),
        Ok(None) => None,
        Err(e) => {
            warn!("cannot read PIN from stdin: {e}");
            None
        }
    }
}

fn submit_pin(handle: &SessionHandle, pin: Option<String>) {
    match pin {
        Some(pin) => {
            if let Err(e) = handle.set_login_pin(pin) {
                warn!("PIN not delivered: {e}");
            }
        }
        None => {
            warn!("no PIN available, stopping session");
            handle.stop();
        }
    }
}
