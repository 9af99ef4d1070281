use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use mux_probe::{ProbeScript, SendSpec, run_probe};
use ws_mux::{Multiplexer, MuxConfig};

#[derive(Parser)]
#[command(name = "mux-probe")]
#[command(about = "Send tagged JSON requests over a WebSocket and print what comes back")]
struct Args {
    /// Target URI (ws:// or wss://). Overrides the config file and WS_MUX_URI
    #[arg(short, long)]
    uri: Option<String>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Register a persistent listener for TAG (repeatable)
    #[arg(short, long = "listen", value_name = "TAG")]
    listen: Vec<String>,

    /// Print messages no other listener claimed instead of failing on them
    #[arg(long)]
    catch_all: bool,

    /// Queue a request as TAG=JSON; an empty TAG sends without waiting (repeatable)
    #[arg(short, long = "send", value_name = "TAG=JSON")]
    send: Vec<SendSpec>,

    /// Disconnect after this many seconds
    #[arg(long)]
    linger_secs: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging (stdout carries the JSON lines)
    let default_directive = if args.debug {
        "mux_probe=debug,ws_mux=debug"
    } else {
        "mux_probe=info,ws_mux=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = MuxConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(uri) = args.uri {
        config.uri = uri;
    }
    info!("Probing {}", config.uri);

    let script = ProbeScript {
        listen: args.listen,
        catch_all: args.catch_all,
        sends: args.send,
        linger: args.linger_secs.map(Duration::from_secs),
    };

    let (out_tx, mut out_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            let mut stdout = std::io::stdout().lock();
            let _ = writeln!(stdout, "{line}");
            let _ = stdout.flush();
        }
    });

    let span = tracing::info_span!("mux", uri = %config.uri);
    let mux = Multiplexer::from_config(&config).with_span(span);
    let result = run_probe(&mux, &script, out_tx).await;

    // Dropping the multiplexer releases the handlers' senders, ending the printer
    drop(mux);
    let _ = printer.await;
    result
}
