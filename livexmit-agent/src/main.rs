//! livexmit: relay a live stream between two transport endpoints.
//!
//! Reads chunks from one medium and writes them to another, recreating
//! either side when its connection drops.
//!
//! Usage:
//!   livexmit udp://:5000 lrt://receiver.example:9000
//!   livexmit -a no "lrt://:9000?mode=listener" udp://239.0.0.1:5000?ttl=4
//!   livexmit --file-media file://con udp://127.0.0.1:5000

use std::fs::File;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

// ---

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ---

use livexmit_domain::XmitError;
use livexmit_media::MediumFactory;

// ---

mod config;
mod meter;
mod monitor;
mod transfer;

// ---

use config::Config;
use transfer::{Exit, StopFlags, TransferLoop};

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

const EXIT_OK: u8 = 0;
const EXIT_USAGE: u8 = 1;
const EXIT_FAILURE: u8 = 255;

fn exit_code(outcome: &Result<Exit, XmitError>) -> u8 {
    // ---
    match outcome {
        Ok(_) => EXIT_OK,
        Err(XmitError::Unsupported { .. }) => EXIT_USAGE,
        Err(_) => EXIT_FAILURE,
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logs go to stderr (or `--log-file`) so stdout stays free for a console
/// target.
fn init_logging(cfg: &Config) -> anyhow::Result<()> {
    // ---
    let filter = EnvFilter::try_new(cfg.log_filter())
        .map_err(|e| anyhow::anyhow!("bad log filter '{}': {e}", cfg.log_filter()))?;

    if let Some(path) = &cfg.log_file {
        let file = File::create(path)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
        return Ok(());
    }

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stderr());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!no_color)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Stop triggers
// ---------------------------------------------------------------------------

fn spawn_signal_watch(flags: StopFlags) {
    // ---
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("interrupt received, stopping");
        flags.interrupt();
    });
}

fn spawn_watchdog(flags: StopFlags, after: Duration) {
    // ---
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        info!(seconds = after.as_secs(), "timeout reached, stopping");
        flags.expire();
    });
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // ---
    let cfg = match Config::try_parse() {
        Ok(cfg) => cfg,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { EXIT_OK };
            let _ = e.print();
            return Ok(ExitCode::from(code));
        }
    };

    init_logging(&cfg)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        input = %cfg.input,
        output = %cfg.output,
        "livexmit starting",
    );

    let flags = StopFlags::new();
    spawn_signal_watch(flags.clone());
    if cfg.timeout > 0 {
        spawn_watchdog(flags.clone(), Duration::from_secs(cfg.timeout));
    }

    // The transfer loop blocks on its own poller; keep it off the runtime
    // workers.
    let tcfg = cfg.transmit_config();
    let (input, output) = (cfg.input.clone(), cfg.output.clone());
    let (outcome, summary) = tokio::task::spawn_blocking(move || {
        let factory = MediumFactory::new(tcfg);
        let mut lp = match TransferLoop::new(factory, input, output, flags) {
            Ok(lp) => lp,
            Err(e) => return (Err(e), None),
        };
        let outcome = lp.run();
        (outcome, Some(*lp.summary()))
    })
    .await?;

    if let Some(summary) = summary {
        info!(
            chunks_read = summary.chunks_read,
            bytes_read = summary.bytes_read,
            chunks_written = summary.chunks_written,
            bytes_written = summary.bytes_written,
            chunks_dropped = summary.chunks_dropped,
            reconnects = summary.reconnects,
            "transfer summary",
        );
        if cfg.bw_report > 0 {
            info!("{}", summary.bandwidth_line());
        }
    }

    match &outcome {
        Ok(Exit::Interrupted) => info!("interrupted"),
        Ok(Exit::TimedOut) => info!("timed out"),
        Ok(Exit::SourceExhausted) => info!("source exhausted"),
        Ok(Exit::Aborted(role)) => info!(%role, "{role} disconnected, auto-reconnect off"),
        Err(e @ XmitError::Unsupported { .. }) => error!("{e}"),
        Err(e) => error!(error = %e, "transfer failed"),
    }

    Ok(ExitCode::from(exit_code(&outcome)))
}
