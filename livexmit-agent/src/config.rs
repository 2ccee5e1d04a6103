//! CLI configuration for `livexmit`.
//!
//! Usage:
//!   livexmit [options] <input-uri> <output-uri>
//!   livexmit -t 60 -r 100 "lrt://:9000" udp://239.0.0.1:5000?ttl=4

use std::path::PathBuf;

use clap::{ArgAction, Parser};

// ---

use livexmit_domain::{TransmitConfig, DEFAULT_CHUNK_SIZE};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(
    name = "livexmit",
    version,
    about = "Relay a live stream between two transport endpoints"
)]
pub struct Config {
    // ---
    /// Input medium: lrt://host:port, udp://host:port, or file:// when
    /// file media are enabled.
    pub input: String,

    /// Output medium, same forms as the input.
    pub output: String,

    /// Stop after this many seconds (0 runs until interrupted).
    #[arg(short = 't', long, default_value_t = 0)]
    pub timeout: u64,

    /// Maximum bytes per read (0 keeps the default of 1316).
    #[arg(short = 'c', long, default_value_t = 0)]
    pub chunk: usize,

    /// Log a bandwidth line every N reads on connection sources.
    #[arg(short = 'r', long = "report", default_value_t = 0)]
    pub bw_report: u64,

    /// Log connection statistics every N reads on connection sources.
    #[arg(short = 's', long = "stats", default_value_t = 0)]
    pub stats_report: u64,

    /// Suppress connect/disconnect messages.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Recreate a medium after it disconnects ("yes" or "no").
    #[arg(
        short = 'a',
        long = "auto-reconnect",
        default_value = "yes",
        action = ArgAction::Set,
        value_parser = parse_switch
    )]
    pub auto_reconnect: bool,

    /// Enable the file:// scheme (files and file://con for the console).
    #[arg(long)]
    pub file_media: bool,

    /// Log filter directive, e.g. "debug" or "livexmit=trace".
    /// Overrides -v / -q.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---

fn parse_switch(s: &str) -> Result<bool, String> {
    // ---
    match s.to_ascii_lowercase().as_str() {
        "yes" | "y" | "on" | "true" | "1" => Ok(true),
        "no" | "n" | "off" | "false" | "0" => Ok(false),
        _ => Err(format!("expected yes or no, got '{s}'")),
    }
}

impl Config {
    // ---

    pub fn transmit_config(&self) -> TransmitConfig {
        // ---
        let chunk_override = self.chunk != 0;
        TransmitConfig {
            chunk_size: if chunk_override { self.chunk } else { DEFAULT_CHUNK_SIZE },
            chunk_override,
            verbose: self.verbose,
            quiet: self.quiet,
            auto_reconnect: self.auto_reconnect,
            bw_report: self.bw_report,
            stats_report: self.stats_report,
            allow_file_media: self.file_media,
            ..TransmitConfig::default()
        }
    }

    /// Filter directive for the log subscriber.
    pub fn log_filter(&self) -> String {
        // ---
        if let Some(level) = &self.log_level {
            return level.clone();
        }
        if let Ok(env) = std::env::var("RUST_LOG") {
            return env;
        }
        match (self.verbose, self.quiet) {
            (true, _) => "debug".into(),
            (false, true) => "warn".into(),
            (false, false) => "info".into(),
        }
    }
}
