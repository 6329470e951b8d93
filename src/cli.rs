use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{AddressFamily, Settings};
use crate::prefs::Prefs;

/// Default status refresh period in seconds
pub const DEFAULT_REFRESH_SECS: f64 = 1.0;

/// Continuous ping with latency, jitter and packet-loss statistics
#[derive(Parser, Debug, Clone)]
#[command(name = "pingpoll")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Target host (IP address or hostname)
    pub host: Option<String>,

    /// Probe interval in seconds (sub-second values allowed)
    #[arg(short = 'i', long = "interval")]
    pub interval: Option<f64>,

    /// Per-probe timeout in seconds
    #[arg(short = 'W', long = "timeout")]
    pub timeout: Option<f64>,

    /// Seconds of samples kept for the rolling view
    #[arg(long = "window")]
    pub window: Option<f64>,

    /// Seconds covered by windowed statistics
    #[arg(long = "stats-window")]
    pub stats_window: Option<f64>,

    /// Maximum probes awaiting a reply at once
    #[arg(long = "max-in-flight")]
    pub max_in_flight: Option<usize>,

    /// Stop after this many probes
    #[arg(short = 'c', long = "count")]
    pub count: Option<u64>,

    /// Stop after this many seconds
    #[arg(short = 'd', long = "duration")]
    pub duration: Option<f64>,

    /// ICMP payload size in bytes
    #[arg(short = 's', long = "size")]
    pub payload_size: Option<usize>,

    /// Status line refresh period in seconds (independent of --interval)
    #[arg(long = "refresh")]
    pub refresh: Option<f64>,

    /// Stream every sample as CSV to this file ("-" for stdout)
    #[arg(long = "csv")]
    pub csv: Option<PathBuf>,

    /// Write a JSON export to this file when the session ends ("-" for stdout)
    #[arg(long = "json")]
    pub json: Option<PathBuf>,

    /// Print a summary report when the session ends
    #[arg(long = "report")]
    pub report: bool,

    /// Check general connectivity against well-known hosts and exit
    #[arg(long = "check")]
    pub check: bool,

    /// Print the report of a saved JSON export and exit
    #[arg(long = "replay")]
    pub replay: Option<PathBuf>,

    /// Force IPv4
    #[arg(short = '4', long = "ipv4")]
    pub ipv4: bool,

    /// Force IPv6
    #[arg(short = '6', long = "ipv6")]
    pub ipv6: bool,

    /// Store the effective settings as defaults for later runs
    #[arg(long = "save-defaults")]
    pub save_defaults: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Validate arguments that settings conversion cannot see
    pub fn validate(&self) -> Result<(), String> {
        if self.ipv4 && self.ipv6 {
            return Err("Cannot specify both -4 and -6".into());
        }

        if let Some(refresh) = self.refresh
            && !(refresh.is_finite() && refresh > 0.0)
        {
            return Err("Refresh must be a positive number of seconds".into());
        }

        if self.csv.is_some() && self.csv == self.json {
            return Err("--csv and --json cannot write to the same destination".into());
        }

        if self.check && self.replay.is_some() {
            return Err("--check and --replay are mutually exclusive".into());
        }

        Ok(())
    }

    fn family(&self) -> Option<AddressFamily> {
        if self.ipv4 {
            Some(AddressFamily::Ipv4)
        } else if self.ipv6 {
            Some(AddressFamily::Ipv6)
        } else {
            None
        }
    }

    /// Effective settings: flags over stored preferences over defaults
    pub fn settings(&self, prefs: &Prefs) -> Settings {
        let base = prefs.to_settings();
        Settings {
            host: self.host.clone().unwrap_or(base.host),
            interval: self.interval.unwrap_or(base.interval),
            timeout: self.timeout.unwrap_or(base.timeout),
            window: self.window.unwrap_or(base.window),
            stats_window: self.stats_window.unwrap_or(base.stats_window),
            max_in_flight: self.max_in_flight.unwrap_or(base.max_in_flight),
            count: self.count,
            duration: self.duration,
            payload_size: self.payload_size.unwrap_or(base.payload_size),
            family: self.family().unwrap_or(base.family),
        }
    }

    /// Refresh period in seconds, after preferences
    pub fn refresh_secs(&self, prefs: &Prefs) -> f64 {
        self.refresh.or(prefs.refresh).unwrap_or(DEFAULT_REFRESH_SECS)
    }

    /// Refresh period as a Duration, falling back to the default when invalid
    pub fn refresh_duration(&self, prefs: &Prefs) -> Duration {
        Duration::try_from_secs_f64(self.refresh_secs(prefs))
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs_f64(DEFAULT_REFRESH_SECS))
    }
}
