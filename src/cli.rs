use std::time::Duration;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use crate::config::ProbeConfig;

/// Library diagnostics stay quiet unless `RUST_LOG` raises the level.
pub const DEFAULT_LOG_FILTER: &str = "error";

pub fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Drive one Dynamixel servo to a goal position to confirm that it, its
/// wiring and its power supply work.
#[derive(StructOpt, Debug)]
#[structopt(name = "servo-probe")]
pub struct Args {
    /// Id of the servo on the bus
    pub servo_id: u8,
    /// Goal position in encoder units
    pub goal_position: u16,
    /// Serial device the servo bus is attached to [default: /dev/ttyUSB0]
    #[structopt(long)]
    pub device: Option<String>,
    /// Link speed [default: 1000000]
    #[structopt(long)]
    pub baud_rate: Option<u32>,
    /// Settle tolerance in encoder units [default: 10]
    #[structopt(long)]
    pub threshold: Option<u16>,
    /// Pause between position reads in milliseconds
    #[structopt(long)]
    pub poll_interval_ms: Option<u64>,
    /// Stop polling after this many reads
    #[structopt(long)]
    pub max_polls: Option<u64>,
}

impl Args {
    /// Compiled-in defaults with the command line overrides applied.
    pub fn config(&self) -> ProbeConfig {
        let defaults = ProbeConfig::default();
        ProbeConfig {
            device: self.device.clone().unwrap_or(defaults.device),
            baud_rate: self.baud_rate.unwrap_or(defaults.baud_rate),
            moving_threshold: self.threshold.unwrap_or(defaults.moving_threshold),
            poll_interval: self.poll_interval_ms.map(Duration::from_millis),
            max_polls: self.max_polls,
            ..defaults
        }
    }
}
