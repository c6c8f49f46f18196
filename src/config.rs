use std::time::Duration;

use crate::ProtocolVersion;

/// Register addresses used by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlTable {
    pub torque_enable: u8,
    pub goal_position: u8,
    pub present_position: u8,
}

impl Default for ControlTable {
    /// MX series, Protocol 1.0 RAM area
    fn default() -> Self {
        ControlTable {
            torque_enable: 24,
            goal_position: 30,
            present_position: 36,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    /// Serial device the servo bus is attached to.
    pub device: String,
    pub baud_rate: u32,
    pub protocol_version: ProtocolVersion,
    pub control_table: ControlTable,
    /// Distance from the goal, in encoder units, at which the servo counts as settled.
    pub moving_threshold: u16,
    pub torque_on: u8,
    pub torque_off: u8,
    /// Pause between position reads. `None` polls back to back.
    pub poll_interval: Option<Duration>,
    /// Give up after this many reads. `None` polls until the servo settles.
    pub max_polls: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            device: String::from("/dev/ttyUSB0"),
            baud_rate: 1_000_000,
            protocol_version: ProtocolVersion::V1,
            control_table: ControlTable::default(),
            moving_threshold: 10,
            torque_on: 1,
            torque_off: 0,
            poll_interval: None,
            max_polls: None,
        }
    }
}
