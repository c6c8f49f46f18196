use std::io::{self, Write};
use thiserror::Error;
use tracing::debug;

use crate::config::ProbeConfig;
use crate::{CommError, DynamixelDriver, FramedDriver, TxRx};

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error(transparent)]
    Setup(#[from] CommError),
    #[error("failed to write probe output: {0}")]
    Output(#[from] io::Error),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PollOutcome {
    Settled { polls: u64, position: u16 },
    /// The poll cap ran out before the servo came within the threshold.
    GaveUp { polls: u64, position: u16 },
}

/// Opens the connection and sets the link speed, reporting each step to `err`.
pub fn connect<D, F, W>(
    config: &ProbeConfig,
    open: F,
    err: &mut W,
) -> Result<DynamixelDriver, ProbeError>
where
    D: FramedDriver + 'static,
    F: FnOnce(&str, u32) -> Result<D, CommError>,
    W: Write,
{
    let mut port = match open(&config.device, config.baud_rate) {
        Ok(port) => {
            writeln!(err, "Opened port")?;
            port
        }
        Err(error) => {
            writeln!(err, "Failed to open the port: {}", error)?;
            return Err(error.into());
        }
    };
    match port.set_baud_rate(config.baud_rate) {
        Ok(()) => writeln!(err, "Changed baudrate")?,
        Err(error) => {
            writeln!(err, "Failed to change the baudrate: {}", error)?;
            return Err(error.into());
        }
    }
    Ok(DynamixelDriver::new(Box::new(port), config.protocol_version))
}

/// Reports a failed transaction. A communication failure hides any device error.
/// Returns true when the transaction went through cleanly.
pub fn check_outcome<T, W: Write>(outcome: &TxRx<T>, err: &mut W) -> io::Result<bool> {
    match outcome {
        Err(error) => {
            writeln!(err, "{}", error)?;
            Ok(false)
        }
        Ok(reply) if !reply.error.is_ok() => {
            writeln!(err, "{}", reply.error)?;
            Ok(false)
        }
        Ok(_) => Ok(true),
    }
}

pub fn is_settled(goal: u16, present: u16, threshold: u16) -> bool {
    goal.abs_diff(present) <= threshold
}

pub struct ServoProbe<'a> {
    config: &'a ProbeConfig,
    id: u8,
    goal: u16,
}

impl<'a> ServoProbe<'a> {
    pub fn new(config: &'a ProbeConfig, id: u8, goal: u16) -> ServoProbe<'a> {
        ServoProbe { config, id, goal }
    }

    /// Enables torque, commands the goal, polls until settled, then disables
    /// torque and closes the connection. Torque is disabled even when writing
    /// the output fails part way.
    pub async fn run<O: Write, E: Write>(
        &self,
        mut driver: DynamixelDriver,
        out: &mut O,
        err: &mut E,
    ) -> Result<PollOutcome, ProbeError> {
        debug!(protocol = %driver.protocol(), id = self.id, goal = self.goal, "starting probe");

        let result = self.drive(&mut driver, out, err).await;

        let outcome = driver
            .write_u8(
                self.id,
                self.config.control_table.torque_enable,
                self.config.torque_off,
            )
            .await;
        let reported = check_outcome(&outcome, err);
        driver.close();

        let result = result?;
        reported?;
        Ok(result)
    }

    async fn drive<O: Write, E: Write>(
        &self,
        driver: &mut DynamixelDriver,
        out: &mut O,
        err: &mut E,
    ) -> Result<PollOutcome, ProbeError> {
        let table = &self.config.control_table;

        let outcome = driver
            .write_u8(self.id, table.torque_enable, self.config.torque_on)
            .await;
        if check_outcome(&outcome, err)? {
            writeln!(err, "Dynamixel has been successfully connected")?;
        }

        let outcome = driver
            .write_u16(self.id, table.goal_position, self.goal)
            .await;
        check_outcome(&outcome, err)?;

        self.poll(driver, out, err).await
    }

    async fn poll<O: Write, E: Write>(
        &self,
        driver: &mut DynamixelDriver,
        out: &mut O,
        err: &mut E,
    ) -> Result<PollOutcome, ProbeError> {
        let address = self.config.control_table.present_position;
        // a failed read, device flagged or not, leaves the last known position in place
        let mut present = 0_u16;
        let mut polls = 0_u64;
        loop {
            let outcome = driver.read_u16(self.id, address).await;
            if check_outcome(&outcome, err)? {
                if let Ok(reply) = outcome {
                    present = reply.value;
                }
            }
            polls += 1;

            writeln!(
                out,
                "[ID:{:03}] GoalPos:{:03} PresPos:{:03}",
                self.id, self.goal, present
            )?;

            if is_settled(self.goal, present, self.config.moving_threshold) {
                debug!(polls, position = present, "servo settled");
                return Ok(PollOutcome::Settled {
                    polls,
                    position: present,
                });
            }
            if let Some(max_polls) = self.config.max_polls {
                if polls >= max_polls {
                    debug!(polls, position = present, goal = self.goal, "poll cap reached");
                    return Ok(PollOutcome::GaveUp {
                        polls,
                        position: present,
                    });
                }
            }
            if let Some(interval) = self.config.poll_interval {
                tokio::time::sleep(interval).await;
            }
        }
    }
}
