pub mod cli;
pub mod config;
mod instructions;
pub mod probe;
mod serial_driver;

#[cfg(test)]
mod mock;

pub use instructions::{Instruction, StatusError, BROADCAST_ID};
pub use serial_driver::{CommError, FramedDriver, FramedSerialDriver, Status};

use std::fmt;
use tracing::{debug, warn};

/// Dialect of the servo protocol spoken on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// Dynamixel Protocol 1.0 (AX, RX, MX series)
    #[default]
    V1,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolVersion::V1 => write!(f, "1.0"),
        }
    }
}

/// Answer to a transaction that reached the servo. `error` holds whatever the
/// servo flagged in its status packet.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Reply<T> {
    pub value: T,
    pub error: StatusError,
}

impl<T> Reply<T> {
    pub fn new(value: T, error: StatusError) -> Reply<T> {
        Reply { value, error }
    }
}

/// Outcome of one instruction/status round trip.
pub type TxRx<T> = Result<Reply<T>, CommError>;

pub struct DynamixelDriver {
    port: Box<dyn FramedDriver>,
    protocol: ProtocolVersion,
}

impl DynamixelDriver {
    pub fn new(port: Box<dyn FramedDriver>, protocol: ProtocolVersion) -> DynamixelDriver {
        debug!(%protocol, "packet handler ready");
        DynamixelDriver { port, protocol }
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    async fn transact(&mut self, instruction: Instruction) -> Result<Option<Status>, CommError> {
        let id = instruction.id();
        let expected_params = instruction.expected_params();
        let expects_status = instruction.expects_status();
        self.port.send(instruction).await?;
        if !expects_status {
            return Ok(None);
        }
        let status = self.port.receive().await?;
        if status.id() != id {
            warn!(expected = id, found = status.id(), "status from unexpected servo");
            return Err(CommError::RxCorrupt);
        }
        // servos drop the parameters when they reject an instruction
        if status.error().is_ok() && status.params_len() != expected_params {
            warn!(
                expected = expected_params,
                found = status.params_len(),
                "status parameter count mismatch"
            );
            return Err(CommError::RxCorrupt);
        }
        Ok(Some(status))
    }

    pub async fn write_u8(&mut self, id: u8, addr: u8, value: u8) -> TxRx<()> {
        debug!(id, addr, value, "write 1 byte");
        let status = self.transact(Instruction::write_u8(id, addr, value)).await?;
        Ok(Reply::new((), status.map(|s| s.error()).unwrap_or_default()))
    }

    pub async fn write_u16(&mut self, id: u8, addr: u8, value: u16) -> TxRx<()> {
        debug!(id, addr, value, "write 2 bytes");
        let status = self.transact(Instruction::write_u16(id, addr, value)).await?;
        Ok(Reply::new((), status.map(|s| s.error()).unwrap_or_default()))
    }

    pub async fn read_u16(&mut self, id: u8, addr: u8) -> TxRx<u16> {
        if id == BROADCAST_ID {
            return Err(CommError::NotAvailable);
        }
        let status = self
            .transact(Instruction::read(id, addr, 2))
            .await?
            .ok_or(CommError::NotAvailable)?;
        let value = match (status.param(0), status.param(1)) {
            (Some(low), Some(high)) => u16::from_le_bytes([low, high]),
            _ => 0,
        };
        debug!(id, addr, value, "read 2 bytes");
        Ok(Reply::new(value, status.error()))
    }

    /// Closes the connection. Dropping the driver has the same effect.
    pub fn close(self) {
        debug!("closing connection");
        drop(self.port);
    }
}
