use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::mpsc::Sender;

use crate::{CommError, FramedDriver, Instruction, Status, StatusError};

#[derive(Debug, PartialEq)]
pub(crate) enum Event {
    Sent(Vec<u8>),
    BaudRate(u32),
    Closed,
}

pub(crate) fn write_status(id: u8) -> Status {
    Status::new(id, StatusError::default(), vec![])
}

pub(crate) fn position_status(id: u8, position: u16) -> Status {
    Status::new(id, StatusError::default(), position.to_le_bytes().to_vec())
}

/// Stands in for the serial bus. Replies are handed out in order and an
/// exhausted queue behaves like a servo that stopped answering.
pub(crate) struct MockSerialPort {
    events: Sender<Event>,
    mock_read_data: VecDeque<Result<Status, CommError>>,
    fail_baud_rate: bool,
}

impl MockSerialPort {
    pub(crate) fn new(
        mock_read_data: Vec<Result<Status, CommError>>,
        events: Sender<Event>,
    ) -> MockSerialPort {
        MockSerialPort {
            events,
            mock_read_data: mock_read_data.into(),
            fail_baud_rate: false,
        }
    }

    pub(crate) fn failing_baud_rate(mut self) -> MockSerialPort {
        self.fail_baud_rate = true;
        self
    }
}

#[async_trait]
impl FramedDriver for MockSerialPort {
    async fn send(&mut self, instruction: Instruction) -> Result<(), CommError> {
        let _ = self.events.send(Event::Sent(instruction.serialize()));
        Ok(())
    }

    async fn receive(&mut self) -> Result<Status, CommError> {
        self.mock_read_data
            .pop_front()
            .unwrap_or(Err(CommError::RxTimeout))
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), CommError> {
        if self.fail_baud_rate {
            return Err(CommError::BaudRate {
                baud_rate,
                source: tokio_serial::Error::new(
                    tokio_serial::ErrorKind::InvalidInput,
                    "unsupported baud rate",
                ),
            });
        }
        let _ = self.events.send(Event::BaudRate(baud_rate));
        Ok(())
    }
}

impl Drop for MockSerialPort {
    fn drop(&mut self) {
        let _ = self.events.send(Event::Closed);
    }
}
