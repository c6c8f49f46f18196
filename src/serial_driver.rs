use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use std::io;
use thiserror::Error;
use tokio::time::{timeout, Duration};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, trace, warn};

use crate::instructions::{calc_checksum, Instruction, StatusError};

/// Communication-level failures. The display text is what gets shown to the operator.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CommError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },
    #[error("failed to set baud rate to {baud_rate}: {source}")]
    BaudRate {
        baud_rate: u32,
        #[source]
        source: tokio_serial::Error,
    },
    #[error("[TxRxResult] Failed transmit instruction packet!")]
    TxFail(#[source] io::Error),
    #[error("[TxRxResult] Failed get status packet from device!")]
    RxFail(#[from] io::Error),
    #[error("[TxRxResult] There is no status packet!")]
    RxTimeout,
    #[error("[TxRxResult] Incorrect status packet!")]
    RxCorrupt,
    #[error("[TxRxResult] Protocol does not support this function!")]
    NotAvailable,
}

#[derive(PartialEq, Debug)]
pub struct Status {
    id: u8,
    error: StatusError,
    params: Vec<u8>,
}

impl Status {
    pub fn new(id: u8, error: StatusError, params: Vec<u8>) -> Status {
        Status { id, error, params }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn error(&self) -> StatusError {
        self.error
    }

    pub fn param(&self, index: usize) -> Option<u8> {
        self.params.get(index).copied()
    }

    pub fn params_len(&self) -> usize {
        self.params.len()
    }
}

pub(crate) struct DynamixelProtocol;

impl DynamixelProtocol {
    /// Drops bytes until the buffer starts with a header. Returns false if no
    /// header is buffered yet.
    fn sync_header(src: &mut BytesMut) -> bool {
        let start = src
            .windows(3)
            .position(|window| window[0] == 0xFF && window[1] == 0xFF && window[2] != 0xFF);
        match start {
            Some(0) => true,
            Some(skip) => {
                warn!(skipped = skip, "discarding bytes before status header");
                src.advance(skip);
                true
            }
            None => {
                // keep a possible partial header at the tail
                let keep = src.iter().rev().take_while(|b| **b == 0xFF).count().min(2);
                let skip = src.len() - keep;
                if skip > 0 {
                    warn!(skipped = skip, "discarding bytes without status header");
                    src.advance(skip);
                }
                false
            }
        }
    }
}

impl Decoder for DynamixelProtocol {
    type Item = Result<Status, CommError>;
    type Error = CommError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, CommError> {
        if !Self::sync_header(src) || src.len() < 4 {
            return Ok(None);
        }
        let len = src[3] as usize;
        if len < 2 {
            // not a status packet, drop the header and resync on the next one
            src.advance(2);
            return Ok(Some(Err(CommError::RxCorrupt)));
        }
        if src.len() < 4 + len {
            return Ok(None);
        }
        let message = src.split_to(4 + len);
        trace!(packet = ?message.as_ref(), "received");

        let checksum = calc_checksum(&message[2..3 + len]);
        if checksum != message[3 + len] {
            warn!(expected = checksum, found = message[3 + len], "status checksum mismatch");
            return Ok(Some(Err(CommError::RxCorrupt)));
        }
        let error = StatusError::from_flag(message[4]);
        let params = message[5..3 + len].to_vec();
        Ok(Some(Ok(Status::new(message[2], error, params))))
    }
}

impl Encoder<Instruction> for DynamixelProtocol {
    type Error = CommError;

    fn encode(&mut self, data: Instruction, buf: &mut BytesMut) -> Result<(), CommError> {
        let msg = data.serialize();
        trace!(packet = ?msg, "sending");
        buf.reserve(msg.len());
        buf.put(msg.as_ref());
        Ok(())
    }
}

#[async_trait]
pub trait FramedDriver: Send {
    async fn send(&mut self, instruction: Instruction) -> Result<(), CommError>;
    async fn receive(&mut self) -> Result<Status, CommError>;
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), CommError>;
}

pub(crate) const TIMEOUT: u64 = 100;

/// Serial connection to the servo bus. The port is closed when this is dropped.
pub struct FramedSerialDriver {
    framed_port: Framed<SerialStream, DynamixelProtocol>,
}

impl FramedSerialDriver {
    pub fn open(port: &str, baud_rate: u32) -> Result<FramedSerialDriver, CommError> {
        let serial_port = tokio_serial::new(port, baud_rate)
            .timeout(Duration::from_millis(TIMEOUT))
            .open_native_async()
            .map_err(|source| CommError::Open {
                path: port.to_owned(),
                source,
            })?;
        debug!(port, "opened serial port");
        Ok(FramedSerialDriver {
            framed_port: Framed::new(serial_port, DynamixelProtocol),
        })
    }
}

#[async_trait]
impl FramedDriver for FramedSerialDriver {
    async fn send(&mut self, instruction: Instruction) -> Result<(), CommError> {
        // stale replies from an earlier timed out transaction
        self.framed_port.read_buffer_mut().clear();
        if let Err(error) = self.framed_port.get_ref().clear(ClearBuffer::Input) {
            warn!(%error, "failed to clear serial input buffer");
        }
        self.framed_port
            .send(instruction)
            .await
            .map_err(|error| match error {
                CommError::RxFail(source) => CommError::TxFail(source),
                other => other,
            })
    }

    async fn receive(&mut self) -> Result<Status, CommError> {
        timeout(Duration::from_millis(TIMEOUT), self.framed_port.next())
            .await
            .map_err(|_| CommError::RxTimeout)?
            .ok_or_else(|| CommError::RxFail(io::ErrorKind::UnexpectedEof.into()))??
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), CommError> {
        self.framed_port
            .get_mut()
            .set_baud_rate(baud_rate)
            .map_err(|source| CommError::BaudRate { baud_rate, source })?;
        debug!(baud_rate, "changed baud rate");
        Ok(())
    }
}

impl Drop for FramedSerialDriver {
    fn drop(&mut self) {
        debug!("closing serial port");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> Option<Result<Status, CommError>> {
        let mut payload = BytesMut::from(bytes);
        let mut codec = DynamixelProtocol {};
        codec.decode(&mut payload).unwrap()
    }

    #[test]
    fn test_message_decode() {
        let res = decode_one(&[0xFF, 0xFF, 0x01, 0x03, 0x00, 0x20, 0xDB])
            .unwrap()
            .unwrap();
        assert_eq!(res, Status::new(1, StatusError::default(), vec![0x20]));
    }

    #[test]
    fn test_position_decode() {
        // present position 512 from servo 5
        let res = decode_one(&[0xFF, 0xFF, 0x05, 0x04, 0x00, 0x00, 0x02, 0xF4])
            .unwrap()
            .unwrap();
        assert_eq!(res.id(), 5);
        assert_eq!(res.param(0), Some(0x00));
        assert_eq!(res.param(1), Some(0x02));
        assert_eq!(res.params_len(), 2);
    }

    #[test]
    fn test_device_error_is_carried_in_status() {
        let res = decode_one(&[0xFF, 0xFF, 0x01, 0x03, 0b0000_0100, 0x20, 0xD7])
            .unwrap()
            .unwrap();
        assert_eq!(res.error(), StatusError::from_flag(0b0000_0100));
        assert_eq!(res.param(0), Some(0x20));
    }

    #[test]
    fn test_checksum_mismatch_is_corrupt() {
        let res = decode_one(&[0xFF, 0xFF, 0x01, 0x03, 0x00, 0x20, 0x00]).unwrap();
        assert!(matches!(res, Err(CommError::RxCorrupt)));
    }

    #[test]
    fn test_partial_frame_waits() {
        assert!(decode_one(&[0xFF, 0xFF, 0x01, 0x03, 0x00]).is_none());
        assert!(decode_one(&[0xFF]).is_none());
    }

    #[test]
    fn test_leading_garbage_is_skipped() {
        let mut payload =
            BytesMut::from(&[0x12, 0x34, 0xFF, 0xFF, 0x01, 0x03, 0x00, 0x20, 0xDB][..]);
        let mut codec = DynamixelProtocol {};
        let res = codec.decode(&mut payload).unwrap().unwrap().unwrap();
        assert_eq!(res, Status::new(1, StatusError::default(), vec![0x20]));
        assert!(payload.is_empty());
    }

    #[test]
    fn test_stream_survives_corrupt_packet() {
        let mut payload = BytesMut::from(
            &[
                0xFF, 0xFF, 0x01, 0x03, 0x00, 0x20, 0x00, // bad checksum
                0xFF, 0xFF, 0x01, 0x03, 0x00, 0x20, 0xDB,
            ][..],
        );
        let mut codec = DynamixelProtocol {};
        let first = codec.decode(&mut payload).unwrap().unwrap();
        assert!(matches!(first, Err(CommError::RxCorrupt)));
        let second = codec.decode(&mut payload).unwrap().unwrap().unwrap();
        assert_eq!(second, Status::new(1, StatusError::default(), vec![0x20]));
    }

    #[test]
    fn test_instruction_encode() {
        let mut buf = BytesMut::new();
        let mut codec = DynamixelProtocol {};
        codec
            .encode(Instruction::write_u8(1, 24, 1), &mut buf)
            .unwrap();
        assert_eq!(buf.as_ref(), &[0xFF, 0xFF, 0x01, 0x04, 0x03, 0x18, 0x01, 0xDE]);
    }

    #[test]
    fn test_comm_error_descriptions() {
        assert_eq!(
            CommError::RxTimeout.to_string(),
            "[TxRxResult] There is no status packet!"
        );
        assert_eq!(
            CommError::RxCorrupt.to_string(),
            "[TxRxResult] Incorrect status packet!"
        );
    }
}
