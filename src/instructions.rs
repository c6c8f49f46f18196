use std::fmt;

/// Packets sent to this id reach every servo on the bus and are never answered.
pub const BROADCAST_ID: u8 = 0xFE;

const READ_DATA: u8 = 0x02;
const WRITE_DATA: u8 = 0x03;

/// Device error byte carried by every status packet.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Default)]
pub struct StatusError {
    instruction_error: bool,
    overload_error: bool,
    checksum_error: bool,
    range_error: bool,
    overheating_error: bool,
    angle_limit_error: bool,
    input_voltage_error: bool,
}

impl StatusError {
    pub fn from_flag(flag: u8) -> StatusError {
        StatusError {
            input_voltage_error: flag & (1 << 0) != 0,
            angle_limit_error: flag & (1 << 1) != 0,
            overheating_error: flag & (1 << 2) != 0,
            range_error: flag & (1 << 3) != 0,
            checksum_error: flag & (1 << 4) != 0,
            overload_error: flag & (1 << 5) != 0,
            instruction_error: flag & (1 << 6) != 0,
        }
    }

    /// Raw error byte as reported by the servo.
    pub fn code(&self) -> u8 {
        (self.input_voltage_error as u8)
            | (self.angle_limit_error as u8) << 1
            | (self.overheating_error as u8) << 2
            | (self.range_error as u8) << 3
            | (self.checksum_error as u8) << 4
            | (self.overload_error as u8) << 5
            | (self.instruction_error as u8) << 6
    }

    pub fn is_ok(&self) -> bool {
        self.code() == 0
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let flags = [
            (self.input_voltage_error, "input voltage error"),
            (self.angle_limit_error, "angle limit error"),
            (self.overheating_error, "overheating error"),
            (self.range_error, "out of range error"),
            (self.checksum_error, "checksum error"),
            (self.overload_error, "overload error"),
            (self.instruction_error, "instruction code error"),
        ];
        let description: Vec<&str> = flags
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect();
        if description.is_empty() {
            write!(f, "[RxPacketError] no error")
        } else {
            write!(f, "[RxPacketError] {}", description.join(", "))
        }
    }
}

pub(crate) fn calc_checksum(payload: &[u8]) -> u8 {
    let mut sum: u8 = 0;
    for b in payload {
        sum = sum.wrapping_add(*b);
    }
    !sum
}

/// Protocol 1.0 instruction packet addressed to a single servo id.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Instruction {
    id: u8,
    instruction: u8,
    params: Vec<u8>,
}

impl Instruction {
    pub fn read(id: u8, addr: u8, length: u8) -> Instruction {
        Instruction {
            id,
            instruction: READ_DATA,
            params: vec![addr, length],
        }
    }

    pub fn write_u8(id: u8, addr: u8, data: u8) -> Instruction {
        Instruction {
            id,
            instruction: WRITE_DATA,
            params: vec![addr, data],
        }
    }

    pub fn write_u16(id: u8, addr: u8, data: u16) -> Instruction {
        let [low, high] = data.to_le_bytes();
        Instruction {
            id,
            instruction: WRITE_DATA,
            params: vec![addr, low, high],
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Number of parameter bytes the answering status packet carries.
    pub(crate) fn expected_params(&self) -> usize {
        match self.instruction {
            READ_DATA => self.params[1] as usize,
            _ => 0,
        }
    }

    pub(crate) fn expects_status(&self) -> bool {
        self.id != BROADCAST_ID
    }

    pub fn serialize(&self) -> Vec<u8> {
        let len = (self.params.len() + 2) as u8;
        let mut data = vec![
            0xFF, // header
            0xFF, self.id, // ID
            len,     // Length
            self.instruction,
        ];
        data.extend(self.params.iter());
        let checksum = calc_checksum(&data[2..]);
        data.push(checksum);
        data
    }
}
