//! Control word codec.
//!
//! Every protocol message is a single 32-bit control word:
//!
//! ```text
//!  31        24 23                       8 7    6 5      3 2     0
//! +------------+--------------------------+------+--------+-------+
//! |   CRC-8    |           data           |  id  | subcmd | class |
//! +------------+--------------------------+------+--------+-------+
//! ```
//!
//! The CRC-8 (polynomial `0x07`, initial value `0`) covers the low 24 bits, taken in
//! big-endian byte order so both ends agree regardless of their native byte order.
//!
//! This module also holds the CRC-16-CCITT used by the memory read exchange to protect
//! raw words.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

const CLASS_SHIFT: u32 = 0;
const CLASS_MASK: u32 = 0x7 << CLASS_SHIFT;
const SUBCMD_SHIFT: u32 = 3;
const SUBCMD_MASK: u32 = 0x7 << SUBCMD_SHIFT;
const ID_SHIFT: u32 = 6;
const ID_MASK: u32 = 0x3 << ID_SHIFT;
const DATA_SHIFT: u32 = 8;
const DATA_MASK: u32 = 0xFFFF << DATA_SHIFT;
const CRC_SHIFT: u32 = 24;
const CRC_MASK: u32 = 0xFF << CRC_SHIFT;

/// Number of distinct command ids.
pub const COMMAND_IDS: usize = 4;

/// Packet class, bits 0-2.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    System = 0,
    Memory = 1,
}

/// Decoded command: class and subcommand together.
///
/// System subcommands start at 1 so that an all-zero word never decodes as a system
/// command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Acknowledge the command with the same id
    Ack,
    /// End of a run of raw words, data carries their CRC-16
    MwTxDone,
    /// Handshake ping, data carries [`PING_MAGIC`]
    Ping,
    /// Handshake ping reply, data carries [`PING_MAGIC`]
    PingReply,
    /// Console tells the handheld the kernel is staged and may boot
    KernelLoad,
    /// Handheld asks to read guest memory, data is the number of header words to follow
    MemRead,
    /// Reserved, currently inert
    MemWrite,
}

impl Command {
    pub fn class(&self) -> Class {
        match self {
            Command::MemRead | Command::MemWrite => Class::Memory,
            _ => Class::System,
        }
    }

    pub fn subcommand(&self) -> u8 {
        match self {
            Command::Ack => 1,
            Command::MwTxDone => 2,
            Command::Ping => 3,
            Command::PingReply => 4,
            Command::KernelLoad => 5,
            Command::MemRead => 0,
            Command::MemWrite => 1,
        }
    }

    /// Look up a command from its raw class and subcommand fields.
    pub fn from_fields(class: u8, subcommand: u8) -> Option<Self> {
        match (class, subcommand) {
            (0, 1) => Some(Command::Ack),
            (0, 2) => Some(Command::MwTxDone),
            (0, 3) => Some(Command::Ping),
            (0, 4) => Some(Command::PingReply),
            (0, 5) => Some(Command::KernelLoad),
            (1, 0) => Some(Command::MemRead),
            (1, 1) => Some(Command::MemWrite),
            _ => None,
        }
    }
}

/// A decoded, checksum-valid control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub command: Command,
    /// Command id, 0-3.  Only meaningful for acknowledgements.
    pub id: u8,
    pub data: u16,
}

impl Packet {
    /// Packet with command id 0.
    pub const fn new(command: Command, data: u16) -> Self {
        Self {
            command,
            id: 0,
            data,
        }
    }

    /// SYSTEM/ACK for command id 0, with no data.
    pub const fn ack() -> Self {
        Self::new(Command::Ack, 0)
    }

    pub fn encode(&self) -> ControlWord {
        ControlWord::encode(
            self.command.class() as u8,
            self.command.subcommand(),
            self.id,
            self.data,
        )
    }
}

/// A control word as it travels on the link.
///
/// May or may not be valid: use [`ControlWord::is_valid()`] or [`ControlWord::decode()`]
/// before trusting any of its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWord(pub u32);

impl ControlWord {
    /// Pack the fields and append their CRC-8.  Fields wider than their slot are
    /// truncated.
    pub fn encode(class: u8, subcommand: u8, command_id: u8, data: u16) -> Self {
        let body = ((class as u32) << CLASS_SHIFT) & CLASS_MASK
            | ((subcommand as u32) << SUBCMD_SHIFT) & SUBCMD_MASK
            | ((command_id as u32) << ID_SHIFT) & ID_MASK
            | ((data as u32) << DATA_SHIFT) & DATA_MASK;
        Self(body | (word_crc(body) as u32) << CRC_SHIFT)
    }

    /// Recompute the CRC-8 and compare it against the one carried in the word.
    pub fn is_valid(&self) -> bool {
        word_crc(self.0) == self.crc()
    }

    /// Decode a checksum-valid word carrying a known command.  Anything else is noise.
    pub fn decode(&self) -> Option<Packet> {
        if !self.is_valid() {
            return None;
        }
        let command = Command::from_fields(self.class(), self.subcommand())?;
        Some(Packet {
            command,
            id: self.command_id(),
            data: self.data(),
        })
    }

    pub fn class(&self) -> u8 {
        ((self.0 & CLASS_MASK) >> CLASS_SHIFT) as u8
    }

    pub fn subcommand(&self) -> u8 {
        ((self.0 & SUBCMD_MASK) >> SUBCMD_SHIFT) as u8
    }

    pub fn command_id(&self) -> u8 {
        ((self.0 & ID_MASK) >> ID_SHIFT) as u8
    }

    pub fn data(&self) -> u16 {
        ((self.0 & DATA_MASK) >> DATA_SHIFT) as u16
    }

    pub fn crc(&self) -> u8 {
        ((self.0 & CRC_MASK) >> CRC_SHIFT) as u8
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl From<u32> for ControlWord {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<ControlWord> for u32 {
    fn from(word: ControlWord) -> Self {
        word.0
    }
}

impl From<Packet> for ControlWord {
    fn from(packet: Packet) -> Self {
        packet.encode()
    }
}

// CRC-8 over the low 24 bits of a word, most significant byte first.
fn word_crc(word: u32) -> u8 {
    let bytes = (word & !CRC_MASK).to_be_bytes();
    crc8(&bytes[1..])
}

/// CRC-8, polynomial `0x07`, initial value `0`.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0u8;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// CRC-16-CCITT, polynomial `0x1021`, initial value `0xFFFF`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(data);
    crc.finish()
}

/// Incremental CRC-16-CCITT, for data that arrives a word at a time.
#[derive(Debug, Clone, Copy)]
pub struct Crc16(u16);

impl Crc16 {
    pub const fn new() -> Self {
        Self(0xFFFF)
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.0 ^= (byte as u16) << 8;
            for _ in 0..8 {
                self.0 = if self.0 & 0x8000 != 0 {
                    (self.0 << 1) ^ 0x1021
                } else {
                    self.0 << 1
                };
            }
        }
    }

    pub fn finish(&self) -> u16 {
        self.0
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_COMMANDS: [Command; 7] = [
        Command::Ack,
        Command::MwTxDone,
        Command::Ping,
        Command::PingReply,
        Command::KernelLoad,
        Command::MemRead,
        Command::MemWrite,
    ];

    #[test]
    fn test_crc8_check_value() {
        // CRC-8/SMBUS check value
        assert_eq!(crc8(b"123456789"), 0xF4);
    }

    #[test]
    fn test_crc16_check_value() {
        // CRC-16/CCITT-FALSE check value
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_crc16_incremental_matches_oneshot() {
        let mut crc = Crc16::new();
        crc.update(b"1234");
        crc.update(b"56789");
        assert_eq!(crc.finish(), crc16(b"123456789"));
    }

    #[test]
    fn test_field_layout() {
        let word = ControlWord::encode(1, 0, 0, 2);
        assert_eq!(word.raw() & 0x00FF_FFFF, 0x0000_0201);

        let ping = Packet::new(Command::Ping, 0x4849).encode();
        assert_eq!(ping.raw() & 0x00FF_FFFF, 0x0048_4918);
        assert_eq!(ping.class(), 0);
        assert_eq!(ping.subcommand(), 3);
        assert_eq!(ping.command_id(), 0);
        assert_eq!(ping.data(), 0x4849);
    }

    #[test]
    fn test_decode_encode() {
        for command in ALL_COMMANDS {
            for id in 0..COMMAND_IDS as u8 {
                for data in [0u16, 1, 0x4849, 0xFFFF] {
                    let packet = Packet { command, id, data };
                    let word = packet.encode();
                    assert!(word.is_valid());
                    assert_eq!(word.decode(), Some(packet));
                }
            }
        }
    }

    #[test]
    fn test_single_bit_errors_detected() {
        let words = [
            Packet::ack().encode(),
            Packet::new(Command::Ping, 0x4849).encode(),
            Packet::new(Command::MemRead, 2).encode(),
            Packet {
                command: Command::Ack,
                id: 3,
                data: 0xA55A,
            }
            .encode(),
        ];
        for word in words {
            for bit in 0..32 {
                let corrupt = ControlWord(word.raw() ^ (1 << bit));
                assert!(!corrupt.is_valid(), "{word:?} bit {bit} not detected");
                assert_eq!(corrupt.decode(), None);
            }
        }
    }

    #[test]
    fn test_unknown_command_is_noise() {
        // valid CRC, but class 2 does not exist
        let word = ControlWord::encode(2, 0, 0, 0);
        assert!(word.is_valid());
        assert_eq!(word.decode(), None);

        // valid CRC, SYSTEM subcommand 0 does not exist
        let word = ControlWord::encode(0, 0, 0, 0);
        assert!(word.is_valid());
        assert_eq!(word.decode(), None);
    }

    #[test]
    fn test_zero_word_is_not_a_command() {
        assert_eq!(ControlWord(0).decode(), None);
    }
}
