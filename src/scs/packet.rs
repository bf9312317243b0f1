// SCS control packet codec
//
// Packet format: [control, dat1, dat0, dec]
// control = mode (bits 7-6) | node id (bits 5-4) | internal state (bits 3-0)

use std::fmt;

use serde::{Deserialize, Serialize};

/// Size of a packet on the primary (unframed) link
pub const PACKET_SIZE: usize = 4;

/// System mode carried in the top two bits of every control byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Idle = 0,
    Calibrating = 1,
    Maze = 2,
    Distress = 3,
}

impl Mode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Mode::Idle,
            1 => Mode::Calibrating,
            2 => Mode::Maze,
            _ => Mode::Distress,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Mode::Idle => "IDLE",
            Mode::Calibrating => "CAL",
            Mode::Maze => "MAZE",
            Mode::Distress => "SOS",
        }
    }
}

/// Subsystem that sent a packet
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Hub = 0,
    Nav = 1,
    Motor = 2,
    Sense = 3,
}

impl NodeId {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => NodeId::Hub,
            1 => NodeId::Nav,
            2 => NodeId::Motor,
            _ => NodeId::Sense,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NodeId::Hub => "HUB",
            NodeId::Nav => "NAV",
            NodeId::Motor => "MOTOR",
            NodeId::Sense => "SENSE",
        }
    }
}

/// Decoded control byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    pub mode: Mode,
    pub node: NodeId,
    pub ist: u8,
}

impl Header {
    pub const fn new(mode: Mode, node: NodeId, ist: u8) -> Self {
        Self { mode, node, ist }
    }

    pub fn from_control(control: u8) -> Self {
        let (mode, node, ist) = decode(control);
        Self { mode, node, ist }
    }

    pub fn control(self) -> u8 {
        ((self.mode as u8) << 6) | ((self.node as u8) << 4) | (self.ist & 0x0F)
    }

    /// Whether this (mode, node, state) triple is one the protocol ever sends
    /// between nodes. The hub is a bench test station and never appears here.
    pub fn is_legal(self) -> bool {
        use Mode::*;
        use NodeId::*;
        match (self.mode, self.node) {
            (Idle, Nav) => self.ist == 0,
            (Calibrating, Nav) => self.ist == 0,
            (Calibrating, Sense) | (Calibrating, Motor) => self.ist <= 1,
            (Maze, Nav) => (1..=3).contains(&self.ist),
            (Maze, Motor) => (1..=4).contains(&self.ist),
            (Maze, Sense) => (1..=3).contains(&self.ist),
            (Distress, Nav) => self.ist == 0,
            (Distress, Motor) => self.ist == 4,
            _ => false,
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.mode.label(), self.node.label(), self.ist)
    }
}

/// A 4-byte SCS packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Packet {
    pub control: u8,
    pub dat1: u8,
    pub dat0: u8,
    pub dec: u8,
}

/// Pack the header fields and payload into a packet
pub fn encode(mode: Mode, node: NodeId, ist: u8, dat1: u8, dat0: u8, dec: u8) -> Packet {
    Packet {
        control: Header::new(mode, node, ist).control(),
        dat1,
        dat0,
        dec,
    }
}

/// Split a control byte into (mode, node, internal state). Every byte decodes.
pub fn decode(control: u8) -> (Mode, NodeId, u8) {
    (
        Mode::from_bits(control >> 6),
        NodeId::from_bits(control >> 4),
        control & 0x0F,
    )
}

impl Packet {
    pub fn new(header: Header, dat1: u8, dat0: u8, dec: u8) -> Self {
        Self {
            control: header.control(),
            dat1,
            dat0,
            dec,
        }
    }

    pub fn header(&self) -> Header {
        Header::from_control(self.control)
    }

    pub fn from_bytes(bytes: [u8; PACKET_SIZE]) -> Self {
        Self {
            control: bytes[0],
            dat1: bytes[1],
            dat0: bytes[2],
            dec: bytes[3],
        }
    }

    pub fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        [self.control, self.dat1, self.dat0, self.dec]
    }

    /// dat1:dat0 as a big-endian word
    pub fn word(&self) -> u16 {
        u16::from_be_bytes([self.dat1, self.dat0])
    }

    /// Reserved idle-line patterns (all zero or all ones)
    pub fn is_sentinel(&self) -> bool {
        let bytes = self.to_bytes();
        bytes.iter().all(|&b| b == 0x00) || bytes.iter().all(|&b| b == 0xFF)
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:02X} {:02X} {:02X}]",
            self.header(),
            self.dat1,
            self.dat0,
            self.dec
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODES: [Mode; 4] = [Mode::Idle, Mode::Calibrating, Mode::Maze, Mode::Distress];
    const NODES: [NodeId; 4] = [NodeId::Hub, NodeId::Nav, NodeId::Motor, NodeId::Sense];

    #[test]
    fn test_decode_inverts_encode() {
        for mode in MODES {
            for node in NODES {
                for ist in 0..16 {
                    let packet = encode(mode, node, ist, 0x12, 0x34, 0x05);
                    assert_eq!(decode(packet.control), (mode, node, ist));
                }
            }
        }
    }

    #[test]
    fn test_control_bit_layout() {
        // MAZE:SENSE:2 -> 10 11 0010
        let packet = encode(Mode::Maze, NodeId::Sense, 2, 0, 0, 0);
        assert_eq!(packet.control, 0xB2);
        // CAL:MOTOR:0 -> 01 10 0000
        assert_eq!(Header::new(Mode::Calibrating, NodeId::Motor, 0).control(), 0x60);
    }

    #[test]
    fn test_every_byte_decodes() {
        for control in 0..=255u8 {
            let header = Header::from_control(control);
            assert_eq!(header.control(), control);
        }
    }

    #[test]
    fn test_legal_table() {
        assert!(Header::new(Mode::Maze, NodeId::Nav, 3).is_legal());
        assert!(Header::new(Mode::Distress, NodeId::Motor, 4).is_legal());
        assert!(Header::new(Mode::Calibrating, NodeId::Sense, 1).is_legal());
        assert!(!Header::new(Mode::Maze, NodeId::Nav, 0).is_legal());
        assert!(!Header::new(Mode::Idle, NodeId::Hub, 0).is_legal());
        assert!(!Header::new(Mode::Distress, NodeId::Sense, 15).is_legal());
        assert!(!Header::new(Mode::Idle, NodeId::Motor, 1).is_legal());
    }

    #[test]
    fn test_sentinels() {
        assert!(Packet::from_bytes([0, 0, 0, 0]).is_sentinel());
        assert!(Packet::from_bytes([0xFF; 4]).is_sentinel());
        // A stop command has an empty payload but is not a sentinel
        assert!(!encode(Mode::Maze, NodeId::Nav, 3, 0, 0, 0).is_sentinel());
    }

    #[test]
    fn test_display() {
        let packet = encode(Mode::Maze, NodeId::Motor, 4, 0x01, 0x2C, 0);
        assert_eq!(packet.to_string(), "MAZE:MOTOR:4 [01 2C 00]");
        assert_eq!(packet.word(), 300);
    }
}
