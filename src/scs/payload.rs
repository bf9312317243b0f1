// Payload layouts for the packets nodes exchange
//
// Colour word (SENSE:1): dat1:dat0 as 16 bits, left in bits 8-6,
// center in bits 5-3, right in bits 2-0.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::packet::{Header, Mode, NodeId, Packet};

/// Colour codes reported by the sensor node
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    White = 0,
    Red = 1,
    Green = 2,
    Blue = 3,
    Black = 4,
}

/// What a colour means to the navigation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorClass {
    Background,
    End,
    Navigable,
    Obstacle,
}

impl Color {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Color::White),
            1 => Some(Color::Red),
            2 => Some(Color::Green),
            3 => Some(Color::Blue),
            4 => Some(Color::Black),
            _ => None,
        }
    }

    pub fn class(self) -> ColorClass {
        match self {
            Color::White => ColorClass::Background,
            Color::Red => ColorClass::End,
            Color::Green => ColorClass::Navigable,
            Color::Blue | Color::Black => ColorClass::Obstacle,
        }
    }

    pub fn is_background(self) -> bool {
        self.class() == ColorClass::Background
    }
}

/// Logical sensor channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Left,
    Center,
    Right,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Left, Channel::Center, Channel::Right];

    pub fn index(self) -> usize {
        match self {
            Channel::Left => 0,
            Channel::Center => 1,
            Channel::Right => 2,
        }
    }
}

/// One reading of all three colour sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Colors {
    pub left: Color,
    pub center: Color,
    pub right: Color,
}

impl Colors {
    pub const BACKGROUND: Colors = Colors::new(Color::White, Color::White, Color::White);

    pub const fn new(left: Color, center: Color, right: Color) -> Self {
        Self {
            left,
            center,
            right,
        }
    }

    pub fn get(&self, channel: Channel) -> Color {
        match channel {
            Channel::Left => self.left,
            Channel::Center => self.center,
            Channel::Right => self.right,
        }
    }

    pub fn set(&mut self, channel: Channel, color: Color) {
        match channel {
            Channel::Left => self.left = color,
            Channel::Center => self.center = color,
            Channel::Right => self.right = color,
        }
    }

    pub fn all(&self, class: ColorClass) -> bool {
        Channel::ALL.iter().all(|&c| self.get(c).class() == class)
    }

    /// First channel (left to right) showing `class`
    pub fn find(&self, class: ColorClass) -> Option<Channel> {
        Channel::ALL
            .into_iter()
            .find(|&c| self.get(c).class() == class)
    }

    pub fn pack(&self) -> u16 {
        ((self.left as u16) << 6) | ((self.center as u16) << 3) | (self.right as u16)
    }

    /// Unpack a colour word; None if any field holds an unknown code
    pub fn unpack(word: u16) -> Option<Self> {
        let field = |shift: u16| Color::from_code(((word >> shift) & 0b111) as u8);
        Some(Self::new(field(6)?, field(3)?, field(0)?))
    }
}

impl fmt::Display for Colors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}/{:?}", self.left, self.center, self.right)
    }
}

/// Rotation direction as carried in MOTOR:2 and NAV:3 `dec` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Turn {
    Left,
    Right,
}

impl Turn {
    pub fn code(self) -> u8 {
        match self {
            Turn::Left => 2,
            Turn::Right => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            2 => Some(Turn::Left),
            3 => Some(Turn::Right),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Turn::Left => Turn::Right,
            Turn::Right => Turn::Left,
        }
    }
}

/// Largest angle magnitude the sensor node can report
pub const MAX_REPORTED_ANGLE: i16 = 90;

/// Largest NAVCON `dec` selector (stop)
pub const MAX_DRIVE_CODE: u8 = 4;

/// Reasons a structurally valid packet is refused
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PacketRejected {
    #[error("{header}: unknown colour code in word 0x{word:04X}")]
    BadColor { header: Header, word: u16 },

    #[error("{header}: angle {angle} outside +/-90")]
    BadAngle { header: Header, angle: i16 },

    #[error("{header}: flag byte must be 0 or 1, got {value}")]
    BadFlag { header: Header, value: u8 },

    #[error("{header}: unknown rotation direction {code}")]
    BadDirection { header: Header, code: u8 },

    #[error("{header}: calibration base speed is zero")]
    ZeroBaseSpeed { header: Header },

    #[error("{header}: unknown drive selector {code}")]
    BadDriveCode { header: Header, code: u8 },
}

pub fn angle_from_byte(byte: u8) -> i16 {
    byte as i8 as i16
}

pub fn angle_to_byte(degrees: i16) -> u8 {
    degrees.clamp(i8::MIN as i16, i8::MAX as i16) as i8 as u8
}

/// Check the payload of a packet before it is allowed to touch any state
pub fn validate(packet: &Packet) -> Result<(), PacketRejected> {
    let header = packet.header();
    match (header.mode, header.node, header.ist) {
        (_, NodeId::Sense, 1) => {
            if Colors::unpack(packet.word()).is_none() {
                return Err(PacketRejected::BadColor {
                    header,
                    word: packet.word(),
                });
            }
        }
        (Mode::Maze, NodeId::Sense, 2) => {
            let angle = angle_from_byte(packet.dat1);
            if angle.abs() > MAX_REPORTED_ANGLE {
                return Err(PacketRejected::BadAngle { header, angle });
            }
        }
        (_, NodeId::Nav, 0) | (Mode::Maze, NodeId::Nav, 1) | (Mode::Maze, NodeId::Nav, 2) => {
            if packet.dat1 > 1 {
                return Err(PacketRejected::BadFlag {
                    header,
                    value: packet.dat1,
                });
            }
        }
        (Mode::Maze, NodeId::Nav, 3) => {
            if packet.dec > MAX_DRIVE_CODE {
                return Err(PacketRejected::BadDriveCode {
                    header,
                    code: packet.dec,
                });
            }
        }
        (Mode::Maze, NodeId::Motor, 2) => {
            if packet.dec != 0 && Turn::from_code(packet.dec).is_none() {
                return Err(PacketRejected::BadDirection {
                    header,
                    code: packet.dec,
                });
            }
        }
        (Mode::Calibrating, NodeId::Motor, 0) => {
            if packet.dat1 == 0 {
                return Err(PacketRejected::ZeroBaseSpeed { header });
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scs::packet::encode;

    #[test]
    fn test_color_word_layout() {
        let colors = Colors::new(Color::Red, Color::Green, Color::Black);
        // 001 010 100
        assert_eq!(colors.pack(), 0b001_010_100);
        assert_eq!(Colors::unpack(colors.pack()), Some(colors));
        assert_eq!(Colors::BACKGROUND.pack(), 0);
    }

    #[test]
    fn test_unknown_color_code() {
        assert_eq!(Colors::unpack(0b111 << 3), None);
    }

    #[test]
    fn test_find_and_all() {
        let colors = Colors::new(Color::White, Color::Blue, Color::Black);
        assert_eq!(colors.find(ColorClass::Obstacle), Some(Channel::Center));
        assert_eq!(colors.find(ColorClass::End), None);
        assert!(Colors::new(Color::Red, Color::Red, Color::Red).all(ColorClass::End));
    }

    #[test]
    fn test_angle_bytes() {
        assert_eq!(angle_from_byte(angle_to_byte(-30)), -30);
        assert_eq!(angle_from_byte(0xE2), -30);
        assert_eq!(angle_to_byte(500), 127);
    }

    #[test]
    fn test_validate() {
        let angle = |deg: i16| encode(Mode::Maze, NodeId::Sense, 2, angle_to_byte(deg), 0, 0);
        assert!(validate(&angle(45)).is_ok());
        assert!(matches!(
            validate(&angle(100)),
            Err(PacketRejected::BadAngle { angle: 100, .. })
        ));

        let touch = encode(Mode::Idle, NodeId::Nav, 0, 2, 50, 0);
        assert!(matches!(validate(&touch), Err(PacketRejected::BadFlag { value: 2, .. })));

        let colors = encode(Mode::Maze, NodeId::Sense, 1, 0x01, 0xC0, 0);
        assert!(matches!(validate(&colors), Err(PacketRejected::BadColor { .. })));

        let calibration = encode(Mode::Calibrating, NodeId::Motor, 0, 0, 10, 0);
        assert!(validate(&calibration).is_err());

        let rotation = encode(Mode::Maze, NodeId::Motor, 2, 0, 90, 7);
        assert!(validate(&rotation).is_err());
    }
}
