// Commands and reports exchanged with the world outside the core

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::scs::{Mode, NodeId, Packet, Turn, encode};

/// Why a decision cycle could not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFault {
    MissingColors,
    StaleColors,
    MissingAngle,
    AngleOutOfRange,
    NoCalibration,
}

impl fmt::Display for InputFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InputFault::MissingColors => "no colour reading",
            InputFault::StaleColors => "colour reading is stale",
            InputFault::MissingAngle => "no incidence angle",
            InputFault::AngleOutOfRange => "measured angle out of range",
            InputFault::NoCalibration => "motor calibration not received",
        };
        f.write_str(text)
    }
}

/// Motion chosen by NAVCON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Forward { left: u8, right: u8 },
    Backward { left: u8, right: u8 },
    RotateLeft { degrees: u16 },
    RotateRight { degrees: u16 },
    Turn180Left { degrees: u16 },
    Turn180Right { degrees: u16 },
    SteeringCorrection { direction: Turn, degrees: u16 },
    DifferentialSteer { left: u8, right: u8 },
    Stop,
    ErrorStop { fault: InputFault },
}

impl Action {
    /// The wheel-level command the motor node executes for this action
    pub fn drive(&self) -> DriveCommand {
        match *self {
            Action::Forward { left, right } | Action::DifferentialSteer { left, right } => {
                DriveCommand::Forward { left, right }
            }
            Action::Backward { left, right } => DriveCommand::Backward { left, right },
            Action::RotateLeft { degrees } | Action::Turn180Left { degrees } => {
                DriveCommand::Rotate {
                    direction: Turn::Left,
                    degrees,
                }
            }
            Action::RotateRight { degrees } | Action::Turn180Right { degrees } => {
                DriveCommand::Rotate {
                    direction: Turn::Right,
                    degrees,
                }
            }
            Action::SteeringCorrection { direction, degrees } => {
                DriveCommand::Rotate { direction, degrees }
            }
            Action::Stop | Action::ErrorStop { .. } => DriveCommand::Stop,
        }
    }
}

/// One NAVCON decision plus its justification (for logs only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationCommand {
    pub action: Action,
    pub reason: String,
}

impl NavigationCommand {
    pub fn new(action: Action, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
        }
    }

    pub fn error_stop(fault: InputFault) -> Self {
        Self::new(Action::ErrorStop { fault }, fault.to_string())
    }

    /// MAZE:NAV:3 packet carrying this decision
    pub fn to_packet(&self) -> Packet {
        self.action.drive().to_packet()
    }
}

impl fmt::Display for NavigationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self.action, self.reason)
    }
}

/// Wheel-level command carried by MAZE:NAV:3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "drive", rename_all = "snake_case")]
pub enum DriveCommand {
    Forward { left: u8, right: u8 },
    Backward { left: u8, right: u8 },
    Rotate { direction: Turn, degrees: u16 },
    Stop,
}

const DRIVE_FORWARD: u8 = 0;
const DRIVE_BACKWARD: u8 = 1;
const DRIVE_STOP: u8 = 4;

impl DriveCommand {
    // dec selects the motion; forward/backward carry (right, left) speeds,
    // rotations carry degrees as a big-endian word
    pub fn to_packet(&self) -> Packet {
        let (dat1, dat0, dec) = match *self {
            DriveCommand::Forward { left, right } => (right, left, DRIVE_FORWARD),
            DriveCommand::Backward { left, right } => (right, left, DRIVE_BACKWARD),
            DriveCommand::Rotate { direction, degrees } => {
                let [hi, lo] = degrees.to_be_bytes();
                (hi, lo, direction.code())
            }
            DriveCommand::Stop => (0, 0, DRIVE_STOP),
        };
        encode(Mode::Maze, NodeId::Nav, 3, dat1, dat0, dec)
    }

    pub fn from_packet(packet: &Packet) -> Option<Self> {
        match packet.dec {
            DRIVE_FORWARD => Some(DriveCommand::Forward {
                left: packet.dat0,
                right: packet.dat1,
            }),
            DRIVE_BACKWARD => Some(DriveCommand::Backward {
                left: packet.dat0,
                right: packet.dat1,
            }),
            DRIVE_STOP => Some(DriveCommand::Stop),
            code => Turn::from_code(code).map(|direction| DriveCommand::Rotate {
                direction,
                degrees: packet.word(),
            }),
        }
    }
}

/// Node health as shown in status reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkHealth {
    Ok,
    Unsynced,
    Silent,
}

/// Snapshot printed by the status command and the periodic summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub node: NodeId,
    pub mode: Mode,
    pub health: LinkHealth,
    pub must_reply: bool,
    pub end_of_maze: bool,
    pub received: u32,
    pub sent: u32,
    pub rejected: u32,
    pub sequence_anomalies: u32,
    pub mode_drifts: u32,
    pub framing_discards: u32,
    pub last_command: Option<NavigationCommand>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_packet_layout() {
        let cmd = NavigationCommand::new(Action::Forward { left: 10, right: 12 }, "test");
        let packet = cmd.to_packet();
        assert_eq!(packet.control, 0x93);
        assert_eq!((packet.dat1, packet.dat0, packet.dec), (12, 10, 0));
    }

    #[test]
    fn test_rotation_packet_layout() {
        let packet = Action::Turn180Left { degrees: 360 }.drive().to_packet();
        assert_eq!((packet.dat1, packet.dat0, packet.dec), (0x01, 0x68, 2));
        assert_eq!(
            DriveCommand::from_packet(&packet),
            Some(DriveCommand::Rotate {
                direction: Turn::Left,
                degrees: 360
            })
        );
    }

    #[test]
    fn test_error_stop_is_stop_on_the_wire() {
        let cmd = NavigationCommand::error_stop(InputFault::StaleColors);
        assert_eq!(cmd.to_packet().dec, 4);
        assert_eq!(cmd.reason, "colour reading is stale");
    }

    #[test]
    fn test_differential_steer_is_uneven_forward() {
        let drive = Action::DifferentialSteer { left: 4, right: 10 }.drive();
        assert_eq!(drive, DriveCommand::Forward { left: 4, right: 10 });
    }

    #[test]
    fn test_command_json() {
        let cmd = NavigationCommand::new(
            Action::SteeringCorrection {
                direction: Turn::Right,
                degrees: 5,
            },
            "steer",
        );
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains(r#""action":"steering_correction""#));
        let back: NavigationCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cmd);
    }
}
