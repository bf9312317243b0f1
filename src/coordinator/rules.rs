// Reply tables for the sensor and motor nodes
//
// Each row reads: on seeing `on` (optionally with a given flag in dat1),
// this node owes `reply`.

use crate::scs::{Header, Mode, NodeId, Packet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Fixed list of packets sent back-to-back
    Burst(&'static [Header]),
    /// Colours now, angle on the next transmit opportunity
    ColorThenAngle,
}

#[derive(Debug, Clone, Copy)]
pub struct ReplyRule {
    pub on: Header,
    pub flag: Option<u8>,
    pub reply: Reply,
}

impl ReplyRule {
    pub fn matches(&self, packet: &Packet) -> bool {
        packet.header() == self.on && self.flag.is_none_or(|flag| packet.dat1 == flag)
    }
}

const fn h(mode: Mode, node: NodeId, ist: u8) -> Header {
    Header::new(mode, node, ist)
}

const fn rule(on: Header, flag: Option<u8>, reply: Reply) -> ReplyRule {
    ReplyRule { on, flag, reply }
}

pub const COLORS: Header = h(Mode::Maze, NodeId::Sense, 1);
pub const ANGLE: Header = h(Mode::Maze, NodeId::Sense, 2);
pub const END_OF_MAZE: Header = h(Mode::Maze, NodeId::Sense, 3);

const SENSE_CAL_DONE: &[Header] = &[h(Mode::Calibrating, NodeId::Sense, 0)];
const SENSE_CAL_COLORS: &[Header] = &[h(Mode::Calibrating, NodeId::Sense, 1)];
const MOTOR_CALIBRATION: &[Header] = &[
    h(Mode::Calibrating, NodeId::Motor, 0),
    h(Mode::Calibrating, NodeId::Motor, 1),
];
const MOTOR_BATTERY: &[Header] = &[h(Mode::Calibrating, NodeId::Motor, 1)];
const MOTOR_TELEMETRY: &[Header] = &[
    h(Mode::Maze, NodeId::Motor, 1),
    h(Mode::Maze, NodeId::Motor, 2),
    h(Mode::Maze, NodeId::Motor, 3),
    h(Mode::Maze, NodeId::Motor, 4),
];
const MOTOR_STOPPED: &[Header] = &[h(Mode::Distress, NodeId::Motor, 4)];

pub static SENSOR_RULES: &[ReplyRule] = &[
    rule(h(Mode::Idle, NodeId::Nav, 0), Some(1), Reply::Burst(SENSE_CAL_DONE)),
    rule(h(Mode::Calibrating, NodeId::Motor, 1), None, Reply::Burst(SENSE_CAL_COLORS)),
    rule(h(Mode::Maze, NodeId::Motor, 4), None, Reply::ColorThenAngle),
];

pub static MOTOR_RULES: &[ReplyRule] = &[
    rule(h(Mode::Calibrating, NodeId::Sense, 0), None, Reply::Burst(MOTOR_CALIBRATION)),
    rule(h(Mode::Calibrating, NodeId::Nav, 0), Some(0), Reply::Burst(MOTOR_BATTERY)),
    rule(h(Mode::Maze, NodeId::Nav, 3), None, Reply::Burst(MOTOR_TELEMETRY)),
    rule(h(Mode::Maze, NodeId::Nav, 1), Some(1), Reply::Burst(MOTOR_STOPPED)),
];

pub fn lookup(rules: &[ReplyRule], packet: &Packet) -> Option<Reply> {
    rules.iter().find(|r| r.matches(packet)).map(|r| r.reply)
}
