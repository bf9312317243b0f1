// Motor node: executes NAVCON drive commands and reports telemetry

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{debug, info};

use super::{Node, Triggers};
use crate::coordinator::{Coordinator, MOTOR_RULES, Verdict};
use crate::messages::DriveCommand;
use crate::navcon::Calibration;
use crate::scs::{Header, Mode, NodeId, Packet, Turn};

/// Longest reply burst in the motor table
const MAX_BURST: usize = 4;

/// Wheel-level hardware (or a model of it)
pub trait Drivetrain: Send {
    fn execute(&mut self, command: DriveCommand);

    fn stop(&mut self) {
        self.execute(DriveCommand::Stop);
    }

    fn battery_percent(&self) -> u8;

    /// Distance travelled since power-on (mm)
    fn distance_mm(&self) -> u16;

    fn last_rotation(&self) -> Option<(Turn, u16)>;

    /// (left, right) in mm/s
    fn wheel_speeds(&self) -> (u8, u8);
}

/// Kinematic stand-in: each straight command travels for `step_ms`
pub struct SimulatedDrivetrain {
    odometer: Arc<AtomicU32>,
    speeds: (u8, u8),
    rotation: Option<(Turn, u16)>,
    battery: u8,
    step_ms: u32,
}

impl SimulatedDrivetrain {
    pub fn new(step_ms: u32) -> Self {
        Self {
            odometer: Arc::new(AtomicU32::new(0)),
            speeds: (0, 0),
            rotation: None,
            battery: 100,
            step_ms,
        }
    }

    /// Shared handle to the odometer (mm), e.g. for a simulated course
    pub fn odometer(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.odometer)
    }
}

impl Drivetrain for SimulatedDrivetrain {
    fn execute(&mut self, command: DriveCommand) {
        self.rotation = None;
        match command {
            DriveCommand::Forward { left, right } | DriveCommand::Backward { left, right } => {
                self.speeds = (left, right);
                let mean = (left as u32 + right as u32) / 2;
                self.odometer
                    .fetch_add(mean * self.step_ms / 1000, Ordering::SeqCst);
            }
            DriveCommand::Rotate { direction, degrees } => {
                self.speeds = (0, 0);
                self.rotation = Some((direction, degrees));
            }
            DriveCommand::Stop => self.speeds = (0, 0),
        }
    }

    fn battery_percent(&self) -> u8 {
        self.battery
    }

    fn distance_mm(&self) -> u16 {
        self.odometer.load(Ordering::SeqCst).min(u16::MAX as u32) as u16
    }

    fn last_rotation(&self) -> Option<(Turn, u16)> {
        self.rotation
    }

    fn wheel_speeds(&self) -> (u8, u8) {
        self.speeds
    }
}

pub struct MotorNode<D: Drivetrain> {
    coordinator: Coordinator,
    drive: D,
    calibration: Calibration,
    auto_send: bool,
}

impl<D: Drivetrain> MotorNode<D> {
    pub fn new(drive: D, calibration: Calibration, auto_send: bool) -> Self {
        Self {
            coordinator: Coordinator::consumer(NodeId::Motor, MOTOR_RULES),
            drive,
            calibration,
            auto_send,
        }
    }

    pub fn drive(&self) -> &D {
        &self.drive
    }

    fn build(&self, header: Header) -> Packet {
        match (header.mode, header.ist) {
            (Mode::Calibrating, 0) => Packet::new(
                header,
                self.calibration.base_speed,
                self.calibration.correction_speed,
                0,
            ),
            (_, 1) => Packet::new(header, self.drive.battery_percent(), 0, 0),
            (Mode::Maze, 2) => match self.drive.last_rotation() {
                Some((direction, degrees)) => {
                    let [hi, lo] = degrees.to_be_bytes();
                    Packet::new(header, hi, lo, direction.code())
                }
                None => Packet::new(header, 0, 0, 0),
            },
            (Mode::Maze, 3) => {
                let (left, right) = self.drive.wheel_speeds();
                Packet::new(header, right, left, 0)
            }
            (_, 4) => {
                let [hi, lo] = self.drive.distance_mm().to_be_bytes();
                Packet::new(header, hi, lo, 0)
            }
            _ => Packet::new(header, 0, 0, 0),
        }
    }
}

impl<D: Drivetrain> Node for MotorNode<D> {
    fn id(&self) -> NodeId {
        NodeId::Motor
    }

    fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    fn receive(&mut self, packet: &Packet, _now_ms: u64) -> Verdict {
        let verdict = self.coordinator.receive(packet);
        if verdict != Verdict::Accepted {
            return verdict;
        }

        let header = packet.header();
        match (header.mode, header.node, header.ist) {
            (Mode::Maze, NodeId::Nav, 3) => {
                if let Some(command) = DriveCommand::from_packet(packet) {
                    debug!("Executing {:?}", command);
                    self.drive.execute(command);
                }
            }
            (Mode::Maze, NodeId::Nav, 1 | 2) if packet.dat1 == 1 => {
                info!("Stopping motors ({})", header);
                self.drive.stop();
            }
            (Mode::Maze, NodeId::Sense, 3) => self.drive.stop(),
            _ => {}
        }
        verdict
    }

    fn transmit(&mut self, triggers: &mut Triggers, _now_ms: u64) -> Vec<Packet> {
        if self.coordinator.next_turn().is_none() || !triggers.allow_send(self.auto_send) {
            return Vec::new();
        }
        let mut burst = Vec::with_capacity(MAX_BURST);
        while let Some(header) = self.coordinator.next_turn() {
            if burst.len() == MAX_BURST {
                break;
            }
            let packet = self.build(header);
            debug!("MOTOR -> {}", packet);
            self.coordinator.sent(&packet);
            burst.push(packet);
        }
        burst
    }

    fn reset(&mut self) {
        self.coordinator.reset();
        self.drive.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scs::encode;

    fn node() -> MotorNode<SimulatedDrivetrain> {
        MotorNode::new(
            SimulatedDrivetrain::new(1_000),
            Calibration::from_payload(10, 0),
            true,
        )
    }

    #[test]
    fn test_calibration_burst() {
        let mut motor = node();
        motor.receive(&encode(Mode::Idle, NodeId::Nav, 0, 1, 50, 0), 0);
        motor.receive(&encode(Mode::Calibrating, NodeId::Sense, 0, 0, 0, 0), 0);
        let sent = motor.transmit(&mut Triggers::default(), 0);
        assert_eq!(sent.len(), 2);
        assert_eq!((sent[0].dat1, sent[0].dat0), (10, 5));
        assert_eq!(sent[1].header(), Header::new(Mode::Calibrating, NodeId::Motor, 1));
        assert_eq!(sent[1].dat1, 100);
    }

    #[test]
    fn test_navcon_drives_and_reports() {
        let mut motor = node();
        motor.receive(&encode(Mode::Calibrating, NodeId::Nav, 0, 1, 0, 0), 0);

        let forward = DriveCommand::Forward { left: 8, right: 12 }.to_packet();
        motor.receive(&forward, 0);
        let sent = motor.transmit(&mut Triggers::default(), 0);
        let ists: Vec<u8> = sent.iter().map(|p| p.header().ist).collect();
        assert_eq!(ists, vec![1, 2, 3, 4]);
        assert_eq!((sent[2].dat1, sent[2].dat0), (12, 8));
        assert_eq!(sent[3].word(), 10);

        let rotate = DriveCommand::Rotate {
            direction: Turn::Right,
            degrees: 120,
        }
        .to_packet();
        motor.receive(&rotate, 0);
        let sent = motor.transmit(&mut Triggers::default(), 0);
        assert_eq!((sent[1].word(), sent[1].dec), (120, 3));
    }

    #[test]
    fn test_touch_in_maze_stops_motors() {
        let mut motor = node();
        motor.receive(&encode(Mode::Calibrating, NodeId::Nav, 0, 1, 0, 0), 0);
        motor.receive(&DriveCommand::Forward { left: 10, right: 10 }.to_packet(), 0);
        assert_eq!(motor.drive().wheel_speeds(), (10, 10));
        let _ = motor.transmit(&mut Triggers::default(), 0);

        motor.receive(&encode(Mode::Maze, NodeId::Nav, 2, 1, 0, 0), 0);
        assert_eq!(motor.coordinator().mode(), Mode::Idle);
        assert_eq!(motor.drive().wheel_speeds(), (0, 0));
        assert!(motor.transmit(&mut Triggers::default(), 0).is_empty());
    }

    #[test]
    fn test_pure_tone_stops_and_reports_distress() {
        let mut motor = node();
        motor.receive(&encode(Mode::Maze, NodeId::Nav, 1, 1, 0, 0), 0);
        assert_eq!(motor.coordinator().mode(), Mode::Distress);
        let sent = motor.transmit(&mut Triggers::default(), 0);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].header(), Header::new(Mode::Distress, NodeId::Motor, 4));
        assert_eq!(motor.drive().wheel_speeds(), (0, 0));
    }
}
