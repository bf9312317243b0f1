// The three robot nodes, each wrapping a coordinator and its local hardware
//
// - nav: owns the mode, runs NAVCON
// - sensor: answers with colour and angle readings
// - motor: executes drive commands and reports odometry

pub mod motor;
pub mod nav;
pub mod sensor;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::config::RuntimeConfig;
use crate::coordinator::{Coordinator, Verdict};
use crate::messages::{LinkHealth, NavigationCommand, StatusReport};
use crate::navcon::Calibration;
use crate::scs::{NodeId, Packet};

pub use motor::{Drivetrain, MotorNode, SimulatedDrivetrain};
pub use nav::NavNode;
pub use sensor::{ColorSensor, FixedSensor, SensorNode, SensorReading};

/// Which node this process runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Nav,
    Sensor,
    Motor,
}

impl From<Role> for NodeId {
    fn from(role: Role) -> Self {
        match role {
            Role::Nav => NodeId::Nav,
            Role::Sensor => NodeId::Sense,
            Role::Motor => NodeId::Motor,
        }
    }
}

// Straight-line travel per drive command in the simulated drivetrain
const SIM_STEP_MS: u32 = 1_000;

/// Node for `role` backed by the stand-in hardware (fixed sensor, simulated drivetrain)
pub fn build(role: Role, config: &RuntimeConfig) -> Box<dyn Node> {
    match role {
        Role::Nav => Box::new(NavNode::new(config)),
        Role::Sensor => Box::new(SensorNode::new(
            FixedSensor(SensorReading::default()),
            config.auto_send,
        )),
        Role::Motor => Box::new(MotorNode::new(
            SimulatedDrivetrain::new(SIM_STEP_MS),
            Calibration::from_payload(config.base_speed, config.correction_speed),
            config.auto_send,
        )),
    }
}

/// Edge-triggered inputs from buttons, keyboard or a test script
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Triggers {
    pub send_now: bool,
    pub touch: bool,
    pub pure_tone: bool,
}

impl Triggers {
    /// True if sending is allowed now; a manual trigger is spent
    pub fn allow_send(&mut self, auto_send: bool) -> bool {
        auto_send || std::mem::take(&mut self.send_now)
    }
}

pub trait Node: Send {
    fn id(&self) -> NodeId;

    fn coordinator(&self) -> &Coordinator;

    /// Handle a packet read off a link
    fn receive(&mut self, packet: &Packet, now_ms: u64) -> Verdict;

    /// Packets to transmit this tick
    fn transmit(&mut self, triggers: &mut Triggers, now_ms: u64) -> Vec<Packet>;

    fn reset(&mut self);

    fn last_command(&self) -> Option<&NavigationCommand> {
        None
    }

    fn report(&self, health: LinkHealth, framing_discards: u32) -> StatusReport {
        let session = self.coordinator().session();
        StatusReport {
            node: self.id(),
            mode: session.mode(),
            health,
            must_reply: session.must_reply(),
            end_of_maze: session.end_of_maze(),
            received: session.counters.received,
            sent: session.counters.sent,
            rejected: session.counters.rejected,
            sequence_anomalies: session.counters.sequence_anomalies,
            mode_drifts: session.counters.mode_drifts,
            framing_discards,
            last_command: self.last_command().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_matches_role() {
        let config = RuntimeConfig::default();
        for role in [Role::Nav, Role::Sensor, Role::Motor] {
            assert_eq!(build(role, &config).id(), NodeId::from(role));
        }
    }

    #[test]
    fn test_manual_trigger_is_spent() {
        let mut triggers = Triggers {
            send_now: true,
            ..Triggers::default()
        };
        assert!(triggers.allow_send(false));
        assert!(!triggers.allow_send(false));
        assert!(triggers.allow_send(true));
    }
}
