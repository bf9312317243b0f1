// Sensor node: colour/angle readings on request

use tracing::{debug, info};

use super::{Node, Triggers};
use crate::coordinator::{Coordinator, SENSOR_RULES, Verdict, rules};
use crate::scs::payload::angle_to_byte;
use crate::scs::{Colors, Header, Mode, NodeId, Packet};

/// One snapshot of the colour sensors and angle estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorReading {
    pub colors: Colors,
    pub angle: i16,
    pub end_of_maze: bool,
}

impl Default for SensorReading {
    fn default() -> Self {
        Self {
            colors: Colors::BACKGROUND,
            angle: 0,
            end_of_maze: false,
        }
    }
}

/// Source of sensor readings (photodiode front end, simulated course, ...)
pub trait ColorSensor: Send {
    fn read(&mut self) -> SensorReading;
}

/// Always reports the same reading
pub struct FixedSensor(pub SensorReading);

impl ColorSensor for FixedSensor {
    fn read(&mut self) -> SensorReading {
        self.0
    }
}

pub struct SensorNode<S: ColorSensor> {
    coordinator: Coordinator,
    sensor: S,
    auto_send: bool,
    snapshot: Option<SensorReading>,
}

impl<S: ColorSensor> SensorNode<S> {
    pub fn new(sensor: S, auto_send: bool) -> Self {
        Self {
            coordinator: Coordinator::consumer(NodeId::Sense, SENSOR_RULES),
            sensor,
            auto_send,
            snapshot: None,
        }
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    fn build(&mut self, header: Header) -> Packet {
        match (header.mode, header.ist) {
            (Mode::Calibrating, 1) => {
                let [hi, lo] = self.sensor.read().colors.pack().to_be_bytes();
                Packet::new(header, hi, lo, 0)
            }
            (Mode::Maze, 1) => {
                // Colours and angle go out from the same snapshot
                let reading = self.sensor.read();
                self.snapshot = Some(reading);
                if reading.end_of_maze {
                    info!("End of maze detected");
                    return Packet::new(rules::END_OF_MAZE, 0, 0, 0);
                }
                let [hi, lo] = reading.colors.pack().to_be_bytes();
                Packet::new(header, hi, lo, 0)
            }
            (Mode::Maze, 2) => {
                let reading = self.snapshot.take().unwrap_or_else(|| self.sensor.read());
                Packet::new(header, angle_to_byte(reading.angle), 0, 0)
            }
            _ => Packet::new(header, 0, 0, 0),
        }
    }
}

impl<S: ColorSensor> Node for SensorNode<S> {
    fn id(&self) -> NodeId {
        NodeId::Sense
    }

    fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    fn receive(&mut self, packet: &Packet, _now_ms: u64) -> Verdict {
        self.coordinator.receive(packet)
    }

    fn transmit(&mut self, triggers: &mut Triggers, _now_ms: u64) -> Vec<Packet> {
        let Some(header) = self.coordinator.next_turn() else {
            return Vec::new();
        };
        if !triggers.allow_send(self.auto_send) {
            return Vec::new();
        }
        // One packet per opportunity; the angle follows on the next one
        let packet = self.build(header);
        debug!("SENSE -> {}", packet);
        self.coordinator.sent(&packet);
        vec![packet]
    }

    fn reset(&mut self) {
        self.coordinator.reset();
        self.snapshot = None;
    }
}
