// Node control loop
//
// Each tick: drain the link into the framer, hand packets to the node, let
// the node transmit if it is its turn, mirror traffic to the uplink.
// Nothing in here blocks; link I/O errors are the only way out of the loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::{COLOR_FRESHNESS_MS, LOOP_HZ, STATUS_INTERVAL};
use crate::link::{self, ByteLink, Clock};
use crate::messages::{LinkHealth, StatusReport};
use crate::nodes::{Node, Triggers};
use crate::scs::{FrameBuffer, Framer, MarkedFrameDecoder, Packet, encode_marked};

/// Operator commands (keyboard, serial console)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManualCommand {
    Touch,
    PureTone,
    SendNow,
    Status,
    Reset,
}

impl ManualCommand {
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            't' => Some(ManualCommand::Touch),
            'p' => Some(ManualCommand::PureTone),
            's' => Some(ManualCommand::SendNow),
            '?' => Some(ManualCommand::Status),
            'r' => Some(ManualCommand::Reset),
            _ => None,
        }
    }
}

/// Secondary link speaking marked frames
struct Uplink {
    link: Box<dyn ByteLink>,
    framer: MarkedFrameDecoder,
}

pub struct Runtime {
    node: Box<dyn Node>,
    link: Box<dyn ByteLink>,
    framer: Box<dyn Framer>,
    uplink: Option<Uplink>,
    clock: Arc<dyn Clock>,
    gap_ms: u64,
    last_rx_ms: Option<u64>,
    health: LinkHealth,
}

impl Runtime {
    pub fn new(
        node: Box<dyn Node>,
        link: Box<dyn ByteLink>,
        clock: Arc<dyn Clock>,
        gap_ms: u64,
    ) -> Self {
        Self {
            node,
            link,
            framer: Box::new(FrameBuffer::new(gap_ms)),
            uplink: None,
            clock,
            gap_ms,
            last_rx_ms: None,
            health: LinkHealth::Silent, // Silent until the first packet
        }
    }

    /// Mirror every transmitted packet to `link` and accept packets injected from it
    pub fn with_uplink(mut self, link: Box<dyn ByteLink>) -> Self {
        self.uplink = Some(Uplink {
            link,
            framer: MarkedFrameDecoder::new(self.gap_ms),
        });
        self
    }

    pub fn node(&self) -> &dyn Node {
        self.node.as_ref()
    }

    pub fn health(&self) -> LinkHealth {
        self.health
    }

    /// One pass of the control loop; returns the packets sent
    pub fn tick(&mut self, triggers: &mut Triggers) -> link::Result<Vec<Packet>> {
        let now = self.clock.now_ms();

        // 1. Drain the primary link
        while let Some(byte) = self.link.read_byte()? {
            if let Some(packet) = self.framer.push(byte, now) {
                debug!("{} <- {}", self.node.id().label(), packet);
                self.last_rx_ms = Some(now);
                self.node.receive(&packet, now);
            }
        }

        // 2. Packets injected over the uplink are handled as if received
        if let Some(uplink) = &mut self.uplink {
            while let Some(byte) = uplink.link.read_byte()? {
                if let Some(packet) = uplink.framer.push(byte, now) {
                    info!("Uplink injected {}", packet);
                    self.node.receive(&packet, now);
                }
            }
        }

        // 3. Our turn?
        let sent = self.node.transmit(triggers, now);
        if !sent.is_empty() {
            let bytes: Vec<u8> = sent.iter().flat_map(|p| p.to_bytes()).collect();
            self.link.write_bytes(&bytes)?;
            self.link.flush()?;
            if let Some(uplink) = &mut self.uplink {
                for packet in &sent {
                    uplink.link.write_bytes(&encode_marked(packet))?;
                }
                uplink.link.flush()?;
            }
        }

        self.update_health(now);
        Ok(sent)
    }

    fn update_health(&mut self, now: u64) {
        let health = match self.last_rx_ms {
            None => LinkHealth::Silent,
            Some(at) if now.saturating_sub(at) > COLOR_FRESHNESS_MS => LinkHealth::Silent,
            Some(_) if !self.framer.is_synced() => LinkHealth::Unsynced,
            Some(_) => LinkHealth::Ok,
        };
        if health != self.health {
            if health == LinkHealth::Ok {
                info!("Link healthy");
            } else if self.last_rx_ms.is_some() {
                warn!("Link {:?}", health);
            }
            self.health = health;
        }
    }

    pub fn status(&self) -> StatusReport {
        self.node.report(self.health, self.framer.discards())
    }

    pub fn log_status(&self) {
        let report = self.status();
        match serde_json::to_string(&report) {
            Ok(json) => info!("Status: {}", json),
            Err(e) => warn!("Failed to encode status: {}", e),
        }
        if let Some(exp) = self.node.coordinator().expectation() {
            info!("Sequence: {}", exp);
        }
    }

    pub fn apply(&mut self, command: ManualCommand, triggers: &mut Triggers) {
        match command {
            ManualCommand::Touch => triggers.touch = true,
            ManualCommand::PureTone => triggers.pure_tone = true,
            ManualCommand::SendNow => triggers.send_now = true,
            ManualCommand::Status => self.log_status(),
            ManualCommand::Reset => self.reset(),
        }
    }

    pub fn reset(&mut self) {
        info!("Resetting {} node", self.node.id().label());
        self.node.reset();
        self.framer.reset();
        self.last_rx_ms = None;
        self.health = LinkHealth::Silent;
    }
}

/// Drive `runtime` at LOOP_HZ until ctrl-c or a link error
pub async fn run(
    mut runtime: Runtime,
    mut commands: mpsc::UnboundedReceiver<ManualCommand>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut triggers = Triggers::default();
    let mut last_status = Instant::now();

    info!(
        "{} node started: {}Hz loop, status every {}s",
        runtime.node().id().label(),
        LOOP_HZ,
        STATUS_INTERVAL.as_secs()
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }

        // Drain operator commands (non-blocking)
        while let Ok(command) = commands.try_recv() {
            runtime.apply(command, &mut triggers);
        }

        runtime.tick(&mut triggers)?;

        if last_status.elapsed() >= STATUS_INTERVAL {
            runtime.log_status();
            last_status = Instant::now();
        }
    }

    runtime.log_status();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::link::{ManualClock, MemoryBus};
    use crate::messages::Action;
    use crate::navcon::Calibration;
    use crate::nodes::{
        FixedSensor, MotorNode, NavNode, SensorNode, SensorReading, SimulatedDrivetrain,
    };
    use crate::scs::{Color, Colors, Mode, NodeId, encode};

    struct Rig {
        clock: ManualClock,
        nav: Runtime,
        sensor: Runtime,
        motor: Runtime,
        nav_triggers: Triggers,
    }

    impl Rig {
        fn new(reading: SensorReading) -> Self {
            Self::with_config(reading, RuntimeConfig::default())
        }

        fn with_config(reading: SensorReading, config: RuntimeConfig) -> Self {
            let bus = MemoryBus::new();
            let clock = ManualClock::new(0);
            let shared: Arc<dyn Clock> = Arc::new(clock.clone());
            let gap = config.inter_byte_gap_ms;

            let nav = Runtime::new(
                Box::new(NavNode::new(&config)),
                Box::new(bus.endpoint()),
                Arc::clone(&shared),
                gap,
            );
            let sensor = Runtime::new(
                Box::new(SensorNode::new(FixedSensor(reading), true)),
                Box::new(bus.endpoint()),
                Arc::clone(&shared),
                gap,
            );
            let motor = Runtime::new(
                Box::new(MotorNode::new(
                    SimulatedDrivetrain::new(1_000),
                    Calibration::from_payload(10, 0),
                    true,
                )),
                Box::new(bus.endpoint()),
                shared,
                gap,
            );
            Self {
                clock,
                nav,
                sensor,
                motor,
                nav_triggers: Triggers::default(),
            }
        }

        fn step(&mut self) {
            self.clock.advance(1);
            self.nav.tick(&mut self.nav_triggers).unwrap();
            self.sensor.tick(&mut Triggers::default()).unwrap();
            self.motor.tick(&mut Triggers::default()).unwrap();
        }

        fn run(&mut self, ticks: usize) {
            for _ in 0..ticks {
                self.step();
            }
        }

        fn touch(&mut self) {
            self.nav_triggers.touch = true;
            self.run(10);
        }
    }

    fn green_ahead() -> SensorReading {
        SensorReading {
            colors: Colors::new(Color::White, Color::Green, Color::White),
            angle: 22,
            end_of_maze: false,
        }
    }

    #[test]
    fn test_three_nodes_reach_maze_and_decide() {
        let mut rig = Rig::new(green_ahead());
        rig.run(5);
        rig.touch();
        assert_eq!(rig.nav.node().coordinator().mode(), Mode::Calibrating);
        assert_eq!(rig.sensor.node().coordinator().mode(), Mode::Calibrating);
        assert_eq!(rig.motor.node().coordinator().mode(), Mode::Calibrating);

        rig.touch();
        rig.run(40);
        for runtime in [&rig.nav, &rig.sensor, &rig.motor] {
            assert_eq!(runtime.node().coordinator().mode(), Mode::Maze);
        }

        let status = rig.nav.status();
        assert_eq!(status.sequence_anomalies, 0);
        assert_eq!(status.health, LinkHealth::Ok);
        assert_eq!(
            status.last_command.map(|c| c.action),
            Some(Action::Backward { left: 5, right: 5 })
        );
        assert!(rig.motor.status().sent >= 8);
    }

    #[test]
    fn test_end_of_maze_returns_everyone_to_idle() {
        let mut rig = Rig::new(SensorReading {
            end_of_maze: true,
            ..green_ahead()
        });
        rig.touch();
        rig.touch();
        rig.run(40);
        for runtime in [&rig.nav, &rig.sensor, &rig.motor] {
            assert_eq!(runtime.node().coordinator().mode(), Mode::Idle);
        }
        assert!(rig.nav.status().end_of_maze);

        // Quiet until the next touch
        let sent_before = rig.nav.status().sent;
        rig.run(20);
        assert_eq!(rig.nav.status().sent, sent_before);
    }

    #[test]
    fn test_strict_run_reaches_end_of_maze() {
        let config = RuntimeConfig {
            strict_sequence: true,
            ..RuntimeConfig::default()
        };
        let mut rig = Rig::with_config(
            SensorReading {
                end_of_maze: true,
                ..green_ahead()
            },
            config,
        );
        rig.touch();
        rig.touch();
        rig.run(40);
        for runtime in [&rig.nav, &rig.sensor, &rig.motor] {
            assert_eq!(runtime.node().coordinator().mode(), Mode::Idle);
        }

        let status = rig.nav.status();
        assert!(status.end_of_maze);
        assert_eq!(status.rejected, 0);
        assert_eq!(status.sequence_anomalies, 0);
    }

    #[test]
    fn test_line_noise_is_absorbed() {
        let bus = MemoryBus::new();
        let clock = ManualClock::new(0);
        let line = bus.endpoint();
        let noise = line.clone();
        let mut peer = bus.endpoint();
        let mut nav = Runtime::new(
            Box::new(NavNode::new(&RuntimeConfig::default())),
            Box::new(line),
            Arc::new(clock.clone()),
            3,
        );
        let mut triggers = Triggers::default();

        // Garbage, a quiet gap, then a real packet
        noise.inject(&[0x13, 0x9A, 0x42]);
        nav.tick(&mut triggers).unwrap();
        clock.advance(10);
        peer.write_bytes(&encode(Mode::Calibrating, NodeId::Motor, 0, 12, 6, 0).to_bytes())
            .unwrap();
        nav.tick(&mut triggers).unwrap();

        assert_eq!(nav.status().received, 1);
        assert_eq!(nav.status().rejected, 0);
    }

    #[test]
    fn test_uplink_mirrors_and_injects() {
        let bus = MemoryBus::new();
        let uplink_bus = MemoryBus::new();
        let clock = ManualClock::new(0);
        let mut host = uplink_bus.endpoint();
        let mut nav = Runtime::new(
            Box::new(NavNode::new(&RuntimeConfig::default())),
            Box::new(bus.endpoint()),
            Arc::new(clock),
            3,
        )
        .with_uplink(Box::new(uplink_bus.endpoint()));

        let mut triggers = Triggers::default();
        let sent = nav.tick(&mut triggers).unwrap();
        assert_eq!(sent.len(), 1);

        let mut mirrored = Vec::new();
        while let Some(b) = host.read_byte().unwrap() {
            mirrored.push(b);
        }
        assert_eq!(mirrored, encode_marked(&sent[0]).to_vec());

        // Neither is a legal packet, the uplink framer drops both
        for illegal in [
            encode(Mode::Idle, NodeId::Motor, 0, 0, 0, 0),
            encode(Mode::Idle, NodeId::Sense, 1, 0, 0, 0),
        ] {
            host.write_bytes(&encode_marked(&illegal)).unwrap();
            nav.tick(&mut triggers).unwrap();
        }
        assert_eq!(nav.status().received, 0);

        let colors = encode(Mode::Calibrating, NodeId::Sense, 1, 0, 0, 0);
        host.write_bytes(&encode_marked(&colors)).unwrap();
        nav.tick(&mut triggers).unwrap();
        assert_eq!(nav.status().received, 1);
    }

    #[test]
    fn test_manual_keys() {
        assert_eq!(ManualCommand::from_key('t'), Some(ManualCommand::Touch));
        assert_eq!(ManualCommand::from_key('?'), Some(ManualCommand::Status));
        assert_eq!(ManualCommand::from_key('x'), None);
    }
}
