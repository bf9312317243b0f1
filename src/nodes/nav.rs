// Navigation node: decides the mode, speaks first, runs NAVCON

use tracing::{debug, info};

use super::{Node, Triggers};
use crate::config::RuntimeConfig;
use crate::coordinator::expectation::{
    CAL_TOUCH, IDLE_TOUCH, MAZE_NAVCON, MAZE_TONE, MAZE_TOUCH, SOS_TONE,
};
use crate::coordinator::{Coordinator, Verdict};
use crate::messages::NavigationCommand;
use crate::navcon::{Calibration, Navcon};
use crate::scs::payload::angle_from_byte;
use crate::scs::{Colors, Mode, NodeId, Packet};

// dat0 of the IDLE touch packet
const IDLE_RESERVED: u8 = 50;

pub struct NavNode {
    coordinator: Coordinator,
    navcon: Navcon,
    auto_send: bool,
    sos_resend_ms: u64,
    touch_pending: bool,
    tone_pending: bool,
    last_sos_ms: Option<u64>,
}

impl NavNode {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            coordinator: Coordinator::producer(config.strict_sequence),
            navcon: Navcon::new(config),
            auto_send: config.auto_send,
            sos_resend_ms: config.sos_resend_ms,
            touch_pending: false,
            tone_pending: false,
            last_sos_ms: None,
        }
    }

    pub fn navcon(&self) -> &Navcon {
        &self.navcon
    }

    fn flag(pending: &mut bool) -> u8 {
        std::mem::take(pending) as u8
    }
}

impl Node for NavNode {
    fn id(&self) -> NodeId {
        NodeId::Nav
    }

    fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    fn receive(&mut self, packet: &Packet, now_ms: u64) -> Verdict {
        let verdict = self.coordinator.receive(packet);
        if verdict != Verdict::Accepted {
            return verdict;
        }

        let header = packet.header();
        match (header.mode, header.node, header.ist) {
            (Mode::Calibrating, NodeId::Motor, 0) => {
                self.navcon
                    .set_calibration(Calibration::from_payload(packet.dat1, packet.dat0));
            }
            (_, NodeId::Sense, 1) => {
                if let Some(colors) = Colors::unpack(packet.word()) {
                    debug!("Colours {}", colors);
                    self.navcon.set_colors(colors, now_ms);
                }
            }
            (Mode::Maze, NodeId::Sense, 2) => self.navcon.set_angle(angle_from_byte(packet.dat1)),
            (_, NodeId::Motor, 4) => self.navcon.set_distance(packet.word()),
            (Mode::Maze, NodeId::Sense, 3) => info!("End of maze reached, waiting for touch"),
            _ => {}
        }
        verdict
    }

    fn transmit(&mut self, triggers: &mut Triggers, now_ms: u64) -> Vec<Packet> {
        self.touch_pending |= std::mem::take(&mut triggers.touch);
        self.tone_pending |= std::mem::take(&mut triggers.pure_tone);

        // A touch in IDLE starts a run whether or not it is our turn
        if self.coordinator.mode() == Mode::Idle && self.touch_pending {
            let packet = Packet::new(IDLE_TOUCH, Self::flag(&mut self.touch_pending), IDLE_RESERVED, 0);
            self.navcon.reset();
            self.coordinator.sent(&packet);
            return vec![packet];
        }

        let Some(turn) = self.coordinator.next_turn() else {
            return Vec::new();
        };
        if turn == SOS_TONE
            && let Some(last) = self.last_sos_ms
            && now_ms.saturating_sub(last) < self.sos_resend_ms
        {
            return Vec::new();
        }
        if !triggers.allow_send(self.auto_send) {
            return Vec::new();
        }

        let packet = match turn {
            IDLE_TOUCH => Packet::new(turn, 0, IDLE_RESERVED, 0),
            CAL_TOUCH | MAZE_TOUCH => Packet::new(turn, Self::flag(&mut self.touch_pending), 0, 0),
            MAZE_TONE => Packet::new(turn, Self::flag(&mut self.tone_pending), 0, 0),
            SOS_TONE => {
                self.last_sos_ms = Some(now_ms);
                Packet::new(turn, Self::flag(&mut self.tone_pending), 0, 0)
            }
            MAZE_NAVCON => self.navcon.cycle(now_ms).to_packet(),
            other => Packet::new(other, 0, 0, 0),
        };
        debug!("NAV -> {}", packet);
        self.coordinator.sent(&packet);
        vec![packet]
    }

    fn reset(&mut self) {
        self.coordinator.reset();
        self.navcon.reset();
        self.touch_pending = false;
        self.tone_pending = false;
        self.last_sos_ms = None;
    }

    fn last_command(&self) -> Option<&NavigationCommand> {
        self.navcon.last_command()
    }
}
