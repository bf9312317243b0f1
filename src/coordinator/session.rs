// Per-node session state, owned by exactly one node loop

use std::collections::VecDeque;

use tracing::info;

use crate::scs::{Header, Mode, NodeId, Packet};

/// Progress of the sensor node's two-part colour/angle transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendSequence {
    #[default]
    None,
    AwaitingColorSend,
    AwaitingAngleSend,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub received: u32,
    pub sent: u32,
    pub rejected: u32,
    pub sequence_anomalies: u32,
    pub mode_drifts: u32,
}

pub struct NodeSession {
    node: NodeId,
    mode: Mode,
    last_control: Option<u8>,
    must_reply: bool,
    sequence: SendSequence,
    outbox: VecDeque<Header>,
    end_of_maze: bool,
    pub counters: Counters,
}

impl NodeSession {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            mode: Mode::Idle,
            last_control: None,
            must_reply: false,
            sequence: SendSequence::None,
            outbox: VecDeque::new(),
            end_of_maze: false,
            counters: Counters::default(),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode, cause: &str) {
        if mode != self.mode {
            info!(
                "{} mode {} -> {} ({})",
                self.node.label(),
                self.mode.label(),
                mode.label(),
                cause
            );
            self.mode = mode;
        }
    }

    pub fn last_control(&self) -> Option<u8> {
        self.last_control
    }

    pub fn must_reply(&self) -> bool {
        self.must_reply
    }

    pub fn set_must_reply(&mut self, must_reply: bool) {
        self.must_reply = must_reply;
    }

    pub fn sequence(&self) -> SendSequence {
        self.sequence
    }

    pub fn set_sequence(&mut self, sequence: SendSequence) {
        self.sequence = sequence;
        self.refresh_must_reply();
    }

    pub fn outbox(&self) -> &VecDeque<Header> {
        &self.outbox
    }

    /// Replace any unsent replies with a new burst
    pub fn queue(&mut self, replies: &[Header]) {
        self.outbox.clear();
        self.outbox.extend(replies.iter().copied());
        self.refresh_must_reply();
    }

    pub fn pop_outbox(&mut self) -> Option<Header> {
        let next = self.outbox.pop_front();
        self.refresh_must_reply();
        next
    }

    fn refresh_must_reply(&mut self) {
        self.must_reply = self.sequence != SendSequence::None || !self.outbox.is_empty();
    }

    pub fn end_of_maze(&self) -> bool {
        self.end_of_maze
    }

    pub fn set_end_of_maze(&mut self, latched: bool) {
        self.end_of_maze = latched;
    }

    pub fn observe(&mut self, packet: &Packet) {
        self.last_control = Some(packet.control);
        self.counters.received += 1;
    }

    pub fn record_sent(&mut self) {
        self.counters.sent += 1;
    }

    /// Back to power-on state; counters survive for diagnostics
    pub fn reset(&mut self) {
        info!("{} session reset", self.node.label());
        let counters = self.counters;
        *self = Self::new(self.node);
        self.counters = counters;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_must_reply_follows_pending_work() {
        let mut session = NodeSession::new(NodeId::Motor);
        assert!(!session.must_reply());

        session.queue(&[
            Header::new(Mode::Calibrating, NodeId::Motor, 0),
            Header::new(Mode::Calibrating, NodeId::Motor, 1),
        ]);
        assert!(session.must_reply());
        session.pop_outbox();
        assert!(session.must_reply());
        session.pop_outbox();
        assert!(!session.must_reply());

        session.set_sequence(SendSequence::AwaitingAngleSend);
        assert!(session.must_reply());
    }

    #[test]
    fn test_reset_keeps_counters() {
        let mut session = NodeSession::new(NodeId::Sense);
        session.set_mode(Mode::Maze, "test");
        session.observe(&Packet::from_bytes([0xA1, 0, 0, 0]));
        session.reset();
        assert_eq!(session.mode(), Mode::Idle);
        assert_eq!(session.last_control(), None);
        assert_eq!(session.counters.received, 1);
    }
}
