// Turn-taking coordinator
//
// Every node runs one of these. The navigation node is the producer: it owns
// the global mode and tracks which peer should speak next. Sensor and motor
// nodes are consumers: they infer the mode from traffic and answer according
// to their reply table.

pub mod expectation;
pub mod rules;
pub mod session;

use tracing::{debug, warn};

use crate::scs::{Header, Mode, NodeId, Packet, validate};

pub use expectation::{Expectation, SequenceAnomaly};
pub use rules::{MOTOR_RULES, Reply, ReplyRule, SENSOR_RULES};
pub use session::{Counters, NodeSession, SendSequence};

/// Outcome of offering a received packet to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// Our own transmission coming back on a shared line
    Ignored,
    Rejected,
}

enum Role {
    Producer(Expectation),
    Consumer(&'static [ReplyRule]),
}

/// Mode change caused by a packet, if any
pub fn mode_after(packet: &Packet) -> Option<Mode> {
    use Mode::*;
    use NodeId::*;
    let header = packet.header();
    let flag = packet.dat1 == 1;
    match (header.mode, header.node, header.ist) {
        (Idle, Nav, 0) if flag => Some(Calibrating),
        (Calibrating, Nav, 0) if flag => Some(Maze),
        (Maze, Nav, 1) if flag => Some(Distress),
        (Maze, Nav, 2) if flag => Some(Idle),
        (Distress, Nav, 0) if flag => Some(Maze),
        (Maze, Sense, 3) => Some(Idle),
        _ => None,
    }
}

pub struct Coordinator {
    session: NodeSession,
    role: Role,
    strict: bool,
}

impl Coordinator {
    /// Coordinator for the navigation node
    pub fn producer(strict: bool) -> Self {
        let mut session = NodeSession::new(NodeId::Nav);
        session.set_must_reply(true);
        Self {
            session,
            role: Role::Producer(Expectation::default()),
            strict,
        }
    }

    /// Coordinator for a node that answers according to `rules`
    pub fn consumer(node: NodeId, rules: &'static [ReplyRule]) -> Self {
        Self {
            session: NodeSession::new(node),
            role: Role::Consumer(rules),
            strict: false,
        }
    }

    pub fn session(&self) -> &NodeSession {
        &self.session
    }

    pub fn mode(&self) -> Mode {
        self.session.mode()
    }

    pub fn expectation(&self) -> Option<&Expectation> {
        match &self.role {
            Role::Producer(exp) => Some(exp),
            Role::Consumer(_) => None,
        }
    }

    /// Header this node owes next, if it is its turn
    pub fn next_turn(&self) -> Option<Header> {
        match &self.role {
            Role::Producer(exp) => exp.turn(),
            Role::Consumer(_) => match self.session.sequence() {
                SendSequence::AwaitingColorSend => Some(rules::COLORS),
                SendSequence::AwaitingAngleSend => Some(rules::ANGLE),
                SendSequence::None => self.session.outbox().front().copied(),
            },
        }
    }

    /// Process a packet read off the link
    pub fn receive(&mut self, packet: &Packet) -> Verdict {
        let header = packet.header();
        if header.node == self.session.node() {
            debug!("Ignoring own packet {}", packet);
            return Verdict::Ignored;
        }

        if let Err(e) = validate(packet) {
            warn!("Discarding packet: {}", e);
            self.session.counters.rejected += 1;
            return Verdict::Rejected;
        }

        if let Role::Producer(exp) = &self.role
            && let Err(anomaly) = exp.check(header)
        {
            self.session.counters.sequence_anomalies += 1;
            if self.strict {
                warn!("Rejecting out-of-turn packet: {}", anomaly);
                self.session.counters.rejected += 1;
                return Verdict::Rejected;
            }
            warn!("Sequence anomaly: {}", anomaly);
        }

        self.session.observe(packet);
        self.track_mode(packet);

        match &mut self.role {
            Role::Producer(exp) => {
                exp.on_peer(header);
                if header == rules::END_OF_MAZE {
                    exp.finish();
                    self.session.set_end_of_maze(true);
                }
                self.session.set_must_reply(exp.turn().is_some());
            }
            Role::Consumer(table) => {
                if self.session.sequence() != SendSequence::None {
                    debug!(
                        "{:?} in progress, reply table skipped for {}",
                        self.session.sequence(),
                        header
                    );
                } else if let Some(reply) = rules::lookup(*table, packet) {
                    match reply {
                        Reply::Burst(replies) => self.session.queue(replies),
                        Reply::ColorThenAngle => {
                            self.session.set_sequence(SendSequence::AwaitingColorSend)
                        }
                    }
                }
            }
        }
        Verdict::Accepted
    }

    /// Compare the packet's mode with ours, then apply any transition it causes
    fn track_mode(&mut self, packet: &Packet) {
        let header = packet.header();
        let believed = self.session.mode();
        if header.mode != believed {
            self.session.counters.mode_drifts += 1;
            let adopt = header.node == NodeId::Nav && matches!(self.role, Role::Consumer(_));
            warn!(
                "{} believes {} but saw {}{}",
                self.session.node().label(),
                believed.label(),
                header,
                if adopt { ", adopting" } else { "" }
            );
            if adopt {
                self.session.set_mode(header.mode, "resync from navigation node");
            }
        }

        if let Some(mode) = mode_after(packet) {
            self.session.set_mode(mode, &header.to_string());
            if header == rules::END_OF_MAZE {
                self.session.set_end_of_maze(true);
            }
        }
    }

    /// Record that `packet` went out on the link
    pub fn sent(&mut self, packet: &Packet) {
        let header = packet.header();
        self.session.record_sent();
        if let Some(mode) = mode_after(packet) {
            self.session.set_mode(mode, &header.to_string());
        }

        match &mut self.role {
            Role::Producer(exp) => {
                let flag = packet.dat1 == 1;
                exp.on_own(header, flag);
                if header.mode == Mode::Idle && flag {
                    self.session.set_end_of_maze(false);
                }
                self.session.set_must_reply(exp.turn().is_some());
            }
            Role::Consumer(_) => match (self.session.sequence(), header) {
                (SendSequence::AwaitingColorSend, rules::COLORS) => {
                    self.session.set_sequence(SendSequence::AwaitingAngleSend)
                }
                (SendSequence::AwaitingColorSend, rules::END_OF_MAZE) => {
                    self.session.set_end_of_maze(true);
                    self.session.set_sequence(SendSequence::None)
                }
                (SendSequence::AwaitingAngleSend, rules::ANGLE) => {
                    self.session.set_sequence(SendSequence::None)
                }
                _ => {
                    if self.session.outbox().front() == Some(&header) {
                        self.session.pop_outbox();
                    } else {
                        debug!("Sent {} outside the reply plan", header);
                    }
                }
            },
        }
    }

    pub fn reset(&mut self) {
        self.session.reset();
        if let Role::Producer(exp) = &mut self.role {
            *exp = Expectation::default();
            self.session.set_must_reply(true);
        }
    }
}
