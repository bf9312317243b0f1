// Navigation node's view of the conversation order
//
// `expected` is the next packet a peer should send; `turn` is the next packet
// the navigation node itself owes. Both advance from observed and sent traffic.

use std::fmt;

use crate::scs::{Header, Mode, NodeId};

const fn h(mode: Mode, node: NodeId, ist: u8) -> Header {
    Header::new(mode, node, ist)
}

pub const IDLE_TOUCH: Header = h(Mode::Idle, NodeId::Nav, 0);
pub const CAL_TOUCH: Header = h(Mode::Calibrating, NodeId::Nav, 0);
pub const MAZE_TONE: Header = h(Mode::Maze, NodeId::Nav, 1);
pub const MAZE_TOUCH: Header = h(Mode::Maze, NodeId::Nav, 2);
pub const MAZE_NAVCON: Header = h(Mode::Maze, NodeId::Nav, 3);
pub const SOS_TONE: Header = h(Mode::Distress, NodeId::Nav, 0);

const MAZE_COLORS: Header = h(Mode::Maze, NodeId::Sense, 1);
const MAZE_END: Header = h(Mode::Maze, NodeId::Sense, 3);

/// Order in which peers speak, and when the navigation node gets the floor
pub fn after_peer(header: Header) -> (Option<Header>, Option<Header>) {
    use Mode::*;
    use NodeId::*;
    match (header.mode, header.node, header.ist) {
        (Calibrating, Sense, 0) => (Some(h(Calibrating, Motor, 0)), None),
        (Calibrating, Motor, 0) => (Some(h(Calibrating, Motor, 1)), None),
        (Calibrating, Motor, 1) => (Some(h(Calibrating, Sense, 1)), None),
        (Calibrating, Sense, 1) => (None, Some(CAL_TOUCH)),
        (Maze, Motor, ist @ 1..=3) => (Some(h(Maze, Motor, ist + 1)), None),
        (Maze, Motor, 4) => (Some(h(Maze, Sense, 1)), None),
        (Maze, Sense, 1) => (Some(h(Maze, Sense, 2)), None),
        (Maze, Sense, 2) => (Some(h(Maze, Motor, 1)), Some(MAZE_TONE)),
        (Distress, Motor, 4) => (None, Some(SOS_TONE)),
        _ => (None, None),
    }
}

/// Where the conversation goes after the navigation node sends `header` with
/// the given flag byte
pub fn after_own(header: Header, flag: bool) -> (Option<Header>, Option<Header>) {
    use Mode::*;
    use NodeId::*;
    match (header.mode, header.ist, flag) {
        (Idle, _, true) => (Some(h(Calibrating, Sense, 0)), None),
        (Idle, _, false) => (None, None),
        (Calibrating, _, true) => (None, Some(MAZE_TONE)),
        (Calibrating, _, false) => (Some(h(Calibrating, Motor, 1)), None),
        (Maze, 1, true) => (Some(h(Distress, Motor, 4)), None),
        (Maze, 1, false) => (None, Some(MAZE_TOUCH)),
        (Maze, 2, true) => (None, Some(IDLE_TOUCH)),
        (Maze, 2, false) => (None, Some(MAZE_NAVCON)),
        (Maze, _, _) => (Some(h(Maze, Motor, 1)), None),
        (Distress, _, true) => (None, Some(MAZE_TONE)),
        (Distress, _, false) => (None, Some(SOS_TONE)),
    }
}

/// A packet that arrived out of turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SequenceAnomaly {
    #[error("expected {expected}, got {got}")]
    OutOfOrder { expected: Header, got: Header },

    #[error("{got} arrived while nothing was expected")]
    Unsolicited { got: Header },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    expected: Option<Header>,
    turn: Option<Header>,
}

impl Default for Expectation {
    fn default() -> Self {
        Self {
            expected: None,
            turn: Some(IDLE_TOUCH),
        }
    }
}

impl Expectation {
    pub fn expected(&self) -> Option<Header> {
        self.expected
    }

    pub fn turn(&self) -> Option<Header> {
        self.turn
    }

    pub fn check(&self, got: Header) -> Result<(), SequenceAnomaly> {
        match self.expected {
            Some(expected) if expected == got => Ok(()),
            // The sensor answers with end of maze instead of colours
            Some(MAZE_COLORS) if got == MAZE_END => Ok(()),
            Some(expected) => Err(SequenceAnomaly::OutOfOrder { expected, got }),
            None => Err(SequenceAnomaly::Unsolicited { got }),
        }
    }

    pub fn on_peer(&mut self, header: Header) {
        let (expected, turn) = after_peer(header);
        self.expected = expected;
        if turn.is_some() {
            self.turn = turn;
        }
    }

    pub fn on_own(&mut self, header: Header, flag: bool) {
        let (expected, turn) = after_own(header, flag);
        self.expected = expected;
        self.turn = turn;
    }

    /// Maze finished: stay quiet until a new touch
    pub fn finish(&mut self) {
        self.expected = None;
        self.turn = None;
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.expected, self.turn) {
            (_, Some(turn)) => write!(f, "own turn: {}", turn),
            (Some(expected), None) => write!(f, "waiting for {}", expected),
            (None, None) => f.write_str("quiet"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sense_progression() {
        let mut exp = Expectation::default();
        exp.on_peer(h(Mode::Maze, NodeId::Sense, 1));
        assert_eq!(exp.expected(), Some(h(Mode::Maze, NodeId::Sense, 2)));
        exp.on_peer(h(Mode::Maze, NodeId::Sense, 2));
        assert_eq!(exp.expected(), Some(h(Mode::Maze, NodeId::Motor, 1)));
        assert_eq!(exp.turn(), Some(MAZE_TONE));
    }

    #[test]
    fn test_full_maze_cycle() {
        let mut exp = Expectation::default();
        exp.on_own(MAZE_TONE, false);
        exp.on_own(MAZE_TOUCH, false);
        assert_eq!(exp.turn(), Some(MAZE_NAVCON));
        exp.on_own(MAZE_NAVCON, false);
        assert_eq!(exp.turn(), None);

        for ist in 1..=4 {
            let header = h(Mode::Maze, NodeId::Motor, ist);
            assert!(exp.check(header).is_ok());
            exp.on_peer(header);
        }
        for ist in 1..=2 {
            let header = h(Mode::Maze, NodeId::Sense, ist);
            assert!(exp.check(header).is_ok());
            exp.on_peer(header);
        }
        assert_eq!(exp.turn(), Some(MAZE_TONE));
    }

    #[test]
    fn test_calibration_loop() {
        let mut exp = Expectation::default();
        exp.on_own(IDLE_TOUCH, true);
        assert_eq!(exp.expected(), Some(h(Mode::Calibrating, NodeId::Sense, 0)));
        exp.on_peer(h(Mode::Calibrating, NodeId::Sense, 0));
        exp.on_peer(h(Mode::Calibrating, NodeId::Motor, 0));
        exp.on_peer(h(Mode::Calibrating, NodeId::Motor, 1));
        exp.on_peer(h(Mode::Calibrating, NodeId::Sense, 1));
        assert_eq!(exp.turn(), Some(CAL_TOUCH));

        // No touch: motor reports battery again
        exp.on_own(CAL_TOUCH, false);
        assert_eq!(exp.expected(), Some(h(Mode::Calibrating, NodeId::Motor, 1)));
        assert_eq!(exp.turn(), None);
    }

    #[test]
    fn test_distress_round_trip() {
        let mut exp = Expectation::default();
        exp.on_own(MAZE_TONE, true);
        assert_eq!(exp.expected(), Some(h(Mode::Distress, NodeId::Motor, 4)));
        exp.on_peer(h(Mode::Distress, NodeId::Motor, 4));
        assert_eq!(exp.turn(), Some(SOS_TONE));
        exp.on_own(SOS_TONE, false);
        assert_eq!(exp.turn(), Some(SOS_TONE));
        exp.on_own(SOS_TONE, true);
        assert_eq!(exp.turn(), Some(MAZE_TONE));
    }

    #[test]
    fn test_end_of_maze_stands_in_for_colours() {
        let mut exp = Expectation::default();
        exp.on_own(MAZE_NAVCON, false);
        for ist in 1..=4 {
            exp.on_peer(h(Mode::Maze, NodeId::Motor, ist));
        }
        assert!(exp.check(MAZE_END).is_ok());
        // Angle still has to wait for colours
        assert!(exp.check(h(Mode::Maze, NodeId::Sense, 2)).is_err());
    }

    #[test]
    fn test_touch_in_maze_returns_to_idle_turn() {
        let mut exp = Expectation::default();
        exp.on_own(MAZE_TONE, false);
        exp.on_own(MAZE_TOUCH, true);
        assert_eq!(exp.expected(), None);
        assert_eq!(exp.turn(), Some(IDLE_TOUCH));
    }

    #[test]
    fn test_out_of_order() {
        let mut exp = Expectation::default();
        exp.on_own(MAZE_NAVCON, false);
        let got = h(Mode::Maze, NodeId::Sense, 1);
        assert_eq!(
            exp.check(got),
            Err(SequenceAnomaly::OutOfOrder {
                expected: h(Mode::Maze, NodeId::Motor, 1),
                got
            })
        );
    }
}
