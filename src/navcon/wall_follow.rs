// Reverse -> turn -> forward manoeuvre around an obstacle

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::decision::Calibration;
use crate::messages::{Action, NavigationCommand};
use crate::scs::Turn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WallFollowState {
    Idle,
    Reversing,
    Turning,
    ForwardingOut,
}

pub struct WallFollow {
    state: WallFollowState,
    angle: i16,
    turn_degrees: u16,
    /// Side the obstacle was seen on
    side: Turn,
    last_advance_ms: u64,
    timeout_ms: u64,
}

impl WallFollow {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            state: WallFollowState::Idle,
            angle: 0,
            turn_degrees: 0,
            side: Turn::Left,
            last_advance_ms: 0,
            timeout_ms,
        }
    }

    pub fn state(&self) -> WallFollowState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != WallFollowState::Idle
    }

    pub fn side(&self) -> Turn {
        self.side
    }

    pub fn turn_degrees(&self) -> u16 {
        self.turn_degrees
    }

    pub fn initiate(&mut self, angle: i16, side: Turn, now_ms: u64) {
        self.state = WallFollowState::Reversing;
        self.angle = angle;
        self.turn_degrees = 90 + angle.unsigned_abs();
        self.side = side;
        self.last_advance_ms = now_ms;
        info!(
            "Wall-follow started: obstacle {:?} at {} deg, turn {} deg",
            side, angle, self.turn_degrees
        );
    }

    /// Drop back to Idle if the manoeuvre stalled; true if it did
    pub fn check_timeout(&mut self, now_ms: u64) -> bool {
        if self.is_active() && now_ms.saturating_sub(self.last_advance_ms) > self.timeout_ms {
            warn!(
                "Wall-follow stuck in {:?} for {} ms, resetting",
                self.state,
                now_ms - self.last_advance_ms
            );
            self.reset();
            return true;
        }
        false
    }

    /// Emit this step's command and move to the next state
    pub fn step(&mut self, calibration: Calibration, now_ms: u64) -> NavigationCommand {
        self.last_advance_ms = now_ms;
        match self.state {
            WallFollowState::Idle => NavigationCommand::new(Action::Stop, "wall-follow idle"),
            WallFollowState::Reversing => {
                self.state = WallFollowState::Turning;
                let speed = calibration.correction_speed;
                NavigationCommand::new(
                    Action::Backward {
                        left: speed,
                        right: speed,
                    },
                    format!("wall-follow: back away from obstacle ({} deg)", self.angle),
                )
            }
            WallFollowState::Turning => {
                self.state = WallFollowState::ForwardingOut;
                let degrees = self.turn_degrees;
                let action = match self.side.opposite() {
                    Turn::Left => Action::RotateLeft { degrees },
                    Turn::Right => Action::RotateRight { degrees },
                };
                NavigationCommand::new(action, format!("wall-follow: turn {} deg clear", degrees))
            }
            WallFollowState::ForwardingOut => {
                self.reset();
                let speed = calibration.base_speed;
                NavigationCommand::new(
                    Action::Forward {
                        left: speed,
                        right: speed,
                    },
                    "wall-follow: drive out",
                )
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = WallFollowState::Idle;
        self.angle = 0;
        self.turn_degrees = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAL: Calibration = Calibration {
        base_speed: 10,
        correction_speed: 5,
    };

    #[test]
    fn test_three_steps_then_idle() {
        let mut wf = WallFollow::new(5_000);
        wf.initiate(-30, Turn::Right, 0);
        assert_eq!(wf.turn_degrees(), 120);

        assert_eq!(
            wf.step(CAL, 10).action,
            Action::Backward { left: 5, right: 5 }
        );
        assert_eq!(
            wf.step(CAL, 20).action,
            Action::RotateLeft { degrees: 120 }
        );
        assert_eq!(
            wf.step(CAL, 30).action,
            Action::Forward {
                left: 10,
                right: 10
            }
        );
        assert!(!wf.is_active());
    }

    #[test]
    fn test_watchdog_resets() {
        let mut wf = WallFollow::new(5_000);
        wf.initiate(10, Turn::Left, 0);
        wf.step(CAL, 100);
        assert!(!wf.check_timeout(5_000));
        assert!(wf.check_timeout(5_200));
        assert_eq!(wf.state(), WallFollowState::Idle);
    }
}
