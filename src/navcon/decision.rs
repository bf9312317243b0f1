// NAVCON decision policy: colours + incidence angle -> one motion command

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sensing::IncidenceAngle;
use super::wall_follow::WallFollow;
use crate::config::{
    RuntimeConfig, SQUARE_ANGLE_DEG, STEERING_CORRECTION_DEG, STRAIGHT_ANGLE_DEG,
};
use crate::messages::{Action, InputFault, NavigationCommand};
use crate::scs::{Channel, ColorClass, Colors, Turn};

/// Speeds broadcast by the motor node during calibration (mm/s)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    pub base_speed: u8,
    pub correction_speed: u8,
}

impl Calibration {
    /// From a CAL:MOTOR:0 payload; a zero correction speed means half the base
    pub fn from_payload(base_speed: u8, correction_speed: u8) -> Self {
        let correction_speed = if correction_speed == 0 {
            (base_speed / 2).max(1)
        } else {
            correction_speed
        };
        Self {
            base_speed,
            correction_speed,
        }
    }
}

/// Everything one decision cycle looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionInput {
    pub colors: Option<Colors>,
    pub colors_age_ms: u64,
    pub angle: Option<IncidenceAngle>,
}

pub struct DecisionEngine {
    calibration: Option<Calibration>,
    wall_follow: WallFollow,
    high_angle_deg: i16,
    freshness_ms: u64,
}

fn rotate(direction: Turn, degrees: u16) -> Action {
    Action::SteeringCorrection { direction, degrees }
}

impl DecisionEngine {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            calibration: None,
            wall_follow: WallFollow::new(config.wall_follow_timeout_ms),
            high_angle_deg: config.high_angle_deg,
            freshness_ms: config.color_freshness_ms,
        }
    }

    pub fn calibration(&self) -> Option<Calibration> {
        self.calibration
    }

    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = Some(calibration);
    }

    pub fn wall_follow(&self) -> &WallFollow {
        &self.wall_follow
    }

    pub fn reset(&mut self) {
        self.wall_follow.reset();
    }

    /// Calibration and fresh colours, or the reason they are missing
    fn ready(&self, input: &DecisionInput) -> Result<(Calibration, Colors), InputFault> {
        let calibration = self.calibration.ok_or(InputFault::NoCalibration)?;
        let colors = input.colors.ok_or(InputFault::MissingColors)?;
        if input.colors_age_ms > self.freshness_ms {
            return Err(InputFault::StaleColors);
        }
        Ok((calibration, colors))
    }

    /// Angle to decide on; an all-background reading without one counts as zero
    fn resolve_angle(&self, input: &DecisionInput, colors: &Colors) -> Result<i16, InputFault> {
        match input.angle {
            Some(angle) if angle.is_inferred() => Ok(angle.degrees),
            Some(angle) if angle.degrees.abs() > self.high_angle_deg => {
                Err(InputFault::AngleOutOfRange)
            }
            Some(angle) => Ok(angle.degrees),
            None if colors.all(ColorClass::Background) => Ok(0),
            None => Err(InputFault::MissingAngle),
        }
    }

    /// Keep driving while an edge detection waits for confirmation
    pub fn creep(&mut self, input: &DecisionInput, now_ms: u64) -> NavigationCommand {
        self.wall_follow.check_timeout(now_ms);
        match self.ready(input) {
            Ok((calibration, _)) => {
                let speed = calibration.base_speed;
                NavigationCommand::new(
                    Action::Forward {
                        left: speed,
                        right: speed,
                    },
                    "edge sensor latched, advancing to confirm",
                )
            }
            Err(fault) => NavigationCommand::error_stop(fault),
        }
    }

    pub fn decide(&mut self, input: &DecisionInput, now_ms: u64) -> NavigationCommand {
        self.wall_follow.check_timeout(now_ms);
        let (calibration, colors) = match self.ready(input) {
            Ok(ready) => ready,
            Err(fault) => return NavigationCommand::error_stop(fault),
        };
        let angle = match self.resolve_angle(input, &colors) {
            Ok(angle) => angle,
            Err(fault) => return NavigationCommand::error_stop(fault),
        };
        debug!("Deciding on {} at {} deg", colors, angle);
        self.apply_rules(calibration, colors, angle, now_ms)
    }

    fn apply_rules(
        &mut self,
        cal: Calibration,
        colors: Colors,
        angle: i16,
        now_ms: u64,
    ) -> NavigationCommand {
        let magnitude = angle.abs();
        let forward = Action::Forward {
            left: cal.base_speed,
            right: cal.base_speed,
        };

        if colors.all(ColorClass::End) {
            return NavigationCommand::new(Action::Turn180Left { degrees: 360 }, "end of maze");
        }

        if self.wall_follow.is_active() {
            return self.wall_follow.step(cal, now_ms);
        }

        if colors.left.class() == ColorClass::Obstacle && colors.right.class() == ColorClass::Obstacle
        {
            return NavigationCommand::new(
                Action::Turn180Right { degrees: 180 },
                "obstacles on both sides",
            );
        }

        // End colour squares up to the line; navigable colour follows it
        let toward_angle = if angle > 0 { Turn::Right } else { Turn::Left };
        for (class, steer, label) in [
            (ColorClass::End, toward_angle, "end line"),
            (ColorClass::Navigable, toward_angle.opposite(), "navigable line"),
        ] {
            if colors.find(class).is_none() {
                continue;
            }
            let (action, why) = if magnitude <= SQUARE_ANGLE_DEG {
                (forward, "square, cross it")
            } else if magnitude >= self.high_angle_deg {
                (rotate(steer, STEERING_CORRECTION_DEG), "steep, steering correction")
            } else {
                let speed = cal.correction_speed;
                (
                    Action::Backward {
                        left: speed,
                        right: speed,
                    },
                    "re-approach",
                )
            };
            return NavigationCommand::new(action, format!("{} at {} deg: {}", label, angle, why));
        }

        if let Some(channel) = colors.find(ColorClass::Obstacle) {
            let side = match channel {
                Channel::Left => Turn::Left,
                Channel::Right => Turn::Right,
                Channel::Center if angle < 0 => Turn::Left,
                Channel::Center => Turn::Right,
            };
            if magnitude <= self.high_angle_deg {
                self.wall_follow.initiate(angle, side, now_ms);
                return self.wall_follow.step(cal, now_ms);
            }
            return NavigationCommand::new(
                rotate(side.opposite(), STEERING_CORRECTION_DEG),
                format!("obstacle at {} deg, steering away", angle),
            );
        }

        if colors.all(ColorClass::Background) {
            if magnitude > STRAIGHT_ANGLE_DEG && magnitude <= SQUARE_ANGLE_DEG {
                let cut = (2 * magnitude).min(cal.base_speed as i16 / 3) as u8;
                let slow = cal.base_speed.saturating_sub(cut);
                let (left, right) = if angle > 0 {
                    (slow, cal.base_speed)
                } else {
                    (cal.base_speed, slow)
                };
                return NavigationCommand::new(
                    Action::DifferentialSteer { left, right },
                    format!("drifting {} deg, trimming wheel speed by {}", angle, cut),
                );
            }
            if magnitude <= STRAIGHT_ANGLE_DEG {
                return NavigationCommand::new(forward, "clear floor");
            }
        }

        NavigationCommand::new(Action::Stop, "unrecognised reading")
    }
}
