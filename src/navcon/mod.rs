// Navigation control: sensing model + decision engine + wall-follow
//
// The navigation node feeds in what it hears (colours, angle, distance,
// calibration) and asks for one command per maze cycle.

pub mod decision;
pub mod sensing;
pub mod wall_follow;

use tracing::info;

use crate::config::RuntimeConfig;
use crate::messages::NavigationCommand;
use crate::scs::Colors;

pub use decision::{Calibration, DecisionEngine, DecisionInput};
pub use sensing::{AngleSource, Detection, IncidenceAngle, Observation, SensingModel};
pub use wall_follow::{WallFollow, WallFollowState};

pub struct Navcon {
    sensing: SensingModel,
    engine: DecisionEngine,
    colors: Option<(Colors, u64)>,
    angle: Option<i16>,
    distance_mm: u16,
    last: Option<NavigationCommand>,
}

impl Navcon {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            sensing: SensingModel::new(config),
            engine: DecisionEngine::new(config),
            colors: None,
            angle: None,
            distance_mm: 0,
            last: None,
        }
    }

    pub fn set_colors(&mut self, colors: Colors, now_ms: u64) {
        self.colors = Some((colors, now_ms));
    }

    pub fn set_angle(&mut self, degrees: i16) {
        self.angle = Some(degrees);
    }

    pub fn set_distance(&mut self, distance_mm: u16) {
        self.distance_mm = distance_mm;
    }

    pub fn set_calibration(&mut self, calibration: Calibration) {
        info!(
            "Calibration: base {} mm/s, correction {} mm/s",
            calibration.base_speed, calibration.correction_speed
        );
        self.engine.set_calibration(calibration);
    }

    pub fn calibration(&self) -> Option<Calibration> {
        self.engine.calibration()
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn sensing(&self) -> &SensingModel {
        &self.sensing
    }

    pub fn last_command(&self) -> Option<&NavigationCommand> {
        self.last.as_ref()
    }

    fn input(&self, now_ms: u64) -> DecisionInput {
        DecisionInput {
            colors: self.colors.map(|(c, _)| c),
            colors_age_ms: self
                .colors
                .map_or(0, |(_, at)| now_ms.saturating_sub(at)),
            angle: self.angle.map(IncidenceAngle::measured),
        }
    }

    /// Run one decision cycle on the latest inputs
    pub fn cycle(&mut self, now_ms: u64) -> NavigationCommand {
        let mut input = self.input(now_ms);

        let command = match input.colors {
            Some(colors) if !self.engine.wall_follow().is_active() => {
                match self
                    .sensing
                    .observe(colors, self.angle, self.distance_mm, now_ms)
                {
                    Observation::Committed(_) => {
                        if let Some(detection) = self.sensing.take() {
                            let mut seen = colors;
                            seen.set(detection.channel, detection.color);
                            input.colors = Some(seen);
                            input.angle = detection.angle;
                        }
                        self.engine.decide(&input, now_ms)
                    }
                    Observation::Pending(_) => self.engine.creep(&input, now_ms),
                    Observation::Clear => self.engine.decide(&input, now_ms),
                }
            }
            _ => self.engine.decide(&input, now_ms),
        };

        info!("NAVCON: {}", command);
        self.last = Some(command.clone());
        command
    }

    pub fn reset(&mut self) {
        self.sensing.clear();
        self.engine.reset();
        self.colors = None;
        self.angle = None;
        self.distance_mm = 0;
        self.last = None;
    }
}
