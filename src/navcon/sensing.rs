// Line detection and incidence angle fusion
//
// Center detections commit at once with the measured angle. An edge sensor
// that fires alone is latched with the odometer reading; the commit waits for
// either the center sensor or one sensor spacing of travel, in which case the
// angle is inferred.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::scs::{Channel, Color, Colors};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleSource {
    Measured,
    Inferred,
}

/// Angle between the robot's heading and the line's normal; positive when the
/// line is met on the right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidenceAngle {
    pub degrees: i16,
    pub source: AngleSource,
}

impl IncidenceAngle {
    pub fn measured(degrees: i16) -> Self {
        Self {
            degrees,
            source: AngleSource::Measured,
        }
    }

    pub fn inferred(degrees: i16) -> Self {
        Self {
            degrees,
            source: AngleSource::Inferred,
        }
    }

    pub fn is_inferred(&self) -> bool {
        self.source == AngleSource::Inferred
    }
}

/// A committed line detection waiting for the decision engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub channel: Channel,
    pub color: Color,
    pub angle: Option<IncidenceAngle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Committed(Detection),
    /// An edge fired alone; waiting for the center or for enough travel
    Pending(Channel),
    Clear,
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelCache {
    color: Option<Color>,
    start_mm: u16,
    since_ms: u64,
}

pub struct SensingModel {
    cache: [ChannelCache; 3],
    committed: Option<Detection>,
    spacing_mm: u16,
    inferred_deg: i16,
    latch_timeout_ms: u64,
}

impl SensingModel {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            cache: [ChannelCache::default(); 3],
            committed: None,
            spacing_mm: config.sensor_spacing_mm,
            inferred_deg: config.inferred_angle_deg(),
            latch_timeout_ms: config.latch_timeout_ms,
        }
    }

    /// Edge channel currently latched, if any
    pub fn pending_edge(&self) -> Option<Channel> {
        [Channel::Left, Channel::Right]
            .into_iter()
            .find(|c| self.cache[c.index()].color.is_some())
    }

    pub fn latched_color(&self, channel: Channel) -> Option<Color> {
        self.cache[channel.index()].color
    }

    fn latch(&mut self, channel: Channel, color: Color, distance_mm: u16, now_ms: u64) {
        let slot = &mut self.cache[channel.index()];
        if slot.color.is_none() {
            *slot = ChannelCache {
                color: Some(color),
                start_mm: distance_mm,
                since_ms: now_ms,
            };
        }
    }

    fn commit(&mut self, detection: Detection) -> Observation {
        info!(
            "Line committed on {:?}: {:?} at {:?}",
            detection.channel, detection.color, detection.angle
        );
        self.committed = Some(detection);
        Observation::Committed(detection)
    }

    fn expire(&mut self, now_ms: u64) {
        for channel in Channel::ALL {
            let slot = &mut self.cache[channel.index()];
            if slot.color.is_some() && now_ms.saturating_sub(slot.since_ms) > self.latch_timeout_ms {
                debug!("{:?} latch expired without a commit", channel);
                *slot = ChannelCache::default();
            }
        }
    }

    /// Fold one reading into the model
    pub fn observe(
        &mut self,
        colors: Colors,
        measured: Option<i16>,
        distance_mm: u16,
        now_ms: u64,
    ) -> Observation {
        if let Some(detection) = self.committed {
            return Observation::Committed(detection);
        }
        self.expire(now_ms);

        let seen = |c: Channel| !colors.get(c).is_background();
        let measured = measured.map(IncidenceAngle::measured);

        let Some(edge) = self.pending_edge() else {
            if seen(Channel::Center) {
                let channel = match (seen(Channel::Left), seen(Channel::Right)) {
                    (true, false) => Channel::Left,
                    (false, true) => Channel::Right,
                    _ => Channel::Center,
                };
                self.latch(Channel::Center, colors.center, distance_mm, now_ms);
                return self.commit(Detection {
                    channel,
                    color: colors.center,
                    angle: measured,
                });
            }
            return match (seen(Channel::Left), seen(Channel::Right)) {
                (true, false) => {
                    self.latch(Channel::Left, colors.left, distance_mm, now_ms);
                    debug!("Left edge latched at {} mm", distance_mm);
                    Observation::Pending(Channel::Left)
                }
                (false, true) => {
                    self.latch(Channel::Right, colors.right, distance_mm, now_ms);
                    debug!("Right edge latched at {} mm", distance_mm);
                    Observation::Pending(Channel::Right)
                }
                _ => Observation::Clear,
            };
        };

        let slot = self.cache[edge.index()];
        let Some(color) = slot.color else {
            return Observation::Clear;
        };

        if seen(Channel::Center) {
            return self.commit(Detection {
                channel: edge,
                color,
                angle: measured,
            });
        }

        if distance_mm < slot.start_mm {
            // Odometer restarted underneath us
            debug!("Odometer went backwards, re-anchoring {:?} latch", edge);
            self.cache[edge.index()].start_mm = distance_mm;
            return Observation::Pending(edge);
        }

        if distance_mm - slot.start_mm >= self.spacing_mm {
            let sign = if edge == Channel::Left { -1 } else { 1 };
            return self.commit(Detection {
                channel: edge,
                color,
                angle: Some(IncidenceAngle::inferred(sign * self.inferred_deg)),
            });
        }
        Observation::Pending(edge)
    }

    /// Hand the committed detection to the decision engine and clear all latches
    pub fn take(&mut self) -> Option<Detection> {
        let detection = self.committed.take();
        if detection.is_some() {
            self.clear();
        }
        detection
    }

    pub fn clear(&mut self) {
        self.cache = [ChannelCache::default(); 3];
        self.committed = None;
    }
}
