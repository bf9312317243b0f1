// Three nodes on an in-memory bus driving through a scripted course
//
// The sensor reads its colours from the motor's odometer, so NAVCON decisions
// move the robot along the course. Run with RUST_LOG=debug to see every packet.
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::info;

use scs_maze_runtime::config::RuntimeConfig;
use scs_maze_runtime::link::{Clock, ManualClock, MemoryBus};
use scs_maze_runtime::navcon::Calibration;
use scs_maze_runtime::nodes::{
    ColorSensor, MotorNode, NavNode, SensorNode, SensorReading, SimulatedDrivetrain, Triggers,
};
use scs_maze_runtime::runtime::Runtime;
use scs_maze_runtime::scs::{Color, Colors, Mode};

const MAX_TICKS: usize = 20_000;

/// Course segments: (start mm, reading)
const COURSE: &[(u32, SensorReading)] = &[
    (0, reading(Color::White, Color::White, Color::White, 0)),
    (40, reading(Color::White, Color::Green, Color::White, 12)),
    (60, reading(Color::White, Color::White, Color::White, 0)),
    (100, reading(Color::Red, Color::White, Color::White, 3)),
    (120, reading(Color::White, Color::White, Color::White, 0)),
    (200, reading(Color::Red, Color::Red, Color::Red, 0)),
];

const fn reading(left: Color, center: Color, right: Color, angle: i16) -> SensorReading {
    SensorReading {
        colors: Colors::new(left, center, right),
        angle,
        end_of_maze: false,
    }
}

struct ScriptedCourse {
    odometer: Arc<AtomicU32>,
}

impl ColorSensor for ScriptedCourse {
    fn read(&mut self) -> SensorReading {
        let travelled = self.odometer.load(Ordering::SeqCst);
        let mut current = COURSE[0].1;
        for (start, segment) in COURSE {
            if travelled >= *start {
                current = *segment;
            }
        }
        // All three sensors on red marks the end
        current.end_of_maze = current.colors.all(Color::Red.class());
        current
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = RuntimeConfig::default();
    let bus = MemoryBus::new();
    let clock = ManualClock::new(0);
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let gap = config.inter_byte_gap_ms;

    let drivetrain = SimulatedDrivetrain::new(1_000);
    let course = ScriptedCourse {
        odometer: drivetrain.odometer(),
    };

    let mut nav = Runtime::new(
        Box::new(NavNode::new(&config)),
        Box::new(bus.endpoint()),
        Arc::clone(&shared),
        gap,
    );
    let mut sensor = Runtime::new(
        Box::new(SensorNode::new(course, true)),
        Box::new(bus.endpoint()),
        Arc::clone(&shared),
        gap,
    );
    let mut motor = Runtime::new(
        Box::new(MotorNode::new(
            drivetrain,
            Calibration::from_payload(config.base_speed, config.correction_speed),
            true,
        )),
        Box::new(bus.endpoint()),
        shared,
        gap,
    );

    let mut nav_triggers = Triggers::default();
    let mut last_command = None;
    let mut entered_maze = false;

    for tick in 0..MAX_TICKS {
        // Touch once to calibrate, once more to start the maze
        if tick == 5 || tick == 50 {
            nav_triggers.touch = true;
        }

        clock.advance(1);
        nav.tick(&mut nav_triggers)?;
        sensor.tick(&mut Triggers::default())?;
        motor.tick(&mut Triggers::default())?;

        let mode = nav.node().coordinator().mode();
        entered_maze |= mode == Mode::Maze;
        if entered_maze && mode == Mode::Idle {
            info!("Maze finished after {} ticks", tick);
            break;
        }

        let command = nav.node().last_command().cloned();
        if command != last_command {
            if let Some(command) = &command {
                info!("NAVCON: {}", command);
            }
            last_command = command;
        }
    }

    for runtime in [&nav, &sensor, &motor] {
        runtime.log_status();
    }
    Ok(())
}
