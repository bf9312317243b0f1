// Keyboard stand-in for the touch sensor and pure-tone detector
// T=touch, P=pure tone, S=send now, ?=status, R=reset, Q=quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use scs_maze_runtime::config::{DEFAULT_BAUD, DEFAULT_PORT, RuntimeConfig};
use scs_maze_runtime::link::{MonotonicClock, SerialLink};
use scs_maze_runtime::nodes::{NavNode, Triggers};
use scs_maze_runtime::runtime::{ManualCommand, Runtime};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let port = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_PORT.to_string());
    info!("Opening {} at {} baud...", port, DEFAULT_BAUD);

    let config = RuntimeConfig::default();
    let runtime = Runtime::new(
        Box::new(NavNode::new(&config)),
        Box::new(SerialLink::open(&port, DEFAULT_BAUD)?),
        Arc::new(MonotonicClock::new()),
        config.inter_byte_gap_ms,
    );

    info!("Controls: T=touch, P=pure tone, S=send, ?=status, R=reset, Q=quit");

    enable_raw_mode()?;
    let result = run_console(runtime);
    disable_raw_mode()?;

    result
}

fn run_console(mut runtime: Runtime) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut triggers = Triggers::default();

    loop {
        // 1ms poll keeps the link drained well inside the inter-byte gap
        if event::poll(Duration::from_millis(1))?
            && let Event::Key(KeyEvent { code, kind, .. }) = event::read()?
            && kind == KeyEventKind::Press
        {
            match code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Char(key) => {
                    if let Some(command) = ManualCommand::from_key(key.to_ascii_lowercase()) {
                        runtime.apply(command, &mut triggers);
                    }
                }
                _ => {}
            }
        }

        runtime.tick(&mut triggers)?;
    }

    runtime.log_status();
    Ok(())
}
