// Byte links and clocks the node core runs against
//
// - SerialLink: a real UART via serialport
// - BusLink: in-memory broadcast bus for tests and simulation
// - MonotonicClock / ManualClock: millisecond time sources

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serialport::SerialPort;
use tracing::info;

use crate::config::SERIAL_TIMEOUT;

/// Error types for link I/O
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// Non-blocking byte source/sink
pub trait ByteLink: Send {
    /// Bytes that can be read without waiting
    fn read_available(&mut self) -> Result<usize>;

    /// Next byte, or None if nothing is waiting
    fn read_byte(&mut self) -> Result<Option<u8>>;

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// UART link to a neighbouring node
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        info!("Opening serial link {} @ {} baud", port_name, baudrate);
        let port = serialport::new(port_name, baudrate)
            .timeout(SERIAL_TIMEOUT)
            .open()?;
        Ok(Self { port })
    }
}

impl ByteLink for SerialLink {
    fn read_available(&mut self) -> Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.read_available()? == 0 {
            return Ok(None);
        }
        let mut byte = [0u8; 1];
        match self.port.read_exact(&mut byte) {
            Ok(()) => Ok(Some(byte[0])),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.port.flush()?;
        Ok(())
    }
}

/// Shared medium: every byte written by one endpoint reaches all the others
#[derive(Clone, Default)]
pub struct MemoryBus {
    queues: Arc<Mutex<Vec<VecDeque<u8>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new endpoint to the bus
    pub fn endpoint(&self) -> BusLink {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.push(VecDeque::new());
        BusLink {
            id: queues.len() - 1,
            queues: Arc::clone(&self.queues),
        }
    }
}

/// One node's connection to a MemoryBus; clones share the endpoint
#[derive(Clone)]
pub struct BusLink {
    id: usize,
    queues: Arc<Mutex<Vec<VecDeque<u8>>>>,
}

impl BusLink {
    /// Place bytes in this endpoint's own receive queue (line noise, uplink input)
    pub fn inject(&self, bytes: &[u8]) {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues[self.id].extend(bytes);
    }
}

impl ByteLink for BusLink {
    fn read_available(&mut self) -> Result<usize> {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        Ok(queues[self.id].len())
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        Ok(queues[self.id].pop_front())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        for (id, queue) in queues.iter_mut().enumerate() {
            if id != self.id {
                queue.extend(bytes);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Monotonic millisecond time source
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Milliseconds since the clock was created
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Clock that only moves when told to; clones share the same time
#[derive(Clone, Default)]
pub struct ManualClock {
    ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.ms.load(Ordering::SeqCst)
    }
}
