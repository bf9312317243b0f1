// Byte-stream framing for SCS links
//
// Primary links carry bare 4-byte packets with no delimiters, so packet
// boundaries are recovered by sliding a validation window over a small buffer.
// The uplink variant wraps every packet as [0xAA, control, dat1, dat0, dec, 0x55].

use tracing::debug;

use super::packet::{PACKET_SIZE, Packet};

/// Primary buffer capacity (four packets)
pub const BUFFER_CAPACITY: usize = 4 * PACKET_SIZE;

/// Marked frame layout
pub const FRAME_START: u8 = 0xAA;
pub const FRAME_END: u8 = 0x55;
pub const FRAME_SIZE: usize = PACKET_SIZE + 2;
const IDLE_PAD: u8 = 0x00;

/// Anything that turns incoming bytes into packets
pub trait Framer: Send {
    /// Feed one byte received at `now_ms`; returns a packet once one completes
    fn push(&mut self, byte: u8, now_ms: u64) -> Option<Packet>;

    /// True once the last recovered boundary still holds
    fn is_synced(&self) -> bool;

    /// Drop everything buffered
    fn reset(&mut self);

    /// Number of times buffered bytes were thrown away
    fn discards(&self) -> u32;
}

/// Whether a 4-byte window is accepted as a packet
pub fn accepts(packet: &Packet) -> bool {
    !packet.is_sentinel() && packet.header().is_legal()
}

/// Sliding-window recovery buffer for the primary link
pub struct FrameBuffer {
    buf: [u8; BUFFER_CAPACITY],
    len: usize,
    gap_ms: u64,
    last_byte_ms: Option<u64>,
    synced: bool,
    discards: u32,
}

impl FrameBuffer {
    pub fn new(gap_ms: u64) -> Self {
        Self {
            buf: [0; BUFFER_CAPACITY],
            len: 0,
            gap_ms,
            last_byte_ms: None,
            synced: false,
            discards: 0,
        }
    }

    pub fn buffered(&self) -> usize {
        self.len
    }

    fn flush(&mut self, reason: &str) {
        if self.len > 0 {
            debug!("Frame buffer flushed ({}), {} bytes dropped", reason, self.len);
            self.discards += 1;
        }
        self.len = 0;
        self.synced = false;
    }

    /// Accept the first valid window, shifting out it and any noise before it
    fn scan(&mut self) -> Option<Packet> {
        if self.len < PACKET_SIZE {
            return None;
        }
        for start in 0..=self.len - PACKET_SIZE {
            let mut window = [0u8; PACKET_SIZE];
            window.copy_from_slice(&self.buf[start..start + PACKET_SIZE]);
            let packet = Packet::from_bytes(window);
            if !accepts(&packet) {
                continue;
            }
            if start > 0 {
                debug!("Resynced after skipping {} noise bytes", start);
                self.discards += 1;
            }
            let consumed = start + PACKET_SIZE;
            self.buf.copy_within(consumed..self.len, 0);
            self.len -= consumed;
            self.synced = true;
            return Some(packet);
        }
        None
    }
}

impl Framer for FrameBuffer {
    fn push(&mut self, byte: u8, now_ms: u64) -> Option<Packet> {
        if let Some(last) = self.last_byte_ms
            && self.len > 0
            && now_ms.saturating_sub(last) > self.gap_ms
        {
            self.flush("inter-byte gap");
        }
        self.last_byte_ms = Some(now_ms);

        self.buf[self.len] = byte;
        self.len += 1;

        let packet = self.scan();
        if packet.is_none() && self.len == BUFFER_CAPACITY {
            // Lossy forward progress: forget the oldest byte
            self.buf.copy_within(1..self.len, 0);
            self.len -= 1;
            self.synced = false;
            self.discards += 1;
        }
        packet
    }

    fn is_synced(&self) -> bool {
        self.synced
    }

    fn reset(&mut self) {
        self.len = 0;
        self.synced = false;
        self.last_byte_ms = None;
    }

    fn discards(&self) -> u32 {
        self.discards
    }
}

/// Wrap a packet in start/end markers for the uplink
pub fn encode_marked(packet: &Packet) -> [u8; FRAME_SIZE] {
    [
        FRAME_START,
        packet.control,
        packet.dat1,
        packet.dat0,
        packet.dec,
        FRAME_END,
    ]
}

/// Decoder for marker-delimited uplink frames
pub struct MarkedFrameDecoder {
    buf: [u8; FRAME_SIZE],
    len: usize,
    gap_ms: u64,
    last_byte_ms: Option<u64>,
    synced: bool,
    discards: u32,
}

impl MarkedFrameDecoder {
    pub fn new(gap_ms: u64) -> Self {
        Self {
            buf: [0; FRAME_SIZE],
            len: 0,
            gap_ms,
            last_byte_ms: None,
            synced: false,
            discards: 0,
        }
    }

    /// Restart from the next start marker inside a rejected frame, if any
    fn resync(&mut self) {
        match self.buf[1..self.len].iter().position(|&b| b == FRAME_START) {
            Some(pos) => {
                let from = pos + 1;
                self.buf.copy_within(from..self.len, 0);
                self.len -= from;
            }
            None => self.len = 0,
        }
    }
}

impl Framer for MarkedFrameDecoder {
    fn push(&mut self, byte: u8, now_ms: u64) -> Option<Packet> {
        if let Some(last) = self.last_byte_ms
            && self.len > 0
            && now_ms.saturating_sub(last) > self.gap_ms
        {
            debug!("Uplink frame timed out, {} bytes dropped", self.len);
            self.len = 0;
            self.synced = false;
            self.discards += 1;
        }
        self.last_byte_ms = Some(now_ms);

        if self.len == 0 {
            match byte {
                FRAME_START => {}
                IDLE_PAD => return None,
                _ => {
                    self.synced = false;
                    self.discards += 1;
                    return None;
                }
            }
        }

        self.buf[self.len] = byte;
        self.len += 1;
        if self.len < FRAME_SIZE {
            return None;
        }

        if self.buf[FRAME_SIZE - 1] != FRAME_END {
            debug!("Uplink frame rejected: bad end marker 0x{:02X}", byte);
            self.synced = false;
            self.discards += 1;
            self.resync();
            return None;
        }

        let packet = Packet::from_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
        self.len = 0;
        if !accepts(&packet) {
            debug!("Uplink frame rejected: {}", packet);
            self.discards += 1;
            return None;
        }
        self.synced = true;
        Some(packet)
    }

    fn is_synced(&self) -> bool {
        self.synced
    }

    fn reset(&mut self) {
        self.len = 0;
        self.synced = false;
        self.last_byte_ms = None;
    }

    fn discards(&self) -> u32 {
        self.discards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scs::packet::{Mode, NodeId, encode};

    const GAP_MS: u64 = 3;

    fn feed(framer: &mut dyn Framer, bytes: &[u8], now_ms: u64) -> Vec<Packet> {
        bytes
            .iter()
            .filter_map(|&b| framer.push(b, now_ms))
            .collect()
    }

    fn angle_packet() -> Packet {
        encode(Mode::Maze, NodeId::Sense, 2, 22, 0, 0)
    }

    #[test]
    fn test_clean_stream() {
        let mut framer = FrameBuffer::new(GAP_MS);
        let first = angle_packet();
        let second = encode(Mode::Maze, NodeId::Motor, 4, 0x01, 0x2C, 0);
        let mut bytes = first.to_bytes().to_vec();
        bytes.extend_from_slice(&second.to_bytes());

        assert_eq!(feed(&mut framer, &bytes, 0), vec![first, second]);
        assert!(framer.is_synced());
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_packet_between_garbage() {
        for n in [0, 1, 3, 7, 20, 40] {
            for m in [0, 1, 5, 17] {
                for fill in [0x00u8, 0xFF] {
                    let mut framer = FrameBuffer::new(GAP_MS);
                    let mut bytes = vec![fill; n];
                    bytes.extend_from_slice(&angle_packet().to_bytes());
                    bytes.extend(std::iter::repeat_n(fill, m));

                    let packets = feed(&mut framer, &bytes, 0);
                    assert_eq!(packets, vec![angle_packet()], "n={} m={} fill={:02X}", n, m, fill);
                }
            }
        }
    }

    #[test]
    fn test_sentinel_windows_never_emit() {
        let mut framer = FrameBuffer::new(GAP_MS);
        assert!(feed(&mut framer, &[0x00; 4], 0).is_empty());
        assert!(feed(&mut framer, &[0xFF; 4], 0).is_empty());
        assert!(feed(&mut framer, &[0x00; 64], 0).is_empty());
        assert!(!framer.is_synced());
    }

    #[test]
    fn test_zero_payload_packets_pass() {
        let mut framer = FrameBuffer::new(GAP_MS);
        let stop = encode(Mode::Maze, NodeId::Nav, 3, 0, 0, 4);
        let white = encode(Mode::Maze, NodeId::Sense, 1, 0, 0, 0);
        let mut bytes = stop.to_bytes().to_vec();
        bytes.extend_from_slice(&white.to_bytes());
        assert_eq!(feed(&mut framer, &bytes, 0), vec![stop, white]);
    }

    #[test]
    fn test_gap_discards_partial_packet() {
        let mut framer = FrameBuffer::new(GAP_MS);
        let packet = angle_packet().to_bytes();
        assert!(feed(&mut framer, &packet[..2], 0).is_empty());
        // Rest of the packet shows up too late, then a full packet follows
        assert!(feed(&mut framer, &packet[2..], 10).is_empty());
        assert!(!framer.is_synced());
        assert_eq!(feed(&mut framer, &packet, 20), vec![angle_packet()]);
    }

    #[test]
    fn test_noise_burst_then_quiet_gap() {
        let mut framer = FrameBuffer::new(GAP_MS);
        let noise = [0x13, 0x9A, 0x42, 0x07, 0x5E];
        let _ = feed(&mut framer, &noise, 0);
        let packets = feed(&mut framer, &angle_packet().to_bytes(), 50);
        assert_eq!(packets, vec![angle_packet()]);
    }

    #[test]
    fn test_saturation_keeps_progressing() {
        let mut framer = FrameBuffer::new(GAP_MS);
        let _ = feed(&mut framer, &[0x01; 100], 0);
        assert!(framer.buffered() < BUFFER_CAPACITY);
        assert!(framer.discards() > 0);
    }

    #[test]
    fn test_marked_frames() {
        let mut framer = MarkedFrameDecoder::new(GAP_MS);
        let packet = angle_packet();
        let mut bytes = vec![0x00, 0x00];
        bytes.extend_from_slice(&encode_marked(&packet));
        assert_eq!(feed(&mut framer, &bytes, 0), vec![packet]);
        assert!(framer.is_synced());
    }

    #[test]
    fn test_marked_frame_bad_end_marker() {
        let mut framer = MarkedFrameDecoder::new(GAP_MS);
        let packet = angle_packet();
        let mut corrupt = encode_marked(&packet);
        corrupt[5] = 0x56;
        assert!(feed(&mut framer, &corrupt, 0).is_empty());
        assert!(!framer.is_synced());
        assert_eq!(feed(&mut framer, &encode_marked(&packet), 0), vec![packet]);
    }

    #[test]
    fn test_marked_frame_resyncs_on_embedded_start() {
        let mut framer = MarkedFrameDecoder::new(GAP_MS);
        let packet = angle_packet();
        // Truncated frame immediately followed by a full one
        let mut bytes = vec![FRAME_START, 0xB2];
        bytes.extend_from_slice(&encode_marked(&packet));
        assert_eq!(feed(&mut framer, &bytes, 0), vec![packet]);
    }
}
