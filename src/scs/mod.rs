// SCS protocol shared by every node
//
// - packet: 4-byte codec and the legal packet table
// - framing: byte-stream recovery for the bare and marked link variants
// - payload: colour words, angles and payload validation

pub mod framing;
pub mod packet;
pub mod payload;

pub use framing::{FrameBuffer, Framer, MarkedFrameDecoder, encode_marked};
pub use packet::{Header, Mode, NodeId, PACKET_SIZE, Packet, decode, encode};
pub use payload::{Channel, Color, ColorClass, Colors, PacketRejected, Turn, validate};
