/// Wire protocol: frame types, encoding and the resynchronising decoder.
///
/// Frame layout:
/// ```text
///  ┌──────────┬─────┬─────────────┬──────────────────┬──────────┬──────┐
///  │ AA 55    │ cmd │ length (LE) │ payload          │ checksum │ 0D   │
///  │ 2 bytes  │ u8  │ u16         │ `length` bytes   │ u8 (XOR) │ u8   │
///  └──────────┴─────┴─────────────┴──────────────────┴──────────┴──────┘
///
///  serial bytes ──► FrameDecoder::feed ──► Vec<Frame>
/// ```
///
/// The checksum is the XOR of `cmd`, every payload byte and both length
/// bytes. It detects line noise, nothing more.
pub mod decoder;
pub mod encoder;
pub mod frame;

pub use decoder::{ByteCursor, DecoderStats, FrameDecoder};
pub use encoder::{checksum, encode};
pub use frame::{Command, Frame, HostCommand, SpectrumKind};
