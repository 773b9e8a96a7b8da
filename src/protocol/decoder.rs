use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, trace};

use super::encoder::checksum;
use super::frame::{
    Command, Frame, HEADER_LEN, MAX_PAYLOAD_LEN, MIN_BUFFERED, SYNC, TERMINATOR, TRAILER_LEN,
};

// ---------------------------------------------------------------------------
// ByteCursor – pending input bytes
// ---------------------------------------------------------------------------

/// Append-only byte buffer with a moving read head.
///
/// Consumed bytes are reclaimed lazily: the live region is shifted to the
/// front only once the dead prefix is at least half the allocation, so a
/// long-running stream does not reallocate on every frame.
#[derive(Debug, Default)]
pub struct ByteCursor {
    buf: Vec<u8>,
    head: usize,
}

impl ByteCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        if self.head > 0 && self.head * 2 >= self.buf.len() {
            self.buf.copy_within(self.head.., 0);
            self.buf.truncate(self.buf.len() - self.head);
            self.head = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes not yet consumed.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.head..]
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume `n` bytes from the front (saturating).
    pub fn advance(&mut self, n: usize) {
        self.head = (self.head + n).min(self.buf.len());
        if self.head == self.buf.len() {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.head = 0;
    }
}

// ---------------------------------------------------------------------------
// FrameDecoder
// ---------------------------------------------------------------------------

/// Running counters, for observability only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DecoderStats {
    pub frames: u64,
    /// Single-byte drops after a failed terminator/checksum/length check.
    pub resync_drops: u64,
    /// Bytes skipped while hunting for the start marker.
    pub discarded_bytes: u64,
    /// Valid frames with an unknown command or a short payload.
    pub ignored_frames: u64,
}

enum Step {
    Decoded(Frame),
    Ignored,
    Resync,
    Pending,
}

/// Turns an unreliable byte stream into validated frames.
///
/// Corrupted input never surfaces as an error: a frame that fails validation
/// costs exactly one byte and the scan restarts at the next marker, which
/// recovers even from a damaged length field.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    cursor: ByteCursor,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every frame that can now be completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.cursor.extend(bytes);

        let mut frames = Vec::new();
        loop {
            match self.step() {
                Step::Decoded(frame) => frames.push(frame),
                Step::Ignored | Step::Resync => continue,
                Step::Pending => break,
            }
        }
        frames
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending_len(&self) -> usize {
        self.cursor.len()
    }

    /// Drop buffered bytes and counters.
    pub fn reset(&mut self) {
        self.cursor.clear();
        self.stats = DecoderStats::default();
    }

    fn step(&mut self) -> Step {
        let pending = self.cursor.as_slice();
        let Some(start) = pending.windows(2).position(|w| w == SYNC) else {
            // A lone trailing 0xAA may be the first half of a marker.
            let keep = usize::from(pending.last() == Some(&SYNC[0]));
            let dropped = pending.len() - keep;
            if dropped > 0 {
                trace!("no frame marker, discarding {dropped} bytes");
                self.stats.discarded_bytes += dropped as u64;
                self.cursor.advance(dropped);
            }
            return Step::Pending;
        };
        if start > 0 {
            self.stats.discarded_bytes += start as u64;
            self.cursor.advance(start);
        }

        let buf = self.cursor.as_slice();
        if buf.len() < MIN_BUFFERED {
            return Step::Pending;
        }

        let cmd = buf[2];
        let length = u16::from_le_bytes([buf[3], buf[4]]) as usize;
        if length > MAX_PAYLOAD_LEN {
            return self.resync(cmd, "implausible length");
        }

        let total = HEADER_LEN + length + TRAILER_LEN;
        if buf.len() < total {
            return Step::Pending;
        }

        let payload = &buf[HEADER_LEN..HEADER_LEN + length];
        if buf[total - 1] != TERMINATOR {
            return self.resync(cmd, "bad terminator");
        }
        if buf[total - 2] != checksum(cmd, payload) {
            return self.resync(cmd, "checksum mismatch");
        }

        let decoded = decode_payload(cmd, payload);
        self.cursor.advance(total);
        match decoded {
            Some(frame) => {
                trace!("decoded {:?} frame ({total} bytes)", frame.command());
                self.stats.frames += 1;
                Step::Decoded(frame)
            }
            None => {
                debug!("ignoring frame: cmd {cmd:#04x}, payload {length} bytes");
                self.stats.ignored_frames += 1;
                Step::Ignored
            }
        }
    }

    fn resync(&mut self, cmd: u8, reason: &str) -> Step {
        debug!("resync on cmd {cmd:#04x}: {reason}");
        self.stats.resync_drops += 1;
        self.cursor.advance(1);
        Step::Resync
    }
}

// ---------------------------------------------------------------------------
// Payload parsing
// ---------------------------------------------------------------------------

/// `None` for unknown commands and payloads shorter than the kind requires.
/// Bytes past the required length are ignored.
fn decode_payload(cmd: u8, payload: &[u8]) -> Option<Frame> {
    let command = Command::from_u8(cmd)?;
    if payload.len() < command.min_payload_len() {
        return None;
    }

    let mut rdr = Cursor::new(payload);
    let timestamp = rdr.read_u32::<LittleEndian>().ok()?;
    match command {
        Command::RawAccel => Some(Frame::RawAccel {
            timestamp,
            x: rdr.read_f32::<LittleEndian>().ok()?,
            y: rdr.read_f32::<LittleEndian>().ok()?,
            z: rdr.read_f32::<LittleEndian>().ok()?,
        }),
        Command::Spectrum21 => {
            let mut magnitudes = [0.0f32; 21];
            read_f32s(&mut rdr, &mut magnitudes)?;
            Some(Frame::Spectrum21 {
                timestamp,
                magnitudes,
            })
        }
        Command::Spectrum257 => {
            let mut magnitudes = Box::new([0.0f32; 257]);
            read_f32s(&mut rdr, magnitudes.as_mut_slice())?;
            Some(Frame::Spectrum257 {
                timestamp,
                magnitudes,
            })
        }
    }
}

fn read_f32s(rdr: &mut Cursor<&[u8]>, out: &mut [f32]) -> Option<()> {
    rdr.read_f32_into::<LittleEndian>(out).ok()
}
