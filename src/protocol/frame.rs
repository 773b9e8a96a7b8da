use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Framing constants
// ---------------------------------------------------------------------------

/// Two-byte start-of-frame marker.
pub const SYNC: [u8; 2] = [0xAA, 0x55];

/// End-of-frame byte.
pub const TERMINATOR: u8 = 0x0D;

/// Marker + cmd + length.
pub const HEADER_LEN: usize = 5;

/// Checksum + terminator.
pub const TRAILER_LEN: usize = 2;

/// Nothing is parsed until at least this many bytes are buffered.
pub const MIN_BUFFERED: usize = 10;

/// Declared lengths above this are treated as a corrupted header.
pub const MAX_PAYLOAD_LEN: usize = 2048;

/// Bytes of the little-endian `u32` timestamp leading every payload.
pub const TIMESTAMP_LEN: usize = 4;

// ---------------------------------------------------------------------------
// Command codes
// ---------------------------------------------------------------------------

/// Device → host frame kinds, keyed by the `cmd` byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Spectrum21 = 0x01,
    RawAccel = 0x02,
    Spectrum257 = 0x04,
}

impl Command {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(Command::Spectrum21),
            0x02 => Some(Command::RawAccel),
            0x04 => Some(Command::Spectrum257),
            _ => None,
        }
    }

    /// Shortest payload that decodes into a frame of this kind.
    pub fn min_payload_len(self) -> usize {
        match self {
            Command::RawAccel => TIMESTAMP_LEN + 3 * 4,
            Command::Spectrum21 => SpectrumKind::Bins21.payload_len(),
            Command::Spectrum257 => SpectrumKind::Bins257.payload_len(),
        }
    }
}

/// Single-byte host → device commands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// Start the device's remote alarm cycle.
    TriggerAlarm = 0x10,
    /// Ask the device for a text status reply.
    QueryStatus = 0x11,
}

impl HostCommand {
    pub fn byte(self) -> u8 {
        self as u8
    }
}

// ---------------------------------------------------------------------------
// Spectrum kinds and their fixed frequency axes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpectrumKind {
    /// 21 bins, 25 Hz apart (0–500 Hz).
    Bins21,
    /// 257 bins of a 512-point FFT at 1 kHz.
    Bins257,
}

static AXIS_21: OnceLock<Vec<f32>> = OnceLock::new();
static AXIS_257: OnceLock<Vec<f32>> = OnceLock::new();

impl SpectrumKind {
    pub fn bin_count(self) -> usize {
        match self {
            SpectrumKind::Bins21 => 21,
            SpectrumKind::Bins257 => 257,
        }
    }

    pub fn bin_width_hz(self) -> f32 {
        match self {
            SpectrumKind::Bins21 => 25.0,
            SpectrumKind::Bins257 => 1000.0 / 512.0,
        }
    }

    pub fn payload_len(self) -> usize {
        TIMESTAMP_LEN + self.bin_count() * 4
    }

    pub fn from_bin_count(bins: usize) -> Option<Self> {
        match bins {
            21 => Some(SpectrumKind::Bins21),
            257 => Some(SpectrumKind::Bins257),
            _ => None,
        }
    }

    /// Ascending frequency axis shared by every frame of this kind.
    pub fn frequencies(self) -> &'static [f32] {
        let cell = match self {
            SpectrumKind::Bins21 => &AXIS_21,
            SpectrumKind::Bins257 => &AXIS_257,
        };
        cell.get_or_init(|| {
            (0..self.bin_count())
                .map(|i| i as f32 * self.bin_width_hz())
                .collect()
        })
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One checksum-validated application message.
///
/// Spectrum frames carry only magnitudes; the frequency axis is a function of
/// the kind and is available through [`Frame::frequencies`].
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    RawAccel {
        timestamp: u32,
        x: f32,
        y: f32,
        z: f32,
    },
    Spectrum21 {
        timestamp: u32,
        magnitudes: [f32; 21],
    },
    Spectrum257 {
        timestamp: u32,
        magnitudes: Box<[f32; 257]>,
    },
}

impl Frame {
    pub fn command(&self) -> Command {
        match self {
            Frame::RawAccel { .. } => Command::RawAccel,
            Frame::Spectrum21 { .. } => Command::Spectrum21,
            Frame::Spectrum257 { .. } => Command::Spectrum257,
        }
    }

    pub fn timestamp(&self) -> u32 {
        match self {
            Frame::RawAccel { timestamp, .. }
            | Frame::Spectrum21 { timestamp, .. }
            | Frame::Spectrum257 { timestamp, .. } => *timestamp,
        }
    }

    pub fn spectrum_kind(&self) -> Option<SpectrumKind> {
        match self {
            Frame::RawAccel { .. } => None,
            Frame::Spectrum21 { .. } => Some(SpectrumKind::Bins21),
            Frame::Spectrum257 { .. } => Some(SpectrumKind::Bins257),
        }
    }

    /// Triaxial sample of a `RawAccel` frame.
    pub fn accel(&self) -> Option<[f32; 3]> {
        match self {
            Frame::RawAccel { x, y, z, .. } => Some([*x, *y, *z]),
            _ => None,
        }
    }

    pub fn magnitudes(&self) -> Option<&[f32]> {
        match self {
            Frame::RawAccel { .. } => None,
            Frame::Spectrum21 { magnitudes, .. } => Some(magnitudes.as_slice()),
            Frame::Spectrum257 { magnitudes, .. } => Some(magnitudes.as_slice()),
        }
    }

    pub fn frequencies(&self) -> Option<&'static [f32]> {
        self.spectrum_kind().map(SpectrumKind::frequencies)
    }
}
