use byteorder::{LittleEndian, WriteBytesExt};

use super::frame::{Frame, HEADER_LEN, SYNC, TERMINATOR, TRAILER_LEN};

/// XOR of `cmd`, every payload byte and both bytes of the payload length.
pub fn checksum(cmd: u8, payload: &[u8]) -> u8 {
    let len = payload.len() as u16;
    let [lo, hi] = len.to_le_bytes();
    payload.iter().fold(cmd ^ lo ^ hi, |acc, b| acc ^ b)
}

/// Wire encoding of a frame, as the device firmware emits it.
pub fn encode(frame: &Frame) -> Vec<u8> {
    let payload = payload_bytes(frame);
    let cmd = frame.command() as u8;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    out.extend_from_slice(&SYNC);
    out.push(cmd);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(&payload);
    out.push(checksum(cmd, &payload));
    out.push(TERMINATOR);
    out
}

fn payload_bytes(frame: &Frame) -> Vec<u8> {
    let values: Vec<f32> = match frame {
        Frame::RawAccel { x, y, z, .. } => vec![*x, *y, *z],
        Frame::Spectrum21 { magnitudes, .. } => magnitudes.to_vec(),
        Frame::Spectrum257 { magnitudes, .. } => magnitudes.to_vec(),
    };

    let mut buf = Vec::with_capacity(4 + values.len() * 4);
    // Writes into a Vec cannot fail.
    let _ = buf.write_u32::<LittleEndian>(frame.timestamp());
    for v in values {
        let _ = buf.write_f32::<LittleEndian>(v);
    }
    buf
}
