//! Stream framing for the Meshtastic serial API.
//!
//! Protobuf packets on the serial link are wrapped as:
//!
//!   `0x94 0xC3 <len_hi> <len_lo> <protobuf bytes>`
//!
//! Anything between frames is debug console text from the firmware and is
//! skipped. The decoder is incremental: feed it whatever the port returned and
//! pull out complete payloads.

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
pub const HEADER_LEN: usize = 4;
/// Largest ToRadio/FromRadio the firmware will accept or emit.
pub const MAX_FRAME_SIZE: usize = 512;

#[derive(Debug, Default)]
pub struct StreamDecoder {
    buf: Vec<u8>,
    /// Bytes discarded while hunting for a header (console output, line noise)
    skipped: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Total bytes dropped while resynchronizing.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Extract the next complete payload, or `None` until more bytes arrive.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            // Realign to START1
            match self.buf.iter().position(|&b| b == START1) {
                Some(0) => {}
                Some(pos) => {
                    self.skip(pos);
                }
                None => {
                    let n = self.buf.len();
                    self.skip(n);
                    return None;
                }
            }
            if self.buf.len() < 2 {
                return None;
            }
            if self.buf[1] != START2 {
                self.skip(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let declared = ((self.buf[2] as usize) << 8) | (self.buf[3] as usize);
            if declared == 0 || declared > MAX_FRAME_SIZE {
                // Corrupt header; drop START1 and hunt again
                self.skip(1);
                continue;
            }
            if self.buf.len() < HEADER_LEN + declared {
                return None;
            }
            let frame = self.buf[HEADER_LEN..HEADER_LEN + declared].to_vec();
            self.buf.drain(..HEADER_LEN + declared);
            return Some(frame);
        }
    }

    fn skip(&mut self, n: usize) {
        self.buf.drain(..n);
        self.skipped += n;
    }
}

/// Wrap an encoded ToRadio in the stream header. Returns `None` when the
/// payload exceeds what the firmware accepts.
pub fn encode_frame(payload: &[u8]) -> Option<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        return None;
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.push(START1);
    out.push(START2);
    out.push(((payload.len() >> 8) & 0xFF) as u8);
    out.push((payload.len() & 0xFF) as u8);
    out.extend_from_slice(payload);
    Some(out)
}
