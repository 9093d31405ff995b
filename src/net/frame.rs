//! Wire framing.
//!
//! Every frame is `{u16 length, u16 opcode, payload, u16 seal}`,
//! little-endian, where `length` counts the whole frame and the seal is
//! the fixed trailer 0x01 0x00. Frames with protobuf payloads carry
//! four reserved scratch bytes between the header and the encoded
//! message.

use thiserror::Error;

/// Smallest legal frame: header only.
pub const MIN_FRAME: usize = 4;

/// Largest legal frame.
pub const MAX_FRAME: usize = 8192;

/// Fixed 2-byte trailer on every sealed frame.
pub const SEAL: [u8; 2] = [0x01, 0x00];

/// Length + opcode.
pub const HEADER_LEN: usize = 4;

/// Reserved scratch bytes preceding a protobuf payload.
pub const SCRATCH_LEN: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {0} outside [{MIN_FRAME}, {MAX_FRAME}]")]
    BadLength(usize),

    #[error("frame seal mismatch: {0:02x} {1:02x}")]
    BadSeal(u8, u8),

    #[error("read past end of packet at offset {0}")]
    Truncated(usize),

    #[error("frame would exceed {MAX_FRAME} bytes")]
    Oversize,
}

/// A complete, seal-verified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    buf: Vec<u8>,
}

impl Packet {
    /// Wrap a full frame buffer, verifying length and seal.
    pub fn parse(buf: Vec<u8>) -> Result<Self, FrameError> {
        if buf.len() < MIN_FRAME || buf.len() > MAX_FRAME {
            return Err(FrameError::BadLength(buf.len()));
        }
        let declared = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        if declared != buf.len() {
            return Err(FrameError::BadLength(declared));
        }
        // Header-only frames carry no seal; anything longer must.
        if buf.len() > MIN_FRAME {
            if buf.len() < HEADER_LEN + SEAL.len() {
                return Err(FrameError::BadLength(buf.len()));
            }
            let tail = &buf[buf.len() - 2..];
            if tail != SEAL {
                return Err(FrameError::BadSeal(tail[0], tail[1]));
            }
        }
        Ok(Self { buf })
    }

    pub fn opcode(&self) -> u16 {
        u16::from_le_bytes([self.buf[2], self.buf[3]])
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Bytes between the header and the seal.
    pub fn payload(&self) -> &[u8] {
        let end = if self.buf.len() > MIN_FRAME {
            self.buf.len() - SEAL.len()
        } else {
            self.buf.len()
        };
        &self.buf[HEADER_LEN..end]
    }

    /// Protobuf bytes: the payload past the reserved scratch prefix.
    pub fn proto_payload(&self) -> Result<&[u8], FrameError> {
        let payload = self.payload();
        payload
            .get(SCRATCH_LEN..)
            .ok_or(FrameError::Truncated(SCRATCH_LEN))
    }

    pub fn reader(&self) -> PacketReader<'_> {
        PacketReader {
            payload: self.payload(),
            pos: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

/// Primitive little-endian reads over a packet payload, with seek.
pub struct PacketReader<'a> {
    payload: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn remaining(&self) -> usize {
        self.payload.len().saturating_sub(self.pos)
    }

    pub fn get_u8(&mut self) -> Result<u8, FrameError> {
        let b = *self
            .payload
            .get(self.pos)
            .ok_or(FrameError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn get_u16(&mut self) -> Result<u16, FrameError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, FrameError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, FrameError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        let bytes = self
            .payload
            .get(self.pos..self.pos + n)
            .ok_or(FrameError::Truncated(self.pos))?;
        self.pos += n;
        Ok(bytes)
    }
}

/// Builds one outbound frame; `finish` patches the length and appends
/// the seal.
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new(opcode: u16) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&[0u8; 2]);
        buf.extend_from_slice(&opcode.to_le_bytes());
        Self { buf }
    }

    pub fn put_u8(mut self, v: u8) -> Self {
        self.buf.push(v);
        self
    }

    pub fn put_u16(mut self, v: u16) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_u32(mut self, v: u32) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_u64(mut self, v: u64) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_bytes(mut self, bytes: &[u8]) -> Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn put_zeros(mut self, n: usize) -> Self {
        self.buf.resize(self.buf.len() + n, 0);
        self
    }

    pub fn finish(mut self) -> Result<Vec<u8>, FrameError> {
        self.buf.extend_from_slice(&SEAL);
        if self.buf.len() > MAX_FRAME {
            return Err(FrameError::Oversize);
        }
        let len = self.buf.len() as u16;
        self.buf[..2].copy_from_slice(&len.to_le_bytes());
        Ok(self.buf)
    }
}

/// Accumulates decrypted stream bytes and yields complete frames.
///
/// No partial frame ever leaves this type; a bad length or seal is
/// fatal to the stream.
#[derive(Default)]
pub struct Deframer {
    buf: Vec<u8>,
}

impl Deframer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one has fully arrived.
    pub fn next_frame(&mut self) -> Result<Option<Packet>, FrameError> {
        if self.buf.len() < MIN_FRAME {
            return Ok(None);
        }
        let length = u16::from_le_bytes([self.buf[0], self.buf[1]]) as usize;
        if length < MIN_FRAME || length > MAX_FRAME {
            return Err(FrameError::BadLength(length));
        }
        if self.buf.len() < length {
            return Ok(None);
        }

        let rest = self.buf.split_off(length);
        let frame = std::mem::replace(&mut self.buf, rest);
        Packet::parse(frame).map(Some)
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
