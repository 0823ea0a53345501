//! Frame codec.

use super::WebSocketError;
use std::io::{self, Read, Write};

/// WebSocket opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    /// Decode the low nibble of the first frame byte.
    #[must_use]
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Close, ping and pong.
    #[must_use]
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A single WebSocket frame. The payload is always held unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    /// The three reserved bits, right-aligned.
    pub rsv: u8,
    pub opcode: OpCode,
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A final, unmasked frame.
    #[must_use]
    pub fn new(opcode: OpCode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            rsv: 0,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Set the fin bit.
    #[must_use]
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Mask the payload with `key` when encoded.
    #[must_use]
    pub fn masked(mut self, key: [u8; 4]) -> Self {
        self.mask = Some(key);
        self
    }

    /// Encode the frame to wire bytes.
    ///
    /// Lengths up to 125 fit in the second byte; up to 65535 use the 16-bit
    /// escape (126); anything larger uses the 64-bit escape (127).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(14 + self.payload.len());
        let b0 = (if self.fin { 0x80 } else { 0 }) | ((self.rsv & 0x07) << 4) | (self.opcode as u8);
        out.push(b0);

        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };
        let len = self.payload.len() as u64;
        if len <= 125 {
            out.push(mask_bit | len as u8);
        } else if len <= u64::from(u16::MAX) {
            out.push(mask_bit | 126);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            out.push(mask_bit | 127);
            out.extend_from_slice(&len.to_be_bytes());
        }

        match self.mask {
            Some(key) => {
                out.extend_from_slice(&key);
                out.extend(
                    self.payload
                        .iter()
                        .enumerate()
                        .map(|(i, b)| b ^ key[i & 3]),
                );
            }
            None => out.extend_from_slice(&self.payload),
        }
        out
    }

    /// Encode and write the frame in one call.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode())
    }
}

/// Read one frame.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first byte.
/// Client frames are accepted masked or unmasked. A payload longer than
/// `max_payload` is rejected before it is read.
pub fn read_frame<R: Read + ?Sized>(
    reader: &mut R,
    max_payload: usize,
) -> Result<Option<Frame>, WebSocketError> {
    let mut b0 = [0u8; 1];
    loop {
        match reader.read(&mut b0) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    let b0 = b0[0];
    let b1 = read_array::<_, 1>(reader)?[0];

    let fin = (b0 & 0x80) != 0;
    let rsv = (b0 >> 4) & 0x07;
    let opcode = OpCode::from_u8(b0 & 0x0f).ok_or(WebSocketError::Protocol("invalid opcode"))?;
    let masked = (b1 & 0x80) != 0;
    let mut len = u64::from(b1 & 0x7f);

    if opcode.is_control() && !fin {
        return Err(WebSocketError::Protocol("control frames must not be fragmented"));
    }

    if len == 126 {
        len = u64::from(u16::from_be_bytes(read_array(reader)?));
    } else if len == 127 {
        len = u64::from_be_bytes(read_array(reader)?);
        if (len >> 63) != 0 {
            return Err(WebSocketError::Protocol("invalid 64-bit length"));
        }
    }

    if opcode.is_control() && len > 125 {
        return Err(WebSocketError::Protocol("control frame too large"));
    }
    if len > max_payload as u64 {
        return Err(WebSocketError::PayloadTooLarge {
            len,
            max: max_payload,
        });
    }

    let mask = if masked {
        Some(read_array::<_, 4>(reader)?)
    } else {
        None
    };

    // Bounded by max_payload above.
    #[allow(clippy::cast_possible_truncation)]
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    if let Some(key) = mask {
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= key[i & 3];
        }
    }

    Ok(Some(Frame {
        fin,
        rsv,
        opcode,
        mask,
        payload,
    }))
}

fn read_array<R: Read + ?Sized, const N: usize>(reader: &mut R) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
