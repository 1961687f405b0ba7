//! TraCI wire constants, payload encoding, and message framing.
//!
//! A TraCI message is a 4-byte big-endian total length (including the
//! length field itself) followed by commands. Each command starts with
//! its own length: a single byte when the command fits in 255 bytes,
//! or a zero byte followed by a 4-byte extended length. The command id
//! byte comes next, then the payload.
//!
//! Every request is answered first by a status command (result byte
//! plus description string) for the command id, optionally followed by
//! result commands carrying the requested values.

/// Command: get the API/server version. Used as the handshake.
pub const CMD_GET_VERSION: u8 = 0x00;
/// Command: advance the simulation.
pub const CMD_SIM_STEP: u8 = 0x02;
/// Command: declare this client's execution order among all clients.
pub const CMD_SET_ORDER: u8 = 0x03;
/// Command: close the connection.
pub const CMD_CLOSE: u8 = 0x7F;

/// Command: retrieve a vehicle variable.
pub const CMD_GET_VEHICLE_VARIABLE: u8 = 0xA4;
/// Response id for vehicle variable retrieval.
pub const RESPONSE_GET_VEHICLE_VARIABLE: u8 = 0xB4;
/// Command: retrieve a traffic-light variable.
pub const CMD_GET_TL_VARIABLE: u8 = 0xA2;
/// Response id for traffic-light variable retrieval.
pub const RESPONSE_GET_TL_VARIABLE: u8 = 0xB2;
/// Command: change a traffic-light variable.
pub const CMD_SET_TL_VARIABLE: u8 = 0xC2;
/// Command: retrieve a simulation variable.
pub const CMD_GET_SIM_VARIABLE: u8 = 0xAB;
/// Response id for simulation variable retrieval.
pub const RESPONSE_GET_SIM_VARIABLE: u8 = 0xBB;

/// Variable: id list (vehicles, traffic lights).
pub const VAR_ID_LIST: u8 = 0x00;
/// Variable: vehicle speed in m/s.
pub const VAR_SPEED: u8 = 0x40;
/// Variable: vehicle position (2D).
pub const VAR_POSITION: u8 = 0x42;
/// Variable: vehicle heading angle in degrees.
pub const VAR_ANGLE: u8 = 0x43;
/// Variable: traffic-light state string.
pub const TL_RED_YELLOW_GREEN_STATE: u8 = 0x20;
/// Variable: number of vehicles in or still expected to enter the
/// network.
pub const VAR_MIN_EXPECTED_VEHICLES: u8 = 0x7D;

/// Data type: 2D cartesian position (two doubles).
pub const POSITION_2D: u8 = 0x01;
/// Data type: unsigned byte.
pub const TYPE_UBYTE: u8 = 0x07;
/// Data type: signed 32-bit integer.
pub const TYPE_INTEGER: u8 = 0x09;
/// Data type: 64-bit float.
pub const TYPE_DOUBLE: u8 = 0x0B;
/// Data type: length-prefixed UTF-8 string.
pub const TYPE_STRING: u8 = 0x0C;
/// Data type: list of strings.
pub const TYPE_STRINGLIST: u8 = 0x0E;
/// Data type: compound (count-prefixed heterogeneous sequence).
pub const TYPE_COMPOUND: u8 = 0x0F;

/// Status result: command succeeded.
pub const STATUS_OK: u8 = 0x00;
/// Status result: command failed.
pub const STATUS_ERR: u8 = 0xFF;
/// Status result: command not implemented by the server.
pub const STATUS_NOT_IMPLEMENTED: u8 = 0x01;

/// Errors produced while decoding a TraCI message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The message ended before the expected value.
    #[error("truncated message: needed {needed} more bytes at offset {offset}")]
    Truncated {
        /// Bytes still required.
        needed: usize,
        /// Read position when the shortfall was detected.
        offset: usize,
    },

    /// A string was not valid UTF-8.
    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 {
        /// Read position of the string.
        offset: usize,
    },

    /// A value had an unexpected type marker.
    #[error("unexpected type marker {found:#04x}, expected {expected:#04x}")]
    UnexpectedType {
        /// Marker found on the wire.
        found: u8,
        /// Marker required by the caller.
        expected: u8,
    },
}

/// Payload encoder: big-endian primitives into a growing buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// An empty encoder.
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Consume the encoder, yielding the payload bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Current payload length.
    pub const fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the payload is empty.
    pub const fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append a raw byte.
    pub fn put_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    /// Append a big-endian i32.
    pub fn put_i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Append a big-endian f64.
    pub fn put_f64(&mut self, v: f64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Append a length-prefixed string (no type marker).
    pub fn put_string(&mut self, s: &str) -> &mut Self {
        self.put_i32(s.len() as i32);
        self.buf.extend_from_slice(s.as_bytes());
        self
    }
}

/// Payload decoder: a cursor over received bytes.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Decode from the given bytes, starting at offset zero.
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current read position.
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Skip `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] if fewer than `n` remain.
    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.take(n).map(|_| ())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                needed: n - self.remaining(),
                offset: self.pos,
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read one byte.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] at end of input.
    pub fn take_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian i32.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] if fewer than 4 bytes remain.
    pub fn take_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a big-endian f64.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] if fewer than 8 bytes remain.
    pub fn take_f64(&mut self) -> Result<f64, DecodeError> {
        let bytes = self.take(8)?;
        let mut arr = [0_u8; 8];
        arr.copy_from_slice(bytes);
        Ok(f64::from_be_bytes(arr))
    }

    /// Read a length-prefixed string (no type marker).
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] or
    /// [`DecodeError::InvalidUtf8`].
    pub fn take_string(&mut self) -> Result<String, DecodeError> {
        let offset = self.pos;
        let len = self.take_i32()?.max(0) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { offset })
    }

    /// Read a count-prefixed list of strings (no type marker).
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] on any malformed element.
    pub fn take_string_list(&mut self) -> Result<Vec<String>, DecodeError> {
        let count = self.take_i32()?.max(0) as usize;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(self.take_string()?);
        }
        Ok(items)
    }

    /// Read a type marker and require it to match `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnexpectedType`] on mismatch.
    pub fn expect_type(&mut self, expected: u8) -> Result<(), DecodeError> {
        let found = self.take_u8()?;
        if found == expected {
            Ok(())
        } else {
            Err(DecodeError::UnexpectedType { found, expected })
        }
    }
}

/// Frame one command: inner length prefix (single-byte or extended),
/// command id, payload.
pub fn frame_command(command_id: u8, payload: &[u8]) -> Vec<u8> {
    // Single-byte length covers length + id + payload.
    let short_len = payload.len() + 2;
    let mut out = Vec::with_capacity(short_len + 4);
    if short_len <= u8::MAX as usize {
        out.push(short_len as u8);
    } else {
        // Extended framing: zero byte, then the total as i32
        // (length byte + 4 length bytes + id + payload).
        out.push(0);
        out.extend_from_slice(&((payload.len() + 6) as i32).to_be_bytes());
    }
    out.push(command_id);
    out.extend_from_slice(payload);
    out
}

/// Frame a full message from already-framed commands.
pub fn frame_message(commands: &[Vec<u8>]) -> Vec<u8> {
    let inner: usize = commands.iter().map(Vec::len).sum();
    let total = inner + 4;
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as i32).to_be_bytes());
    for command in commands {
        out.extend_from_slice(command);
    }
    out
}

/// One command sliced out of a received message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand<'a> {
    /// The command or response id.
    pub id: u8,
    /// The command payload (after the id byte).
    pub payload: &'a [u8],
}

/// Split a received message body (after the 4-byte message length)
/// into commands.
///
/// # Errors
///
/// Returns [`DecodeError`] when a command length runs past the end of
/// the body.
pub fn split_commands(body: &[u8]) -> Result<Vec<RawCommand<'_>>, DecodeError> {
    let mut decoder = Decoder::new(body);
    let mut commands = Vec::new();
    while decoder.remaining() > 0 {
        let start = decoder.position();
        let short_len = decoder.take_u8()? as usize;
        let (total_len, header_len) = if short_len == 0 {
            (decoder.take_i32()?.max(0) as usize, 5)
        } else {
            (short_len, 1)
        };
        if total_len < header_len + 1 {
            return Err(DecodeError::Truncated {
                needed: header_len + 1 - total_len,
                offset: start,
            });
        }
        let id = decoder.take_u8()?;
        let payload_len = total_len - header_len - 1;
        let payload_start = decoder.position();
        decoder.skip(payload_len)?;
        commands.push(RawCommand {
            id,
            payload: &body[payload_start..payload_start + payload_len],
        });
    }
    Ok(commands)
}
