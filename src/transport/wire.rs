//! The `TYPE$LENGTH$PAYLOAD` framing spoken between networked transports.
//!
//! `LENGTH` is the decimal byte count of the UTF-8 payload. Frames can arrive split across reads
//! or several in a single read, so [`FrameDecoder`] buffers bytes and yields complete messages one
//! at a time.

use serde_json::Value;

use super::Address;
use crate::error::Error;

const ANNOUNCE: &str = "ANNOUNCE";
const SEND_VARS: &str = "SEND_VARS";
const SEPARATOR: u8 = b'$';

/// A message exchanged between two networked transports.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Tells the receiving side on which address the sender itself is listening.
    Announce(Address),
    /// A batch of named values, in send order.
    SendVars(Vec<(String, Value)>),
}

/// Errors that can occur while decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame type is neither `ANNOUNCE` nor `SEND_VARS`.
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    /// The length field is not a decimal number.
    #[error("invalid payload length '{0}'")]
    InvalidLength(String),
    /// The payload is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
    /// The payload does not have the structure required by its message type.
    #[error("malformed payload: {0}")]
    InvalidPayload(String),
}

impl Message {
    /// Encodes the message as a single frame.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let (kind, payload) = match self {
            Message::Announce(address) => (ANNOUNCE, address.to_string()),
            Message::SendVars(vars) => (SEND_VARS, encode_variables(vars)?),
        };
        Ok(format!("{kind}${}${payload}", payload.len()).into_bytes())
    }
}

fn encode_variables(vars: &[(String, Value)]) -> Result<String, Error> {
    let mut tokens = Vec::with_capacity(vars.len() * 2);
    for (name, value) in vars {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(FrameError::InvalidPayload(format!(
                "variable name '{name}' cannot be sent over the wire"
            ))
            .into());
        }
        tokens.push(name.clone());
        tokens.push(serde_json::to_string(value)?);
    }
    Ok(tokens.join(" "))
}

fn decode_variables(payload: &str) -> Result<Vec<(String, Value)>, FrameError> {
    let mut vars = vec![];
    let mut rest = payload.trim_start_matches(' ');
    while !rest.is_empty() {
        let Some((name, tail)) = rest.split_once(' ') else {
            return Err(FrameError::InvalidPayload(format!(
                "variable '{rest}' has no value"
            )));
        };
        // values are parsed as a JSON stream so that strings containing spaces stay intact
        let mut values = serde_json::Deserializer::from_str(tail).into_iter::<Value>();
        let value = match values.next() {
            Some(Ok(value)) => value,
            Some(Err(e)) => return Err(FrameError::InvalidPayload(e.to_string())),
            None => {
                return Err(FrameError::InvalidPayload(format!(
                    "variable '{name}' has no value"
                )));
            }
        };
        let consumed = values.byte_offset();
        vars.push((name.to_string(), value));
        rest = tail[consumed..].trim_start_matches(' ');
    }
    Ok(vars)
}

/// Buffers incoming bytes and splits them into [`Message`]s.
#[derive(Debug, Default)]
pub(crate) struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete message, or `None` if more bytes are needed.
    pub(crate) fn next_message(&mut self) -> Result<Option<Message>, FrameError> {
        let longest_type = ANNOUNCE.len().max(SEND_VARS.len());
        let Some(type_end) = self.buf.iter().position(|b| *b == SEPARATOR) else {
            if self.buf.len() > longest_type {
                return Err(FrameError::UnknownType(
                    String::from_utf8_lossy(&self.buf[..longest_type + 1]).into_owned(),
                ));
            }
            return Ok(None);
        };
        let kind = String::from_utf8_lossy(&self.buf[..type_end]).into_owned();
        if kind != ANNOUNCE && kind != SEND_VARS {
            return Err(FrameError::UnknownType(kind));
        }

        let len_start = type_end + 1;
        let Some(len_end) = self.buf[len_start..]
            .iter()
            .position(|b| *b == SEPARATOR)
            .map(|i| len_start + i)
        else {
            if !self.buf[len_start..].iter().all(u8::is_ascii_digit) {
                return Err(FrameError::InvalidLength(
                    String::from_utf8_lossy(&self.buf[len_start..]).into_owned(),
                ));
            }
            return Ok(None);
        };
        let len_field = &self.buf[len_start..len_end];
        let len: usize = std::str::from_utf8(len_field)
            .ok()
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                FrameError::InvalidLength(String::from_utf8_lossy(len_field).into_owned())
            })?;

        let payload_start = len_end + 1;
        if self.buf.len() < payload_start + len {
            return Ok(None);
        }
        let frame: Vec<u8> = self.buf.drain(..payload_start + len).collect();
        let payload =
            std::str::from_utf8(&frame[payload_start..]).map_err(|_| FrameError::InvalidUtf8)?;

        let msg = if kind == ANNOUNCE {
            let address = payload
                .parse()
                .map_err(|_| FrameError::InvalidPayload(format!("bad address '{payload}'")))?;
            Message::Announce(address)
        } else {
            Message::SendVars(decode_variables(payload)?)
        };
        Ok(Some(msg))
    }
}
