//! Client-side response decoder

use crate::error::{ProtocolError, ProtocolResult};
use crate::parser::{parse_content, Tokenizer};
use crate::response::Response;
use crate::MAX_MESSAGE_SIZE;
use bytes::{Buf, BytesMut};
use padsync_core::{ChannelEvent, DocumentId, ParticipantId};

/// Incremental decoder for server output: replies and push frames
pub struct ResponseDecoder {
    buffer: BytesMut,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    pub fn feed(&mut self, data: &[u8]) -> ProtocolResult<()> {
        if self.buffer.len() + data.len() > MAX_MESSAGE_SIZE {
            let size = self.buffer.len() + data.len();
            self.buffer.clear();
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: MAX_MESSAGE_SIZE,
            });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    /// Decode the next complete response, `None` if more bytes are needed.
    ///
    /// On a malformed frame the offending line is discarded before the error
    /// is returned.
    pub fn decode(&mut self) -> ProtocolResult<Option<Response>> {
        match decode_at(&self.buffer, 0) {
            Ok(Some((response, end))) => {
                self.buffer.advance(end);
                Ok(Some(response))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                let skip = self
                    .buffer
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(self.buffer.len(), |p| p + 1);
                self.buffer.advance(skip);
                Err(e)
            }
        }
    }
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the line starting at `start` (terminator stripped) and the offset after it
fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rel = buf[start..].iter().position(|&b| b == b'\n')?;
    let end = start + rel;
    let line_end = if end > start && buf[end - 1] == b'\r' { end - 1 } else { end };
    Some((&buf[start..line_end], end + 1))
}

fn parse_number<T: std::str::FromStr>(text: &str) -> ProtocolResult<T> {
    text.trim()
        .parse()
        .map_err(|_| ProtocolError::ParseError(format!("Invalid number: {}", text)))
}

fn decode_at(buf: &[u8], start: usize) -> ProtocolResult<Option<(Response, usize)>> {
    let (line, next) = match read_line(buf, start) {
        Some(found) => found,
        None => return Ok(None),
    };

    let line = String::from_utf8_lossy(line);
    let (marker, body) = match line.chars().next() {
        Some(c) => (c, &line[c.len_utf8()..]),
        None => return Err(ProtocolError::ParseError("Empty response line".into())),
    };

    let response = match marker {
        '+' => match body {
            "PONG" => Response::Pong,
            "OK" => Response::Ok(None),
            other => Response::Ok(Some(other.strip_prefix("OK ").unwrap_or(other).to_string())),
        },
        '-' => {
            let rest = body.strip_prefix("ERR ").unwrap_or(body);
            let (code, message) = rest.split_once(' ').unwrap_or((rest, ""));
            Response::error(code, message)
        }
        ':' => Response::Integer(parse_number(body)?),
        '$' => {
            if body == "-1" {
                Response::Null
            } else {
                let len: usize = parse_number(body)?;
                let data_end = next + len;
                if buf.len() < data_end + 2 {
                    return Ok(None);
                }
                if &buf[data_end..data_end + 2] != b"\r\n" {
                    return Err(ProtocolError::ParseError("Bulk length mismatch".into()));
                }
                return Ok(Some((Response::Bulk(buf[next..data_end].to_vec()), data_end + 2)));
            }
        }
        '*' => {
            let count: usize = parse_number(body)?;
            let mut items = Vec::with_capacity(count.min(1024));
            let mut pos = next;
            for _ in 0..count {
                match decode_at(buf, pos)? {
                    Some((item, end)) => {
                        items.push(item);
                        pos = end;
                    }
                    None => return Ok(None),
                }
            }
            return Ok(Some((Response::Array(items), pos)));
        }
        '>' => Response::Push(parse_push(body)?),
        other => {
            return Err(ProtocolError::ParseError(format!("Unknown response marker: {}", other)));
        }
    };

    Ok(Some((response, next)))
}

fn parse_push(body: &str) -> ProtocolResult<ChannelEvent> {
    let mut tokens = Tokenizer::new(body);
    let kind = tokens
        .next()
        .ok_or_else(|| ProtocolError::ParseError("Empty push frame".into()))?;
    let document_id = DocumentId::new(
        tokens
            .next()
            .ok_or_else(|| ProtocolError::MissingArgument("document_id".into()))?,
    )?;
    let payload = tokens.rest().unwrap_or_default();

    let event = match kind {
        "CHANGE" => ChannelEvent::Change {
            document_id,
            content: parse_content(&payload),
        },
        "CURSOR" => ChannelEvent::Cursor {
            document_id,
            payload: serde_json::from_str(&payload)?,
        },
        "JOIN" => ChannelEvent::Join {
            document_id,
            member: serde_json::from_str(&payload)?,
        },
        "LEAVE" => ChannelEvent::Leave {
            document_id,
            participant_id: ParticipantId::new(payload.trim())?,
        },
        other => return Err(ProtocolError::ParseError(format!("Unknown push kind: {}", other))),
    };

    Ok(event)
}
