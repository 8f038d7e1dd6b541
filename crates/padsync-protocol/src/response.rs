//! Response types and encoding

use crate::command::json_string;
use bytes::{BufMut, BytesMut};
use padsync_core::ChannelEvent;
use serde::Serialize;

/// A server response or push frame
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// +OK [message]
    Ok(Option<String>),

    /// -ERR <code> <message>
    Error { code: String, message: String },

    /// $<length>\r\n<data>
    Bulk(Vec<u8>),

    /// *<count>\r\n<items>
    Array(Vec<Response>),

    /// :<integer>
    Integer(i64),

    /// $-1
    Null,

    /// +PONG
    Pong,

    /// >KIND <id> <payload>, unsolicited event for a subscribed document
    Push(ChannelEvent),
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(None)
    }

    pub fn ok_with_message(msg: impl Into<String>) -> Self {
        Response::Ok(Some(msg.into()))
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(id: &str) -> Self {
        Response::error("NOT_FOUND", format!("Document not found: {}", id))
    }

    pub fn invalid_command(msg: &str) -> Self {
        Response::error("INVALID_CMD", msg)
    }

    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Response::Bulk(data.into())
    }

    /// Bulk response carrying a JSON document
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(data) => Response::Bulk(data),
            Err(e) => Response::error("SERIALIZATION", e.to_string()),
        }
    }

    pub fn integer(n: i64) -> Self {
        Response::Integer(n)
    }

    pub fn pong() -> Self {
        Response::Pong
    }

    pub fn null() -> Self {
        Response::Null
    }

    pub fn array(items: Vec<Response>) -> Self {
        Response::Array(items)
    }

    pub fn push(event: ChannelEvent) -> Self {
        Response::Push(event)
    }

    pub fn is_push(&self) -> bool {
        matches!(self, Response::Push(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }

    /// Bulk payload as UTF-8, if this is a bulk response
    pub fn as_text(&self) -> Option<String> {
        match self {
            Response::Bulk(data) => Some(String::from_utf8_lossy(data).into_owned()),
            _ => None,
        }
    }

    /// Encode the response to bytes
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the response into an existing buffer
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Response::Ok(None) => put_line(buf, &[b"+OK"]),
            Response::Ok(Some(msg)) => put_line(buf, &[b"+OK ", single_line(msg).as_bytes()]),
            Response::Error { code, message } => {
                put_line(buf, &[b"-ERR ", code.as_bytes(), b" ", single_line(message).as_bytes()])
            }
            Response::Bulk(data) => {
                put_line(buf, &[b"$", data.len().to_string().as_bytes()]);
                put_line(buf, &[data]);
            }
            Response::Array(items) => {
                put_line(buf, &[b"*", items.len().to_string().as_bytes()]);
                items.iter().for_each(|item| item.encode_into(buf));
            }
            Response::Integer(n) => put_line(buf, &[b":", n.to_string().as_bytes()]),
            Response::Null => put_line(buf, &[b"$-1"]),
            Response::Pong => put_line(buf, &[b"+PONG"]),
            Response::Push(event) => put_line(buf, &[push_line(event).as_bytes()]),
        }
    }
}

fn put_line(buf: &mut BytesMut, parts: &[&[u8]]) {
    for part in parts {
        buf.put_slice(part);
    }
    buf.put_slice(b"\r\n");
}

fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}

fn push_line(event: &ChannelEvent) -> String {
    // Payload structs hold only strings and numbers, so serialization cannot fail
    match event {
        ChannelEvent::Change { document_id, content } => {
            format!(">CHANGE {} {}", document_id, json_string(content))
        }
        ChannelEvent::Cursor { document_id, payload } => {
            format!(">CURSOR {} {}", document_id, serde_json::to_string(payload).unwrap_or_default())
        }
        ChannelEvent::Join { document_id, member } => {
            format!(">JOIN {} {}", document_id, serde_json::to_string(member).unwrap_or_default())
        }
        ChannelEvent::Leave {
            document_id,
            participant_id,
        } => format!(">LEAVE {} {}", document_id, participant_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use padsync_core::DocumentId;

    #[test]
    fn test_encode_ok() {
        assert_eq!(Response::ok().encode().as_ref(), b"+OK\r\n");
    }

    #[test]
    fn test_encode_error_stays_on_one_line() {
        let resp = Response::error("PERSIST_ERROR", "disk\nfull");
        assert_eq!(resp.encode().as_ref(), b"-ERR PERSIST_ERROR disk full\r\n");
    }

    #[test]
    fn test_encode_bulk() {
        let resp = Response::bulk(b"hello".to_vec());
        assert_eq!(resp.encode().as_ref(), b"$5\r\nhello\r\n");
    }

    #[test]
    fn test_encode_null() {
        assert_eq!(Response::null().encode().as_ref(), b"$-1\r\n");
    }

    #[test]
    fn test_encode_array() {
        let resp = Response::array(vec![Response::ok(), Response::integer(1)]);
        assert_eq!(resp.encode().as_ref(), b"*2\r\n+OK\r\n:1\r\n");
    }

    #[test]
    fn test_encode_change_push() {
        let resp = Response::push(ChannelEvent::Change {
            document_id: DocumentId::new("abc123").unwrap(),
            content: "Hello\nthere".into(),
        });
        assert_eq!(resp.encode().as_ref(), b">CHANGE abc123 \"Hello\\nthere\"\r\n");
    }

    #[test]
    fn test_json_response() {
        let resp = Response::json(&vec!["a", "b"]);
        assert_eq!(resp.as_text().as_deref(), Some("[\"a\",\"b\"]"));
    }
}
