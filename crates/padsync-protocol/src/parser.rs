//! Command parser

use crate::command::Command;
use crate::error::{ProtocolError, ProtocolResult};
use crate::MAX_MESSAGE_SIZE;
use bytes::BytesMut;
use padsync_core::{CursorPayload, ParticipantId, PresenceMember};

/// Incremental command parser; feed raw bytes, pull complete commands
pub struct Parser {
    buffer: BytesMut,
}

impl Parser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the parser buffer
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

    /// Try to parse a complete command from the buffer.
    ///
    /// A malformed line is consumed and reported; the following lines remain
    /// parseable.
    pub fn parse(&mut self) -> ProtocolResult<Option<Command>> {
        let line_end = match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => pos,
            None => return Ok(None),
        };

        let line_len = if line_end > 0 && self.buffer[line_end - 1] == b'\r' {
            line_end - 1
        } else {
            line_end
        };

        let line = String::from_utf8_lossy(&self.buffer[..line_len]).to_string();
        let _ = self.buffer.split_to(line_end + 1);

        Self::parse_line(&line).map(Some)
    }

    /// Parse a single command line (without the line terminator)
    pub fn parse_line(line: &str) -> ProtocolResult<Command> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::InvalidCommand("Empty command".into()));
        }

        let mut tokens = Tokenizer::new(line);
        let cmd = tokens
            .next()
            .ok_or_else(|| ProtocolError::InvalidCommand("Empty command".into()))?
            .to_uppercase();

        match cmd.as_str() {
            "AUTH" => {
                let secret = tokens.next().ok_or_else(|| ProtocolError::MissingArgument("secret".into()))?;
                Ok(Command::auth(secret))
            }
            "GET" => Ok(Command::get(document_id(&mut tokens)?)),
            "CREATE" => {
                let id = document_id(&mut tokens)?;
                let content = tokens.rest().map(|s| parse_content(&s)).unwrap_or_default();
                Ok(Command::create(id, content))
            }
            "SET" => {
                let id = document_id(&mut tokens)?;
                let raw = tokens.rest().ok_or_else(|| ProtocolError::MissingArgument("content".into()))?;
                Ok(Command::set(id, parse_content(&raw)))
            }
            "DEL" | "DELETE" => Ok(Command::delete(document_id(&mut tokens)?)),
            "KEYS" => Ok(Command::keys(tokens.next().map(str::to_string))),
            "LIST" => Ok(Command::list(tokens.next().map(str::to_string))),
            "SUB" | "SUBSCRIBE" => Ok(Command::subscribe(document_id(&mut tokens)?)),
            "UNSUB" | "UNSUBSCRIBE" => Ok(Command::unsubscribe(document_id(&mut tokens)?)),
            "JOIN" => {
                let id = document_id(&mut tokens)?;
                let json = tokens.rest().ok_or_else(|| ProtocolError::MissingArgument("member".into()))?;
                let member: PresenceMember = serde_json::from_str(&json)?;
                Ok(Command::join(id, member))
            }
            "CURSOR" => {
                let id = document_id(&mut tokens)?;
                let json = tokens.rest().ok_or_else(|| ProtocolError::MissingArgument("payload".into()))?;
                let payload: CursorPayload = serde_json::from_str(&json)?;
                Ok(Command::cursor(id, payload))
            }
            "LEAVE" => {
                let id = document_id(&mut tokens)?;
                let participant = tokens
                    .next()
                    .ok_or_else(|| ProtocolError::MissingArgument("participant_id".into()))?;
                Ok(Command::leave(id, ParticipantId::new(participant)?))
            }
            "WHO" => Ok(Command::who(document_id(&mut tokens)?)),
            "PING" => Ok(Command::ping()),
            "INFO" => Ok(Command::info()),
            "QUIT" => Ok(Command::quit()),
            _ => Err(ProtocolError::InvalidCommand(format!("Unknown command: {}", cmd))),
        }
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

fn document_id(tokens: &mut Tokenizer<'_>) -> ProtocolResult<String> {
    tokens
        .next()
        .map(str::to_string)
        .ok_or_else(|| ProtocolError::MissingArgument("document_id".into()))
}

/// Content is a JSON string; anything else is taken verbatim
pub fn parse_content(s: &str) -> String {
    let s = s.trim();
    serde_json::from_str::<String>(s).unwrap_or_else(|_| s.to_string())
}

/// Simple tokenizer that handles quoted strings
pub(crate) struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn skip_spaces(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos..].starts_with(' ') {
            self.pos += 1;
        }
    }

    pub(crate) fn next(&mut self) -> Option<&'a str> {
        self.skip_spaces();

        if self.pos >= self.input.len() {
            return None;
        }

        let remaining = &self.input[self.pos..];

        if let Some(quoted) = remaining.strip_prefix('"') {
            if let Some(end) = quoted.find('"') {
                self.pos += end + 2;
                return Some(&quoted[..end]);
            }
        }

        let end = remaining.find(' ').unwrap_or(remaining.len());
        self.pos += end;

        Some(&remaining[..end])
    }

    /// Everything after the current position
    pub(crate) fn rest(&mut self) -> Option<String> {
        self.skip_spaces();

        if self.pos >= self.input.len() {
            return None;
        }

        let remaining = self.input[self.pos..].to_string();
        self.pos = self.input.len();
        Some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;
    use padsync_core::Participant;

    fn parse(line: &[u8]) -> Command {
        let mut parser = Parser::new();
        parser.feed(line).unwrap();
        parser.parse().unwrap().unwrap()
    }

    #[test]
    fn test_parse_create_defaults_to_empty() {
        let cmd = parse(b"CREATE abc123\r\n");
        assert_eq!(cmd.kind, CommandKind::Create { content: String::new() });
        assert_eq!(cmd.document_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_parse_set_json_string() {
        let cmd = parse(b"SET abc123 \"Hello\\nWorld\"\r\n");
        assert_eq!(cmd.kind, CommandKind::Set { content: "Hello\nWorld".into() });
    }

    #[test]
    fn test_parse_set_raw_fallback() {
        let cmd = parse(b"set abc123 just some words\n");
        assert_eq!(cmd.kind, CommandKind::Set { content: "just some words".into() });
    }

    #[test]
    fn test_parse_set_keeps_non_string_json_verbatim() {
        let cmd = parse(b"SET abc123 42\r\n");
        assert_eq!(cmd.kind, CommandKind::Set { content: "42".into() });
    }

    #[test]
    fn test_parse_set_requires_content() {
        let mut parser = Parser::new();
        parser.feed(b"SET abc123\r\n").unwrap();
        assert!(matches!(parser.parse(), Err(ProtocolError::MissingArgument(_))));
    }

    #[test]
    fn test_parse_cursor() {
        let me = Participant::random();
        let line = Command::cursor("abc123", me.cursor_at(12.5, 40.0)).encode();

        let cmd = parse(line.as_bytes());
        match cmd.kind {
            CommandKind::Cursor { payload } => {
                assert_eq!(payload.participant_id, me.id);
                assert_eq!(payload.x, 12.5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_join_rejects_bad_json() {
        let mut parser = Parser::new();
        parser.feed(b"JOIN abc123 {not json}\r\n").unwrap();
        assert!(matches!(parser.parse(), Err(ProtocolError::InvalidJson(_))));
    }

    #[test]
    fn test_parse_leave_validates_participant() {
        let mut parser = Parser::new();
        parser.feed(b"LEAVE abc123 bad/id\r\n").unwrap();
        assert!(matches!(parser.parse(), Err(ProtocolError::Core(_))));
    }

    #[test]
    fn test_parse_auth_quoted() {
        let cmd = parse(b"AUTH \"open sesame\"\r\n");
        assert_eq!(cmd.kind, CommandKind::Auth { secret: "open sesame".into() });
    }

    #[test]
    fn test_parse_ping() {
        assert_eq!(parse(b"PING\r\n").kind, CommandKind::Ping);
    }

    #[test]
    fn test_unknown_command() {
        let mut parser = Parser::new();
        parser.feed(b"FROB abc123\r\n").unwrap();
        assert!(matches!(parser.parse(), Err(ProtocolError::InvalidCommand(_))));
    }

    #[test]
    fn test_incomplete_command() {
        let mut parser = Parser::new();
        parser.feed(b"GET abc123").unwrap();

        assert!(parser.parse().unwrap().is_none());

        parser.feed(b"\r\n").unwrap();
        assert!(parser.parse().unwrap().is_some());
    }

    #[test]
    fn test_bad_line_does_not_poison_buffer() {
        let mut parser = Parser::new();
        parser.feed(b"NOPE\r\nPING\r\n").unwrap();

        assert!(parser.parse().is_err());
        assert_eq!(parser.parse().unwrap().unwrap().kind, CommandKind::Ping);
    }

    #[test]
    fn test_message_too_large() {
        let mut parser = Parser::new();
        let big = vec![b'a'; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(parser.feed(&big), Err(ProtocolError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_encode_parse_agree() {
        let original = Command::set("team:notes", "tabs\tand \"quotes\"\n");
        assert_eq!(Parser::parse_line(original.encode().trim_end()).unwrap(), original);
    }
}
