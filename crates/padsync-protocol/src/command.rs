//! Protocol command types

use padsync_core::{CursorPayload, ParticipantId, PresenceMember};

/// A parsed command
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    pub document_id: Option<String>,
}

/// All supported commands
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    /// AUTH <secret>
    Auth { secret: String },

    /// GET <id>
    Get,

    /// CREATE <id> [<json string>]
    Create { content: String },

    /// SET <id> <json string>
    Set { content: String },

    /// DEL <id>
    Delete,

    /// KEYS [pattern]
    Keys { pattern: Option<String> },

    /// LIST [pattern]
    List { pattern: Option<String> },

    /// SUB <id>
    Subscribe,

    /// UNSUB <id>
    Unsubscribe,

    /// JOIN <id> <member json>
    Join { member: PresenceMember },

    /// CURSOR <id> <payload json>
    Cursor { payload: CursorPayload },

    /// LEAVE <id> <participant id>
    Leave { participant_id: ParticipantId },

    /// WHO <id>
    Who,

    /// PING
    Ping,

    /// INFO
    Info,

    /// QUIT
    Quit,
}

impl CommandKind {
    /// Commands that only an admin may run when a secret is configured
    pub fn is_admin_only(&self) -> bool {
        matches!(self, CommandKind::Delete | CommandKind::Keys { .. } | CommandKind::List { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Auth { .. } => "AUTH",
            CommandKind::Get => "GET",
            CommandKind::Create { .. } => "CREATE",
            CommandKind::Set { .. } => "SET",
            CommandKind::Delete => "DEL",
            CommandKind::Keys { .. } => "KEYS",
            CommandKind::List { .. } => "LIST",
            CommandKind::Subscribe => "SUB",
            CommandKind::Unsubscribe => "UNSUB",
            CommandKind::Join { .. } => "JOIN",
            CommandKind::Cursor { .. } => "CURSOR",
            CommandKind::Leave { .. } => "LEAVE",
            CommandKind::Who => "WHO",
            CommandKind::Ping => "PING",
            CommandKind::Info => "INFO",
            CommandKind::Quit => "QUIT",
        }
    }
}

impl Command {
    fn with_id(id: impl Into<String>, kind: CommandKind) -> Self {
        Command {
            kind,
            document_id: Some(id.into()),
        }
    }

    fn bare(kind: CommandKind) -> Self {
        Command {
            kind,
            document_id: None,
        }
    }

    pub fn auth(secret: impl Into<String>) -> Self {
        Self::bare(CommandKind::Auth { secret: secret.into() })
    }

    pub fn get(id: impl Into<String>) -> Self {
        Self::with_id(id, CommandKind::Get)
    }

    pub fn create(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_id(id, CommandKind::Create { content: content.into() })
    }

    pub fn set(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_id(id, CommandKind::Set { content: content.into() })
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self::with_id(id, CommandKind::Delete)
    }

    pub fn keys(pattern: Option<String>) -> Self {
        Self::bare(CommandKind::Keys { pattern })
    }

    pub fn list(pattern: Option<String>) -> Self {
        Self::bare(CommandKind::List { pattern })
    }

    pub fn subscribe(id: impl Into<String>) -> Self {
        Self::with_id(id, CommandKind::Subscribe)
    }

    pub fn unsubscribe(id: impl Into<String>) -> Self {
        Self::with_id(id, CommandKind::Unsubscribe)
    }

    pub fn join(id: impl Into<String>, member: PresenceMember) -> Self {
        Self::with_id(id, CommandKind::Join { member })
    }

    pub fn cursor(id: impl Into<String>, payload: CursorPayload) -> Self {
        Self::with_id(id, CommandKind::Cursor { payload })
    }

    pub fn leave(id: impl Into<String>, participant_id: ParticipantId) -> Self {
        Self::with_id(id, CommandKind::Leave { participant_id })
    }

    pub fn who(id: impl Into<String>) -> Self {
        Self::with_id(id, CommandKind::Who)
    }

    pub fn ping() -> Self {
        Self::bare(CommandKind::Ping)
    }

    pub fn info() -> Self {
        Self::bare(CommandKind::Info)
    }

    pub fn quit() -> Self {
        Self::bare(CommandKind::Quit)
    }

    /// Render the command as one protocol line, terminated by CRLF
    pub fn encode(&self) -> String {
        let mut line = String::from(self.kind.name());

        if let Some(id) = &self.document_id {
            line.push(' ');
            line.push_str(id);
        }

        let argument = match &self.kind {
            CommandKind::Auth { secret } => Some(secret.clone()),
            CommandKind::Create { content } | CommandKind::Set { content } => Some(json_string(content)),
            CommandKind::Keys { pattern } | CommandKind::List { pattern } => pattern.clone(),
            CommandKind::Join { member } => serde_json::to_string(member).ok(),
            CommandKind::Cursor { payload } => serde_json::to_string(payload).ok(),
            CommandKind::Leave { participant_id } => Some(participant_id.to_string()),
            _ => None,
        };

        if let Some(argument) = argument {
            line.push(' ');
            line.push_str(&argument);
        }

        line.push_str("\r\n");
        line
    }
}

/// JSON-encode text so that it fits on one protocol line
pub fn json_string(content: &str) -> String {
    // Serializing a str cannot fail
    serde_json::to_string(content).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use padsync_core::Participant;

    #[test]
    fn test_encode_set_escapes_newlines() {
        let line = Command::set("abc123", "line one\nline two").encode();
        assert_eq!(line, "SET abc123 \"line one\\nline two\"\r\n");
    }

    #[test]
    fn test_encode_bare_commands() {
        assert_eq!(Command::ping().encode(), "PING\r\n");
        assert_eq!(Command::keys(Some("team:*".into())).encode(), "KEYS team:*\r\n");
        assert_eq!(Command::list(None).encode(), "LIST\r\n");
    }

    #[test]
    fn test_encode_cursor_is_single_line() {
        let me = Participant::random();
        let line = Command::cursor("abc123", me.cursor_at(3.0, 4.0)).encode();
        assert!(line.starts_with("CURSOR abc123 {"));
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_admin_only_commands() {
        assert!(CommandKind::Delete.is_admin_only());
        assert!(CommandKind::List { pattern: None }.is_admin_only());
        assert!(!CommandKind::Get.is_admin_only());
        assert!(!CommandKind::Set { content: String::new() }.is_admin_only());
    }
}
