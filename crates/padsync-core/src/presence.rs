//! Participant identity and cursor presence types

use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

const MAX_PARTICIPANT_ID_LEN: usize = 64;

const CURSOR_COLORS: &[&str] = &[
    "#e11d48", "#db2777", "#9333ea", "#4f46e5", "#2563eb", "#0891b2", "#059669", "#65a30d",
    "#ca8a04", "#ea580c",
];

const NAME_ADJECTIVES: &[&str] = &[
    "Swift", "Quiet", "Bright", "Clever", "Brave", "Calm", "Eager", "Gentle", "Lucky", "Witty",
];

const NAME_ANIMALS: &[&str] = &[
    "Otter", "Falcon", "Panda", "Lynx", "Heron", "Fox", "Koala", "Badger", "Wren", "Moose",
];

/// Per-session participant identifier, never persisted
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() || id.len() > MAX_PARTICIPANT_ID_LEN {
            return Err(Error::InvalidParticipantId(format!(
                "Participant ID must be 1..={} bytes",
                MAX_PARTICIPANT_ID_LEN
            )));
        }

        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(Error::InvalidParticipantId(
                "Participant ID must match pattern [a-zA-Z0-9_-]+".into(),
            ));
        }

        Ok(Self(id))
    }

    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

/// The local participant: random id, display name and cursor color
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub color: String,
}

impl Participant {
    pub fn new(id: ParticipantId, display_name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            color: color.into(),
        }
    }

    /// A participant with a random id, name and color
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let display_name = format!(
            "{} {}",
            NAME_ADJECTIVES[rng.gen_range(0..NAME_ADJECTIVES.len())],
            NAME_ANIMALS[rng.gen_range(0..NAME_ANIMALS.len())]
        );
        let color = CURSOR_COLORS[rng.gen_range(0..CURSOR_COLORS.len())];

        Self {
            id: ParticipantId::random(),
            display_name,
            color: color.to_string(),
        }
    }

    /// Presence announcement for this participant (no position)
    pub fn member(&self) -> PresenceMember {
        PresenceMember {
            participant_id: self.id.clone(),
            display_name: self.display_name.clone(),
            color: self.color.clone(),
        }
    }

    /// Cursor broadcast for this participant at the given editor-relative position
    pub fn cursor_at(&self, x: f64, y: f64) -> CursorPayload {
        CursorPayload {
            participant_id: self.id.clone(),
            x,
            y,
            display_name: self.display_name.clone(),
            color: self.color.clone(),
        }
    }
}

/// Ephemeral pointer position broadcast to other viewers of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPayload {
    pub participant_id: ParticipantId,
    pub x: f64,
    pub y: f64,
    pub display_name: String,
    pub color: String,
}

/// Presence announcement sent when a participant joins a document channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMember {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub color: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_id_validation() {
        assert!(ParticipantId::new("p-1_a").is_ok());
        assert!(ParticipantId::new("").is_err());
        assert!(ParticipantId::new("has space").is_err());
        assert!(ParticipantId::new("x".repeat(65)).is_err());
    }

    #[test]
    fn test_random_participant() {
        let a = Participant::random();
        let b = Participant::random();
        assert_ne!(a.id, b.id);
        assert!(a.color.starts_with('#'));
        assert!(a.display_name.contains(' '));
        assert!(ParticipantId::new(a.id.as_str()).is_ok());
    }

    #[test]
    fn test_random_participants_cover_every_name_and_color() {
        let people: Vec<Participant> = (0..2000).map(|_| Participant::random()).collect();

        let colors: std::collections::HashSet<&str> = people.iter().map(|p| p.color.as_str()).collect();
        assert_eq!(colors.len(), CURSOR_COLORS.len());

        let names: std::collections::HashSet<&str> = people.iter().map(|p| p.display_name.as_str()).collect();
        assert!(names.len() > NAME_ADJECTIVES.len() * NAME_ANIMALS.len() / 2);
    }

    #[test]
    fn test_cursor_payload_json_shape() {
        let me = Participant::new(ParticipantId::new("p1").unwrap(), "Swift Otter", "#e11d48");
        let json = serde_json::to_value(me.cursor_at(10.0, 20.5)).unwrap();
        assert_eq!(json["participant_id"], "p1");
        assert_eq!(json["x"], 10.0);
        assert_eq!(json["y"], 20.5);
        assert_eq!(json["display_name"], "Swift Otter");
    }
}
