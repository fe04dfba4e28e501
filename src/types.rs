use std::fmt;
use std::str::FromStr;

/// Server-side key for one accepted connection
pub type SessionId = ulid::Ulid;

/// Global chat message counter value
pub type MessageId = i64;

/// Client-chosen identity token, stable for the lifetime of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(uuid::Uuid);

impl Identity {
    pub fn new(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Generate a fresh random identity (what a client does before connecting)
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl FromStr for Identity {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// One accepted chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub sender: String,
    pub text: String,
}

/// Check a display name supplied during the handshake.
///
/// Names are 1..=max_len bytes of printable ASCII (spaces allowed, but not a
/// name made only of spaces).
pub fn validate_display_name(name: &str, max_len: usize) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Display name cannot be empty".to_string());
    }
    if name.len() > max_len {
        return Err(format!(
            "Display name is {} bytes, limit is {}",
            name.len(),
            max_len
        ));
    }
    if let Some(c) = name.chars().find(|c| !(c.is_ascii_graphic() || *c == ' ')) {
        return Err(format!(
            "Display name contains unsupported character {:?}",
            c
        ));
    }
    Ok(())
}

/// Check the body of a chat message before it is broadcast
pub fn validate_message_text(text: &str, max_len: usize) -> Result<(), String> {
    if text.is_empty() {
        return Err("Message text cannot be empty".to_string());
    }
    if text.len() > max_len {
        return Err(format!(
            "Message is {} bytes, limit is {}",
            text.len(),
            max_len
        ));
    }
    Ok(())
}
