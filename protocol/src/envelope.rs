//! Internal message envelope. The wire stays untyped, but the relay path
//! and observer dispatch know whether a payload came from a user or was
//! synthesized by the server.

use std::fmt;

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Joined(String),
    Left(String),
}

impl Notice {
    pub fn nickname(&self) -> &str {
        match self {
            Notice::Joined(name) | Notice::Left(name) => name,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Joined(name) => write!(f, "{name} joined the chat!"),
            Notice::Left(name) => write!(f, "{name} left the chat!"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    System(Notice),
    UserText(Bytes), // already formatted by the sender, e.g. "alice: hi"
}

impl Envelope {
    pub fn to_wire(&self) -> Bytes {
        match self {
            Envelope::System(notice) => Bytes::from(notice.to_string()),
            Envelope::UserText(payload) => payload.clone(),
        }
    }

    pub fn display_text(&self) -> String {
        match self {
            Envelope::System(notice) => notice.to_string(),
            Envelope::UserText(payload) => String::from_utf8_lossy(payload).into_owned(),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Envelope::System(_))
    }
}
