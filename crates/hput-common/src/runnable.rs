use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a stored artifact, fixed at write time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Kind {
    Text,
    Script,
    Binary,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Text => f.write_str("Text"),
            Kind::Script => f.write_str("Javascript"),
            Kind::Binary => f.write_str("Binary"),
        }
    }
}

/// Stored content. The variant is the runnable's kind, so text and bytes can
/// never both be populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Script(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn kind(&self) -> Kind {
        match self {
            Payload::Text(_) => Kind::Text,
            Payload::Script(_) => Kind::Script,
            Payload::Binary(_) => Kind::Binary,
        }
    }

    /// True when there is nothing to serve.
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Text(s) | Payload::Script(s) => s.is_empty(),
            Payload::Binary(b) => b.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Text(s) | Payload::Script(s) => s.len(),
            Payload::Binary(b) => b.len(),
        }
    }
}

/// A stored artifact at an exact request path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Runnable {
    pub path: String,
    pub payload: Payload,
}

impl Runnable {
    pub fn new(path: impl Into<String>, payload: Payload) -> Self {
        Self {
            path: path.into(),
            payload,
        }
    }

    pub fn kind(&self) -> Kind {
        self.payload.kind()
    }

    /// The textual payload of a text or script runnable.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(s) | Payload::Script(s) => Some(s),
            Payload::Binary(_) => None,
        }
    }

    /// The raw bytes to serve for this runnable, whatever its kind.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.payload {
            Payload::Text(s) | Payload::Script(s) => s.as_bytes(),
            Payload::Binary(b) => b,
        }
    }
}

/// Outcome of a write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PutResult {
    pub kind: Kind,
    pub overwrote: bool,
    /// Classifier diagnostic, empty for scripts.
    pub message: String,
}
